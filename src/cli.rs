use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::channel::adapter::{DeviceSelector, FirstAdvertiser, NameContains};
use crate::channel::session::BleChannel;
use crate::channel::types::{ChannelEvent, ChannelState};
use crate::config::io::ConfigIO;
use crate::error::{AppRunError, ChannelError};

#[derive(Debug, Parser)]
#[command(name = "blelink", version, about = "Bridge a BLE data characteristic to the terminal")]
pub struct Args {
    /// Connect to the first device whose advertised name contains this text,
    /// instead of the first advertiser of the configured service.
    #[arg(long)]
    pub device: Option<String>,

    /// Override the configured service UUID.
    #[arg(long)]
    pub service: Option<Uuid>,

    /// Override the configured characteristic UUID.
    #[arg(long)]
    pub characteristic: Option<Uuid>,

    /// Write the effective configuration back to the config file.
    #[arg(long)]
    pub save_config: bool,
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let mut config = config_io.read().await?;
    if let Some(service) = args.service {
        config.service_uuid = service;
    }
    if let Some(characteristic) = args.characteristic {
        config.characteristic_uuid = characteristic;
    }
    if args.save_config {
        config_io.save(&config).await?;
    }

    let selector: Arc<dyn DeviceSelector> = match &args.device {
        Some(needle) => Arc::new(NameContains(needle.clone())),
        None => Arc::new(FirstAdvertiser(vec![config.service_uuid])),
    };

    let channel = BleChannel::new(config, selector).await?;
    channel.connect().await?;
    info!(
        "Connected to {}",
        channel.device_name().await.unwrap_or_else(|| String::from("(unnamed device)")),
    );

    let mut events = Box::pin(channel.events());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(ChannelEvent::Message(message)) => println!("{}", message),
                Some(ChannelEvent::StateChange(ChannelState::Disconnected)) => {
                    info!("Connection closed by the peripheral");
                    break;
                },
                Some(ChannelEvent::StateChange(state)) => info!("Channel state: {:?}", state),
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let bytes = line.as_bytes();
                    let result = if bytes.len() == 1 {
                        channel.send(bytes[0]).await
                    } else {
                        channel.send_frame(bytes).await
                    };

                    if let Err(err) = result {
                        warn!("Send failed: {}", err);
                        if matches!(err, ChannelError::NotConnected) {
                            break;
                        }
                    }
                },
                Ok(None) | Err(_) => break, // stdin closed
            },
        }
    }

    channel.disconnect().await;
    Ok(())
}
