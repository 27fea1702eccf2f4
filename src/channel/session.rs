use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::Stream;
use futures::StreamExt;
use log::{info, warn};
use tokio::spawn;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::channel::adapter::{BleAdapter, BleDevice, BtleAdapter, DeviceSelector, GattCharacteristic, GattConnection};
use crate::channel::codec::{decode_notification, frame_payload};
use crate::channel::constants::WRITE_CHUNK;
use crate::channel::events::EventBus;
use crate::channel::types::{ChannelEvent, ChannelState};
use crate::config::types::ChannelConfig;
use crate::error::ChannelError;

/// Handles held while a connection is being established or is live: the
/// selected device, the open GATT connection and the bound data
/// characteristic. Assigned only by `connect`, released as one unit by
/// `disconnect` and by link-loss reconciliation.
struct Link {
    #[allow(dead_code)]
    device: Box<dyn BleDevice>,
    connection: Box<dyn GattConnection>,
    characteristic: Arc<dyn GattCharacteristic>,
}

struct Shared {
    // lock order: listener, link, state, device_name
    listener: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    link: Mutex<Option<Link>>,
    state: RwLock<ChannelState>,
    device_name: RwLock<Option<String>>,
    bus: EventBus,
}

/// A single-device BLE message channel.
///
/// One session per process: connect, exchange bytes over the bound data
/// characteristic, disconnect. Connection state and the advertised device
/// name are observable at any time; inbound notifications are decoded and
/// published on the event bus.
pub struct BleChannel {
    adapter: Arc<dyn BleAdapter>,
    config: ChannelConfig,
    shared: Arc<Shared>,
}

impl BleChannel {
    /// Channel backed by the system bluetooth adapter.
    pub async fn new(
        config: ChannelConfig,
        selector: Arc<dyn DeviceSelector>,
    ) -> Result<Self, ChannelError> {
        let adapter = BtleAdapter::new(selector).await?;
        Ok(Self::with_adapter(Arc::new(adapter), config))
    }

    /// Channel backed by a caller-provided platform seam.
    pub fn with_adapter(adapter: Arc<dyn BleAdapter>, config: ChannelConfig) -> Self {
        BleChannel {
            adapter,
            config,
            shared: Arc::new(Shared {
                listener: Mutex::new(None),
                link: Mutex::new(None),
                state: RwLock::new(ChannelState::Disconnected),
                device_name: RwLock::new(None),
                bus: EventBus::new(),
            }),
        }
    }

    pub async fn state(&self) -> ChannelState {
        *self.shared.state.read().await
    }

    pub async fn device_name(&self) -> Option<String> {
        self.shared.device_name.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ChannelState::Connected
    }

    /// Every channel event: state changes and inbound messages.
    pub fn events(&self) -> impl Stream<Item = ChannelEvent> + Send {
        self.shared.bus.events()
    }

    /// Decoded inbound messages. The stream ends when the channel
    /// disconnects or the peripheral drops the link.
    pub fn messages(&self) -> impl Stream<Item = String> + Send {
        self.shared.bus.messages()
    }

    /// Select a device, open its GATT connection, bind the data
    /// characteristic and subscribe to its notifications.
    ///
    /// On failure the channel is left disconnected with every handle
    /// released.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        {
            let mut state = self.shared.state.write().await;
            if *state != ChannelState::Disconnected {
                return Err(ChannelError::AlreadyConnected);
            }
            *state = ChannelState::Connecting;
        }
        self.shared.bus.publish(ChannelEvent::StateChange(ChannelState::Connecting));

        let device_name = match self.establish().await {
            Ok(device_name) => device_name,
            Err(err) => {
                warn!("Connecting failed: {}", err);
                self.teardown().await;
                return Err(err);
            },
        };

        {
            let link = self.shared.link.lock().await;
            if link.is_none() {
                // the peripheral dropped the link before setup finished
                drop(link);
                self.teardown().await;
                return Err(ChannelError::ConnectionFailed { source: btleplug::Error::NotConnected });
            }

            *self.shared.state.write().await = ChannelState::Connected;
            *self.shared.device_name.write().await = device_name.clone();
            self.shared.bus.publish(ChannelEvent::StateChange(ChannelState::Connected));
        }

        info!("Channel ready; connected to {:?}", device_name);
        Ok(())
    }

    async fn establish(&self) -> Result<Option<String>, ChannelError> {
        let service = self.config.service_uuid;
        let characteristic_uuid = self.config.characteristic_uuid;

        let device = self
            .adapter
            .select_device(&[service], self.config.select_deadline())
            .await?;
        let device_name = device.name();

        let connection = timed(
            self.config.connect_deadline(),
            "gatt connect",
            device.connect_gatt(),
        )
        .await?;

        let characteristic: Arc<dyn GattCharacteristic> =
            match connection.bind_characteristic(service, characteristic_uuid).await {
                Ok(characteristic) => Arc::from(characteristic),
                Err(err) => {
                    // tear down the partially opened connection
                    connection.close().await;
                    return Err(err);
                },
            };

        let notifications = match characteristic.subscribe().await {
            Ok(notifications) => notifications,
            Err(err) => {
                connection.close().await;
                return Err(err);
            },
        };

        *self.shared.link.lock().await = Some(Link { device, connection, characteristic });
        self.start_listener(notifications).await;

        Ok(device_name)
    }

    async fn start_listener(&self, mut notifications: BoxStream<'static, Vec<u8>>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = self.shared.clone();

        let handle = spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        break;
                    },
                    next = notifications.next() => match next {
                        Some(payload) => match decode_notification(&payload) {
                            Ok(message) => shared.bus.publish(ChannelEvent::Message(message)),
                            Err(err) => warn!("Dropping notification: {}", err),
                        },
                        None => {
                            info!("Notification stream ended; the peripheral dropped the link");
                            Self::reconcile_disconnected(&shared).await;
                            break;
                        },
                    },
                }
            }
        });

        *self.shared.listener.lock().await = Some((cancel, handle));
    }

    /// Link-loss cleanup run from the notification listener itself: release
    /// the handles and reconcile the observable state without joining the
    /// listener task.
    async fn reconcile_disconnected(shared: &Shared) {
        shared.link.lock().await.take();

        let state_changed = {
            let mut state = shared.state.write().await;
            let changed = *state != ChannelState::Disconnected;
            *state = ChannelState::Disconnected;
            changed
        };
        shared.device_name.write().await.take();

        if state_changed {
            shared.bus.publish(ChannelEvent::StateChange(ChannelState::Disconnected));
        }
    }

    /// Write one byte to the bound characteristic.
    pub async fn send(&self, byte: u8) -> Result<(), ChannelError> {
        self.write_payload(&[byte]).await
    }

    /// Write an arbitrary payload as a single length-prefixed frame, split
    /// into MTU-sized characteristic writes.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<(), ChannelError> {
        if payload.len() > usize::from(u16::MAX) {
            return Err(ChannelError::PayloadTooLarge { len: payload.len() });
        }

        let framed = frame_payload(payload);
        for chunk in framed.chunks(WRITE_CHUNK) {
            self.write_payload(chunk).await?;
        }
        Ok(())
    }

    async fn write_payload(&self, payload: &[u8]) -> Result<(), ChannelError> {
        let characteristic = {
            let link = self.shared.link.lock().await;
            match (link.as_ref(), *self.shared.state.read().await) {
                (Some(link), ChannelState::Connected) => link.characteristic.clone(),
                _ => return Err(ChannelError::NotConnected),
            }
        };

        let deadline = self.config.write_deadline();
        match timed(deadline, "characteristic write", characteristic.write(payload)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.reconcile_after_write_failure().await;
                Err(err)
            },
        }
    }

    /// A failed write on a severed link must not leave the state stale.
    async fn reconcile_after_write_failure(&self) {
        let still_connected = {
            let link = self.shared.link.lock().await;
            match link.as_ref() {
                Some(link) => link.connection.is_connected().await,
                None => return,
            }
        };

        if !still_connected {
            warn!("Write failed on a severed link; dropping the connection");
            self.teardown().await;
        }
    }

    /// Stop the notification listener, close the GATT connection and release
    /// every handle. Calling this while already disconnected is a no-op.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    async fn teardown(&self) {
        let listener = self.shared.listener.lock().await.take();
        if let Some((cancel, handle)) = listener {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!("Notification listener ended abnormally: {:?}", err);
            }
        }

        let link = self.shared.link.lock().await.take();
        if let Some(link) = link {
            link.connection.close().await;
        }

        let state_changed = {
            let mut state = self.shared.state.write().await;
            let changed = *state != ChannelState::Disconnected;
            *state = ChannelState::Disconnected;
            changed
        };
        self.shared.device_name.write().await.take();

        if state_changed {
            self.shared.bus.publish(ChannelEvent::StateChange(ChannelState::Disconnected));
        }
    }
}

async fn timed<T>(
    deadline: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, ChannelError>>,
) -> Result<T, ChannelError> {
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Timeout {
            operation,
            millis: deadline.as_millis() as u64,
        }),
    }
}
