use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Manager, Peripheral};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::ChannelError;

/// Advertised properties of a candidate device, as shown to the selector.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub name: Option<String>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Skip,
    Cancel,
}

/// The user-mediated device selection step. Candidates are offered one at a
/// time as they are discovered; the selector takes the first it accepts, or
/// cancels the whole selection.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    async fn consider(&self, candidate: &Advertisement) -> Verdict;
}

/// Accepts the first device advertising one of the wanted services, or any
/// advertising device when the wanted set is empty.
pub struct FirstAdvertiser(pub Vec<Uuid>);

#[async_trait]
impl DeviceSelector for FirstAdvertiser {
    async fn consider(&self, candidate: &Advertisement) -> Verdict {
        if self.0.is_empty() || candidate.services.iter().any(|uuid| self.0.contains(uuid)) {
            Verdict::Accept
        } else {
            Verdict::Skip
        }
    }
}

/// Accepts the first device whose advertised name contains the needle.
pub struct NameContains(pub String);

#[async_trait]
impl DeviceSelector for NameContains {
    async fn consider(&self, candidate: &Advertisement) -> Verdict {
        match &candidate.name {
            Some(name) if name.contains(&self.0) => Verdict::Accept,
            _ => Verdict::Skip,
        }
    }
}

/// The platform seam. The channel reaches the radio only through these
/// traits: selection, GATT connect, characteristic resolution, write and
/// notifications.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Run device selection. `optional_services` declares the services the
    /// channel intends to use; any advertising device is still offered to
    /// the selector.
    async fn select_device(
        &self,
        optional_services: &[Uuid],
        deadline: Duration,
    ) -> Result<Box<dyn BleDevice>, ChannelError>;
}

#[async_trait]
pub trait BleDevice: Send + Sync {
    fn name(&self) -> Option<String>;

    async fn connect_gatt(&self) -> Result<Box<dyn GattConnection>, ChannelError>;
}

#[async_trait]
pub trait GattConnection: Send + Sync {
    /// Resolve the primary service and the data characteristic within it.
    async fn bind_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Box<dyn GattCharacteristic>, ChannelError>;

    async fn is_connected(&self) -> bool;

    async fn close(&self);
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    async fn write(&self, payload: &[u8]) -> Result<(), ChannelError>;

    /// Subscribe to value-change notifications. Each item is one raw
    /// notification payload; the stream ends when the link drops.
    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, ChannelError>;
}

/// Production adapter backed by the system bluetooth stack.
pub struct BtleAdapter {
    manager: Manager,
    selector: Arc<dyn DeviceSelector>,
}

impl BtleAdapter {
    pub async fn new(selector: Arc<dyn DeviceSelector>) -> Result<Self, ChannelError> {
        let manager = Manager::new().await?;
        Ok(BtleAdapter { manager, selector })
    }
}

#[async_trait]
impl BleAdapter for BtleAdapter {
    async fn select_device(
        &self,
        _optional_services: &[Uuid],
        deadline: Duration,
    ) -> Result<Box<dyn BleDevice>, ChannelError> {
        let adapters = self.manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(ChannelError::NoAdapter)?;

        let mut events = adapter.events().await?;

        // Scan unfiltered; some environments ignore the filter anyway, and the
        // selector is the authority on which advertiser to take.
        adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for peripherals...");

        let selected = timeout(deadline, async {
            while let Some(event) = events.next().await {
                let CentralEvent::DeviceDiscovered(id) = event else {
                    continue;
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };

                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    Ok(None) => {
                        warn!("Peripheral has no properties");
                        continue;
                    },
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        continue;
                    },
                };

                let candidate = Advertisement {
                    name: properties.local_name.clone(),
                    services: properties.services.clone(),
                };
                debug!("Discovered {} {:?}", properties.address, candidate.name);

                match self.selector.consider(&candidate).await {
                    Verdict::Accept => {
                        info!(
                            "Selected peripheral {} {:?} {:?}",
                            properties.address,
                            candidate.name,
                            candidate.services,
                        );
                        return Some((peripheral, candidate.name));
                    },
                    Verdict::Skip => continue,
                    Verdict::Cancel => return None,
                }
            }

            None
        })
        .await;

        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }

        match selected {
            Ok(Some((peripheral, name))) => Ok(Box::new(BtleDevice { peripheral, name })),
            Ok(None) => Err(ChannelError::SelectionCancelled),
            Err(_) => Err(ChannelError::Timeout {
                operation: "device selection",
                millis: deadline.as_millis() as u64,
            }),
        }
    }
}

struct BtleDevice {
    peripheral: Peripheral,
    name: Option<String>,
}

#[async_trait]
impl BleDevice for BtleDevice {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect_gatt(&self) -> Result<Box<dyn GattConnection>, ChannelError> {
        self.peripheral
            .connect()
            .await
            .map_err(|source| ChannelError::ConnectionFailed { source })?;

        Ok(Box::new(BtleConnection { peripheral: self.peripheral.clone() }))
    }
}

struct BtleConnection {
    peripheral: Peripheral,
}

#[async_trait]
impl GattConnection for BtleConnection {
    async fn bind_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Box<dyn GattCharacteristic>, ChannelError> {
        self.peripheral.discover_services().await?;

        for found_service in self.peripheral.services() {
            if !found_service.uuid.eq(&service) {
                continue;
            }

            for found_characteristic in &found_service.characteristics {
                if !found_characteristic.uuid.eq(&characteristic) {
                    continue;
                }

                return Ok(Box::new(BtleCharacteristic {
                    peripheral: self.peripheral.clone(),
                    characteristic: found_characteristic.clone(),
                }));
            }
        }

        Err(ChannelError::ProfileMismatch)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn close(&self) {
        if let Err(err) = self.peripheral.disconnect().await {
            warn!("Failed to close the GATT connection: {:?}", err);
        }
    }
}

struct BtleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl GattCharacteristic for BtleCharacteristic {
    async fn write(&self, payload: &[u8]) -> Result<(), ChannelError> {
        self.peripheral
            .write(&self.characteristic, payload, WriteType::WithResponse)
            .await
            .map_err(|source| ChannelError::WriteFailed { source })
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, ChannelError> {
        self.peripheral.subscribe(&self.characteristic).await?;

        let uuid = self.characteristic.uuid;
        let notifications = self.peripheral.notifications().await?;

        // other characteristics on the peripheral may notify too
        Ok(notifications
            .filter_map(move |data| async move { (data.uuid == uuid).then_some(data.value) })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::constants::make_data_service_uuid;

    fn advertisement(name: Option<&str>, services: Vec<Uuid>) -> Advertisement {
        Advertisement { name: name.map(String::from), services }
    }

    #[tokio::test]
    async fn first_advertiser_requires_a_wanted_service() {
        let selector = FirstAdvertiser(vec![make_data_service_uuid()]);

        let verdict = selector
            .consider(&advertisement(Some("Sensor-01"), vec![]))
            .await;
        assert_eq!(verdict, Verdict::Skip);

        let verdict = selector
            .consider(&advertisement(None, vec![make_data_service_uuid()]))
            .await;
        assert_eq!(verdict, Verdict::Accept);
    }

    #[tokio::test]
    async fn first_advertiser_without_wanted_services_accepts_anything() {
        let selector = FirstAdvertiser(vec![]);

        let verdict = selector.consider(&advertisement(None, vec![])).await;
        assert_eq!(verdict, Verdict::Accept);
    }

    #[tokio::test]
    async fn name_selector_matches_substrings() {
        let selector = NameContains(String::from("Sensor"));

        let verdict = selector
            .consider(&advertisement(Some("Sensor-01"), vec![]))
            .await;
        assert_eq!(verdict, Verdict::Accept);

        let verdict = selector
            .consider(&advertisement(Some("Thermostat"), vec![]))
            .await;
        assert_eq!(verdict, Verdict::Skip);

        let verdict = selector.consider(&advertisement(None, vec![])).await;
        assert_eq!(verdict, Verdict::Skip);
    }
}
