use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::constants::{
    make_data_characteristic_uuid, make_data_service_uuid, CONNECT_DEADLINE, SELECT_DEADLINE,
    WRITE_DEADLINE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub select_deadline_ms: u64,
    pub connect_deadline_ms: u64,
    pub write_deadline_ms: u64,
}

impl ChannelConfig {
    pub fn select_deadline(&self) -> Duration {
        Duration::from_millis(self.select_deadline_ms)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.connect_deadline_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            service_uuid: make_data_service_uuid(),
            characteristic_uuid: make_data_characteristic_uuid(),
            select_deadline_ms: SELECT_DEADLINE,
            connect_deadline_ms: CONNECT_DEADLINE,
            write_deadline_ms: WRITE_DEADLINE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_the_uart_profile() {
        let config = ChannelConfig::default();
        assert_eq!(
            config.service_uuid.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            config.characteristic_uuid.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(config.write_deadline(), Duration::from_millis(2000));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&ChannelConfig::default()).unwrap();
        assert!(json.contains("\"serviceUuid\""));
        assert!(json.contains("\"writeDeadlineMs\""));
    }
}
