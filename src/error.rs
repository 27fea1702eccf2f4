use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Device selection was cancelled")]
    SelectionCancelled,

    #[error("Failed to open the GATT connection: {source}")]
    ConnectionFailed { source: btleplug::Error },

    #[error("The device does not expose the expected service and characteristic")]
    ProfileMismatch,

    #[error("The channel is not connected")]
    NotConnected,

    #[error("Writing to the data characteristic failed: {source}")]
    WriteFailed { source: btleplug::Error },

    #[error("Received a notification with an empty payload")]
    NotificationDecodeError,

    #[error("{operation} took longer than {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    #[error("The channel is already connecting or connected")]
    AlreadyConnected,

    #[error("Payload of {len} bytes does not fit in a single frame")]
    PayloadTooLarge { len: usize },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Error communicating with the bluetooth adapter (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to run channel (bluetooth): {source}")]
    Channel { #[from] source: ChannelError },

    #[error("Failed to run channel (config): {source}")]
    Config { #[from] source: ConfigError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_display() {
        let err = ChannelError::NotConnected;
        assert_eq!(err.to_string(), "The channel is not connected");
    }

    #[test]
    fn timeout_names_the_operation() {
        let err = ChannelError::Timeout { operation: "characteristic write", millis: 2000 };
        assert_eq!(err.to_string(), "characteristic write took longer than 2000ms");
    }

    #[test]
    fn payload_too_large_reports_length() {
        let err = ChannelError::PayloadTooLarge { len: 70000 };
        assert!(err.to_string().contains("70000"));
    }

    #[test]
    fn btle_errors_convert() {
        let err: ChannelError = btleplug::Error::DeviceNotFound.into();
        assert!(matches!(err, ChannelError::Btle { .. }));
    }
}
