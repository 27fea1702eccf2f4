use uuid::Uuid;

/**
 * How long (milliseconds) device selection may run before giving up.
 */
pub const SELECT_DEADLINE: u64 = 30000;

/**
 * How long (milliseconds) opening the GATT connection may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) a write to the data characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * The UUID of the default BLE service carrying the data characteristic.
 * This is the serial-over-BLE service exposed by HM-10 style UART modules.
 */
pub const DATA_SERVICE: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the remote GATT characteristic used as both the write target
 * and the notification source. The UART profile exposes a single
 * characteristic for both directions.
 */
pub const DATA_CHARACTERISTIC: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/**
 * Largest payload handed to the platform in one characteristic write.
 * 23 byte default ATT MTU minus the 3 byte write header.
 */
pub const WRITE_CHUNK: usize = 20;

pub fn make_data_service_uuid() -> Uuid {
    Uuid::parse_str(DATA_SERVICE).unwrap()
}

pub fn make_data_characteristic_uuid() -> Uuid {
    Uuid::parse_str(DATA_CHARACTERISTIC).unwrap()
}
