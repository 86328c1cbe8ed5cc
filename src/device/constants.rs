use uuid::Uuid;

/**
 * How often (milliseconds) to check whether the peripheral is still connected.
 */
pub const LINK_POLL_DELAY: u64 = 1000;

/**
 * How often (milliseconds) to query the adapters while resolving the peripheral address.
 */
pub const RESOLVE_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) resolving the peripheral address may take before the connection
 * attempt fails.
 */
pub const RESOLVE_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a write to a descriptor may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * The bluetooth address of the peripheral this host talks to.
 */
pub const PERIPHERAL_ADDRESS: &str = "A4:43:31:57:7C:B5";

/**
 * The UUID of the Bluetooth BLE service exposing the command characteristic.
 */
pub const COMMAND_SERVICE: &str = "12345678-1234-5678-1234-56789abcdef0";

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic that notifies commands.
 */
pub const COMMAND_CHARACTERISTIC: &str = "12345678-1234-5678-1234-56789abcdef1";

/**
 * The value written to a descriptor to make the peripheral push notifications.
 */
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

pub fn make_command_service_uuid() -> Uuid {
    Uuid::parse_str(COMMAND_SERVICE).unwrap()
}

pub fn make_command_characteristic_uuid() -> Uuid {
    Uuid::parse_str(COMMAND_CHARACTERISTIC).unwrap()
}
