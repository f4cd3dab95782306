use uuid::Uuid;

/**
 * How long (milliseconds) to wait between two reconnect attempts. The delay is fixed, not
 * exponential.
 */
pub const RECONNECT_INTERVAL: u64 = 3000;

/**
 * How many reconnect attempts are made after a disconnect before the user is asked to pick a
 * device manually.
 */
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/**
 * How long (milliseconds) connecting + service discovery + subscribing may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) the radio is polled for adapter availability (power state) and
 * for the connection status of a bound peripheral.
 */
pub const POWER_POLL_DELAY: u64 = 1000;

/**
 * Name the firmware advertises with.
 */
pub const COIN_BOX_ADVERTISED_NAME: &str = "KLine CoinBox";

/**
 * The UUID of the Bluetooth BLE service of the coin box. Groups the three characteristics below.
 */
pub const COIN_BOX_SERVICE: &str = "8f1d0001-7e08-4e27-9d94-7a2c3b6e10a1";

/**
 * Notify: uint16 little-endian running total of inserted coins since session start.
 */
pub const COIN_COUNT_CHARACTERISTIC: &str = "8f1d0002-7e08-4e27-9d94-7a2c3b6e10a1";

/**
 * Write (with response): opcode-prefixed binary command.
 */
pub const COMMAND_CHARACTERISTIC: &str = "8f1d0003-7e08-4e27-9d94-7a2c3b6e10a1";

/**
 * Notify: `[eventId, payload...]` status events.
 */
pub const STATUS_CHARACTERISTIC: &str = "8f1d0004-7e08-4e27-9d94-7a2c3b6e10a1";

pub const OPCODE_START_COIN_SESSION: u8 = 0x01;
pub const OPCODE_PAYOUT: u8 = 0x02;

pub const EVENT_PAYOUT_COMPLETED: u8 = 0x10;

pub fn make_coin_box_service_uuid() -> Uuid {
    Uuid::from_u128(0x8f1d0001_7e08_4e27_9d94_7a2c3b6e10a1)
}

pub fn make_coin_count_uuid() -> Uuid {
    Uuid::from_u128(0x8f1d0002_7e08_4e27_9d94_7a2c3b6e10a1)
}

pub fn make_command_uuid() -> Uuid {
    Uuid::from_u128(0x8f1d0003_7e08_4e27_9d94_7a2c3b6e10a1)
}

pub fn make_status_uuid() -> Uuid {
    Uuid::from_u128(0x8f1d0004_7e08_4e27_9d94_7a2c3b6e10a1)
}
