//! Binary wire format of the coin box: commands written to the command characteristic and the
//! frames notified on the coin-count and status characteristics.

pub mod command;
pub mod notification;

pub use command::{clamp_payout_amount, encode, Command};
pub use notification::{decode_coin_count, decode_status, StatusEvent};
