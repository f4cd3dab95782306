pub mod coin;
pub mod facade;
pub mod payout;
pub mod runner;
pub mod supervisor;
pub mod types;

pub use facade::CoinBoxSession;
pub use types::{DispensedCoins, SessionStatus};
