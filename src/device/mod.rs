pub mod btle;
pub mod constants;
pub mod mock;
pub mod transport;
pub mod types;
