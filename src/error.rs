use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::Channel;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to preferences file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on preferences file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode preferences as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write preferences file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build preferences file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("No peripheral is known with identifier {0}")]
    UnknownPeripheral(String),

    #[error("No peripheral is connected")]
    NotConnected,

    #[error("Bluetooth operation '{0}' took too long")]
    DeadlineExceeded(&'static str),

    #[error("The transport event stream has already been taken")]
    EventStreamTaken,
}

/// A notification frame that could not be turned into a typed event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame on {channel:?} channel too short: need {needed} bytes, got {got}")]
    TooShort { channel: Channel, needed: usize, got: usize },

    #[error("Empty frame on {0:?} channel")]
    Empty(Channel),
}

/// Failure outcome of a facade operation.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The pending request was cancelled because the peripheral went away")]
    Cancelled,

    #[error("The coin box is not connected")]
    NotConnected,

    #[error("A coin session is already waiting for coins")]
    WaitInProgress,

    #[error("A payout is already in progress")]
    PayoutInProgress,

    #[error("Failed to send command to the coin box: {source}")]
    CommandFailed { #[from] source: DeviceError },

    #[error("The coin box session has been shut down")]
    SessionClosed,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start (preferences): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Coin box request failed: {source}")]
    SessionError { #[from] source: SessionError },
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }

    format!("panic from task: [{}]", stringified)
}
