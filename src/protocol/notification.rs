use crate::device::constants::EVENT_PAYOUT_COMPLETED;
use crate::device::types::Channel;
use crate::error::DecodeError;

const COIN_COUNT_LEN: usize = 2;
const PAYOUT_COMPLETED_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    PayoutCompleted { dispensed: u16 },
    Unknown(u8),
}

/// Decode the running coin total. Bytes past the first two are ignored.
pub fn decode_coin_count(frame: &[u8]) -> Result<u16, DecodeError> {
    match frame {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(DecodeError::TooShort { channel: Channel::CoinCount, needed: COIN_COUNT_LEN, got: frame.len() }),
    }
}

/// Decode a `[eventId, payload...]` status frame.
pub fn decode_status(frame: &[u8]) -> Result<StatusEvent, DecodeError> {
    let (&event_id, payload) = frame.split_first().ok_or(DecodeError::Empty(Channel::Status))?;

    match event_id {
        EVENT_PAYOUT_COMPLETED => match payload {
            [lo, hi, ..] => Ok(StatusEvent::PayoutCompleted { dispensed: u16::from_le_bytes([*lo, *hi]) }),
            _ => Err(DecodeError::TooShort { channel: Channel::Status, needed: PAYOUT_COMPLETED_LEN, got: frame.len() }),
        },
        other => Ok(StatusEvent::Unknown(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_count_is_little_endian() {
        assert_eq!(decode_coin_count(&[0x05, 0x00]), Ok(5));
        assert_eq!(decode_coin_count(&[0x2C, 0x01]), Ok(300));
        assert_eq!(decode_coin_count(&[0xFF, 0xFF, 0x12]), Ok(65535));
    }

    #[test]
    fn short_coin_count_is_rejected() {
        assert_eq!(
            decode_coin_count(&[0x05]),
            Err(DecodeError::TooShort { channel: Channel::CoinCount, needed: 2, got: 1 }),
        );
        assert!(decode_coin_count(&[]).is_err());
    }

    #[test]
    fn payout_completed() {
        assert_eq!(decode_status(&[0x10, 0x2C, 0x01]), Ok(StatusEvent::PayoutCompleted { dispensed: 300 }));
        assert_eq!(decode_status(&[0x10, 0x00, 0x00, 0xAA]), Ok(StatusEvent::PayoutCompleted { dispensed: 0 }));
    }

    #[test]
    fn short_payout_completed_is_rejected() {
        assert_eq!(
            decode_status(&[0x10, 0x2C]),
            Err(DecodeError::TooShort { channel: Channel::Status, needed: 3, got: 2 }),
        );
        assert!(decode_status(&[0x10]).is_err());
    }

    #[test]
    fn unknown_and_empty_status_frames() {
        assert_eq!(decode_status(&[0x42]), Ok(StatusEvent::Unknown(0x42)));
        assert_eq!(decode_status(&[0x11, 0x01, 0x02]), Ok(StatusEvent::Unknown(0x11)));
        assert_eq!(decode_status(&[]), Err(DecodeError::Empty(Channel::Status)));
    }
}
