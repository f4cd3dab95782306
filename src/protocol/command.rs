use crate::device::constants::{OPCODE_PAYOUT, OPCODE_START_COIN_SESSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the firmware to reset its running coin counter and start counting.
    StartCoinSession,
    /// Dispense this many coins.
    Payout(u16),
}

impl Command {
    /// Build a payout command, clamping amounts the wire format can not carry.
    pub fn payout(amount: u32) -> Self {
        Command::Payout(clamp_payout_amount(amount))
    }
}

pub fn clamp_payout_amount(amount: u32) -> u16 {
    u16::try_from(amount).unwrap_or(u16::MAX)
}

/// Encode a command into the frame written to the command characteristic. Never fails.
pub fn encode(command: Command) -> Vec<u8> {
    match command {
        Command::StartCoinSession => vec![OPCODE_START_COIN_SESSION, 0x00, 0x00, 0x00],
        Command::Payout(amount) => {
            let mut frame = Vec::with_capacity(3);
            frame.push(OPCODE_PAYOUT);
            frame.extend_from_slice(&amount.to_le_bytes());
            frame
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_coin_session_is_fixed_four_byte_frame() {
        assert_eq!(encode(Command::StartCoinSession), vec![0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn payout_is_opcode_then_little_endian_amount() {
        assert_eq!(encode(Command::payout(300)), vec![0x02, 0x2C, 0x01]);
        assert_eq!(encode(Command::payout(0)), vec![0x02, 0x00, 0x00]);
    }

    #[test]
    fn payout_amount_survives_decoding() {
        for amount in [1u32, 255, 256, 4660, 65534, 65535] {
            let frame = encode(Command::payout(amount));
            assert_eq!(frame.len(), 3);
            assert_eq!(u16::from_le_bytes([frame[1], frame[2]]) as u32, amount);
        }
    }

    #[test]
    fn payout_amount_is_clamped() {
        assert_eq!(Command::payout(65536), Command::Payout(65535));
        assert_eq!(encode(Command::payout(u32::MAX)), vec![0x02, 0xFF, 0xFF]);
    }
}
