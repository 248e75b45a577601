//! Cyphal/CAN transport engine
//!
//! Fragmentation of outbound transfers ([`scatter`]) and reassembly of
//! inbound ones ([`gather`]), plus the tail byte and transfer CRC shared by
//! both directions. The node consults this engine from loop context only;
//! every call that may allocate threads an explicit arena reference, so the
//! engine holds no allocator state of its own.

use crate::core::TransferId;

pub(crate) mod gather;
pub(crate) mod scatter;

/// Toggle bit value of a start-of-transfer frame \[1; table 4.4\].
pub(crate) const SOT_TOGGLE_BIT: bool = true;

pub(crate) const PAD_VALUE: u8 = 0;

/// CRC-16/CCITT-FALSE over the transfer payload of multi-frame transfers.
///
/// The CRC is transmitted big-endian after the payload; accumulating the
/// received stream including those two bytes yields zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransferCrc(u16);

impl Default for TransferCrc {
    fn default() -> Self {
        Self(0xffff)
    }
}

impl TransferCrc {
    pub(crate) const LENGTH: usize = 2;
    const POLYNOMIAL: u16 = 0x1021;

    pub(crate) fn add_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u16::from(byte) << 8;
            for _ in 0..8 {
                self.0 = if self.0 & 0x8000 != 0 {
                    (self.0 << 1) ^ Self::POLYNOMIAL
                } else {
                    self.0 << 1
                };
            }
        }
    }

    pub(crate) fn value(&self) -> u16 {
        self.0
    }
}

/// The last byte of every frame: transfer-id plus framing flags.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TailByte(u8);

impl TailByte {
    const SOT: u8 = 1 << 7;
    const EOT: u8 = 1 << 6;
    const TOGGLE: u8 = 1 << 5;

    pub(crate) fn new(sot: bool, eot: bool, toggle: bool, transfer_id: TransferId) -> Self {
        let mut byte = transfer_id.into_u8();
        if sot {
            byte |= Self::SOT;
        }
        if eot {
            byte |= Self::EOT;
        }
        if toggle {
            byte |= Self::TOGGLE;
        }
        Self(byte)
    }

    pub(crate) fn sot(&self) -> bool {
        self.0 & Self::SOT != 0
    }

    pub(crate) fn eot(&self) -> bool {
        self.0 & Self::EOT != 0
    }

    pub(crate) fn toggle(&self) -> bool {
        self.0 & Self::TOGGLE != 0
    }

    pub(crate) fn transfer_id(&self) -> TransferId {
        TransferId::from_u8_truncating(self.0)
    }
}

impl From<TailByte> for u8 {
    fn from(value: TailByte) -> Self {
        value.0
    }
}

impl From<u8> for TailByte {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Rounds a frame length up to the nearest CAN FD data length code.
///
/// Lengths up to the classic MTU are representable exactly, so classic-class
/// frames never get padded.
pub(crate) const fn dlc_ceil(length: usize) -> usize {
    match length {
        0..=8 => length,
        9..=12 => 12,
        13..=16 => 16,
        17..=20 => 20,
        21..=24 => 24,
        25..=32 => 32,
        33..=48 => 48,
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_known_value() {
        // The standard CRC-16/CCITT-FALSE check value.
        let mut crc = TransferCrc::default();
        crc.add_bytes(b"123456789");
        assert_eq!(crc.value(), 0x29b1);
    }

    #[test]
    fn test_crc_residue_is_zero() {
        let mut crc = TransferCrc::default();
        crc.add_bytes(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let appended = crc.value().to_be_bytes();
        crc.add_bytes(&appended);
        assert_eq!(crc.value(), 0);
    }

    #[test]
    fn test_tail_byte_round_trip() {
        let id = TransferId::from_u8_truncating(27);
        let tail = TailByte::new(true, false, true, id);
        assert_eq!(u8::from(tail), 0b1010_0000 + 27);
        assert!(tail.sot());
        assert!(!tail.eot());
        assert!(tail.toggle());
        assert_eq!(tail.transfer_id(), id);
    }

    #[test]
    fn test_dlc_rounding() {
        let valid = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];
        for length in 0..=64 {
            let rounded = dlc_ceil(length);
            assert!(valid.contains(&rounded));
            assert!(rounded >= length);
            // No smaller valid length fits.
            assert!(valid.iter().filter(|&&v| v >= length).min() == Some(&rounded));
        }
    }
}
