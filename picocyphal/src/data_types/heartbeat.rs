use crate::core::SubjectId;
use crate::encoding::{
    BufferType, DataType, Deserialize, DeserializeError, Message, ReadCursor, Serialize,
    StaticBuffer, WriteCursor,
};

/// `uavcan.node.Heartbeat.1.0`, fixed size 7 bytes.
///
/// Periodic liveness beacon every node with a node-id publishes on the fixed
/// subject 7509. Anonymous nodes stay silent on this subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Heartbeat {
    /// Seconds since startup, saturating at `u32::MAX`.
    pub uptime: u32,
    pub health: Health,
    pub mode: Mode,
    /// Vendor-specific status code, e.g. a fault code or status bitmask.
    pub vendor_specific_status_code: u8,
}

impl Heartbeat {
    pub const SUBJECT: SubjectId = SubjectId::new(7509).unwrap();

    /// \[second\] The publication period shall not exceed this limit.
    pub const MAX_PUBLICATION_PERIOD: u16 = 1;
    /// \[second\] A node silent for longer than this should be considered
    /// offline.
    pub const OFFLINE_TIMEOUT: u16 = 3;
}

impl DataType for Heartbeat {
    /// Delimited with an extent of 12 bytes.
    const EXTENT_BYTES: Option<u32> = Some(12);
}

impl Message for Heartbeat {}

impl Serialize for Heartbeat {
    fn size_bits(&self) -> usize {
        56
    }

    fn serialize(&self, cursor: &mut WriteCursor<'_>) {
        cursor.write_aligned_u32(self.uptime);
        cursor.write_aligned_u8(self.health.into());
        cursor.write_aligned_u8(self.mode.into());
        cursor.write_aligned_u8(self.vendor_specific_status_code);
    }
}

impl Deserialize for Heartbeat {
    fn deserialize(cursor: &mut ReadCursor<'_>) -> Result<Self, DeserializeError>
    where
        Self: Sized,
    {
        Ok(Self {
            uptime: cursor.read_u32(),
            health: Health::from_u8_truncating(cursor.read_u8()),
            mode: Mode::from_u8_truncating(cursor.read_u8()),
            vendor_specific_status_code: cursor.read_u8(),
        })
    }
}

impl BufferType for Heartbeat {
    type Buffer = StaticBuffer<7>;
}

/// `uavcan.node.Health.1.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Health {
    #[default]
    Nominal,
    /// A parameter went out of range or a minor failure occurred that does
    /// not impair real-time functions.
    Advisory,
    /// A major failure; the node performs its functions in a degraded mode.
    Caution,
    /// The node is unable to perform at least one of its functions.
    Warning,
}

impl Health {
    fn from_u8_truncating(value: u8) -> Self {
        match value & 0b11 {
            0 => Health::Nominal,
            1 => Health::Advisory,
            2 => Health::Caution,
            _ => Health::Warning,
        }
    }
}

impl From<Health> for u8 {
    fn from(value: Health) -> Self {
        value as u8
    }
}

/// `uavcan.node.Mode.1.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    #[default]
    Operational,
    /// The node is initializing; this mode is entered directly after startup.
    Initialization,
    Maintenance,
    SoftwareUpdate,
}

impl Mode {
    fn from_u8_truncating(value: u8) -> Self {
        match value & 0b111 {
            1 => Mode::Initialization,
            2 => Mode::Maintenance,
            3 => Mode::SoftwareUpdate,
            _ => Mode::Operational,
        }
    }
}

impl From<Mode> for u8 {
    fn from(value: Mode) -> Self {
        value as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let beat = Heartbeat {
            uptime: 0x0102_0304,
            health: Health::Caution,
            mode: Mode::Operational,
            vendor_specific_status_code: 0x7f,
        };
        let mut buffer = [0u8; 7];
        beat.serialize_to_bytes(&mut buffer);
        assert_eq!(buffer, [0x04, 0x03, 0x02, 0x01, 2, 0, 0x7f]);

        let decoded = Heartbeat::deserialize_from_bytes(&buffer).unwrap();
        assert_eq!(decoded, beat);
    }
}
