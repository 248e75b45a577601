//! Cyphal protocol core data types
//!
//! This crate provides the basic identifier and priority types used by the
//! rest of the picocyphal stack. Users should normally reach these through
//! the `picocyphal::core` re-export instead of depending on this crate.
#![no_std]

/// Error returned when a raw integer does not fit the target identifier width.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Transfer priority \[1; 4.1.1.3\]
///
/// The numeric encoding matches the CAN ID encoding \[1; 4.2.1.1\], so the
/// ordering is reversed: a *lower* value means a *higher* priority and
/// `Optional > Exceptional` under `Ord`.
///
/// \[1\] Cyphal Specification v1.0
/// <https://opencyphal.org/specification/Cyphal_Specification.pdf>
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Reserved for total-system-failure traffic; excluded from bus load design.
    Exceptional = 0,
    /// High-priority traffic with hard latency constraints.
    Immediate = 1,
    /// High-priority traffic with looser latency constraints than `Immediate`.
    Fast = 2,
    /// More important than nominal traffic; used for supervisory commands.
    High = 3,
    /// The default for regular application traffic, including heartbeats.
    Nominal = 4,
    /// May be delayed behind nominal traffic but still latency-bounded.
    Low = 5,
    /// No time sensitivity; only eventual delivery is expected.
    Slow = 6,
    /// Delivery is not guaranteed in every system state; diagnostics only.
    Optional = 7,
}

impl Priority {
    pub const MIN: Priority = Priority::Exceptional;
    pub const MAX: Priority = Priority::Optional;

    pub const fn try_from_u8(code: u8) -> Option<Priority> {
        if code <= Self::MAX.into_u8() {
            Some(Priority::from_u8_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(code: u8) -> Priority {
        match code & 0x7 {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            _ => Priority::Optional,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.into_u8()
    }
}

impl From<Priority> for usize {
    fn from(value: Priority) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident, $repr:ty, $bits:expr, $truncating:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name($repr);

        impl $name {
            const MAX_VALUE: $repr = (1 << $bits) - 1;
            pub const MAX: $name = $name(Self::MAX_VALUE);

            pub const fn new(value: $repr) -> Option<Self> {
                if value <= Self::MAX_VALUE {
                    Some(Self(value))
                } else {
                    None
                }
            }

            pub const fn $truncating(value: $repr) -> Self {
                Self(value & Self::MAX_VALUE)
            }

            const fn get(self) -> $repr {
                self.0
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                value.get()
            }
        }

        impl TryFrom<$repr> for $name {
            type Error = InvalidValue;

            fn try_from(value: $repr) -> Result<Self, Self::Error> {
                Self::new(value).ok_or(InvalidValue)
            }
        }
    };
}

id_newtype!(
    /// A node address on the bus (7 bits) \[1; 4.2.1.1\]
    NodeId, u8, 7, from_u8_truncating
);

id_newtype!(
    /// A publish/subscribe channel identifier (13 bits) \[1; 4.2.1.1\]
    SubjectId, u16, 13, from_u16_truncating
);

id_newtype!(
    /// A service channel identifier (9 bits) \[1; 4.2.1.1\]
    ServiceId, u16, 9, from_u16_truncating
);

impl NodeId {
    pub const fn into_u8(self) -> u8 {
        self.get()
    }
}

impl SubjectId {
    pub const fn into_u16(self) -> u16 {
        self.get()
    }
}

impl ServiceId {
    pub const fn into_u16(self) -> u16 {
        self.get()
    }
}

impl From<NodeId> for usize {
    fn from(value: NodeId) -> Self {
        u8::from(value).into()
    }
}

/// A cyclic transfer sequence counter (5 bits) \[1; 4.1.1.7\]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferId(u8);

impl TransferId {
    const MAX_VALUE: u8 = 0x1f;
    pub const MAX: TransferId = TransferId(Self::MAX_VALUE);

    /// TransferId of the first transfer in a session.
    pub const SESSION_START: TransferId = TransferId(0);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    /// The next counter value, wrapping at the 5-bit boundary.
    pub const fn next(self) -> Self {
        Self((self.0 + 1) & Self::MAX_VALUE)
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::SESSION_START
    }
}

impl From<TransferId> for u8 {
    fn from(value: TransferId) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for TransferId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}
