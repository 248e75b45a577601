//! Bus-level frame objects and the CAN identifier codec
//!
//! The 29-bit extended identifier encodes the transfer priority, the data
//! specifier (subject or service id plus kind) and the participating node
//! addresses as defined by the Cyphal/CAN transport \[1; 4.2.1.1\].
//!
//! \[1\] Cyphal Specification v1.0
//! <https://opencyphal.org/specification/Cyphal_Specification.pdf>

use crate::core::{NodeId, Priority, ServiceId, SubjectId};

/// Transport-layer maximum transmission unit, fixed per node at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mtu {
    /// Classic CAN 2.0, 8 payload bytes per frame.
    Classic,
    /// CAN FD, 64 payload bytes per frame.
    Fd,
}

impl Mtu {
    pub const fn size(self) -> usize {
        match self {
            Mtu::Classic => 8,
            Mtu::Fd => 64,
        }
    }
}

impl From<Mtu> for usize {
    fn from(value: Mtu) -> Self {
        value.size()
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// Frame payload held inline, up to the CAN FD maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: u8,
    bytes: [u8; Data::CAPACITY],
}

impl Data {
    pub const CAPACITY: usize = 64;

    pub fn new(data: &[u8]) -> Result<Self, InvalidLength> {
        if data.len() > Self::CAPACITY {
            return Err(InvalidLength);
        }
        let mut bytes = [0; Self::CAPACITY];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self {
            length: data.len() as u8,
            bytes,
        })
    }

    pub fn zeroed(length: usize) -> Result<Self, InvalidLength> {
        if length > Self::CAPACITY {
            return Err(InvalidLength);
        }
        Ok(Self {
            length: length as u8,
            bytes: [0; Self::CAPACITY],
        })
    }

    pub fn len(&self) -> usize {
        usize::from(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..usize::from(self.length)]
    }
}

impl core::ops::DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes[..usize::from(self.length)]
    }
}

/// The (port id, transfer kind) pair a frame or registration refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSpecifier {
    Message(SubjectId),
    Request(ServiceId),
    Response(ServiceId),
}

/// Semantic content of a frame identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub priority: Priority,
    pub data_spec: DataSpecifier,
    /// `None` marks an anonymous message frame.
    pub source: Option<NodeId>,
    /// Always set for service frames, never for messages.
    pub destination: Option<NodeId>,
}

const CAN_ID_BITS: u32 = 29;
const CAN_ID_MASK: u32 = (1 << CAN_ID_BITS) - 1;

const PRIORITY_OFFSET: u32 = 26;
const SERVICE_FLAG: u32 = 1 << 25;
const RES_23_FLAG: u32 = 1 << 23;

const MSG_ANONYMOUS_FLAG: u32 = 1 << 24;
const MSG_SUBJECT_OFFSET: u32 = 8;
const MSG_RES_7_FLAG: u32 = 1 << 7;

const SRV_REQUEST_FLAG: u32 = 1 << 24;
const SRV_SERVICE_OFFSET: u32 = 14;
const SRV_DESTINATION_OFFSET: u32 = 7;

/// A 29-bit extended CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanId(u32);

impl CanId {
    pub const fn new(raw: u32) -> Option<Self> {
        if raw <= CAN_ID_MASK {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn from_u32_truncating(raw: u32) -> Self {
        Self(raw & CAN_ID_MASK)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Decodes the identifier, rejecting reserved-bit patterns.
    pub fn to_header(self) -> Option<Header> {
        let id = self.0;
        let priority = Priority::from_u8_truncating((id >> PRIORITY_OFFSET) as u8);
        let source = NodeId::from_u8_truncating(id as u8);

        if id & SERVICE_FLAG == 0 {
            if id & (RES_23_FLAG | MSG_RES_7_FLAG) != 0 {
                return None;
            }
            let subject = SubjectId::from_u16_truncating((id >> MSG_SUBJECT_OFFSET) as u16);
            let anonymous = id & MSG_ANONYMOUS_FLAG != 0;
            Some(Header {
                priority,
                data_spec: DataSpecifier::Message(subject),
                source: if anonymous { None } else { Some(source) },
                destination: None,
            })
        } else {
            if id & RES_23_FLAG != 0 {
                return None;
            }
            let service = ServiceId::from_u16_truncating((id >> SRV_SERVICE_OFFSET) as u16);
            let destination = NodeId::from_u8_truncating((id >> SRV_DESTINATION_OFFSET) as u8);
            let data_spec = if id & SRV_REQUEST_FLAG != 0 {
                DataSpecifier::Request(service)
            } else {
                DataSpecifier::Response(service)
            };
            Some(Header {
                priority,
                data_spec,
                source: Some(source),
                destination: Some(destination),
            })
        }
    }
}

impl From<&Header> for CanId {
    fn from(header: &Header) -> Self {
        let priority = u32::from(header.priority.into_u8()) << PRIORITY_OFFSET;
        let source = u32::from(header.source.map(u8::from).unwrap_or(0));

        let id = match header.data_spec {
            DataSpecifier::Message(subject) => {
                let anonymous = if header.source.is_none() {
                    MSG_ANONYMOUS_FLAG
                } else {
                    0
                };
                priority | anonymous | u32::from(subject.into_u16()) << MSG_SUBJECT_OFFSET | source
            }
            DataSpecifier::Request(service) => {
                priority
                    | SERVICE_FLAG
                    | SRV_REQUEST_FLAG
                    | u32::from(service.into_u16()) << SRV_SERVICE_OFFSET
                    | u32::from(header.destination.map(u8::from).unwrap_or(0))
                        << SRV_DESTINATION_OFFSET
                    | source
            }
            DataSpecifier::Response(service) => {
                priority
                    | SERVICE_FLAG
                    | u32::from(service.into_u16()) << SRV_SERVICE_OFFSET
                    | u32::from(header.destination.map(u8::from).unwrap_or(0))
                        << SRV_DESTINATION_OFFSET
                    | source
            }
        };
        CanId(id)
    }
}

/// One bus-level packet, the unit exchanged with the physical driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub id: CanId,
    pub data: Data,
}

/// The injected bus transmit function.
///
/// `transmit` returning `false` means "not sent, try later", not a fatal
/// error; the frame stays queued until its deadline passes.
pub trait CanDriver {
    fn transmit(&mut self, frame: &Frame) -> bool;
}

impl<T: CanDriver + ?Sized> CanDriver for &mut T {
    fn transmit(&mut self, frame: &Frame) -> bool {
        (**self).transmit(frame)
    }
}
