use heapless::Vec;

use crate::encoding::{
    BufferType, DataType, Deserialize, DeserializeError, Message, ReadCursor, Request, Response,
    Serialize, StaticBuffer, WriteCursor,
};

/// Variable-length byte payload, wire-compatible with
/// `uavcan.primitive.array.Natural8.1.0`.
///
/// Serves as the workhorse type for tests and examples; the array is
/// prefixed with an aligned 16-bit length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteArray {
    pub bytes: Vec<u8, 256>,
}

impl ByteArray {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Vec::from_slice(bytes).ok().map(|bytes| Self { bytes })
    }
}

impl DataType for ByteArray {
    /// Sealed type.
    const EXTENT_BYTES: Option<u32> = None;
}

// Usable on any port kind.
impl Message for ByteArray {}
impl Request for ByteArray {}
impl Response for ByteArray {}

impl Serialize for ByteArray {
    fn size_bits(&self) -> usize {
        16 + self.bytes.len() * 8
    }

    fn serialize(&self, cursor: &mut WriteCursor<'_>) {
        cursor.write_aligned_u16(unwrap!(self.bytes.len().try_into()));
        cursor.write_aligned_bytes(&self.bytes);
    }
}

impl Deserialize for ByteArray {
    fn deserialize(cursor: &mut ReadCursor<'_>) -> Result<Self, DeserializeError>
    where
        Self: Sized,
    {
        let length = usize::from(cursor.read_aligned_u16());
        if length > 256 {
            return Err(DeserializeError::ArrayLength);
        }
        let mut bytes = Vec::new();
        unwrap!(bytes.resize_default(length));
        cursor.read_bytes(&mut bytes);
        Ok(Self { bytes })
    }
}

impl BufferType for ByteArray {
    type Buffer = StaticBuffer<258>;
}
