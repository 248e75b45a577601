use crate::encoding::{
    BufferType, DataType, Deserialize, DeserializeError, Message, ReadCursor, Request, Response,
    Serialize, StaticBuffer, WriteCursor,
};

/// `uavcan.primitive.Empty.1.0`, fixed size zero bytes.
///
/// Useful for ports where only the transfer metadata matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Empty {}

impl DataType for Empty {
    /// Sealed type.
    const EXTENT_BYTES: Option<u32> = None;
}

impl Message for Empty {}
impl Request for Empty {}
impl Response for Empty {}

impl Serialize for Empty {
    fn size_bits(&self) -> usize {
        0
    }

    fn serialize(&self, _cursor: &mut WriteCursor<'_>) {}
}

impl Deserialize for Empty {
    fn deserialize(_cursor: &mut ReadCursor<'_>) -> Result<Self, DeserializeError>
    where
        Self: Sized,
    {
        Ok(Self {})
    }
}

impl BufferType for Empty {
    type Buffer = StaticBuffer<0>;
}
