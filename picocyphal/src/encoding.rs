//! Typed (de)serialization for port payloads
//!
//! Re-exports the `canadensis_encoding` cursor machinery and adds the buffer
//! sizing hook the node uses to hold serialized payloads without dynamic
//! allocation.

pub use canadensis_encoding::*;

/// Associates a data type with a scratch buffer large enough for any of its
/// serialized representations.
pub trait BufferType {
    type Buffer: Sized + Send + Sync + Default + AsMut<[u8]> + AsRef<[u8]> + 'static;
}

/// Fixed-size byte buffer usable as a [`BufferType::Buffer`].
pub struct StaticBuffer<const N: usize>([u8; N]);

impl<const N: usize> Default for StaticBuffer<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> AsRef<[u8]> for StaticBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> AsMut<[u8]> for StaticBuffer<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Serialized length of a value in whole bytes.
pub(crate) fn serialized_size(value: &impl Serialize) -> usize {
    value.size_bits().div_ceil(8)
}
