//! (De)serializable Rust representations for a few standard Cyphal data types
//!
//! Only the types the stack itself or its tests need are included here.
//! Application-specific types implement the same `encoding` traits, usually
//! through a DSDL code generator.

mod byte_array;
mod empty;
mod heartbeat;

pub use byte_array::ByteArray;
pub use empty::Empty;
pub use heartbeat::{Health, Heartbeat, Mode};
