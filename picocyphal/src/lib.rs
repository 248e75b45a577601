//! # Picocyphal
//!
//! A Cyphal/CAN node for no_std environments: publish/subscribe messaging
//! and request/response services over a frame-based bus, with every byte of
//! working memory carved from one caller-supplied arena.
//!
//! The node is driven cooperatively. Inbound frames land in a lock-free ring
//! from interrupt context; [`Node::spin_some`](node::Node::spin_some) drains
//! the ring through transfer reassembly, dispatches completed transfers to
//! typed endpoint callbacks, and hands outbound frames to the bus driver in
//! priority order. No call in the pipeline blocks or suspends.
//!
//! ## Usage sketch
//!
//! ```ignore
//! let rx = RxQueue::<64>::new(Mtu::Classic);
//! let mut memory = [0u8; 16384];
//! let mut node = Node::new(Config::default(), &mut memory, &rx, driver, clock);
//!
//! let mut publisher = node.create_publisher::<ByteArray>(subject, timeout);
//! let mut subscription = Subscription::new(|value: ByteArray, meta| { /* ... */ });
//! node.create_subscription(subject, 258, rx_timeout, &mut subscription)?;
//!
//! loop {
//!     node.spin_some();
//! }
//! ```
//!
//! # References:
//!
//! * \[1\] Cyphal Specification v1.0
//!   <https://opencyphal.org/specification/Cyphal_Specification.pdf>
#![no_std]

#[cfg(test)]
extern crate std;

pub use picocyphal_core as core;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod arena;
pub mod data_types;
pub mod encoding;
pub mod endpoint;
pub mod frame;
pub mod node;
mod rx_queue;
pub mod time;
mod transport;
mod tx_queue;

pub use arena::Diagnostics;
pub use endpoint::{
    Action, Endpoint, Publisher, ServiceClient, ServiceServer, Subscription, TransferMeta,
};
pub use frame::{CanDriver, CanId, Data, DataSpecifier, Frame, Header, Mtu};
pub use node::{Config, Error, Node, Statistics};
pub use rx_queue::{RejectReason, RxQueue};
pub use time::{Clock, Deadline, Duration, Instant};
