//! Typed endpoint façades over type-erased transfer dispatch
//!
//! The node stores registrations as `&mut dyn Endpoint` and hands each
//! completed transfer to the matching one as raw bytes; these wrappers keep
//! all typed (de)serialization at the application boundary so dispatch
//! itself stays byte-oriented.

use core::marker::PhantomData;

use crate::core::{NodeId, Priority, SubjectId, TransferId};
use crate::encoding::{serialized_size, BufferType, Deserialize, Serialize};
use crate::time::{Duration, Instant};

/// Metadata accompanying every dispatched transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferMeta {
    pub priority: Priority,
    /// `None` for anonymous message transfers.
    pub source: Option<NodeId>,
    pub transfer_id: TransferId,
    /// Arrival time of the frame that completed the transfer.
    pub timestamp: Instant,
}

/// What the node should do after an endpoint handled a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    /// A response was serialized into the endpoint's buffer; send it back
    /// to the transfer's source.
    Respond,
}

/// Type-erased receiver of completed transfers.
pub trait Endpoint {
    fn handle(&mut self, meta: &TransferMeta, payload: &[u8]) -> Action;

    /// Serialized response produced by the last [`handle`](Self::handle)
    /// call that returned [`Action::Respond`].
    fn response(&self) -> &[u8] {
        &[]
    }
}

/// Message receiver invoking a typed callback for every transfer on its
/// subject.
pub struct Subscription<T, F> {
    callback: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> Subscription<T, F>
where
    T: Deserialize,
    F: FnMut(T, &TransferMeta),
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Endpoint for Subscription<T, F>
where
    T: Deserialize,
    F: FnMut(T, &TransferMeta),
{
    fn handle(&mut self, meta: &TransferMeta, payload: &[u8]) -> Action {
        match T::deserialize_from_bytes(payload) {
            Ok(value) => (self.callback)(value, meta),
            Err(_) => debug!("discarding malformed message payload"),
        }
        Action::Done
    }
}

/// Request handler for one service port.
///
/// The handler returns `Some(response)` to answer the request; the response
/// goes out with the request's priority and transfer-id, addressed to the
/// requester. Returning `None` leaves the request unanswered.
pub struct ServiceServer<Req, Resp, F>
where
    Resp: BufferType,
{
    handler: F,
    buffer: Resp::Buffer,
    response_len: usize,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> ServiceServer<Req, Resp, F>
where
    Req: Deserialize,
    Resp: Serialize + BufferType,
    F: FnMut(Req, &TransferMeta) -> Option<Resp>,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            buffer: Resp::Buffer::default(),
            response_len: 0,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F> Endpoint for ServiceServer<Req, Resp, F>
where
    Req: Deserialize,
    Resp: Serialize + BufferType,
    F: FnMut(Req, &TransferMeta) -> Option<Resp>,
{
    fn handle(&mut self, meta: &TransferMeta, payload: &[u8]) -> Action {
        let request = match Req::deserialize_from_bytes(payload) {
            Ok(request) => request,
            Err(_) => {
                debug!("discarding malformed request payload");
                return Action::Done;
            }
        };
        match (self.handler)(request, meta) {
            Some(response) => {
                response.serialize_to_bytes(self.buffer.as_mut());
                self.response_len = serialized_size(&response);
                Action::Respond
            }
            None => Action::Done,
        }
    }

    fn response(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.response_len]
    }
}

/// Response receiver for service calls issued through
/// [`Node::call`](crate::node::Node::call).
///
/// The node invokes the callback only for responses matching a pending call
/// of this client; a call whose deadline passes first is dropped without any
/// callback invocation.
pub struct ServiceClient<Resp, F> {
    callback: F,
    _marker: PhantomData<fn(Resp)>,
}

impl<Resp, F> ServiceClient<Resp, F>
where
    Resp: Deserialize,
    F: FnMut(Resp, &TransferMeta),
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<Resp, F> Endpoint for ServiceClient<Resp, F>
where
    Resp: Deserialize,
    F: FnMut(Resp, &TransferMeta),
{
    fn handle(&mut self, meta: &TransferMeta, payload: &[u8]) -> Action {
        match Resp::deserialize_from_bytes(payload) {
            Ok(response) => (self.callback)(response, meta),
            Err(_) => debug!("discarding malformed response payload"),
        }
        Action::Done
    }
}

/// Typed message sender for one subject.
///
/// Owns the subject's transfer-id counter and a scratch buffer sized for the
/// message type; the actual enqueueing happens through
/// [`Node::publish`](crate::node::Node::publish).
pub struct Publisher<T>
where
    T: BufferType,
{
    subject: SubjectId,
    timeout: Duration,
    transfer_id: TransferId,
    buffer: T::Buffer,
    _marker: PhantomData<fn(T)>,
}

impl<T> Publisher<T>
where
    T: Serialize + BufferType,
{
    pub(crate) fn new(subject: SubjectId, timeout: Duration) -> Self {
        Self {
            subject,
            timeout,
            transfer_id: TransferId::SESSION_START,
            buffer: T::Buffer::default(),
            _marker: PhantomData,
        }
    }

    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    pub(crate) fn serialize(&mut self, value: &T) -> &[u8] {
        value.serialize_to_bytes(self.buffer.as_mut());
        &self.buffer.as_ref()[..serialized_size(value)]
    }

    /// Called once per successfully enqueued transfer.
    pub(crate) fn advance_transfer_id(&mut self) {
        self.transfer_id = self.transfer_id.next();
    }
}
