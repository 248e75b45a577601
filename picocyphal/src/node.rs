//! The node orchestrator
//!
//! Owns the arena, the transmit queue and the registration table, and drives
//! the frame-to-transfer pipeline from [`Node::spin_some`]. The inbound ring
//! is shared by reference so interrupt handlers can feed it while the node
//! runs; everything else is loop-context only.

use crate::arena::{Arena, Diagnostics};
use crate::core::{NodeId, Priority, ServiceId, SubjectId, TransferId};
use crate::encoding::{serialized_size, BufferType, Deserialize, Message, Request, Serialize};
use crate::endpoint::{Action, Endpoint, Publisher, ServiceClient, ServiceServer, Subscription, TransferMeta};
use crate::frame::{CanDriver, CanId, Data, DataSpecifier, Frame, Header};
use crate::rx_queue::RxQueue;
use crate::time::{Clock, Deadline, Duration, Instant};
use crate::transport::gather::Session;
use crate::transport::TailByte;
use crate::tx_queue::{PushError, TxQueue};

/// Everything here is recoverable: retry, resize, or accept the loss.
/// Deadline expiry is deliberately absent, it surfaces through counters and
/// callback non-invocation rather than as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The arena cannot satisfy an allocation; the transfer was not sent.
    OutOfMemory,
    /// The transmit queue or pending-call table cannot take the transfer as
    /// a whole; nothing was enqueued.
    QueueFull,
    /// A registration for this (port, kind) already exists and is untouched.
    DuplicateSubscription,
    /// The registration table is at capacity.
    RegistryFull,
    /// No service client is registered for the called service.
    NotRegistered,
}

impl From<PushError> for Error {
    fn from(value: PushError) -> Self {
        match value {
            PushError::OutOfMemory => Error::OutOfMemory,
            PushError::QueueFull => Error::QueueFull,
        }
    }
}

/// Construction-time parameters.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub node_id: NodeId,
    /// Transmit deadline applied to service responses.
    pub tx_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(42).unwrap(),
            tx_timeout: Duration::from_secs(1),
        }
    }
}

/// Observability counters, all monotonic except the arena figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    /// Inbound frames rejected because the ring was full.
    pub frames_dropped: u32,
    /// Outbound frames dropped unsent past their deadline.
    pub frames_expired: u32,
    pub frames_sent: u32,
    /// Completed transfers dispatched to an endpoint.
    pub transfers_received: u32,
    /// Outbound frames currently queued.
    pub frames_queued: usize,
    pub arena: Diagnostics,
}

struct Registration<'a> {
    data_spec: DataSpecifier,
    extent: usize,
    /// Transfer-id timeout bounding reassembly of a stalled transfer.
    timeout: Duration,
    /// Outbound counter; only service clients use it.
    transfer_id: TransferId,
    session: Session,
    endpoint: &'a mut (dyn Endpoint + 'a),
}

#[derive(Debug, Clone, Copy)]
struct PendingCall {
    service: ServiceId,
    destination: NodeId,
    transfer_id: TransferId,
    deadline: Deadline,
}

/// A Cyphal node bound to one arena, one inbound ring and one bus driver.
///
/// `TX` bounds the outbound frame queue, `PORTS` the registration table and
/// `CALLS` the pending service-call table.
pub struct Node<
    'a,
    C: Clock,
    D: CanDriver,
    const RX: usize = 64,
    const TX: usize = 64,
    const PORTS: usize = 8,
    const CALLS: usize = 8,
> {
    config: Config,
    clock: C,
    driver: D,
    arena: Arena<'a>,
    rx: &'a RxQueue<RX>,
    tx: TxQueue<TX>,
    registrations: heapless::Vec<Registration<'a>, PORTS>,
    pending: heapless::Vec<PendingCall, CALLS>,
    frames_sent: u32,
    transfers_received: u32,
}

impl<'a, C, D, const RX: usize, const TX: usize, const PORTS: usize, const CALLS: usize>
    Node<'a, C, D, RX, TX, PORTS, CALLS>
where
    C: Clock,
    D: CanDriver,
{
    /// `memory` becomes the arena backing reassembly buffers and queued
    /// outbound frames. The MTU is taken from the ring's size class.
    pub fn new(config: Config, memory: &'a mut [u8], rx: &'a RxQueue<RX>, driver: D, clock: C) -> Self {
        Self {
            config,
            clock,
            driver,
            arena: Arena::new(memory),
            rx,
            tx: TxQueue::new(),
            registrations: heapless::Vec::new(),
            pending: heapless::Vec::new(),
            frames_sent: 0,
            transfers_received: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn set_node_id(&mut self, node_id: NodeId) {
        self.config.node_id = node_id;
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            frames_dropped: self.rx.dropped(),
            frames_expired: self.tx.expired_count(),
            frames_sent: self.frames_sent,
            transfers_received: self.transfers_received,
            frames_queued: self.tx.len(),
            arena: self.arena.diagnostics(),
        }
    }

    /// Pending service calls awaiting a response or their deadline.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Captures an inbound frame with the current timestamp.
    ///
    /// Only pushes to the ring: no allocation, no blocking, no transport
    /// work. Full-ring drops are counted, not reported. Interrupt handlers
    /// that cannot share the node may push to the [`RxQueue`] directly.
    pub fn on_frame_received(&self, frame: &Frame) {
        if self.rx.push(frame, self.clock.now()).is_err() {
            trace!("inbound frame dropped");
        }
    }

    pub fn create_publisher<T>(&self, subject: SubjectId, tx_timeout: Duration) -> Publisher<T>
    where
        T: Serialize + Message + BufferType,
    {
        Publisher::new(subject, tx_timeout)
    }

    /// Registers a message subscription. `extent` bounds the reassembly
    /// buffer; longer payloads are truncated on reception. `rx_timeout`
    /// bounds how long a partially received transfer may stay incomplete.
    pub fn create_subscription<T, F>(
        &mut self,
        subject: SubjectId,
        extent: usize,
        rx_timeout: Duration,
        subscription: &'a mut Subscription<T, F>,
    ) -> Result<(), Error>
    where
        T: Deserialize,
        F: FnMut(T, &TransferMeta),
    {
        self.register(DataSpecifier::Message(subject), extent, rx_timeout, subscription)
    }

    pub fn create_service_server<Req, Resp, F>(
        &mut self,
        service: ServiceId,
        extent: usize,
        rx_timeout: Duration,
        server: &'a mut ServiceServer<Req, Resp, F>,
    ) -> Result<(), Error>
    where
        Req: Deserialize,
        Resp: Serialize + BufferType,
        F: FnMut(Req, &TransferMeta) -> Option<Resp>,
    {
        self.register(DataSpecifier::Request(service), extent, rx_timeout, server)
    }

    pub fn create_service_client<Resp, F>(
        &mut self,
        service: ServiceId,
        extent: usize,
        rx_timeout: Duration,
        client: &'a mut ServiceClient<Resp, F>,
    ) -> Result<(), Error>
    where
        Resp: Deserialize,
        F: FnMut(Resp, &TransferMeta),
    {
        self.register(DataSpecifier::Response(service), extent, rx_timeout, client)
    }

    /// Removes a registration. Matching transfers received afterwards are
    /// discarded as unsolicited. Returns whether a registration existed.
    pub fn unsubscribe(&mut self, data_spec: DataSpecifier) -> bool {
        let Some(index) = self
            .registrations
            .iter()
            .position(|reg| reg.data_spec == data_spec)
        else {
            return false;
        };
        let mut registration = self.registrations.swap_remove(index);
        registration.session.reset(&mut self.arena);
        if let DataSpecifier::Response(service) = data_spec {
            self.pending.retain(|call| call.service != service);
        }
        true
    }

    /// Serializes and enqueues one message transfer.
    ///
    /// All-or-nothing: on error no frame of the transfer is queued and the
    /// publisher's transfer-id counter is not advanced.
    pub fn publish<T>(
        &mut self,
        publisher: &mut Publisher<T>,
        value: &T,
        priority: Priority,
    ) -> Result<(), Error>
    where
        T: Serialize + Message + BufferType,
    {
        let header = Header {
            priority,
            data_spec: DataSpecifier::Message(publisher.subject()),
            source: Some(self.config.node_id),
            destination: None,
        };
        let transfer_id = publisher.transfer_id();
        let timeout = publisher.timeout();
        let payload = publisher.serialize(value);
        self.enqueue_transfer(timeout, &header, transfer_id, payload)?;
        publisher.advance_transfer_id();
        Ok(())
    }

    /// Sends a request to `destination` and records a pending call.
    ///
    /// The response callback of the client registered for `service` fires
    /// when a matching response arrives before `timeout`; after that the
    /// call is forgotten without any callback.
    pub fn call<Req>(
        &mut self,
        service: ServiceId,
        destination: NodeId,
        request: &Req,
        priority: Priority,
        timeout: Duration,
    ) -> Result<(), Error>
    where
        Req: Serialize + Request + BufferType,
    {
        let index = self
            .registrations
            .iter()
            .position(|reg| reg.data_spec == DataSpecifier::Response(service))
            .ok_or(Error::NotRegistered)?;
        if self.pending.is_full() {
            return Err(Error::QueueFull);
        }

        let transfer_id = self.registrations[index].transfer_id;
        let mut scratch = Req::Buffer::default();
        request.serialize_to_bytes(scratch.as_mut());
        let payload = &scratch.as_ref()[..serialized_size(request)];

        let header = Header {
            priority,
            data_spec: DataSpecifier::Request(service),
            source: Some(self.config.node_id),
            destination: Some(destination),
        };
        let now = self.clock.now();
        self.tx.push_transfer(
            &mut self.arena,
            now,
            timeout,
            &header,
            transfer_id,
            payload,
            self.rx.mtu(),
        )?;
        self.registrations[index].transfer_id = transfer_id.next();
        let call = PendingCall {
            service,
            destination,
            transfer_id,
            deadline: Deadline::after(now, timeout),
        };
        // Checked above.
        unwrap!(self.pending.push(call).ok());
        Ok(())
    }

    /// Fragments a transfer and places its frames in the transmit queue,
    /// entirely or not at all.
    pub fn enqueue_transfer(
        &mut self,
        timeout: Duration,
        header: &Header,
        transfer_id: TransferId,
        payload: &[u8],
    ) -> Result<(), Error> {
        let now = self.clock.now();
        self.tx
            .push_transfer(
                &mut self.arena,
                now,
                timeout,
                header,
                transfer_id,
                payload,
                self.rx.mtu(),
            )
            .map_err(Error::from)
    }

    /// One cooperative pipeline pass: drain the inbound ring through
    /// reassembly and dispatch, hand eligible outbound frames to the driver,
    /// and expire overdue pending calls. Runs to completion, never suspends.
    pub fn spin_some(&mut self) {
        let now = self.clock.now();
        while let Some((id, data, timestamp)) = self.rx.pop() {
            self.process_frame(id, &data, timestamp, now);
        }
        self.frames_sent += self.tx.transmit_pending(&mut self.arena, now, &mut self.driver);
        self.pending.retain(|call| !call.deadline.is_expired(now));
    }

    fn register(
        &mut self,
        data_spec: DataSpecifier,
        extent: usize,
        timeout: Duration,
        endpoint: &'a mut (dyn Endpoint + 'a),
    ) -> Result<(), Error> {
        if self
            .registrations
            .iter()
            .any(|reg| reg.data_spec == data_spec)
        {
            return Err(Error::DuplicateSubscription);
        }
        let registration = Registration {
            data_spec,
            extent,
            timeout,
            transfer_id: TransferId::SESSION_START,
            session: Session::default(),
            endpoint,
        };
        self.registrations
            .push(registration)
            .map_err(|_| Error::RegistryFull)
    }

    fn process_frame(&mut self, id: CanId, data: &Data, timestamp: Instant, now: Instant) {
        let Some(header) = id.to_header() else {
            trace!("ignoring malformed frame id");
            return;
        };
        // Service frames addressed to other nodes are not ours to answer.
        if header
            .destination
            .is_some_and(|destination| destination != self.config.node_id)
        {
            return;
        }
        // Anonymous transfers are single-frame only \[1; 4.2.2\].
        if header.source.is_none() {
            let single = data.last().is_some_and(|&byte| {
                let tail = TailByte::from(byte);
                tail.sot() && tail.eot()
            });
            if !single {
                return;
            }
        }
        let Some(index) = self
            .registrations
            .iter()
            .position(|reg| reg.data_spec == header.data_spec)
        else {
            return;
        };

        let registration = &mut self.registrations[index];
        let Some(completed) = registration.session.accept(
            &mut self.arena,
            registration.extent,
            registration.timeout,
            header.priority,
            &data[..],
            timestamp,
        ) else {
            return;
        };

        // A response is only delivered when it answers a call we made.
        if let DataSpecifier::Response(service) = header.data_spec {
            let matching = self.pending.iter().position(|call| {
                call.service == service
                    && call.transfer_id == completed.id
                    && Some(call.destination) == header.source
            });
            match matching {
                Some(call_index) => {
                    self.pending.swap_remove(call_index);
                }
                None => {
                    if let Some(block) = registration.session.take_block() {
                        self.arena.free(block);
                    }
                    debug!("discarding unsolicited response");
                    return;
                }
            }
        }

        let Some(block) = registration.session.take_block() else {
            return;
        };
        let stored = completed.length.min(block.len());
        let meta = TransferMeta {
            priority: completed.priority,
            source: header.source,
            transfer_id: completed.id,
            timestamp: completed.timestamp,
        };
        let action = registration
            .endpoint
            .handle(&meta, &self.arena.get(&block)[..stored]);
        self.transfers_received += 1;

        if action == Action::Respond {
            if let (DataSpecifier::Request(service), Some(requester)) =
                (header.data_spec, header.source)
            {
                let response_header = Header {
                    priority: completed.priority,
                    data_spec: DataSpecifier::Response(service),
                    source: Some(self.config.node_id),
                    destination: Some(requester),
                };
                let result = self.tx.push_transfer(
                    &mut self.arena,
                    now,
                    self.config.tx_timeout,
                    &response_header,
                    completed.id,
                    registration.endpoint.response(),
                    self.rx.mtu(),
                );
                if result.is_err() {
                    warn!("service response dropped");
                }
            }
        }
        self.arena.free(block);
    }
}
