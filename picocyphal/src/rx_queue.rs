//! Inbound frame queue
//!
//! Frames arrive in interrupt context and are consumed by the cooperative
//! loop. The ring is a fixed-capacity lock-free queue using per-slot sequence
//! counters, so the interrupt-side push is non-blocking, allocation-free and
//! sound against a concurrent pop without any mutex. When the ring is full
//! the *incoming* frame is dropped and counted; queued frames are never
//! overwritten, which keeps in-flight multi-frame transfers intact.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::frame::{CanId, Data, Frame, Mtu};
use crate::time::Instant;

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free queue (Vyukov sequence scheme), reject-new on overflow.
pub(crate) struct FrameRing<T, const N: usize> {
    slots: [Slot<T>; N],
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
    dropped: AtomicU32,
}

unsafe impl<T: Send, const N: usize> Sync for FrameRing<T, N> {}

impl<T, const N: usize> FrameRing<T, N> {
    pub(crate) fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            }),
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Producer side; callable from interrupt context.
    ///
    /// Returns `false` when the queue is full; the value is discarded and the
    /// drop counter incremented.
    pub(crate) fn push(&self, value: T) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % N];
            let seq = slot.sequence.load(Ordering::Acquire);

            if seq == pos {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else if (seq.wrapping_sub(pos) as isize) < 0 {
                // The slot still holds an unpopped entry: full.
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Consumer side; only ever called from the cooperative loop.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % N];
            let seq = slot.sequence.load(Ordering::Acquire);
            let expected = pos.wrapping_add(1);

            if seq == expected {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    expected,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence.store(pos.wrapping_add(N), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if (seq.wrapping_sub(expected) as isize) < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn note_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T, const N: usize> Drop for FrameRing<T, N> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

/// One queued frame, tagged with its size class and arrival time.
pub(crate) struct QueueItem<const MTU: usize> {
    id: CanId,
    length: u8,
    bytes: [u8; MTU],
    timestamp: Instant,
}

impl<const MTU: usize> QueueItem<MTU> {
    fn new(id: CanId, payload: &[u8], timestamp: Instant) -> Option<Self> {
        if payload.len() > MTU {
            return None;
        }
        let mut bytes = [0; MTU];
        bytes[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            length: payload.len() as u8,
            bytes,
            timestamp,
        })
    }

    fn into_parts(self) -> (CanId, Data, Instant) {
        let data = unwrap!(Data::new(&self.bytes[..usize::from(self.length)]).ok());
        (self.id, data, self.timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    Full,
    Oversized,
}

/// The node's inbound queue: one ring per supported frame size class, the
/// class fixed at construction from the configured MTU.
///
/// The queue is owned outside the node so interrupt handlers can share it:
/// [`push`](Self::push) takes `&self`, never blocks and never allocates, and
/// is safe to call concurrently with the node draining the queue from loop
/// context.
pub struct RxQueue<const N: usize> {
    inner: Inner<N>,
}

enum Inner<const N: usize> {
    Classic(FrameRing<QueueItem<8>, N>),
    Fd(FrameRing<QueueItem<64>, N>),
}

impl<const N: usize> RxQueue<N> {
    pub fn new(mtu: Mtu) -> Self {
        let inner = match mtu {
            Mtu::Classic => Inner::Classic(FrameRing::new()),
            Mtu::Fd => Inner::Fd(FrameRing::new()),
        };
        Self { inner }
    }

    pub fn mtu(&self) -> Mtu {
        match &self.inner {
            Inner::Classic(_) => Mtu::Classic,
            Inner::Fd(_) => Mtu::Fd,
        }
    }

    pub fn push(&self, frame: &Frame, timestamp: Instant) -> Result<(), RejectReason> {
        match &self.inner {
            Inner::Classic(ring) => push_item(ring, frame, timestamp),
            Inner::Fd(ring) => push_item(ring, frame, timestamp),
        }
    }

    pub(crate) fn pop(&self) -> Option<(CanId, Data, Instant)> {
        match &self.inner {
            Inner::Classic(ring) => ring.pop().map(QueueItem::into_parts),
            Inner::Fd(ring) => ring.pop().map(QueueItem::into_parts),
        }
    }

    /// Inbound frames rejected, either because the ring was full or because
    /// the frame exceeded the configured size class.
    pub fn dropped(&self) -> u32 {
        match &self.inner {
            Inner::Classic(ring) => ring.dropped(),
            Inner::Fd(ring) => ring.dropped(),
        }
    }
}

fn push_item<const MTU: usize, const N: usize>(
    ring: &FrameRing<QueueItem<MTU>, N>,
    frame: &Frame,
    timestamp: Instant,
) -> Result<(), RejectReason> {
    let Some(item) = QueueItem::new(frame.id, &frame.data, timestamp) else {
        ring.note_drop();
        return Err(RejectReason::Oversized);
    };
    if ring.push(item) {
        Ok(())
    } else {
        Err(RejectReason::Full)
    }
}
