//! Prioritized outbound frame queue
//!
//! Frames wait here between transfer submission and bus transmission.
//! Ordering follows the CAN arbitration model: numerically lower priority
//! first, then earlier deadline, then submission order. Frame payloads live
//! in the arena so a submission that does not fit fails upfront instead of
//! truncating the transfer.

use heapless::binary_heap::{BinaryHeap, Min};

use crate::arena::{Arena, Block, OutOfMemory};
use crate::core::{Priority, TransferId};
use crate::frame::{CanDriver, CanId, Data, Frame, Header, Mtu};
use crate::time::{Deadline, Duration, Instant};
use crate::transport::scatter::{frame_count, Scatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum PushError {
    OutOfMemory,
    QueueFull,
}

impl From<OutOfMemory> for PushError {
    fn from(_: OutOfMemory) -> Self {
        PushError::OutOfMemory
    }
}

#[derive(Debug)]
struct TxItem {
    priority: Priority,
    deadline: Deadline,
    seq: u64,
    id: CanId,
    block: Block,
}

impl PartialEq for TxItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == core::cmp::Ordering::Equal
    }
}

impl Eq for TxItem {}

impl PartialOrd for TxItem {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TxItem {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.priority, self.deadline, self.seq).cmp(&(other.priority, other.deadline, other.seq))
    }
}

/// Outbound queue holding up to `N` frames across all pending transfers.
pub(crate) struct TxQueue<const N: usize> {
    heap: BinaryHeap<TxItem, Min, N>,
    next_seq: u64,
    expired: u32,
}

impl<const N: usize> TxQueue<N> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            expired: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Frames dropped unsent because their deadline passed.
    pub(crate) fn expired_count(&self) -> u32 {
        self.expired
    }

    /// Fragments a transfer and enqueues all of its frames, or none of them.
    ///
    /// The capacity check runs before any allocation, so a full queue leaves
    /// the arena untouched; an allocation failure mid-transfer rolls back
    /// the frames staged so far.
    pub(crate) fn push_transfer(
        &mut self,
        arena: &mut Arena,
        now: Instant,
        timeout: Duration,
        header: &Header,
        transfer_id: TransferId,
        payload: &[u8],
        mtu: Mtu,
    ) -> Result<(), PushError> {
        let count = frame_count(payload.len(), mtu);
        if self.heap.len() + count > N {
            return Err(PushError::QueueFull);
        }

        let mut staged: heapless::Vec<Block, N> = heapless::Vec::new();
        for data in Scatter::new(payload, mtu, transfer_id) {
            match arena.alloc(data.len()) {
                Ok(block) => {
                    arena.get_mut(&block).copy_from_slice(&data);
                    unwrap!(staged.push(block).ok());
                }
                Err(OutOfMemory) => {
                    for block in staged {
                        arena.free(block);
                    }
                    return Err(PushError::OutOfMemory);
                }
            }
        }

        let id = CanId::from(header);
        let deadline = Deadline::after(now, timeout);
        for block in staged {
            let item = TxItem {
                priority: header.priority,
                deadline,
                seq: self.next_seq,
                id,
                block,
            };
            self.next_seq += 1;
            // Cannot fail, capacity was checked above.
            unwrap!(self.heap.push(item).ok());
        }
        Ok(())
    }

    /// Hands frames to the driver in arbitration order until it reports a
    /// full mailbox. Frames whose deadline has passed are dropped unsent.
    /// Returns the number of frames transmitted.
    pub(crate) fn transmit_pending<D: CanDriver>(
        &mut self,
        arena: &mut Arena,
        now: Instant,
        driver: &mut D,
    ) -> u32 {
        let mut sent = 0;
        while let Some(item) = self.heap.peek() {
            if item.deadline.is_expired(now) {
                let item = unwrap!(self.heap.pop());
                arena.free(item.block);
                self.expired += 1;
                trace!("tx frame expired unsent");
                continue;
            }
            let frame = Frame {
                id: item.id,
                data: unwrap!(Data::new(arena.get(&item.block))),
            };
            if !driver.transmit(&frame) {
                break;
            }
            let item = unwrap!(self.heap.pop());
            arena.free(item.block);
            sent += 1;
        }
        sent
    }

    /// Drops every queued frame and returns its memory to the arena.
    pub(crate) fn purge(&mut self, arena: &mut Arena) {
        while let Some(item) = self.heap.pop() {
            arena.free(item.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataSpecifier;
    use crate::core::SubjectId;

    const TIMEOUT: Duration = Duration::from_micros(1_000_000);

    struct Recorder {
        frames: std::vec::Vec<Frame>,
        accept: usize,
    }

    impl Recorder {
        fn new(accept: usize) -> Self {
            Self {
                frames: std::vec::Vec::new(),
                accept,
            }
        }
    }

    impl CanDriver for Recorder {
        fn transmit(&mut self, frame: &Frame) -> bool {
            if self.frames.len() < self.accept {
                self.frames.push(*frame);
                true
            } else {
                false
            }
        }
    }

    fn header(priority: Priority, subject: u16) -> Header {
        Header {
            priority,
            data_spec: DataSpecifier::Message(unwrap!(SubjectId::new(subject))),
            source: Some(unwrap!(crate::core::NodeId::new(42))),
            destination: None,
        }
    }

    fn tid(value: u8) -> TransferId {
        TransferId::from_u8_truncating(value)
    }

    #[test]
    fn test_priority_ordering() {
        let mut memory = [0u8; 4096];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<8> = TxQueue::new();
        let now = Instant::from_micros(0);

        let low = header(Priority::Low, 100);
        let high = header(Priority::High, 101);
        queue
            .push_transfer(&mut arena, now, TIMEOUT, &low, tid(0), &[1], Mtu::Classic)
            .unwrap();
        queue
            .push_transfer(&mut arena, now, TIMEOUT, &high, tid(0), &[2], Mtu::Classic)
            .unwrap();

        let mut driver = Recorder::new(8);
        assert_eq!(queue.transmit_pending(&mut arena, now, &mut driver), 2);
        assert_eq!(driver.frames[0].id, CanId::from(&high));
        assert_eq!(driver.frames[1].id, CanId::from(&low));
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut memory = [0u8; 4096];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<8> = TxQueue::new();
        let now = Instant::from_micros(0);

        let head = header(Priority::Nominal, 100);
        for value in 0..3u8 {
            queue
                .push_transfer(&mut arena, now, TIMEOUT, &head, tid(value), &[value], Mtu::Classic)
                .unwrap();
        }
        let mut driver = Recorder::new(8);
        queue.transmit_pending(&mut arena, now, &mut driver);
        for (index, frame) in driver.frames.iter().enumerate() {
            assert_eq!(frame.data[0], index as u8);
        }
    }

    #[test]
    fn test_all_or_nothing_on_full_queue() {
        let mut memory = [0u8; 4096];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<4> = TxQueue::new();
        let now = Instant::from_micros(0);
        let head = header(Priority::Nominal, 100);

        // 20 bytes needs 4 classic frames.
        queue
            .push_transfer(&mut arena, now, TIMEOUT, &head, tid(0), &[0; 20], Mtu::Classic)
            .unwrap();
        let before = arena.diagnostics().allocated;
        let result =
            queue.push_transfer(&mut arena, now, TIMEOUT, &head, tid(1), &[0], Mtu::Classic);
        assert_eq!(result, Err(PushError::QueueFull));
        assert_eq!(arena.diagnostics().allocated, before);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_rollback_on_arena_exhaustion() {
        let mut memory = [0u8; 64];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<8> = TxQueue::new();
        let now = Instant::from_micros(0);
        let head = header(Priority::Nominal, 100);

        let result =
            queue.push_transfer(&mut arena, now, TIMEOUT, &head, tid(0), &[0; 40], Mtu::Classic);
        assert_eq!(result, Err(PushError::OutOfMemory));
        assert_eq!(arena.diagnostics().allocated, 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_expired_frames_dropped_unsent() {
        let mut memory = [0u8; 4096];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<8> = TxQueue::new();
        let head = header(Priority::Nominal, 100);

        queue
            .push_transfer(
                &mut arena,
                Instant::from_micros(0),
                TIMEOUT,
                &head,
                tid(0),
                &[1],
                Mtu::Classic,
            )
            .unwrap();

        let late = Instant::from_micros(2_000_000);
        let mut driver = Recorder::new(8);
        assert_eq!(queue.transmit_pending(&mut arena, late, &mut driver), 0);
        assert!(driver.frames.is_empty());
        assert_eq!(queue.expired_count(), 1);
        assert_eq!(arena.diagnostics().allocated, 0);
    }

    #[test]
    fn test_purge_returns_all_memory() {
        let mut memory = [0u8; 4096];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<8> = TxQueue::new();
        let now = Instant::from_micros(0);
        let head = header(Priority::Nominal, 100);

        queue
            .push_transfer(&mut arena, now, TIMEOUT, &head, tid(0), &[0; 20], Mtu::Classic)
            .unwrap();
        assert!(queue.len() > 0);

        queue.purge(&mut arena);
        assert_eq!(queue.len(), 0);
        assert_eq!(arena.diagnostics().allocated, 0);
    }

    #[test]
    fn test_driver_backpressure_stops_draining() {
        let mut memory = [0u8; 4096];
        let mut arena = Arena::new(&mut memory);
        let mut queue: TxQueue<8> = TxQueue::new();
        let now = Instant::from_micros(0);
        let head = header(Priority::Nominal, 100);

        for value in 0..3u8 {
            queue
                .push_transfer(&mut arena, now, TIMEOUT, &head, tid(value), &[value], Mtu::Classic)
                .unwrap();
        }
        let mut driver = Recorder::new(1);
        assert_eq!(queue.transmit_pending(&mut arena, now, &mut driver), 1);
        assert_eq!(queue.len(), 2);

        // The remainder goes out once the mailbox frees up.
        let mut driver = Recorder::new(8);
        assert_eq!(queue.transmit_pending(&mut arena, now, &mut driver), 2);
    }
}
