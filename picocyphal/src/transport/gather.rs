use crate::arena::{Arena, Block};
use crate::core::{Priority, TransferId};
use crate::frame::Mtu;
use crate::time::{Duration, Instant};
use crate::transport::{TailByte, TransferCrc, SOT_TOGGLE_BIT};

/// A fully reassembled transfer.
///
/// `length` is the wire length of the transfer payload, which may exceed the
/// bytes actually stored when the extent is smaller (implicit truncation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completed {
    pub id: TransferId,
    pub priority: Priority,
    pub timestamp: Instant,
    pub length: usize,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    /// Mid reassembly. `last_toggle` is the toggle bit of the most recently
    /// accepted frame; `first` distinguishes a format error right after the
    /// start frame from a tolerated duplicate later on.
    Accumulating { last_toggle: bool, first: bool },
    /// A transfer was delivered; replicas of it are suppressed until the
    /// transfer-id timeout elapses.
    Done,
}

/// Transfer reception state machine for one subscription.
///
/// One session serves one port registration, so interleaved multi-frame
/// transfers from different publishers on the same subject preempt each
/// other; the later start-of-transfer frame wins. Redundant interfaces are
/// not supported.
///
/// The reassembly buffer is taken from the arena when a transfer starts,
/// sized to the registration extent, and returned when reassembly stops or
/// the consumer claims the completed payload. A failed allocation drops the
/// transfer.
///
/// Frame acceptance rules, in decreasing precedence:
/// * a frame without a tail byte is ignored;
/// * a start frame with a wrong toggle bit aborts the current reassembly;
/// * a start frame matching a recently delivered transfer-id is a replica
///   and is ignored, otherwise it delivers (single frame) or restarts the
///   session (multi frame);
/// * a continuation frame whose transfer-id does not match, or that arrives
///   after the transfer-id timeout, aborts the reassembly;
/// * a continuation frame repeating the previous toggle value is a duplicate
///   and is ignored, except right after the start frame or on the end frame
///   where it is a format error and aborts;
/// * non-end frames must occupy a full MTU (8 or 64 bytes);
/// * the end frame must carry payload and a CRC with zero residue, and its
///   priority becomes the transfer priority.
#[derive(Debug, Default)]
pub(crate) struct Session {
    state: State,
    started: Option<Instant>,
    transfer_id: Option<TransferId>,
    block: Option<Block>,
    received: usize,
    crc: TransferCrc,
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

fn full_mtu(data_len: usize) -> bool {
    data_len == Mtu::Classic.size() || data_len == Mtu::Fd.size()
}

impl Session {
    pub(crate) fn accept(
        &mut self,
        arena: &mut Arena,
        extent: usize,
        timeout: Duration,
        priority: Priority,
        data: &[u8],
        timestamp: Instant,
    ) -> Option<Completed> {
        let (tail_byte, payload) = data.split_last()?;
        let tail = TailByte::from(*tail_byte);

        let tid_match = match self.state {
            State::Idle => false,
            State::Accumulating { .. } | State::Done => {
                self.transfer_id == Some(tail.transfer_id())
                    && timestamp <= unwrap!(self.started).saturating_add(timeout)
            }
        };

        if tail.sot() {
            if tail.toggle() != SOT_TOGGLE_BIT {
                return self.stop(arena);
            }
            if matches!(self.state, State::Done) && tid_match {
                return None;
            }
            return if tail.eot() {
                self.deliver_single(arena, extent, priority, payload, tail.transfer_id(), timestamp)
            } else {
                self.start(arena, extent, payload, tail.transfer_id(), timestamp, data.len())
            };
        }

        if !tid_match {
            return self.stop(arena);
        }
        let (last_toggle, first) = match self.state {
            State::Accumulating { last_toggle, first } => (last_toggle, first),
            // Stray continuation of an already delivered transfer.
            _ => return None,
        };

        if tail.toggle() == last_toggle {
            return if first || tail.eot() {
                self.stop(arena)
            } else {
                None
            };
        }
        if tail.eot() {
            self.finish(arena, priority, payload)
        } else {
            self.append(arena, payload, data.len())
        }
    }

    /// Claims the payload buffer of the last completed transfer. Replica
    /// suppression stays in effect after the block is taken.
    pub(crate) fn take_block(&mut self) -> Option<Block> {
        self.block.take()
    }

    /// Aborts any ongoing reassembly and releases its buffer.
    pub(crate) fn reset(&mut self, arena: &mut Arena) {
        let _ = self.stop(arena);
        self.started = None;
    }

    fn start(
        &mut self,
        arena: &mut Arena,
        extent: usize,
        payload: &[u8],
        id: TransferId,
        timestamp: Instant,
        data_len: usize,
    ) -> Option<Completed> {
        let _ = self.stop(arena);
        if !full_mtu(data_len) {
            return None;
        }
        let Ok(block) = arena.alloc(extent) else {
            return None;
        };
        self.state = State::Accumulating {
            last_toggle: SOT_TOGGLE_BIT,
            first: true,
        };
        self.started = Some(timestamp);
        self.transfer_id = Some(id);
        self.block = Some(block);
        self.store(arena, payload);
        None
    }

    fn deliver_single(
        &mut self,
        arena: &mut Arena,
        extent: usize,
        priority: Priority,
        payload: &[u8],
        id: TransferId,
        timestamp: Instant,
    ) -> Option<Completed> {
        let _ = self.stop(arena);
        let Ok(block) = arena.alloc(extent) else {
            return None;
        };
        self.block = Some(block);
        self.store(arena, payload);
        self.state = State::Done;
        self.started = Some(timestamp);
        self.transfer_id = Some(id);
        Some(Completed {
            id,
            priority,
            timestamp,
            length: payload.len(),
        })
    }

    fn append(&mut self, arena: &mut Arena, payload: &[u8], data_len: usize) -> Option<Completed> {
        if !full_mtu(data_len) {
            return self.stop(arena);
        }
        self.store(arena, payload);
        if let State::Accumulating { last_toggle, first } = &mut self.state {
            *last_toggle = !*last_toggle;
            *first = false;
        }
        None
    }

    fn finish(&mut self, arena: &mut Arena, priority: Priority, payload: &[u8]) -> Option<Completed> {
        if payload.is_empty() {
            return self.stop(arena);
        }
        self.store(arena, payload);
        if self.crc.value() != 0 || self.received < TransferCrc::LENGTH {
            return self.stop(arena);
        }
        let length = self.received - TransferCrc::LENGTH;
        self.state = State::Done;
        Some(Completed {
            id: unwrap!(self.transfer_id),
            priority,
            timestamp: unwrap!(self.started),
            length,
        })
    }

    fn store(&mut self, arena: &mut Arena, payload: &[u8]) {
        if let Some(block) = &self.block {
            let slice = arena.get_mut(block);
            let offset = self.received.min(slice.len());
            let store = payload.len().min(slice.len() - offset);
            slice[offset..offset + store].copy_from_slice(&payload[..store]);
        }
        self.received += payload.len();
        self.crc.add_bytes(payload);
    }

    fn stop(&mut self, arena: &mut Arena) -> Option<Completed> {
        if let Some(block) = self.block.take() {
            arena.free(block);
        }
        self.state = State::Idle;
        self.transfer_id = None;
        self.received = 0;
        self.crc = TransferCrc::default();
        None
    }
}
