use crate::core::TransferId;
use crate::frame::{Data, Mtu};
use crate::transport::{dlc_ceil, TailByte, TransferCrc, PAD_VALUE, SOT_TOGGLE_BIT};

/// Number of frames needed to carry a payload at the given MTU.
///
/// Multi-frame transfers append a two-byte CRC after the payload; padding
/// never changes the count because it only rounds the last frame up to a
/// valid data length code.
pub(crate) fn frame_count(payload_len: usize, mtu: Mtu) -> usize {
    let mtu = mtu.size();
    if payload_len < mtu {
        1
    } else {
        (payload_len + TransferCrc::LENGTH).div_ceil(mtu - 1)
    }
}

/// Splits a transfer payload into frame payloads.
///
/// Yields one [`Data`] per frame with the tail byte appended. Multi-frame
/// transfers carry the transfer CRC after the payload; the CRC also covers
/// the padding inserted to reach a valid data length code, so the iterator
/// emits a virtual stream of payload, padding and CRC bytes in that order.
pub(crate) struct Scatter<'a> {
    payload: &'a [u8],
    frame_capacity: usize,
    transfer_id: TransferId,
    padding: usize,
    crc: Option<[u8; 2]>,
    offset: usize,
    toggle: bool,
}

impl<'a> Scatter<'a> {
    pub(crate) fn new(payload: &'a [u8], mtu: Mtu, transfer_id: TransferId) -> Self {
        let mtu = mtu.size();
        debug_assert!(mtu <= Data::CAPACITY);
        let frame_capacity = mtu - 1;
        let (padding, crc) = if payload.len() <= frame_capacity {
            // Single frame, no CRC; pad to the next valid length code.
            let used = payload.len() + 1;
            (dlc_ceil(used) - used, None)
        } else {
            // Size the padding so the last frame lands on a valid length
            // code, then fold it into the CRC together with the payload.
            let tail_stream = (payload.len() + TransferCrc::LENGTH - 1) % frame_capacity + 1;
            let padding = dlc_ceil(tail_stream + 1) - (tail_stream + 1);
            let mut crc = TransferCrc::default();
            crc.add_bytes(payload);
            for _ in 0..padding {
                crc.add_bytes(&[PAD_VALUE]);
            }
            (padding, Some(crc.value().to_be_bytes()))
        };
        Self {
            payload,
            frame_capacity,
            transfer_id,
            padding,
            crc,
            offset: 0,
            toggle: SOT_TOGGLE_BIT,
        }
    }

    fn stream_len(&self) -> usize {
        self.payload.len() + self.padding + self.crc.map_or(0, |crc| crc.len())
    }

    fn stream_byte(&self, index: usize) -> u8 {
        if index < self.payload.len() {
            self.payload[index]
        } else if index < self.payload.len() + self.padding {
            PAD_VALUE
        } else {
            let crc = self.crc.as_ref().unwrap_or(&[0; 2]);
            crc[index - self.payload.len() - self.padding]
        }
    }
}

impl Iterator for Scatter<'_> {
    type Item = Data;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.stream_len();
        if self.offset > total || (self.offset == total && self.offset != 0) {
            return None;
        }
        let chunk = (total - self.offset).min(self.frame_capacity);
        // Chunk plus tail never exceeds the MTU.
        let mut data = unwrap!(Data::zeroed(chunk + 1));
        for index in 0..chunk {
            data[index] = self.stream_byte(self.offset + index);
        }
        let sot = self.offset == 0;
        let eot = self.offset + chunk == total;
        data[chunk] = TailByte::new(sot, eot, self.toggle, self.transfer_id).into();
        self.toggle = !self.toggle;
        self.offset += chunk;
        if chunk == 0 {
            // Empty transfer emits exactly one frame.
            self.offset = total + 1;
        }
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(payload: &[u8], mtu: Mtu) -> std::vec::Vec<std::vec::Vec<u8>> {
        let transfer_id = TransferId::from_u8_truncating(27);
        Scatter::new(payload, mtu, transfer_id)
            .map(|data| data.to_vec())
            .collect()
    }

    #[test]
    fn test_empty_transfer_is_one_frame() {
        let frames = collect(&[], Mtu::Classic);
        assert_eq!(frames, [std::vec![0b1110_0000 + 27]]);
        assert_eq!(frame_count(0, Mtu::Classic), 1);
    }

    #[test]
    fn test_single_frame() {
        let frames = collect(&[1, 2, 3], Mtu::Classic);
        assert_eq!(frames, [std::vec![1, 2, 3, 0b1110_0000 + 27]]);
    }

    #[test]
    fn test_two_frames_with_split_payload() {
        let frames = collect(&[0, 1, 2, 3, 4, 5, 6, 7], Mtu::Classic);
        assert_eq!(frame_count(8, Mtu::Classic), 2);
        assert_eq!(
            frames,
            [
                std::vec![0, 1, 2, 3, 4, 5, 6, 0b1010_0000 + 27],
                std::vec![7, 0x17, 0x8d, 0b0100_0000 + 27],
            ]
        );
    }

    #[test]
    fn test_toggle_alternates() {
        let payload = [0u8; 20];
        let frames = collect(&payload, Mtu::Classic);
        assert_eq!(frames.len(), frame_count(20, Mtu::Classic));
        for (index, frame) in frames.iter().enumerate() {
            let tail = TailByte::from(*frame.last().unwrap());
            assert_eq!(tail.sot(), index == 0);
            assert_eq!(tail.eot(), index == frames.len() - 1);
            assert_eq!(tail.toggle(), index % 2 == 0);
        }
    }

    #[test]
    fn test_fd_single_frame_padding() {
        let payload = [0xabu8; 10];
        let frames = collect(&payload, Mtu::Fd);
        assert_eq!(frames.len(), 1);
        // 10 payload bytes plus tail rounds up to a 12-byte frame.
        assert_eq!(frames[0].len(), 12);
        assert_eq!(&frames[0][..10], &payload);
        assert_eq!(frames[0][10], PAD_VALUE);
        let tail = TailByte::from(frames[0][11]);
        assert!(tail.sot() && tail.eot());
    }

    #[test]
    fn test_fd_multi_frame_padding_in_crc() {
        let payload = [0x55u8; 100];
        let frames = collect(&payload, Mtu::Fd);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 64);
        assert_eq!(frames[1].len(), 48);
        // Padding precedes the CRC in the last frame and is covered by it.
        let mut crc = TransferCrc::default();
        crc.add_bytes(&payload);
        crc.add_bytes(&[PAD_VALUE; 8]);
        let expected = crc.value().to_be_bytes();
        assert_eq!(&frames[1][37..45], &[PAD_VALUE; 8]);
        assert_eq!(&frames[1][45..47], &expected);
    }

    #[test]
    fn test_frame_count_around_mtu_boundary() {
        assert_eq!(frame_count(7, Mtu::Classic), 1);
        assert_eq!(frame_count(8, Mtu::Classic), 2);
        assert_eq!(frame_count(13, Mtu::Classic), 3);
        assert_eq!(frame_count(14, Mtu::Classic), 3);
        assert_eq!(frame_count(63, Mtu::Fd), 1);
        assert_eq!(frame_count(64, Mtu::Fd), 2);
    }
}
