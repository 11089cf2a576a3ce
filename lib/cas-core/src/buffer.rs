use slice_deque::SliceDeque;
use std::io::{self, Read, Write};

use cas_proto::error::{CaError, CaResult};
use cas_proto::wire::{align8, check_size, Header};

type ByteDeque = SliceDeque<u8>;

const BUF_SIZE_INCREMENT: usize = 16384;

/// Above this many buffered, unflushed bytes `OutputBuffer::reserve`
/// refuses new work with `CaError::Wait` (`sendBlocked` in the
/// original) instead of growing without bound. The dispatcher pauses
/// reading further requests until `egress` drains the buffer back
/// under the mark.
pub const HIGH_WATER_MARK: usize = 16 * 1024;

/// A growable FIFO byte queue data is appended to at the head and drained
/// from the tail from, shared plumbing for both directions of the wire.
struct Ring {
    data: ByteDeque,
}

impl Ring {
    fn new(initial: usize) -> Ring {
        let mut data = ByteDeque::new();
        data.reserve(initial);
        Ring { data }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn free_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    fn grow_to_fit(&mut self, additional: usize) {
        while self.free_capacity() < additional {
            self.data.reserve(BUF_SIZE_INCREMENT);
        }
    }

    fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let orig_len = self.data.len();

        while !self.data.is_empty() {
            let write_count = writer.write(&self.data)?;

            if write_count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            unsafe { self.data.move_head(write_count as isize) };
        }

        Ok(orig_len)
    }

    fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.grow_to_fit(BUF_SIZE_INCREMENT);
        let orig_len = self.data.len();

        loop {
            if self.free_capacity() == 0 {
                self.grow_to_fit(BUF_SIZE_INCREMENT);
            }

            let read_count = unsafe {
                let slice = self.data.tail_head_slice();
                reader.read(slice)?
            };

            if read_count == 0 {
                break;
            }

            unsafe { self.data.move_tail(read_count as isize) };
        }

        Ok(self.data.len() - orig_len)
    }
}

/// The per-client input buffer (component C). Frames are decoded directly
/// off the front of the queue; `consume` advances past whatever the
/// dispatcher has already parsed.
pub struct InputBuffer {
    ring: Ring,
}

impl InputBuffer {
    pub fn new() -> InputBuffer {
        InputBuffer {
            ring: Ring::new(BUF_SIZE_INCREMENT),
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        self.ring.data.as_slice()
    }

    pub fn consume(&mut self, count: usize) {
        unsafe { self.ring.data.move_head(count as isize) };
    }

    pub fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.ring.ingress(reader)
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        InputBuffer::new()
    }
}

/// The per-client output buffer (component B). Responses are written
/// through a reserve/commit pair so a header whose final payload size
/// isn't known until the value has been serialized can still be framed
/// in a single pass, and `push_ctx`/`pop_ctx` let the dispatcher group
/// several responses (e.g. access-rights + claim-accept) so they can
/// never be interleaved with another client's traffic mid-write.
pub struct OutputBuffer {
    ring: Ring,
    ctx_depth: usize,
}

/// A reservation returned by `reserve`: the payload region to fill in,
/// plus the offset of the header so `commit` can patch the final size.
pub struct Reservation {
    header_offset: usize,
    payload_offset: usize,
    reserved_payload: usize,
}

impl OutputBuffer {
    pub fn new() -> OutputBuffer {
        OutputBuffer {
            ring: Ring::new(BUF_SIZE_INCREMENT),
            ctx_depth: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    /// Marks the start of an atomic group of messages. While the depth is
    /// greater than zero nothing but this client's own dispatcher writes
    /// into the buffer, so a partial flush can never split the group.
    pub fn push_ctx(&mut self) {
        self.ctx_depth += 1;
    }

    pub fn pop_ctx(&mut self) {
        self.ctx_depth = self.ctx_depth.saturating_sub(1);
    }

    pub fn in_ctx(&self) -> bool {
        self.ctx_depth > 0
    }

    /// Reserves room for `header` plus `payload_size` bytes of payload
    /// (rounded up to the 8-byte wire alignment) and returns a mutable
    /// slice to fill with the encoded value. Rejects an oversized payload
    /// outright (`hugeRequest`) and, outside an atomic `push_ctx` group,
    /// refuses to grow the buffer past `HIGH_WATER_MARK` so a slow reader
    /// applies backpressure instead of letting the server buffer without
    /// bound (`sendBlocked`). A group already open via `push_ctx` is
    /// exempt so a multi-frame response is never split across a pause.
    pub fn reserve(&mut self, header: &Header, payload_size: usize) -> CaResult<(Reservation, &mut [u8])> {
        check_size(payload_size as u32)?;

        let padded = align8(payload_size);
        let total = header.wire_len() + padded;

        if !self.in_ctx() && self.ring.len() > HIGH_WATER_MARK {
            return Err(CaError::Wait);
        }

        self.ring.grow_to_fit(total);

        let header_offset = self.ring.data.len();
        unsafe { self.ring.data.move_tail(header.wire_len() as isize) };
        {
            let mut header_slice: &mut [u8] = &mut self.ring.data.as_mut_slice()[header_offset..];
            header.write(&mut header_slice).map_err(|_| CaError::Wait)?;
        }

        let payload_offset = self.ring.data.len();
        unsafe { self.ring.data.move_tail(padded as isize) };

        let slice = &mut self.ring.data.as_mut_slice()[payload_offset..payload_offset + payload_size];
        Ok((
            Reservation {
                header_offset,
                payload_offset,
                reserved_payload: payload_size,
            },
            slice,
        ))
    }

    /// Commits a reservation, optionally overriding the payload size
    /// recorded in the header (used for the count==1 string-truncation
    /// case, where the wire payload is smaller than what was reserved).
    /// When the override shrinks the payload, the surplus padding bytes
    /// reserved for the original size are dropped from the tail so the
    /// frame's on-wire length matches `align8(actual_size)`, keeping the
    /// next frame's header at the offset readers will look for it.
    pub fn commit(&mut self, mut header: Header, reservation: Reservation, actual_size: Option<usize>) -> CaResult<()> {
        if let Some(size) = actual_size {
            header.payload_size = size as u32;
            let old_padded = align8(reservation.reserved_payload);
            let new_padded = align8(size);
            if new_padded < old_padded {
                let shrink = (old_padded - new_padded) as isize;
                unsafe { self.ring.data.move_tail(-shrink) };
            }
        }
        let mut patch: &mut [u8] = &mut self.ring.data.as_mut_slice()[reservation.header_offset..];
        header.write(&mut patch).map_err(|_| CaError::Wait)?;
        let _ = reservation.payload_offset;
        Ok(())
    }

    pub fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        self.ring.egress(writer)
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        OutputBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_proto::wire::CaCommand;
    use std::io::Cursor;

    fn header(payload_size: u32) -> Header {
        Header {
            command: CaCommand::ReadNotify as u16,
            data_type: 6,
            count: 1,
            payload_size,
            id1: 1,
            id2: 2,
        }
    }

    #[test]
    fn reserve_then_commit_roundtrips_through_egress() {
        let mut buffer = OutputBuffer::new();
        let h = header(8);
        let (reservation, slice) = buffer.reserve(&h, 8).unwrap();
        slice.copy_from_slice(&1234u64.to_be_bytes());
        buffer.commit(h, reservation, None).unwrap();

        let mut out = Vec::new();
        buffer.egress(&mut out).unwrap();
        assert_eq!(out.len(), h.wire_len() + 8);

        let mut cursor = Cursor::new(out);
        let decoded = Header::read(&mut cursor).unwrap();
        assert_eq!(decoded.payload_size, 8);
    }

    #[test]
    fn commit_can_shrink_recorded_payload_size() {
        let mut buffer = OutputBuffer::new();
        let h = header(40);
        let (reservation, _slice) = buffer.reserve(&h, 40).unwrap();
        buffer.commit(h, reservation, Some(6)).unwrap();

        let mut out = Vec::new();
        buffer.egress(&mut out).unwrap();
        let mut cursor = Cursor::new(out);
        let decoded = Header::read(&mut cursor).unwrap();
        assert_eq!(decoded.payload_size, 6);
    }

    #[test]
    fn shrinking_commit_keeps_the_next_frame_aligned() {
        let mut buffer = OutputBuffer::new();
        let first = header(40);
        let (reservation, _slice) = buffer.reserve(&first, 40).unwrap();
        buffer.commit(first, reservation, Some(6)).unwrap();

        let second = header(8);
        let (reservation, slice) = buffer.reserve(&second, 8).unwrap();
        slice.copy_from_slice(&42u64.to_be_bytes());
        buffer.commit(second, reservation, None).unwrap();

        let mut out = Vec::new();
        buffer.egress(&mut out).unwrap();
        assert_eq!(out.len(), first.wire_len() + align8(6) + second.wire_len() + 8);

        let mut cursor = Cursor::new(out);
        let decoded_first = Header::read(&mut cursor).unwrap();
        assert_eq!(decoded_first.payload_size, 6);
        cursor.set_position(cursor.position() + align8(6) as u64);

        let decoded_second = Header::read(&mut cursor).unwrap();
        assert_eq!(decoded_second.payload_size, 8);
    }

    #[test]
    fn reserve_rejects_a_payload_over_the_wire_limit() {
        let mut buffer = OutputBuffer::new();
        let h = header(cas_proto::wire::MAX_MESSAGE_SIZE + 8);
        let err = buffer.reserve(&h, (cas_proto::wire::MAX_MESSAGE_SIZE + 8) as usize).unwrap_err();
        assert!(matches!(err, CaError::Fatal(cas_proto::error::ErrorKind::TooLarge)));
    }

    #[test]
    fn reserve_blocks_with_wait_once_over_the_high_water_mark() {
        let mut buffer = OutputBuffer::new();
        let h = header(HIGH_WATER_MARK as u32);
        let (reservation, _slice) = buffer.reserve(&h, HIGH_WATER_MARK).unwrap();
        buffer.commit(h, reservation, None).unwrap();

        let small = header(8);
        let err = buffer.reserve(&small, 8).unwrap_err();
        assert!(matches!(err, CaError::Wait));
    }

    #[test]
    fn reserve_ignores_high_water_mark_inside_an_atomic_group() {
        let mut buffer = OutputBuffer::new();
        let h = header(HIGH_WATER_MARK as u32);
        let (reservation, _slice) = buffer.reserve(&h, HIGH_WATER_MARK).unwrap();
        buffer.commit(h, reservation, None).unwrap();

        buffer.push_ctx();
        let small = header(8);
        let (reservation, slice) = buffer.reserve(&small, 8).unwrap();
        slice.copy_from_slice(&1u64.to_be_bytes());
        buffer.commit(small, reservation, None).unwrap();
        buffer.pop_ctx();
    }

    #[test]
    fn push_pop_ctx_tracks_depth() {
        let mut buffer = OutputBuffer::new();
        assert!(!buffer.in_ctx());
        buffer.push_ctx();
        buffer.push_ctx();
        assert!(buffer.in_ctx());
        buffer.pop_ctx();
        assert!(buffer.in_ctx());
        buffer.pop_ctx();
        assert!(!buffer.in_ctx());
    }

    #[test]
    fn input_buffer_ingress_and_consume() {
        let mut input = InputBuffer::new();
        let mut cursor = Cursor::new(vec![1, 2, 3, 4]);
        input.ingress(&mut cursor).unwrap();
        assert_eq!(input.data(), &[1, 2, 3, 4]);
        input.consume(2);
        assert_eq!(input.data(), &[3, 4]);
    }
}
