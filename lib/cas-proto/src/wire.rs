use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{CaError, CaResult, ErrorKind};

/// Sentinel that marks a header field as "see the extended header".
pub const JUMBO_MARKER: u16 = 0xFFFF;

pub const HEADER_SIZE: usize = 16;
pub const EXT_HEADER_SIZE: usize = HEADER_SIZE + 8;

/// Request/response command codes the dispatcher understands.
///
/// Values are assigned internally (see SPEC_FULL.md section 6) and are not
/// claimed to be wire-compatible with any particular CA server build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CaCommand {
    Read = 0,
    ReadNotify = 1,
    Write = 2,
    WriteNotify = 3,
    EventAdd = 4,
    EventCancel = 5,
    ClearChannel = 6,
    ClaimChannel = 7,
    EventsOn = 8,
    EventsOff = 9,
    ReadSync = 10,
    HostName = 11,
    ClientName = 12,
    AccessRights = 13,
    Error = 14,
    ServerDisconnect = 15,
}

impl CaCommand {
    pub fn from_u16(value: u16) -> Option<CaCommand> {
        use CaCommand::*;
        Some(match value {
            0 => Read,
            1 => ReadNotify,
            2 => Write,
            3 => WriteNotify,
            4 => EventAdd,
            5 => EventCancel,
            6 => ClearChannel,
            7 => ClaimChannel,
            8 => EventsOn,
            9 => EventsOff,
            10 => ReadSync,
            11 => HostName,
            12 => ClientName,
            13 => AccessRights,
            14 => Error,
            15 => ServerDisconnect,
            _ => return None,
        })
    }
}

/// A decoded request/response header, normalized across the fixed and
/// extended wire forms (`casStrmClient.cc`'s header parsing folds the
/// jumbo fields back into plain `size`/`count` the same way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub command: u16,
    pub data_type: u16,
    pub count: u32,
    pub payload_size: u32,
    pub id1: u32,
    pub id2: u32,
}

impl Header {
    pub fn command(&self) -> Option<CaCommand> {
        CaCommand::from_u16(self.command)
    }

    fn is_jumbo(&self) -> bool {
        self.payload_size > u32::from(JUMBO_MARKER) - 1 || self.count > u32::from(JUMBO_MARKER) - 1
    }

    pub fn wire_len(&self) -> usize {
        if self.is_jumbo() {
            EXT_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Inspects the first bytes of an in-memory buffer and reports how
    /// many bytes the header will occupy, without committing to parsing
    /// it. Returns `None` if not even the fixed 16-byte prefix is
    /// available yet -- callers use this to avoid handing a truncated
    /// header to `read`, which would otherwise surface as a spurious
    /// `UnexpectedEof` instead of "come back with more data".
    pub fn required_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let size = u16::from_be_bytes([buf[2], buf[3]]);
        let count = u16::from_be_bytes([buf[6], buf[7]]);
        if size == JUMBO_MARKER || count == JUMBO_MARKER {
            Some(EXT_HEADER_SIZE)
        } else {
            Some(HEADER_SIZE)
        }
    }

    /// Reads one header from `reader`. Returns `CaError::Wait` if the
    /// fixed-size prefix isn't fully available yet.
    pub fn read<R: Read>(reader: &mut R) -> CaResult<Header> {
        let command = reader.read_u16::<BigEndian>()?;
        let size = reader.read_u16::<BigEndian>()?;
        let data_type = reader.read_u16::<BigEndian>()?;
        let count = reader.read_u16::<BigEndian>()?;
        let id1 = reader.read_u32::<BigEndian>()?;
        let id2 = reader.read_u32::<BigEndian>()?;

        let (payload_size, count) = if size == JUMBO_MARKER || count == JUMBO_MARKER {
            let size32 = reader.read_u32::<BigEndian>()?;
            let count32 = reader.read_u32::<BigEndian>()?;
            (size32, count32)
        } else {
            (u32::from(size), u32::from(count))
        };

        Ok(Header {
            command,
            data_type,
            count,
            payload_size,
            id1,
            id2,
        })
    }

    /// Writes this header in whichever of the two wire forms its fields
    /// require.
    pub fn write<W: Write>(&self, writer: &mut W) -> CaResult<()> {
        if self.is_jumbo() {
            writer.write_u16::<BigEndian>(self.command)?;
            writer.write_u16::<BigEndian>(JUMBO_MARKER)?;
            writer.write_u16::<BigEndian>(self.data_type)?;
            writer.write_u16::<BigEndian>(JUMBO_MARKER)?;
            writer.write_u32::<BigEndian>(self.id1)?;
            writer.write_u32::<BigEndian>(self.id2)?;
            writer.write_u32::<BigEndian>(self.payload_size)?;
            writer.write_u32::<BigEndian>(self.count)?;
        } else {
            writer.write_u16::<BigEndian>(self.command)?;
            writer.write_u16::<BigEndian>(self.payload_size as u16)?;
            writer.write_u16::<BigEndian>(self.data_type)?;
            writer.write_u16::<BigEndian>(self.count as u16)?;
            writer.write_u32::<BigEndian>(self.id1)?;
            writer.write_u32::<BigEndian>(self.id2)?;
        }
        Ok(())
    }
}

/// Largest single response the wire codec will ever try to frame. Above
/// this the caller gets `ErrorKind::TooLarge` instead of an oversized
/// allocation (mirrors `hugeRequest` in the original).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

pub fn check_size(payload_size: u32) -> CaResult<()> {
    if payload_size > MAX_MESSAGE_SIZE {
        Err(CaError::Fatal(ErrorKind::TooLarge))
    } else {
        Ok(())
    }
}

/// Rounds `len` up to the 8-byte alignment the protocol pads payloads to.
pub fn align8(len: usize) -> usize {
    (len + 7) & !7
}

pub fn read_padded<R: Read>(reader: &mut R, payload_size: u32) -> io::Result<Vec<u8>> {
    let padded = align8(payload_size as usize);
    let mut buf = vec![0u8; padded];
    reader.read_exact(&mut buf)?;
    buf.truncate(payload_size as usize);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(header: Header) -> Header {
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        Header::read(&mut cursor).unwrap()
    }

    #[test]
    fn plain_header_roundtrips() {
        let header = Header {
            command: CaCommand::ReadNotify as u16,
            data_type: 3,
            count: 1,
            payload_size: 4,
            id1: 42,
            id2: 7,
        };
        assert_eq!(header.wire_len(), HEADER_SIZE);
        assert_eq!(roundtrip(header), header);
    }

    #[test]
    fn jumbo_header_roundtrips() {
        let header = Header {
            command: CaCommand::EventAdd as u16,
            data_type: 6,
            count: 70_000,
            payload_size: 280_000,
            id1: 1,
            id2: 2,
        };
        assert_eq!(header.wire_len(), EXT_HEADER_SIZE);
        assert_eq!(roundtrip(header), header);
    }

    #[test]
    fn jumbo_triggered_by_either_field() {
        let header = Header {
            command: 0,
            data_type: 0,
            count: u32::from(JUMBO_MARKER) - 1,
            payload_size: u32::from(JUMBO_MARKER),
            id1: 0,
            id2: 0,
        };
        assert!(header.is_jumbo());
    }

    #[test]
    fn required_len_reports_none_below_fixed_prefix() {
        assert_eq!(Header::required_len(&[0u8; 10]), None);
    }

    #[test]
    fn required_len_detects_jumbo_from_either_field() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[2] = 0xFF;
        buf[3] = 0xFF;
        assert_eq!(Header::required_len(&buf), Some(EXT_HEADER_SIZE));
    }

    #[test]
    fn oversized_payload_rejected() {
        assert!(check_size(MAX_MESSAGE_SIZE + 1).is_err());
        assert!(check_size(MAX_MESSAGE_SIZE).is_ok());
    }

    #[test]
    fn alignment_rounds_up_to_eight() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
    }

    #[test]
    fn padded_read_strips_padding() {
        let mut data = vec![1, 2, 3];
        data.extend_from_slice(&[0u8; 5]);
        let mut cursor = Cursor::new(data);
        let out = read_padded(&mut cursor, 3).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
