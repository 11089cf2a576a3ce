use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{CaError, CaResult, ErrorKind};

/// Longest string a CA string element may carry on the wire.
pub const MAX_STRING_SIZE: usize = 40;
/// Longest PV name this server will accept in a claim request.
pub const MAX_PV_NAME_SIZE: usize = 60;
/// Bound on the number of distinct enum states a `DbrType::Enum` value
/// may carry, and the fixed width of each state string.
pub const MAX_ENUM_STATES: usize = 16;
pub const ENUM_STATE_STRING_SIZE: usize = 26;

/// The concrete value types this server carries end to end. Only the
/// plain (non status/graphic/control-qualified) scalar/array forms are
/// implemented -- see SPEC_FULL.md section 4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DbrType {
    String = 0,
    Int = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
}

impl DbrType {
    pub fn from_u16(value: u16) -> Option<DbrType> {
        use DbrType::*;
        Some(match value {
            0 => String,
            1 => Int,
            2 => Float,
            3 => Enum,
            4 => Char,
            5 => Long,
            6 => Double,
            _ => return None,
        })
    }

    /// Size in bytes of a single native element of this type, mirroring
    /// the original's `dbr_size_n` table.
    pub fn element_size(self) -> usize {
        match self {
            DbrType::String => MAX_STRING_SIZE,
            DbrType::Int => 2,
            DbrType::Float => 4,
            DbrType::Enum => 2,
            DbrType::Char => 1,
            DbrType::Long => 4,
            DbrType::Double => 8,
        }
    }

    pub fn wire_size(self, count: u32) -> usize {
        self.element_size() * count as usize
    }
}

/// A string table for an enum-valued PV (`DBR_CTRL_ENUM`-equivalent
/// metadata the original keeps alongside the value for claim/monitor
/// responses that need human-readable state names).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumStates {
    pub states: Vec<String>,
}

impl EnumStates {
    pub fn new(states: Vec<String>) -> CaResult<EnumStates> {
        if states.len() > MAX_ENUM_STATES {
            return Err(CaError::Fatal(ErrorKind::BadCount));
        }
        for state in &states {
            if state.len() >= ENUM_STATE_STRING_SIZE {
                return Err(CaError::Fatal(ErrorKind::BadType));
            }
        }
        Ok(EnumStates { states })
    }
}

/// An owned CA value. Rust ownership stands in for the original's
/// reference-counted `gdd` descriptor -- there is no separate refcount
/// to manage.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Vec<String>),
    Int(Vec<i16>),
    Float(Vec<f32>),
    Enum(Vec<u16>),
    Char(Vec<u8>),
    Long(Vec<i32>),
    Double(Vec<f64>),
}

impl Value {
    pub fn dbr_type(&self) -> DbrType {
        match self {
            Value::String(_) => DbrType::String,
            Value::Int(_) => DbrType::Int,
            Value::Float(_) => DbrType::Float,
            Value::Enum(_) => DbrType::Enum,
            Value::Char(_) => DbrType::Char,
            Value::Long(_) => DbrType::Long,
            Value::Double(_) => DbrType::Double,
        }
    }

    pub fn count(&self) -> u32 {
        (match self {
            Value::String(v) => v.len(),
            Value::Int(v) => v.len(),
            Value::Float(v) => v.len(),
            Value::Enum(v) => v.len(),
            Value::Char(v) => v.len(),
            Value::Long(v) => v.len(),
            Value::Double(v) => v.len(),
        }) as u32
    }

    /// Encodes the value's elements (not the header) onto `writer`,
    /// using a single string truncated at `MAX_STRING_SIZE` the way
    /// `commitMsgAndDelete`'s count==1 string case truncates.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Value::String(strings) => {
                for s in strings {
                    let mut buf = [0u8; MAX_STRING_SIZE];
                    let bytes = s.as_bytes();
                    let n = bytes.len().min(MAX_STRING_SIZE - 1);
                    buf[..n].copy_from_slice(&bytes[..n]);
                    writer.write_all(&buf)?;
                }
            }
            Value::Int(v) => {
                for x in v {
                    writer.write_i16::<BigEndian>(*x)?;
                }
            }
            Value::Float(v) => {
                for x in v {
                    writer.write_f32::<BigEndian>(*x)?;
                }
            }
            Value::Enum(v) => {
                for x in v {
                    writer.write_u16::<BigEndian>(*x)?;
                }
            }
            Value::Char(v) => writer.write_all(v)?,
            Value::Long(v) => {
                for x in v {
                    writer.write_i32::<BigEndian>(*x)?;
                }
            }
            Value::Double(v) => {
                for x in v {
                    writer.write_f64::<BigEndian>(*x)?;
                }
            }
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R, dbr_type: DbrType, count: u32) -> io::Result<Value> {
        let count = count as usize;
        Ok(match dbr_type {
            DbrType::String => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    let mut buf = [0u8; MAX_STRING_SIZE];
                    reader.read_exact(&mut buf)?;
                    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                    out.push(String::from_utf8_lossy(&buf[..end]).into_owned());
                }
                Value::String(out)
            }
            DbrType::Int => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(reader.read_i16::<BigEndian>()?);
                }
                Value::Int(out)
            }
            DbrType::Float => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(reader.read_f32::<BigEndian>()?);
                }
                Value::Float(out)
            }
            DbrType::Enum => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(reader.read_u16::<BigEndian>()?);
                }
                Value::Enum(out)
            }
            DbrType::Char => {
                let mut out = vec![0u8; count];
                reader.read_exact(&mut out)?;
                Value::Char(out)
            }
            DbrType::Long => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(reader.read_i32::<BigEndian>()?);
                }
                Value::Long(out)
            }
            DbrType::Double => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(reader.read_f64::<BigEndian>()?);
                }
                Value::Double(out)
            }
        })
    }
}

/// Wall-clock timestamp carried on a value descriptor, epoch seconds plus
/// nanoseconds (the original's `epicsTimeStamp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds: u32,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_system_time(time: std::time::SystemTime) -> Timestamp {
        let since_epoch = time.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
        Timestamp {
            seconds: since_epoch.as_secs() as u32,
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

/// A value plus the alarm status/severity and timestamp the protocol
/// attaches to every descriptor a write stamps on its way to a PV
/// (SPEC_FULL.md section 3's "Value descriptor"). `status`/`severity` of
/// `0` mean "none", matching `epicsAlarmNone`/`epicsSevNone`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDescriptor {
    pub value: Value,
    pub status: u16,
    pub severity: u16,
    pub timestamp: Timestamp,
}

impl ValueDescriptor {
    pub fn new(value: Value) -> ValueDescriptor {
        ValueDescriptor {
            value,
            status: 0,
            severity: 0,
            timestamp: Timestamp::default(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> ValueDescriptor {
        self.timestamp = timestamp;
        self
    }
}
