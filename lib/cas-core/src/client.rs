use byteorder::{BigEndian, WriteBytesExt};
use indexmap::IndexMap;
use std::time::SystemTime;

use cas_proto::error::{CaError, CaResult};
use cas_proto::status::CaStatus;
use cas_proto::types::Value;
use cas_proto::wire::{CaCommand, Header};

use crate::async_io::AsyncIoCoordinator;
use crate::buffer::{InputBuffer, OutputBuffer, Reservation};
use crate::channel::{Channel, ChannelId, Cid};
use crate::registry::Registry;

/// The per-connection request state machine (component "Stream client").
pub struct StreamClient {
    pub(crate) host_name: String,
    pub(crate) user_name: String,
    pub(crate) minor_version: u16,
    pub(crate) input: InputBuffer,
    pub(crate) output: OutputBuffer,
    pub(crate) channels: Registry<ChannelId, Channel>,
    pub(crate) cid_index: IndexMap<Cid, ChannelId>,
    pub(crate) async_io: AsyncIoCoordinator,
    pub(crate) events_enabled: bool,
    pub(crate) disconnect_requested: bool,
    pub(crate) last_receive: SystemTime,
    pub(crate) log: slog::Logger,
}

impl StreamClient {
    pub fn new(log: slog::Logger) -> StreamClient {
        StreamClient {
            host_name: String::new(),
            user_name: String::new(),
            minor_version: 0,
            input: InputBuffer::new(),
            output: OutputBuffer::new(),
            channels: Registry::new(),
            cid_index: IndexMap::new(),
            async_io: AsyncIoCoordinator::new(),
            events_enabled: true,
            disconnect_requested: false,
            last_receive: SystemTime::now(),
            log,
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub fn events_enabled(&self) -> bool {
        self.events_enabled
    }

    pub fn should_disconnect(&self) -> bool {
        self.disconnect_requested
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn find_by_cid(&self, cid: Cid) -> Option<ChannelId> {
        self.cid_index.get(&cid).copied()
    }

    /// Pulls bytes into the input buffer, stamping the receive time used
    /// as the default timestamp on writes.
    pub fn ingress<R: std::io::Read>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        let n = self.input.ingress(reader)?;
        if n > 0 {
            self.last_receive = SystemTime::now();
        }
        Ok(n)
    }

    pub fn egress<W: std::io::Write>(&mut self, writer: &mut W) -> std::io::Result<usize> {
        self.output.egress(writer)
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Decodes and dispatches every complete frame currently sitting in
    /// the input buffer. Stops (without error) on the first incomplete
    /// frame, leaving it for the next `ingress` to complete. A `sendBlocked`
    /// response from the dispatcher (the output buffer is over its high
    /// water mark) also stops the loop without consuming the frame, so the
    /// same request is re-dispatched once a later `egress` has drained
    /// room for it.
    pub fn process_buffered<T: crate::server_tool::ServerTool>(&mut self, tool: &mut T) -> CaResult<()> {
        loop {
            let header_len = match Header::required_len(self.input.data()) {
                Some(len) => len,
                None => return Ok(()),
            };
            if self.input.len() < header_len {
                return Ok(());
            }

            let mut cursor = std::io::Cursor::new(&self.input.data()[..header_len]);
            let header = Header::read(&mut cursor)?;

            let padded = cas_proto::wire::align8(header.payload_size as usize);
            if self.input.len() < header_len + padded {
                return Ok(());
            }

            let payload = self.input.data()[header_len..header_len + header.payload_size as usize].to_vec();

            slog::trace!(self.log, "dispatching request"; "command" => header.command);
            match self.dispatch(tool, header, &payload) {
                Ok(()) => {}
                Err(CaError::Wait) => return Ok(()),
                Err(err) => return Err(err),
            }
            self.input.consume(header_len + padded);

            if self.disconnect_requested {
                return Ok(());
            }
        }
    }

    /// Tears the client down: every owned channel is destroyed without a
    /// protocol notification, since the transport is already going away.
    pub fn shutdown(&mut self) {
        let ids: Vec<ChannelId> = self.channels.iter().map(|(id, _)| *id).collect();
        for id in ids {
            self.destroy_channel(id, false);
        }
    }

    pub(crate) fn write_empty(&mut self, header: Header) -> CaResult<()> {
        let (reservation, _slice) = self.output.reserve(&header, 0)?;
        self.output.commit(header, reservation, None)
    }

    pub(crate) fn write_status(&mut self, header: Header, status: CaStatus) -> CaResult<()> {
        let response = Header {
            command: header.command,
            data_type: header.data_type,
            count: header.count,
            payload_size: 0,
            id1: header.id1,
            id2: status as u32,
        };
        self.write_empty(response)
    }

    pub(crate) fn write_value(&mut self, header: Header, notify: bool, status: CaStatus, value: &Value) -> CaResult<()> {
        let mut payload = Vec::new();
        value.write(&mut payload)?;

        let response = Header {
            command: header.command,
            data_type: value.dbr_type() as u16,
            count: value.count(),
            payload_size: payload.len() as u32,
            id1: header.id1,
            id2: if notify { status as u32 } else { header.id2 },
        };

        let actual_size = match value {
            Value::String(strings) if strings.len() == 1 => Some(strings[0].len() + 1),
            _ => None,
        };

        let (reservation, slice) = self.output.reserve(&response, payload.len())?;
        slice.copy_from_slice(&payload);
        self.output.commit(response, reservation, actual_size)
    }

    /// Emits the protocol's generic error frame: the offending request's
    /// header fields, a status code, and a human-readable message.
    pub(crate) fn send_error(&mut self, orig: Header, status: CaStatus, message: &str) -> CaResult<()> {
        let mut payload = Vec::new();
        payload.write_u16::<BigEndian>(orig.command)?;
        payload.write_u16::<BigEndian>(orig.data_type)?;
        payload.write_u32::<BigEndian>(orig.count)?;
        payload.write_u32::<BigEndian>(orig.id1)?;
        payload.write_u32::<BigEndian>(orig.id2)?;
        payload.extend_from_slice(message.as_bytes());
        payload.push(0);

        let response = Header {
            command: CaCommand::Error as u16,
            data_type: 0,
            count: 0,
            payload_size: payload.len() as u32,
            id1: orig.id1,
            id2: status as u32,
        };

        let (reservation, slice) = self.output.reserve(&response, payload.len())?;
        slice.copy_from_slice(&payload);
        self.output.commit(response, reservation, None)
    }
}
