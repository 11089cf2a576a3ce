use cas_proto::error::{CaError, CaResult, ErrorKind};
use cas_proto::status::CaStatus;
use cas_proto::types::{DbrType, Timestamp, Value, ValueDescriptor};
use cas_proto::wire::{CaCommand, Header};

use crate::async_io::{Pending, PendingAction};
use crate::channel::{Channel, ChannelId, Cid};
use crate::client::StreamClient;
use crate::monitor::{EventMask, Monitor, MonitorId};
use crate::pv::{AccessRights, ToolOutcome};
use crate::server_tool::{AttachOutcome, ServerTool};

/// Longest PV name accepted in a claim request's payload.
pub const UNREASONABLE_PV_NAME_SIZE: usize = 500;

/// Lowest protocol minor version this server still talks to.
pub const MIN_MINOR_VERSION: u16 = 4;
/// Minor version from which access-rights messages and richer error
/// status codes are sent.
pub const ACCESS_RIGHTS_MINOR_VERSION: u16 = 1;
/// Minor version from which a failed claim gets its own message instead
/// of a generic error-with-status.
pub const CLAIM_FAILED_MINOR_VERSION: u16 = 6;
/// Minor version from which disconnecting a client sends a dedicated
/// server-disconnect frame instead of simply closing the transport.
pub const SERVER_DISCONNECT_MINOR_VERSION: u16 = 7;

fn access_bits(access: AccessRights) -> u32 {
    (access.read as u32) | ((access.write as u32) << 1)
}

/// Looks the channel up by SID and checks type/count are in range for
/// its PV, per spec.md 4.G's three validation steps (channel existence
/// is checked by the caller via the returned `Option`).
fn validate_type_count(channel: &Channel, dbr_type: u16, count: u32) -> CaResult<DbrType> {
    let dbr_type = DbrType::from_u16(dbr_type).ok_or(CaError::Fatal(ErrorKind::BadType))?;
    if count == 0 || count > channel.pv().native_count() {
        return Err(CaError::Fatal(ErrorKind::BadCount));
    }
    Ok(dbr_type)
}

impl StreamClient {
    /// Entry point for every decoded frame. Mirrors the original's big
    /// `if (header.m_cmmd == ...)` dispatch, just as a match on
    /// `CaCommand`.
    pub fn dispatch<T: ServerTool>(&mut self, tool: &mut T, header: Header, payload: &[u8]) -> CaResult<()> {
        let command = match header.command() {
            Some(c) => c,
            None => return self.unknown_command_action(header),
        };

        match command {
            CaCommand::ClaimChannel => self.claim_channel_action(tool, header, payload),
            CaCommand::Read => self.read_action(header, false),
            CaCommand::ReadNotify => self.read_action(header, true),
            CaCommand::Write => self.write_action(header, payload, false),
            CaCommand::WriteNotify => self.write_action(header, payload, true),
            CaCommand::EventAdd => self.event_add_action(header, payload),
            CaCommand::EventCancel => self.event_cancel_action(header),
            CaCommand::ClearChannel => self.clear_channel_action(header),
            CaCommand::EventsOn => self.events_on_action(header),
            CaCommand::EventsOff => self.events_off_action(header),
            CaCommand::ReadSync => self.read_sync_action(header),
            CaCommand::HostName => self.host_name_action(header, payload),
            CaCommand::ClientName => self.client_name_action(header, payload),
            CaCommand::AccessRights | CaCommand::Error | CaCommand::ServerDisconnect => {
                self.unknown_command_action(header)
            }
        }
    }

    fn unknown_command_action(&mut self, header: Header) -> CaResult<()> {
        slog::debug!(self.log, "unknown command"; "command" => header.command);
        self.send_error(header, CaStatus::InternalError, "unrecognized request code")
    }

    fn claim_channel_action<T: ServerTool>(
        &mut self,
        tool: &mut T,
        header: Header,
        payload: &[u8],
    ) -> CaResult<()> {
        let version = if header.id2 < 0xFFFF { header.id2 as u16 } else { 0 };
        if version < MIN_MINOR_VERSION {
            self.send_error(header, CaStatus::Defunct, "client protocol version too old")?;
            self.disconnect_requested = true;
            return Ok(());
        }
        self.minor_version = version;

        if payload.len() <= 1 || payload.len() > UNREASONABLE_PV_NAME_SIZE {
            self.disconnect_requested = true;
            return Err(CaError::Fatal(ErrorKind::BadCount));
        }

        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let name = String::from_utf8_lossy(&payload[..end]).into_owned();
        let cid = Cid(header.id1);

        let mut ctx = crate::context::RequestContext::new(header);
        match tool.attach(&mut ctx, &name) {
            AttachOutcome::AsyncStarted => {
                self.async_io.block_attach(Pending {
                    header,
                    action: PendingAction::ClaimEnumTable,
                    payload: payload.to_vec(),
                });
                Ok(())
            }
            AttachOutcome::Postpone => {
                self.async_io.block_attach(Pending {
                    header,
                    action: PendingAction::ClaimEnumTable,
                    payload: payload.to_vec(),
                });
                Ok(())
            }
            AttachOutcome::NotFound => {
                if self.minor_version >= CLAIM_FAILED_MINOR_VERSION {
                    self.send_claim_failed(header)
                } else {
                    self.send_error(header, CaStatus::AllocationFailed, CaStatus::AllocationFailed.message())
                }
            }
            AttachOutcome::Found(pv) => self.finish_claim(header, cid, pv),
        }
    }

    /// Re-drives a claim that was parked on `tool.attach` returning
    /// async-started/postpone. Re-running `attach` is the re-drive: the
    /// application is expected to answer `Found`/`NotFound` this time.
    fn redrive_attach<T: ServerTool>(&mut self, tool: &mut T, pending: Pending) -> CaResult<()> {
        self.claim_channel_action(tool, pending.header, &pending.payload)
    }

    /// Drains every claim parked on the attach list and re-drives it
    /// against `tool`. Call this once the application has resolved
    /// whatever it returned `asyncStarted`/`postpone` for.
    pub fn complete_attach<T: ServerTool>(&mut self, tool: &mut T) -> CaResult<()> {
        for pending in self.async_io.drain_attach() {
            self.redrive_attach(tool, pending)?;
        }
        Ok(())
    }

    fn finish_claim(&mut self, header: Header, cid: Cid, pv: Box<dyn crate::pv::Pv>) -> CaResult<()> {
        let access = pv.access(&self.user_name, &self.host_name);
        let best_type = pv.best_type();

        let sid = self.channels.insert(Channel::new(cid, ChannelId(0), pv, access));
        self.channels.get_mut(sid).unwrap().set_sid(sid);
        self.cid_index.insert(cid, sid);
        self.channels.get_mut(sid).unwrap().pv_mut().attach_channel(sid);

        if best_type == DbrType::Enum {
            let mut ctx = crate::context::RequestContext::new(header);
            let outcome = self.channels.get_mut(sid).unwrap().pv_mut().update_enum_string_table(&mut ctx);
            match outcome {
                ToolOutcome::AsyncStarted => {
                    self.async_io.block_on_channel(
                        sid,
                        Pending {
                            header,
                            action: PendingAction::ClaimFinalize,
                            payload: Vec::new(),
                        },
                    );
                    return Ok(());
                }
                ToolOutcome::Postpone => {
                    slog::debug!(
                        self.log,
                        "enum string table fetch postponed on claim path, finalizing claim anyway";
                        "sid" => sid.0
                    );
                }
                ToolOutcome::Sync(_) => {}
            }
        }

        self.finalize_claim(header, cid, sid)
    }

    fn finalize_claim(&mut self, header: Header, cid: Cid, sid: ChannelId) -> CaResult<()> {
        let channel = self.channels.get(sid).unwrap();
        let access = channel.access();
        let best_type = channel.pv().best_type();
        let native_count = channel.pv().native_count();

        self.output.push_ctx();
        let rights_header = Header {
            command: CaCommand::AccessRights as u16,
            data_type: 0,
            count: 0,
            payload_size: 0,
            id1: sid.0,
            id2: access_bits(access),
        };
        self.write_empty(rights_header)?;

        let accept_header = Header {
            command: CaCommand::ClaimChannel as u16,
            data_type: best_type as u16,
            count: native_count,
            payload_size: 0,
            id1: cid.0,
            id2: sid.0,
        };
        self.write_empty(accept_header)?;
        self.output.pop_ctx();
        Ok(())
    }

    fn send_claim_failed(&mut self, header: Header) -> CaResult<()> {
        let response = Header {
            command: CaCommand::ClaimChannel as u16,
            data_type: 0,
            count: 0,
            payload_size: 0,
            id1: header.id1,
            id2: 0,
        };
        self.write_empty(response)
    }

    fn lookup_channel(&self, header: &Header) -> CaResult<ChannelId> {
        let sid = ChannelId(header.id1);
        if self.channels.contains(sid) {
            Ok(sid)
        } else {
            Err(CaError::Fatal(ErrorKind::BadChannelId))
        }
    }

    fn read_action(&mut self, header: Header, notify: bool) -> CaResult<()> {
        let sid = match self.lookup_channel(&header) {
            Ok(sid) => sid,
            Err(err) => return self.fail_request(header, notify, err),
        };

        let dbr_type = match validate_type_count(self.channels.get(sid).unwrap(), header.data_type, header.count) {
            Ok(t) => t,
            Err(err) => return self.fail_request(header, notify, err),
        };

        let channel = self.channels.get_mut(sid).unwrap();
        if !channel.read_access() {
            let status = if self.minor_version >= ACCESS_RIGHTS_MINOR_VERSION {
                CaStatus::NoReadAccess
            } else {
                CaStatus::GetFailed
            };
            return self.fail_request(header, notify, CaError::from(status));
        }

        channel.begin_read();
        let mut ctx = crate::context::RequestContext::new(header);
        let outcome = channel.pv_mut().read(&mut ctx, dbr_type, header.count);
        channel.end_read();

        match outcome {
            ToolOutcome::Sync(Ok(value)) => {
                let value = value.unwrap_or(Value::Char(vec![]));
                self.write_value(header, notify, CaStatus::Normal, &value)
            }
            ToolOutcome::Sync(Err(err)) => self.fail_request(header, notify, err),
            ToolOutcome::AsyncStarted => Ok(()),
            ToolOutcome::Postpone => {
                self.async_io.block_on_channel(
                    sid,
                    Pending {
                        header,
                        action: PendingAction::Read,
                        payload: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn write_action(&mut self, header: Header, payload: &[u8], notify: bool) -> CaResult<()> {
        let sid = match self.lookup_channel(&header) {
            Ok(sid) => sid,
            Err(err) => return self.fail_request(header, notify, err),
        };

        let dbr_type = match validate_type_count(self.channels.get(sid).unwrap(), header.data_type, header.count) {
            Ok(t) => t,
            Err(err) => return self.fail_request(header, notify, err),
        };

        let channel = self.channels.get_mut(sid).unwrap();
        if !channel.write_access() {
            let status = if self.minor_version >= ACCESS_RIGHTS_MINOR_VERSION {
                CaStatus::NoWriteAccess
            } else {
                CaStatus::PutFailed
            };
            return self.fail_request(header, notify, CaError::from(status));
        }

        let value = match Value::read(&mut std::io::Cursor::new(payload), dbr_type, header.count) {
            Ok(v) => v,
            Err(_) => return self.fail_request(header, notify, CaError::Fatal(ErrorKind::BadType)),
        };
        let descriptor = ValueDescriptor::new(value).with_timestamp(Timestamp::from_system_time(self.last_receive));

        let mut ctx = crate::context::RequestContext::new(header);
        let outcome = channel.pv_mut().write(&mut ctx, descriptor);

        match outcome {
            ToolOutcome::Sync(Ok(_)) => {
                if notify {
                    self.write_status(header, CaStatus::Normal)
                } else {
                    Ok(())
                }
            }
            ToolOutcome::Sync(Err(err)) => self.fail_request(header, notify, err),
            ToolOutcome::AsyncStarted => Ok(()),
            ToolOutcome::Postpone => {
                self.async_io.block_on_channel(
                    sid,
                    Pending {
                        header,
                        action: PendingAction::Write,
                        payload: payload.to_vec(),
                    },
                );
                Ok(())
            }
        }
    }

    fn event_add_action(&mut self, header: Header, payload: &[u8]) -> CaResult<()> {
        let sid = match self.lookup_channel(&header) {
            Ok(sid) => sid,
            Err(err) => return self.fail_request(header, true, err),
        };
        let dbr_type = match validate_type_count(self.channels.get(sid).unwrap(), header.data_type, header.count) {
            Ok(t) => t,
            Err(err) => return self.fail_request(header, true, err),
        };
        // The subscription mask rides in the first two payload bytes;
        // `available` (id2) is the client's own monitor id, echoed back
        // unchanged on every delivery for this subscription.
        let raw_mask = match payload.get(0..2) {
            Some(bytes) => u16::from_be_bytes([bytes[0], bytes[1]]),
            None => return self.fail_request(header, true, CaError::Fatal(ErrorKind::BadEventMask)),
        };
        let mask = EventMask::from_bits(raw_mask);
        if mask.is_empty() {
            return self.fail_request(header, true, CaError::Fatal(ErrorKind::BadEventMask));
        }

        let channel = self.channels.get_mut(sid).unwrap();
        let mut ctx = crate::context::RequestContext::new(header);
        let outcome = channel.pv_mut().read(&mut ctx, dbr_type, header.count);

        match outcome {
            ToolOutcome::Sync(Ok(value)) => {
                let monitor_id = MonitorId(header.id2);
                channel.install_monitor(monitor_id, Monitor::new(dbr_type, header.count, mask));
                let value = value.unwrap_or(Value::Char(vec![]));
                self.write_value(header, true, CaStatus::Normal, &value)
            }
            ToolOutcome::Sync(Err(CaError::Fatal(ErrorKind::Status(CaStatus::AllocationFailed)))) => {
                self.destroy_channel(sid, true);
                Ok(())
            }
            ToolOutcome::Sync(Err(err)) => self.fail_request(header, true, err),
            ToolOutcome::AsyncStarted => Ok(()),
            ToolOutcome::Postpone => {
                self.async_io.block_on_channel(
                    sid,
                    Pending {
                        header,
                        action: PendingAction::EventAdd,
                        payload: payload.to_vec(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Event-cancel's acknowledgement -- success or failure -- is always
    /// framed as an event-add response with zero payload, never as an
    /// echo of the cancel command itself.
    fn event_cancel_action(&mut self, header: Header) -> CaResult<()> {
        let sid = match self.lookup_channel(&header) {
            Ok(sid) => sid,
            Err(_) => {
                self.disconnect_requested = true;
                return Ok(());
            }
        };
        let channel = self.channels.get_mut(sid).unwrap();
        let monitor_id = MonitorId(header.id2);
        let ack = Header {
            command: CaCommand::EventAdd as u16,
            ..header
        };
        if !channel.uninstall_monitor(monitor_id) {
            return self.fail_request(ack, true, CaError::Fatal(ErrorKind::BadMonitorId));
        }
        self.write_empty(ack)
    }

    /// Fan-outs a PV value change to every monitor installed on `sid`
    /// whose event mask intersects `cause`. Grounded on spec.md 4.I.
    pub fn notify_pv_update(&mut self, sid: ChannelId, cause: EventMask) -> CaResult<()> {
        let channel = match self.channels.get(sid) {
            Some(channel) => channel,
            None => return Ok(()),
        };
        let matching: Vec<(MonitorId, DbrType, u32)> = channel
            .monitors()
            .filter(|(_, monitor)| monitor.mask.intersects(cause))
            .map(|(id, monitor)| (*id, monitor.dbr_type, monitor.count))
            .collect();
        if matching.is_empty() {
            return Ok(());
        }

        self.output.push_ctx();
        for (monitor_id, dbr_type, count) in matching {
            let header = Header {
                command: CaCommand::EventAdd as u16,
                data_type: dbr_type as u16,
                count,
                payload_size: 0,
                id1: sid.0,
                id2: monitor_id.0,
            };
            if let Err(err) = self.monitor_response(sid, header, dbr_type, count) {
                self.output.pop_ctx();
                return Err(err);
            }
        }
        self.output.pop_ctx();
        Ok(())
    }

    /// The per-monitor delivery path (`monitorResponse`): access check,
    /// re-read at the monitor's own type/count, same at-most-once
    /// failure discipline as read-notify.
    fn monitor_response(&mut self, sid: ChannelId, header: Header, dbr_type: DbrType, count: u32) -> CaResult<()> {
        let channel = self.channels.get_mut(sid).unwrap();
        if !channel.read_access() {
            return self.fail_request(header, true, CaError::from(CaStatus::NoReadAccess));
        }

        let mut ctx = crate::context::RequestContext::new(header);
        let outcome = channel.pv_mut().read(&mut ctx, dbr_type, count);

        match outcome {
            ToolOutcome::Sync(Ok(value)) => {
                let value = value.unwrap_or(Value::Char(vec![]));
                self.write_value(header, true, CaStatus::Normal, &value)
            }
            ToolOutcome::Sync(Err(err)) => self.fail_request(header, true, err),
            ToolOutcome::AsyncStarted => Ok(()),
            ToolOutcome::Postpone => {
                self.async_io.block_on_channel(
                    sid,
                    Pending {
                        header,
                        action: PendingAction::EventAdd,
                        payload: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn clear_channel_action(&mut self, header: Header) -> CaResult<()> {
        // Confirm first, then destroy silently: lets the client finalize
        // its side even if the server tool already deleted the PV.
        self.write_empty(header)?;
        if let Ok(sid) = self.lookup_channel(&header) {
            self.destroy_channel(sid, false);
        }
        Ok(())
    }

    fn events_on_action(&mut self, header: Header) -> CaResult<()> {
        self.events_enabled = true;
        self.write_empty(header)
    }

    fn events_off_action(&mut self, header: Header) -> CaResult<()> {
        self.events_enabled = false;
        self.write_empty(header)
    }

    fn read_sync_action(&mut self, header: Header) -> CaResult<()> {
        for channel in self.channels.values_mut() {
            channel.clear_outstanding_reads();
        }
        self.write_empty(header)
    }

    fn host_name_action(&mut self, header: Header, payload: &[u8]) -> CaResult<()> {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        self.host_name = String::from_utf8_lossy(&payload[..end]).into_owned();
        let _ = header;
        Ok(())
    }

    fn client_name_action(&mut self, header: Header, payload: &[u8]) -> CaResult<()> {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        self.user_name = String::from_utf8_lossy(&payload[..end]).into_owned();
        let _ = header;
        Ok(())
    }

    /// Destroys a channel, optionally notifying the client (server-tool
    /// initiated destruction notifies; client-driven clear already
    /// confirmed separately and destroys silently). Per-version gating
    /// matches spec.md 4.J/6: a 4.7+ client gets a dedicated
    /// server-disconnect frame naming the channel; an older client has no
    /// per-channel notion of it and is disconnected outright instead.
    pub(crate) fn destroy_channel(&mut self, sid: ChannelId, notify: bool) {
        if let Some(channel) = self.channels.get_mut(sid) {
            channel.pv_mut().detach_channel(sid);
            let cid = channel.cid();
            self.cid_index.shift_remove(&cid);
        }
        self.channels.remove(sid);
        self.async_io.forget_channel(sid);
        if notify {
            if self.minor_version >= SERVER_DISCONNECT_MINOR_VERSION {
                let header = Header {
                    command: CaCommand::ServerDisconnect as u16,
                    data_type: 0,
                    count: 0,
                    payload_size: 0,
                    id1: sid.0,
                    id2: 0,
                };
                let _ = self.write_empty(header);
            } else {
                self.disconnect_requested = true;
            }
        }
    }

    fn fail_request(&mut self, header: Header, notify: bool, error: CaError) -> CaResult<()> {
        if error == CaError::Wait {
            return Err(CaError::Wait);
        }
        let status = error.status();

        if notify {
            self.output.push_ctx();
            self.write_status(header, status)?;
            // Best-effort companion warning: logged locally rather than
            // propagated if the buffer has no room for it right now.
            if let Err(err) = self.send_error(header, status, status.message()) {
                slog::warn!(self.log, "dropped companion warning exception"; "reason" => format!("{:?}", err));
            }
            self.output.pop_ctx();
            Ok(())
        } else {
            self.send_error(header, status, status.message())
        }
    }

    /// Re-drives one request parked on `sid`'s blocked list, once
    /// whatever it was waiting for has resolved. `notify` for
    /// read/write is recovered from the original command rather than
    /// stored separately, since the header already carries it. A claim
    /// pending's header carries the client's CID in `id1` (claim headers
    /// never carry a SID), so `sid` -- the key the pending was parked
    /// under -- is threaded in separately rather than read back out of
    /// the header.
    fn redrive_channel_pending(&mut self, sid: ChannelId, pending: Pending) -> CaResult<()> {
        let notify = matches!(pending.header.command(), Some(CaCommand::ReadNotify) | Some(CaCommand::WriteNotify));
        match pending.action {
            PendingAction::Read => self.read_action(pending.header, notify),
            PendingAction::Write => self.write_action(pending.header, &pending.payload, notify),
            PendingAction::EventAdd => self.event_add_action(pending.header, &pending.payload),
            PendingAction::ClaimFinalize => {
                let cid = match self.channels.get(sid) {
                    Some(channel) => channel.cid(),
                    None => return Ok(()),
                };
                self.finalize_claim(pending.header, cid, sid)
            }
            PendingAction::ClaimEnumTable => Ok(()),
        }
    }

    /// Drains every request parked on `sid`'s blocked list and re-drives
    /// it. Call this once the application has resolved whatever it
    /// returned `asyncStarted`/`postpone` for on that channel's PV.
    pub fn complete_channel_io(&mut self, sid: ChannelId) -> CaResult<()> {
        for pending in self.async_io.drain_channel(sid) {
            self.redrive_channel_pending(sid, pending)?;
        }
        Ok(())
    }
}
