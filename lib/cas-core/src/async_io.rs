use indexmap::IndexMap;

use cas_proto::wire::Header;

use crate::channel::ChannelId;

/// The action a parked request should be re-driven as once its blocking
/// condition clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Read,
    Write,
    EventAdd,
    /// A claim parked on `tool.attach` -- lives on the attach list since
    /// there is no channel yet to hang it off.
    ClaimEnumTable,
    /// A claim already has its channel, parked on the enum string table
    /// fetch during `finish_claim` -- lives on the per-channel list.
    ClaimFinalize,
}

/// One parked request: the original header is preserved so the eventual
/// response can reuse the same CID/type/count/available fields the
/// client originally sent, and the original payload is preserved so a
/// re-drive can re-run the action exactly as the client sent it (reads
/// carry no payload; writes, event-adds and claims do).
#[derive(Debug, Clone)]
pub struct Pending {
    pub header: Header,
    pub action: PendingAction,
    pub payload: Vec<u8>,
}

/// Tracks requests parked on `postponeAsyncIO`. Mirrors the asymmetry the
/// original exhibits: channel attach (claim) postponement is tracked at
/// server scope since there is no channel yet to hang the list off of;
/// read/event-add postponement is tracked per PV (here: per channel,
/// since in this crate a PV is only ever reached through a channel).
pub struct AsyncIoCoordinator {
    attach_blocked: Vec<Pending>,
    pv_blocked: IndexMap<ChannelId, Vec<Pending>>,
}

impl AsyncIoCoordinator {
    pub fn new() -> AsyncIoCoordinator {
        AsyncIoCoordinator {
            attach_blocked: Vec::new(),
            pv_blocked: IndexMap::new(),
        }
    }

    pub fn block_attach(&mut self, pending: Pending) {
        self.attach_blocked.push(pending);
    }

    pub fn drain_attach(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.attach_blocked)
    }

    /// Enqueues a request on the named channel's blocked list. A request
    /// is on exactly one list at a time -- callers must not call this
    /// twice for the same header without first draining it.
    pub fn block_on_channel(&mut self, channel: ChannelId, pending: Pending) {
        self.pv_blocked.entry(channel).or_insert_with(Vec::new).push(pending);
    }

    /// Removes and returns every request parked on `channel`, in the
    /// order they were enqueued (FIFO re-drive order).
    pub fn drain_channel(&mut self, channel: ChannelId) -> Vec<Pending> {
        self.pv_blocked.shift_remove(&channel).unwrap_or_default()
    }

    pub fn is_blocked_on_channel(&self, channel: ChannelId) -> bool {
        self.pv_blocked.get(&channel).map_or(false, |v| !v.is_empty())
    }

    /// Drops every pending entry for `channel`, used on channel teardown
    /// so the server tool never calls back into a destroyed channel via
    /// a stale pending entry.
    pub fn forget_channel(&mut self, channel: ChannelId) {
        self.pv_blocked.shift_remove(&channel);
    }
}

impl Default for AsyncIoCoordinator {
    fn default() -> Self {
        AsyncIoCoordinator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_proto::wire::CaCommand;

    fn header() -> Header {
        Header {
            command: CaCommand::Read as u16,
            data_type: 6,
            count: 1,
            payload_size: 0,
            id1: 1,
            id2: 2,
        }
    }

    #[test]
    fn request_parked_on_exactly_one_channel_list() {
        let mut coord = AsyncIoCoordinator::new();
        let channel = ChannelId(5);
        coord.block_on_channel(
            channel,
            Pending {
                header: header(),
                action: PendingAction::Read,
                payload: Vec::new(),
            },
        );
        assert!(coord.is_blocked_on_channel(channel));
        let drained = coord.drain_channel(channel);
        assert_eq!(drained.len(), 1);
        assert!(!coord.is_blocked_on_channel(channel));
    }

    #[test]
    fn attach_blocked_list_is_server_scoped() {
        let mut coord = AsyncIoCoordinator::new();
        coord.block_attach(Pending {
            header: header(),
            action: PendingAction::ClaimEnumTable,
            payload: Vec::new(),
        });
        coord.block_attach(Pending {
            header: header(),
            action: PendingAction::ClaimEnumTable,
            payload: Vec::new(),
        });
        assert_eq!(coord.drain_attach().len(), 2);
        assert_eq!(coord.drain_attach().len(), 0);
    }

    #[test]
    fn forget_channel_drops_pending_without_redriving() {
        let mut coord = AsyncIoCoordinator::new();
        let channel = ChannelId(7);
        coord.block_on_channel(
            channel,
            Pending {
                header: header(),
                action: PendingAction::EventAdd,
                payload: Vec::new(),
            },
        );
        coord.forget_channel(channel);
        assert!(!coord.is_blocked_on_channel(channel));
    }
}
