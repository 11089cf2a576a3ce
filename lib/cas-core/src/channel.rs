use indexmap::IndexMap;

use crate::monitor::{Monitor, MonitorId};
use crate::pv::{AccessRights, Pv};

/// Server-chosen channel identifier (the `id2`/SID the client addresses
/// the channel by once claimed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

impl From<u32> for ChannelId {
    fn from(value: u32) -> ChannelId {
        ChannelId(value)
    }
}

/// Client-chosen channel identifier, valid for the lifetime of the claim
/// exchange and echoed back on clear-channel confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid(pub u32);

/// A client's binding to a PV (component F). Outstanding async reads are
/// tracked as a plain count; the real request state lives in whatever
/// `AsyncIoCoordinator` list the read was parked on.
pub struct Channel {
    cid: Cid,
    sid: ChannelId,
    access: AccessRights,
    pv: Box<dyn Pv>,
    monitors: IndexMap<MonitorId, Monitor>,
    outstanding_reads: u32,
}

impl Channel {
    pub fn new(cid: Cid, sid: ChannelId, pv: Box<dyn Pv>, access: AccessRights) -> Channel {
        Channel {
            cid,
            sid,
            access,
            pv,
            monitors: IndexMap::new(),
            outstanding_reads: 0,
        }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn sid(&self) -> ChannelId {
        self.sid
    }

    pub(crate) fn set_sid(&mut self, sid: ChannelId) {
        self.sid = sid;
    }

    pub fn pv_name(&self) -> &str {
        self.pv.name()
    }

    pub fn pv(&self) -> &dyn Pv {
        self.pv.as_ref()
    }

    pub fn pv_mut(&mut self) -> &mut dyn Pv {
        self.pv.as_mut()
    }

    pub fn access(&self) -> AccessRights {
        self.access
    }

    pub fn read_access(&self) -> bool {
        self.access.read
    }

    pub fn write_access(&self) -> bool {
        self.access.write
    }

    pub fn set_owner_access(&mut self, access: AccessRights) {
        self.access = access;
    }

    pub fn begin_read(&mut self) {
        self.outstanding_reads += 1;
    }

    pub fn end_read(&mut self) {
        self.outstanding_reads = self.outstanding_reads.saturating_sub(1);
    }

    pub fn outstanding_reads(&self) -> u32 {
        self.outstanding_reads
    }

    /// Drops all outstanding-read bookkeeping; called on disconnect and
    /// on an explicit read-sync request.
    pub fn clear_outstanding_reads(&mut self) {
        self.outstanding_reads = 0;
    }

    pub fn install_monitor(&mut self, id: MonitorId, monitor: Monitor) -> bool {
        if self.monitors.contains_key(&id) {
            return false;
        }
        self.monitors.insert(id, monitor);
        true
    }

    pub fn uninstall_monitor(&mut self, id: MonitorId) -> bool {
        self.monitors.shift_remove(&id).is_some()
    }

    pub fn monitors(&self) -> impl Iterator<Item = (&MonitorId, &Monitor)> {
        self.monitors.iter()
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }
}
