use cas_proto::error::CaResult;
use cas_proto::types::{DbrType, Value, ValueDescriptor};

use crate::channel::ChannelId;
use crate::context::RequestContext;

/// Read/write access a channel has been granted to its PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessRights {
    pub read: bool,
    pub write: bool,
}

/// The server tool's answer to an operation that may run asynchronously.
/// Mirrors the `{synchronous(ok/error), asyncStarted, postpone}` sum type
/// from spec.md section 9's capability-interface note.
pub enum ToolOutcome {
    /// Completed inline; `Ok` carries the value for reads, nothing for
    /// writes.
    Sync(CaResult<Option<Value>>),
    /// The real answer arrives later; the embedding application calls
    /// `StreamClient::complete_channel_io`/`complete_attach` once it has
    /// one, which re-drives the original request.
    AsyncStarted,
    /// The server tool cannot proceed right now; enqueue and retry later.
    Postpone,
}

/// The contract a server-tool PV must satisfy. The client never owns the
/// PV -- it only ever holds a handle into the application's registry.
pub trait Pv {
    /// Stable PV name, used in claim responses and diagnostics.
    fn name(&self) -> &str;

    /// The type/count the PV would prefer to answer with when the client
    /// doesn't request a specific conversion.
    fn best_type(&self) -> DbrType;
    fn native_count(&self) -> u32;

    /// Access this channel has to the PV; queried fresh on claim.
    fn access(&self, user: &str, host: &str) -> AccessRights;

    /// Begins a read of `dbr_type`/`count` into the caller's context.
    fn read(&mut self, ctx: &mut RequestContext, dbr_type: DbrType, count: u32) -> ToolOutcome;

    /// Begins a write of `descriptor` into the PV. The descriptor has
    /// already been stamped with the request's status/severity/timestamp
    /// by the dispatcher.
    fn write(&mut self, ctx: &mut RequestContext, descriptor: ValueDescriptor) -> ToolOutcome;

    /// For enum PVs, refreshes the cached state-name table. Non-enum PVs
    /// answer synchronously with `None`.
    fn update_enum_string_table(&mut self, ctx: &mut RequestContext) -> ToolOutcome;

    /// Notifies the PV that `channel` is bound to it, for PVs that track
    /// their attached channels (monitor fan-out uses this list).
    fn attach_channel(&mut self, channel: ChannelId);
    fn detach_channel(&mut self, channel: ChannelId);
}
