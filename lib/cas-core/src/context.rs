use cas_proto::wire::Header;

use crate::channel::ChannelId;

/// Per-request transient state (component data model "Request context").
/// Lives for the duration of one dispatched action; holds the decoded
/// header and the channel it was resolved against, if any.
pub struct RequestContext {
    pub header: Header,
    pub channel: Option<ChannelId>,
}

impl RequestContext {
    pub fn new(header: Header) -> RequestContext {
        RequestContext { header, channel: None }
    }

    pub fn bind(&mut self, channel: ChannelId) {
        self.channel = Some(channel);
    }
}
