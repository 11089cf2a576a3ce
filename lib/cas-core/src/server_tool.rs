use crate::context::RequestContext;
use crate::pv::Pv;

/// The server tool's answer to a claim request's `pvAttach` call.
pub enum AttachOutcome {
    /// The PV exists; hand over ownership of a handle to it.
    Found(Box<dyn Pv>),
    /// No PV by that name is known to the application.
    NotFound,
    /// The real answer arrives later via `AsyncIoCoordinator`.
    AsyncStarted,
    /// The application cannot answer right now; enqueue and retry later.
    Postpone,
}

/// The application embedding this library. The client never constructs
/// or owns a `Pv` directly -- it only ever reaches one through
/// `attach`, mirroring spec.md's "PV (external)" contract.
pub trait ServerTool {
    fn attach(&mut self, ctx: &mut RequestContext, pv_name: &str) -> AttachOutcome;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::pv::mock::MockPv;
    use cas_proto::types::Value;
    use std::collections::HashMap;

    pub struct MockServerTool {
        pub values: HashMap<String, Value>,
    }

    impl MockServerTool {
        pub fn new() -> MockServerTool {
            MockServerTool { values: HashMap::new() }
        }

        pub fn with_pv(mut self, name: &str, value: Value) -> Self {
            self.values.insert(name.to_string(), value);
            self
        }
    }

    impl ServerTool for MockServerTool {
        fn attach(&mut self, _ctx: &mut RequestContext, pv_name: &str) -> AttachOutcome {
            match self.values.get(pv_name) {
                Some(value) => AttachOutcome::Found(Box::new(MockPv::new(pv_name, value.clone()))),
                None => AttachOutcome::NotFound,
            }
        }
    }
}
