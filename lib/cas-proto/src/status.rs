/// Status codes carried in response headers and warning-exception frames.
///
/// Named after the `ECA_*` family the stream client itself raises; this is
/// not the full CA status table, only the subset the request processor can
/// produce on its own (a PV's own tool-specific failures are reported
/// through the same codes via `ServerToolResult::Error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CaStatus {
    Normal = 0,
    BadChannelId = 1,
    BadCount = 2,
    BadType = 3,
    InternalError = 4,
    AllocationFailed = 5,
    NoReadAccess = 6,
    NoWriteAccess = 7,
    Defunct = 8,
    BadMonitorId = 9,
    BadEventMask = 10,
    GetFailed = 11,
    PutFailed = 12,
    NoConvert = 13,
    TooLarge = 14,
}

impl CaStatus {
    pub fn message(self) -> &'static str {
        match self {
            CaStatus::Normal => "normal successful completion",
            CaStatus::BadChannelId => "invalid channel identifier",
            CaStatus::BadCount => "requested count invalid",
            CaStatus::BadType => "data type invalid",
            CaStatus::InternalError => "internal failure defies categorization",
            CaStatus::AllocationFailed => "unable to allocate required resource",
            CaStatus::NoReadAccess => "no read access",
            CaStatus::NoWriteAccess => "no write access",
            CaStatus::Defunct => "requested feature is no longer supported",
            CaStatus::BadMonitorId => "bad monitor subscription identifier",
            CaStatus::BadEventMask => "invalid event selection mask",
            CaStatus::GetFailed => "a get operation failed",
            CaStatus::PutFailed => "a put operation failed",
            CaStatus::NoConvert => "unable to perform requested type conversion",
            CaStatus::TooLarge => "requested transfer exceeds available capacity",
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == CaStatus::Normal
    }
}

impl Default for CaStatus {
    fn default() -> Self {
        CaStatus::Normal
    }
}
