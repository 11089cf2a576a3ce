use std::io;

use crate::status::CaStatus;

pub type CaResult<T> = Result<T, CaError>;

/// Split mirrors `flux::shared::NetworkError`: a `Wait` outcome is not a
/// failure, it just means the caller should try again once there is room
/// or data; everything else is `Fatal` and tears the connection or the
/// request down.
#[derive(Debug, Eq, PartialEq)]
pub enum CaError {
    Wait,
    Fatal(ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The wire frame claims a size/count larger than the output buffer
    /// can ever hold (`hugeRequest` in the original).
    TooLarge,
    /// The frame was well formed but named a channel/monitor id that is
    /// not installed on this client.
    BadChannelId,
    BadMonitorId,
    /// The frame's declared data type or count made no sense for the
    /// requested operation.
    BadType,
    BadCount,
    BadEventMask,
    /// Protocol version on this connection is too old for the request
    /// being attempted.
    VersionMismatch,
    /// The command code is not one this dispatcher recognizes.
    UnknownCommand,
    Status(CaStatus),
    Io(io::ErrorKind),
}

impl From<io::Error> for CaError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => CaError::Wait,
            kind => CaError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

impl From<CaStatus> for CaError {
    #[inline]
    fn from(status: CaStatus) -> Self {
        CaError::Fatal(ErrorKind::Status(status))
    }
}

impl CaError {
    /// Maps the error onto the status code that belongs in the wire
    /// response, if any ("Wait" never reaches the wire).
    pub fn status(&self) -> CaStatus {
        match self {
            CaError::Wait => CaStatus::Normal,
            CaError::Fatal(kind) => match kind {
                ErrorKind::TooLarge => CaStatus::TooLarge,
                ErrorKind::BadChannelId => CaStatus::BadChannelId,
                ErrorKind::BadMonitorId => CaStatus::BadMonitorId,
                ErrorKind::BadType => CaStatus::BadType,
                ErrorKind::BadCount => CaStatus::BadCount,
                ErrorKind::BadEventMask => CaStatus::BadEventMask,
                ErrorKind::VersionMismatch => CaStatus::Defunct,
                ErrorKind::UnknownCommand => CaStatus::InternalError,
                ErrorKind::Status(status) => *status,
                ErrorKind::Io(_) => CaStatus::InternalError,
            },
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for CaResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(CaError::Wait) => false,
            _ => true,
        }
    }
}
