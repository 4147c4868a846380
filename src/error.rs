use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::planner::SegmentKind;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid start time {0:?}, expected HH:MM")]
    InvalidTimeFormat(String),

    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("failed to launch encoder for {kind} segment: {source}")]
    LaunchFailure {
        kind: SegmentKind,
        #[source]
        source: io::Error,
    },

    #[error("could not probe duration of {path:?}: {message}")]
    ProbeFailure { path: PathBuf, message: String },

    #[error("encoder pid {pid:?} still running {secs}s after terminate")]
    TerminationTimeout { pid: Option<u32>, secs: u64 },

    #[error("waiting clip render exited with code {0:?}")]
    RenderFailure(Option<i32>),

    #[error("a session is already running")]
    AlreadyRunning,

    #[error("{active} segment is still streaming")]
    EncoderBusy { active: SegmentKind },

    #[error("session cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Terminal error categories reported on the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidTimeFormat,
    MissingInput,
    LaunchFailure,
    ProbeFailure,
    TerminationTimeout,
    RenderFailure,
    Internal,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidTimeFormat(_) => ErrorKind::InvalidTimeFormat,
            SessionError::MissingInput(_) => ErrorKind::MissingInput,
            SessionError::LaunchFailure { .. } => ErrorKind::LaunchFailure,
            SessionError::ProbeFailure { .. } => ErrorKind::ProbeFailure,
            SessionError::TerminationTimeout { .. } => ErrorKind::TerminationTimeout,
            SessionError::RenderFailure(_) => ErrorKind::RenderFailure,
            SessionError::AlreadyRunning
            | SessionError::EncoderBusy { .. }
            | SessionError::Cancelled
            | SessionError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<SessionError> for tonic::Status {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTimeFormat(_) | SessionError::MissingInput(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            SessionError::AlreadyRunning => tonic::Status::failed_precondition(err.to_string()),
            SessionError::Cancelled => tonic::Status::cancelled(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}
