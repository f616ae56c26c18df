use ulid::Ulid;

use crate::model::TimeRange;
use crate::permission::PermissionDenied;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// Passed through unchanged from the permission checker.
    Forbidden(PermissionDenied),
    Overlap(TimeRange),
    InvalidRange(TimeRange),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "operating hours not found: {id}"),
            EngineError::Forbidden(denied) => write!(f, "forbidden: {denied}"),
            EngineError::Overlap(range) => {
                write!(f, "operating hours cannot overlap: conflicts in the range of {range}")
            }
            EngineError::InvalidRange(range) => {
                write!(f, "invalid range {range}: start must be before end")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Forbidden(denied) => Some(denied),
            _ => None,
        }
    }
}

impl From<PermissionDenied> for EngineError {
    fn from(denied: PermissionDenied) -> Self {
        EngineError::Forbidden(denied)
    }
}
