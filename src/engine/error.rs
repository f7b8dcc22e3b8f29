use thiserror::Error;
use ulid::Ulid;

use crate::model::Unavailable;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slot unavailable: {0}")]
    SlotUnavailable(Unavailable),
    #[error("invalid range: {0}")]
    InvalidRange(&'static str),
    #[error("practitioner not found: {0}")]
    PractitionerNotFound(Ulid),
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("appointment not found: {0}")]
    AppointmentNotFound(Ulid),
    #[error("availability block not found: {0}")]
    BlockNotFound(Ulid),
    #[error("waiting-list entry not found: {0}")]
    WaitlistEntryNotFound(Ulid),
    #[error("patient not found: {0}")]
    PatientNotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("{id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: &'static str,
        to: &'static str,
    },
    #[error("waiting-list entry {0} has not been contacted")]
    NotContacted(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Conflicts and bad input are for the caller to re-prompt on; only
    /// storage failures put the current operation in doubt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    pub fn unavailable(&self) -> Option<&Unavailable> {
        match self {
            EngineError::SlotUnavailable(u) => Some(u),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
