use ulid::Ulid;

use crate::model::{ResourceKey, ValidationError};

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    Conflict { entry_id: Ulid, resource: ResourceKey },
    NotFound(Ulid),
    Inactive(Ulid),
    CourseNotFound(String),
    InstructorNotFound(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "invalid schedule entry: {e}"),
            EngineError::Conflict { entry_id, resource } => {
                write!(f, "{resource} is already booked by schedule entry {entry_id}")
            }
            EngineError::NotFound(id) => write!(f, "schedule entry not found: {id}"),
            EngineError::Inactive(id) => write!(f, "schedule entry {id} is inactive"),
            EngineError::CourseNotFound(c) => write!(f, "course not found: {c}"),
            EngineError::InstructorNotFound(i) => write!(f, "instructor not found: {i}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
