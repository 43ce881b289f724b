use ulid::Ulid;

use crate::model::{BookingAction, BookingStatus};

/// Why a booking write was refused on a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// An active booking already covers part of the requested range.
    Overlap { booking_id: Ulid },
    /// Concurrent writers kept the room busy through every retry.
    Contention,
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    /// Duplicate unique key (room number, guest email, record id).
    Duplicate {
        field: &'static str,
        value: String,
    },
    NotFound {
        entity: &'static str,
        id: Ulid,
    },
    Conflict {
        room_id: Ulid,
        reason: ConflictReason,
    },
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        action: BookingAction,
    },
    /// Lost a race for a record (lock timeout, or the record moved while
    /// waiting). Retried inside the engine; callers only see `Conflict`.
    StorageConflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    #[cfg(test)]
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Duplicate { field, value } => {
                write!(f, "duplicate {field}: {value}")
            }
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::Conflict { room_id, reason } => match reason {
                ConflictReason::Overlap { booking_id } => write!(
                    f,
                    "room {room_id} is not available for the selected dates (booking {booking_id})"
                ),
                ConflictReason::Contention => {
                    write!(f, "room {room_id} is busy with concurrent writes, try again")
                }
            },
            EngineError::InvalidTransition { id, from, action } => write!(
                f,
                "cannot {} booking {id}: status is {}",
                action.label(),
                from.as_str()
            ),
            EngineError::StorageConflict(id) => write!(f, "storage conflict on {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
