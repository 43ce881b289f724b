use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::first_conflict;
use super::error::ConflictReason;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// `check_out` must be strictly after `check_in`, and the stay bounded.
pub(crate) fn validate_range(check_in: NaiveDate, check_out: NaiveDate) -> Result<DateRange, EngineError> {
    use crate::limits::MAX_STAY_NIGHTS;
    if check_out <= check_in {
        return Err(EngineError::Validation(
            "check-out date must be after check-in date".into(),
        ));
    }
    let range = DateRange::new(check_in, check_out);
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(range)
}

/// Fail with `Conflict` if any other active booking on the room overlaps `range`.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(rs, range, exclude) {
        Some(booking_id) => Err(EngineError::Conflict {
            room_id: rs.id(),
            reason: ConflictReason::Overlap { booking_id },
        }),
        None => Ok(()),
    }
}
