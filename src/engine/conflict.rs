use crate::hours::OperatingHours;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Check a requested range against the time policy and turn it into a span.
pub(crate) fn validate_booking_span(
    hours: &OperatingHours,
    start: Ms,
    end: Ms,
) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::Validation(
            "end time must be after start time".into(),
        ));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    if !hours.admits(&span) {
        return Err(EngineError::Validation(format!(
            "bookings must start and end within operating hours ({hours})"
        )));
    }
    Ok(span)
}

pub(crate) fn validate_user_name(user_name: &str) -> Result<&str, EngineError> {
    let user_name = user_name.trim();
    if user_name.is_empty() {
        return Err(EngineError::Validation("user name must not be empty".into()));
    }
    if user_name.len() > MAX_USER_NAME_LEN {
        return Err(EngineError::LimitExceeded("user name too long"));
    }
    Ok(user_name)
}

/// Any existing booking with `existing.start < span.end && existing.end > span.start`
/// is a conflict.
pub(crate) fn check_no_conflict(rs: &RoomState, span: &Span) -> Result<(), EngineError> {
    match rs.overlapping(span).next() {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}
