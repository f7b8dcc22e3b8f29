use chrono::{Datelike, NaiveDate};

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Validate a boundary `(start, duration)` pair into a span.
pub(crate) fn candidate_span(start: Minute, duration: Minute) -> Result<Span, EngineError> {
    if duration == 0 {
        return Err(EngineError::InvalidRange("duration must be positive"));
    }
    Span::from_duration(start, duration)
        .ok_or(EngineError::InvalidRange("slot must end by midnight"))
}

pub(crate) fn validate_dates(from: NaiveDate, to: NaiveDate, max_days: i64) -> Result<(), EngineError> {
    if to < from {
        return Err(EngineError::InvalidRange("end date before start date"));
    }
    if (to - from).num_days() >= max_days {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

/// Decide whether `span` on `date` is free for the practitioner and every
/// resource at once. Checks run in a fixed order and stop at the first hit:
/// practitioner appointments, availability blocks, resource maintenance,
/// resource bookings.
pub fn check_candidate(
    practitioner: &PractitionerState,
    resources: &[&ResourceState],
    date: NaiveDate,
    span: &Span,
) -> Result<(), Unavailable> {
    if let Some(a) = practitioner.active_overlapping(date, span).next() {
        return Err(Unavailable::Reserved {
            appointment_id: a.id,
            resource_id: None,
            interval: a.span,
        });
    }

    if let Some(block) = practitioner.block_covering(date, span) {
        return Err(Unavailable::Blocked {
            block_id: block.id,
            kind: block.kind,
            reason: block.reason.clone(),
        });
    }

    let weekday = date.weekday();
    for rs in resources {
        if let Some(w) = rs.maintenance_on(weekday, span) {
            return Err(Unavailable::Maintenance {
                resource_id: rs.id(),
                window: w.span,
            });
        }
    }

    for rs in resources {
        if let Some(b) = rs.overlapping(date, span).next() {
            return Err(Unavailable::Reserved {
                appointment_id: b.appointment_id,
                resource_id: Some(rs.id()),
                interval: b.span,
            });
        }
    }

    Ok(())
}

/// The span must sit inside the practitioner's working window for that weekday.
pub fn check_working_hours(schedule: &WeeklySchedule, date: NaiveDate, span: &Span) -> Result<(), Unavailable> {
    match schedule.window_on(date) {
        Some(window) if window.contains_span(span) => Ok(()),
        _ => Err(Unavailable::OffHours),
    }
}
