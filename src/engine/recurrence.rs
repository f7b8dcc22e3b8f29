use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::limits::{MAX_OCCURRENCES, MAX_RECURRENCE_DAYS};
use crate::model::*;

use super::EngineError;

/// Turn a recurrence request into concrete dates, in order, at most
/// `max_occurrences` of them.
///
/// Every day of `[start, end]` is tried. A day survives if its weekday is
/// permitted (an empty list permits all) and the cadence keeps it:
/// - daily: always
/// - weekly: weekday equals the first permitted weekday
/// - biweekly: as weekly, in even weeks counted from `start`
/// - monthly: day-of-month equals that of `start`
///
/// The walk never goes past the `MAX_RECURRENCE_DAYS` horizon; an end date
/// beyond it is cut there and reported as `limit_reached`, as is a cap above
/// `MAX_OCCURRENCES`.
pub fn expand_recurrence(request: &RecurrenceRequest) -> Result<Expansion, EngineError> {
    if request.max_occurrences == 0 {
        return Err(EngineError::InvalidRange("max occurrences must be positive"));
    }
    if let Some(end) = request.end
        && end < request.start
    {
        return Err(EngineError::InvalidRange("end date before start date"));
    }
    let cap = request.max_occurrences.min(MAX_OCCURRENCES);
    let horizon = request
        .start
        .checked_add_days(Days::new(MAX_RECURRENCE_DAYS as u64 - 1))
        .unwrap_or(NaiveDate::MAX);
    let (end, cut) = match request.end {
        Some(end) if end > horizon => (horizon, true),
        Some(end) => (end, false),
        None => (horizon, false),
    };
    let anchor = request
        .weekdays
        .first()
        .copied()
        .unwrap_or_else(|| request.start.weekday());

    let mut dates = Vec::new();
    let mut limit_reached = cut;
    for date in request.start.iter_days().take_while(|d| *d <= end) {
        if !keeps(request, anchor, date) {
            continue;
        }
        if dates.len() as u32 == cap {
            limit_reached = true;
            break;
        }
        dates.push(date);
    }

    Ok(Expansion { dates, limit_reached })
}

fn keeps(request: &RecurrenceRequest, anchor: Weekday, date: NaiveDate) -> bool {
    let weekday = date.weekday();
    if !request.weekdays.is_empty() && !request.weekdays.contains(&weekday) {
        return false;
    }
    match request.pattern {
        RecurrencePattern::Daily => true,
        RecurrencePattern::Weekly => weekday == anchor,
        RecurrencePattern::Biweekly => {
            weekday == anchor && ((date - request.start).num_days() / 7) % 2 == 0
        }
        RecurrencePattern::Monthly => date.day() == request.start.day(),
    }
}
