use chrono::NaiveDate;

use crate::model::*;

// ── Slot generation ───────────────────────────────────────────────

/// Candidate start times on `date`, `granularity` apart from the start of the
/// working window, each leaving room for `duration` before the window ends.
/// Empty on a day off.
pub fn generate_slots(
    schedule: &WeeklySchedule,
    date: NaiveDate,
    duration: Minute,
    granularity: Minute,
) -> Vec<Minute> {
    let Some(window) = schedule.window_on(date) else {
        return Vec::new();
    };
    if duration == 0 || granularity == 0 {
        return Vec::new();
    }
    let mut slots = Vec::new();
    let mut t = window.start;
    while t + duration <= window.end {
        slots.push(t);
        t += granularity;
    }
    slots
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Parts of `target` not covered by any of `taken` (unsorted, may overlap).
pub fn uncovered(target: Span, mut taken: Vec<Span>) -> Vec<Span> {
    taken.sort_by_key(|s| s.start);
    subtract_intervals(&[target], &merge_overlapping(&taken))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    const H: Minute = 60;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn weekdays_8_to_17() -> WeeklySchedule {
        WeeklySchedule::on(
            &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            8 * H,
            17 * H,
        )
    }

    // ── generate_slots ──────────────────────────────────

    #[test]
    fn slots_fill_working_window() {
        // 2024-06-03 is a Monday
        let slots = generate_slots(&weekdays_8_to_17(), d(2024, 6, 3), 30, 30);
        assert_eq!(slots.len(), 18);
        assert_eq!(slots.first(), Some(&(8 * H)));
        assert_eq!(slots.last(), Some(&(16 * H + 30)));
    }

    #[test]
    fn slots_leave_room_for_duration() {
        let slots = generate_slots(&weekdays_8_to_17(), d(2024, 6, 3), 90, 30);
        // last start is 15:30 so the slot ends exactly at 17:00
        assert_eq!(slots.last(), Some(&(15 * H + 30)));
        assert!(slots.iter().all(|t| t + 90 <= 17 * H));
    }

    #[test]
    fn slots_empty_on_day_off() {
        // 2024-06-08 is a Saturday
        assert!(generate_slots(&weekdays_8_to_17(), d(2024, 6, 8), 30, 30).is_empty());
    }

    #[test]
    fn slots_empty_when_duration_exceeds_window() {
        let schedule = WeeklySchedule::on(&[Weekday::Mon], 8 * H, 9 * H);
        assert!(generate_slots(&schedule, d(2024, 6, 3), 61, 15).is_empty());
        assert_eq!(generate_slots(&schedule, d(2024, 6, 3), 60, 15), vec![8 * H]);
    }

    #[test]
    fn slots_respect_granularity() {
        let schedule = WeeklySchedule::on(&[Weekday::Mon], 8 * H, 9 * H);
        assert_eq!(
            generate_slots(&schedule, d(2024, 6, 3), 20, 20),
            vec![8 * H, 8 * H + 20, 8 * H + 40]
        );
    }

    // ── subtract_intervals ──────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let result = subtract_intervals(&base, &[Span::new(200, 300)]);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        let result = subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        let result = subtract_intervals(&[Span::new(0, 1000)], &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping / uncovered ───────────────────

    #[test]
    fn merge_overlapping_and_adjacent() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(400, 450), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 450), Span::new(500, 600)]
        );
    }

    #[test]
    fn uncovered_handles_unsorted_overlapping_input() {
        let taken = vec![Span::new(600, 660), Span::new(500, 620), Span::new(900, 960)];
        assert_eq!(
            uncovered(Span::new(480, 1020), taken),
            vec![Span::new(480, 500), Span::new(660, 900), Span::new(960, 1020)]
        );
    }
}
