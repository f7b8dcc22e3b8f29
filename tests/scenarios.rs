use std::sync::Arc;

use chrono::{NaiveDate, Weekday};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use slotbook::engine::{Engine, EngineError, expand_recurrence};
use slotbook::journal::MemoryJournal;
use slotbook::model::*;
use slotbook::notify::NotifyHub;

const H: Minute = 60;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

// 2024-06-03 is a Monday.
fn monday() -> NaiveDate {
    d(2024, 6, 3)
}

struct Clinic {
    engine: Engine,
    practitioner: Ulid,
}

async fn clinic() -> Clinic {
    let engine = Engine::new(Arc::new(MemoryJournal::new()), Arc::new(NotifyHub::new()));
    let practitioner = Ulid::new();
    assert_ok!(
        engine
            .register_practitioner(Practitioner {
                id: practitioner,
                name: "Dr. Ramos".into(),
                specialty: "general practice".into(),
                schedule: WeeklySchedule::on(
                    &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                    8 * H,
                    17 * H,
                ),
            })
            .await
    );
    Clinic { engine, practitioner }
}

impl Clinic {
    async fn book(&self, date: NaiveDate, start: Minute, duration: Minute, resources: &[Ulid]) -> Result<Appointment, EngineError> {
        self.engine
            .reserve_slot(
                date,
                &SlotRequest {
                    practitioner_id: self.practitioner,
                    patient_id: Ulid::new(),
                    start,
                    duration,
                    resource_ids: resources.to_vec(),
                },
            )
            .await
    }

    async fn equipment(&self, maintenance: Vec<MaintenanceWindow>) -> Ulid {
        let id = Ulid::new();
        assert_ok!(
            self.engine
                .register_resource(SharedResource {
                    id,
                    name: "ECG machine".into(),
                    kind: ResourceKind::Equipment,
                    maintenance,
                })
                .await
        );
        id
    }
}

#[tokio::test]
async fn saturday_returns_no_slots() {
    let c = clinic().await;
    let slots = assert_ok!(c.engine.available_slots(c.practitioner, d(2024, 6, 8), 30, &[]).await);
    assert!(slots.is_empty());
}

#[tokio::test]
async fn existing_booking_is_reported_with_its_interval() {
    let c = clinic().await;
    assert_ok!(c.book(monday(), 10 * H, 30, &[]).await);

    let at_ten = assert_ok!(c.engine.check_availability(c.practitioner, monday(), 10 * H, 30, &[]).await);
    match at_ten {
        Availability::Unavailable(reason) => {
            assert_eq!(reason.tag(), "reserved");
            assert_eq!(reason.detail(), "10:00-10:30");
        }
        Availability::Available => panic!("10:00 should be taken"),
    }
    let at_half_past = assert_ok!(c.engine.check_availability(c.practitioner, monday(), 10 * H + 30, 30, &[]).await);
    assert_eq!(at_half_past, Availability::Available);
}

#[tokio::test]
async fn weekly_mondays_over_three_weeks_yield_four_dates() {
    let expansion = assert_ok!(expand_recurrence(&RecurrenceRequest {
        start: monday(),
        end: Some(d(2024, 6, 24)),
        pattern: RecurrencePattern::Weekly,
        weekdays: vec![Weekday::Mon],
        max_occurrences: 10,
    }));
    assert_eq!(
        expansion.dates,
        vec![monday(), d(2024, 6, 10), d(2024, 6, 17), d(2024, 6, 24)]
    );
    assert!(!expansion.limit_reached);
}

#[tokio::test]
async fn vacation_reports_affected_meeting_does_not() {
    let c = clinic().await;
    let first = assert_ok!(c.book(monday(), 9 * H, 30, &[]).await);
    let second = assert_ok!(c.book(monday(), 15 * H, 60, &[]).await);

    let vacation = assert_ok!(
        c.engine
            .create_block(NewBlock {
                practitioner_id: c.practitioner,
                kind: BlockKind::Vacation,
                from: monday(),
                to: monday(),
                time: None,
                reason: "family trip".into(),
            })
            .await
    );
    let mut affected = vacation.affected;
    affected.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(affected, expected);

    let meeting = assert_ok!(
        c.engine
            .create_block(NewBlock {
                practitioner_id: c.practitioner,
                kind: BlockKind::Meeting,
                from: monday(),
                to: monday(),
                time: None,
                reason: "board".into(),
            })
            .await
    );
    assert!(meeting.affected.is_empty());
}

#[tokio::test]
async fn high_priority_entry_ranks_ahead_of_normal() {
    let c = clinic().await;
    let entry = |priority| NewWaitlistEntry {
        patient_id: Ulid::new(),
        practitioner_id: None,
        specialty: "general practice".into(),
        appointment_type: "check-up".into(),
        preferred_days: vec![Weekday::Mon, Weekday::Wed],
        preferred_time: Span::new(8 * H, 13 * H),
        valid_from: d(2024, 6, 1),
        valid_to: d(2024, 6, 30),
        priority,
    };
    let normal = assert_ok!(c.engine.add_waitlist_entry(entry(Priority::Normal)).await);
    let high = assert_ok!(c.engine.add_waitlist_entry(entry(Priority::High)).await);

    let appt = assert_ok!(c.book(monday(), 9 * H, 30, &[]).await);
    let release = assert_ok!(
        c.engine
            .cancel_appointment(appt.id, CancelledBy::Clinic, Some("doctor ill".into()))
            .await
    );
    let ranked: Vec<Ulid> = release.opening.unwrap().candidates.iter().map(|e| e.id).collect();
    assert_eq!(ranked, vec![high.id, normal.id]);
}

// ── Properties ───────────────────────────────────────────

#[tokio::test]
async fn active_appointments_never_overlap() {
    let c = clinic().await;
    let starts = [8 * H, 8 * H + 15, 8 * H + 30, 9 * H, 8 * H + 45, 9 * H + 10, 10 * H, 9 * H + 50];
    for start in starts {
        let _ = c.book(monday(), start, 40, &[]).await;
    }
    let active: Vec<Appointment> = assert_ok!(c.engine.list_appointments(c.practitioner, monday(), monday()).await)
        .into_iter()
        .filter(|a| a.is_active())
        .collect();
    assert!(!active.is_empty());
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{} overlaps {}", a.span, b.span);
        }
    }
}

#[tokio::test]
async fn booking_ending_at_half_past_and_one_starting_then_coexist() {
    let c = clinic().await;
    let ecg = c.equipment(vec![]).await;
    assert_ok!(c.book(monday(), 10 * H, 30, &[ecg]).await);
    assert_ok!(c.book(monday(), 10 * H + 30, 30, &[ecg]).await);
}

#[tokio::test]
async fn second_cancellation_changes_nothing() {
    let c = clinic().await;
    let appt = assert_ok!(c.book(monday(), 11 * H, 30, &[]).await);
    assert_ok!(c.engine.cancel_appointment(appt.id, CancelledBy::Patient, None).await);
    let once = assert_ok!(c.engine.list_appointments(c.practitioner, monday(), monday()).await);
    assert_ok!(c.engine.cancel_appointment(appt.id, CancelledBy::Patient, None).await);
    let twice = assert_ok!(c.engine.list_appointments(c.practitioner, monday(), monday()).await);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn recurrence_never_exceeds_cap() {
    for max in [1, 3, 7, 20] {
        let expansion = assert_ok!(expand_recurrence(&RecurrenceRequest {
            start: monday(),
            end: Some(d(2024, 12, 31)),
            pattern: RecurrencePattern::Daily,
            weekdays: vec![Weekday::Mon, Weekday::Tue, Weekday::Fri],
            max_occurrences: max,
        }));
        assert_eq!(expansion.dates.len(), max as usize);
        assert!(expansion.limit_reached);
    }
}

#[tokio::test]
async fn maintenance_beats_reserved_in_slot_listing() {
    let c = clinic().await;
    let ecg = c.equipment(vec![MaintenanceWindow {
        weekday: Weekday::Mon,
        span: Span::new(14 * H, 15 * H),
    }])
    .await;
    // Another practitioner holds the equipment through the maintenance window.
    let other = Ulid::new();
    assert_ok!(
        c.engine
            .register_practitioner(Practitioner {
                id: other,
                name: "Dr. Okafor".into(),
                specialty: "cardiology".into(),
                schedule: WeeklySchedule::on(&[Weekday::Mon], 0, 24 * H),
            })
            .await
    );
    let err = assert_err!(
        c.engine
            .reserve_slot(
                monday(),
                &SlotRequest {
                    practitioner_id: other,
                    patient_id: Ulid::new(),
                    start: 14 * H,
                    duration: 30,
                    resource_ids: vec![ecg],
                },
            )
            .await
    );
    assert_eq!(err.unavailable().map(|u| u.tag()), Some("maintenance"));

    // 13:00-14:00 on the equipment, right up to the maintenance window.
    assert_ok!(
        c.engine
            .reserve_slot(
                monday(),
                &SlotRequest {
                    practitioner_id: other,
                    patient_id: Ulid::new(),
                    start: 13 * H,
                    duration: 60,
                    resource_ids: vec![ecg],
                },
            )
            .await
    );
    let slots = assert_ok!(c.engine.available_slots(c.practitioner, monday(), 60, &[ecg]).await);
    let verdict = |t: Minute| {
        slots
            .iter()
            .find(|s| s.start == t)
            .and_then(|s| s.reason.as_ref().map(|r| r.tag()))
    };
    assert_eq!(verdict(13 * H), Some("reserved"));
    // 13:30-14:30 hits both the booking and the maintenance window.
    assert_eq!(verdict(13 * H + 30), Some("maintenance"));
    assert_eq!(verdict(15 * H), None);
}

#[tokio::test]
async fn monthly_series_over_three_years_is_booked() {
    let c = clinic().await;
    // The 15th falls on a weekend in 11 of the 36 months; those dates are rejected.
    let series = assert_ok!(
        c.engine
            .reserve_recurring(
                &RecurrenceRequest {
                    start: d(2024, 1, 15),
                    end: Some(d(2026, 12, 31)),
                    pattern: RecurrencePattern::Monthly,
                    weekdays: vec![],
                    max_occurrences: 36,
                },
                &SlotRequest {
                    practitioner_id: c.practitioner,
                    patient_id: Ulid::new(),
                    start: 9 * H,
                    duration: 30,
                    resource_ids: vec![],
                },
            )
            .await
    );
    assert_eq!(series.outcomes.len(), 36);
    assert!(!series.limit_reached);
    assert_eq!(series.booked().count(), 25);
    for (date, err) in series.rejected() {
        assert_eq!(err.unavailable().map(|u| u.tag()), Some("off_hours"), "{date}");
    }
}
