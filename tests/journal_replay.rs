use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Weekday};
use tokio_test::assert_ok;
use ulid::Ulid;

use slotbook::engine::Engine;
use slotbook::model::*;
use slotbook::notify::NotifyHub;
use slotbook::wal::Wal;

fn journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn open(path: &PathBuf) -> Engine {
    Engine::open(path, Arc::new(NotifyHub::new())).unwrap()
}

struct Seeded {
    practitioner: Ulid,
    room: Ulid,
    kept: Appointment,
    cancelled: Appointment,
    entry: WaitingListEntry,
}

async fn seed(engine: &Engine) -> Seeded {
    let practitioner = Ulid::new();
    assert_ok!(
        engine
            .register_practitioner(Practitioner {
                id: practitioner,
                name: "Dr. Lind".into(),
                specialty: "physiotherapy".into(),
                schedule: WeeklySchedule::on(&[Weekday::Mon, Weekday::Wed], 9 * 60, 15 * 60),
            })
            .await
    );
    let room = Ulid::new();
    assert_ok!(
        engine
            .register_resource(SharedResource {
                id: room,
                name: "Gym".into(),
                kind: ResourceKind::Room,
                maintenance: vec![],
            })
            .await
    );
    let request = |start| SlotRequest {
        practitioner_id: practitioner,
        patient_id: Ulid::new(),
        start,
        duration: 45,
        resource_ids: vec![room],
    };
    let kept = assert_ok!(engine.reserve_slot(d(2024, 6, 3), &request(9 * 60)).await);
    let cancelled = assert_ok!(engine.reserve_slot(d(2024, 6, 3), &request(10 * 60)).await);
    assert_ok!(engine.cancel_appointment(cancelled.id, CancelledBy::Patient, None).await);
    assert_ok!(
        engine
            .create_block(NewBlock {
                practitioner_id: practitioner,
                kind: BlockKind::Personal,
                from: d(2024, 6, 5),
                to: d(2024, 6, 5),
                time: Some(Span::new(12 * 60, 13 * 60)),
                reason: "dentist".into(),
            })
            .await
    );
    let entry = assert_ok!(
        engine
            .add_waitlist_entry(NewWaitlistEntry {
                patient_id: Ulid::new(),
                practitioner_id: Some(practitioner),
                specialty: String::new(),
                appointment_type: "rehab".into(),
                preferred_days: vec![],
                preferred_time: Span::new(9 * 60, 12 * 60),
                valid_from: d(2024, 6, 1),
                valid_to: d(2024, 6, 30),
                priority: Priority::Urgent,
            })
            .await
    );
    Seeded {
        practitioner,
        room,
        kept,
        cancelled,
        entry,
    }
}

async fn assert_restored(engine: &Engine, s: &Seeded) {
    assert_eq!(assert_ok!(engine.get_appointment(s.kept.id).await), s.kept);
    let cancelled = assert_ok!(engine.get_appointment(s.cancelled.id).await);
    assert_eq!(cancelled.status, AppointmentStatus::CancelledByPatient);

    // The kept booking still holds practitioner and room; the cancelled one holds neither.
    let monday = d(2024, 6, 3);
    let kept_at = assert_ok!(engine.check_availability(s.practitioner, monday, 9 * 60, 45, &[s.room]).await);
    assert!(!kept_at.is_available());
    let freed_at = assert_ok!(engine.check_availability(s.practitioner, monday, 10 * 60, 45, &[s.room]).await);
    assert!(freed_at.is_available());

    let blocks = assert_ok!(engine.list_blocks(s.practitioner).await);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].reason, "dentist");

    let entry = assert_ok!(engine.get_waitlist_entry(s.entry.id).await);
    assert_eq!(entry, s.entry);
    assert_eq!(entry.specialty, "physiotherapy");
}

#[tokio::test]
async fn restart_replays_every_event() {
    let path = journal_path("restart.wal");
    let seeded = {
        let engine = open(&path);
        seed(&engine).await
    };
    let engine = open(&path);
    assert_restored(&engine, &seeded).await;
}

#[tokio::test]
async fn compacted_journal_restores_the_same_state() {
    let path = journal_path("compacted.wal");
    let seeded = {
        let engine = open(&path);
        let seeded = seed(&engine).await;
        let before = Wal::replay(&path).unwrap().len();
        assert_ok!(engine.compact_journal().await);
        assert!(Wal::replay(&path).unwrap().len() < before);
        assert_eq!(engine.journal_appends_since_compact().await, 0);
        seeded
    };
    let engine = open(&path);
    assert_restored(&engine, &seeded).await;

    // The reopened journal keeps accepting writes after compaction.
    let extra = assert_ok!(
        engine
            .reserve_slot(
                d(2024, 6, 5),
                &SlotRequest {
                    practitioner_id: seeded.practitioner,
                    patient_id: Ulid::new(),
                    start: 9 * 60,
                    duration: 30,
                    resource_ids: vec![],
                },
            )
            .await
    );
    drop(engine);
    let engine = open(&path);
    assert_eq!(assert_ok!(engine.get_appointment(extra.id).await), extra);
}

#[tokio::test]
async fn torn_tail_is_ignored_on_restart() {
    let path = journal_path("torn.wal");
    let seeded = {
        let engine = open(&path);
        seed(&engine).await
    };
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[200, 0, 0, 0, 7, 7, 7]).unwrap();
    }
    let engine = open(&path);
    assert_restored(&engine, &seeded).await;
}
