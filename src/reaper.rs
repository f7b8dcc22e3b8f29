use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// One housekeeping pass: expire waiting-list entries that lapsed before `today`.
pub async fn reap_once(engine: &Engine, today: NaiveDate) -> usize {
    match engine.expire_waitlist(today).await {
        Ok(expired) => {
            for id in &expired {
                debug!("expired waiting-list entry {id}");
            }
            expired.len()
        }
        Err(e) => {
            warn!("waiting-list expiry failed: {e}");
            0
        }
    }
}

/// Background task that expires lapsed waiting-list entries every `every`.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = Local::now().date_naive();
        let n = reap_once(&engine, today).await;
        if n > 0 {
            info!("reaper expired {n} waiting-list entries");
        }
    }
}

/// Compact the journal whenever it has grown by `threshold` appends since the last time.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if threshold == 0 || engine.journal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_journal().await {
            warn!("journal compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::Weekday;
    use ulid::Ulid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn reaper_expires_lapsed_entries() {
        let engine = Engine::new(Arc::new(MemoryJournal::new()), Arc::new(NotifyHub::new()));
        let entry = engine
            .add_waitlist_entry(NewWaitlistEntry {
                patient_id: Ulid::new(),
                practitioner_id: None,
                specialty: "orthopedics".into(),
                appointment_type: "first visit".into(),
                preferred_days: vec![Weekday::Tue],
                preferred_time: Span::new(480, 720),
                valid_from: d(2024, 6, 1),
                valid_to: d(2024, 6, 14),
                priority: Priority::Normal,
            })
            .await
            .unwrap();

        assert_eq!(reap_once(&engine, d(2024, 6, 14)).await, 0);
        assert_eq!(reap_once(&engine, d(2024, 6, 15)).await, 1);
        let after = engine.get_waitlist_entry(entry.id).await.unwrap();
        assert_eq!(after.status, WaitlistStatus::Expired);
        assert_eq!(reap_once(&engine, d(2024, 6, 16)).await, 0);
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let journal = Arc::new(MemoryJournal::new());
        let engine = Arc::new(Engine::new(journal.clone(), Arc::new(NotifyHub::new())));
        for _ in 0..3 {
            engine
                .register_resource(SharedResource {
                    id: Ulid::new(),
                    name: "Ultrasound".into(),
                    kind: ResourceKind::Equipment,
                    maintenance: vec![],
                })
                .await
                .unwrap();
        }
        assert_eq!(engine.journal_appends_since_compact().await, 3);

        let task = tokio::spawn(run_compactor(engine.clone(), 3));
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.journal_appends_since_compact().await, 0);
        assert_eq!(journal.events().len(), 3);
        task.abort();
    }
}
