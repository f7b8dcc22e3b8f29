use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::wal::Wal;

/// Durable sink for engine events. The engine appends before it applies, so a
/// failed append leaves in-memory state untouched.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, event: &Event) -> io::Result<()>;

    /// Replace the journal with a minimal event set recreating current state.
    async fn compact(&self, events: Vec<Event>) -> io::Result<()>;

    async fn appends_since_compact(&self) -> u64;
}

// ── Group-commit WAL ─────────────────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Journal backed by a [`Wal`] owned by a background writer task.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> io::Result<T> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| io::Error::other("journal writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("journal writer dropped response"))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response,
        };
        self.request(cmd, rx).await?
    }

    async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.request(WalCommand::Compact { events, response }, rx)
            .await?
    }

    async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        self.request(WalCommand::AppendsSinceCompact { response }, rx)
            .await
            .unwrap_or(0)
    }
}

/// Owns the WAL and batches appends:
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("journal flush failed for {} events: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so stale bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

// ── In-memory journal ────────────────────────────────────────────

/// Journal that keeps events in memory. For tests and ephemeral engines.
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<Event>>,
    appends_since_compact: Mutex<u64>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| io::Error::other("memory journal poisoned"))?;
        events.push(event.clone());
        if let Ok(mut n) = self.appends_since_compact.lock() {
            *n += 1;
        }
        Ok(())
    }

    async fn compact(&self, compacted: Vec<Event>) -> io::Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| io::Error::other("memory journal poisoned"))?;
        *events = compacted;
        if let Ok(mut n) = self.appends_since_compact.lock() {
            *n = 0;
        }
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact.lock().map(|n| *n).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn deleted() -> Event {
        Event::BlockDeleted {
            id: Ulid::new(),
            practitioner_id: Ulid::new(),
        }
    }

    #[tokio::test]
    async fn wal_journal_appends_are_durable() {
        let path = tmp_path("durable.wal");
        let journal = WalJournal::spawn(Wal::open(&path).unwrap());
        let events: Vec<Event> = (0..3).map(|_| deleted()).collect();
        for e in &events {
            journal.append(e).await.unwrap();
        }
        assert_eq!(journal.appends_since_compact().await, 3);
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[tokio::test]
    async fn wal_journal_concurrent_appends_batch() {
        let path = tmp_path("concurrent.wal");
        let journal = std::sync::Arc::new(WalJournal::spawn(Wal::open(&path).unwrap()));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let j = journal.clone();
                tokio::spawn(async move { j.append(&deleted()).await })
            })
            .collect();
        for h in futures::future::join_all(handles).await {
            h.unwrap().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().len(), 50);
    }

    #[tokio::test]
    async fn wal_journal_compacts() {
        let path = tmp_path("compact.wal");
        let journal = WalJournal::spawn(Wal::open(&path).unwrap());
        for _ in 0..10 {
            journal.append(&deleted()).await.unwrap();
        }
        let keep = deleted();
        journal.compact(vec![keep.clone()]).await.unwrap();
        assert_eq!(journal.appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn memory_journal_records_and_compacts() {
        let journal = MemoryJournal::new();
        let a = deleted();
        journal.append(&a).await.unwrap();
        journal.append(&deleted()).await.unwrap();
        assert_eq!(journal.events().len(), 2);
        assert_eq!(journal.appends_since_compact().await, 2);
        journal.compact(vec![a.clone()]).await.unwrap();
        assert_eq!(journal.events(), vec![a]);
        assert_eq!(journal.appends_since_compact().await, 0);
    }
}
