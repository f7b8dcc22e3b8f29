mod availability;
mod blocks;
mod conflict;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod waitlist;

pub use availability::{generate_slots, merge_overlapping, subtract_intervals, uncovered};
pub use conflict::{check_candidate, check_working_hours};
pub use error::EngineError;
pub use mutations::{DateOutcome, RecurringReservation};
pub use recurrence::expand_recurrence;
pub use waitlist::{eligible, rank_candidates};

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::journal::{Journal, WalJournal};
use crate::limits::{MAX_RESOURCES_PER_BOOKING, MIN_SLOT_MINUTES};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedPractitionerState = Arc<RwLock<PractitionerState>>;
pub type SharedResourceState = Arc<RwLock<ResourceState>>;

type ResourceWriteGuard = OwnedRwLockWriteGuard<ResourceState>;
type ResourceReadGuard = OwnedRwLockReadGuard<ResourceState>;

/// The scheduling engine. All state is reached through `&self`; share it with `Arc`.
///
/// Lock order, outermost first: commit gate, practitioner, resources (ascending
/// id), waiting list. Every mutation journals its event before applying it.
pub struct Engine {
    practitioners: DashMap<Ulid, SharedPractitionerState>,
    resources: DashMap<Ulid, SharedResourceState>,
    waitlist: RwLock<HashMap<Ulid, WaitingListEntry>>,
    /// Reverse lookup: appointment or block id → practitioner id
    entity_to_practitioner: DashMap<Ulid, Ulid>,
    /// Mutations hold it shared; compaction holds it exclusively.
    gate: RwLock<()>,
    journal: Arc<dyn Journal>,
    pub notify: Arc<NotifyHub>,
    slot_minutes: Minute,
}

// ── Event application ────────────────────────────────────────────

/// Apply an event to a practitioner. Caller holds the lock.
fn apply_to_practitioner(ps: &mut PractitionerState, event: &Event) {
    match event {
        Event::AppointmentReserved { appointment } => {
            ps.insert_appointment(appointment.clone());
        }
        Event::AppointmentStatusChanged { id, status, note, .. } => {
            if let Some(a) = ps.appointment_mut(*id) {
                a.status = *status;
                if note.is_some() {
                    a.note = note.clone();
                }
            }
        }
        Event::BlockCreated { block } => ps.insert_block(block.clone()),
        Event::BlockDeleted { id, .. } => {
            ps.remove_block(*id);
        }
        Event::PractitionerRegistered { .. }
        | Event::ResourceRegistered { .. }
        | Event::WaitlistEntryAdded { .. }
        | Event::WaitlistEntryUpdated { .. } => {}
    }
}

/// Apply an event to a resource's booking list (caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::AppointmentReserved { appointment }
            if appointment.is_active() && appointment.resource_ids.contains(&rs.id()) =>
        {
            rs.insert_booking(appointment.resource_booking());
        }
        Event::AppointmentStatusChanged { id, status, .. } if !status.is_active() => {
            rs.remove_booking(*id);
        }
        _ => {}
    }
}

fn apply_to_waitlist(entries: &mut HashMap<Ulid, WaitingListEntry>, event: &Event) {
    match event {
        Event::WaitlistEntryAdded { entry } | Event::WaitlistEntryUpdated { entry } => {
            entries.insert(entry.id, entry.clone());
        }
        _ => {}
    }
}

fn event_practitioner_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::PractitionerRegistered { practitioner } => Some(practitioner.id),
        Event::AppointmentReserved { appointment } => Some(appointment.practitioner_id),
        Event::AppointmentStatusChanged { practitioner_id, .. }
        | Event::BlockDeleted { practitioner_id, .. } => Some(*practitioner_id),
        Event::BlockCreated { block } => Some(block.practitioner_id),
        Event::WaitlistEntryAdded { entry } | Event::WaitlistEntryUpdated { entry } => {
            entry.practitioner_id
        }
        Event::ResourceRegistered { .. } => None,
    }
}

fn event_resource_ids(event: &Event) -> &[Ulid] {
    match event {
        Event::AppointmentReserved { appointment } => &appointment.resource_ids,
        Event::AppointmentStatusChanged { resource_ids, .. } => resource_ids,
        _ => &[],
    }
}

impl Engine {
    pub fn new(journal: Arc<dyn Journal>, notify: Arc<NotifyHub>) -> Self {
        Self {
            practitioners: DashMap::new(),
            resources: DashMap::new(),
            waitlist: RwLock::new(HashMap::new()),
            entity_to_practitioner: DashMap::new(),
            gate: RwLock::new(()),
            journal,
            notify,
            slot_minutes: 30,
        }
    }

    /// Spacing between generated slot start times, at least `MIN_SLOT_MINUTES`.
    pub fn with_slot_minutes(mut self, minutes: Minute) -> Self {
        self.slot_minutes = minutes.max(MIN_SLOT_MINUTES);
        self
    }

    pub fn slot_minutes(&self) -> Minute {
        self.slot_minutes
    }

    /// Rebuild state from previously journaled events.
    pub fn replay(journal: Arc<dyn Journal>, notify: Arc<NotifyHub>, events: &[Event]) -> Self {
        let engine = Self::new(journal, notify);
        for event in events {
            engine.apply_replayed(event);
        }
        engine
    }

    /// Replay the WAL at `path` and keep appending to it. Needs a tokio runtime.
    pub fn open(path: &Path, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let journal = Arc::new(WalJournal::spawn(wal));
        let engine = Self::replay(journal, notify, &events);
        info!(
            "replayed {} events: {} practitioners, {} resources",
            events.len(),
            engine.practitioners.len(),
            engine.resources.len()
        );
        Ok(engine)
    }

    // We're the sole owner during replay, so try_write always succeeds. Never
    // use blocking_write here: replay may run inside an async context.
    fn apply_replayed(&self, event: &Event) {
        match event {
            Event::PractitionerRegistered { practitioner } => {
                let ps = PractitionerState::new(practitioner.clone());
                self.practitioners
                    .insert(practitioner.id, Arc::new(RwLock::new(ps)));
            }
            Event::ResourceRegistered { resource } => {
                let rs = ResourceState::new(resource.clone());
                self.resources.insert(resource.id, Arc::new(RwLock::new(rs)));
            }
            Event::WaitlistEntryAdded { .. } | Event::WaitlistEntryUpdated { .. } => {
                match self.waitlist.try_write() {
                    Ok(mut entries) => apply_to_waitlist(&mut entries, event),
                    Err(_) => warn!("replay: waiting list busy, event skipped"),
                }
            }
            other => {
                if let Some(pid) = event_practitioner_id(other)
                    && let Some(ps) = self.get_practitioner_state(&pid)
                {
                    match ps.try_write() {
                        Ok(mut guard) => apply_to_practitioner(&mut guard, other),
                        Err(_) => warn!("replay: practitioner {pid} busy, event skipped"),
                    }
                }
                for rid in event_resource_ids(other) {
                    if let Some(rs) = self.get_resource_state(rid)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        apply_to_resource(&mut guard, other);
                    }
                }
                self.index(other);
            }
        }
    }

    fn index(&self, event: &Event) {
        match event {
            Event::AppointmentReserved { appointment } => {
                self.entity_to_practitioner
                    .insert(appointment.id, appointment.practitioner_id);
            }
            Event::BlockCreated { block } => {
                self.entity_to_practitioner
                    .insert(block.id, block.practitioner_id);
            }
            Event::BlockDeleted { id, .. } => {
                self.entity_to_practitioner.remove(id);
            }
            _ => {}
        }
    }

    /// Fan an event out to its practitioner's and resources' subscribers.
    fn publish(&self, event: &Event) {
        if let Some(pid) = event_practitioner_id(event) {
            self.notify.send(pid, event);
        }
        for rid in event_resource_ids(event) {
            self.notify.send(*rid, event);
        }
        if let Event::ResourceRegistered { resource } = event {
            self.notify.send(resource.id, event);
        }
    }

    /// Write an event to the journal. Nothing is applied if this fails.
    async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        self.journal
            .append(event)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Journal + apply + index + notify in one call, under locks the caller holds.
    pub(super) async fn commit(
        &self,
        ps: &mut PractitionerState,
        resources: &mut [ResourceWriteGuard],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.persist(event).await?;
        apply_to_practitioner(ps, event);
        for rs in resources.iter_mut() {
            apply_to_resource(rs, event);
        }
        self.index(event);
        self.publish(event);
        Ok(())
    }

    /// Journal + apply for waiting-list events (caller holds the list lock).
    pub(super) async fn commit_waitlist(
        &self,
        entries: &mut HashMap<Ulid, WaitingListEntry>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.persist(event).await?;
        apply_to_waitlist(entries, event);
        self.publish(event);
        Ok(())
    }

    // ── Lookups and locking ───────────────────────────────────────

    pub fn get_practitioner_state(&self, id: &Ulid) -> Option<SharedPractitionerState> {
        self.practitioners.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub(super) fn practitioner(&self, id: &Ulid) -> Result<SharedPractitionerState, EngineError> {
        self.get_practitioner_state(id)
            .ok_or(EngineError::PractitionerNotFound(*id))
    }

    /// Sorted, de-duplicated resource ids; the order locks are taken in.
    pub(super) fn normalize_resources(ids: &[Ulid]) -> Result<Vec<Ulid>, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.len() > MAX_RESOURCES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many resources in one booking"));
        }
        Ok(ids)
    }

    fn resource_arcs(&self, sorted_ids: &[Ulid]) -> Result<Vec<SharedResourceState>, EngineError> {
        sorted_ids
            .iter()
            .map(|id| {
                self.get_resource_state(id)
                    .ok_or(EngineError::ResourceNotFound(*id))
            })
            .collect()
    }

    /// Write-lock resources in ascending id order. `sorted_ids` must be normalized.
    pub(super) async fn write_resources(
        &self,
        sorted_ids: &[Ulid],
    ) -> Result<Vec<ResourceWriteGuard>, EngineError> {
        let arcs = self.resource_arcs(sorted_ids)?;
        let mut guards = Vec::with_capacity(arcs.len());
        for rs in arcs {
            guards.push(rs.write_owned().await);
        }
        Ok(guards)
    }

    pub(super) async fn read_resources(
        &self,
        sorted_ids: &[Ulid],
    ) -> Result<Vec<ResourceReadGuard>, EngineError> {
        let arcs = self.resource_arcs(sorted_ids)?;
        let mut guards = Vec::with_capacity(arcs.len());
        for rs in arcs {
            guards.push(rs.read_owned().await);
        }
        Ok(guards)
    }

    /// Lookup entity → practitioner, acquire the practitioner's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
        not_found: fn(Ulid) -> EngineError,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<PractitionerState>), EngineError> {
        let practitioner_id = self
            .entity_to_practitioner
            .get(entity_id)
            .map(|e| *e.value())
            .ok_or(not_found(*entity_id))?;
        let ps = self.practitioner(&practitioner_id)?;
        Ok((practitioner_id, ps.write_owned().await))
    }
}
