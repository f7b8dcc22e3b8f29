use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::{MAX_NAME_LEN, MAX_WAITLIST_ENTRIES};
use crate::model::*;
use crate::notify::{Dispatcher, Message, PatientDirectory};
use crate::observability;

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Whether an open entry would take `freed`.
///
/// A preferred practitioner must be the freed one; without one, the specialty
/// must match. The date must lie in the validity range and on a preferred
/// weekday (none listed means any), and the freed start must fall inside the
/// preferred time of day.
pub fn eligible(entry: &WaitingListEntry, freed: &FreedSlot) -> bool {
    if !entry.status.is_open() {
        return false;
    }
    let who = match entry.practitioner_id {
        Some(pid) => pid == freed.practitioner_id,
        None => entry.specialty == freed.specialty,
    };
    who && entry.valid_from <= freed.date
        && freed.date <= entry.valid_to
        && (entry.preferred_days.is_empty() || entry.preferred_days.contains(&freed.date.weekday()))
        && entry.preferred_time.contains_minute(freed.span.start)
}

/// Highest priority first, then oldest, then lowest id.
pub fn rank_candidates(candidates: &mut [WaitingListEntry]) {
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

impl Engine {
    /// Ranked open entries that fit `freed`. Nobody is booked or notified.
    pub async fn match_waiting_list(&self, freed: &FreedSlot) -> Vec<WaitingListEntry> {
        let entries = self.waitlist.read().await;
        let mut candidates: Vec<WaitingListEntry> = entries
            .values()
            .filter(|e| eligible(e, freed))
            .cloned()
            .collect();
        drop(entries);
        rank_candidates(&mut candidates);
        metrics::counter!(observability::WAITLIST_MATCHES_TOTAL).increment(candidates.len() as u64);
        debug!(
            "{} waiting-list candidates for {} on {} at {}",
            candidates.len(),
            freed.practitioner_id,
            freed.date,
            freed.span
        );
        candidates
    }

    pub async fn add_waitlist_entry(&self, new: NewWaitlistEntry) -> Result<WaitingListEntry, EngineError> {
        if new.valid_to < new.valid_from {
            return Err(EngineError::InvalidRange("end date before start date"));
        }
        if Span::try_new(new.preferred_time.start, new.preferred_time.end).is_none() {
            return Err(EngineError::InvalidRange("empty preferred time range"));
        }
        if new.specialty.len() > MAX_NAME_LEN || new.appointment_type.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("waiting-list field too long"));
        }

        let _gate = self.gate.read().await;
        let specialty = match new.practitioner_id {
            Some(pid) => {
                let ps = self.practitioner(&pid)?;
                let guard = ps.read().await;
                if new.specialty.is_empty() {
                    guard.practitioner.specialty.clone()
                } else {
                    new.specialty
                }
            }
            None if new.specialty.is_empty() => {
                return Err(EngineError::InvalidRange("specialty or practitioner required"));
            }
            None => new.specialty,
        };

        let mut entries = self.waitlist.write().await;
        if entries.len() >= MAX_WAITLIST_ENTRIES {
            return Err(EngineError::LimitExceeded("waiting list full"));
        }
        let entry = WaitingListEntry {
            id: Ulid::new(),
            patient_id: new.patient_id,
            practitioner_id: new.practitioner_id,
            specialty,
            appointment_type: new.appointment_type,
            preferred_days: new.preferred_days,
            preferred_time: new.preferred_time,
            valid_from: new.valid_from,
            valid_to: new.valid_to,
            priority: new.priority,
            status: WaitlistStatus::Active,
            attempts: Vec::new(),
            appointment_id: None,
            created_at: now_ms(),
        };
        let event = Event::WaitlistEntryAdded { entry: entry.clone() };
        self.commit_waitlist(&mut entries, &event).await?;
        debug!("waiting-list entry {} added for patient {}", entry.id, entry.patient_id);
        Ok(entry)
    }

    /// Offer `freed` to one entry's patient. The attempt is journaled before
    /// the message goes out; delivery itself is not awaited.
    pub async fn contact_waitlist_entry(
        &self,
        entry_id: Ulid,
        freed: &FreedSlot,
        channel: NotificationChannel,
        dispatcher: &dyn Dispatcher,
        directory: &dyn PatientDirectory,
    ) -> Result<NotificationAttempt, EngineError> {
        let _gate = self.gate.read().await;
        let practitioner_name = {
            let ps = self.practitioner(&freed.practitioner_id)?;
            let guard = ps.read().await;
            guard.practitioner.name.clone()
        };

        let mut entries = self.waitlist.write().await;
        let mut entry = entries
            .get(&entry_id)
            .cloned()
            .ok_or(EngineError::WaitlistEntryNotFound(entry_id))?;
        if !entry.status.is_open() {
            return Err(EngineError::InvalidTransition {
                id: entry_id,
                from: entry.status.as_str(),
                to: WaitlistStatus::Contacted.as_str(),
            });
        }
        let patient = directory
            .lookup(&entry.patient_id)
            .ok_or(EngineError::PatientNotFound(entry.patient_id))?;

        let attempt = NotificationAttempt {
            at: now_ms(),
            channel,
            response: NotificationResponse::Pending,
        };
        entry.attempts.push(attempt);
        entry.status = WaitlistStatus::Contacted;
        self.commit_waitlist(&mut entries, &Event::WaitlistEntryUpdated { entry })
            .await?;
        drop(entries);

        dispatcher.dispatch(
            patient.id,
            Message::SlotOffered {
                patient_name: patient.display_name,
                practitioner_name,
                date: freed.date,
                start: freed.span.start,
                duration: freed.span.duration(),
            },
            channel,
        );
        Ok(attempt)
    }

    /// Record the patient's answer to the latest offer. A decline or no answer
    /// puts the entry back in the active pool.
    pub async fn record_waitlist_response(
        &self,
        entry_id: Ulid,
        response: NotificationResponse,
    ) -> Result<WaitingListEntry, EngineError> {
        let _gate = self.gate.read().await;
        let mut entries = self.waitlist.write().await;
        let mut entry = entries
            .get(&entry_id)
            .cloned()
            .ok_or(EngineError::WaitlistEntryNotFound(entry_id))?;
        if entry.status != WaitlistStatus::Contacted {
            return Err(EngineError::NotContacted(entry_id));
        }
        let last = entry
            .attempts
            .last_mut()
            .ok_or(EngineError::NotContacted(entry_id))?;
        last.response = response;
        if matches!(response, NotificationResponse::Declined | NotificationResponse::NoAnswer) {
            entry.status = WaitlistStatus::Active;
        }
        let event = Event::WaitlistEntryUpdated { entry: entry.clone() };
        self.commit_waitlist(&mut entries, &event).await?;
        Ok(entry)
    }

    /// Link an entry to the appointment that satisfied it.
    pub async fn mark_waitlist_scheduled(
        &self,
        entry_id: Ulid,
        appointment_id: Ulid,
    ) -> Result<WaitingListEntry, EngineError> {
        let _gate = self.gate.read().await;
        let patient_id = {
            let pid = self
                .entity_to_practitioner
                .get(&appointment_id)
                .map(|e| *e.value())
                .ok_or(EngineError::AppointmentNotFound(appointment_id))?;
            let ps = self.practitioner(&pid)?;
            let guard = ps.read().await;
            guard
                .appointment(appointment_id)
                .map(|a| a.patient_id)
                .ok_or(EngineError::AppointmentNotFound(appointment_id))?
        };

        let mut entries = self.waitlist.write().await;
        let mut entry = entries
            .get(&entry_id)
            .cloned()
            .ok_or(EngineError::WaitlistEntryNotFound(entry_id))?;
        if !entry.status.is_open() {
            return Err(EngineError::InvalidTransition {
                id: entry_id,
                from: entry.status.as_str(),
                to: WaitlistStatus::Scheduled.as_str(),
            });
        }
        if entry.patient_id != patient_id {
            return Err(EngineError::InvalidRange("appointment belongs to another patient"));
        }
        entry.status = WaitlistStatus::Scheduled;
        entry.appointment_id = Some(appointment_id);
        let event = Event::WaitlistEntryUpdated { entry: entry.clone() };
        self.commit_waitlist(&mut entries, &event).await?;
        Ok(entry)
    }

    /// Expire open entries whose validity ended before `today`.
    pub async fn expire_waitlist(&self, today: NaiveDate) -> Result<Vec<Ulid>, EngineError> {
        let _gate = self.gate.read().await;
        let mut entries = self.waitlist.write().await;
        let mut lapsed: Vec<WaitingListEntry> = entries
            .values()
            .filter(|e| e.status.is_open() && e.valid_to < today)
            .cloned()
            .collect();
        lapsed.sort_by_key(|e| e.id);

        let mut expired = Vec::with_capacity(lapsed.len());
        for mut entry in lapsed {
            entry.status = WaitlistStatus::Expired;
            let id = entry.id;
            if let Err(e) = self
                .commit_waitlist(&mut entries, &Event::WaitlistEntryUpdated { entry })
                .await
            {
                warn!("expiring waiting-list entry {id} failed: {e}");
                return Err(e);
            }
            expired.push(id);
        }
        if !expired.is_empty() {
            metrics::counter!(observability::WAITLIST_EXPIRED_TOTAL).increment(expired.len() as u64);
            info!("expired {} waiting-list entries", expired.len());
        }
        Ok(expired)
    }
}
