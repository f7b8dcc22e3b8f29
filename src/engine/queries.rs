use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::availability::generate_slots;
use super::conflict::{candidate_span, check_candidate};
use super::recurrence::expand_recurrence;
use super::{Engine, EngineError};

impl Engine {
    /// Every generated start time on `date` with its verdict. A day off, or a
    /// duration longer than the working window, gives an empty list.
    pub async fn available_slots(
        &self,
        practitioner_id: Ulid,
        date: NaiveDate,
        duration: Minute,
        resource_ids: &[Ulid],
    ) -> Result<Vec<SlotView>, EngineError> {
        if duration == 0 || duration > MINUTES_PER_DAY {
            return Err(EngineError::InvalidRange("duration must be between 1 minute and a day"));
        }
        let started = Instant::now();
        let resource_ids = Self::normalize_resources(resource_ids)?;
        let ps = self.practitioner(&practitioner_id)?;
        let guard = ps.read().await;
        let resources = self.read_resources(&resource_ids).await?;
        let views: Vec<&ResourceState> = resources.iter().map(|g| &**g).collect();

        let slots = generate_slots(&guard.practitioner.schedule, date, duration, self.slot_minutes)
            .into_iter()
            .map(|start| {
                let span = Span::new(start, start + duration);
                match check_candidate(&guard, &views, date, &span) {
                    Ok(()) => SlotView {
                        start,
                        available: true,
                        reason: None,
                    },
                    Err(reason) => SlotView {
                        start,
                        available: false,
                        reason: Some(reason),
                    },
                }
            })
            .collect();

        metrics::histogram!(observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    /// Verdict for one candidate. Working hours are not consulted here; see
    /// `reserve_slot` for that.
    pub async fn check_availability(
        &self,
        practitioner_id: Ulid,
        date: NaiveDate,
        start: Minute,
        duration: Minute,
        resource_ids: &[Ulid],
    ) -> Result<Availability, EngineError> {
        let span = candidate_span(start, duration)?;
        let resource_ids = Self::normalize_resources(resource_ids)?;
        let ps = self.practitioner(&practitioner_id)?;
        let guard = ps.read().await;
        let resources = self.read_resources(&resource_ids).await?;
        let views: Vec<&ResourceState> = resources.iter().map(|g| &**g).collect();
        Ok(check_candidate(&guard, &views, date, &span).into())
    }

    /// Slot listings for every date a recurrence yields.
    pub async fn available_slots_for_recurrence(
        &self,
        recurrence: &RecurrenceRequest,
        practitioner_id: Ulid,
        duration: Minute,
        resource_ids: &[Ulid],
    ) -> Result<RecurringSlots, EngineError> {
        let expansion = expand_recurrence(recurrence)?;
        let mut days = Vec::with_capacity(expansion.dates.len());
        for date in expansion.dates {
            let slots = self
                .available_slots(practitioner_id, date, duration, resource_ids)
                .await?;
            days.push(DaySlots { date, slots });
        }
        Ok(RecurringSlots {
            days,
            limit_reached: expansion.limit_reached,
        })
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub async fn get_practitioner(&self, id: Ulid) -> Result<Practitioner, EngineError> {
        let ps = self.practitioner(&id)?;
        let guard = ps.read().await;
        Ok(guard.practitioner.clone())
    }

    pub async fn list_practitioners(&self) -> Vec<Practitioner> {
        let all: Vec<_> = self.practitioners.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(all.len());
        for ps in all {
            out.push(ps.read().await.practitioner.clone());
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn list_resources(&self) -> Vec<SharedResource> {
        let all: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(all.len());
        for rs in all {
            out.push(rs.read().await.resource.clone());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let practitioner_id = self
            .entity_to_practitioner
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let ps = self.practitioner(&practitioner_id)?;
        let guard = ps.read().await;
        guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))
    }

    /// A practitioner's appointments of any status dated within `[from, to]`.
    pub async fn list_appointments(
        &self,
        practitioner_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        if to < from {
            return Err(EngineError::InvalidRange("end date before start date"));
        }
        let ps = self.practitioner(&practitioner_id)?;
        let guard = ps.read().await;
        let left = guard.appointments.partition_point(|a| a.date < from);
        let right = guard.appointments.partition_point(|a| a.date <= to);
        Ok(guard.appointments[left..right].to_vec())
    }

    pub async fn list_blocks(&self, practitioner_id: Ulid) -> Result<Vec<AvailabilityBlock>, EngineError> {
        let ps = self.practitioner(&practitioner_id)?;
        let guard = ps.read().await;
        let mut blocks = guard.blocks.clone();
        blocks.sort_by_key(|b| (b.from, b.id));
        Ok(blocks)
    }

    pub async fn get_waitlist_entry(&self, id: Ulid) -> Result<WaitingListEntry, EngineError> {
        self.waitlist
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::WaitlistEntryNotFound(id))
    }

    /// All entries, oldest first.
    pub async fn list_waitlist(&self) -> Vec<WaitingListEntry> {
        let mut entries: Vec<WaitingListEntry> = self.waitlist.read().await.values().cloned().collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        entries
    }
}
