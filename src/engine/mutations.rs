use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{candidate_span, check_candidate, check_working_hours, now_ms};
use super::recurrence::expand_recurrence;
use super::{Engine, EngineError, ResourceWriteGuard};

/// Outcome of one date of a recurring reservation.
#[derive(Debug)]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub result: Result<Appointment, EngineError>,
}

#[derive(Debug)]
pub struct RecurringReservation {
    pub outcomes: Vec<DateOutcome>,
    /// The occurrence cap cut the expansion short.
    pub limit_reached: bool,
}

impl RecurringReservation {
    pub fn booked(&self) -> impl Iterator<Item = &Appointment> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn rejected(&self) -> impl Iterator<Item = (NaiveDate, &EngineError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.date, e)))
    }
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    pub async fn register_practitioner(&self, practitioner: Practitioner) -> Result<(), EngineError> {
        check_len(&practitioner.name, MAX_NAME_LEN, "practitioner name too long")?;
        check_len(&practitioner.specialty, MAX_NAME_LEN, "specialty too long")?;
        if !practitioner.schedule.is_well_formed() {
            return Err(EngineError::InvalidRange("working hours must be a non-empty range within the day"));
        }
        if self.practitioners.len() >= MAX_PRACTITIONERS {
            return Err(EngineError::LimitExceeded("too many practitioners"));
        }
        let _gate = self.gate.read().await;

        // Claim the id with the state write-locked, so nothing touches it
        // before the registration is journaled.
        let id = practitioner.id;
        let event = Event::PractitionerRegistered {
            practitioner: practitioner.clone(),
        };
        let state = Arc::new(RwLock::new(PractitionerState::new(practitioner)));
        let _claim = state.clone().write_owned().await;
        match self.practitioners.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(state);
            }
        }
        if let Err(e) = self.persist(&event).await {
            self.practitioners.remove(&id);
            return Err(e);
        }
        self.publish(&event);
        info!("practitioner {id} registered");
        Ok(())
    }

    pub async fn register_resource(&self, resource: SharedResource) -> Result<(), EngineError> {
        check_len(&resource.name, MAX_NAME_LEN, "resource name too long")?;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let _gate = self.gate.read().await;

        let id = resource.id;
        let event = Event::ResourceRegistered {
            resource: resource.clone(),
        };
        let state = Arc::new(RwLock::new(ResourceState::new(resource)));
        let _claim = state.clone().write_owned().await;
        match self.resources.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(state);
            }
        }
        if let Err(e) = self.persist(&event).await {
            self.resources.remove(&id);
            return Err(e);
        }
        self.publish(&event);
        info!("resource {id} registered");
        Ok(())
    }

    /// Book one slot. Check and commit run under the practitioner's and every
    /// resource's write lock, so two racing requests cannot both succeed.
    pub async fn reserve_slot(&self, date: NaiveDate, request: &SlotRequest) -> Result<Appointment, EngineError> {
        let result = self.reserve_on(date, request).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(EngineError::SlotUnavailable(_)) => "conflict",
            Err(_) => "error",
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "status" => status).increment(1);
        result
    }

    async fn reserve_on(&self, date: NaiveDate, request: &SlotRequest) -> Result<Appointment, EngineError> {
        let span = candidate_span(request.start, request.duration)?;
        let resource_ids = Self::normalize_resources(&request.resource_ids)?;

        let _gate = self.gate.read().await;
        let ps = self.practitioner(&request.practitioner_id)?;
        let mut guard = ps.write().await;
        let mut resources = self.write_resources(&resource_ids).await?;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PRACTITIONER {
            return Err(EngineError::LimitExceeded("too many appointments for practitioner"));
        }

        let verdict = check_working_hours(&guard.practitioner.schedule, date, &span).and_then(|()| {
            let views: Vec<&ResourceState> = resources.iter().map(|g| &**g).collect();
            check_candidate(&guard, &views, date, &span)
        });
        if let Err(reason) = verdict {
            metrics::counter!(observability::CONFLICTS_TOTAL, "reason" => reason.tag()).increment(1);
            debug!("reserve {} on {date} at {span} rejected: {reason}", request.practitioner_id);
            return Err(EngineError::SlotUnavailable(reason));
        }

        let appointment = Appointment {
            id: Ulid::new(),
            practitioner_id: request.practitioner_id,
            patient_id: request.patient_id,
            date,
            span,
            resource_ids,
            status: AppointmentStatus::Scheduled,
            note: None,
            created_at: now_ms(),
        };
        let event = Event::AppointmentReserved {
            appointment: appointment.clone(),
        };
        self.commit(&mut guard, &mut resources, &event).await?;
        debug!("appointment {} booked on {date} at {span}", appointment.id);
        Ok(appointment)
    }

    /// Book the same slot on every date the recurrence yields. Each date commits
    /// on its own; a conflict on one date does not stop the rest. A storage
    /// failure does.
    pub async fn reserve_recurring(
        &self,
        recurrence: &RecurrenceRequest,
        template: &SlotRequest,
    ) -> Result<RecurringReservation, EngineError> {
        candidate_span(template.start, template.duration)?;
        self.practitioner(&template.practitioner_id)?;
        let expansion = expand_recurrence(recurrence)?;

        let mut outcomes = Vec::with_capacity(expansion.dates.len());
        for date in expansion.dates {
            match self.reserve_slot(date, template).await {
                Err(e) if e.is_fatal() => return Err(e),
                result => outcomes.push(DateOutcome { date, result }),
            }
        }

        Ok(RecurringReservation {
            outcomes,
            limit_reached: expansion.limit_reached,
        })
    }

    // ── Status transitions ───────────────────────────────────────

    /// Move an appointment out of `scheduled`. Returns the appointment as it
    /// now stands and, when the interval went back to the pool, what was freed.
    async fn transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        note: Option<String>,
    ) -> Result<(Appointment, Option<FreedSlot>), EngineError> {
        if let Some(n) = &note {
            check_len(n, MAX_NOTE_LEN, "note too long")?;
        }
        let _gate = self.gate.read().await;
        let (practitioner_id, mut guard) = self
            .resolve_entity_write(&id, EngineError::AppointmentNotFound)
            .await?;
        let current = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))?;

        if current.status == to || (current.status.is_cancelled() && to.is_cancelled()) {
            return Ok((current, None));
        }
        if !current.is_active() {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status.as_str(),
                to: to.as_str(),
            });
        }

        let mut resources: Vec<ResourceWriteGuard> = self.write_resources(&current.resource_ids).await?;
        let event = Event::AppointmentStatusChanged {
            id,
            practitioner_id,
            resource_ids: current.resource_ids.clone(),
            status: to,
            note,
        };
        self.commit(&mut guard, &mut resources, &event).await?;

        let updated = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let freed = matches!(
            to,
            AppointmentStatus::CancelledByPatient | AppointmentStatus::CancelledByClinic | AppointmentStatus::NoShow
        )
        .then(|| FreedSlot {
            practitioner_id,
            date: updated.date,
            span: updated.span,
            specialty: guard.practitioner.specialty.clone(),
        });
        metrics::counter!(observability::RELEASES_TOTAL, "status" => to.as_str()).increment(1);
        debug!("appointment {id}: {} -> {}", current.status.as_str(), to.as_str());
        Ok((updated, freed))
    }

    async fn release(&self, appointment: Appointment, freed: Option<FreedSlot>) -> Release {
        let opening = match freed {
            Some(freed) => {
                let candidates = self.match_waiting_list(&freed).await;
                Some(Opening { freed, candidates })
            }
            None => None,
        };
        Release { appointment, opening }
    }

    /// Cancel an appointment. Cancelling one that is already cancelled changes
    /// nothing and reports no opening.
    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        by: CancelledBy,
        note: Option<String>,
    ) -> Result<Release, EngineError> {
        let (appointment, freed) = self.transition(id, by.status(), note).await?;
        Ok(self.release(appointment, freed).await)
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Release, EngineError> {
        let (appointment, freed) = self.transition(id, AppointmentStatus::NoShow, None).await?;
        Ok(self.release(appointment, freed).await)
    }

    pub async fn complete_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let (appointment, _) = self.transition(id, AppointmentStatus::Completed, None).await?;
        Ok(appointment)
    }

    // ── Journal maintenance ──────────────────────────────────────

    /// The smallest event list that rebuilds the current state.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let mut history = Vec::new();

        let practitioners: Vec<_> = self.practitioners.iter().map(|e| e.value().clone()).collect();
        for ps in practitioners {
            let guard = ps.read().await;
            events.push(Event::PractitionerRegistered {
                practitioner: guard.practitioner.clone(),
            });
            history.extend(guard.appointments.iter().map(|a| Event::AppointmentReserved {
                appointment: a.clone(),
            }));
            history.extend(guard.blocks.iter().map(|b| Event::BlockCreated { block: b.clone() }));
        }

        let resources: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        for rs in resources {
            let guard = rs.read().await;
            events.push(Event::ResourceRegistered {
                resource: guard.resource.clone(),
            });
        }

        events.append(&mut history);
        let entries = self.waitlist.read().await;
        let mut waiting: Vec<&WaitingListEntry> = entries.values().collect();
        waiting.sort_by_key(|e| e.id);
        events.extend(waiting.into_iter().map(|e| Event::WaitlistEntryAdded { entry: e.clone() }));
        events
    }

    /// Rewrite the journal from a snapshot. Mutations wait until it is done.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();
        self.journal.compact(events).await?;
        metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
        info!("journal compacted to {count} events");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
