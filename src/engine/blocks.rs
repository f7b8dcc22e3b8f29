use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::{MAX_BLOCK_DAYS, MAX_BLOCKS_PER_PRACTITIONER, MAX_REASON_LEN};
use crate::model::*;
use crate::notify::{Dispatcher, Message, PatientDirectory};
use crate::observability;

use super::availability::uncovered;
use super::conflict::{now_ms, validate_dates};
use super::{Engine, EngineError};

/// Intervals a removed block gives back: per working day, the block's share
/// of the working window minus other blocks and active appointments.
fn freed_by(ps: &PractitionerState, block: &AvailabilityBlock) -> Vec<FreedSlot> {
    let mut freed = Vec::new();
    for date in block.from.iter_days().take_while(|d| *d <= block.to) {
        let Some(window) = ps.practitioner.schedule.window_on(date) else {
            continue;
        };
        let Some(released) = block.blocked_within(date, &window) else {
            continue;
        };
        let mut taken: Vec<Span> = ps
            .blocks
            .iter()
            .filter_map(|b| b.blocked_within(date, &released))
            .collect();
        taken.extend(
            ps.active_overlapping(date, &released)
                .filter_map(|a| a.span.intersect(&released)),
        );
        freed.extend(uncovered(released, taken).into_iter().map(|span| FreedSlot {
            practitioner_id: ps.id(),
            date,
            span,
            specialty: ps.practitioner.specialty.clone(),
        }));
    }
    freed
}

impl Engine {
    /// Take a practitioner out for a date range, whole days or a time window.
    /// Medical leave and vacation report the bookings they collide with; the
    /// bookings themselves are left as they are.
    pub async fn create_block(&self, new: NewBlock) -> Result<BlockOutcome, EngineError> {
        validate_dates(new.from, new.to, MAX_BLOCK_DAYS)?;
        if let Some(t) = new.time
            && Span::try_new(t.start, t.end).is_none()
        {
            return Err(EngineError::InvalidRange("empty time range"));
        }
        if new.reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("block reason too long"));
        }

        let _gate = self.gate.read().await;
        let ps = self.practitioner(&new.practitioner_id)?;
        let mut guard = ps.write().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_PRACTITIONER {
            return Err(EngineError::LimitExceeded("too many blocks for practitioner"));
        }

        let mut block = AvailabilityBlock {
            id: Ulid::new(),
            practitioner_id: new.practitioner_id,
            kind: new.kind,
            from: new.from,
            to: new.to,
            time: new.time,
            reason: new.reason,
            affected: Vec::new(),
            created_at: now_ms(),
        };
        if block.reassignment_triggered() {
            block.affected = guard
                .appointments
                .iter()
                .filter(|a| a.is_active() && block.covers(a.date, &a.span))
                .map(|a| a.id)
                .collect();
        }

        let event = Event::BlockCreated { block: block.clone() };
        self.commit(&mut guard, &mut [], &event).await?;

        metrics::counter!(observability::BLOCKS_CREATED_TOTAL, "kind" => block.kind.as_str()).increment(1);
        if !block.affected.is_empty() {
            metrics::counter!(observability::REASSIGNMENTS_FLAGGED_TOTAL)
                .increment(block.affected.len() as u64);
            info!(
                "block {} ({}) puts {} appointments up for reassignment",
                block.id,
                block.kind.as_str(),
                block.affected.len()
            );
        }
        let affected = block.affected.clone();
        Ok(BlockOutcome { block, affected })
    }

    /// Remove a block. Appointments it flagged keep their status; the time it
    /// held goes to the waiting list.
    pub async fn delete_block(&self, id: Ulid) -> Result<BlockRemoval, EngineError> {
        let (block, freed) = {
            let _gate = self.gate.read().await;
            let (practitioner_id, mut guard) = self
                .resolve_entity_write(&id, EngineError::BlockNotFound)
                .await?;
            let block = guard
                .blocks
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .ok_or(EngineError::BlockNotFound(id))?;
            let event = Event::BlockDeleted { id, practitioner_id };
            self.commit(&mut guard, &mut [], &event).await?;
            let freed = freed_by(&guard, &block);
            (block, freed)
        };

        let mut openings = Vec::with_capacity(freed.len());
        for freed in freed {
            let candidates = self.match_waiting_list(&freed).await;
            openings.push(Opening { freed, candidates });
        }
        debug!("block {id} removed, {} openings", openings.len());
        Ok(BlockRemoval { block, openings })
    }

    /// Tell each patient whose appointment a block flagged that it has to move.
    /// Appointments no longer scheduled are skipped. Returns messages sent.
    pub async fn notify_affected(
        &self,
        block_id: Ulid,
        channel: NotificationChannel,
        dispatcher: &dyn Dispatcher,
        directory: &dyn PatientDirectory,
    ) -> Result<usize, EngineError> {
        let practitioner_id = self
            .entity_to_practitioner
            .get(&block_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BlockNotFound(block_id))?;
        let ps = self.practitioner(&practitioner_id)?;
        let guard = ps.read().await;
        let block = guard
            .blocks
            .iter()
            .find(|b| b.id == block_id)
            .ok_or(EngineError::BlockNotFound(block_id))?;

        let mut sent = 0;
        for appointment_id in &block.affected {
            let Some(appointment) = guard.appointment(*appointment_id).filter(|a| a.is_active()) else {
                continue;
            };
            let Some(patient) = directory.lookup(&appointment.patient_id) else {
                warn!("patient {} of appointment {appointment_id} not in directory", appointment.patient_id);
                continue;
            };
            dispatcher.dispatch(
                patient.id,
                Message::ReassignmentNeeded {
                    patient_name: patient.display_name,
                    practitioner_name: guard.practitioner.name.clone(),
                    appointment_id: *appointment_id,
                    date: appointment.date,
                    start: appointment.span.start,
                },
                channel,
            );
            sent += 1;
        }
        Ok(sent)
    }
}
