use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, Minute, NotificationChannel};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for engine events, keyed by practitioner or resource id.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a practitioner or resource. Creates the channel if needed.
    pub fn subscribe(&self, topic: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, topic: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&topic) {
            let _ = sender.send(event.clone());
        }
    }
}

// ── Consumed collaborators ───────────────────────────────────────

/// Display fields of a patient, as held by the clinic's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientCard {
    pub id: Ulid,
    pub display_name: String,
}

pub trait PatientDirectory: Send + Sync {
    fn lookup(&self, patient_id: &Ulid) -> Option<PatientCard>;
}

/// What a notification says. Rendering is the dispatcher's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A waiting-list patient is offered a freed slot.
    SlotOffered {
        patient_name: String,
        practitioner_name: String,
        date: NaiveDate,
        start: Minute,
        duration: Minute,
    },
    /// A booked patient must be moved because the practitioner became unavailable.
    ReassignmentNeeded {
        patient_name: String,
        practitioner_name: String,
        appointment_id: Ulid,
        date: NaiveDate,
        start: Minute,
    },
}

/// Delivery transport. Fire-and-forget: the engine never waits on delivery.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, recipient: Ulid, message: Message, channel: NotificationChannel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        let mut rx = hub.subscribe(pid);

        let event = Event::BlockDeleted {
            id: Ulid::new(),
            practitioner_id: pid,
        };
        hub.send(pid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        hub.send(
            pid,
            &Event::BlockDeleted {
                id: Ulid::new(),
                practitioner_id: pid,
            },
        );
    }
}
