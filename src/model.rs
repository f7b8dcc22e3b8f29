use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight. The only time-of-day type.
pub type Minute = u32;

/// Unix milliseconds, used for creation and contact timestamps.
pub type Ms = i64;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for boundary input: non-empty and not past midnight.
    pub fn try_new(start: Minute, end: Minute) -> Option<Self> {
        (start < end && end <= MINUTES_PER_DAY).then_some(Self { start, end })
    }

    pub fn from_duration(start: Minute, duration: Minute) -> Option<Self> {
        Self::try_new(start, start.checked_add(duration)?)
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        Span::try_new(self.start.max(other.start), self.end.min(other.end))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let (h, m) = s.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let h: Minute = h.parse().ok()?;
    let m: Minute = m.parse().ok()?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return None;
    }
    Some(h * 60 + m)
}

pub fn format_hhmm(t: Minute) -> String {
    format!("{:02}:{:02}", t / 60, t % 60)
}

// ── Calendar model ───────────────────────────────────────────────

/// One weekday of a practitioner's working calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub working: bool,
    pub start: Minute,
    pub end: Minute,
}

impl DaySchedule {
    pub const OFF: DaySchedule = DaySchedule {
        working: false,
        start: 0,
        end: 0,
    };

    pub fn working(start: Minute, end: Minute) -> Self {
        Self {
            working: true,
            start,
            end,
        }
    }

    /// Working window, or `None` on a day off (or a degenerate window).
    pub fn window(&self) -> Option<Span> {
        if self.working {
            Span::try_new(self.start, self.end)
        } else {
            None
        }
    }
}

/// Weekly working hours, indexed Monday-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    days: [DaySchedule; 7],
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            days: [DaySchedule::OFF; 7],
        }
    }
}

impl WeeklySchedule {
    /// Same hours on every listed weekday, off otherwise.
    pub fn on(weekdays: &[Weekday], start: Minute, end: Minute) -> Self {
        let mut schedule = Self::default();
        for &wd in weekdays {
            schedule.set(wd, DaySchedule::working(start, end));
        }
        schedule
    }

    pub fn set(&mut self, weekday: Weekday, day: DaySchedule) {
        self.days[weekday.num_days_from_monday() as usize] = day;
    }

    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn window_on(&self, date: NaiveDate) -> Option<Span> {
        self.day(date.weekday()).window()
    }

    /// Every working day has a non-empty window ending by midnight.
    pub fn is_well_formed(&self) -> bool {
        self.days.iter().all(|d| !d.working || d.window().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: Ulid,
    pub name: String,
    pub specialty: String,
    pub schedule: WeeklySchedule,
}

/// What an availability block represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    MedicalLeave,
    Vacation,
    Meeting,
    Maintenance,
    Break,
    Training,
    Personal,
    Preventive,
}

impl BlockKind {
    /// Blocks of these kinds put existing bookings up for reassignment.
    pub fn triggers_reassignment(self) -> bool {
        match self {
            BlockKind::MedicalLeave | BlockKind::Vacation => true,
            BlockKind::Meeting
            | BlockKind::Maintenance
            | BlockKind::Break
            | BlockKind::Training
            | BlockKind::Personal
            | BlockKind::Preventive => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::MedicalLeave => "medical_leave",
            BlockKind::Vacation => "vacation",
            BlockKind::Meeting => "meeting",
            BlockKind::Maintenance => "maintenance",
            BlockKind::Break => "break",
            BlockKind::Training => "training",
            BlockKind::Personal => "personal",
            BlockKind::Preventive => "preventive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub id: Ulid,
    pub practitioner_id: Ulid,
    pub kind: BlockKind,
    /// Inclusive date range.
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Time-of-day sub-range; `None` blocks the whole day.
    pub time: Option<Span>,
    pub reason: String,
    /// Active appointments overlapping the block when it was created.
    pub affected: Vec<Ulid>,
    pub created_at: Ms,
}

impl AvailabilityBlock {
    pub fn reassignment_triggered(&self) -> bool {
        self.kind.triggers_reassignment()
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    pub fn covers(&self, date: NaiveDate, span: &Span) -> bool {
        self.covers_date(date) && self.time.is_none_or(|t| t.overlaps(span))
    }

    /// The part of `window` this block takes out on `date`.
    pub fn blocked_within(&self, date: NaiveDate, window: &Span) -> Option<Span> {
        if !self.covers_date(date) {
            return None;
        }
        match self.time {
            Some(t) => t.intersect(window),
            None => Some(*window),
        }
    }
}

// ── Shared resources ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Equipment,
    Office,
    Room,
}

/// Recurring weekly maintenance slot on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub weekday: Weekday,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedResource {
    pub id: Ulid,
    pub name: String,
    pub kind: ResourceKind,
    pub maintenance: Vec<MaintenanceWindow>,
}

/// A resource's share of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBooking {
    pub appointment_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: SharedResource,
    /// Active bookings, sorted by `(date, span.start)`.
    pub bookings: Vec<ResourceBooking>,
}

impl ResourceState {
    pub fn new(resource: SharedResource) -> Self {
        Self {
            resource,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.resource.id
    }

    /// Insert booking maintaining sort order by (date, start).
    pub fn insert_booking(&mut self, booking: ResourceBooking) {
        let key = (booking.date, booking.span.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.span.start) <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, appointment_id: Ulid) -> Option<ResourceBooking> {
        let pos = self
            .bookings
            .iter()
            .position(|b| b.appointment_id == appointment_id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings on `date` whose span overlaps `query`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &ResourceBooking> {
        let left = self.bookings.partition_point(|b| b.date < date);
        // Everything at index >= right starts at or after query.end → can't overlap.
        let right = self
            .bookings
            .partition_point(|b| (b.date, b.span.start) < (date, query.end));
        self.bookings[left..right.max(left)]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn maintenance_on(&self, weekday: Weekday, query: &Span) -> Option<&MaintenanceWindow> {
        self.resource
            .maintenance
            .iter()
            .find(|w| w.weekday == weekday && w.span.overlaps(query))
    }
}

// ── Booking ledger ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CancelledByPatient,
    CancelledByClinic,
    NoShow,
    Completed,
}

impl AppointmentStatus {
    /// Only scheduled appointments hold their interval.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled)
    }

    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            AppointmentStatus::CancelledByPatient | AppointmentStatus::CancelledByClinic
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::CancelledByPatient => "cancelled_by_patient",
            AppointmentStatus::CancelledByClinic => "cancelled_by_clinic",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Completed => "completed",
        }
    }
}

/// Who cancelled an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelledBy {
    Patient,
    Clinic,
}

impl CancelledBy {
    pub fn status(self) -> AppointmentStatus {
        match self {
            CancelledBy::Patient => AppointmentStatus::CancelledByPatient,
            CancelledBy::Clinic => AppointmentStatus::CancelledByClinic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub practitioner_id: Ulid,
    pub patient_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub resource_ids: Vec<Ulid>,
    pub status: AppointmentStatus,
    pub note: Option<String>,
    pub created_at: Ms,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn resource_booking(&self) -> ResourceBooking {
        ResourceBooking {
            appointment_id: self.id,
            date: self.date,
            span: self.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PractitionerState {
    pub practitioner: Practitioner,
    /// All appointments, any status, sorted by `(date, span.start)`.
    pub appointments: Vec<Appointment>,
    pub blocks: Vec<AvailabilityBlock>,
}

impl PractitionerState {
    pub fn new(practitioner: Practitioner) -> Self {
        Self {
            practitioner,
            appointments: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.practitioner.id
    }

    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let key = (appointment.date, appointment.span.start);
        let pos = self
            .appointments
            .partition_point(|a| (a.date, a.span.start) <= key);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments of any status on `date` whose span overlaps `query`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Appointment> {
        let left = self.appointments.partition_point(|a| a.date < date);
        let right = self
            .appointments
            .partition_point(|a| (a.date, a.span.start) < (date, query.end));
        self.appointments[left..right.max(left)]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    pub fn active_overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Appointment> {
        self.overlapping(date, query).filter(|a| a.is_active())
    }

    pub fn insert_block(&mut self, block: AvailabilityBlock) {
        self.blocks.push(block);
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<AvailabilityBlock> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    pub fn block_covering(&self, date: NaiveDate, span: &Span) -> Option<&AvailabilityBlock> {
        self.blocks.iter().find(|b| b.covers(date, span))
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRequest {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub pattern: RecurrencePattern,
    /// Permitted weekdays in caller order; the first one anchors weekly cadences.
    pub weekdays: Vec<Weekday>,
    pub max_occurrences: u32,
}

/// Dates produced by a recurrence expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub dates: Vec<NaiveDate>,
    /// The occurrence cap stopped the expansion before the range was covered.
    pub limit_reached: bool,
}

// ── Waiting list ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Active,
    Contacted,
    Scheduled,
    Expired,
}

impl WaitlistStatus {
    /// Still waiting for a slot.
    pub fn is_open(self) -> bool {
        matches!(self, WaitlistStatus::Active | WaitlistStatus::Contacted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaitlistStatus::Active => "active",
            WaitlistStatus::Contacted => "contacted",
            WaitlistStatus::Scheduled => "scheduled",
            WaitlistStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationResponse {
    Pending,
    Accepted,
    Declined,
    NoAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub at: Ms,
    pub channel: NotificationChannel,
    pub response: NotificationResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingListEntry {
    pub id: Ulid,
    pub patient_id: Ulid,
    pub practitioner_id: Option<Ulid>,
    pub specialty: String,
    pub appointment_type: String,
    /// Empty means any weekday.
    pub preferred_days: Vec<Weekday>,
    pub preferred_time: Span,
    /// Inclusive validity range.
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub priority: Priority,
    pub status: WaitlistStatus,
    pub attempts: Vec<NotificationAttempt>,
    pub appointment_id: Option<Ulid>,
    pub created_at: Ms,
}

/// Caller-supplied fields of a new waiting-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWaitlistEntry {
    pub patient_id: Ulid,
    pub practitioner_id: Option<Ulid>,
    pub specialty: String,
    pub appointment_type: String,
    pub preferred_days: Vec<Weekday>,
    pub preferred_time: Span,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub priority: Priority,
}

/// An interval that just became bookable again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreedSlot {
    pub practitioner_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub specialty: String,
}

/// Journal record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PractitionerRegistered {
        practitioner: Practitioner,
    },
    ResourceRegistered {
        resource: SharedResource,
    },
    AppointmentReserved {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        practitioner_id: Ulid,
        resource_ids: Vec<Ulid>,
        status: AppointmentStatus,
        note: Option<String>,
    },
    BlockCreated {
        block: AvailabilityBlock,
    },
    BlockDeleted {
        id: Ulid,
        practitioner_id: Ulid,
    },
    WaitlistEntryAdded {
        entry: WaitingListEntry,
    },
    WaitlistEntryUpdated {
        entry: WaitingListEntry,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Why a candidate slot cannot be offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// Overlaps an active appointment of the practitioner, or a booking of
    /// the resource when `resource_id` is set.
    Reserved {
        appointment_id: Ulid,
        resource_id: Option<Ulid>,
        interval: Span,
    },
    Blocked {
        block_id: Ulid,
        kind: BlockKind,
        reason: String,
    },
    Maintenance {
        resource_id: Ulid,
        window: Span,
    },
    OffHours,
}

impl Unavailable {
    pub fn tag(&self) -> &'static str {
        match self {
            Unavailable::Reserved { .. } => "reserved",
            Unavailable::Blocked { .. } => "blocked",
            Unavailable::Maintenance { .. } => "maintenance",
            Unavailable::OffHours => "off_hours",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Unavailable::Reserved { interval, .. } => interval.to_string(),
            Unavailable::Blocked { kind, reason, .. } => {
                if reason.is_empty() {
                    kind.as_str().to_string()
                } else {
                    reason.clone()
                }
            }
            Unavailable::Maintenance { window, .. } => window.to_string(),
            Unavailable::OffHours => "outside working hours".to_string(),
        }
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(Unavailable),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl From<Result<(), Unavailable>> for Availability {
    fn from(r: Result<(), Unavailable>) -> Self {
        match r {
            Ok(()) => Availability::Available,
            Err(u) => Availability::Unavailable(u),
        }
    }
}

/// One generated start time and whether it can be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub start: Minute,
    pub available: bool,
    pub reason: Option<Unavailable>,
}

/// A single-date booking request; the date is supplied alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    pub practitioner_id: Ulid,
    pub patient_id: Ulid,
    pub start: Minute,
    pub duration: Minute,
    pub resource_ids: Vec<Ulid>,
}

/// Caller-supplied fields of a new availability block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub practitioner_id: Ulid,
    pub kind: BlockKind,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub time: Option<Span>,
    pub reason: String,
}

/// Freed time and the waiting-list entries that could take it, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opening {
    pub freed: FreedSlot,
    pub candidates: Vec<WaitingListEntry>,
}

/// Result of an appointment status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub appointment: Appointment,
    /// Set when the change gave the interval back.
    pub opening: Option<Opening>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block: AvailabilityBlock,
    /// Active appointments that need to be moved; empty unless the kind triggers reassignment.
    pub affected: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRemoval {
    pub block: AvailabilityBlock,
    pub openings: Vec<Opening>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSlots {
    pub days: Vec<DaySlots>,
    pub limit_reached: bool,
}
