//! Guard rails on input sizes. Exceeding any of these yields `EngineError::LimitExceeded`.

pub const MAX_PRACTITIONERS: usize = 10_000;
pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RESOURCES_PER_BOOKING: usize = 8;
pub const MAX_APPOINTMENTS_PER_PRACTITIONER: usize = 200_000;
pub const MAX_BLOCKS_PER_PRACTITIONER: usize = 10_000;
pub const MAX_WAITLIST_ENTRIES: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_NOTE_LEN: usize = 1024;

/// Widest date range a single availability block may cover.
pub const MAX_BLOCK_DAYS: i64 = 366;

/// Furthest a recurrence expansion walks from its start date.
pub const MAX_RECURRENCE_DAYS: i64 = 5 * 366;

pub const MAX_OCCURRENCES: u32 = 1_000;

/// Smallest slot spacing the generator accepts.
pub const MIN_SLOT_MINUTES: u32 = 5;
