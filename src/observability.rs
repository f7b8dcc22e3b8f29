use std::net::SocketAddr;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: reservation attempts. Labels: status (`ok` | `conflict` | `error`).
pub const RESERVATIONS_TOTAL: &str = "slotbook_reservations_total";

/// Counter: rejected candidates. Labels: reason (`reserved` | `blocked` | `maintenance` | `off_hours`).
pub const CONFLICTS_TOTAL: &str = "slotbook_conflicts_total";

/// Counter: appointment status transitions that free an interval. Labels: status.
pub const RELEASES_TOTAL: &str = "slotbook_releases_total";

/// Counter: availability blocks created. Labels: kind.
pub const BLOCKS_CREATED_TOTAL: &str = "slotbook_blocks_created_total";

/// Counter: appointments flagged for reassignment by a new block.
pub const REASSIGNMENTS_FLAGGED_TOTAL: &str = "slotbook_reassignments_flagged_total";

/// Counter: waiting-list candidates returned for freed slots.
pub const WAITLIST_MATCHES_TOTAL: &str = "slotbook_waitlist_matches_total";

/// Counter: waiting-list entries moved to expired by the reaper.
pub const WAITLIST_EXPIRED_TOTAL: &str = "slotbook_waitlist_expired_total";

/// Histogram: slot listing latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "slotbook_slot_query_duration_seconds";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "slotbook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "slotbook_journal_flush_batch_size";

/// Counter: journal compactions performed.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "slotbook_journal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}
