use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomledger_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomledger_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (confirmed, unavailable, conflict, rejected, storage_failure).
pub const BOOKINGS_TOTAL: &str = "roomledger_bookings_total";

/// Counter: successful lifecycle transitions. Labels: transition (check_in, check_out).
pub const TRANSITIONS_TOTAL: &str = "roomledger_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "roomledger_connections_active";

pub const CONNECTIONS_TOTAL: &str = "roomledger_connections_total";

pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomledger_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: events per WAL group commit.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomledger_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::ProvisionRoom { .. } => "provision_room",
        Command::ListRooms => "list_rooms",
        Command::AvailableRooms { .. } => "available_rooms",
        Command::SetRoomStatus { .. } => "set_room_status",
        Command::ListReservations => "list_reservations",
        Command::CreateReservation { .. } => "create_reservation",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::SearchGuests { .. } => "search_guests",
        Command::SearchDirectory { .. } => "search_directory",
        Command::Stats { .. } => "stats",
    }
}
