use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "staykeep_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "staykeep_command_duration_seconds";

/// Counter: booking attempts. Labels: outcome (`created` or an error kind).
pub const BOOKINGS_TOTAL: &str = "staykeep_bookings_total";

/// Histogram: end-to-end booking latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "staykeep_booking_duration_seconds";

/// Counter: booking requests answered from an idempotency record.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "staykeep_idempotent_replays_total";

/// Counter: reservation status changes. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "staykeep_transitions_total";

// ── Inventory ───────────────────────────────────────────────────

/// Counter: CAS attempts that lost to a concurrent writer.
pub const CAS_CONFLICTS_TOTAL: &str = "staykeep_cas_conflicts_total";

/// Counter: partial hold sets rolled back after a later night failed.
pub const HOLD_COMPENSATIONS_TOTAL: &str = "staykeep_hold_compensations_total";

/// Counter: pending reservations released by the sweeper.
pub const HOLDS_EXPIRED_TOTAL: &str = "staykeep_holds_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staykeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staykeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staykeep_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "staykeep_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staykeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staykeep_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "staykeep_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateReservation(_) => "create_reservation",
        Command::ConfirmReservation { .. } => "confirm_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::MarkNoShow { .. } => "mark_no_show",
        Command::GetReservation { .. } => "get_reservation",
        Command::GetFolio { .. } => "get_folio",
        Command::DefineHotel(_) => "define_hotel",
        Command::DefineRoomType(_) => "define_room_type",
        Command::ProvisionInventory { .. } => "provision_inventory",
        Command::GetInventory { .. } => "get_inventory",
    }
}
