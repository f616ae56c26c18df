use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "opshours_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "opshours_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "opshours_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "opshours_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "opshours_connections_rejected_total";

/// Counter: logins refused for unknown or malformed user names.
pub const AUTH_FAILURES_TOTAL: &str = "opshours_auth_failures_total";

// ── Schedule ────────────────────────────────────────────────────

/// Gauge: operating-hours windows currently stored.
pub const OPERATING_HOURS: &str = "opshours_operating_hours";

/// Counter: creates/updates rejected for overlapping an existing window.
pub const OVERLAP_REJECTIONS_TOTAL: &str = "opshours_overlap_rejections_total";

/// Counter: mutations refused by the permission checker.
pub const PERMISSION_DENIALS_TOTAL: &str = "opshours_permission_denials_total";

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "opshours_wal_flush_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectHours { .. } => "select_hours",
        Command::GetHours { .. } => "get_hours",
        Command::InsertHours { .. } => "insert_hours",
        Command::UpdateHours { .. } => "update_hours",
        Command::DeleteHours { .. } => "delete_hours",
        Command::SelectPage { .. } => "select_page",
        Command::SelectCount { .. } => "select_count",
    }
}
