use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "weekslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "weekslot_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "weekslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "weekslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "weekslot_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "weekslot_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "weekslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "weekslot_wal_flush_batch_size";

/// Counter: WAL compactions run by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "weekslot_wal_compactions_total";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: writes rejected for overlapping an active entry. Labels: resource.
pub const CONFLICTS_TOTAL: &str = "weekslot_conflicts_total";

/// Counter: schedule entries created.
pub const ENTRIES_CREATED_TOTAL: &str = "weekslot_entries_created_total";

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
        Command::InsertEntries { entries, .. } if entries.len() > 1 => "insert_entries_batch",
        Command::InsertEntries { .. } => "insert_entry",
        Command::UpdateEntry { .. } => "update_entry",
        Command::DeactivateEntry { .. } => "deactivate_entry",
        Command::DeleteEntry { .. } => "delete_entry",
        Command::SelectEntries { .. } => "select_entries",
        Command::SelectConflicts { .. } => "select_conflicts",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn labels_distinguish_batches() {
        let single = parse_sql(
            "INSERT INTO schedule_entries (course_ref, day_of_week, start_time, end_time, effective_from) \
             VALUES ('CS101', 'mon', '09:00', '10:00', '2024-01-01')",
        )
        .unwrap();
        assert_eq!(command_label(&single), "insert_entry");

        let batch = parse_sql(
            "INSERT INTO schedule_entries (course_ref, day_of_week, start_time, end_time, effective_from) \
             VALUES ('CS101', 'mon', '09:00', '10:00', '2024-01-01'), ('CS101', 'wed', '09:00', '10:00', '2024-01-01')",
        )
        .unwrap();
        assert_eq!(command_label(&batch), "insert_entries_batch");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
