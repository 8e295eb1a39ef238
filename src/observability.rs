use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, status.
pub const OPS_TOTAL: &str = "courtline_ops_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "courtline_op_duration_seconds";

/// Counter: auto-schedule runs. Labels: outcome (committed/dry_run/locked).
pub const SCHEDULE_RUNS_TOTAL: &str = "courtline_schedule_runs_total";

/// Histogram: matches placed per auto-schedule run.
pub const SCHEDULE_PLACED: &str = "courtline_schedule_placed";

/// Histogram: matches skipped per auto-schedule run.
pub const SCHEDULE_SKIPPED: &str = "courtline_schedule_skipped";

/// Counter: partnership overrides executed. Labels: status.
pub const OVERRIDE_EXECUTIONS_TOTAL: &str = "courtline_override_executions_total";

/// Counter: bookings rescheduled.
pub const RESCHEDULES_TOTAL: &str = "courtline_reschedules_total";

/// Counter: lock acquisitions refused (holder already present).
pub const LOCK_CONTENTION_TOTAL: &str = "courtline_lock_contention_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: resources currently loaded.
pub const RESOURCES_ACTIVE: &str = "courtline_resources_active";

/// Counter: expired pending bookings removed by the reaper.
pub const REAPED_BOOKINGS_TOTAL: &str = "courtline_reaped_bookings_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtline_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the fmt tracing subscriber. Safe to call more than once — later
/// calls are no-ops (tests init from multiple entry points).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}
