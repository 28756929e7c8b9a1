//! Text metrics exposition
//!
//! Formats the store contents and the snapshot board into the fixed
//! scrape format: fleet gauges first, then one labelled sample per
//! instance for restarts, CPU and memory.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::orchestrator::snapshot::SnapshotBoard;
use crate::store::InstanceRecord;

/// Content type of the exposition body.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render the full exposition. The body ends with one trailing newline.
pub fn render(instances: &BTreeMap<String, InstanceRecord>, board: &SnapshotBoard) -> String {
    let mut body = String::new();

    writeln!(
        body,
        "# HELP openclaw_instances_total Number of instance records in the store."
    )
    .ok();
    writeln!(body, "# TYPE openclaw_instances_total gauge").ok();
    writeln!(body, "openclaw_instances_total {}", instances.len()).ok();

    writeln!(
        body,
        "# HELP openclaw_instances_running Instances whose last observed status is running."
    )
    .ok();
    writeln!(body, "# TYPE openclaw_instances_running gauge").ok();
    writeln!(body, "openclaw_instances_running {}", board.running_count()).ok();

    writeln!(
        body,
        "# HELP openclaw_instance_restarts_total Unexpected terminations observed per instance."
    )
    .ok();
    writeln!(body, "# TYPE openclaw_instance_restarts_total counter").ok();
    for (id, record) in instances {
        writeln!(
            body,
            "openclaw_instance_restarts_total{} {}",
            labels(id, &record.pubkey),
            board.restart_count(id)
        )
        .ok();
    }

    writeln!(
        body,
        "# HELP openclaw_instance_cpu_percent CPU usage from the latest reconciler sample."
    )
    .ok();
    writeln!(body, "# TYPE openclaw_instance_cpu_percent gauge").ok();
    for (id, record) in instances {
        let cpu = board.get(id).map(|s| s.cpu_percent).unwrap_or(0.0);
        writeln!(
            body,
            "openclaw_instance_cpu_percent{} {:.4}",
            labels(id, &record.pubkey),
            cpu
        )
        .ok();
    }

    writeln!(
        body,
        "# HELP openclaw_instance_memory_bytes Memory usage from the latest reconciler sample."
    )
    .ok();
    writeln!(body, "# TYPE openclaw_instance_memory_bytes gauge").ok();
    for (id, record) in instances {
        let memory = board.get(id).map(|s| s.memory_bytes).unwrap_or(0);
        writeln!(
            body,
            "openclaw_instance_memory_bytes{} {}",
            labels(id, &record.pubkey),
            memory
        )
        .ok();
    }

    body
}

fn labels(id: &str, pubkey: &str) -> String {
    format!("{{instance=\"{}\",pubkey=\"{}\"}}", id, pubkey)
}
