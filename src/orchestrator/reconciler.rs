//! Background health reconciler
//!
//! One long-lived task refreshes the snapshot board from the runtime every
//! [`RECONCILE_PERIOD`]. It only describes: records are never created or
//! destroyed here, and a failed pass leaves the board as it was.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::docker::{self, DockerError};
use crate::identity::container_name;
use crate::settings::RECONCILE_PERIOD;
use crate::store::StoreError;

use super::snapshot::InstanceStatus;
use super::Orchestrator;

/// Spawn the reconciler task. Idempotent: later calls are no-ops.
pub fn start(orchestrator: &Arc<Orchestrator>, shutdown: CancellationToken) {
    {
        let mut started = orchestrator.reconciler_started_flag().lock();
        if *started {
            debug!("reconciler already running");
            return;
        }
        *started = true;
    }

    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RECONCILE_PERIOD);
        interval.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("reconciler stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = run_pass(&orchestrator).await {
                        warn!("reconciler pass failed: {}", err);
                    }
                }
            }
        }
    });
}

/// One reconciler pass over every known instance.
pub async fn run_pass(orchestrator: &Orchestrator) -> Result<(), StoreError> {
    let instances = orchestrator.store().load()?;
    let ids: HashSet<String> = instances.keys().cloned().collect();

    if let Err(err) = docker::ping().await {
        warn!("skipping reconciler pass, docker unreachable: {}", err);
        return Ok(());
    }

    let board = orchestrator.board();
    board.retain_ids(&ids);

    for id in instances.keys() {
        let name = container_name(id);

        match docker::status::inspect_status(&name).await {
            Ok(status) => {
                let (cpu_percent, memory_bytes) = if status == InstanceStatus::Running {
                    match docker::status::sample_stats(&name).await {
                        Ok(sample) => (sample.cpu_percent, sample.memory_bytes),
                        Err(err) => {
                            debug!("stats sample for {} failed: {}", name, err);
                            (0.0, 0)
                        }
                    }
                } else {
                    (0.0, 0)
                };

                let observation = board.observe(id, status, cpu_percent, memory_bytes);
                if observation.restart_detected {
                    warn!(
                        "instance {} transitioned running -> {}, restart count now {}",
                        id,
                        status,
                        board.restart_count(id)
                    );
                }
            }
            Err(DockerError::NotFound) => {
                let observation = board.observe(id, InstanceStatus::NotFound, 0.0, 0);
                let already_missing = matches!(
                    observation.previous,
                    Some(InstanceStatus::NotFound) | Some(InstanceStatus::Unknown)
                );
                if !already_missing {
                    warn!("container for instance {} has disappeared", id);
                }
            }
            Err(err) => {
                warn!("status inspect for {} failed: {}", id, err);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Arc::new(Orchestrator::new(Settings::for_tests(dir.path())));
        let shutdown = CancellationToken::new();

        start(&orchestrator, shutdown.clone());
        assert!(*orchestrator.reconciler_started_flag().lock());

        // Second call must not spawn a second task.
        start(&orchestrator, shutdown.clone());
        assert!(*orchestrator.reconciler_started_flag().lock());

        shutdown.cancel();
    }
}
