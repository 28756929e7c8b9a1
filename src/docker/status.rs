//! Status inspection and resource sampling

use bollard::container::{CPUStats, MemoryStats, StatsOptions};
use bollard::models::ContainerStateStatusEnum;
use futures_util::StreamExt;

use crate::orchestrator::snapshot::InstanceStatus;

use super::{client, with_timeout, DockerError, DockerResult, INSPECT_TIMEOUT, STATS_TIMEOUT};

/// One-shot resource sample for a running container.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StatsSample {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
}

/// Inspect the container's lifecycle state.
///
/// `starting` is never produced here: the controller seeds it, the runtime
/// does not report it. States the snapshot model has no name for
/// (`created`, `restarting`) come back as `unknown`.
pub async fn inspect_status(name: &str) -> DockerResult<InstanceStatus> {
    let docker = client()?;
    let info = with_timeout(INSPECT_TIMEOUT, docker.inspect_container(name, None)).await?;

    let status = info
        .state
        .and_then(|state| state.status)
        .map(map_runtime_status)
        .unwrap_or(InstanceStatus::Unknown);

    Ok(status)
}

fn map_runtime_status(status: ContainerStateStatusEnum) -> InstanceStatus {
    match status {
        ContainerStateStatusEnum::RUNNING => InstanceStatus::Running,
        ContainerStateStatusEnum::EXITED => InstanceStatus::Exited,
        ContainerStateStatusEnum::DEAD => InstanceStatus::Dead,
        ContainerStateStatusEnum::REMOVING => InstanceStatus::Removing,
        ContainerStateStatusEnum::PAUSED => InstanceStatus::Paused,
        _ => InstanceStatus::Unknown,
    }
}

/// Take a single stats sample from the runtime.
pub async fn sample_stats(name: &str) -> DockerResult<StatsSample> {
    let docker = client()?;
    let options = StatsOptions {
        stream: false,
        one_shot: false,
    };

    let mut stream = docker.stats(name, Some(options));

    let first = match tokio::time::timeout(STATS_TIMEOUT, stream.next()).await {
        Ok(Some(result)) => result.map_err(super::classify)?,
        Ok(None) => {
            return Err(DockerError::Api(
                "stats stream ended without a sample".to_string(),
            ))
        }
        Err(_) => {
            return Err(DockerError::Unreachable(format!(
                "stats sample timed out after {}s",
                STATS_TIMEOUT.as_secs()
            )))
        }
    };

    Ok(StatsSample {
        cpu_percent: compute_cpu_percent(&first.cpu_stats, &first.precpu_stats),
        memory_bytes: compute_memory(&first.memory_stats),
        memory_limit_bytes: first.memory_stats.limit.unwrap_or(0),
    })
}

/// CPU percentage between the sample and the runtime's prior sample:
/// `(cpu_delta / system_delta) * cpu_count * 100`, zero when either delta
/// is not positive.
fn compute_cpu_percent(cpu: &CPUStats, precpu: &CPUStats) -> f64 {
    let cpu_delta = cpu.cpu_usage.total_usage as i64 - precpu.cpu_usage.total_usage as i64;
    let system_delta =
        cpu.system_cpu_usage.unwrap_or(0) as i64 - precpu.system_cpu_usage.unwrap_or(0) as i64;

    if cpu_delta <= 0 || system_delta <= 0 {
        return 0.0;
    }

    let cpu_count = cpu
        .cpu_usage
        .percpu_usage
        .as_ref()
        .map(|per_cpu| per_cpu.len())
        .filter(|count| *count > 0)
        .unwrap_or(1) as f64;

    (cpu_delta as f64 / system_delta as f64) * cpu_count * 100.0
}

fn compute_memory(memory: &MemoryStats) -> u64 {
    memory.usage.unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::container::{CPUUsage, ThrottlingData};

    fn cpu_stats(total: u64, system: Option<u64>, per_cpu: Option<Vec<u64>>) -> CPUStats {
        CPUStats {
            cpu_usage: CPUUsage {
                percpu_usage: per_cpu,
                usage_in_usermode: 0,
                total_usage: total,
                usage_in_kernelmode: 0,
            },
            system_cpu_usage: system,
            online_cpus: None,
            throttling_data: ThrottlingData {
                periods: 0,
                throttled_periods: 0,
                throttled_time: 0,
            },
        }
    }

    fn empty_memory_stats() -> MemoryStats {
        MemoryStats {
            stats: None,
            max_usage: None,
            usage: None,
            failcnt: None,
            limit: None,
            commit: None,
            commit_peak: None,
            commitbytes: None,
            commitpeakbytes: None,
            privateworkingset: None,
        }
    }

    #[test]
    fn test_cpu_percent_basic() {
        let pre = cpu_stats(100_000_000, Some(500_000_000), None);
        let cur = cpu_stats(200_000_000, Some(1_000_000_000), Some(vec![0, 0, 0, 0]));

        // (100M / 500M) * 4 * 100 = 80%
        let percent = compute_cpu_percent(&cur, &pre);
        assert!((percent - 80.0).abs() < 0.001);
    }

    #[test]
    fn test_cpu_percent_defaults_to_one_cpu() {
        let pre = cpu_stats(0, Some(0), None);
        let cur = cpu_stats(250_000_000, Some(1_000_000_000), None);

        let percent = compute_cpu_percent(&cur, &pre);
        assert!((percent - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_cpu_percent_zero_on_nonpositive_deltas() {
        let pre = cpu_stats(200_000_000, Some(1_000_000_000), None);
        let same = cpu_stats(200_000_000, Some(1_000_000_000), None);
        assert_eq!(compute_cpu_percent(&same, &pre), 0.0);

        let backwards = cpu_stats(100_000_000, Some(500_000_000), None);
        assert_eq!(compute_cpu_percent(&backwards, &pre), 0.0);

        let no_system = cpu_stats(300_000_000, None, None);
        assert_eq!(compute_cpu_percent(&no_system, &pre), 0.0);
    }

    #[test]
    fn test_compute_memory() {
        let mut memory = empty_memory_stats();
        memory.usage = Some(150_000_000);
        assert_eq!(compute_memory(&memory), 150_000_000);

        assert_eq!(compute_memory(&empty_memory_stats()), 0);
    }

    #[test]
    fn test_map_runtime_status() {
        assert_eq!(
            map_runtime_status(ContainerStateStatusEnum::RUNNING),
            InstanceStatus::Running
        );
        assert_eq!(
            map_runtime_status(ContainerStateStatusEnum::EXITED),
            InstanceStatus::Exited
        );
        assert_eq!(
            map_runtime_status(ContainerStateStatusEnum::CREATED),
            InstanceStatus::Unknown
        );
        assert_eq!(
            map_runtime_status(ContainerStateStatusEnum::RESTARTING),
            InstanceStatus::Unknown
        );
    }
}
