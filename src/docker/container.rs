//! Container creation and power operations

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use tracing::{debug, info};

use super::{classify, client, with_timeout, DockerError, DockerResult, CREATE_TIMEOUT};

/// Everything needed to create one instance container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image reference to run.
    pub image: String,

    /// Environment variables.
    pub env: Vec<(String, String)>,

    /// Host directory bind mounts.
    pub binds: Vec<BindMount>,

    /// The single published port mapping.
    pub published: PublishedPort,

    /// Memory limit in bytes.
    pub memory_bytes: i64,

    /// Memory + swap limit in bytes.
    pub memory_swap_bytes: i64,

    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: i64,

    /// Run with a read-only root filesystem.
    pub readonly_rootfs: bool,

    /// Writable tmpfs mounts: container path and size cap in MiB.
    pub tmpfs: Vec<(String, u64)>,

    /// Capabilities dropped from the container.
    pub cap_drop: Vec<String>,

    /// Capabilities added back.
    pub cap_add: Vec<String>,

    /// Entrypoint command vector.
    pub command: Vec<String>,
}

/// One host bind mount.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// Published port: container port exposed on a host address.
#[derive(Debug, Clone)]
pub struct PublishedPort {
    pub container_port: u16,
    pub bind_addr: String,
    pub host_port: u16,
}

/// Create a container from a [`ContainerSpec`]. Fails if the name is taken.
///
/// Returns the runtime's container identifier.
pub async fn create(name: &str, spec: &ContainerSpec) -> DockerResult<String> {
    let docker = client()?;

    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    let binds: Vec<String> = spec
        .binds
        .iter()
        .map(|bind| {
            let mode = if bind.read_only { ":ro" } else { "" };
            format!("{}:{}{}", bind.host.display(), bind.container, mode)
        })
        .collect();

    let port_key = format!("{}/tcp", spec.published.container_port);

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key.clone(), HashMap::new());

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    port_bindings.insert(
        port_key,
        Some(vec![PortBinding {
            host_ip: Some(spec.published.bind_addr.clone()),
            host_port: Some(spec.published.host_port.to_string()),
        }]),
    );

    let mut tmpfs = HashMap::new();
    for (path, size_mb) in &spec.tmpfs {
        tmpfs.insert(path.clone(), format!("rw,nosuid,size={}m", size_mb));
    }

    let host_config = HostConfig {
        binds: Some(binds),
        port_bindings: Some(port_bindings),
        memory: Some(spec.memory_bytes),
        memory_swap: Some(spec.memory_swap_bytes),
        nano_cpus: Some(spec.nano_cpus),
        readonly_rootfs: Some(spec.readonly_rootfs),
        tmpfs: if tmpfs.is_empty() { None } else { Some(tmpfs) },
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            ..Default::default()
        }),
        init: Some(true),
        cap_drop: Some(spec.cap_drop.clone()),
        cap_add: Some(spec.cap_add.clone()),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    let config = Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        cmd: Some(spec.command.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name,
        platform: None,
    };

    let response = with_timeout(
        CREATE_TIMEOUT,
        docker.create_container(Some(options), config),
    )
    .await?;

    info!("created container {}", name);
    Ok(response.id)
}

/// Start a created or stopped container.
pub async fn start(name: &str) -> DockerResult<()> {
    let docker = client()?;
    with_timeout(
        CREATE_TIMEOUT,
        docker.start_container(name, None::<StartContainerOptions<String>>),
    )
    .await?;

    info!("started container {}", name);
    Ok(())
}

/// Stop a container, giving it `grace_seconds` before the kill.
///
/// An already-stopped container (daemon 304) is success.
pub async fn stop(name: &str, grace_seconds: u32) -> DockerResult<()> {
    let docker = client()?;
    let options = StopContainerOptions {
        t: grace_seconds as i64,
    };

    // The daemon may legitimately take the full grace period.
    let deadline = Duration::from_secs(u64::from(grace_seconds) + 5);

    match tokio::time::timeout(deadline, docker.stop_container(name, Some(options))).await {
        Ok(Ok(())) => {
            info!("stopped container {}", name);
            Ok(())
        }
        Ok(Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        })) => {
            debug!("container {} already stopped", name);
            Ok(())
        }
        Ok(Err(err)) => Err(classify(err)),
        Err(_) => Err(DockerError::Unreachable(format!(
            "stop timed out after {}s",
            deadline.as_secs()
        ))),
    }
}

/// Remove a container. A missing container is not an error.
pub async fn remove(name: &str, force: bool) -> DockerResult<()> {
    let docker = client()?;
    let options = RemoveContainerOptions {
        force,
        v: false,
        ..Default::default()
    };

    match with_timeout(CREATE_TIMEOUT, docker.remove_container(name, Some(options))).await {
        Ok(()) => {
            info!("removed container {}", name);
            Ok(())
        }
        Err(DockerError::NotFound) => {
            debug!("container {} does not exist, nothing to remove", name);
            Ok(())
        }
        Err(err) => Err(err),
    }
}
