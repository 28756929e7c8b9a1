//! Runtime settings and fixed deployment constants

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// First host port handed out to an instance.
pub const BASE_PORT: u16 = 19000;

/// Hard cap on the number of instance records.
pub const MAX_INSTANCES: usize = 20;

/// Image every instance runs.
pub const OPENCLAW_IMAGE: &str = "openclaw:local";

/// Port the gateway listens on inside the container.
pub const GATEWAY_PORT: u16 = 18789;

/// Interval between health reconciler passes.
pub const RECONCILE_PERIOD: Duration = Duration::from_secs(60);

/// Daemon settings, assembled once at startup from CLI/env.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the HTTP API binds to.
    pub listen: SocketAddr,

    /// Overlay-network address the per-instance port is published on.
    pub tailscale_ip: String,

    /// Bearer token protecting `/api/*`. Empty disables auth.
    pub launcher_token: String,

    /// Root directory for the store and per-instance state.
    pub data_dir: PathBuf,

    /// Resource caps applied to every container.
    pub limits: ContainerLimits,
}

/// Per-container cgroup caps.
#[derive(Debug, Clone)]
pub struct ContainerLimits {
    /// Memory limit in bytes.
    pub memory_bytes: i64,

    /// Memory + swap limit in bytes.
    pub memory_swap_bytes: i64,

    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: i64,

    /// Size cap for the writable /tmp tmpfs, in MiB.
    pub tmpfs_size_mb: u64,

    /// Run the container with a read-only root filesystem.
    pub readonly_rootfs: bool,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 2 * 1024 * 1024 * 1024,
            memory_swap_bytes: 2 * 1024 * 1024 * 1024,
            nano_cpus: 2_000_000_000,
            tmpfs_size_mb: 128,
            readonly_rootfs: false,
        }
    }
}

impl Settings {
    /// Path of the persistent instance store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("instances.json")
    }

    /// Directory holding all per-instance state.
    pub fn instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }

    /// Root directory for one instance.
    pub fn instance_dir(&self, id: &str) -> PathBuf {
        self.instances_dir().join(id)
    }

    /// Workspace directory bind-mounted into the container.
    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.instance_dir(id).join("workspace")
    }

    /// Directory seeded into new workspaces, if it exists.
    pub fn template_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }

    /// Create the data directories the daemon relies on.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.instances_dir())?;
        Ok(())
    }
}

impl Settings {
    /// Settings for tests, rooted at a throwaway directory.
    #[cfg(test)]
    pub fn for_tests(root: &std::path::Path) -> Self {
        Self {
            listen: "127.0.0.1:0".parse().expect("test addr"),
            tailscale_ip: "100.118.141.107".to_string(),
            launcher_token: String::new(),
            data_dir: root.to_path_buf(),
            limits: ContainerLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_paths_derive_from_data_dir() {
        let settings = Settings::for_tests(Path::new("/srv/launcher"));

        assert_eq!(
            settings.store_path(),
            PathBuf::from("/srv/launcher/instances.json")
        );
        assert_eq!(
            settings.workspace_dir("abc123def456"),
            PathBuf::from("/srv/launcher/instances/abc123def456/workspace")
        );
    }
}
