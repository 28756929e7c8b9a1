//! Lifecycle orchestration
//!
//! The [`Orchestrator`] owns the persistent store, the in-memory snapshot
//! board, and the settings, and drives every instance transition. Create
//! and restart decisions run inside the store's exclusive section so two
//! concurrent launches for one wallet cannot race past the existence
//! check.

pub mod reconciler;
pub mod snapshot;

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngCore;
use tracing::warn;

use crate::docker::{self, BindMount, ContainerSpec, DockerError, PublishedPort};
use crate::identity::{container_name, derive_id, validate_pubkey};
use crate::ports::next_free_port;
use crate::settings::{Settings, GATEWAY_PORT, MAX_INSTANCES, OPENCLAW_IMAGE};
use crate::store::{InstanceRecord, InstanceStore, StoreError};
use crate::workspace::{self, WorkspacePaths};

use snapshot::{epoch_secs, InstanceStatus, SnapshotBoard};

/// How long a restarted container gets to settle before its status is
/// re-read for the response.
const RESTART_SETTLE: Duration = Duration::from_secs(2);

/// Grace period for an operator-requested stop.
const STOP_GRACE_SECS: u32 = 30;

/// Grace period for the stop preceding a destroy.
const DESTROY_GRACE_SECS: u32 = 15;

/// A launched (created or restarted) instance, token included.
#[derive(Debug, Clone)]
pub struct LaunchedInstance {
    pub id: String,
    pub record: InstanceRecord,
    pub status: InstanceStatus,
}

/// One row of the instance listing.
#[derive(Debug, Clone)]
pub struct ListedInstance {
    pub id: String,
    pub record: InstanceRecord,
    pub status: InstanceStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("invalid wallet public key")]
    BadInput,

    #[error("instance already running")]
    Conflict {
        id: String,
        record: InstanceRecord,
        status: InstanceStatus,
    },

    #[error("maximum {0} instances reached")]
    CapacityExceeded(usize),

    #[error("docker daemon unreachable: {0}")]
    Unreachable(String),

    #[error("docker launch failed: {0}")]
    Api(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workspace provisioning failed: {0}")]
    Workspace(#[from] std::io::Error),
}

impl From<DockerError> for LaunchError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::Unreachable(message) => Self::Unreachable(message),
            DockerError::Api(message) => Self::Api(message),
            DockerError::NotFound => Self::Api("container not found".to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("missing wallet public key")]
    BadInput,

    #[error("container not found or already stopped")]
    NotFound,

    #[error("docker daemon unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DestroyError {
    #[error("missing wallet public key")]
    BadInput,

    #[error("docker daemon unreachable: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Process-wide orchestration state.
pub struct Orchestrator {
    settings: Settings,
    store: InstanceStore,
    board: SnapshotBoard,
    reconciler_started: Mutex<bool>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        let store = InstanceStore::new(settings.store_path());
        Self {
            settings,
            store,
            board: SnapshotBoard::new(),
            reconciler_started: Mutex::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn board(&self) -> &SnapshotBoard {
        &self.board
    }

    pub(crate) fn store(&self) -> &InstanceStore {
        &self.store
    }

    /// Create the instance for a wallet, or restart its stopped container.
    ///
    /// The whole decision runs inside the store's exclusive section.
    pub async fn launch(&self, raw_pubkey: &str) -> Result<LaunchedInstance, LaunchError> {
        let pubkey = validate_pubkey(raw_pubkey).ok_or(LaunchError::BadInput)?;
        let id = derive_id(pubkey);
        let name = container_name(&id);

        let mut guard = self.store.lock_exclusive().await?;

        if let Some(existing) = guard.instances.get(&id).cloned() {
            // Only an unreachable daemon aborts the decision; any other
            // inspect failure reads as "not running" and the restart is
            // still attempted.
            let status = match docker::status::inspect_status(&name).await {
                Ok(status) => status,
                Err(DockerError::NotFound) => InstanceStatus::NotFound,
                Err(DockerError::Unreachable(message)) => {
                    return Err(LaunchError::Unreachable(message))
                }
                Err(err @ DockerError::Api(_)) => {
                    warn!("status inspect for {} failed: {}", name, err);
                    InstanceStatus::Unknown
                }
            };

            if status == InstanceStatus::Running {
                return Err(LaunchError::Conflict {
                    id,
                    record: existing,
                    status,
                });
            }

            // Exists but stopped: bring the old container back.
            match docker::container::start(&name).await {
                Ok(()) => {}
                Err(DockerError::Unreachable(message)) => {
                    return Err(LaunchError::Unreachable(message))
                }
                Err(err) => warn!("restart of {} did not start cleanly: {}", name, err),
            }

            tokio::time::sleep(RESTART_SETTLE).await;

            let refreshed = match docker::status::inspect_status(&name).await {
                Ok(status) => status,
                Err(DockerError::NotFound) => InstanceStatus::NotFound,
                Err(_) => InstanceStatus::Unknown,
            };

            let mut record = existing;
            record.last_started = epoch_secs();
            guard.instances.insert(id.clone(), record.clone());
            guard.save()?;
            self.board.invalidate(&id);

            return Ok(LaunchedInstance {
                id,
                record,
                status: refreshed,
            });
        }

        if guard.instances.len() >= MAX_INSTANCES {
            return Err(LaunchError::CapacityExceeded(MAX_INSTANCES));
        }

        let port = next_free_port(&guard.instances, crate::settings::BASE_PORT);
        let gateway_token = generate_token();

        let paths = workspace::provision(&self.settings, &id, pubkey, &gateway_token)?;

        let spec = self.container_spec(port, &gateway_token, &paths);
        let container_id = docker::container::create(&name, &spec).await?;
        if let Err(err) = docker::container::start(&name).await {
            // A named container without a record would block every retry
            // at create(); take it back out so the next launch is clean.
            if let Err(remove_err) = docker::container::remove(&name, true).await {
                warn!("cleanup removal of {} failed: {}", name, remove_err);
            }
            return Err(err.into());
        }

        let now = epoch_secs();
        let record = InstanceRecord {
            pubkey: pubkey.to_string(),
            port,
            gateway_token,
            created: now,
            last_started: now,
            container_id: short_container_id(&container_id),
        };
        guard.instances.insert(id.clone(), record.clone());
        guard.save()?;

        self.board.seed(&id, InstanceStatus::Starting);

        Ok(LaunchedInstance {
            id,
            record,
            status: InstanceStatus::Starting,
        })
    }

    /// Stop a wallet's container with the standard grace period.
    pub async fn stop(&self, raw_pubkey: &str) -> Result<String, StopError> {
        let pubkey = raw_pubkey.trim();
        if pubkey.is_empty() {
            return Err(StopError::BadInput);
        }
        let id = derive_id(pubkey);
        let name = container_name(&id);

        match docker::container::stop(&name, STOP_GRACE_SECS).await {
            Ok(()) => {}
            Err(DockerError::NotFound) => return Err(StopError::NotFound),
            Err(DockerError::Unreachable(message)) => return Err(StopError::Unreachable(message)),
            // A daemon refusal surfaces like a missing container.
            Err(DockerError::Api(message)) => {
                warn!("stop of {} failed: {}", name, message);
                return Err(StopError::NotFound);
            }
        }

        self.board.invalidate(&id);
        Ok(id)
    }

    /// Destroy a wallet's instance: container gone, record gone, counters
    /// gone. The workspace directory stays on disk. A missing container is
    /// not an error.
    pub async fn destroy(&self, raw_pubkey: &str) -> Result<String, DestroyError> {
        let pubkey = raw_pubkey.trim();
        if pubkey.is_empty() {
            return Err(DestroyError::BadInput);
        }
        let id = derive_id(pubkey);
        let name = container_name(&id);

        if let Err(err) = docker::container::stop(&name, DESTROY_GRACE_SECS).await {
            match err {
                DockerError::Unreachable(message) => {
                    return Err(DestroyError::Unreachable(message))
                }
                other => warn!("pre-destroy stop of {} failed: {}", name, other),
            }
        }

        match docker::container::remove(&name, true).await {
            Ok(()) => {}
            Err(DockerError::Unreachable(message)) => {
                return Err(DestroyError::Unreachable(message))
            }
            Err(err) => warn!("removal of {} failed: {}", name, err),
        }

        let mut guard = self.store.lock_exclusive().await?;
        if guard.instances.remove(&id).is_some() {
            guard.save()?;
        }
        drop(guard);

        self.board.remove(&id);
        Ok(id)
    }

    /// Read-only listing: records plus status, token redacted by the
    /// caller's wire type.
    ///
    /// Status comes from the snapshot; a missing snapshot falls back to a
    /// single live inspect without populating the board (the reconciler is
    /// the only writer on its own behalf).
    pub async fn list(&self) -> Result<Vec<ListedInstance>, StoreError> {
        let instances = self.store.load()?;
        let mut listed = Vec::with_capacity(instances.len());

        for (id, record) in instances {
            let status = match self.board.get(&id) {
                Some(snapshot) => snapshot.status,
                None => match docker::status::inspect_status(&container_name(&id)).await {
                    Ok(status) => status,
                    Err(DockerError::NotFound) => InstanceStatus::NotFound,
                    Err(_) => InstanceStatus::Unknown,
                },
            };
            listed.push(ListedInstance { id, record, status });
        }

        Ok(listed)
    }

    /// Live status + stats for one instance, bypassing the snapshot.
    pub async fn stats_for(
        &self,
        id: &str,
    ) -> Result<(InstanceStatus, Option<docker::StatsSample>), DockerError> {
        let name = container_name(id);

        let status = match docker::status::inspect_status(&name).await {
            Ok(status) => status,
            Err(DockerError::NotFound) => return Ok((InstanceStatus::NotFound, None)),
            Err(err) => return Err(err),
        };

        let stats = if status == InstanceStatus::Running {
            match docker::status::sample_stats(&name).await {
                Ok(sample) => Some(sample),
                Err(err) => {
                    warn!("stats sample for {} failed: {}", name, err);
                    None
                }
            }
        } else {
            None
        };

        Ok((status, stats))
    }

    /// Whether a record exists for this id.
    pub fn has_instance(&self, id: &str) -> bool {
        self.store
            .load()
            .map(|instances| instances.contains_key(id))
            .unwrap_or(false)
    }

    /// Number of records in the store, best effort.
    pub fn instance_count(&self) -> usize {
        self.store.load().map(|instances| instances.len()).unwrap_or(0)
    }

    /// Current store contents, for the metrics exposition.
    pub fn records(&self) -> BTreeMap<String, InstanceRecord> {
        self.store.load().unwrap_or_default()
    }

    fn container_spec(&self, port: u16, gateway_token: &str, paths: &WorkspacePaths) -> ContainerSpec {
        let limits = &self.settings.limits;
        ContainerSpec {
            image: OPENCLAW_IMAGE.to_string(),
            env: vec![
                ("HOME".to_string(), "/home/node".to_string()),
                ("TERM".to_string(), "xterm-256color".to_string()),
                (
                    "OPENCLAW_GATEWAY_TOKEN".to_string(),
                    gateway_token.to_string(),
                ),
            ],
            binds: vec![
                BindMount {
                    host: paths.config_dir.clone(),
                    container: "/home/node/.openclaw".to_string(),
                    read_only: false,
                },
                BindMount {
                    host: paths.workspace_dir.clone(),
                    container: "/home/node/.openclaw/workspace".to_string(),
                    read_only: false,
                },
            ],
            published: PublishedPort {
                container_port: GATEWAY_PORT,
                bind_addr: self.settings.tailscale_ip.clone(),
                host_port: port,
            },
            memory_bytes: limits.memory_bytes,
            memory_swap_bytes: limits.memory_swap_bytes,
            nano_cpus: limits.nano_cpus,
            readonly_rootfs: limits.readonly_rootfs,
            tmpfs: vec![("/tmp".to_string(), limits.tmpfs_size_mb)],
            cap_drop: vec!["ALL".to_string()],
            cap_add: vec![
                "CHOWN".to_string(),
                "DAC_OVERRIDE".to_string(),
                "FOWNER".to_string(),
                "SETGID".to_string(),
                "SETUID".to_string(),
            ],
            command: vec![
                "node".to_string(),
                "dist/index.js".to_string(),
                "gateway".to_string(),
                "--bind".to_string(),
                "lan".to_string(),
                "--port".to_string(),
                GATEWAY_PORT.to_string(),
            ],
        }
    }

    pub(crate) fn reconciler_started_flag(&self) -> &Mutex<bool> {
        &self.reconciler_started
    }
}

/// 24 cryptographically random bytes, hex encoded to 48 characters.
fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn short_container_id(container_id: &str) -> String {
    container_id.chars().take(12).collect()
}
