//! Persistent instance store
//!
//! One JSON file maps instance ids to their records. Read-modify-write
//! sections hold an advisory exclusive lock on the backing file (plus an
//! in-process mutex so concurrent handlers queue instead of contending on
//! the OS lock), and every rewrite goes through a temp-file-plus-rename so
//! a crash never leaves a half-written store.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Persisted record for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Wallet public key the instance is bound to.
    pub pubkey: String,

    /// Host port the gateway is published on.
    pub port: u16,

    /// Per-instance secret. Never surfaced outside create/restart.
    pub gateway_token: String,

    /// Creation time, seconds since epoch.
    pub created: u64,

    /// Most recent start or restart, seconds since epoch.
    pub last_started: u64,

    /// 12-character prefix of the runtime's container id.
    pub container_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk shape: `{"instances": {id: record}}`, key-sorted.
#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    #[serde(default)]
    instances: BTreeMap<String, InstanceRecord>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    instances: &'a BTreeMap<String, InstanceRecord>,
}

/// Handle on the store file.
pub struct InstanceStore {
    path: PathBuf,
    section: Mutex<()>,
}

impl InstanceStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            section: Mutex::new(()),
        }
    }

    /// Enter the exclusive section: lock the backing file and parse it.
    ///
    /// The guard owns both locks for its lifetime; callers mutate
    /// `instances` and call [`StoreGuard::save`] to persist.
    pub async fn lock_exclusive(&self) -> StoreResult<StoreGuard<'_>> {
        let section = self.section.lock().await;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let instances = parse_or_empty(&content)?;

        Ok(StoreGuard {
            _section: section,
            _file: file,
            path: self.path.clone(),
            instances,
        })
    }

    /// Lock-free read of the current mapping.
    ///
    /// Tolerates a concurrent rewrite: one reread on parse failure before
    /// the error surfaces.
    pub fn load(&self) -> StoreResult<BTreeMap<String, InstanceRecord>> {
        match read_and_parse(&self.path) {
            Ok(instances) => Ok(instances),
            Err(StoreError::Parse(first)) => {
                warn!("store parse failed ({}), rereading", first);
                read_and_parse(&self.path)
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Exclusive section over the store.
pub struct StoreGuard<'a> {
    _section: MutexGuard<'a, ()>,
    _file: File,
    path: PathBuf,
    pub instances: BTreeMap<String, InstanceRecord>,
}

impl StoreGuard<'_> {
    /// Persist the current mapping: serialise, write a temp file, fsync,
    /// rename over the store path.
    pub fn save(&self) -> StoreResult<()> {
        let body = serde_json::to_string_pretty(&StoreFileRef {
            instances: &self.instances,
        })?;

        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_and_parse(path: &Path) -> StoreResult<BTreeMap<String, InstanceRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    parse_or_empty(&content)
}

/// An absent, empty, or whitespace-only file is the empty mapping.
fn parse_or_empty(content: &str) -> StoreResult<BTreeMap<String, InstanceRecord>> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: StoreFile = serde_json::from_str(content)?;
    Ok(parsed.instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn record(port: u16) -> InstanceRecord {
        InstanceRecord {
            pubkey: "W".repeat(44),
            port,
            gateway_token: "ab".repeat(24),
            created: 1_700_000_000,
            last_started: 1_700_000_100,
            container_id: "0123456789ab".to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(dir.path().join("instances.json"));

        {
            let mut guard = store.lock_exclusive().await.unwrap();
            guard.instances.insert("aaaaaaaaaaaa".to_string(), record(19000));
            guard.instances.insert("bbbbbbbbbbbb".to_string(), record(19001));
            guard.save().unwrap();
        }

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["aaaaaaaaaaaa"], record(19000));
        assert_eq!(loaded["bbbbbbbbbbbb"], record(19001));
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(dir.path().join("instances.json"));

        {
            let mut guard = store.lock_exclusive().await.unwrap();
            guard.instances.insert("aaaaaaaaaaaa".to_string(), record(19000));
            guard.save().unwrap();
        }
        {
            let mut guard = store.lock_exclusive().await.unwrap();
            guard.instances.remove("aaaaaaaaaaaa");
            guard.save().unwrap();
        }

        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_parse_or_empty() {
        assert!(parse_or_empty("").unwrap().is_empty());
        assert!(parse_or_empty("  \n\t ").unwrap().is_empty());
        assert!(parse_or_empty(r#"{"instances": {}}"#).unwrap().is_empty());
        assert!(parse_or_empty("{not json").is_err());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(dir.path().join("does-not-exist.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saved_file_is_key_sorted() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(dir.path().join("instances.json"));

        {
            let mut guard = store.lock_exclusive().await.unwrap();
            guard.instances.insert("zzzzzzzzzzzz".to_string(), record(19001));
            guard.instances.insert("aaaaaaaaaaaa".to_string(), record(19000));
            guard.save().unwrap();
        }

        let body = std::fs::read_to_string(store.path()).unwrap();
        let first = body.find("aaaaaaaaaaaa").unwrap();
        let second = body.find("zzzzzzzzzzzz").unwrap();
        assert!(first < second);
        assert!(body.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_ports_distinct_across_records() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(dir.path().join("instances.json"));

        {
            let mut guard = store.lock_exclusive().await.unwrap();
            for (i, id) in ["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"].iter().enumerate() {
                guard.instances.insert(id.to_string(), record(19000 + i as u16));
            }
            guard.save().unwrap();
        }

        let loaded = store.load().unwrap();
        let ports: HashSet<u16> = loaded.values().map(|r| r.port).collect();
        assert_eq!(ports.len(), loaded.len());
    }
}
