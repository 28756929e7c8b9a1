//! Per-instance workspace provisioning
//!
//! Materialises the on-disk state one container mounts: a config directory
//! with the gateway configuration and a workspace directory seeded from
//! the template set, carrying an identity marker for the wallet.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::settings::{Settings, GATEWAY_PORT};

/// Name of the runtime config file inside the config directory.
pub const CONFIG_FILE: &str = "openclaw.json";

/// Name of the identity marker inside the workspace.
pub const IDENTITY_FILE: &str = "IDENTITY.md";

/// Directories owned by one instance.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

/// Create or refresh the workspace for an instance.
///
/// Template seeding is skip-on-exist and best-effort; the config file and
/// identity marker are rewritten on every call. Directory or write
/// failures fail the launch.
pub fn provision(
    settings: &Settings,
    id: &str,
    pubkey: &str,
    gateway_token: &str,
) -> io::Result<WorkspacePaths> {
    let root = settings.instance_dir(id);
    let config_dir = root.join("config");
    let workspace_dir = root.join("workspace");

    let mut builder = DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(&config_dir)?;
    builder.create(&workspace_dir)?;

    seed_templates(&settings.template_dir(), &workspace_dir);

    let config = gateway_config(gateway_token);
    std::fs::write(
        config_dir.join(CONFIG_FILE),
        serde_json::to_string_pretty(&config)? + "\n",
    )?;

    std::fs::write(
        workspace_dir.join(IDENTITY_FILE),
        identity_marker(pubkey, id),
    )?;

    Ok(WorkspacePaths {
        config_dir,
        workspace_dir,
    })
}

/// Copy template files into the workspace, skipping files that already
/// exist. Seeding problems are logged and swallowed; a workspace without
/// templates is still usable.
fn seed_templates(template_dir: &PathBuf, workspace_dir: &PathBuf) {
    let entries = match std::fs::read_dir(template_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("no template directory to seed from: {}", err);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable template entry: {}", err);
                continue;
            }
        };
        let source = entry.path();
        if !source.is_file() {
            continue;
        }

        let destination = workspace_dir.join(entry.file_name());
        if destination.exists() {
            continue;
        }
        if let Err(err) = std::fs::copy(&source, &destination) {
            warn!("failed to seed {}: {}", source.display(), err);
        }
    }
}

/// The per-instance gateway configuration, token interpolated.
fn gateway_config(gateway_token: &str) -> serde_json::Value {
    json!({
        "agents": {
            "defaults": {
                "workspace": "/home/node/.openclaw/workspace",
                "bootstrapMaxChars": 30000,
                "bootstrapTotalMaxChars": 80000
            }
        },
        "gateway": {
            "port": GATEWAY_PORT,
            "mode": "local",
            "bind": "lan",
            "auth": {
                "mode": "token",
                "token": gateway_token
            },
            "controlUi": {
                "allowInsecureAuth": true
            }
        }
    })
}

fn identity_marker(pubkey: &str, id: &str) -> String {
    format!(
        "# Identity\n\n- **Wallet:** `{}`\n- **Instance:** `{}`\n- **Created:** {}\n",
        pubkey,
        id,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const ID: &str = "0123456789ab";

    fn pubkey() -> String {
        "K".repeat(44)
    }

    #[test]
    fn test_provision_creates_layout() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_tests(dir.path());

        let paths = provision(&settings, ID, &pubkey(), "deadbeef").unwrap();

        assert!(paths.config_dir.join(CONFIG_FILE).is_file());
        assert!(paths.workspace_dir.join(IDENTITY_FILE).is_file());

        let mode = std::fs::metadata(&paths.workspace_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_config_carries_token() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_tests(dir.path());

        let paths = provision(&settings, ID, &pubkey(), "cafebabe1234").unwrap();

        let body = std::fs::read_to_string(paths.config_dir.join(CONFIG_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["gateway"]["auth"]["token"], "cafebabe1234");
        assert_eq!(parsed["gateway"]["port"], GATEWAY_PORT);
    }

    #[test]
    fn test_identity_marker_contents() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_tests(dir.path());

        let paths = provision(&settings, ID, &pubkey(), "deadbeef").unwrap();

        let marker = std::fs::read_to_string(paths.workspace_dir.join(IDENTITY_FILE)).unwrap();
        assert!(marker.contains(&pubkey()));
        assert!(marker.contains(ID));
        assert!(marker.contains("UTC"));
    }

    #[test]
    fn test_seeding_skips_existing_files() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_tests(dir.path());

        let template_dir = settings.template_dir();
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(template_dir.join("NOTES.md"), "template").unwrap();

        let paths = provision(&settings, ID, &pubkey(), "tok1").unwrap();
        let seeded = paths.workspace_dir.join("NOTES.md");
        assert_eq!(std::fs::read_to_string(&seeded).unwrap(), "template");

        // User edits survive re-provisioning; the config is rewritten.
        std::fs::write(&seeded, "edited").unwrap();
        provision(&settings, ID, &pubkey(), "tok2").unwrap();

        assert_eq!(std::fs::read_to_string(&seeded).unwrap(), "edited");
        let config = std::fs::read_to_string(paths.config_dir.join(CONFIG_FILE)).unwrap();
        assert!(config.contains("tok2"));
    }
}
