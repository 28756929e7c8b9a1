//! Workspace file editor endpoints
//!
//! Read and edit the markdown/JSON files inside an instance's workspace.
//! Names are validated against a strict allow-shape; creating files over
//! the API is forbidden, only edits to existing ones.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::ApiError;

/// Longest accepted workspace file name.
const MAX_NAME_LEN: usize = 64;

/// Whether a workspace file name is editable over the API.
///
/// Accepted: `.md` or `.json`, no separators or parent references, at
/// most [`MAX_NAME_LEN`] characters.
pub fn valid_filename(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && (name.ends_with(".md") || name.ends_with(".json"))
}

/// List editable files in an instance's workspace.
pub async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.orchestrator.has_instance(&id) {
        return Err(ApiError::not_found("No such instance"));
    }

    let workspace = state.orchestrator.settings().workspace_dir(&id);
    let mut files = Vec::new();

    if let Ok(entries) = std::fs::read_dir(&workspace) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !valid_filename(&name) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            files.push(json!({
                "name": name,
                "size": metadata.len(),
                "modified": modified,
            }));
        }
    }

    files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Ok(Json(json!({ "files": files })))
}

/// Read one workspace file.
pub async fn read_file(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !valid_filename(&name) {
        return Err(ApiError::bad_request("Invalid filename"));
    }
    if !state.orchestrator.has_instance(&id) {
        return Err(ApiError::not_found("No such instance"));
    }

    let path = state.orchestrator.settings().workspace_dir(&id).join(&name);
    if !path.is_file() {
        return Ok(Json(json!({
            "content": "",
            "filename": name,
            "exists": false,
        })));
    }

    let bytes = std::fs::read(&path).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({
        "content": String::from_utf8_lossy(&bytes),
        "filename": name,
        "exists": true,
    })))
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    #[serde(default)]
    pub content: String,
}

/// Overwrite one existing workspace file. Creation is forbidden.
pub async fn write_file(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(request): Json<WriteFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !valid_filename(&name) {
        return Err(ApiError::bad_request("Invalid filename"));
    }
    if !state.orchestrator.has_instance(&id) {
        return Err(ApiError::not_found("No such instance"));
    }

    let path = state.orchestrator.settings().workspace_dir(&id).join(&name);
    if !path.is_file() {
        return Err(ApiError::forbidden(
            "Creating files is not allowed, edit an existing file",
        ));
    }

    std::fs::write(&path, request.content).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_filenames() {
        assert!(valid_filename("notes.md"));
        assert!(valid_filename("IDENTITY.md"));
        assert!(valid_filename("config.json"));
        // 61 + ".md" = exactly 64 characters
        assert!(valid_filename(&format!("{}.md", "a".repeat(61))));
    }

    #[test]
    fn test_rejected_filenames() {
        assert!(!valid_filename("../evil.md"));
        assert!(!valid_filename("dir/notes.md"));
        assert!(!valid_filename("dir\\notes.md"));
        assert!(!valid_filename("notes.txt"));
        assert!(!valid_filename("notes"));
        assert!(!valid_filename(""));
        // 62 + ".md" = 65 characters, one over
        assert!(!valid_filename(&format!("{}.md", "a".repeat(62))));
    }
}
