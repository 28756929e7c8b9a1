//! Instance lifecycle and telemetry handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::docker::DockerError;
use crate::orchestrator::snapshot::InstanceStatus;
use crate::orchestrator::{DestroyError, LaunchError, StopError};
use crate::store::InstanceRecord;

use super::super::AppState;
use super::ApiError;

/// Wire form of an instance record with the secret redacted. This is the
/// only shape listings and conflict responses ever carry.
#[derive(Debug, Serialize)]
pub struct SafeInstance {
    pub id: String,
    pub pubkey: String,
    pub port: u16,
    pub created: u64,
    pub last_started: u64,
    pub container_id: String,
    pub status: InstanceStatus,
}

impl SafeInstance {
    pub fn from_record(id: String, record: &InstanceRecord, status: InstanceStatus) -> Self {
        Self {
            id,
            pubkey: record.pubkey.clone(),
            port: record.port,
            created: record.created,
            last_started: record.last_started,
            container_id: record.container_id.clone(),
            status,
        }
    }
}

/// Full wire form, token included. Only the create/restart response uses
/// this.
#[derive(Debug, Serialize)]
pub struct FullInstance {
    pub id: String,
    pub pubkey: String,
    pub port: u16,
    pub gateway_token: String,
    pub created: u64,
    pub last_started: u64,
    pub container_id: String,
    pub status: InstanceStatus,
}

impl FullInstance {
    fn from_record(id: String, record: InstanceRecord, status: InstanceStatus) -> Self {
        Self {
            id,
            pubkey: record.pubkey,
            port: record.port,
            gateway_token: record.gateway_token,
            created: record.created,
            last_started: record.last_started,
            container_id: record.container_id,
            status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PubkeyRequest {
    #[serde(default)]
    pub pubkey: String,
}

/// List all instances, tokens redacted.
pub async fn list_instances(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let listed = state.orchestrator.list().await?;

    let instances: Vec<SafeInstance> = listed
        .into_iter()
        .map(|entry| SafeInstance::from_record(entry.id, &entry.record, entry.status))
        .collect();

    Ok(Json(json!({ "instances": instances })))
}

/// Create or restart the instance for a wallet.
pub async fn launch_instance(
    State(state): State<AppState>,
    Json(request): Json<PubkeyRequest>,
) -> Response {
    match state.orchestrator.launch(&request.pubkey).await {
        Ok(launched) => Json(json!({
            "instance": FullInstance::from_record(launched.id, launched.record, launched.status),
        }))
        .into_response(),

        Err(LaunchError::BadInput) => {
            ApiError::bad_request("Invalid wallet public key").into_response()
        }
        Err(LaunchError::Conflict { id, record, status }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Instance already running",
                "instance": SafeInstance::from_record(id, &record, status),
            })),
        )
            .into_response(),
        Err(LaunchError::CapacityExceeded(max)) => {
            ApiError::too_many(format!("Maximum {} instances reached", max)).into_response()
        }
        Err(LaunchError::Unreachable(message)) => {
            ApiError::unavailable(format!("Docker daemon unreachable: {}", message))
                .into_response()
        }
        Err(LaunchError::Api(message)) => {
            ApiError::internal(format!("Docker launch failed: {}", message)).into_response()
        }
        Err(LaunchError::Store(err)) => ApiError::internal(err.to_string()).into_response(),
        Err(LaunchError::Workspace(err)) => {
            ApiError::internal(format!("Workspace provisioning failed: {}", err)).into_response()
        }
    }
}

/// Stop a wallet's container.
pub async fn stop_instance(
    State(state): State<AppState>,
    Json(request): Json<PubkeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.orchestrator.stop(&request.pubkey).await {
        Ok(id) => Ok(Json(json!({ "status": "stopped", "id": id }))),
        Err(StopError::BadInput) => Err(ApiError::bad_request("Missing pubkey")),
        Err(StopError::NotFound) => {
            Err(ApiError::not_found("Container not found or already stopped"))
        }
        Err(StopError::Unreachable(message)) => Err(ApiError::unavailable(format!(
            "Docker daemon unreachable: {}",
            message
        ))),
    }
}

/// Destroy a wallet's instance.
pub async fn destroy_instance(
    State(state): State<AppState>,
    Json(request): Json<PubkeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.orchestrator.destroy(&request.pubkey).await {
        Ok(id) => Ok(Json(json!({ "status": "destroyed", "id": id }))),
        Err(DestroyError::BadInput) => Err(ApiError::bad_request("Missing pubkey")),
        Err(DestroyError::Unreachable(message)) => Err(ApiError::unavailable(format!(
            "Docker daemon unreachable: {}",
            message
        ))),
        Err(DestroyError::Store(err)) => Err(err.into()),
    }
}

/// Live status and stats for one instance, bypassing the snapshot.
pub async fn instance_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.orchestrator.stats_for(&id).await {
        Ok((status, stats)) => {
            let stats = match stats {
                Some(sample) => serde_json::to_value(sample).unwrap_or_default(),
                None => json!({}),
            };
            Ok(Json(json!({ "status": status, "stats": stats })))
        }
        Err(DockerError::Unreachable(message)) => Err(ApiError::unavailable(format!(
            "Docker daemon unreachable: {}",
            message
        ))),
        Err(err) => Err(ApiError::unavailable(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InstanceRecord {
        InstanceRecord {
            pubkey: "W".repeat(44),
            port: 19000,
            gateway_token: "ff".repeat(24),
            created: 10,
            last_started: 20,
            container_id: "0123456789ab".to_string(),
        }
    }

    #[test]
    fn test_safe_instance_redacts_token() {
        let safe = SafeInstance::from_record(
            "aaaaaaaaaaaa".to_string(),
            &record(),
            InstanceStatus::Running,
        );
        let value = serde_json::to_value(&safe).unwrap();

        assert!(value.get("gateway_token").is_none());
        assert!(!value.to_string().contains(&"ff".repeat(24)));
        assert_eq!(value["pubkey"], "W".repeat(44));
        assert_eq!(value["status"], "running");
    }

    #[test]
    fn test_full_instance_is_safe_plus_token() {
        let full = FullInstance::from_record(
            "aaaaaaaaaaaa".to_string(),
            record(),
            InstanceStatus::Starting,
        );
        let full = serde_json::to_value(&full).unwrap();

        let safe = SafeInstance::from_record(
            "aaaaaaaaaaaa".to_string(),
            &record(),
            InstanceStatus::Starting,
        );
        let safe = serde_json::to_value(&safe).unwrap();

        let mut stripped = full.as_object().unwrap().clone();
        stripped.remove("gateway_token").expect("token present");
        assert_eq!(serde_json::Value::Object(stripped), safe);
    }
}
