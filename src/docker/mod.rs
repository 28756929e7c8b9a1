//! Narrow façade over the Docker daemon
//!
//! Every call the orchestrator makes against the container runtime goes
//! through this module. Failures are classified into a closed taxonomy at
//! this boundary; raw bollard errors never travel upward.

pub mod container;
pub mod logs;
pub mod status;

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use bollard::Docker;

pub use container::{BindMount, ContainerSpec, PublishedPort};
pub use status::StatsSample;

/// Maximum length of a daemon error message surfaced to callers.
const API_MESSAGE_CAP: usize = 500;

/// Timeout for liveness probes and status inspection.
pub(crate) const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a one-shot stats sample.
pub(crate) const STATS_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for container creation.
pub(crate) const CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a non-follow log tail.
pub(crate) const TAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified runtime failure.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    /// The daemon responded 404 for the named container.
    #[error("container not found")]
    NotFound,

    /// The daemon could not be contacted at all.
    #[error("docker daemon unreachable: {0}")]
    Unreachable(String),

    /// The daemon responded with an error.
    #[error("docker api error: {0}")]
    Api(String),
}

pub type DockerResult<T> = Result<T, DockerError>;

static CLIENT: OnceLock<Docker> = OnceLock::new();

/// Process-global Docker client, connected lazily on first use.
///
/// `bollard::Docker` is cheap to clone and safe for concurrent use; the
/// connection itself is only attempted by individual calls.
pub fn client() -> DockerResult<Docker> {
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = Docker::connect_with_local_defaults()
        .map_err(|e| DockerError::Unreachable(e.to_string()))?;
    Ok(CLIENT.get_or_init(|| client).clone())
}

/// Probe daemon liveness.
pub async fn ping() -> DockerResult<()> {
    let docker = client()?;
    with_timeout(INSPECT_TIMEOUT, docker.ping()).await.map(|_| ())
}

/// Map a bollard error into the adapter taxonomy.
///
/// A daemon response is `NotFound` or `Api`; anything else (transport,
/// IO, serialization) means the daemon was not usefully contactable.
pub(crate) fn classify(err: bollard::errors::Error) -> DockerError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => classify_response(status_code, message),
        other => DockerError::Unreachable(other.to_string()),
    }
}

fn classify_response(status_code: u16, message: String) -> DockerError {
    if status_code == 404 {
        DockerError::NotFound
    } else {
        DockerError::Api(truncate_message(&message))
    }
}

/// Run a bollard call under a deadline, classifying both failure modes.
pub(crate) async fn with_timeout<T, F>(deadline: Duration, fut: F) -> DockerResult<T>
where
    F: Future<Output = Result<T, bollard::errors::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(classify(err)),
        Err(_) => Err(DockerError::Unreachable(format!(
            "call timed out after {}s",
            deadline.as_secs()
        ))),
    }
}

fn truncate_message(message: &str) -> String {
    if message.len() <= API_MESSAGE_CAP {
        return message.to_string();
    }
    let mut end = API_MESSAGE_CAP;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = classify_response(404, "No such container".to_string());
        assert!(matches!(err, DockerError::NotFound));
    }

    #[test]
    fn test_classify_api_error_truncates() {
        match classify_response(500, "x".repeat(800)) {
            DockerError::Api(message) => assert_eq!(message.len(), 500),
            other => panic!("expected Api, got {:?}", other),
        }
    }

    #[test]
    fn test_truncate_message_respects_char_boundaries() {
        let message = "é".repeat(400);
        let truncated = truncate_message(&message);
        assert!(truncated.len() <= 500);
        assert!(message.starts_with(&truncated));
    }
}
