//! Container log access: bounded tails and live follow streams

use bollard::container::LogsOptions;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use super::{classify, client, DockerResult, TAIL_TIMEOUT};

/// Largest tail response body, in characters of merged stdout+stderr.
const TAIL_CHAR_CAP: usize = 7000;

/// Fetch up to `lines` recent log lines as one merged, lossily-decoded
/// string, capped to the last [`TAIL_CHAR_CAP`] characters.
pub async fn tail(name: &str, lines: u32) -> DockerResult<String> {
    let docker = client()?;
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        tail: lines.to_string(),
        ..Default::default()
    };

    let mut stream = docker.logs(name, Some(options));
    let mut text = String::new();

    let collected = tokio::time::timeout(TAIL_TIMEOUT, async {
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    text.push_str(&String::from_utf8_lossy(&output.into_bytes()));
                }
                Err(err) => {
                    if text.is_empty() {
                        return Err(classify(err));
                    }
                    warn!("log tail for {} ended early: {}", name, err);
                    break;
                }
            }
        }
        Ok(())
    })
    .await;

    match collected {
        Ok(Ok(())) | Err(_) => Ok(tail_chars(&text, TAIL_CHAR_CAP).to_string()),
        Ok(Err(err)) => Err(err),
    }
}

/// Open a follow stream over the container's merged log output.
///
/// The stream is finite (it ends when the container exits) and not
/// restartable. Dropping it closes the underlying daemon connection, so
/// subscribers must drop it on disconnect and on error.
pub fn follow(
    name: &str,
    tail_lines: u32,
) -> DockerResult<impl Stream<Item = DockerResult<Bytes>> + Send> {
    let docker = client()?;
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        follow: true,
        tail: tail_lines.to_string(),
        ..Default::default()
    };

    Ok(docker
        .logs(name, Some(options))
        .map(|item| item.map(|output| output.into_bytes()).map_err(classify)))
}

/// Clamp a caller-supplied line count into the accepted range.
pub fn clamp_lines(requested: i64) -> u32 {
    requested.clamp(1, 500) as u32
}

/// The last `max` characters of `s`.
fn tail_chars(s: &str, max: usize) -> &str {
    match s.char_indices().rev().nth(max.saturating_sub(1)) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_lines() {
        assert_eq!(clamp_lines(0), 1);
        assert_eq!(clamp_lines(-3), 1);
        assert_eq!(clamp_lines(50), 50);
        assert_eq!(clamp_lines(500), 500);
        assert_eq!(clamp_lines(10_000), 500);
    }

    #[test]
    fn test_tail_chars_short_input() {
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("", 10), "");
    }

    #[test]
    fn test_tail_chars_cuts_from_the_end() {
        assert_eq!(tail_chars("abcdef", 3), "def");
    }

    #[test]
    fn test_tail_chars_multibyte() {
        let s = "aéz".repeat(4);
        let tail = tail_chars(&s, 5);
        assert_eq!(tail.chars().count(), 5);
        assert!(s.ends_with(tail));
    }
}
