//! jq subprocess evaluator.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{FilterError, FilterEvaluator};

/// Runs `jq --compact-output --raw-output <filter>` with the payload on stdin.
///
/// The child is killed when the evaluation future is dropped, so an outer
/// timeout or cancellation never leaves a jq process behind.
#[derive(Debug, Clone)]
pub struct JqEvaluator {
    path: PathBuf,
}

impl JqEvaluator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FilterEvaluator for JqEvaluator {
    async fn evaluate(&self, payload: &[u8], filter: &str) -> Result<Bytes, FilterError> {
        let mut child = Command::new(&self.path)
            .arg("--compact-output")
            .arg("--raw-output")
            .arg(filter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(FilterError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            FilterError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "jq stdin unavailable"))
        })?;

        // Feed stdin while draining stdout so large payloads cannot fill both pipes.
        let write = async move {
            stdin.write_all(payload).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(FilterError::Io)?;

        if !output.status.success() {
            return Err(FilterError::Engine {
                filter: filter.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // jq exits early on some filters (e.g. `empty`); a closed stdin is fine then.
        if let Err(e) = written {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(FilterError::Io(e));
            }
        }

        let value = strip_trailing_newline(output.stdout);
        debug!(filter = %filter, output_length = value.len(), "jq_evaluated");
        Ok(Bytes::from(value))
    }
}

/// Drop the newline jq prints after its last output.
fn strip_trailing_newline(mut out: Vec<u8>) -> Vec<u8> {
    if out.last() == Some(&b'\n') {
        out.pop();
    }
    out
}
