//! `SimilarityEngine` — the ML duplicate-detection subroutine the Similarity
//! stage invokes as a black box: `<bin> -i <in> -o <out>
//! --cross-encoder-threshold <f> --refine-threshold <i>`, reading the input
//! array and writing a copy with `similarity_group_id` added per item.
//! Nonzero exit is fatal; stdout/stderr are line-buffered logs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum SimilarityEngineError {
    #[error("failed to spawn similarity engine: {0}")]
    Spawn(std::io::Error),
    #[error("similarity engine exited with {0}")]
    NonZeroExit(std::process::ExitStatus),
    #[error("similarity engine timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SimilarityEngine: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        input_path: &Path,
        output_path: &Path,
        cross_encoder_threshold: f32,
        refine_threshold: u32,
        timeout: Duration,
    ) -> Result<(), SimilarityEngineError>;
}

/// Shells out to an external subprocess binary, per the exact CLI contract.
pub struct SubprocessSimilarityEngine {
    binary_path: std::path::PathBuf,
}

impl SubprocessSimilarityEngine {
    pub fn new(binary_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl SimilarityEngine for SubprocessSimilarityEngine {
    async fn run(
        &self,
        input_path: &Path,
        output_path: &Path,
        cross_encoder_threshold: f32,
        refine_threshold: u32,
        timeout: Duration,
    ) -> Result<(), SimilarityEngineError> {
        let mut child = Command::new(&self.binary_path)
            .arg("-i")
            .arg(input_path)
            .arg("-o")
            .arg(output_path)
            .arg("--cross-encoder-threshold")
            .arg(cross_encoder_threshold.to_string())
            .arg("--refine-threshold")
            .arg(refine_threshold.to_string())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(SimilarityEngineError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_lines(stderr, "stderr"));
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(SimilarityEngineError::TimedOut(timeout));
            }
        };

        if !status.success() {
            return Err(SimilarityEngineError::NonZeroExit(status));
        }
        Ok(())
    }
}

async fn stream_lines<R: tokio::io::AsyncRead + Unpin>(reader: R, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(stream, "{}", line);
    }
}
