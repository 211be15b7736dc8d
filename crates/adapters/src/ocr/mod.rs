//! Media adapters: OCR engine, video frame sampling, image preprocessing
//!
//! Tesseract and ffmpeg are driven as external commands.

mod ffmpeg;
mod preprocess;
mod tesseract;

pub use ffmpeg::FfmpegFrameExtractor;
pub use preprocess::CaptionPreprocessor;
pub use tesseract::{TesseractConfig, TesseractRecognizer};

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out")]
    Timeout { program: String },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Run `program` to completion and return its stdout
///
/// The child is killed if it outlives `timeout`.
pub(crate) async fn run_command(
    program: &str,
    args: &[OsString],
    timeout: Duration,
) -> Result<String, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(CommandError::Timeout {
                program: program.to_string(),
            });
        }
    };

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
