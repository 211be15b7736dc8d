//! Frame sampling with ffprobe and ffmpeg

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dropwatch_domain::{FrameExtractor, MediaError};

use super::run_command;

const FRAME_PREFIX: &str = "frame-";

pub struct FfmpegFrameExtractor {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl FfmpegFrameExtractor {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout: Duration::from_secs(60),
        }
    }

    async fn probe_duration(&self, video: &Path) -> Result<f64, MediaError> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            video.into(),
        ];
        let stdout = run_command(&self.ffprobe, &args, self.timeout)
            .await
            .map_err(|e| MediaError::Subprocess(e.to_string()))?;
        parse_duration(&stdout)
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

fn parse_duration(stdout: &str) -> Result<f64, MediaError> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| MediaError::Decode(format!("unreadable duration {:?}", stdout.trim())))
}

/// Start offset of the sampled window, clamped to the beginning of short videos
fn window_start(duration_secs: f64, tail: Duration) -> f64 {
    (duration_secs - tail.as_secs_f64()).max(0.0)
}

fn ffmpeg_args(
    video: &Path,
    start_secs: f64,
    tail: Duration,
    fps: u32,
    output_dir: &Path,
) -> Vec<OsString> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format!("{:.3}", start_secs).into(),
        "-i".into(),
        video.into(),
        "-t".into(),
        format!("{:.3}", tail.as_secs_f64()).into(),
        "-vf".into(),
        format!("fps={}", fps).into(),
        "-y".into(),
        output_dir.join(format!("{}%03d.png", FRAME_PREFIX)).into(),
    ]
}

async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| MediaError::Io(e.to_string()))?;

    let mut frames = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MediaError::Io(e.to_string()))?
    {
        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FRAME_PREFIX) && n.ends_with(".png"));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_tail_frames(
        &self,
        video: &Path,
        tail: Duration,
        fps: u32,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, MediaError> {
        let duration = self.probe_duration(video).await?;
        let start = window_start(duration, tail);

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| MediaError::Io(e.to_string()))?;

        run_command(
            &self.ffmpeg,
            &ffmpeg_args(video, start, tail, fps, output_dir),
            self.timeout,
        )
        .await
        .map_err(|e| MediaError::Subprocess(e.to_string()))?;

        let frames = list_frames(output_dir).await?;
        tracing::debug!(
            video = %video.display(),
            duration_secs = duration,
            start_secs = start,
            frames = frames.len(),
            "Sampled video tail"
        );
        Ok(frames)
    }
}
