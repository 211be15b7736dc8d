//! OCR pipeline over downloaded images and videos

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use time::OffsetDateTime;

use crate::model::{MediaScan, ProcessedMediaKey};
use crate::ports::{Clock, FrameExtractor, ImagePreprocessor, TextRecognizer};

static PREFIXED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)stakecom[a-z0-9]{3,20}").expect("Valid regex"));

static GENERIC_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-z0-9]{10,30}\b").expect("Valid regex"));

/// How long an attachment stays marked as processed
pub const PROCESSED_MEDIA_TTL: time::Duration = time::Duration::hours(1);

/// Frame sampling settings
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Length of the video tail that is sampled
    pub tail: Duration,
    pub fps: u32,
    /// Frames recognized in parallel per batch
    pub batch_size: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            tail: Duration::from_secs(2),
            fps: 5,
            batch_size: 3,
        }
    }
}

/// Pull a bonus code out of OCR text, lower-cased
///
/// The platform-prefixed form wins over a generic alphanumeric token.
pub fn parse_code(text: &str) -> Option<String> {
    PREFIXED_CODE
        .find(text)
        .or_else(|| GENERIC_CODE.find(text))
        .map(|m| m.as_str().to_lowercase())
}

/// Drives recognition over images and sampled video frames
pub struct MediaRecognizer {
    recognizer: Arc<dyn TextRecognizer>,
    preprocessor: Arc<dyn ImagePreprocessor>,
    frames: Arc<dyn FrameExtractor>,
    config: MediaConfig,
}

impl MediaRecognizer {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        preprocessor: Arc<dyn ImagePreprocessor>,
        frames: Arc<dyn FrameExtractor>,
        config: MediaConfig,
    ) -> Self {
        Self {
            recognizer,
            preprocessor,
            frames,
            config,
        }
    }

    /// Recognize a single image; failures become an empty scan
    pub async fn scan_image(&self, image: &Path) -> MediaScan {
        let preprocessed = sibling_path(image, "prep", "png");
        let mut scratch = ScratchFiles::default();
        scratch.file(preprocessed.clone());

        let input = match self.preprocessor.preprocess(image, &preprocessed).await {
            Ok(()) => preprocessed.as_path(),
            Err(e) => {
                tracing::warn!(
                    image = %image.display(),
                    error = %e,
                    "Preprocessing failed, recognizing original image"
                );
                image
            }
        };

        match self.recognizer.recognize(input).await {
            Ok(recognition) => {
                let code = parse_code(&recognition.text);
                tracing::debug!(
                    image = %image.display(),
                    confidence = recognition.confidence,
                    code = ?code,
                    "Recognized image"
                );
                MediaScan {
                    code,
                    text: recognition.text,
                    confidence: recognition.confidence,
                    frames_processed: 1,
                }
            }
            Err(e) => {
                tracing::warn!(image = %image.display(), error = %e, "Recognition failed");
                MediaScan::none()
            }
        }
    }

    /// Sample the end of a video and scan frames newest first, in batches
    pub async fn scan_video(&self, video: &Path) -> MediaScan {
        let frame_dir = sibling_path(video, "frames", "d");
        let mut scratch = ScratchFiles::default();
        scratch.dir(frame_dir.clone());

        if let Err(e) = tokio::fs::create_dir_all(&frame_dir).await {
            tracing::warn!(dir = %frame_dir.display(), error = %e, "Could not create frame directory");
            return MediaScan::none();
        }

        let mut frames = match self
            .frames
            .extract_tail_frames(video, self.config.tail, self.config.fps, &frame_dir)
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(video = %video.display(), error = %e, "Frame extraction failed");
                return MediaScan::none();
            }
        };
        frames.sort();
        frames.reverse();

        tracing::debug!(video = %video.display(), frames = frames.len(), "Scanning video frames");

        let batch_size = self.config.batch_size.max(1);
        let mut processed = 0usize;
        for batch in frames.chunks(batch_size) {
            let scans = join_all(batch.iter().map(|frame| self.scan_image(frame))).await;
            for scan in scans {
                processed += 1;
                if scan.code.is_some() {
                    return MediaScan {
                        frames_processed: processed,
                        ..scan
                    };
                }
            }
        }

        tracing::debug!(video = %video.display(), processed, "No code in video frames");
        MediaScan {
            frames_processed: processed,
            ..MediaScan::none()
        }
    }
}

fn sibling_path(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    path.with_file_name(format!("{stem}_{suffix}.{extension}"))
}

/// Deletes intermediate files and directories when dropped
#[derive(Debug, Default)]
pub struct ScratchFiles {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn file(&mut self, path: PathBuf) -> &mut Self {
        self.files.push(path);
        self
    }

    pub fn dir(&mut self, path: PathBuf) -> &mut Self {
        self.dirs.push(path);
        self
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for file in &self.files {
            if let Err(e) = std::fs::remove_file(file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %file.display(), error = %e, "Failed to remove scratch file");
                }
            }
        }
        for dir in &self.dirs {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
                }
            }
        }
    }
}

/// Attachments for which OCR was already attempted
pub struct ProcessedMedia {
    clock: Arc<dyn Clock>,
    ttl: time::Duration,
    entries: Mutex<HashMap<ProcessedMediaKey, OffsetDateTime>>,
}

impl ProcessedMedia {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: PROCESSED_MEDIA_TTL,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mark the key processed; false when it already was
    pub fn claim(&self, key: ProcessedMediaKey) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.retain(|_, at| now - *at <= self.ttl);
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, now);
        true
    }

    /// Forget a claim so a later delivery can try again
    pub fn release(&self, key: &ProcessedMediaKey) {
        self.lock().remove(key);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &ProcessedMediaKey) -> bool {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .is_some_and(|at| now - *at <= self.ttl)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProcessedMediaKey, OffsetDateTime>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{MediaKind, Recognition};
    use crate::ports::{MediaError, RecognitionError};
    use crate::usecases::test_support::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Recognizer answering from a map of file name to text
    pub(crate) struct ScriptedRecognizer {
        pub(crate) texts: HashMap<String, String>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedRecognizer {
        pub(crate) fn new(texts: &[(&str, &str)]) -> Self {
            Self {
                texts: texts
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextRecognizer for ScriptedRecognizer {
        async fn recognize(&self, image: &Path) -> Result<Recognition, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.texts.get(&name) {
                Some(text) => Ok(Recognition {
                    text: text.clone(),
                    confidence: 88.0,
                }),
                None => Err(RecognitionError::Engine(format!("no script for {name}"))),
            }
        }
    }

    /// Preprocessor that always fails so the original file is recognized
    pub(crate) struct PassthroughPreprocessor;

    #[async_trait]
    impl ImagePreprocessor for PassthroughPreprocessor {
        async fn preprocess(&self, _input: &Path, _output: &Path) -> Result<(), MediaError> {
            Err(MediaError::Decode("not an image".to_string()))
        }
    }

    /// Writes empty frame files named frame-001.png ...
    pub(crate) struct FakeFrames {
        pub(crate) count: usize,
    }

    #[async_trait]
    impl FrameExtractor for FakeFrames {
        async fn extract_tail_frames(
            &self,
            _video: &Path,
            _tail: Duration,
            _fps: u32,
            output_dir: &Path,
        ) -> Result<Vec<PathBuf>, MediaError> {
            let mut frames = Vec::new();
            for i in 1..=self.count {
                let path = output_dir.join(format!("frame-{i:03}.png"));
                std::fs::write(&path, b"").map_err(|e| MediaError::Io(e.to_string()))?;
                frames.push(path);
            }
            Ok(frames)
        }
    }

    fn recognizer(texts: &[(&str, &str)], frames: usize) -> (MediaRecognizer, Arc<ScriptedRecognizer>) {
        let scripted = Arc::new(ScriptedRecognizer::new(texts));
        let media = MediaRecognizer::new(
            scripted.clone(),
            Arc::new(PassthroughPreprocessor),
            Arc::new(FakeFrames { count: frames }),
            MediaConfig::default(),
        );
        (media, scripted)
    }

    #[test]
    fn test_parse_code_prefers_prefixed_form() {
        assert_eq!(
            parse_code("Use LONGERTOKEN12345 or StakeComAbc123").as_deref(),
            Some("stakecomabc123")
        );
        assert_eq!(
            parse_code("code: ABCDEFGHIJ12").as_deref(),
            Some("abcdefghij12")
        );
        assert_eq!(parse_code("short abc123"), None);
    }

    #[tokio::test]
    async fn test_scan_image_falls_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("photo.jpg");
        std::fs::write(&image, b"").unwrap();

        let (media, _) = recognizer(&[("photo.jpg", "DROP CODE stakecomwinner")], 0);
        let scan = media.scan_image(&image).await;

        assert_eq!(scan.code.as_deref(), Some("stakecomwinner"));
        assert_eq!(scan.confidence, 88.0);
    }

    #[tokio::test]
    async fn test_scan_image_recognition_failure_is_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("photo.jpg");
        std::fs::write(&image, b"").unwrap();

        let (media, _) = recognizer(&[], 0);
        let scan = media.scan_image(&image).await;

        assert_eq!(scan, MediaScan::none());
    }

    #[tokio::test]
    async fn test_scan_video_newest_frames_first_with_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"").unwrap();

        // Ten frames; the code only shows on frame 9, which is in the first batch
        let texts: Vec<(String, String)> = (1..=10)
            .map(|i| {
                let text = if i == 9 { "ABCDEFGHIJKL" } else { "noise" };
                (format!("frame-{i:03}.png"), text.to_string())
            })
            .collect();
        let borrowed: Vec<(&str, &str)> = texts
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (media, scripted) = recognizer(&borrowed, 10);

        let scan = media.scan_video(&video).await;

        assert_eq!(scan.code.as_deref(), Some("abcdefghijkl"));
        assert_eq!(scan.frames_processed, 2);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
        assert!(!dir.path().join("clip_frames.d").exists());
    }

    #[tokio::test]
    async fn test_scan_video_without_code_processes_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"").unwrap();

        let texts: Vec<(String, String)> = (1..=4)
            .map(|i| (format!("frame-{i:03}.png"), "noise".to_string()))
            .collect();
        let borrowed: Vec<(&str, &str)> = texts
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (media, scripted) = recognizer(&borrowed, 4);

        let scan = media.scan_video(&video).await;

        assert_eq!(scan.code, None);
        assert_eq!(scan.frames_processed, 4);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_scratch_files_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        let sub = dir.path().join("frames");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("f.png"), b"x").unwrap();

        {
            let mut scratch = ScratchFiles::default();
            scratch.file(file.clone()).dir(sub.clone());
            scratch.file(dir.path().join("never-created.png"));
        }

        assert!(!file.exists());
        assert!(!sub.exists());
    }

    #[test]
    fn test_processed_media_claim_and_expiry() {
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let processed = ProcessedMedia::new(clock.clone());
        let key = ProcessedMediaKey {
            kind: MediaKind::Photo,
            channel: "1".to_string(),
            message_id: "9".to_string(),
        };

        assert!(processed.claim(key.clone()));
        assert!(!processed.claim(key.clone()));
        assert!(processed.contains(&key));

        clock.advance(time::Duration::hours(1) + time::Duration::seconds(1));
        assert!(!processed.contains(&key));
        assert!(processed.claim(key));
    }

    #[test]
    fn test_processed_media_release_allows_new_claim() {
        let processed = ProcessedMedia::new(Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH)));
        let key = ProcessedMediaKey {
            kind: MediaKind::Video,
            channel: "1".to_string(),
            message_id: "10".to_string(),
        };

        assert!(processed.claim(key.clone()));
        processed.release(&key);
        assert!(!processed.contains(&key));
        assert!(processed.claim(key));
    }
}
