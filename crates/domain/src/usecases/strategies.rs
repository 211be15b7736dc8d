//! Ordered extraction strategies turning a message into at most one bonus candidate

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::model::{
    AnnotationKind, BonusCandidate, BonusKind, Condition, InboundMessage, MediaKind, MediaScan,
    ProcessedMediaKey, StrategyKind,
};
use crate::policy::extract_conditions;
use crate::ports::{Clock, MediaDownloader};
use crate::usecases::{
    announcement::AnnouncementCache,
    links::{LinkFinder, bonus_redeem_url, classify_bonus, code_from_url, drop_redeem_url},
    media::{MediaRecognizer, ProcessedMedia, ScratchFiles},
    templates::{render_template, template_for},
};

static ANNOUNCEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)DROP\s+INCOMING").expect("Valid regex"));

static COMING_SOON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)COMING\s+IN\s+FEW\s+SECONDS|DROP\s+IS\s+COMING").expect("Valid regex")
});

static SPOILER_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{10,30}$").expect("Valid regex"));

/// Longest text treated as a standalone code
const STANDALONE_MAX_LEN: usize = 49;

/// Result of evaluating one strategy
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// Not applicable; try the next strategy
    NoMatch,
    /// Consumed without anything to publish
    HandledNoPublish,
    Candidate(BonusCandidate),
}

/// Result of running every strategy over a message
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Ignored,
    Handled(StrategyKind),
    Candidate(BonusCandidate),
}

/// Extraction settings
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Rank substituted for `{RANK_MIN}` and attached to candidates
    pub rank_min: String,
    /// Domains whose links carry bonus codes
    pub url_domains: Vec<String>,
    /// When set, announcements must mention this tag
    pub announcer_mention: Option<String>,
    /// Base for recurring bonus redeem links
    pub redeem_base_url: String,
    /// Base for drop redeem links
    pub drop_redeem_url: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            rank_min: "Bronze".to_string(),
            url_domains: vec!["playstake.club".to_string()],
            announcer_mention: None,
            redeem_base_url: "https://stake.com".to_string(),
            drop_redeem_url:
                "https://stake.com/settings/offers?type=drop&currency=usdc&modal=redeemBonus"
                    .to_string(),
        }
    }
}

/// Media download and OCR wiring for the media strategy
pub struct MediaStage {
    pub downloader: Arc<dyn MediaDownloader>,
    pub recognizer: MediaRecognizer,
    pub scratch_dir: PathBuf,
}

/// Runs the strategies in their fixed order
pub struct Extractor {
    config: ExtractorConfig,
    clock: Arc<dyn Clock>,
    announcements: AnnouncementCache,
    links: LinkFinder,
    processed_media: ProcessedMedia,
    media: Option<MediaStage>,
}

impl Extractor {
    pub fn new(config: ExtractorConfig, clock: Arc<dyn Clock>) -> Self {
        let links = LinkFinder::new(&config.url_domains);
        Self {
            announcements: AnnouncementCache::new(Arc::clone(&clock)),
            processed_media: ProcessedMedia::new(Arc::clone(&clock)),
            links,
            clock,
            config,
            media: None,
        }
    }

    pub fn with_media(mut self, stage: MediaStage) -> Self {
        self.media = Some(stage);
        self
    }

    #[cfg(test)]
    pub(crate) fn announcements(&self) -> &AnnouncementCache {
        &self.announcements
    }

    /// Fold the strategies until one returns something other than `NoMatch`
    pub async fn extract(&self, message: &InboundMessage) -> Extraction {
        for strategy in StrategyKind::ORDERED {
            match self.evaluate(strategy, message).await {
                StrategyOutcome::NoMatch => continue,
                StrategyOutcome::HandledNoPublish => {
                    tracing::debug!(
                        strategy = %strategy,
                        message_id = %message.message_id,
                        "Message handled without publishing"
                    );
                    return Extraction::Handled(strategy);
                }
                StrategyOutcome::Candidate(candidate) => {
                    tracing::info!(
                        strategy = %strategy,
                        message_id = %message.message_id,
                        code = %candidate.code,
                        "Extracted bonus code"
                    );
                    return Extraction::Candidate(candidate);
                }
            }
        }
        Extraction::Ignored
    }

    /// Evaluate a single strategy
    pub async fn evaluate(
        &self,
        strategy: StrategyKind,
        message: &InboundMessage,
    ) -> StrategyOutcome {
        match strategy {
            StrategyKind::Announcement => self.announcement(message),
            StrategyKind::ComingSoon => self.coming_soon(message),
            StrategyKind::StandaloneCode => self.standalone_code(message),
            StrategyKind::Url => self.url(message),
            StrategyKind::Spoiler => self.spoiler(message),
            StrategyKind::Media => self.media(message).await,
        }
    }

    fn from_announcer(&self, text: &str) -> bool {
        match &self.config.announcer_mention {
            Some(mention) => text.to_lowercase().contains(&mention.to_lowercase()),
            None => true,
        }
    }

    fn announcement(&self, message: &InboundMessage) -> StrategyOutcome {
        if !ANNOUNCEMENT.is_match(&message.text) || !self.from_announcer(&message.text) {
            return StrategyOutcome::NoMatch;
        }

        let conditions = extract_conditions(&message.text);
        if conditions.is_empty() {
            tracing::debug!(channel = %message.channel, "Announcement without conditions");
        } else {
            tracing::info!(
                channel = %message.channel,
                conditions = conditions.len(),
                "Stored drop announcement"
            );
            self.announcements.store(message.channel.key(), conditions);
        }
        StrategyOutcome::HandledNoPublish
    }

    fn coming_soon(&self, message: &InboundMessage) -> StrategyOutcome {
        if COMING_SOON.is_match(&message.text) && self.from_announcer(&message.text) {
            StrategyOutcome::HandledNoPublish
        } else {
            StrategyOutcome::NoMatch
        }
    }

    fn standalone_code(&self, message: &InboundMessage) -> StrategyOutcome {
        let text = message.text.trim();
        let len = text.chars().count();
        let looks_like_code = (1..=STANDALONE_MAX_LEN).contains(&len)
            && text.chars().all(|c| c.is_ascii_alphanumeric());
        if !looks_like_code {
            return StrategyOutcome::NoMatch;
        }

        // Without a live announcement the text falls through to later strategies
        let Some(conditions) = self.announcements.take_fresh(message.channel.key()) else {
            return StrategyOutcome::NoMatch;
        };

        StrategyOutcome::Candidate(self.drop_candidate(
            text.to_string(),
            conditions,
            StrategyKind::StandaloneCode,
            None,
        ))
    }

    fn url(&self, message: &InboundMessage) -> StrategyOutcome {
        let Some(link) = self.links.find(message) else {
            return StrategyOutcome::NoMatch;
        };
        let Some(code) = code_from_url(&link) else {
            tracing::debug!(link = %link, "Bonus link without a code");
            return StrategyOutcome::NoMatch;
        };
        let Some(kind) = classify_bonus(&message.text, &link) else {
            tracing::debug!(link = %link, "Bonus link of unknown kind");
            return StrategyOutcome::NoMatch;
        };

        let now = self.clock.now();
        let rank = &self.config.rank_min;
        let (title, description) = match template_for(kind) {
            Some(template) => (
                Some(render_template(template.title, now, rank)),
                Some(render_template(template.intro, now, rank)),
            ),
            None => (None, None),
        };

        StrategyOutcome::Candidate(BonusCandidate {
            url: bonus_redeem_url(&self.config.redeem_base_url, &code),
            code,
            conditions: extract_conditions(&message.text),
            rank_min: rank.clone(),
            title,
            description,
            kind,
            strategy: StrategyKind::Url,
            confidence: None,
        })
    }

    fn spoiler(&self, message: &InboundMessage) -> StrategyOutcome {
        let code = message
            .annotations_of(AnnotationKind::Spoiler)
            .filter_map(|a| a.covered(&message.text))
            .map(str::trim)
            .find(|covered| SPOILER_CODE.is_match(covered));

        match code {
            Some(code) => StrategyOutcome::Candidate(self.drop_candidate(
                code.to_string(),
                extract_conditions(&message.text),
                StrategyKind::Spoiler,
                None,
            )),
            None => StrategyOutcome::NoMatch,
        }
    }

    async fn media(&self, message: &InboundMessage) -> StrategyOutcome {
        let Some(stage) = &self.media else {
            return StrategyOutcome::NoMatch;
        };
        let Some(attachment) = &message.media else {
            return StrategyOutcome::NoMatch;
        };
        if !matches!(attachment.kind, MediaKind::Photo | MediaKind::Video) {
            return StrategyOutcome::NoMatch;
        }

        let key = ProcessedMediaKey::for_message(message, attachment.kind);
        if !self.processed_media.claim(key.clone()) {
            tracing::debug!(key = %key, "Media already processed");
            return StrategyOutcome::NoMatch;
        }

        let file_name = format!(
            "{}_{}_{}_{}.{}",
            attachment.kind.as_str(),
            message.channel.key(),
            message.message_id,
            self.clock.now_millis(),
            attachment.kind.extension()
        );
        let path = stage.scratch_dir.join(file_name);
        let mut scratch = ScratchFiles::default();
        scratch.file(path.clone());

        // Only a completed recognition keeps the claim
        if let Err(e) = tokio::fs::create_dir_all(&stage.scratch_dir).await {
            tracing::warn!(error = %e, "Could not create scratch directory");
            self.processed_media.release(&key);
            return StrategyOutcome::NoMatch;
        }
        if let Err(e) = stage.downloader.download(attachment, &path).await {
            tracing::warn!(key = %key, error = %e, "Media download failed");
            self.processed_media.release(&key);
            return StrategyOutcome::NoMatch;
        }

        let scan: MediaScan = match attachment.kind {
            MediaKind::Video => stage.recognizer.scan_video(&path).await,
            _ => stage.recognizer.scan_image(&path).await,
        };

        let Some(code) = scan.code else {
            tracing::debug!(key = %key, frames = scan.frames_processed, "No code found in media");
            return StrategyOutcome::NoMatch;
        };

        StrategyOutcome::Candidate(self.drop_candidate(
            code,
            extract_conditions(&message.text),
            StrategyKind::Media,
            Some(scan.confidence),
        ))
    }

    fn drop_candidate(
        &self,
        code: String,
        conditions: Vec<Condition>,
        strategy: StrategyKind,
        confidence: Option<f32>,
    ) -> BonusCandidate {
        BonusCandidate {
            url: drop_redeem_url(&self.config.drop_redeem_url, &code),
            code,
            conditions,
            rank_min: self.config.rank_min.clone(),
            title: None,
            description: None,
            kind: BonusKind::Drop,
            strategy,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelIdentity, MediaAttachment, TextAnnotation};
    use crate::ports::{SourceError, SystemClock};
    use crate::usecases::media::MediaConfig;
    use crate::usecases::media::tests::{FakeFrames, PassthroughPreprocessor, ScriptedRecognizer};
    use crate::usecases::test_support::ManualClock;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;

    fn channel() -> ChannelIdentity {
        ChannelIdentity::new(Some("-1001234"), Some("drops"))
    }

    fn message(id: &str, text: &str) -> InboundMessage {
        InboundMessage::from_text(channel(), id, text)
    }

    fn extractor() -> Extractor {
        Extractor::new(ExtractorConfig::default(), Arc::new(SystemClock))
    }

    const ANNOUNCEMENT_TEXT: &str = "FINAL DROP INCOMING!\nValue: $5\nMin Bet: $0.01";

    #[tokio::test]
    async fn test_announcement_then_standalone_code() {
        let extractor = extractor();

        let outcome = extractor.extract(&message("1", ANNOUNCEMENT_TEXT)).await;
        assert_eq!(outcome, Extraction::Handled(StrategyKind::Announcement));

        let Extraction::Candidate(candidate) = extractor.extract(&message("2", " dropCODE42 ")).await
        else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.code, "dropCODE42");
        assert_eq!(candidate.strategy, StrategyKind::StandaloneCode);
        assert_eq!(
            candidate.conditions,
            vec![Condition::new("Value", "$5"), Condition::new("Min Bet", "$0.01")]
        );
        assert!(candidate.url.ends_with("&code=dropCODE42"));
        assert!(extractor.announcements().is_empty());
    }

    #[tokio::test]
    async fn test_standalone_code_after_window_is_ignored() {
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let extractor = Extractor::new(ExtractorConfig::default(), clock.clone());

        extractor.extract(&message("1", ANNOUNCEMENT_TEXT)).await;
        clock.advance(time::Duration::minutes(6));

        assert_eq!(
            extractor.extract(&message("2", "dropCODE42")).await,
            Extraction::Ignored
        );
    }

    #[tokio::test]
    async fn test_announcement_without_conditions_is_not_cached() {
        let extractor = extractor();
        let outcome = extractor.extract(&message("1", "drop incoming soon")).await;
        assert_eq!(outcome, Extraction::Handled(StrategyKind::Announcement));
        assert!(extractor.announcements().is_empty());
    }

    #[tokio::test]
    async fn test_announcer_mention_gates_announcements() {
        let config = ExtractorConfig {
            announcer_mention: Some("@RainsTEAM".to_string()),
            ..Default::default()
        };
        let extractor = Extractor::new(config, Arc::new(SystemClock));

        assert_eq!(
            extractor.extract(&message("1", ANNOUNCEMENT_TEXT)).await,
            Extraction::Ignored
        );

        let gated = format!("{ANNOUNCEMENT_TEXT}\n@rainsteam");
        assert_eq!(
            extractor.extract(&message("2", &gated)).await,
            Extraction::Handled(StrategyKind::Announcement)
        );
    }

    #[tokio::test]
    async fn test_coming_soon_is_handled() {
        let outcome = extractor()
            .extract(&message("1", "Next drop is coming in few seconds"))
            .await;
        assert_eq!(outcome, Extraction::Handled(StrategyKind::ComingSoon));
    }

    #[tokio::test]
    async fn test_standalone_rejects_colons_and_slashes() {
        let extractor = extractor();
        extractor.extract(&message("1", ANNOUNCEMENT_TEXT)).await;

        assert_eq!(extractor.extract(&message("2", "a/b")).await, Extraction::Ignored);
        assert_eq!(extractor.extract(&message("3", "Code:X")).await, Extraction::Ignored);
        // The entry is still there for a real code
        assert!(!extractor.announcements().is_empty());
    }

    #[tokio::test]
    async fn test_spoiler_with_code() {
        let text = "New drop! Code: ABCDEFGHIJ12\nValue: $3";
        let msg = message("1", text).with_annotations(vec![TextAnnotation::new(
            AnnotationKind::Spoiler,
            16,
            12,
        )]);

        let Extraction::Candidate(candidate) = extractor().extract(&msg).await else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.code, "ABCDEFGHIJ12");
        assert_eq!(candidate.strategy, StrategyKind::Spoiler);
        assert_eq!(candidate.conditions, vec![Condition::new("Value", "$3")]);
    }

    #[tokio::test]
    async fn test_spoiler_too_short_or_not_alphanumeric() {
        let short = message("1", "Code ABCDEFGHI").with_annotations(vec![TextAnnotation::new(
            AnnotationKind::Spoiler,
            5,
            9,
        )]);
        assert_eq!(extractor().extract(&short).await, Extraction::Ignored);

        let symbols = message("2", "Code ABCDE-FGHIJK").with_annotations(vec![
            TextAnnotation::new(AnnotationKind::Spoiler, 5, 12),
        ]);
        assert_eq!(extractor().extract(&symbols).await, Extraction::Ignored);
    }

    #[tokio::test]
    async fn test_url_strategy_renders_template() {
        let msg = message(
            "1",
            "Weekly bonus is live! https://playstake.club/bonus?code=WEEKLY2026",
        );
        let Extraction::Candidate(candidate) = extractor().extract(&msg).await else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.code, "WEEKLY2026");
        assert_eq!(candidate.kind, BonusKind::Weekly);
        assert_eq!(candidate.url, "https://stake.com/?bonus=WEEKLY2026");
        assert!(
            candidate
                .title
                .as_deref()
                .is_some_and(|t| t.starts_with("BONUS HEBDOMADAIRE | "))
        );
        assert!(
            candidate
                .description
                .as_deref()
                .is_some_and(|d| d.contains("BRONZE"))
        );
    }

    #[tokio::test]
    async fn test_url_of_unknown_kind_falls_through_to_spoiler() {
        let text = "Promo https://playstake.club/x?code=ABC123 SPOILERCODE1";
        let msg = message("1", text).with_annotations(vec![TextAnnotation::new(
            AnnotationKind::Spoiler,
            43,
            12,
        )]);
        let Extraction::Candidate(candidate) = extractor().extract(&msg).await else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.strategy, StrategyKind::Spoiler);
        assert_eq!(candidate.code, "SPOILERCODE1");
    }

    struct CountingDownloader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaDownloader for CountingDownloader {
        async fn download(
            &self,
            _media: &MediaAttachment,
            destination: &Path,
        ) -> Result<(), SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(destination, b"").map_err(|e| SourceError::Download(e.to_string()))
        }
    }

    fn media_extractor(
        scratch: &Path,
        texts: &[(&str, &str)],
    ) -> (Extractor, Arc<CountingDownloader>) {
        let downloader = Arc::new(CountingDownloader {
            calls: AtomicUsize::new(0),
        });
        let recognizer = MediaRecognizer::new(
            Arc::new(ScriptedRecognizer::new(texts)),
            Arc::new(PassthroughPreprocessor),
            Arc::new(FakeFrames { count: 0 }),
            MediaConfig::default(),
        );
        let extractor = extractor().with_media(MediaStage {
            downloader: downloader.clone(),
            recognizer,
            scratch_dir: scratch.to_path_buf(),
        });
        (extractor, downloader)
    }

    fn photo_message(id: &str, caption: &str) -> InboundMessage {
        message(id, caption).with_media(MediaAttachment {
            kind: MediaKind::Photo,
            source: "file-1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_media_without_code_is_marked_processed() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, downloader) = media_extractor(dir.path(), &[]);

        // Unknown file names make the scripted recognizer fail, so no code
        let outcome = extractor.extract(&photo_message("5", "Value: $1")).await;
        assert_eq!(outcome, Extraction::Ignored);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);

        // Already processed: no second download
        let again = extractor.extract(&photo_message("5", "Value: $1")).await;
        assert_eq!(again, Extraction::Ignored);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Fails the first download, succeeds afterwards
    struct FlakyDownloader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaDownloader for FlakyDownloader {
        async fn download(
            &self,
            _media: &MediaAttachment,
            destination: &Path,
        ) -> Result<(), SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SourceError::Download("connection reset".to_string()));
            }
            std::fs::write(destination, b"").map_err(|e| SourceError::Download(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_download_is_retried_on_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let downloader = Arc::new(FlakyDownloader {
            calls: AtomicUsize::new(0),
        });
        let recognizer = MediaRecognizer::new(
            Arc::new(ScriptedRecognizer::new(&[(
                "photo_1234_9_0.jpg",
                "REDEEM stakecomsunday",
            )])),
            Arc::new(PassthroughPreprocessor),
            Arc::new(FakeFrames { count: 0 }),
            MediaConfig::default(),
        );
        let extractor =
            Extractor::new(ExtractorConfig::default(), clock).with_media(MediaStage {
                downloader: downloader.clone(),
                recognizer,
                scratch_dir: dir.path().to_path_buf(),
            });

        let first = extractor.extract(&photo_message("9", "")).await;
        assert_eq!(first, Extraction::Ignored);

        let Extraction::Candidate(candidate) = extractor.extract(&photo_message("9", "")).await
        else {
            panic!("expected candidate on redelivery");
        };
        assert_eq!(candidate.code, "stakecomsunday");
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_media_candidate_pairs_caption_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let recognizer = MediaRecognizer::new(
            Arc::new(ScriptedRecognizer::new(&[(
                "photo_1234_7_0.jpg",
                "REDEEM stakecomsunday",
            )])),
            Arc::new(PassthroughPreprocessor),
            Arc::new(FakeFrames { count: 0 }),
            MediaConfig::default(),
        );
        let extractor =
            Extractor::new(ExtractorConfig::default(), clock).with_media(MediaStage {
                downloader: Arc::new(CountingDownloader {
                    calls: AtomicUsize::new(0),
                }),
                recognizer,
                scratch_dir: dir.path().to_path_buf(),
            });

        let Extraction::Candidate(candidate) =
            extractor.extract(&photo_message("7", "Value: $10")).await
        else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.code, "stakecomsunday");
        assert_eq!(candidate.strategy, StrategyKind::Media);
        assert_eq!(candidate.conditions, vec![Condition::new("Value", "$10")]);
        assert_eq!(candidate.confidence, Some(88.0));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
