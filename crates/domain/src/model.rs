//! Domain models and value objects

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether an inbound event carries a new message or an edit of a known one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    New,
    Edit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Edit => "edit",
        }
    }
}

/// Normalized identity of a source channel
///
/// Either part may be missing: private chats have no handle, and some
/// deliveries only carry the handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentity {
    /// Numeric chat identifier with platform prefixes stripped
    pub id: Option<String>,
    /// Lower-cased handle without `@` or link prefix
    pub handle: Option<String>,
}

impl ChannelIdentity {
    pub fn new(id: Option<&str>, handle: Option<&str>) -> Self {
        Self {
            id: id.map(normalize_chat_id).filter(|s| !s.is_empty()),
            handle: handle.map(normalize_handle).filter(|s| !s.is_empty()),
        }
    }

    /// Key used to partition per-channel state (announcements, dedup keys)
    pub fn key(&self) -> &str {
        self.id
            .as_deref()
            .or(self.handle.as_deref())
            .unwrap_or("x")
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.handle, &self.id) {
            (Some(handle), Some(id)) => write!(f, "@{handle} ({id})"),
            (Some(handle), None) => write!(f, "@{handle}"),
            (None, Some(id)) => f.write_str(id),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// Strip the `-100` supergroup prefix (or a bare leading `-`) from a chat id
pub fn normalize_chat_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("-100") {
        Some(rest) => rest.to_string(),
        None => trimmed.trim_start_matches('-').to_string(),
    }
}

/// Lower-case a handle and strip `@` and `t.me` link prefixes
pub fn normalize_handle(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let without_link = ["https://t.me/", "http://t.me/", "t.me/"]
        .iter()
        .find_map(|prefix| lowered.strip_prefix(prefix))
        .unwrap_or(&lowered);
    without_link
        .trim_start_matches('@')
        .trim_end_matches('/')
        .to_string()
}

fn looks_numeric(entry: &str) -> bool {
    let digits = entry.strip_prefix('-').unwrap_or(entry);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Allow-list of source channels (handles and numeric ids)
///
/// An empty filter accepts every channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    handles: HashSet<String>,
    ids: HashSet<String>,
}

impl ChannelFilter {
    /// Build a filter from raw configuration entries
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if looks_numeric(entry) {
                filter.ids.insert(normalize_chat_id(entry));
            } else {
                let handle = normalize_handle(entry);
                if !handle.is_empty() {
                    filter.handles.insert(handle);
                }
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty() && self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len() + self.ids.len()
    }

    pub fn allows(&self, channel: &ChannelIdentity) -> bool {
        if self.is_empty() {
            return true;
        }
        let id_match = channel.id.as_ref().is_some_and(|id| self.ids.contains(id));
        let handle_match = channel
            .handle
            .as_ref()
            .is_some_and(|handle| self.handles.contains(handle));
        id_match || handle_match
    }
}

/// Kind of a text-range annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Spoiler,
    /// Clickable text whose target is carried in `url`
    TextLink,
    /// Bare URL detected in the text body
    Url,
    Other,
}

/// Formatting annotation over a range of the message text
///
/// Offsets and lengths count UTF-16 code units, as chat platforms report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub kind: AnnotationKind,
    pub offset: usize,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TextAnnotation {
    pub fn new(kind: AnnotationKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
            url: None,
        }
    }

    pub fn text_link(offset: usize, length: usize, url: impl Into<String>) -> Self {
        Self {
            kind: AnnotationKind::TextLink,
            offset,
            length,
            url: Some(url.into()),
        }
    }

    /// Slice of `text` covered by this annotation, or `None` when out of range
    pub fn covered<'a>(&self, text: &'a str) -> Option<&'a str> {
        let end_units = self.offset.checked_add(self.length)?;
        let mut units = 0usize;
        let mut start_byte = None;
        let mut end_byte = None;
        for (byte_idx, ch) in text.char_indices() {
            if units == self.offset {
                start_byte = Some(byte_idx);
            }
            if units == end_units {
                end_byte = Some(byte_idx);
                break;
            }
            units += ch.len_utf16();
        }
        if start_byte.is_none() && units == self.offset {
            start_byte = Some(text.len());
        }
        if end_byte.is_none() && units == end_units {
            end_byte = Some(text.len());
        }
        match (start_byte, end_byte) {
            (Some(start), Some(end)) if start <= end => text.get(start..end),
            _ => None,
        }
    }
}

/// Kind of media attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        }
    }

    /// File extension used for downloaded copies
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Other => "bin",
        }
    }
}

/// Media attached to an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    /// Opaque platform reference used to download the bytes
    pub source: String,
}

/// A message (or edit) received from the source channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: ChannelIdentity,
    /// Message sequence number within the channel
    pub message_id: String,
    /// Text body, or the caption for media messages
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<TextAnnotation>,
    #[serde(default)]
    pub media: Option<MediaAttachment>,
    #[serde(default)]
    pub event: EventKind,
}

impl InboundMessage {
    pub fn from_text(
        channel: ChannelIdentity,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            message_id: message_id.into(),
            text: text.into(),
            annotations: Vec::new(),
            media: None,
            event: EventKind::New,
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<TextAnnotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    pub fn seen_key(&self) -> SeenKey {
        SeenKey::new(&self.channel, &self.message_id)
    }

    /// Annotations of one kind, in message order
    pub fn annotations_of(&self, kind: AnnotationKind) -> impl Iterator<Item = &TextAnnotation> {
        self.annotations.iter().filter(move |a| a.kind == kind)
    }
}

/// Dedup key shared by the new and edited variants of one message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeenKey(String);

impl SeenKey {
    pub fn new(channel: &ChannelIdentity, message_id: &str) -> Self {
        let channel_part = channel.id.as_deref().unwrap_or("x");
        Self(format!("tg:{channel_part}:{message_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marks that OCR was attempted for one attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedMediaKey {
    pub kind: MediaKind,
    pub channel: String,
    pub message_id: String,
}

impl ProcessedMediaKey {
    pub fn for_message(message: &InboundMessage, kind: MediaKind) -> Self {
        Self {
            kind,
            channel: message.channel.key().to_string(),
            message_id: message.message_id.clone(),
        }
    }
}

impl fmt::Display for ProcessedMediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind.as_str(), self.channel, self.message_id)
    }
}

/// A sanitized label/value pair describing the terms of a drop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub label: String,
    pub value: String,
}

impl Condition {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Classification of the promotion a code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusKind {
    Drop,
    Weekly,
    Monthly,
    PreMonthly,
    PostMonthly,
}

impl BonusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusKind::Drop => "drop",
            BonusKind::Weekly => "weekly",
            BonusKind::Monthly => "monthly",
            BonusKind::PreMonthly => "pre_monthly",
            BonusKind::PostMonthly => "post_monthly",
        }
    }
}

/// The extraction strategies, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Announcement,
    ComingSoon,
    StandaloneCode,
    Url,
    Spoiler,
    Media,
}

impl StrategyKind {
    pub const ORDERED: [StrategyKind; 6] = [
        StrategyKind::Announcement,
        StrategyKind::ComingSoon,
        StrategyKind::StandaloneCode,
        StrategyKind::Url,
        StrategyKind::Spoiler,
        StrategyKind::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Announcement => "announcement",
            StrategyKind::ComingSoon => "coming_soon",
            StrategyKind::StandaloneCode => "standalone_code",
            StrategyKind::Url => "url",
            StrategyKind::Spoiler => "spoiler",
            StrategyKind::Media => "media",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bonus code extracted from one message, ready to be rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusCandidate {
    pub code: String,
    pub conditions: Vec<Condition>,
    pub rank_min: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Redeem link for the code
    pub url: String,
    pub kind: BonusKind,
    pub strategy: StrategyKind,
    /// OCR confidence (0-100) for media candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Raw output of a text recognition call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence, 0-100
    pub confidence: f32,
}

/// Result of scanning an image or video for a code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaScan {
    pub code: Option<String>,
    pub text: String,
    pub confidence: f32,
    /// Frames (or images) recognized before the scan stopped
    pub frames_processed: usize,
}

impl MediaScan {
    pub fn none() -> Self {
        Self::default()
    }
}

/// A notice rendered for the destination channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub url: String,
    pub code: String,
    pub fields: Vec<Condition>,
    /// Role to mention alongside the notice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_role_id: Option<String>,
    /// Dedup key of the source message
    pub source_key: String,
}

/// Outcome of handling one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Notice delivered (or logged in dry-run mode)
    Published {
        strategy: StrategyKind,
        code: String,
    },
    /// A strategy consumed the message without publishing
    Handled { strategy: StrategyKind },
    /// The message was already published (or is being published concurrently)
    Duplicate {
        strategy: StrategyKind,
        key: String,
    },
    /// Publishing failed after every retry
    Dropped {
        strategy: StrategyKind,
        code: String,
    },
    /// Channel not on the allow-list
    Filtered,
    /// No strategy matched
    Ignored,
}
