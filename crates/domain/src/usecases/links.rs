//! Finding bonus links in messages and deriving codes from them

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::model::{AnnotationKind, BonusKind, InboundMessage};

static TRAILING_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[)\]}.,;!?]+$").expect("Valid regex"));

static CODE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{3,40}$").expect("Valid regex"));

/// Locates links to the configured bonus domains
#[derive(Debug, Clone)]
pub struct LinkFinder {
    domains: Vec<String>,
    raw_pattern: Option<Regex>,
}

impl LinkFinder {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains: Vec<String> = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches("www.").to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        let raw_pattern = if domains.is_empty() {
            None
        } else {
            let alternatives = domains
                .iter()
                .map(|d| regex::escape(d))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&format!(r"(?i)https?://(?:www\.)?(?:{alternatives})[^\s)]+")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid bonus domain pattern");
                    None
                }
            }
        };

        Self {
            domains,
            raw_pattern,
        }
    }

    /// First bonus link in the message, normalized
    ///
    /// Clickable link targets are searched before the raw text.
    pub fn find(&self, message: &InboundMessage) -> Option<String> {
        let from_links = message
            .annotations_of(AnnotationKind::TextLink)
            .filter_map(|a| a.url.as_deref())
            .find_map(|raw| self.accept(raw));
        if from_links.is_some() {
            return from_links;
        }

        let from_url_entities = message
            .annotations_of(AnnotationKind::Url)
            .filter_map(|a| a.covered(&message.text))
            .find_map(|raw| self.accept(raw));
        if from_url_entities.is_some() {
            return from_url_entities;
        }

        let pattern = self.raw_pattern.as_ref()?;
        pattern
            .find_iter(&message.text)
            .find_map(|m| self.accept(m.as_str()))
    }

    fn accept(&self, raw: &str) -> Option<String> {
        let url = normalize_url(raw)?;
        let host = url.host_str()?.trim_start_matches("www.").to_lowercase();
        let known = self
            .domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        known.then(|| url.to_string())
    }
}

/// Clean up a link as it appears in chat text
///
/// Strips trailing punctuation, upgrades protocol-relative and bare-domain
/// links to https, and unwraps `t.me/iv?url=` instant-view wrappers.
pub fn normalize_url(raw: &str) -> Option<Url> {
    let trimmed = TRAILING_PUNCTUATION.replace(raw.trim(), "");
    let with_scheme = if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else if trimmed.contains("://") {
        trimmed.into_owned()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    if url.host_str() == Some("t.me") && url.path() == "/iv" {
        let inner = url
            .query_pairs()
            .find(|(name, _)| name == "url")
            .map(|(_, value)| value.into_owned())?;
        return normalize_url(&inner);
    }

    Some(url)
}

/// Derive the bonus code from a link
///
/// Query parameters `code` and `bonus` win over the last path segment.
pub fn code_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;

    for wanted in ["code", "bonus"] {
        let value = url
            .query_pairs()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.trim().to_string());
        if let Some(value) = value.filter(|v| CODE_SHAPE.is_match(v)) {
            return Some(value);
        }
    }

    url.path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .filter(|segment| CODE_SHAPE.is_match(segment))
        .map(str::to_string)
}

/// Infer the recurring bonus kind from caption text and link
///
/// Returns `None` when nothing identifies a known kind.
pub fn classify_bonus(text: &str, url: &str) -> Option<BonusKind> {
    let haystack = format!("{} {}", text, url).to_lowercase();
    let has_any = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if has_any(&["pre-monthly", "pre monthly", "premonthly", "pré-mensuel"]) {
        Some(BonusKind::PreMonthly)
    } else if has_any(&["post-monthly", "post monthly", "postmonthly", "post-mensuel"]) {
        Some(BonusKind::PostMonthly)
    } else if has_any(&["monthly", "mensuel"]) {
        Some(BonusKind::Monthly)
    } else if has_any(&["weekly", "hebdo"]) {
        Some(BonusKind::Weekly)
    } else {
        None
    }
}

/// Redeem link for a drop code
pub fn drop_redeem_url(base: &str, code: &str) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("code", code);
            url.to_string()
        }
        Err(_) => format!("{base}{code}"),
    }
}

/// Redeem link for a recurring bonus code
pub fn bonus_redeem_url(base: &str, code: &str) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("bonus", code);
            url.to_string()
        }
        Err(_) => format!("{base}?bonus={code}"),
    }
}
