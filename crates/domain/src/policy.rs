//! Sanitization policy for condition pairs scraped from message text

use std::sync::LazyLock;

use regex::Regex;

use crate::model::Condition;

/// Maximum number of conditions kept per message
pub const MAX_CONDITIONS: usize = 10;
/// Longest label accepted (and kept)
pub const MAX_LABEL_LEN: usize = 50;
/// Longest value accepted
pub const MAX_VALUE_INPUT_LEN: usize = 200;
/// Values are cut to this length once accepted
pub const MAX_VALUE_LEN: usize = 100;

const KNOWN_LABELS: &[&str] = &[
    "value",
    "min bet",
    "minimum bet",
    "total drop limit",
    "drop limit",
    "type",
    "minimum rank",
    "rank",
    "wagering",
    "wager",
    "expiry",
    "currency",
    "max claims",
    "claims",
    "claim",
    "bonus",
    "reward",
    "amount",
    "prize",
    "limit",
    "duration",
    "level",
    "tier",
];

static LABEL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z\s]{3,25}$").expect("Valid regex"));

static INJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<script|javascript:|onclick|onerror|onload").expect("Valid regex")
});

// Labels stay on one line so a heading above a pair is not swallowed.
static CONDITION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z \t]*):[ \t]*([^\n]+)").expect("Valid regex")
});

static LINK_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?:").expect("Valid regex"));

/// Why a condition pair was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionRejection {
    #[error("empty label or value")]
    Empty,
    #[error("label too long: {0} chars")]
    LabelTooLong(usize),
    #[error("value too long: {0} chars")]
    ValueTooLong(usize),
    #[error("label not recognized: {0}")]
    UnknownLabel(String),
    #[error("value contains markup")]
    Markup,
}

/// Validate a raw label/value pair, returning the trimmed and capped condition
pub fn sanitize_condition(label: &str, value: &str) -> Result<Condition, ConditionRejection> {
    let label = label.trim();
    let value = value.trim();

    if label.is_empty() || value.is_empty() {
        return Err(ConditionRejection::Empty);
    }

    let label_len = label.chars().count();
    if label_len > MAX_LABEL_LEN {
        return Err(ConditionRejection::LabelTooLong(label_len));
    }
    let value_len = value.chars().count();
    if value_len > MAX_VALUE_INPUT_LEN {
        return Err(ConditionRejection::ValueTooLong(value_len));
    }

    let lowered = label.to_lowercase();
    if !KNOWN_LABELS.contains(&lowered.as_str()) && !LABEL_SHAPE.is_match(&lowered) {
        return Err(ConditionRejection::UnknownLabel(label.to_string()));
    }

    if INJECTION.is_match(value) {
        return Err(ConditionRejection::Markup);
    }

    Ok(Condition::new(
        truncate_chars(label, MAX_LABEL_LEN),
        truncate_chars(value, MAX_VALUE_LEN),
    ))
}

/// Keep the sanitized pairs, in order, up to [`MAX_CONDITIONS`]
pub fn sanitize_conditions<'a, I>(pairs: I) -> Vec<Condition>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .filter_map(|(label, value)| match sanitize_condition(label, value) {
            Ok(condition) => Some(condition),
            Err(reason) => {
                tracing::debug!(label = %label, reason = %reason, "Dropped condition");
                None
            }
        })
        .take(MAX_CONDITIONS)
        .collect()
}

/// Scan free text for `Label: value` lines and sanitize them
pub fn extract_conditions(text: &str) -> Vec<Condition> {
    let pairs = CONDITION_LINE.captures_iter(text).filter_map(|caps| {
        let label = caps.get(1)?.as_str().trim();
        let value = caps.get(2)?.as_str().trim();
        if LINK_PREFIX.is_match(value) || LINK_PREFIX.is_match(label) {
            return None;
        }
        if label.eq_ignore_ascii_case("code") {
            return None;
        }
        Some((label, value))
    });
    sanitize_conditions(pairs)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
