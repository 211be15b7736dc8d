//! Rendering use case - turns a bonus candidate into a destination notice

use crate::model::{BonusCandidate, BonusKind, Condition, InboundMessage, Notice};

/// Configuration for the renderer
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Role mentioned with every notice
    pub ping_role_id: Option<String>,
    /// Title used when the candidate carries none
    pub default_title: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ping_role_id: None,
            default_title: "NOUVEAU DROP BONUS".to_string(),
        }
    }
}

/// Renderer for notices
pub struct NoticeRenderer {
    config: RenderConfig,
}

impl NoticeRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render a candidate extracted from `message`
    pub fn render(&self, candidate: &BonusCandidate, message: &InboundMessage) -> Notice {
        let title = candidate
            .title
            .clone()
            .unwrap_or_else(|| self.config.default_title.clone());

        let description = match &candidate.description {
            Some(description) => description.clone(),
            None => format!("Rang minimum : {}", candidate.rank_min),
        };

        let mut fields = candidate.conditions.clone();
        if candidate.kind == BonusKind::Drop && !has_rank_condition(&fields) {
            fields.push(Condition::new("Rang", candidate.rank_min.clone()));
        }

        Notice {
            title,
            description,
            url: candidate.url.clone(),
            code: candidate.code.clone(),
            fields,
            ping_role_id: self.config.ping_role_id.clone(),
            source_key: message.seen_key().to_string(),
        }
    }
}

fn has_rank_condition(fields: &[Condition]) -> bool {
    fields
        .iter()
        .any(|c| c.label.to_lowercase().contains("rank") || c.label.to_lowercase() == "rang")
}
