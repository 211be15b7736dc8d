//! Extract command - one-shot offline extraction

use anyhow::{Context, Result, bail};
use dropwatch_domain::usecases::{Extraction, Extractor, NoticeRenderer};
use dropwatch_domain::{
    AnnotationKind, ChannelIdentity, InboundMessage, SystemClock, TextAnnotation,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::args::ExtractArgs;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct ExtractReport {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate: Option<dropwatch_domain::BonusCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<dropwatch_domain::Notice>,
}

pub async fn execute(args: ExtractArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();

    if args.text.trim().is_empty() {
        bail!("No text provided for extraction");
    }

    let message = build_message(&args);
    tracing::info!(
        channel = %message.channel,
        annotations = message.annotations.len(),
        "Extracting from text"
    );

    let extractor = Extractor::new(config.extractor_config(), Arc::new(SystemClock));
    let report = match extractor.extract(&message).await {
        Extraction::Ignored => ExtractReport {
            outcome: "ignored",
            strategy: None,
            candidate: None,
            notice: None,
        },
        Extraction::Handled(strategy) => ExtractReport {
            outcome: "handled",
            strategy: Some(strategy.to_string()),
            candidate: None,
            notice: None,
        },
        Extraction::Candidate(candidate) => {
            let notice = NoticeRenderer::new(config.render_config()).render(&candidate, &message);
            ExtractReport {
                outcome: "candidate",
                strategy: Some(candidate.strategy.to_string()),
                candidate: Some(candidate),
                notice: Some(notice),
            }
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize output")?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn build_message(args: &ExtractArgs) -> InboundMessage {
    let mut annotations: Vec<TextAnnotation> = args
        .spoiler
        .iter()
        .map(|&(offset, length)| TextAnnotation::new(AnnotationKind::Spoiler, offset, length))
        .collect();

    if let Some(link) = &args.link {
        let whole_text = args.text.encode_utf16().count();
        annotations.push(TextAnnotation::text_link(0, whole_text, link.as_str()));
    }

    let channel = ChannelIdentity::new(None, Some(&args.channel));
    InboundMessage::from_text(channel, "cli-input", args.text.as_str()).with_annotations(annotations)
}

fn print_report(report: &ExtractReport) {
    match (&report.candidate, &report.notice) {
        (Some(candidate), Some(notice)) => {
            println!("Extracted Code");
            println!("==============");
            println!();
            println!("Code:     {}", candidate.code);
            println!("Strategy: {}", candidate.strategy);
            println!("Kind:     {}", candidate.kind.as_str());
            println!("Rank:     {}", candidate.rank_min);
            println!("URL:      {}", notice.url);
            if !candidate.conditions.is_empty() {
                println!();
                println!("Conditions:");
                for condition in &candidate.conditions {
                    println!("  - {}: {}", condition.label, condition.value);
                }
            }
        }
        _ => match &report.strategy {
            Some(strategy) => println!("Handled by {} strategy, nothing to publish.", strategy),
            None => println!("No code found."),
        },
    }
}
