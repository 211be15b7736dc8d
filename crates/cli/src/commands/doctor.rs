//! Doctor command - validate configuration and show status

use anyhow::{Result, bail};
use dropwatch_adapters::dedup::SqliteDedupStore;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::args::DoctorArgs;
use crate::config::AppConfig;

const COMPONENTS: [&str; 5] = ["config", "database", "telegram", "discord", "media"];

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    database: CheckResult,
    telegram: CheckResult,
    discord: CheckResult,
    media: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: "skipped".to_string(),
            message: "Not checked".to_string(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok" || self.status == "skipped"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    if let Some(check) = args.check.as_deref() {
        if !COMPONENTS.contains(&check) {
            bail!(
                "Unknown component '{}', expected one of: {}",
                check,
                COMPONENTS.join(", ")
            );
        }
    }
    let wants = |name: &str| args.check.as_deref().is_none_or(|c| c == name);

    let mut report = DoctorReport {
        config: CheckResult::skipped(),
        database: CheckResult::skipped(),
        telegram: CheckResult::skipped(),
        discord: CheckResult::skipped(),
        media: CheckResult::skipped(),
        overall: "error".to_string(),
    };

    // The config is needed by every other check
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        if wants("database") {
            report.database = check_database(&config.general.state_db_path).await;
        }
        if wants("telegram") {
            report.telegram = check_telegram(config);
        }
        if wants("discord") {
            report.discord = check_discord(config);
        }
        if wants("media") {
            report.media = check_media(config);
        }
    }

    let checks = [
        &report.config,
        &report.database,
        &report.telegram,
        &report.discord,
        &report.media,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

async fn check_database(path: &Path) -> CheckResult {
    match SqliteDedupStore::new(path).await {
        Ok(store) => match store.count().await {
            Ok(count) => CheckResult::ok(format!(
                "Dedup database {} ({} keys)",
                path.display(),
                count
            ))
            .with_details(serde_json::json!({ "keys": count })),
            Err(e) => CheckResult::error(format!("Failed to query dedup database: {}", e)),
        },
        Err(e) => CheckResult::error(format!(
            "Failed to open dedup database {}: {}",
            path.display(),
            e
        )),
    }
}

fn env_is_set(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.trim().is_empty())
}

fn check_telegram(config: &AppConfig) -> CheckResult {
    let env_var = &config.source.bot_token_env;
    if env_var.is_empty() {
        return CheckResult::error("No bot token env var configured");
    }

    let channels = &config.source.channels;
    let scope = if channels.is_empty() {
        "all channels".to_string()
    } else {
        channels.join(", ")
    };

    if env_is_set(env_var) {
        CheckResult::ok(format!("Bot token: {} (set), Watching: {}", env_var, scope))
    } else {
        CheckResult::error(format!(
            "Bot token: {} (not set), Watching: {}",
            env_var, scope
        ))
    }
}

fn check_discord(config: &AppConfig) -> CheckResult {
    let env_var = &config.destination.webhook_url_env;
    if env_var.is_empty() {
        return CheckResult::error("No webhook URL env var configured");
    }

    match (env_is_set(env_var), config.general.dry_run) {
        (true, _) => CheckResult::ok(format!("Webhook URL: {} (set)", env_var)),
        (false, true) => CheckResult::warn(format!(
            "Webhook URL: {} (not set), dry-run enabled",
            env_var
        )),
        (false, false) => CheckResult::error(format!("Webhook URL: {} (not set)", env_var)),
    }
}

fn check_media(config: &AppConfig) -> CheckResult {
    if !config.media.enabled {
        return CheckResult::ok("Media recognition disabled");
    }

    let tools = [
        &config.media.tesseract_command,
        &config.media.ffmpeg_command,
        &config.media.ffprobe_command,
    ];
    let missing: Vec<&str> = tools
        .iter()
        .filter(|t| !command_exists(t))
        .map(|t| t.as_str())
        .collect();

    if missing.is_empty() {
        CheckResult::ok(format!(
            "Tools found: {}",
            tools.map(|t| t.as_str()).join(", ")
        ))
    } else {
        CheckResult::warn(format!(
            "Not found on PATH: {} (media posts will be skipped)",
            missing.join(", ")
        ))
        .with_details(serde_json::json!({ "missing": missing }))
    }
}

fn command_exists(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }

    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };

    std::env::split_paths(&paths).any(|dir| dir.join(command).is_file())
}

fn print_report(report: &DoctorReport) {
    println!("dropwatch Doctor Report");
    println!("=======================");
    println!();

    print_check("Config", &report.config);
    print_check("Database", &report.database);
    print_check("Telegram", &report.telegram);
    print_check("Discord", &report.discord);
    print_check("Media", &report.media);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready to run! Try: dropwatch run --dry-run");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        "skipped" => "-",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
