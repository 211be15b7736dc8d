//! Configuration loading and management

use anyhow::{Context, Result};
use dropwatch_domain::usecases::{
    ExtractorConfig, MediaConfig, RenderConfig, RetryPolicy, SupervisorConfig,
};
use dropwatch_domain::ChannelFilter;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub destination: DestinationConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub media: MediaSettings,

    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_true")]
    pub dry_run: bool,

    #[serde(default = "default_outbox_path")]
    pub outbox_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    /// Allow-listed channels (handles, t.me links or numeric ids); empty accepts all
    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(default = "default_webhook_url_env")]
    pub webhook_url_env: String,

    #[serde(default)]
    pub ping_role_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_rank_min")]
    pub rank_min: String,

    #[serde(default = "default_url_domains")]
    pub url_domains: Vec<String>,

    #[serde(default)]
    pub announcer_mention: Option<String>,

    #[serde(default = "default_redeem_base_url")]
    pub redeem_base_url: String,

    #[serde(default = "default_drop_redeem_url")]
    pub drop_redeem_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tail_seconds")]
    pub tail_seconds: u64,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_tesseract_command")]
    pub tesseract_command: String,

    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,

    #[serde(default = "default_ffprobe_command")]
    pub ffprobe_command: String,

    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

// Default value functions
fn default_state_db_path() -> PathBuf {
    PathBuf::from("./dropwatch.sqlite")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_outbox_path() -> PathBuf {
    PathBuf::from("./outbox.jsonl")
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_poll_timeout() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_webhook_url_env() -> String {
    "DISCORD_WEBHOOK_URL".to_string()
}

fn default_rank_min() -> String {
    ExtractorConfig::default().rank_min
}

fn default_url_domains() -> Vec<String> {
    ExtractorConfig::default().url_domains
}

fn default_redeem_base_url() -> String {
    ExtractorConfig::default().redeem_base_url
}

fn default_drop_redeem_url() -> String {
    ExtractorConfig::default().drop_redeem_url
}

fn default_tail_seconds() -> u64 {
    2
}

fn default_fps() -> u32 {
    5
}

fn default_batch_size() -> usize {
    3
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("dropwatch")
}

fn default_tesseract_command() -> String {
    "tesseract".to_string()
}

fn default_ffmpeg_command() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_command() -> String {
    "ffprobe".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_db_path: default_state_db_path(),
            log_level: default_log_level(),
            debug: false,
            dry_run: default_true(),
            outbox_path: default_outbox_path(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            channels: vec![],
            poll_timeout_secs: default_poll_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            webhook_url_env: default_webhook_url_env(),
            ping_role_id: None,
            username: None,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            rank_min: default_rank_min(),
            url_domains: default_url_domains(),
            announcer_mention: None,
            redeem_base_url: default_redeem_base_url(),
            drop_redeem_url: default_drop_redeem_url(),
        }
    }
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            tail_seconds: default_tail_seconds(),
            fps: default_fps(),
            batch_size: default_batch_size(),
            scratch_dir: default_scratch_dir(),
            tesseract_command: default_tesseract_command(),
            ffmpeg_command: default_ffmpeg_command(),
            ffprobe_command: default_ffprobe_command(),
            language: default_language(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        // DROPWATCH__SOURCE__CHANNELS="@a,@b" style overrides
        builder = builder.add_source(
            config::Environment::with_prefix("DROPWATCH")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("source.channels")
                .with_list_parse_key("extraction.url_domains"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn channel_filter(&self) -> ChannelFilter {
        ChannelFilter::from_entries(&self.source.channels)
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            rank_min: self.extraction.rank_min.clone(),
            url_domains: self.extraction.url_domains.clone(),
            announcer_mention: self
                .extraction
                .announcer_mention
                .clone()
                .filter(|m| !m.trim().is_empty()),
            redeem_base_url: self.extraction.redeem_base_url.clone(),
            drop_redeem_url: self.extraction.drop_redeem_url.clone(),
        }
    }

    pub fn media_config(&self) -> MediaConfig {
        MediaConfig {
            tail: Duration::from_secs(self.media.tail_seconds),
            fps: self.media.fps.max(1),
            batch_size: self.media.batch_size.max(1),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            heartbeat_interval: Duration::from_secs(self.source.heartbeat_interval_secs.max(1)),
            max_reconnect_attempts: self.source.max_reconnect_attempts,
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish.max_attempts.max(1),
            base_delay: Duration::from_millis(self.publish.base_delay_ms),
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            ping_role_id: self.destination.ping_role_id.clone(),
            ..Default::default()
        }
    }

    /// Effective default log filter before `RUST_LOG` is considered
    pub fn log_level(&self) -> &str {
        if self.general.debug {
            "debug"
        } else {
            &self.general.log_level
        }
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# dropwatch configuration
# Every key can be overridden from the environment, e.g. DROPWATCH__GENERAL__DRY_RUN=false

[general]
state_db_path = "./dropwatch.sqlite"
log_level = "info"
debug = false
# Log notices instead of publishing them
dry_run = true
# Used by `run --outbox`
outbox_path = "./outbox.jsonl"

[source]
# Name of the environment variable holding the Telegram bot token
bot_token_env = "TELEGRAM_BOT_TOKEN"
# Handles, t.me links or numeric ids; empty accepts every channel the bot sees
channels = ["@example_drops"]
poll_timeout_secs = 10
heartbeat_interval_secs = 30
max_reconnect_attempts = 10

[destination]
# Name of the environment variable holding the Discord webhook URL
webhook_url_env = "DISCORD_WEBHOOK_URL"
# ping_role_id = "123456789012345678"
# username = "dropwatch"

[extraction]
rank_min = "Bronze"
url_domains = ["playstake.club"]
# Only accept announcements mentioning this tag
# announcer_mention = "@RainsTEAM"
redeem_base_url = "https://stake.com"
drop_redeem_url = "https://stake.com/settings/offers?type=drop&currency=usdc&modal=redeemBonus"

[media]
enabled = true
# Seconds at the end of a video that are sampled
tail_seconds = 2
fps = 5
batch_size = 3
scratch_dir = "/tmp/dropwatch"
tesseract_command = "tesseract"
ffmpeg_command = "ffmpeg"
ffprobe_command = "ffprobe"
language = "eng"

[publish]
max_attempts = 3
base_delay_ms = 5000
"#
        .to_string()
    }
}

/// Read a secret from the environment variable named `env_name`
pub fn secret_from_env(env_name: &str) -> Result<SecretString> {
    let value = std::env::var(env_name)
        .with_context(|| format!("Environment variable {} is not set", env_name))?;
    if value.trim().is_empty() {
        anyhow::bail!("Environment variable {} is empty", env_name);
    }
    Ok(SecretString::from(value))
}
