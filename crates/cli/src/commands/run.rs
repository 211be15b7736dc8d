//! Run command - watch the source channels and publish extracted codes

use anyhow::{Context, Result, bail};
use dropwatch_adapters::{
    dedup::SqliteDedupStore,
    discord::DiscordWebhookPublisher,
    ocr::{CaptionPreprocessor, FfmpegFrameExtractor, TesseractConfig, TesseractRecognizer},
    outbox::{OutboxPublisher, OutboxWriter},
    telegram::{TelegramConfig, TelegramSource},
};
use dropwatch_domain::{
    MessageHandler, Publisher, SystemClock,
    usecases::{
        ConnectionState, ConnectionSupervisor, DedupLedger, Dispatcher, DispatcherConfig,
        Extractor, MediaRecognizer, MediaStage, PublishRetrier,
    },
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::args::RunArgs;
use crate::config::{AppConfig, secret_from_env};

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let dry_run = args.dry_run || config.general.dry_run;

    let filter = config.channel_filter();
    tracing::info!(
        dry_run = dry_run,
        outbox = args.outbox,
        channels = filter.len(),
        media = config.media.enabled,
        "Starting dropwatch run"
    );
    if filter.is_empty() {
        tracing::warn!("No channels configured; every channel the bot sees is accepted");
    }

    let clock = Arc::new(SystemClock);

    let store = Arc::new(
        SqliteDedupStore::new(&config.general.state_db_path)
            .await
            .context("Failed to initialize SQLite dedup store")?,
    );
    let ledger = DedupLedger::new(store, clock.clone());
    ledger
        .purge_expired()
        .await
        .context("Failed to purge expired dedup entries")?;

    let token = secret_from_env(&config.source.bot_token_env)
        .context("Telegram bot token is required")?;
    let source = Arc::new(TelegramSource::new(
        &token,
        TelegramConfig {
            poll_timeout: Duration::from_secs(config.source.poll_timeout_secs),
        },
    ));

    let publisher = build_publisher(&config, &args, dry_run).await?;

    let mut extractor = Extractor::new(config.extractor_config(), clock.clone());
    if config.media.enabled {
        extractor = extractor.with_media(build_media_stage(&config, source.clone()).await?);
    }

    let dispatcher = Dispatcher::new(
        filter,
        extractor,
        ledger,
        publisher,
        PublishRetrier::new(config.retry_policy()),
        DispatcherConfig {
            dry_run,
            render: config.render_config(),
        },
    );
    let handler: Arc<dyn MessageHandler> = Arc::new(dispatcher);

    let supervisor = Arc::new(ConnectionSupervisor::new(
        source,
        handler,
        config.supervisor_config(),
    ));
    let mut state = supervisor.watch_state();

    if !supervisor.connect().await {
        supervisor
            .reconnect()
            .await
            .context("Could not connect to Telegram")?;
    }

    let failed = async {
        // A closed channel means the supervisor is gone; treat it as failure too
        let _ = state.wait_for(|s| *s == ConnectionState::Failed).await;
    };

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
        _ = failed => {
            supervisor.shutdown().await;
            bail!("Source channel connection lost and reconnection attempts exhausted");
        }
    }

    supervisor.shutdown().await;
    tracing::info!("dropwatch run completed");
    Ok(())
}

async fn build_publisher(
    config: &AppConfig,
    args: &RunArgs,
    dry_run: bool,
) -> Result<Arc<dyn Publisher>> {
    if args.outbox {
        let path = args
            .outbox_path
            .clone()
            .unwrap_or_else(|| config.general.outbox_path.clone());
        let writer = OutboxWriter::new(path.clone())
            .await
            .context("Failed to initialize outbox writer")?;
        tracing::info!(outbox = %path.display(), "Writing notices to outbox");
        return Ok(Arc::new(OutboxPublisher::new(writer)));
    }

    match secret_from_env(&config.destination.webhook_url_env) {
        Ok(url) => Ok(Arc::new(
            DiscordWebhookPublisher::new(url, config.destination.username.clone())
                .context("Failed to initialize Discord publisher")?,
        )),
        Err(e) if dry_run => {
            tracing::warn!(error = %e, "No webhook configured; dry run only logs notices");
            Ok(Arc::new(DiscordWebhookPublisher::disabled()))
        }
        Err(e) => Err(e.context("Discord webhook URL is required unless --dry-run or --outbox")),
    }
}

async fn build_media_stage(config: &AppConfig, source: Arc<TelegramSource>) -> Result<MediaStage> {
    let scratch_dir = config.media.scratch_dir.clone();
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .with_context(|| format!("Failed to create scratch dir {}", scratch_dir.display()))?;

    let recognizer = TesseractRecognizer::new(TesseractConfig {
        command: config.media.tesseract_command.clone(),
        language: config.media.language.clone(),
        ..Default::default()
    });
    let frames = FfmpegFrameExtractor::new(
        config.media.ffmpeg_command.clone(),
        config.media.ffprobe_command.clone(),
    );

    Ok(MediaStage {
        downloader: source,
        recognizer: MediaRecognizer::new(
            Arc::new(recognizer),
            Arc::new(CaptionPreprocessor),
            Arc::new(frames),
            config.media_config(),
        ),
        scratch_dir,
    })
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
