//! Source-channel session lifecycle: connect, heartbeat, bounded reconnection

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::ports::{MessageHandler, Sleeper, SourceChannel, TokioSleeper};

/// Upper bound for the exponential part of the reconnect delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Session state as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection gave up; the process needs a restart
    Failed,
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Upper bound of the random delay added to each backoff
    pub jitter_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            jitter_window: Duration::from_secs(1),
        }
    }
}

/// Errors surfaced by the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// `min(2^attempt * 1s, 300s)`
pub fn reconnect_base_delay(attempt: u32) -> Duration {
    let millis = 2u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(1000))
        .unwrap_or(u64::MAX);
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Base delay plus a jitter drawn from `[0, window)`
pub fn reconnect_delay(
    attempt: u32,
    window: Duration,
    jitter: impl Fn(Duration) -> Duration,
) -> Duration {
    reconnect_base_delay(attempt) + jitter(window)
}

/// Keeps a source channel connected
///
/// Owns the heartbeat task and the reconnection guard; nothing here is global.
pub struct ConnectionSupervisor<S: SourceChannel + ?Sized> {
    source: Arc<S>,
    handler: Arc<dyn MessageHandler>,
    sleeper: Arc<dyn Sleeper>,
    jitter: fn(Duration) -> Duration,
    config: SupervisorConfig,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    reconnecting: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SourceChannel + ?Sized + 'static> ConnectionSupervisor<S> {
    pub fn new(source: Arc<S>, handler: Arc<dyn MessageHandler>, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            source,
            handler,
            sleeper: Arc::new(TokioSleeper),
            jitter: tokio_retry::strategy::jitter,
            config,
            state,
            attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    /// Replace the delay function used between reconnection attempts
    pub fn with_delays(mut self, sleeper: Arc<dyn Sleeper>, jitter: fn(Duration) -> Duration) -> Self {
        self.sleeper = sleeper;
        self.jitter = jitter;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Establish the session; never fails, returns whether it is up
    pub async fn connect(self: &Arc<Self>) -> bool {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(platform = self.source.platform(), "Connecting to source channel");

        match self.source.connect().await {
            Ok(()) => {
                self.install_handlers();
                self.attempts.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                self.start_heartbeat();
                tracing::info!(platform = self.source.platform(), "Source channel connected");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Source channel connection failed");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Reconnect with exponential backoff
    ///
    /// A call while another reconnection is running returns immediately.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), SupervisorError> {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Reconnection already in progress");
            return Ok(());
        }

        self.stop_heartbeat();
        self.set_state(ConnectionState::Reconnecting);
        let result = self.reconnect_loop().await;
        self.reconnecting.store(false, Ordering::SeqCst);
        result
    }

    async fn reconnect_loop(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let max = self.config.max_reconnect_attempts;
        while self.attempts.load(Ordering::SeqCst) < max {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = reconnect_delay(attempt, self.config.jitter_window, self.jitter);
            tracing::info!(
                attempt,
                max_attempts = max,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to source channel"
            );
            self.sleeper.sleep(delay).await;

            if let Err(e) = self.source.disconnect().await {
                tracing::debug!(error = %e, "Disconnect before reconnect failed");
            }
            if self.connect().await {
                tracing::info!(attempt, "Reconnected to source channel");
                return Ok(());
            }
            self.set_state(ConnectionState::Reconnecting);
        }

        self.set_state(ConnectionState::Failed);
        tracing::error!(
            attempts = max,
            remediation = "check network access and the bot token, then restart the process",
            "Reconnection abandoned; manual restart required"
        );
        Err(SupervisorError::ReconnectExhausted { attempts: max })
    }

    /// One heartbeat: probe a live session, or start reconnecting a dead one
    ///
    /// A failed probe is only logged.
    pub async fn heartbeat_tick(self: &Arc<Self>) {
        if self.source.is_connected() {
            match self.source.ping().await {
                Ok(()) => tracing::trace!("Heartbeat ok"),
                Err(e) => tracing::warn!(error = %e, "Heartbeat probe failed"),
            }
            return;
        }

        tracing::warn!("Source channel reports disconnected");
        let supervisor = Arc::clone(self);
        // Separate task: reconnect aborts the heartbeat that spawned it
        tokio::spawn(async move {
            if let Err(e) = supervisor.reconnect().await {
                tracing::error!(error = %e, "Source channel supervisor stopped");
            }
        });
    }

    /// Stop the heartbeat, remove handlers and close the session
    pub async fn shutdown(&self) {
        self.stop_heartbeat();
        self.source.unsubscribe();
        if let Err(e) = self.source.disconnect().await {
            tracing::warn!(error = %e, "Disconnect during shutdown failed");
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Source channel closed");
    }

    fn install_handlers(&self) {
        self.source.unsubscribe();
        self.source.subscribe(Arc::clone(&self.handler));
    }

    fn start_heartbeat(self: &Arc<Self>) {
        self.stop_heartbeat();
        let supervisor = Arc::clone(self);
        let period = self.config.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                supervisor.heartbeat_tick().await;
            }
        });
        *self.heartbeat_slot() = Some(handle);
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_slot().take() {
            handle.abort();
        }
    }

    fn heartbeat_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Connection state changed");
        }
    }
}
