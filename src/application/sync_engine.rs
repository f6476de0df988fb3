use crate::domain::models::{Timer, UserSession};
use crate::domain::pending_queue::PendingQueue;
use crate::domain::time_window::{TimeWindow, TimeWindowManager};
use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::push_client::RemotePushClient;
use crate::infrastructure::timer_repository::TimerRepository;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_backoff_ms: 5 * 60 * 1000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    fn attempt_delay_ms(&self, attempt: u8) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(u32::from(attempt)))
            .min(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}

impl SyncState {
    fn can_transition_to(self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Syncing)
                | (Self::Syncing, Self::Idle)
                | (Self::Syncing, Self::Error)
                | (Self::Error, Self::Idle)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    Tick,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub window: TimeWindow,
    pub pushed: usize,
    pub marked: usize,
    pub still_running: usize,
    pub deferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            consecutive_failures: 0,
            last_error: None,
            last_success_at: None,
            next_attempt_at: None,
        }
    }
}

/// Pushes offline records to the server and marks them synced.
///
/// One cycle: take the sync window from the shared [`TimeWindowManager`]
/// (reaching back to the week of the oldest closed unsynced record), load
/// unsynced records in that window, stage the closed ones in recording
/// order, push them as one batch and, only when the whole batch was
/// accepted, mark exactly those records synced. At most one cycle runs at a
/// time.
pub struct SyncEngine<R, C>
where
    R: TimerRepository,
    C: RemotePushClient,
{
    repository: Arc<R>,
    push_client: Arc<C>,
    time_windows: Arc<RwLock<TimeWindowManager>>,
    session: UserSession,
    lookback_weeks: u32,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    cycle_lock: tokio::sync::Mutex<()>,
    status: Mutex<SyncStatus>,
}

impl<R, C> SyncEngine<R, C>
where
    R: TimerRepository,
    C: RemotePushClient,
{
    pub fn new(
        repository: Arc<R>,
        push_client: Arc<C>,
        time_windows: Arc<RwLock<TimeWindowManager>>,
        session: UserSession,
    ) -> Self {
        Self {
            repository,
            push_client,
            time_windows,
            session,
            lookback_weeks: 4,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            cycle_lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_lookback_weeks(mut self, lookback_weeks: u32) -> Self {
        self.lookback_weeks = lookback_weeks;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn status(&self) -> Result<SyncStatus, InfraError> {
        Ok(self.lock_status()?.clone())
    }

    pub fn pending_count(&self) -> Result<usize, InfraError> {
        self.repository.count_no_synced(&self.session)
    }

    pub async fn sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome, InfraError> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| InfraError::SyncInProgress)?;
        let now = (self.now_provider)();
        let window = self.current_window(now)?;

        if trigger == SyncTrigger::Tick && self.backing_off(now)? {
            debug!(?trigger, "sync deferred by back-off");
            return Ok(SyncOutcome {
                window,
                pushed: 0,
                marked: 0,
                still_running: 0,
                deferred: true,
            });
        }

        {
            let mut status = self.lock_status()?;
            if status.state == SyncState::Error {
                Self::transition(&mut status, SyncState::Idle);
            }
            Self::transition(&mut status, SyncState::Syncing);
        }
        info!(?trigger, window_start = %window.start, window_end = %window.end, "sync cycle started");

        match self.run_cycle(window).await {
            Ok(outcome) => {
                let mut status = self.lock_status()?;
                Self::transition(&mut status, SyncState::Idle);
                status.consecutive_failures = 0;
                status.last_error = None;
                status.next_attempt_at = None;
                status.last_success_at = Some((self.now_provider)());
                info!(
                    pushed = outcome.pushed,
                    marked = outcome.marked,
                    still_running = outcome.still_running,
                    "sync cycle finished"
                );
                Ok(outcome)
            }
            Err(cycle_error) => {
                let mut status = self.lock_status()?;
                Self::transition(&mut status, SyncState::Error);
                status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                status.last_error = Some(cycle_error.to_string());
                let backoff = self.backoff_ms(status.consecutive_failures);
                let delay = Duration::try_milliseconds(i64::try_from(backoff).unwrap_or(i64::MAX))
                    .unwrap_or_else(|| Duration::days(1));
                status.next_attempt_at = now.checked_add_signed(delay);
                error!(
                    error = %cycle_error,
                    consecutive_failures = status.consecutive_failures,
                    backoff_ms = backoff,
                    "sync cycle failed; batch left unsynced"
                );
                Err(cycle_error)
            }
        }
    }

    /// Runs cycles on every tick while online and immediately when
    /// connectivity comes back, until `shutdown` resolves.
    pub async fn run<F>(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        every: TokioDuration,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(every);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("sync engine stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if *connectivity.borrow() {
                        self.sync_logged(SyncTrigger::Tick).await;
                    }
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        warn!("connectivity monitor dropped; sync engine stopping");
                        break;
                    }
                    if *connectivity.borrow_and_update() {
                        self.sync_logged(SyncTrigger::ConnectivityRestored).await;
                    }
                }
            }
        }
    }

    async fn sync_logged(&self, trigger: SyncTrigger) {
        match self.sync(trigger).await {
            Ok(_) => {}
            Err(InfraError::SyncInProgress) => debug!(?trigger, "sync already running"),
            Err(error) => warn!(?trigger, %error, "sync attempt failed; retrying on a later tick"),
        }
    }

    async fn run_cycle(&self, window: TimeWindow) -> Result<SyncOutcome, InfraError> {
        let window = self.widen_to_oldest_pending(window)?;
        let candidates = self
            .repository
            .backed_up_no_synced(window.start, window.end, &self.session)?;

        let mut queue = PendingQueue::new();
        let mut still_running = 0;
        for timer in candidates {
            if timer.synced {
                continue;
            }
            if timer.is_running() {
                still_running += 1;
                continue;
            }
            queue.append(timer);
        }

        let mut batch: Vec<Timer> = Vec::with_capacity(queue.len());
        while let Some(timer) = queue.shift() {
            batch.push(timer);
        }
        if batch.is_empty() {
            return Ok(SyncOutcome {
                window,
                pushed: 0,
                marked: 0,
                still_running,
                deferred: false,
            });
        }

        self.push_with_retry(&batch).await?;

        let ids: Vec<i64> = batch.iter().filter_map(|timer| timer.id).collect();
        let marked = self.repository.synced_records(&window, &ids)?;
        if marked != ids.len() {
            warn!(expected = ids.len(), marked, "some pushed records were already synced or changed");
        }

        Ok(SyncOutcome {
            window,
            pushed: batch.len(),
            marked,
            still_running,
            deferred: false,
        })
    }

    async fn push_with_retry(&self, batch: &[Timer]) -> Result<(), InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.push_client.push_batch(&self.session, batch).await {
                Ok(receipt) => {
                    debug!(accepted = receipt.accepted, "batch accepted");
                    return Ok(());
                }
                Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.retry_policy.attempt_delay_ms(attempt);
                    warn!(%error, attempt, delay_ms = delay, "push failed; retrying");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn current_window(&self, now: DateTime<Utc>) -> Result<TimeWindow, InfraError> {
        let manager = self
            .time_windows
            .read()
            .map_err(|error| InfraError::InvalidConfig(format!("time window lock poisoned: {error}")))?;
        Ok(manager.sync_window(now, self.lookback_weeks))
    }

    /// Closed records older than the lookback would never be pushed; start
    /// the window at the week holding the oldest one instead.
    fn widen_to_oldest_pending(&self, window: TimeWindow) -> Result<TimeWindow, InfraError> {
        let oldest = self
            .repository
            .find_to_synced(&self.session)?
            .into_iter()
            .map(|timer| timer.started_at)
            .min();
        let Some(oldest) = oldest.filter(|oldest| *oldest < window.start) else {
            return Ok(window);
        };
        let start = self
            .time_windows
            .read()
            .map_err(|error| InfraError::InvalidConfig(format!("time window lock poisoned: {error}")))?
            .start_of_week(oldest);
        warn!(
            lookback_start = %window.start,
            widened_start = %start,
            "unsynced records older than the lookback; widening sync window"
        );
        Ok(TimeWindow { start, ..window })
    }

    fn backing_off(&self, now: DateTime<Utc>) -> Result<bool, InfraError> {
        let status = self.lock_status()?;
        Ok(status.next_attempt_at.is_some_and(|next| now < next))
    }

    fn backoff_ms(&self, failures: u32) -> u64 {
        let exponent = failures.saturating_sub(1).min(u32::from(u8::MAX));
        self.retry_policy.attempt_delay_ms(u8::try_from(exponent).unwrap_or(u8::MAX))
    }

    fn transition(status: &mut SyncStatus, next: SyncState) {
        if !status.state.can_transition_to(next) {
            warn!(from = ?status.state, to = ?next, "unexpected sync state transition");
        }
        status.state = next;
    }

    fn lock_status(&self) -> Result<std::sync::MutexGuard<'_, SyncStatus>, InfraError> {
        self.status
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("sync status lock poisoned: {error}")))
    }
}
