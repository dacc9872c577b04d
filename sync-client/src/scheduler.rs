//! Adaptive catch-up scheduler.
//!
//! Runs the application's catch-up sync in a loop. The pause between passes
//! follows [`SchedulerConfig::next_interval`]: short while the user is
//! active, doubling per idle period, and never shorter than the current
//! error backoff.
//!
//! Only [`AdaptiveScheduler::mark_activity`] resets idleness. A successful
//! pass resets the error backoff but not the activity clock, so the
//! scheduler's own polling never keeps it in the fast regime.

use outbox_sync_core::{ErrorBackoff, SchedulerConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collaborators::CatchUpSync;

/// Idle- and error-aware polling loop.
#[derive(Debug)]
pub struct AdaptiveScheduler {
    config: SchedulerConfig,
    last_activity: Mutex<Instant>,
    backoff: Mutex<ErrorBackoff>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AdaptiveScheduler {
    /// Create a scheduler; the activity clock starts now.
    pub fn new(config: SchedulerConfig) -> Self {
        let backoff = ErrorBackoff::new(&config);
        Self {
            config,
            last_activity: Mutex::new(Instant::now()),
            backoff: Mutex::new(backoff),
        }
    }

    /// Record user or content activity.
    pub fn mark_activity(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Current error backoff.
    pub fn error_delay(&self) -> Duration {
        lock(&self.backoff).current()
    }

    /// Pause the loop would take right now.
    pub fn current_interval(&self) -> Duration {
        self.config.next_interval(self.idle_for(), self.error_delay())
    }

    /// Run one catch-up pass and return the pause before the next.
    pub async fn run_cycle(&self, catch_up: &dyn CatchUpSync) -> Duration {
        match catch_up.sync_with_server().await {
            Ok(()) => lock(&self.backoff).on_success(),
            Err(e) => {
                let delay = lock(&self.backoff).on_failure();
                tracing::warn!("Catch-up sync failed (error delay {:?}): {:#}", delay, e);
            }
        }
        self.current_interval()
    }

    /// Spawn the loop. It runs until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        catch_up: Arc<dyn CatchUpSync>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Adaptive scheduler started");

            loop {
                let interval = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    interval = self.run_cycle(catch_up.as_ref()) => interval,
                };
                tracing::debug!("Next catch-up sync in {:?}", interval);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            tracing::info!("Adaptive scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSync {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl CatchUpSync for CountingSync {
        async fn sync_with_server(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("server unreachable");
            }
            Ok(())
        }
    }

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    // ===========================================
    // Intervals
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn fresh_scheduler_uses_base_interval() {
        let scheduler = AdaptiveScheduler::new(SchedulerConfig::default());
        assert_eq!(scheduler.current_interval(), secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn idleness_stretches_interval() {
        let scheduler = AdaptiveScheduler::new(SchedulerConfig::default());

        tokio::time::advance(secs(35)).await;
        assert_eq!(scheduler.current_interval(), secs(10));

        tokio::time::advance(secs(90)).await;
        assert_eq!(scheduler.current_interval(), secs(60));

        scheduler.mark_activity();
        assert_eq!(scheduler.current_interval(), secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_passes_do_not_reset_idleness() {
        let scheduler = AdaptiveScheduler::new(SchedulerConfig::default());
        let sync = CountingSync::default();

        tokio::time::advance(secs(65)).await;
        let interval = scheduler.run_cycle(&sync).await;

        assert_eq!(interval, secs(20));
        assert_eq!(scheduler.idle_for(), secs(65));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_and_success_resets() {
        let scheduler = AdaptiveScheduler::new(SchedulerConfig::default());
        let sync = CountingSync::default();
        sync.failing.store(true, Ordering::SeqCst);

        for _ in 0..4 {
            scheduler.run_cycle(&sync).await;
        }
        assert_eq!(scheduler.error_delay(), secs(16));
        assert_eq!(scheduler.current_interval(), secs(16));

        scheduler.run_cycle(&sync).await;
        assert_eq!(scheduler.current_interval(), secs(30));

        sync.failing.store(false, Ordering::SeqCst);
        let interval = scheduler.run_cycle(&sync).await;
        assert_eq!(scheduler.error_delay(), secs(1));
        assert_eq!(interval, secs(5));
    }

    // ===========================================
    // Loop
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn loop_runs_until_cancelled() {
        let scheduler = Arc::new(AdaptiveScheduler::new(SchedulerConfig::default()));
        let sync = Arc::new(CountingSync::default());
        let cancel = CancellationToken::new();

        let handle = Arc::clone(&scheduler).spawn(sync.clone(), cancel.clone());

        // Passes at t=0, 5, 10 while the user counts as active.
        tokio::time::sleep(Duration::from_millis(12_000)).await;
        assert_eq!(sync.calls.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(secs(60)).await;
        assert_eq!(sync.calls.load(Ordering::SeqCst), 3);
    }
}
