//! The continuous intelligence supervisor.
//!
//! Four independently scheduled, independently cancellable loops share the
//! registry and the store:
//!
//! | loop               | interval | work                                        |
//! |--------------------|----------|---------------------------------------------|
//! | HourlyMonitoring   | 60 min   | snapshot every active user                  |
//! | DailyPipeline      | 24 h     | full daily log per user, then prune         |
//! | InactiveSweep      | 6 h      | sleep-flagged snapshot for quiet users      |
//! | Cleanup            | 6 h      | retention prune + provider cache clear      |
//!
//! Each loop is Idle → Running → Sleeping(interval) → Running → … until
//! the stop signal. A failure for one user is logged and the loop moves to
//! the next user; a single user can never abort a batch. All four loops
//! watch one stop channel and exit within a tick of it flipping.

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pipeline::{self, MonitorContext};
use crate::retention::RetentionManager;

/// Outcome of one loop tick, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub failed: usize,
}

pub struct IntelligenceScheduler {
    ctx: MonitorContext,
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl IntelligenceScheduler {
    pub fn new(ctx: MonitorContext) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { ctx, stop_tx, handles: Vec::new() }
    }

    /// Spawn the four loops. Calling `start` twice is a no-op.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            log::warn!("Scheduler already started");
            return;
        }

        log::info!("Scheduler: starting four monitoring loops");
        let ctx = self.ctx.clone();
        let stop = self.stop_tx.subscribe();
        self.handles.push(tokio::spawn(run_hourly_loop(ctx, stop)));

        let ctx = self.ctx.clone();
        let stop = self.stop_tx.subscribe();
        self.handles.push(tokio::spawn(run_daily_loop(ctx, stop)));

        let ctx = self.ctx.clone();
        let stop = self.stop_tx.subscribe();
        self.handles.push(tokio::spawn(run_sweep_loop(ctx, stop)));

        let ctx = self.ctx.clone();
        let stop = self.stop_tx.subscribe();
        self.handles.push(tokio::spawn(run_cleanup_loop(ctx, stop)));
    }

    /// Flip the stop signal. Every loop observes it within one tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for all loops to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        log::info!("Scheduler: all loops stopped");
    }
}

/// Sleep for `duration` unless the stop signal arrives first.
/// Returns true if the loop should exit.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, duration: std::time::Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        // A send or a dropped sender both mean shutdown
        _ = stop.changed() => true,
    }
}

// ─────────────────────────────────────────────────────────────────────
// HourlyMonitoring
// ─────────────────────────────────────────────────────────────────────

async fn run_hourly_loop(ctx: MonitorContext, mut stop: watch::Receiver<bool>) {
    log::info!("HourlyMonitoring: started");
    if wait_or_stop(&mut stop, startup_delay(&ctx)).await {
        log::info!("HourlyMonitoring: stopped before first tick");
        return;
    }

    loop {
        let summary = hourly_tick(&ctx).await;
        log::info!(
            "HourlyMonitoring: tick complete ({} users, {} failed)",
            summary.processed,
            summary.failed
        );

        let interval = std::time::Duration::from_secs(ctx.config.intervals.hourly_secs);
        if wait_or_stop(&mut stop, interval).await {
            break;
        }
    }
    log::info!("HourlyMonitoring: stopped");
}

/// One pass over every active profile: fetch → score → persist.
pub(crate) async fn hourly_tick(ctx: &MonitorContext) -> TickSummary {
    let mut summary = TickSummary::default();

    for profile in ctx.registry.active_profiles() {
        match pipeline::record_snapshot(ctx, &profile, false).await {
            Ok(snapshot) => {
                summary.processed += 1;
                log::debug!(
                    "HourlyMonitoring: user {} scored {:.1}",
                    profile.user_id,
                    snapshot.assessment.risk_score
                );
            }
            Err(e) => {
                summary.failed += 1;
                log::warn!(
                    "HourlyMonitoring: skipping user {}: {}",
                    profile.user_id,
                    e
                );
            }
        }
        tokio::time::sleep(ctx.config.per_user_delay()).await;
    }

    summary
}

// ─────────────────────────────────────────────────────────────────────
// DailyPipeline
// ─────────────────────────────────────────────────────────────────────

async fn run_daily_loop(ctx: MonitorContext, mut stop: watch::Receiver<bool>) {
    log::info!("DailyPipeline: started");
    if wait_or_stop(&mut stop, startup_delay(&ctx)).await {
        log::info!("DailyPipeline: stopped before first tick");
        return;
    }

    loop {
        let summary = daily_tick(&ctx).await;
        log::info!(
            "DailyPipeline: tick complete ({} users, {} failed)",
            summary.processed,
            summary.failed
        );

        let interval = std::time::Duration::from_secs(ctx.config.intervals.daily_secs);
        if wait_or_stop(&mut stop, interval).await {
            break;
        }
    }
    log::info!("DailyPipeline: stopped");
}

/// Produce today's full daily log for every active profile, then prune.
pub(crate) async fn daily_tick(ctx: &MonitorContext) -> TickSummary {
    let mut summary = TickSummary::default();
    let today = Utc::now().date_naive();

    for profile in ctx.registry.active_profiles() {
        let base = pipeline::base_sample(ctx, &profile).await;
        let daily_log = pipeline::compose_daily_log(
            ctx.scorer.as_ref(),
            &profile,
            today,
            &base,
            false,
        );
        match ctx.store.store_daily_log(&daily_log) {
            Ok(()) => {
                summary.processed += 1;
                log::debug!(
                    "DailyPipeline: user {} peak risk {:.1}",
                    profile.user_id,
                    daily_log.peak_score()
                );
            }
            Err(e) => {
                summary.failed += 1;
                log::warn!("DailyPipeline: skipping user {}: {}", profile.user_id, e);
            }
        }
        tokio::time::sleep(ctx.config.per_user_delay()).await;
    }

    // Inline retention pass so a day's worth of writes is trimmed right away
    let retention = RetentionManager::new(ctx.store.clone(), ctx.config.retention_days);
    if let Err(e) = retention.prune(Utc::now()) {
        log::warn!("DailyPipeline: retention prune failed: {}", e);
    }

    summary
}

// ─────────────────────────────────────────────────────────────────────
// InactiveSweep
// ─────────────────────────────────────────────────────────────────────

async fn run_sweep_loop(ctx: MonitorContext, mut stop: watch::Receiver<bool>) {
    log::info!("InactiveSweep: started");
    if wait_or_stop(&mut stop, startup_delay(&ctx)).await {
        log::info!("InactiveSweep: stopped before first tick");
        return;
    }

    loop {
        let summary = sweep_tick(&ctx).await;
        if summary.processed > 0 || summary.failed > 0 {
            log::info!(
                "InactiveSweep: tick complete ({} users, {} failed)",
                summary.processed,
                summary.failed
            );
        }

        let interval = std::time::Duration::from_secs(ctx.config.intervals.sweep_secs);
        if wait_or_stop(&mut stop, interval).await {
            break;
        }
    }
    log::info!("InactiveSweep: stopped");
}

/// Snapshot users who haven't checked in recently (or ever). The snapshot
/// is sleep-flagged: coverage must not stall just because the app is shut.
pub(crate) async fn sweep_tick(ctx: &MonitorContext) -> TickSummary {
    let mut summary = TickSummary::default();
    let threshold = ChronoDuration::seconds(ctx.config.inactive_after_secs as i64);

    for profile in ctx.registry.inactive_profiles(Utc::now(), threshold) {
        match pipeline::record_snapshot(ctx, &profile, true).await {
            Ok(_) => summary.processed += 1,
            Err(e) => {
                summary.failed += 1;
                log::warn!("InactiveSweep: skipping user {}: {}", profile.user_id, e);
            }
        }
        tokio::time::sleep(ctx.config.per_user_delay()).await;
    }

    summary
}

// ─────────────────────────────────────────────────────────────────────
// Cleanup
// ─────────────────────────────────────────────────────────────────────

async fn run_cleanup_loop(ctx: MonitorContext, mut stop: watch::Receiver<bool>) {
    log::info!("Cleanup: started");
    if wait_or_stop(&mut stop, startup_delay(&ctx)).await {
        log::info!("Cleanup: stopped before first tick");
        return;
    }

    loop {
        cleanup_tick(&ctx);

        let interval = std::time::Duration::from_secs(ctx.config.intervals.cleanup_secs);
        if wait_or_stop(&mut stop, interval).await {
            break;
        }
    }
    log::info!("Cleanup: stopped");
}

/// Prune outside the retention window and drop transient caches.
pub(crate) fn cleanup_tick(ctx: &MonitorContext) {
    let retention = RetentionManager::new(ctx.store.clone(), ctx.config.retention_days);
    if let Err(e) = retention.prune(Utc::now()) {
        log::warn!("Cleanup: retention prune failed: {}", e);
    }
    ctx.provider.clear_transient_cache();
}

fn startup_delay(ctx: &MonitorContext) -> std::time::Duration {
    std::time::Duration::from_secs(ctx.config.intervals.startup_delay_secs)
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::config::MonitorConfig;
    use crate::db::test_utils::test_db;
    use crate::error::ProviderError;
    use crate::provider::EnvironmentalDataProvider;
    use crate::registry::{NewUserProfile, UserMonitoringRegistry};
    use crate::scoring::tests_support::neutral_sample;
    use crate::scoring::RuleBasedScorer;
    use crate::types::{EnvironmentalSample, Location, RiskSensitivity};

    /// Fails for one poisoned latitude, succeeds everywhere else.
    struct SelectiveProvider {
        fail_lat: f64,
    }

    #[async_trait]
    impl EnvironmentalDataProvider for SelectiveProvider {
        async fn fetch(
            &self,
            location: &Location,
            _timeout: Duration,
        ) -> Result<EnvironmentalSample, ProviderError> {
            if (location.lat - self.fail_lat).abs() < 1e-9 {
                Err(ProviderError::Http("boom".into()))
            } else {
                Ok(neutral_sample(*location, Utc::now()))
            }
        }
    }

    fn fast_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.per_user_delay_ms = 0;
        config.intervals.startup_delay_secs = 0;
        config.intervals.hourly_secs = 3600;
        config.intervals.daily_secs = 3600;
        config.intervals.sweep_secs = 3600;
        config.intervals.cleanup_secs = 3600;
        config
    }

    fn ctx_with(provider: Arc<dyn EnvironmentalDataProvider>) -> MonitorContext {
        MonitorContext {
            config: Arc::new(fast_config()),
            registry: Arc::new(UserMonitoringRegistry::new()),
            store: Arc::new(test_db()),
            provider,
            scorer: Arc::new(RuleBasedScorer::default()),
        }
    }

    fn register_at(ctx: &MonitorContext, lat: f64) -> uuid::Uuid {
        ctx.registry
            .register(NewUserProfile {
                location: Location { lat, lon: -74.0 },
                timezone: "UTC".to_string(),
                wake_time: "07:00".to_string(),
                sleep_time: "22:00".to_string(),
                risk_sensitivity: RiskSensitivity::Normal,
            })
            .expect("register")
    }

    #[tokio::test]
    async fn test_hourly_tick_snapshots_every_active_user() {
        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: f64::MAX }));
        let users = [register_at(&ctx, 40.0), register_at(&ctx, 41.0), register_at(&ctx, 42.0)];

        let summary = hourly_tick(&ctx).await;
        assert_eq!(summary, TickSummary { processed: 3, failed: 0 });

        for user in users {
            let snaps = ctx
                .store
                .snapshots_since(user, Utc::now() - chrono::Duration::hours(1))
                .expect("query");
            assert_eq!(snaps.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_one_failing_user_never_aborts_the_batch() {
        // User #2's fetch always errors; the pipeline falls back to the
        // estimator, so the batch still produces a snapshot for everyone.
        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: 41.0 }));
        let u1 = register_at(&ctx, 40.0);
        let u2 = register_at(&ctx, 41.0);
        let u3 = register_at(&ctx, 42.0);

        let summary = hourly_tick(&ctx).await;
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 0);

        for user in [u1, u2, u3] {
            let snaps = ctx
                .store
                .snapshots_since(user, Utc::now() - chrono::Duration::hours(1))
                .expect("query");
            assert_eq!(snaps.len(), 1, "user {} must have a snapshot", user);
        }
    }

    #[tokio::test]
    async fn test_daily_tick_writes_one_log_per_user() {
        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: f64::MAX }));
        let user = register_at(&ctx, 40.0);

        let summary = daily_tick(&ctx).await;
        assert_eq!(summary.processed, 1);

        let today = Utc::now().date_naive();
        let logs = ctx.store.daily_logs_since(user, today).expect("query");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].date, today);
        assert!(!logs[0].calculated_retroactively);
        assert_eq!(logs[0].risk_predictions.len(), 4);

        // Re-running the pipeline replaces, never duplicates.
        daily_tick(&ctx).await;
        let logs = ctx.store.daily_logs_since(user, today).expect("query");
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_targets_only_quiet_users() {
        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: f64::MAX }));
        let quiet = register_at(&ctx, 40.0);
        let active = register_at(&ctx, 41.0);
        ctx.registry.record_check_in(active).expect("check in");

        let summary = sweep_tick(&ctx).await;
        assert_eq!(summary.processed, 1);

        let snaps = ctx
            .store
            .snapshots_since(quiet, Utc::now() - chrono::Duration::hours(1))
            .expect("query");
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].is_during_sleep, "sweep snapshots are sleep-flagged");

        let snaps = ctx
            .store
            .snapshots_since(active, Utc::now() - chrono::Duration::hours(1))
            .expect("query");
        assert!(snaps.is_empty());
    }

    #[tokio::test]
    async fn test_stop_signal_reaches_all_loops() {
        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: f64::MAX }));
        register_at(&ctx, 40.0);

        let mut scheduler = IntelligenceScheduler::new(ctx);
        scheduler.start();

        // Let the loops run their first tick, then stop. Shutdown must
        // complete promptly; no loop may sleep through the signal.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let shutdown = scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("all loops must observe the stop signal within one tick");
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: f64::MAX }));
        let mut scheduler = IntelligenceScheduler::new(ctx);
        scheduler.start();
        let spawned = scheduler.handles.len();
        scheduler.start();
        assert_eq!(scheduler.handles.len(), spawned);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleanup_tick_prunes_and_clears_cache() {
        use crate::pipeline::tests_support::sample_log;

        let ctx = ctx_with(Arc::new(SelectiveProvider { fail_lat: f64::MAX }));
        let old_date = Utc::now().date_naive() - chrono::Duration::days(10);
        let old_log = sample_log(old_date, true);
        ctx.store.store_daily_log(&old_log).expect("store");

        cleanup_tick(&ctx);

        let logs = ctx
            .store
            .daily_logs_since(old_log.user_id, old_date)
            .expect("query");
        assert!(logs.is_empty(), "stale log must be pruned");
    }
}
