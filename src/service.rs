//! The outward surface consumed by the API layer.
//!
//! `MonitoringService` is an explicit service type holding injected
//! dependencies, no ambient globals. It owns the scheduler lifecycle and
//! exposes the three operations the outside world needs: register,
//! unregister, and history retrieval (which backfills before it reads, so
//! the answer is always a complete window).

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::backfill::BackfillEngine;
use crate::config::MonitorConfig;
use crate::db::SnapshotDb;
use crate::error::MonitorError;
use crate::pipeline::{self, MonitorContext};
use crate::provider::EnvironmentalDataProvider;
use crate::registry::{NewUserProfile, UserMonitoringRegistry};
use crate::scheduler::IntelligenceScheduler;
use crate::scoring::{RiskScorer, RuleBasedScorer};
use crate::types::DailyIntelligenceLog;

pub struct MonitoringService {
    ctx: MonitorContext,
    backfill: BackfillEngine,
    scheduler: Mutex<Option<IntelligenceScheduler>>,
}

impl MonitoringService {
    /// Wire the service from its parts. The scorer is built from the
    /// configured scoring parameters.
    pub fn new(
        config: Arc<MonitorConfig>,
        store: Arc<SnapshotDb>,
        provider: Arc<dyn EnvironmentalDataProvider>,
    ) -> Self {
        let scorer: Arc<dyn RiskScorer> =
            Arc::new(RuleBasedScorer::new(config.scoring.clone()));
        let registry = Arc::new(UserMonitoringRegistry::new());

        let ctx = MonitorContext {
            config: config.clone(),
            registry,
            store: store.clone(),
            provider,
            scorer: scorer.clone(),
        };
        let backfill = BackfillEngine::new(store, scorer, config);

        Self { ctx, backfill, scheduler: Mutex::new(None) }
    }

    /// Start the four monitoring loops. Idempotent.
    pub fn start(&self) {
        let mut guard = self.scheduler.lock();
        if guard.is_some() {
            return;
        }
        let mut scheduler = IntelligenceScheduler::new(self.ctx.clone());
        scheduler.start();
        *guard = Some(scheduler);
    }

    /// Signal all loops to stop and wait for them to exit.
    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
    }

    /// Validate and register a profile, then fire one immediate snapshot
    /// so the user has data before the next scheduled tick.
    pub fn register_user(&self, new: NewUserProfile) -> Result<Uuid, MonitorError> {
        let user_id = self.ctx.registry.register(new)?;

        if let Some(profile) = self.ctx.registry.get(user_id) {
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                match pipeline::record_snapshot(&ctx, &profile, false).await {
                    Ok(_) => log::info!("First snapshot ready for user {}", user_id),
                    Err(e) => {
                        log::warn!("First snapshot failed for user {}: {}", user_id, e)
                    }
                }
            });
        }

        Ok(user_id)
    }

    /// Remove a user from scheduling.
    pub fn unregister_user(&self, user_id: Uuid) -> Result<(), MonitorError> {
        self.ctx.registry.unregister(user_id)
    }

    /// Stamp live app activity.
    pub fn record_check_in(&self, user_id: Uuid) -> Result<(), MonitorError> {
        self.ctx.registry.record_check_in(user_id)
    }

    /// A complete `days`-day history for `user_id`, one log per calendar
    /// day ascending, today inclusive; exactly `days` entries whether or
    /// not the user was ever monitored. Missing days are backfilled from
    /// the estimator and marked retroactive.
    pub fn get_history(
        &self,
        user_id: Uuid,
        days: u32,
    ) -> Result<Vec<DailyIntelligenceLog>, MonitorError> {
        let profile = self.ctx.registry.get(user_id);
        self.backfill.ensure_coverage(user_id, profile.as_ref(), days)
    }

    #[cfg(test)]
    pub(crate) fn ctx(&self) -> &MonitorContext {
        &self.ctx
    }
}
