//! Snapshot and daily-log composition.
//!
//! One generation path shared by everything that produces intelligence:
//! the hourly loop, the daily pipeline, the inactive-user sweep, the
//! first-snapshot-on-registration task, and the backfill engine. The only
//! thing that differs between callers is where the base sample comes from
//! (live fetch vs. estimator) and the retroactive flag.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::config::MonitorConfig;
use crate::db::SnapshotDb;
use crate::error::MonitorError;
use crate::estimator;
use crate::provider::EnvironmentalDataProvider;
use crate::recommend::recommendations_for;
use crate::registry::UserMonitoringRegistry;
use crate::scoring::RiskScorer;
use crate::types::{
    local_hour_utc, DailyIntelligenceLog, EnvironmentalSample, IntelligenceSnapshot,
    RiskPrediction, RiskLevel, UserMonitoringProfile,
};

/// Local hours of the three named snapshots in a daily log.
const MORNING_HOUR: u8 = 8;
const MIDDAY_HOUR: u8 = 13;
const EVENING_HOUR: u8 = 19;

/// Hours of the daily prediction suite (24 = end of day).
const PREDICTION_HOURS: [u8; 4] = [6, 12, 18, 24];

/// Everything the loops share, cheap to clone.
#[derive(Clone)]
pub struct MonitorContext {
    pub config: Arc<MonitorConfig>,
    pub registry: Arc<UserMonitoringRegistry>,
    pub store: Arc<SnapshotDb>,
    pub provider: Arc<dyn EnvironmentalDataProvider>,
    pub scorer: Arc<dyn RiskScorer>,
}

/// Fetch a live sample, falling back to the estimator on any provider
/// failure. Never fails: a sweep must not stall because the upstream is
/// down.
pub async fn base_sample(
    ctx: &MonitorContext,
    profile: &UserMonitoringProfile,
) -> EnvironmentalSample {
    let now = Utc::now();
    match ctx.provider.fetch(&profile.location, ctx.config.fetch_timeout()).await {
        Ok(sample) => sample,
        Err(e) => {
            if e.is_retryable() {
                log::warn!(
                    "Provider fetch failed for user {} ({}); using estimated sample",
                    profile.user_id,
                    e
                );
            } else {
                log::debug!(
                    "Provider unavailable for user {} ({}); using estimated sample",
                    profile.user_id,
                    e
                );
            }
            estimator::estimate_sample(&profile.location, now)
        }
    }
}

/// Build one snapshot for `profile` at the current instant.
pub async fn build_snapshot(
    ctx: &MonitorContext,
    profile: &UserMonitoringProfile,
    force_sleep: bool,
) -> IntelligenceSnapshot {
    let now = Utc::now();
    let sample = base_sample(ctx, profile).await;
    let assessment = ctx.scorer.score(&sample, profile);
    let recommendations =
        recommendations_for(&assessment, &sample, profile.risk_sensitivity);

    IntelligenceSnapshot {
        user_id: profile.user_id,
        timestamp: now,
        location: profile.location,
        sample,
        assessment,
        recommendations,
        is_during_sleep: force_sleep || profile.is_asleep_at(now),
        calculated_retroactively: false,
    }
}

/// Build and persist one snapshot. This is the per-user unit of work the
/// hourly and sweep loops run.
pub async fn record_snapshot(
    ctx: &MonitorContext,
    profile: &UserMonitoringProfile,
    force_sleep: bool,
) -> Result<IntelligenceSnapshot, MonitorError> {
    let snapshot = build_snapshot(ctx, profile, force_sleep).await;
    ctx.store.store_snapshot(&snapshot)?;
    Ok(snapshot)
}

/// Compose a full daily log from one base sample. Pure given its inputs:
/// the morning/midday/evening snapshots and the hourly prediction suite
/// are diurnal projections of `base`, so backfill (which feeds a
/// deterministic base) produces identical logs on every call.
pub fn compose_daily_log(
    scorer: &dyn RiskScorer,
    profile: &UserMonitoringProfile,
    date: NaiveDate,
    base: &EnvironmentalSample,
    retroactive: bool,
) -> DailyIntelligenceLog {
    let named = |hour: u8| -> IntelligenceSnapshot {
        let mut sample = estimator::project_sample_at_hour(base, hour);
        let timestamp = local_hour_utc(profile.tz(), date, hour);
        sample.timestamp = timestamp;
        sample.location = profile.location;
        let assessment = scorer.score(&sample, profile);
        let recommendations =
            recommendations_for(&assessment, &sample, profile.risk_sensitivity);
        IntelligenceSnapshot {
            user_id: profile.user_id,
            timestamp,
            location: profile.location,
            sample,
            assessment,
            recommendations,
            is_during_sleep: profile.is_asleep_at(timestamp),
            calculated_retroactively: retroactive,
        }
    };

    let morning = named(MORNING_HOUR);
    let midday = named(MIDDAY_HOUR);
    let evening = named(EVENING_HOUR);

    let risk_predictions = PREDICTION_HOURS
        .iter()
        .map(|&hour| {
            let sample = estimator::project_sample_at_hour(base, hour);
            let score = scorer.score(&sample, profile).risk_score;
            RiskPrediction {
                hour,
                risk_score: score,
                risk_level: RiskLevel::from_score(score),
            }
        })
        .collect();

    // Day-level advice: the union of the named snapshots' advice, first
    // occurrence wins.
    let mut recommendations: Vec<String> = Vec::new();
    for rec in [&morning, &midday, &evening]
        .iter()
        .flat_map(|s| s.recommendations.iter())
    {
        if !recommendations.contains(rec) {
            recommendations.push(rec.clone());
        }
    }

    DailyIntelligenceLog {
        user_id: profile.user_id,
        date,
        morning,
        midday,
        evening,
        risk_predictions,
        recommendations,
        calculated_retroactively: retroactive,
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::tests_support::sample_profile;
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::error::ProviderError;
    use crate::provider::EnvironmentalDataProvider;
    use crate::registry::UserMonitoringRegistry;
    use crate::scoring::tests_support::neutral_sample;
    use crate::scoring::RuleBasedScorer;
    use crate::types::Location;

    struct StaticProvider {
        pm25: f64,
    }

    #[async_trait]
    impl EnvironmentalDataProvider for StaticProvider {
        async fn fetch(
            &self,
            location: &Location,
            _timeout: Duration,
        ) -> Result<EnvironmentalSample, ProviderError> {
            let mut s = neutral_sample(*location, Utc::now());
            s.pm25 = self.pm25;
            Ok(s)
        }
    }

    struct DownProvider;

    #[async_trait]
    impl EnvironmentalDataProvider for DownProvider {
        async fn fetch(
            &self,
            _location: &Location,
            timeout: Duration,
        ) -> Result<EnvironmentalSample, ProviderError> {
            Err(ProviderError::Timeout(timeout.as_secs()))
        }
    }

    fn test_ctx(provider: Arc<dyn EnvironmentalDataProvider>) -> MonitorContext {
        MonitorContext {
            config: Arc::new(MonitorConfig::default()),
            registry: Arc::new(UserMonitoringRegistry::new()),
            store: Arc::new(test_db()),
            provider,
            scorer: Arc::new(RuleBasedScorer::default()),
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[tokio::test]
    async fn test_record_snapshot_persists() {
        let ctx = test_ctx(Arc::new(StaticProvider { pm25: 30.0 }));
        let profile = sample_profile();

        let snapshot = record_snapshot(&ctx, &profile, false).await.expect("record");
        assert!(!snapshot.calculated_retroactively);
        assert!(snapshot.assessment.risk_score > 0.0);

        let stored = ctx
            .store
            .snapshots_since(profile.user_id, Utc::now() - chrono::Duration::hours(1))
            .expect("query");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_estimate() {
        let ctx = test_ctx(Arc::new(DownProvider));
        let profile = sample_profile();

        // Never an error: the estimator covers for the dead provider.
        let snapshot = record_snapshot(&ctx, &profile, false).await.expect("record");
        assert!(snapshot.sample.pm25 > 0.0, "estimated sample is non-trivial");
    }

    #[tokio::test]
    async fn test_force_sleep_flag() {
        let ctx = test_ctx(Arc::new(StaticProvider { pm25: 5.0 }));
        let profile = sample_profile();
        let snapshot = record_snapshot(&ctx, &profile, true).await.expect("record");
        assert!(snapshot.is_during_sleep);
    }

    #[test]
    fn test_compose_daily_log_shape() {
        let profile = sample_profile();
        let date = day("2026-08-04");
        let base = estimator::estimate_base(&profile.location, date);
        let scorer = RuleBasedScorer::default();

        let log = compose_daily_log(&scorer, &profile, date, &base, true);
        assert_eq!(log.date, date);
        assert!(log.calculated_retroactively);
        assert!(log.morning.calculated_retroactively);
        assert!(log.evening.calculated_retroactively);

        let hours: Vec<u8> = log.risk_predictions.iter().map(|p| p.hour).collect();
        assert_eq!(hours, vec![6, 12, 18, 24]);
        for p in &log.risk_predictions {
            assert!((0.0..=100.0).contains(&p.risk_score));
            assert_eq!(p.risk_level, RiskLevel::from_score(p.risk_score));
        }
        assert!(!log.recommendations.is_empty());
    }

    #[test]
    fn test_compose_is_deterministic() {
        let profile = sample_profile();
        let date = day("2026-08-04");
        let base = estimator::estimate_base(&profile.location, date);
        let scorer = RuleBasedScorer::default();

        let a = compose_daily_log(&scorer, &profile, date, &base, true);
        let b = compose_daily_log(&scorer, &profile, date, &base, true);
        assert_eq!(
            serde_json::to_string(&a).expect("json"),
            serde_json::to_string(&b).expect("json")
        );
    }

    #[test]
    fn test_named_snapshots_sit_at_local_hours() {
        let profile = sample_profile();
        let date = day("2026-06-15");
        let base = estimator::estimate_base(&profile.location, date);
        let log =
            compose_daily_log(&RuleBasedScorer::default(), &profile, date, &base, false);

        let tz = profile.tz();
        use chrono::Timelike;
        assert_eq!(log.morning.timestamp.with_timezone(&tz).hour(), 8);
        assert_eq!(log.midday.timestamp.with_timezone(&tz).hour(), 13);
        assert_eq!(log.evening.timestamp.with_timezone(&tz).hour(), 19);
    }

    #[test]
    fn test_sleep_window_marks_snapshots() {
        let mut profile = sample_profile();
        profile.wake_time = "09:00".to_string(); // morning snapshot lands before wake
        let date = day("2026-06-15");
        let base = estimator::estimate_base(&profile.location, date);
        let log =
            compose_daily_log(&RuleBasedScorer::default(), &profile, date, &base, false);

        assert!(log.morning.is_during_sleep);
        assert!(!log.midday.is_during_sleep);
    }
}
