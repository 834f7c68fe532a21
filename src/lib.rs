//! AtmosGuard: continuous environmental-health risk intelligence.
//!
//! A headless monitoring service: four background loops (hourly
//! monitoring, a daily pipeline, an inactive-user sweep, and cleanup)
//! keep a rolling N-day history of personalized risk intelligence for
//! every registered user. History reads backfill any missing days on the
//! spot, so a caller always gets a complete window, even for a user who
//! registered a minute ago or never registered at all.
//!
//! The pieces, leaves first: a provider fetches pollutant/weather
//! readings (with a deterministic estimator standing in when it can't), a
//! pure rules scorer turns readings into assessments, a SQLite store
//! keeps snapshots and daily logs, and the scheduler drives it all under
//! one stop signal.

pub mod backfill;
pub mod config;
pub mod db;
pub mod error;
pub mod estimator;
pub mod migrations;
pub mod pipeline;
pub mod provider;
pub mod recommend;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod scoring;
pub mod service;
pub mod types;

pub use config::MonitorConfig;
pub use error::{MonitorError, ProviderError};
pub use provider::{EnvironmentalDataProvider, OpenDataProvider};
pub use registry::NewUserProfile;
pub use scoring::{RiskScorer, RuleBasedScorer, ScoringConfig};
pub use service::MonitoringService;
pub use types::{
    DailyIntelligenceLog, EnvironmentalSample, IntelligenceSnapshot, Location,
    RiskAssessment, RiskLevel, RiskSensitivity, UserMonitoringProfile,
};
