//! Core domain records for risk monitoring.
//!
//! Everything the loops exchange is a typed struct here: monitoring
//! profiles, point-in-time environmental samples, computed assessments,
//! and the snapshot/daily-log records the store persists. Records are
//! immutable once created; assessments are always recomputed from scratch,
//! never incrementally mutated.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wake/sleep defaults used when a profile carries an unparseable time.
const DEFAULT_WAKE: &str = "07:00";
const DEFAULT_SLEEP: &str = "22:00";

/// A geographic point, WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// How aggressively a user wants risk surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSensitivity {
    Low,
    #[default]
    Normal,
    High,
}

impl RiskSensitivity {
    /// Multiplier applied to the summed risk total before clamping.
    pub fn multiplier(self) -> f64 {
        match self {
            RiskSensitivity::Low => 0.85,
            RiskSensitivity::Normal => 1.0,
            RiskSensitivity::High => 1.15,
        }
    }
}

/// Closed risk classification. Bucket upper bounds are exclusive:
/// a score of exactly 25.0 is `Moderate`, 50.0 is `High`, 75.0 is `VeryHigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            RiskLevel::Low
        } else if score < 50.0 {
            RiskLevel::Moderate
        } else if score < 75.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }
}

/// A single named contribution to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub name: String,
    pub points: f64,
}

/// Output of the scoring engine. Recomputed whole on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    /// Always within [0, 100].
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// The five largest contributions, descending.
    pub top_factors: Vec<RiskFactor>,
    /// Names of the interaction rules that fired.
    pub synergy_flags: Vec<String>,
}

/// A point-in-time pollutant/weather reading. Pollutants in µg/m³,
/// humidity in %, temperature in °C, wind in m/s, pressure in hPa,
/// pollen on a 0–100 index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentalSample {
    pub pm25: f64,
    pub pm10: f64,
    pub ozone: f64,
    pub no2: f64,
    pub so2: f64,
    pub co: f64,
    pub nh3: f64,
    pub humidity: f64,
    pub temperature: f64,
    pub wind_speed: f64,
    pub pressure: f64,
    pub pollen_level: f64,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
}

/// A registered user's monitoring preferences. Created at registration;
/// `last_check_in` is stamped only through the check-in path; profiles are
/// never auto-deleted; only explicit unregistration removes one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMonitoringProfile {
    pub user_id: Uuid,
    pub location: Location,
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
    /// "HH:MM" local time.
    pub wake_time: String,
    /// "HH:MM" local time.
    pub sleep_time: String,
    pub risk_sensitivity: RiskSensitivity,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_in: Option<DateTime<Utc>>,
}

impl UserMonitoringProfile {
    /// The profile's timezone, falling back to UTC if the stored name no
    /// longer parses (registration validates it, so this is belt-and-braces).
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Whether the user is inside their declared sleep window at `at`.
    pub fn is_asleep_at(&self, at: DateTime<Utc>) -> bool {
        let wake = parse_clock(&self.wake_time, DEFAULT_WAKE);
        let sleep = parse_clock(&self.sleep_time, DEFAULT_SLEEP);
        let local = at.with_timezone(&self.tz()).time();

        if wake == sleep {
            return false;
        }
        if wake < sleep {
            // Normal day: awake in [wake, sleep)
            local < wake || local >= sleep
        } else {
            // Sleep window does not cross midnight (e.g. wake 22:00, sleep 06:00)
            local >= sleep && local < wake
        }
    }
}

fn parse_clock(value: &str, fallback: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(fallback, "%H:%M"))
        .unwrap_or(NaiveTime::MIN)
}

/// One point-in-time risk record for one user. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelligenceSnapshot {
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub sample: EnvironmentalSample,
    pub assessment: RiskAssessment,
    pub recommendations: Vec<String>,
    pub is_during_sleep: bool,
    pub calculated_retroactively: bool,
}

/// Predicted risk at a given hour of the day (24 = end of day).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPrediction {
    pub hour: u8,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

/// One calendar day of intelligence for one user. The store enforces at
/// most one log per (user_id, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyIntelligenceLog {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub morning: IntelligenceSnapshot,
    pub midday: IntelligenceSnapshot,
    pub evening: IntelligenceSnapshot,
    pub risk_predictions: Vec<RiskPrediction>,
    pub recommendations: Vec<String>,
    pub calculated_retroactively: bool,
}

impl DailyIntelligenceLog {
    /// Highest scored moment of the day, used for day-level summaries.
    pub fn peak_score(&self) -> f64 {
        [&self.morning, &self.midday, &self.evening]
            .iter()
            .map(|s| s.assessment.risk_score)
            .fold(0.0, f64::max)
    }
}

/// Local-hour helper shared by the pipeline and the estimator: the UTC
/// instant of `hour` o'clock local time on `date` in `tz`. Hour 24 maps to
/// 23:00 so predictions stay within the day.
pub fn local_hour_utc(tz: Tz, date: NaiveDate, hour: u8) -> DateTime<Utc> {
    let clamped = if hour >= 24 { 23 } else { hour };
    let naive = date
        .and_hms_opt(u32::from(clamped), 0, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN));
    match naive.and_local_timezone(tz) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // DST gap: fall back to treating the wall time as UTC
        chrono::LocalResult::None => naive.and_utc(),
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
