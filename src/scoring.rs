//! Composite risk scoring.
//!
//! Pure computation layer: maps one environmental sample plus one user
//! profile to a `RiskAssessment`. No I/O, no clock reads, total over its
//! input domain; malformed fields are sanitized to documented defaults
//! instead of failing.
//!
//! Every threshold, cap, and synergy magnitude here is carried as
//! configuration with documented defaults rather than hard law; the
//! comparisons are uniformly strict (`>`, and `<` for the wind floor).

use serde::{Deserialize, Serialize};

use crate::types::{
    EnvironmentalSample, RiskAssessment, RiskFactor, RiskLevel, UserMonitoringProfile,
};

/// Defaults substituted for missing/malformed sample fields.
const DEFAULT_HUMIDITY: f64 = 50.0;
const DEFAULT_TEMPERATURE: f64 = 20.0;
const DEFAULT_WIND: f64 = 3.0;
const DEFAULT_PRESSURE: f64 = 1013.0;

/// How many contributions survive into `top_factors`.
const TOP_FACTOR_COUNT: usize = 5;

// ─────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────

/// A pollutant's dose-response curve: points grow linearly in
/// `value / safe_threshold` and hit the component cap at twice the safe
/// threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollutantCurve {
    pub safe_threshold: f64,
    pub cap: f64,
}

impl PollutantCurve {
    fn points(&self, value: f64) -> f64 {
        if self.safe_threshold <= 0.0 {
            return 0.0;
        }
        (value / self.safe_threshold * (self.cap / 2.0)).min(self.cap)
    }
}

/// Which sample field a synergy condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Pm25,
    Pm10,
    Ozone,
    No2,
    So2,
    Co,
    Nh3,
    Humidity,
    Temperature,
    WindSpeed,
    Pressure,
    PollenLevel,
}

impl Metric {
    fn read(self, s: &EnvironmentalSample) -> f64 {
        match self {
            Metric::Pm25 => s.pm25,
            Metric::Pm10 => s.pm10,
            Metric::Ozone => s.ozone,
            Metric::No2 => s.no2,
            Metric::So2 => s.so2,
            Metric::Co => s.co,
            Metric::Nh3 => s.nh3,
            Metric::Humidity => s.humidity,
            Metric::Temperature => s.temperature,
            Metric::WindSpeed => s.wind_speed,
            Metric::Pressure => s.pressure,
            Metric::PollenLevel => s.pollen_level,
        }
    }
}

/// One side of a synergy rule. Comparisons are strict on both sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub metric: Metric,
    pub above: bool,
    pub threshold: f64,
}

impl Condition {
    pub fn holds(&self, s: &EnvironmentalSample) -> bool {
        let value = self.metric.read(s);
        if self.above {
            value > self.threshold
        } else {
            value < self.threshold
        }
    }
}

/// An interaction rule: a bonus added only when both conditions hold
/// simultaneously. Rules are additive and independently evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynergyRule {
    pub name: String,
    pub first: Condition,
    pub second: Condition,
    pub bonus: f64,
}

fn above(metric: Metric, threshold: f64) -> Condition {
    Condition { metric, above: true, threshold }
}

fn below(metric: Metric, threshold: f64) -> Condition {
    Condition { metric, above: false, threshold }
}

fn default_synergy_rules() -> Vec<SynergyRule> {
    vec![
        SynergyRule {
            name: "pm25+ozone".to_string(),
            first: above(Metric::Pm25, 25.0),
            second: above(Metric::Ozone, 80.0),
            bonus: 15.0,
        },
        SynergyRule {
            name: "pm25+no2".to_string(),
            first: above(Metric::Pm25, 20.0),
            second: above(Metric::No2, 40.0),
            bonus: 10.0,
        },
        SynergyRule {
            name: "so2+no2".to_string(),
            first: above(Metric::So2, 40.0),
            second: above(Metric::No2, 40.0),
            bonus: 8.0,
        },
        SynergyRule {
            name: "humidity+pollen".to_string(),
            first: above(Metric::Humidity, 70.0),
            second: above(Metric::PollenLevel, 30.0),
            bonus: 5.0,
        },
        SynergyRule {
            name: "calm_wind+pm25".to_string(),
            first: below(Metric::WindSpeed, 5.0),
            second: above(Metric::Pm25, 35.0),
            bonus: 8.0,
        },
        SynergyRule {
            name: "cold+humidity".to_string(),
            first: below(Metric::Temperature, 10.0),
            second: above(Metric::Humidity, 70.0),
            bonus: 7.0,
        },
    ]
}

/// Tunable scoring parameters. Defaults are scaled against WHO/EPA
/// reference thresholds; treat them as configuration, not law.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringConfig {
    pub pm25: PollutantCurve,
    pub pm10: PollutantCurve,
    pub ozone: PollutantCurve,
    pub no2: PollutantCurve,
    pub so2: PollutantCurve,
    pub co: PollutantCurve,
    pub nh3: PollutantCurve,

    pub humidity_threshold: f64,
    pub humidity_points_per_pct: f64,
    pub humidity_cap: f64,

    pub comfort_temperature: f64,
    pub temp_points_per_deg: f64,
    pub temp_cap: f64,

    pub stagnation_wind_floor: f64,
    pub stagnation_pm25_floor: f64,
    pub stagnation_points: f64,

    pub inversion_pressure_floor: f64,
    pub inversion_pm25_floor: f64,
    pub inversion_ozone_floor: f64,
    pub inversion_points: f64,

    pub pollen_points_per_level: f64,
    pub pollen_cap: f64,

    pub synergy: Vec<SynergyRule>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            pm25: PollutantCurve { safe_threshold: 25.0, cap: 40.0 },
            pm10: PollutantCurve { safe_threshold: 50.0, cap: 20.0 },
            ozone: PollutantCurve { safe_threshold: 100.0, cap: 30.0 },
            no2: PollutantCurve { safe_threshold: 40.0, cap: 20.0 },
            so2: PollutantCurve { safe_threshold: 40.0, cap: 15.0 },
            // WHO 24-h guideline of 4 mg/m³, expressed in µg/m³ to match
            // upstream component payloads
            co: PollutantCurve { safe_threshold: 4000.0, cap: 10.0 },
            nh3: PollutantCurve { safe_threshold: 100.0, cap: 5.0 },

            humidity_threshold: 70.0,
            humidity_points_per_pct: 0.3,
            humidity_cap: 9.0,

            comfort_temperature: 21.0,
            temp_points_per_deg: 0.4,
            temp_cap: 8.0,

            stagnation_wind_floor: 5.0,
            stagnation_pm25_floor: 20.0,
            stagnation_points: 6.0,

            inversion_pressure_floor: 1020.0,
            inversion_pm25_floor: 25.0,
            inversion_ozone_floor: 80.0,
            inversion_points: 5.0,

            pollen_points_per_level: 0.15,
            pollen_cap: 8.0,

            synergy: default_synergy_rules(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Scorer
// ─────────────────────────────────────────────────────────────────────

/// The scoring seam. One deterministic rule-based implementation today; a
/// learned-model variant would be a second implementation behind this
/// trait, never an import guard.
pub trait RiskScorer: Send + Sync {
    fn score(&self, sample: &EnvironmentalSample, profile: &UserMonitoringProfile)
        -> RiskAssessment;
}

/// Deterministic rules scorer.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedScorer {
    config: ScoringConfig,
}

impl RuleBasedScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }
}

impl RiskScorer for RuleBasedScorer {
    fn score(
        &self,
        sample: &EnvironmentalSample,
        profile: &UserMonitoringProfile,
    ) -> RiskAssessment {
        let cfg = &self.config;
        let s = sanitize(sample);
        let mut contributions: Vec<RiskFactor> = Vec::new();
        let mut synergy_flags: Vec<String> = Vec::new();

        let mut pollutant = |name: &str, curve: &PollutantCurve, value: f64| {
            let points = curve.points(value);
            if points > 0.0 {
                contributions.push(RiskFactor { name: name.to_string(), points });
            }
        };

        pollutant("pm2.5", &cfg.pm25, s.pm25);
        pollutant("pm10", &cfg.pm10, s.pm10);
        pollutant("ozone", &cfg.ozone, s.ozone);
        pollutant("no2", &cfg.no2, s.no2);
        pollutant("so2", &cfg.so2, s.so2);
        pollutant("co", &cfg.co, s.co);
        pollutant("nh3", &cfg.nh3, s.nh3);

        if s.humidity > cfg.humidity_threshold {
            let points =
                ((s.humidity - cfg.humidity_threshold) * cfg.humidity_points_per_pct)
                    .min(cfg.humidity_cap);
            contributions.push(RiskFactor { name: "humidity".to_string(), points });
        }

        let temp_dev = (s.temperature - cfg.comfort_temperature).abs();
        if temp_dev > 0.0 {
            let points = (temp_dev * cfg.temp_points_per_deg).min(cfg.temp_cap);
            contributions.push(RiskFactor { name: "temperature".to_string(), points });
        }

        // Stagnation: still air under an already-polluted sky
        if s.wind_speed < cfg.stagnation_wind_floor && s.pm25 > cfg.stagnation_pm25_floor {
            contributions.push(RiskFactor {
                name: "stagnation".to_string(),
                points: cfg.stagnation_points,
            });
        }

        // Pressure inversion only matters when particulates or ozone are
        // already elevated
        if s.pressure > cfg.inversion_pressure_floor
            && (s.pm25 > cfg.inversion_pm25_floor || s.ozone > cfg.inversion_ozone_floor)
        {
            contributions.push(RiskFactor {
                name: "pressure_inversion".to_string(),
                points: cfg.inversion_points,
            });
        }

        if s.pollen_level > 0.0 {
            let points = (s.pollen_level * cfg.pollen_points_per_level).min(cfg.pollen_cap);
            contributions.push(RiskFactor { name: "pollen".to_string(), points });
        }

        for rule in &cfg.synergy {
            if rule.first.holds(&s) && rule.second.holds(&s) {
                synergy_flags.push(rule.name.clone());
                contributions.push(RiskFactor {
                    name: rule.name.clone(),
                    points: rule.bonus,
                });
            }
        }

        let total: f64 = contributions.iter().map(|f| f.points).sum();
        let risk_score =
            (total * profile.risk_sensitivity.multiplier()).clamp(0.0, 100.0);

        let mut top_factors = contributions;
        top_factors.sort_by(|a, b| {
            b.points.partial_cmp(&a.points).unwrap_or(std::cmp::Ordering::Equal)
        });
        top_factors.truncate(TOP_FACTOR_COUNT);

        RiskAssessment {
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            top_factors,
            synergy_flags,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Input sanitization
// ─────────────────────────────────────────────────────────────────────

/// Replace malformed fields with documented defaults and clamp the rest
/// into physical ranges. Scoring must never fail for any input.
fn sanitize(sample: &EnvironmentalSample) -> EnvironmentalSample {
    let mut s = sample.clone();
    s.pm25 = pollutant_or_zero(s.pm25);
    s.pm10 = pollutant_or_zero(s.pm10);
    s.ozone = pollutant_or_zero(s.ozone);
    s.no2 = pollutant_or_zero(s.no2);
    s.so2 = pollutant_or_zero(s.so2);
    s.co = pollutant_or_zero(s.co);
    s.nh3 = pollutant_or_zero(s.nh3);

    s.humidity = if s.humidity.is_finite() {
        s.humidity.clamp(0.0, 100.0)
    } else {
        DEFAULT_HUMIDITY
    };
    s.temperature = if s.temperature.is_finite() && (-60.0..=60.0).contains(&s.temperature) {
        s.temperature
    } else {
        DEFAULT_TEMPERATURE
    };
    s.wind_speed = if s.wind_speed.is_finite() {
        s.wind_speed.max(0.0)
    } else {
        DEFAULT_WIND
    };
    s.pressure = if s.pressure.is_finite() && (850.0..=1100.0).contains(&s.pressure) {
        s.pressure
    } else {
        DEFAULT_PRESSURE
    };
    s.pollen_level = if s.pollen_level.is_finite() {
        s.pollen_level.clamp(0.0, 100.0)
    } else {
        0.0
    };
    s
}

fn pollutant_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::tests_support::neutral_sample;
    use super::*;
    use crate::types::{Location, RiskSensitivity};

    fn sample_profile(sensitivity: RiskSensitivity) -> UserMonitoringProfile {
        UserMonitoringProfile {
            user_id: Uuid::new_v4(),
            location: Location { lat: 40.7, lon: -74.0 },
            timezone: "UTC".to_string(),
            wake_time: "07:00".to_string(),
            sleep_time: "22:00".to_string(),
            risk_sensitivity: sensitivity,
            is_active: true,
            last_check_in: None,
        }
    }

    fn base() -> EnvironmentalSample {
        neutral_sample(Location { lat: 40.7, lon: -74.0 }, Utc::now())
    }

    fn score_of(sample: &EnvironmentalSample) -> RiskAssessment {
        RuleBasedScorer::default().score(sample, &sample_profile(RiskSensitivity::Normal))
    }

    #[test]
    fn test_neutral_sample_scores_zero() {
        let a = score_of(&base());
        assert_eq!(a.risk_score, 0.0);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.top_factors.is_empty());
        assert!(a.synergy_flags.is_empty());
    }

    #[test]
    fn test_score_always_in_range() {
        let mut worst = base();
        worst.pm25 = 500.0;
        worst.pm10 = 900.0;
        worst.ozone = 400.0;
        worst.no2 = 300.0;
        worst.so2 = 300.0;
        worst.co = 40000.0;
        worst.nh3 = 400.0;
        worst.humidity = 100.0;
        worst.temperature = -30.0;
        worst.wind_speed = 0.0;
        worst.pressure = 1045.0;
        worst.pollen_level = 100.0;

        let a = score_of(&worst);
        assert!((0.0..=100.0).contains(&a.risk_score));
        assert_eq!(a.risk_level, RiskLevel::VeryHigh);

        let a = score_of(&base());
        assert!((0.0..=100.0).contains(&a.risk_score));
    }

    #[test]
    fn test_pollutant_term_caps() {
        let curve = PollutantCurve { safe_threshold: 25.0, cap: 40.0 };
        // Linear below the knee: at the safe threshold, half the cap.
        assert!((curve.points(25.0) - 20.0).abs() < 1e-9);
        // Cap reached at twice the threshold and held beyond it.
        assert!((curve.points(50.0) - 40.0).abs() < 1e-9);
        assert!((curve.points(500.0) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_synergy_bonus_added_once_exactly() {
        let mut s = base();
        s.pm25 = 26.0;
        s.ozone = 81.0;

        let a = score_of(&s);
        let pm25_term = 26.0 / 25.0 * 20.0;
        let ozone_term = 81.0 / 100.0 * 15.0;
        assert!((a.risk_score - (pm25_term + ozone_term + 15.0)).abs() < 1e-9);
        assert_eq!(a.synergy_flags, vec!["pm25+ozone".to_string()]);
    }

    #[test]
    fn test_synergy_threshold_is_strict() {
        let mut s = base();
        s.pm25 = 25.0; // not > 25
        s.ozone = 81.0;

        let a = score_of(&s);
        assert!(a.synergy_flags.is_empty());
        let pm25_term = 20.0;
        let ozone_term = 81.0 / 100.0 * 15.0;
        assert!((a.risk_score - (pm25_term + ozone_term)).abs() < 1e-9);
    }

    #[test]
    fn test_strictness_on_both_sides() {
        let mut s = base();
        s.so2 = 40.0; // not > 40
        s.no2 = 41.0;
        assert!(!score_of(&s).synergy_flags.contains(&"so2+no2".to_string()));

        s.so2 = 40.1;
        assert!(score_of(&s).synergy_flags.contains(&"so2+no2".to_string()));
    }

    #[test]
    fn test_multiple_synergies_fire_together() {
        let mut s = base();
        s.pm25 = 36.0;
        s.ozone = 81.0;
        s.no2 = 41.0;
        s.wind_speed = 4.0;

        let flags = score_of(&s).synergy_flags;
        assert!(flags.contains(&"pm25+ozone".to_string()));
        assert!(flags.contains(&"pm25+no2".to_string()));
        assert!(flags.contains(&"calm_wind+pm25".to_string()));
        assert_eq!(flags.len(), 3);
    }

    #[test]
    fn test_stagnation_requires_elevated_pm25() {
        let mut s = base();
        s.wind_speed = 2.0;
        // Clean air: calm wind alone contributes nothing.
        assert_eq!(score_of(&s).risk_score, 0.0);

        s.pm25 = 21.0;
        let a = score_of(&s);
        assert!(a.top_factors.iter().any(|f| f.name == "stagnation"));
    }

    #[test]
    fn test_inversion_requires_elevated_pollution() {
        let mut s = base();
        s.pressure = 1030.0;
        assert!(!score_of(&s).top_factors.iter().any(|f| f.name == "pressure_inversion"));

        s.ozone = 81.0;
        assert!(score_of(&s).top_factors.iter().any(|f| f.name == "pressure_inversion"));
    }

    #[test]
    fn test_sensitivity_scales_total() {
        let mut s = base();
        s.pm25 = 30.0;
        s.ozone = 90.0;

        let scorer = RuleBasedScorer::default();
        let low = scorer.score(&s, &sample_profile(RiskSensitivity::Low)).risk_score;
        let normal = scorer.score(&s, &sample_profile(RiskSensitivity::Normal)).risk_score;
        let high = scorer.score(&s, &sample_profile(RiskSensitivity::High)).risk_score;
        assert!(low < normal);
        assert!(normal < high);
    }

    #[test]
    fn test_top_factors_descending_capped_at_five() {
        let mut s = base();
        s.pm25 = 60.0;
        s.pm10 = 120.0;
        s.ozone = 250.0;
        s.no2 = 90.0;
        s.so2 = 90.0;
        s.co = 9000.0;
        s.nh3 = 250.0;
        s.pollen_level = 60.0;

        let a = score_of(&s);
        assert_eq!(a.top_factors.len(), 5);
        for pair in a.top_factors.windows(2) {
            assert!(pair[0].points >= pair[1].points);
        }
        // The heaviest component under the default caps is PM2.5.
        assert_eq!(a.top_factors[0].name, "pm2.5");
    }

    #[test]
    fn test_synergy_competes_in_top_factors() {
        let mut s = base();
        s.pm25 = 26.0;
        s.ozone = 81.0;
        let a = score_of(&s);
        // pm2.5 (20.8) > pm25+ozone (15.0) > ozone (12.15)
        let names: Vec<&str> = a.top_factors.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["pm2.5", "pm25+ozone", "ozone"]);
    }

    #[test]
    fn test_malformed_input_substitutes_defaults() {
        let mut s = base();
        s.humidity = f64::NAN;
        s.temperature = f64::INFINITY;
        s.pm25 = -12.0;
        s.pressure = 0.0;

        let a = score_of(&s);
        // Defaults: humidity 50 (no penalty), temperature 20 (0.4 points
        // of deviation from the 21° comfort point), pm2.5 treated as clean.
        assert!((a.risk_score - 0.4).abs() < 1e-9);
        assert_eq!(a.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_cold_humid_synergy() {
        let mut s = base();
        s.temperature = 5.0;
        s.humidity = 75.0;
        let a = score_of(&s);
        assert!(a.synergy_flags.contains(&"cold+humidity".to_string()));
    }
}
