//! Rule-based recommendations.
//!
//! Deterministic advice strings derived from an assessment and the sample
//! behind it. The rules are the contract here, not the phrasing; tests
//! pin which rules fire, never the wording.

use crate::types::{EnvironmentalSample, RiskAssessment, RiskLevel, RiskSensitivity};

/// Advisory thresholds at normal sensitivity; scaled per user.
const MASK_PM25: f64 = 25.0;
const OZONE_TIMING: f64 = 80.0;
const POLLEN_ADVISORY: f64 = 30.0;

/// Sensitive users get advice earlier, relaxed users later.
fn threshold_scale(sensitivity: RiskSensitivity) -> f64 {
    match sensitivity {
        RiskSensitivity::Low => 1.2,
        RiskSensitivity::Normal => 1.0,
        RiskSensitivity::High => 0.8,
    }
}

pub fn recommendations_for(
    assessment: &RiskAssessment,
    sample: &EnvironmentalSample,
    sensitivity: RiskSensitivity,
) -> Vec<String> {
    let scale = threshold_scale(sensitivity);
    let mut out = Vec::new();

    match assessment.risk_level {
        RiskLevel::VeryHigh => out.push(
            "Risk is very high: stay indoors with windows closed and run an air purifier if you have one."
                .to_string(),
        ),
        RiskLevel::High => out
            .push("Limit outdoor exposure to short, essential trips today.".to_string()),
        _ => {}
    }

    if sample.pm25 > MASK_PM25 * scale {
        out.push(
            "Fine particulate levels are elevated; wear a well-fitting N95 mask outdoors."
                .to_string(),
        );
    }

    if sample.ozone > OZONE_TIMING * scale {
        out.push(
            "Ozone peaks in the afternoon; schedule outdoor exercise for the early morning."
                .to_string(),
        );
    }

    if sample.pollen_level > POLLEN_ADVISORY * scale {
        out.push("Pollen is high; keep windows closed and rinse off after time outside.".to_string());
    }

    if assessment.synergy_flags.iter().any(|f| f == "calm_wind+pm25") {
        out.push(
            "Still air is trapping particulates near the ground; avoid busy roads.".to_string(),
        );
    }

    if out.is_empty() {
        out.push("Air quality looks good. No special precautions needed.".to_string());
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::scoring::tests_support::neutral_sample;
    use crate::types::Location;

    fn assessment(score: f64, flags: Vec<&str>) -> RiskAssessment {
        RiskAssessment {
            risk_score: score,
            risk_level: RiskLevel::from_score(score),
            top_factors: vec![],
            synergy_flags: flags.into_iter().map(String::from).collect(),
        }
    }

    fn clean() -> EnvironmentalSample {
        neutral_sample(Location { lat: 40.7, lon: -74.0 }, Utc::now())
    }

    #[test]
    fn test_clean_air_gets_all_clear() {
        let recs = recommendations_for(&assessment(5.0, vec![]), &clean(), RiskSensitivity::Normal);
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn test_very_high_advises_indoors() {
        let recs =
            recommendations_for(&assessment(80.0, vec![]), &clean(), RiskSensitivity::Normal);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("indoors"));
    }

    #[test]
    fn test_mask_rule_triggers_on_pm25() {
        let mut s = clean();
        s.pm25 = 30.0;
        let recs = recommendations_for(&assessment(30.0, vec![]), &s, RiskSensitivity::Normal);
        assert!(recs.iter().any(|r| r.contains("N95")));
    }

    #[test]
    fn test_sensitivity_shifts_mask_threshold() {
        let mut s = clean();
        s.pm25 = 22.0; // below the normal threshold, above the high-sensitivity one
        let normal = recommendations_for(&assessment(20.0, vec![]), &s, RiskSensitivity::Normal);
        let high = recommendations_for(&assessment(20.0, vec![]), &s, RiskSensitivity::High);
        assert!(!normal.iter().any(|r| r.contains("N95")));
        assert!(high.iter().any(|r| r.contains("N95")));
    }

    #[test]
    fn test_stagnation_flag_adds_advice() {
        let recs = recommendations_for(
            &assessment(40.0, vec!["calm_wind+pm25"]),
            &clean(),
            RiskSensitivity::Normal,
        );
        assert!(recs.iter().any(|r| r.contains("Still air")));
    }

    #[test]
    fn test_rules_stack() {
        let mut s = clean();
        s.pm25 = 40.0;
        s.ozone = 120.0;
        s.pollen_level = 50.0;
        let recs = recommendations_for(&assessment(60.0, vec![]), &s, RiskSensitivity::Normal);
        // high-level advisory + mask + ozone timing + pollen
        assert_eq!(recs.len(), 4);
    }
}
