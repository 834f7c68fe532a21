//! Deterministic fallback sampling.
//!
//! When the live provider is unreachable, and for every backfilled day,
//! samples come from here. The estimator is a pure function of
//! (location, date): the seed is a sha256 of the rounded coordinates and
//! the calendar day, so repeated calls produce byte-identical samples.
//! That determinism is what makes backfill idempotent.
//!
//! Baselines are latitude/season-adjusted, drawn from normal distributions
//! around climatological defaults and clamped into physical ranges. The
//! diurnal projection layers the day's shape on top: ozone peaks
//! mid-afternoon, particulates rise with the morning and evening calm,
//! temperature follows the usual day curve.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};

use crate::types::{EnvironmentalSample, Location};

/// Estimated reading at an arbitrary instant.
pub fn estimate_sample(location: &Location, at: DateTime<Utc>) -> EnvironmentalSample {
    let base = estimate_base(location, at.date_naive());
    let mut sample = project_sample_at_hour(&base, at.hour() as u8);
    sample.timestamp = at;
    sample
}

/// Estimated daily-mean reading for one calendar day, stamped at noon UTC.
pub fn estimate_base(location: &Location, date: NaiveDate) -> EnvironmentalSample {
    let mut rng = seeded_rng(location, date);
    let month = date.month();
    let warmth = seasonal_warmth(location.lat, month);

    let pm25_mean = 12.0 + 6.0 * heating_season(location.lat, month);
    let pm25 = draw(&mut rng, pm25_mean, pm25_mean * 0.3, 1.0, 180.0);
    let pm10 = draw(&mut rng, pm25_mean * 1.8, pm25_mean * 0.5, 2.0, 400.0);
    let ozone = draw(&mut rng, 50.0 + 28.0 * warmth.max(0.0), 12.0, 5.0, 320.0);
    let no2 = draw(&mut rng, 18.0, 6.0, 1.0, 200.0);
    let so2 = draw(&mut rng, 6.0, 3.0, 0.5, 150.0);
    let co = draw(&mut rng, 350.0, 120.0, 50.0, 12_000.0);
    let nh3 = draw(&mut rng, 4.0, 2.0, 0.2, 80.0);

    let temperature = draw(
        &mut rng,
        25.0 - 0.4 * location.lat.abs() + 9.0 * warmth,
        3.0,
        -40.0,
        48.0,
    );
    let humidity = draw(&mut rng, 58.0 - 6.0 * warmth, 10.0, 10.0, 100.0);
    let wind_speed = draw(&mut rng, 4.0, 1.5, 0.2, 25.0);
    let pressure = draw(&mut rng, 1014.0, 6.0, 975.0, 1045.0);
    let pollen = draw(
        &mut rng,
        8.0 + 28.0 * pollen_season(location.lat, month),
        6.0,
        0.0,
        100.0,
    );

    EnvironmentalSample {
        pm25,
        pm10,
        ozone,
        no2,
        so2,
        co,
        nh3,
        humidity,
        temperature,
        wind_speed,
        pressure,
        pollen_level: pollen,
        timestamp: date
            .and_hms_opt(12, 0, 0)
            .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
            .and_utc(),
        location: *location,
    }
}

/// Apply the diurnal shape of the day to a daily-mean sample. The result's
/// timestamp is the base date at `hour` UTC; callers that need a
/// user-local instant overwrite it.
pub fn project_sample_at_hour(base: &EnvironmentalSample, hour: u8) -> EnvironmentalSample {
    let h = f64::from(hour.min(23) % 24);
    let mut s = base.clone();

    let pm_factor = 0.75 + 0.35 * bell(h, 8.0, 2.5) + 0.45 * bell(h, 20.0, 3.0);
    s.pm25 = (base.pm25 * pm_factor).max(0.0);
    s.pm10 = (base.pm10 * pm_factor).max(0.0);
    s.no2 = (base.no2 * (0.7 + 0.5 * bell(h, 8.0, 2.5) + 0.5 * bell(h, 19.0, 3.0))).max(0.0);

    // Photochemical: ozone builds through the afternoon
    s.ozone = (base.ozone * (0.55 + 0.65 * bell(h, 15.0, 4.5))).max(0.0);

    s.temperature = base.temperature - 3.0 + 7.0 * bell(h, 15.0, 4.5);
    s.humidity = (base.humidity + 8.0 * bell(h, 5.0, 4.0) - 6.0 * bell(h, 15.0, 4.5))
        .clamp(0.0, 100.0);
    s.wind_speed = (base.wind_speed * (0.8 + 0.5 * bell(h, 14.0, 5.0))).max(0.0);
    s.pollen_level =
        (base.pollen_level * (0.6 + 0.7 * bell(h, 11.0, 4.0))).clamp(0.0, 100.0);

    s.timestamp = base
        .timestamp
        .date_naive()
        .and_hms_opt(u32::from(hour.min(23)), 0, 0)
        .unwrap_or_else(|| base.timestamp.date_naive().and_time(NaiveTime::MIN))
        .and_utc();
    s
}

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

fn seeded_rng(location: &Location, date: NaiveDate) -> StdRng {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:.4}", location.lat).as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:.4}", location.lon).as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    let digest = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed))
}

fn draw(rng: &mut StdRng, mean: f64, sd: f64, min: f64, max: f64) -> f64 {
    let value = match Normal::new(mean, sd.max(0.01)) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    };
    value.clamp(min, max)
}

/// Gaussian bump over circular hour-of-day distance.
fn bell(hour: f64, peak: f64, width: f64) -> f64 {
    let d = (hour - peak).abs().min(24.0 - (hour - peak).abs());
    (-(d * d) / (2.0 * width * width)).exp()
}

/// +1 in local midsummer, −1 in midwinter, hemisphere-aware.
fn seasonal_warmth(lat: f64, month: u32) -> f64 {
    let phase = (f64::from(month) - 7.0) / 12.0 * std::f64::consts::TAU;
    let north = phase.cos();
    if lat >= 0.0 {
        north
    } else {
        -north
    }
}

/// 1 in the heating season (local winter), tapering to 0 in summer.
fn heating_season(lat: f64, month: u32) -> f64 {
    ((-seasonal_warmth(lat, month)).max(0.0)).min(1.0)
}

/// Pollen release peaks in local late spring.
fn pollen_season(lat: f64, month: u32) -> f64 {
    let peak_month = if lat >= 0.0 { 5.0 } else { 11.0 };
    let d = (f64::from(month) - peak_month).abs().min(12.0 - (f64::from(month) - peak_month).abs());
    (-(d * d) / (2.0 * 2.0 * 2.0)).exp()
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
