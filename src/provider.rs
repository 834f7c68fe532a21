//! Environmental data acquisition.
//!
//! The scheduler only ever sees the `EnvironmentalDataProvider` trait; the
//! bundled implementation speaks an OpenWeather-compatible REST API. A
//! small response cache keyed by rounded coordinates keeps four concurrent
//! loops from bursting the upstream rate limit; the Cleanup loop clears
//! it each cycle.
//!
//! Callers own fallback behavior: a fetch error here never fails a sweep,
//! it routes the caller to the estimator.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::estimator;
use crate::types::{EnvironmentalSample, Location};

/// The only interface the core requires from the integration layer.
#[async_trait]
pub trait EnvironmentalDataProvider: Send + Sync {
    /// One point-in-time reading for `location`, bounded by `timeout`.
    async fn fetch(
        &self,
        location: &Location,
        timeout: Duration,
    ) -> Result<EnvironmentalSample, ProviderError>;

    /// Drop any transient lookup state. Default: nothing to drop.
    fn clear_transient_cache(&self) {}
}

type CacheKey = (i64, i64);

struct CachedSample {
    sample: EnvironmentalSample,
    fetched_at: Instant,
}

/// OpenWeather-compatible provider with a TTL response cache.
pub struct OpenDataProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    cache_ttl: Duration,
    cache: DashMap<CacheKey, CachedSample>,
}

impl OpenDataProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: DashMap::new(),
        }
    }

    fn cached(&self, key: CacheKey) -> Option<EnvironmentalSample> {
        let entry = self.cache.get(&key)?;
        if entry.fetched_at.elapsed() < self.cache_ttl {
            Some(entry.sample.clone())
        } else {
            None
        }
    }

    async fn fetch_uncached(
        &self,
        location: &Location,
    ) -> Result<EnvironmentalSample, ProviderError> {
        let air_url = format!(
            "{}/air_pollution?lat={}&lon={}&appid={}",
            self.base_url, location.lat, location.lon, self.api_key
        );
        let weather_url = format!(
            "{}/weather?lat={}&lon={}&units=metric&appid={}",
            self.base_url, location.lat, location.lon, self.api_key
        );

        let air: Value = self
            .client
            .get(&air_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let weather: Value = self
            .client
            .get(&weather_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Upstream carries no pollen signal; take the estimator's
        // deterministic level so synergy rules stay live.
        let now = Utc::now();
        let pollen = estimator::estimate_sample(location, now).pollen_level;

        sample_from_payloads(&air, &weather, *location, now, pollen)
    }
}

#[async_trait]
impl EnvironmentalDataProvider for OpenDataProvider {
    async fn fetch(
        &self,
        location: &Location,
        timeout: Duration,
    ) -> Result<EnvironmentalSample, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key (set {})",
                crate::config::API_KEY_ENV
            )));
        }

        let key = cache_key(location);
        if let Some(sample) = self.cached(key) {
            return Ok(sample);
        }

        let sample = match tokio::time::timeout(timeout, self.fetch_uncached(location)).await {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout(timeout.as_secs())),
        };

        self.cache.insert(key, CachedSample { sample: sample.clone(), fetched_at: Instant::now() });
        Ok(sample)
    }

    fn clear_transient_cache(&self) {
        let before = self.cache.len();
        self.cache.clear();
        if before > 0 {
            log::debug!("Provider cache cleared ({} entries)", before);
        }
    }
}

/// Round to ~1 km so nearby users share one upstream request.
fn cache_key(location: &Location) -> CacheKey {
    ((location.lat * 100.0).round() as i64, (location.lon * 100.0).round() as i64)
}

/// Map upstream air-pollution + weather payloads into a sample. Missing
/// numeric fields default to clean-air/neutral values; only a payload
/// with no pollution record at all is an error.
fn sample_from_payloads(
    air: &Value,
    weather: &Value,
    location: Location,
    at: chrono::DateTime<Utc>,
    pollen_level: f64,
) -> Result<EnvironmentalSample, ProviderError> {
    let components = air
        .get("list")
        .and_then(|l| l.get(0))
        .and_then(|entry| entry.get("components"))
        .ok_or_else(|| ProviderError::Payload("no air pollution record in response".into()))?;

    let pollutant = |name: &str| components.get(name).and_then(Value::as_f64).unwrap_or(0.0);
    let main = |name: &str, fallback: f64| {
        weather
            .get("main")
            .and_then(|m| m.get(name))
            .and_then(Value::as_f64)
            .unwrap_or(fallback)
    };
    let wind = weather
        .get("wind")
        .and_then(|w| w.get("speed"))
        .and_then(Value::as_f64)
        .unwrap_or(3.0);

    Ok(EnvironmentalSample {
        pm25: pollutant("pm2_5"),
        pm10: pollutant("pm10"),
        ozone: pollutant("o3"),
        no2: pollutant("no2"),
        so2: pollutant("so2"),
        co: pollutant("co"),
        nh3: pollutant("nh3"),
        humidity: main("humidity", 50.0),
        temperature: main("temp", 20.0),
        wind_speed: wind,
        pressure: main("pressure", 1013.0),
        pollen_level,
        timestamp: at,
        location,
    })
}
