//! The set of currently-monitored users.
//!
//! In-memory map guarded by a non-poisoning RwLock; all four loops read it
//! concurrently. Registration validates the profile up front so the loops
//! never have to. Inactivity never removes a profile; it triggers *more*
//! monitoring (the inactive-user sweep); only explicit unregistration
//! removes one.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::types::{Location, RiskSensitivity, UserMonitoringProfile};

/// Registration input: everything a profile carries except the fields the
/// service assigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserProfile {
    pub location: Location,
    pub timezone: String,
    pub wake_time: String,
    pub sleep_time: String,
    #[serde(default)]
    pub risk_sensitivity: RiskSensitivity,
}

#[derive(Default)]
pub struct UserMonitoringRegistry {
    profiles: RwLock<HashMap<Uuid, UserMonitoringProfile>>,
}

impl UserMonitoringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a new profile. Returns the assigned user id.
    pub fn register(&self, new: NewUserProfile) -> Result<Uuid, MonitorError> {
        validate(&new)?;

        let user_id = Uuid::new_v4();
        let profile = UserMonitoringProfile {
            user_id,
            location: new.location,
            timezone: new.timezone,
            wake_time: new.wake_time,
            sleep_time: new.sleep_time,
            risk_sensitivity: new.risk_sensitivity,
            is_active: true,
            last_check_in: None,
        };

        self.profiles.write().insert(user_id, profile);
        log::info!("Registered user {}", user_id);
        Ok(user_id)
    }

    /// Remove a profile from scheduling entirely.
    pub fn unregister(&self, user_id: Uuid) -> Result<(), MonitorError> {
        match self.profiles.write().remove(&user_id) {
            Some(_) => {
                log::info!("Unregistered user {}", user_id);
                Ok(())
            }
            None => Err(MonitorError::UnknownUser(user_id)),
        }
    }

    pub fn get(&self, user_id: Uuid) -> Option<UserMonitoringProfile> {
        self.profiles.read().get(&user_id).cloned()
    }

    /// Snapshot of all active profiles, for loop iteration.
    pub fn active_profiles(&self) -> Vec<UserMonitoringProfile> {
        self.profiles
            .read()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect()
    }

    /// Active profiles whose last check-in is older than `threshold`, or
    /// who have never checked in at all.
    pub fn inactive_profiles(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<UserMonitoringProfile> {
        self.profiles
            .read()
            .values()
            .filter(|p| {
                p.is_active
                    && match p.last_check_in {
                        Some(at) => now - at > threshold,
                        None => true,
                    }
            })
            .cloned()
            .collect()
    }

    /// Stamp live app activity for a user.
    pub fn record_check_in(&self, user_id: Uuid) -> Result<(), MonitorError> {
        match self.profiles.write().get_mut(&user_id) {
            Some(profile) => {
                profile.last_check_in = Some(Utc::now());
                Ok(())
            }
            None => Err(MonitorError::UnknownUser(user_id)),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

fn validate(new: &NewUserProfile) -> Result<(), MonitorError> {
    if !new.location.lat.is_finite() || !(-90.0..=90.0).contains(&new.location.lat) {
        return Err(MonitorError::Validation(format!(
            "latitude out of range: {}",
            new.location.lat
        )));
    }
    if !new.location.lon.is_finite() || !(-180.0..=180.0).contains(&new.location.lon) {
        return Err(MonitorError::Validation(format!(
            "longitude out of range: {}",
            new.location.lon
        )));
    }
    if new.timezone.parse::<Tz>().is_err() {
        return Err(MonitorError::Validation(format!(
            "unknown timezone: {}",
            new.timezone
        )));
    }
    for (label, value) in [("wakeTime", &new.wake_time), ("sleepTime", &new.sleep_time)] {
        if NaiveTime::parse_from_str(value, "%H:%M").is_err() {
            return Err(MonitorError::Validation(format!(
                "{} must be HH:MM, got {:?}",
                label, value
            )));
        }
    }
    Ok(())
}
