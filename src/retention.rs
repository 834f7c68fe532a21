//! Rolling retention.
//!
//! The store keeps a trailing window of N days. The cutoff day itself is
//! retained: with N = 3 and today 2026-08-06, logs dated 2026-08-03 stay
//! and 2026-08-02 goes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::db::SnapshotDb;
use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneStats {
    pub logs_deleted: usize,
    pub snapshots_deleted: usize,
}

pub struct RetentionManager {
    store: Arc<SnapshotDb>,
    retention_days: u32,
}

impl RetentionManager {
    pub fn new(store: Arc<SnapshotDb>, retention_days: u32) -> Self {
        Self { store, retention_days }
    }

    /// Delete everything dated strictly before `now − retention_days`.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<PruneStats, MonitorError> {
        let cutoff = (now - Duration::days(i64::from(self.retention_days))).date_naive();
        let (logs_deleted, snapshots_deleted) = self.store.prune_before(cutoff)?;

        if logs_deleted > 0 || snapshots_deleted > 0 {
            log::info!(
                "Retention prune: removed {} logs, {} snapshots older than {}",
                logs_deleted,
                snapshots_deleted,
                cutoff
            );
        }
        Ok(PruneStats { logs_deleted, snapshots_deleted })
    }
}
