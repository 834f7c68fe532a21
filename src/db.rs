//! SQLite-backed snapshot store.
//!
//! All four scheduler loops and the read path share one `SnapshotDb`
//! behind `Arc`. The connection sits behind a non-poisoning mutex and
//! every operation takes the lock only for its own statement; no lock is
//! ever held across a provider fetch or a full loop tick. WAL mode keeps
//! concurrent readers cheap.
//!
//! Writes are append-style. Daily logs have two insert paths with
//! different collision behavior: `store_daily_log` (live pipeline,
//! replaces whatever is there) and `store_daily_log_if_absent` (backfill,
//! first write wins; an existing log for that date is never touched).

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::types::{DailyIntelligenceLog, IntelligenceSnapshot};

const DATE_FMT: &str = "%Y-%m-%d";

pub struct SnapshotDb {
    conn: Mutex<Connection>,
}

impl SnapshotDb {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open_at(path: PathBuf) -> Result<Self, MonitorError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        crate::migrations::run_migrations(&conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    // ─────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────

    pub fn store_snapshot(&self, snapshot: &IntelligenceSnapshot) -> Result<(), MonitorError> {
        let payload = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO snapshots
                (id, user_id, captured_at, is_during_sleep, calculated_retroactively, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                snapshot.user_id.to_string(),
                snapshot.timestamp.to_rfc3339(),
                snapshot.is_during_sleep as i32,
                snapshot.calculated_retroactively as i32,
                payload,
            ],
        )?;
        Ok(())
    }

    /// Snapshots for one user at or after `since`, ascending by time.
    pub fn snapshots_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<IntelligenceSnapshot>, MonitorError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM snapshots
             WHERE user_id = ?1 AND captured_at >= ?2
             ORDER BY captured_at ASC",
        )?;
        let rows = stmt.query_map(
            params![user_id.to_string(), since.to_rfc3339()],
            |row| row.get::<_, String>(0),
        )?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(serde_json::from_str(&row?)?);
        }
        Ok(snapshots)
    }

    // ─────────────────────────────────────────────────────────────────
    // Daily logs
    // ─────────────────────────────────────────────────────────────────

    /// Live write: replaces any existing log for (user, date). Observed
    /// data supersedes a previously backfilled day.
    pub fn store_daily_log(&self, log: &DailyIntelligenceLog) -> Result<(), MonitorError> {
        let payload = serde_json::to_string(log)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO daily_logs
                (user_id, date, calculated_retroactively, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.user_id.to_string(),
                log.date.format(DATE_FMT).to_string(),
                log.calculated_retroactively as i32,
                Utc::now().to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Backfill write: first write wins. Returns whether a row was
    /// actually inserted.
    pub fn store_daily_log_if_absent(
        &self,
        log: &DailyIntelligenceLog,
    ) -> Result<bool, MonitorError> {
        let payload = serde_json::to_string(log)?;
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO daily_logs
                (user_id, date, calculated_retroactively, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.user_id.to_string(),
                log.date.format(DATE_FMT).to_string(),
                log.calculated_retroactively as i32,
                Utc::now().to_rfc3339(),
                payload,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Daily logs for one user dated `since` or later, ascending by date.
    pub fn daily_logs_since(
        &self,
        user_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<DailyIntelligenceLog>, MonitorError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM daily_logs
             WHERE user_id = ?1 AND date >= ?2
             ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(
            params![user_id.to_string(), since.format(DATE_FMT).to_string()],
            |row| row.get::<_, String>(0),
        )?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(serde_json::from_str(&row?)?);
        }
        Ok(logs)
    }

    /// The set of dates that already have a log for this user, from
    /// `since` onward.
    pub fn daily_log_dates(
        &self,
        user_id: Uuid,
        since: NaiveDate,
    ) -> Result<HashSet<NaiveDate>, MonitorError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date FROM daily_logs WHERE user_id = ?1 AND date >= ?2",
        )?;
        let rows = stmt.query_map(
            params![user_id.to_string(), since.format(DATE_FMT).to_string()],
            |row| row.get::<_, String>(0),
        )?;

        let mut dates = HashSet::new();
        for row in rows {
            if let Ok(date) = NaiveDate::parse_from_str(&row?, DATE_FMT) {
                dates.insert(date);
            }
        }
        Ok(dates)
    }

    // ─────────────────────────────────────────────────────────────────
    // Pruning
    // ─────────────────────────────────────────────────────────────────

    /// Delete logs dated strictly before `cutoff` and snapshots captured
    /// strictly before `cutoff`'s midnight. The cutoff day itself is
    /// retained. Returns (logs_deleted, snapshots_deleted).
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<(usize, usize), MonitorError> {
        let conn = self.conn.lock();
        let logs = conn.execute(
            "DELETE FROM daily_logs WHERE date < ?1",
            params![cutoff.format(DATE_FMT).to_string()],
        )?;
        let midnight = cutoff.and_time(chrono::NaiveTime::MIN).and_utc();
        let snapshots = conn.execute(
            "DELETE FROM snapshots WHERE captured_at < ?1",
            params![midnight.to_rfc3339()],
        )?;
        Ok((logs, snapshots))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::SnapshotDb;

    /// Create a temporary on-disk database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of
    /// the test; the OS cleans up test temp dirs.
    pub fn test_db() -> SnapshotDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        SnapshotDb::open_at(path).expect("Failed to open test database")
    }
}

// =============================================================================
// Tests
// =============================================================================
