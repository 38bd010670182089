use crate::error::StorageError;
use crate::models::{
    QueuedRequest, ReplayOutcome, ReplayPolicy, ReplayRecord, Tier, UsageSnapshot,
};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use uuid::Uuid;

const SETTINGS_SINGLETON_ID: i64 = 1;

/// Persisted queue length never exceeds this; insertion beyond it evicts the
/// oldest entry.
pub const QUEUE_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct ClientStore {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ClientStore {
    pub fn new(base_dir: PathBuf) -> Self {
        let db_path = base_dir.join("carivox-client.db");
        Self { base_dir, db_path }
    }

    pub fn init(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|source| StorageError::Io {
            path: self.base_dir.display().to_string(),
            source,
        })?;
        let conn = self.open_conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS app_settings (
              id INTEGER PRIMARY KEY CHECK (id = 1),
              request_timeout_ms INTEGER NOT NULL DEFAULT 5000,
              replay_delay_ms INTEGER NOT NULL DEFAULT 0,
              usage_cache_ttl_seconds INTEGER NOT NULL DEFAULT 180,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS queued_requests (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              id TEXT NOT NULL UNIQUE,
              url TEXT NOT NULL,
              method TEXT NOT NULL,
              headers_json TEXT NOT NULL,
              body TEXT,
              queued_at_ms INTEGER NOT NULL,
              retries INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS usage_snapshots (
              month TEXT PRIMARY KEY,
              tier TEXT NOT NULL,
              generation_count INTEGER NOT NULL,
              monthly_limit INTEGER NOT NULL,
              warn INTEGER NOT NULL DEFAULT 0,
              fetched_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS replay_history (
              id TEXT PRIMARY KEY,
              request_id TEXT NOT NULL,
              url TEXT NOT NULL,
              method TEXT NOT NULL,
              outcome TEXT NOT NULL,
              error_message TEXT,
              attempt INTEGER NOT NULL,
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_replay_history_request_created_at
              ON replay_history(request_id, created_at DESC);
        "#,
        )?;
        conn.execute(
            r#"
            INSERT INTO app_settings(id, updated_at)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO NOTHING
        "#,
            params![SETTINGS_SINGLETON_ID, now()],
        )?;
        Ok(())
    }

    pub fn open_conn(&self) -> Result<Connection, StorageError> {
        Connection::open(&self.db_path).map_err(|source| StorageError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }

    /// True once `init` has run against this database file.
    pub fn schema_ok(&self) -> bool {
        let Ok(conn) = self.open_conn() else {
            return false;
        };
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'queued_requests'",
            [],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .unwrap_or(false)
    }

    /// Appends one request and trims the persisted queue back to capacity,
    /// oldest rows first.
    pub fn append_request(&self, request: &QueuedRequest) -> Result<(), StorageError> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
            INSERT INTO queued_requests(id, url, method, headers_json, body, queued_at_ms, retries)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
            params![
                request.id,
                request.url,
                request.method,
                serde_json::to_string(&request.headers)?,
                request.body,
                request.timestamp,
                request.retries
            ],
        )?;
        conn.execute(
            r#"
            DELETE FROM queued_requests
            WHERE seq NOT IN (
              SELECT seq FROM queued_requests ORDER BY seq DESC LIMIT ?1
            )
        "#,
            params![QUEUE_CAPACITY as i64],
        )?;
        Ok(())
    }

    pub fn delete_request(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.open_conn()?;
        conn.execute("DELETE FROM queued_requests WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn bump_retries(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.open_conn()?;
        conn.execute(
            "UPDATE queued_requests SET retries = retries + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Pending requests in insertion order.
    pub fn load_requests(&self) -> Result<Vec<QueuedRequest>, StorageError> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, url, method, headers_json, body, queued_at_ms, retries
            FROM queued_requests
            ORDER BY seq
        "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(QueuedRequest {
                id: row.get(0)?,
                url: row.get(1)?,
                method: row.get(2)?,
                headers: serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                body: row.get(4)?,
                timestamp: row.get(5)?,
                retries: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    pub fn clear_requests(&self) -> Result<(), StorageError> {
        let conn = self.open_conn()?;
        conn.execute("DELETE FROM queued_requests", [])?;
        Ok(())
    }

    pub fn upsert_usage_snapshot(&self, snapshot: &UsageSnapshot) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
            INSERT INTO usage_snapshots(month, tier, generation_count, monthly_limit, warn, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(month) DO UPDATE SET
              tier = excluded.tier,
              generation_count = excluded.generation_count,
              monthly_limit = excluded.monthly_limit,
              warn = excluded.warn,
              fetched_at = excluded.fetched_at
        "#,
            params![
                snapshot.month,
                snapshot.tier.as_str(),
                snapshot.generation_count,
                snapshot.monthly_limit,
                snapshot.warn,
                snapshot.fetched_at
            ],
        )
        .context("failed to write usage snapshot")?;
        Ok(())
    }

    pub fn get_usage_snapshot(&self, month: &str) -> Result<Option<UsageSnapshot>> {
        let conn = self.open_conn()?;
        conn.query_row(
            r#"
            SELECT month, tier, generation_count, monthly_limit, warn, fetched_at
            FROM usage_snapshots
            WHERE month = ?1
            "#,
            params![month],
            |row| {
                Ok(UsageSnapshot {
                    month: row.get(0)?,
                    tier: Tier::parse(&row.get::<_, String>(1)?),
                    generation_count: row.get(2)?,
                    monthly_limit: row.get(3)?,
                    warn: row.get(4)?,
                    fetched_at: row.get(5)?,
                })
            },
        )
        .optional()
        .context("failed to read usage snapshot")
    }

    pub fn record_replay(
        &self,
        request: &QueuedRequest,
        outcome: ReplayOutcome,
        attempt: u32,
        error_message: Option<&str>,
    ) -> Result<String> {
        let conn = self.open_conn()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            r#"
            INSERT INTO replay_history(
              id, request_id, url, method, outcome, error_message, attempt, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                request.id,
                request.url,
                request.method,
                outcome.as_str(),
                error_message,
                attempt,
                now()
            ],
        )
        .context("failed to write replay history")?;
        Ok(id)
    }

    pub fn list_replay_history(&self, limit: usize) -> Result<Vec<ReplayRecord>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, request_id, url, method, outcome, error_message, attempt, created_at
            FROM replay_history
            ORDER BY created_at DESC, id
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ReplayRecord {
                id: row.get(0)?,
                request_id: row.get(1)?,
                url: row.get(2)?,
                method: row.get(3)?,
                outcome: ReplayOutcome::parse(&row.get::<_, String>(4)?)
                    .unwrap_or(ReplayOutcome::Retrying),
                error_message: row.get(5)?,
                attempt: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    pub fn get_replay_policy(&self) -> Result<ReplayPolicy> {
        let conn = self.open_conn()?;
        conn.query_row(
            r#"
            SELECT request_timeout_ms, replay_delay_ms, usage_cache_ttl_seconds
            FROM app_settings WHERE id = ?1
            "#,
            params![SETTINGS_SINGLETON_ID],
            |row| {
                Ok(ReplayPolicy {
                    request_timeout_ms: row.get::<_, i64>(0)? as u64,
                    replay_delay_ms: row.get::<_, i64>(1)? as u64,
                    usage_cache_ttl_seconds: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .context("failed to read replay policy")
    }

    pub fn set_replay_policy(&self, policy: ReplayPolicy) -> Result<()> {
        let policy = policy.clamped();
        let conn = self.open_conn()?;
        conn.execute(
            r#"
            UPDATE app_settings
            SET request_timeout_ms = ?1, replay_delay_ms = ?2, usage_cache_ttl_seconds = ?3, updated_at = ?4
            WHERE id = ?5
            "#,
            params![
                policy.request_timeout_ms as i64,
                policy.replay_delay_ms as i64,
                policy.usage_cache_ttl_seconds as i64,
                now(),
                SETTINGS_SINGLETON_ID
            ],
        )
        .context("failed to update replay policy")?;
        Ok(())
    }
}

pub fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn temp_store() -> (tempfile::TempDir, ClientStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ClientStore::new(dir.path().join("carivox"));
        store.init().expect("init store");
        (dir, store)
    }

    fn sample_request(url: &str) -> QueuedRequest {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        QueuedRequest::new(url, "POST", headers, Some("{\"title\":\"duppy\"}".to_string()))
    }

    #[test]
    fn queue_rows_round_trip_across_reopen() {
        let (_dir, store) = temp_store();
        let first = sample_request("http://localhost/api/save-story");
        let second = sample_request("http://localhost/api/generate-speech");
        store.append_request(&first).unwrap();
        store.append_request(&second).unwrap();

        // simulate a restart by reopening from the same path
        let reopened = ClientStore::new(store.base_dir.clone());
        let loaded = reopened.load_requests().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[0].url, first.url);
        assert_eq!(loaded[0].headers, first.headers);
        assert_eq!(loaded[0].body, first.body);
        assert_eq!(loaded[1].id, second.id);
    }

    #[test]
    fn capacity_evicts_oldest_rows() {
        let (_dir, store) = temp_store();
        let mut ids = Vec::new();
        for index in 0..QUEUE_CAPACITY + 5 {
            let request = sample_request(&format!("http://localhost/api/save-story/{index}"));
            ids.push(request.id.clone());
            store.append_request(&request).unwrap();
        }
        let loaded = store.load_requests().unwrap();
        assert_eq!(loaded.len(), QUEUE_CAPACITY);
        // the five oldest are gone, the rest kept their order
        assert_eq!(loaded[0].id, ids[5]);
        assert_eq!(loaded.last().unwrap().id, ids[ids.len() - 1]);
    }

    #[test]
    fn bump_retries_persists() {
        let (_dir, store) = temp_store();
        let request = sample_request("http://localhost/api/save-story");
        store.append_request(&request).unwrap();
        store.bump_retries(&request.id).unwrap();
        store.bump_retries(&request.id).unwrap();
        let loaded = store.load_requests().unwrap();
        assert_eq!(loaded[0].retries, 2);
    }

    #[test]
    fn clear_is_idempotent() {
        let (_dir, store) = temp_store();
        store
            .append_request(&sample_request("http://localhost/api/save-story"))
            .unwrap();
        store.clear_requests().unwrap();
        assert!(store.load_requests().unwrap().is_empty());
        store.clear_requests().unwrap();
        assert!(store.load_requests().unwrap().is_empty());
    }

    #[test]
    fn usage_snapshots_keyed_by_month() {
        let (_dir, store) = temp_store();
        let december = UsageSnapshot {
            month: "2025-12".to_string(),
            tier: Tier::Free,
            generation_count: 4,
            monthly_limit: 5,
            warn: true,
            fetched_at: now(),
        };
        store.upsert_usage_snapshot(&december).unwrap();
        assert!(store.get_usage_snapshot("2026-01").unwrap().is_none());

        let updated = UsageSnapshot {
            generation_count: 5,
            ..december.clone()
        };
        store.upsert_usage_snapshot(&updated).unwrap();
        let fetched = store.get_usage_snapshot("2025-12").unwrap().unwrap();
        assert_eq!(fetched.generation_count, 5);
        assert_eq!(fetched.tier, Tier::Free);
        assert!(fetched.warn);
    }

    #[test]
    fn replay_history_records_outcomes() {
        let (_dir, store) = temp_store();
        let request = sample_request("http://localhost/api/save-story");
        store
            .record_replay(&request, ReplayOutcome::Retrying, 1, Some("timeout"))
            .unwrap();
        store
            .record_replay(&request, ReplayOutcome::Dropped, 3, Some("timeout"))
            .unwrap();
        let history = store.list_replay_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .any(|record| record.outcome == ReplayOutcome::Dropped && record.attempt == 3));
    }

    #[test]
    fn policy_defaults_and_clamped_update() {
        let (_dir, store) = temp_store();
        let policy = store.get_replay_policy().unwrap();
        assert_eq!(policy.request_timeout_ms, 5000);
        assert_eq!(policy.replay_delay_ms, 0);
        assert_eq!(policy.usage_cache_ttl_seconds, 180);

        store
            .set_replay_policy(ReplayPolicy {
                request_timeout_ms: 100,
                replay_delay_ms: 99_999,
                usage_cache_ttl_seconds: 600,
            })
            .unwrap();
        let updated = store.get_replay_policy().unwrap();
        assert_eq!(updated.request_timeout_ms, 1000);
        assert_eq!(updated.replay_delay_ms, 10_000);
        assert_eq!(updated.usage_cache_ttl_seconds, 600);
    }
}
