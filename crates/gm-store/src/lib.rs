//! Durable SQLite store for a single station.
//!
//! # Schema
//! - `scans`: append-only scan log, PK `scan_id`, indexed by `(code, ts_ms)`
//!   and `(code, day)`.
//! - `pass_types`: pass-type projection per code.
//! - `device_state`: known-peer records.
//! - `broadcast_queue`: persistent FIFO of broadcast payloads whose send
//!   failed at the transport layer.
//! - `settings`: device identity and the config snapshot under well-known
//!   keys.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000,
//! foreign_keys=ON.  PRAGMA integrity_check runs at open; returns error if
//! it fails.
//!
//! # Migrations
//! Forward-only additive column checks run at open (`pragma table_info`,
//! `ALTER TABLE ... ADD COLUMN` for anything missing).

use gm_protocol::ScanRecord;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Settings key holding the persistent device identity.
pub const KEY_DEVICE_ID: &str = "device_id";
/// Settings key holding the replicated config snapshot blob.
pub const KEY_CONFIG_SNAPSHOT: &str = "config_snapshot";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Integrity: {0}")]
    IntegrityCheckFailed(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A known-peer row as persisted.  The engine owns the richer in-memory
/// shape; this is the durable subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRow {
    pub device_id: String,
    pub ip: Option<String>,
    pub last_seen_ms: i64,
    pub last_heartbeat_ms: i64,
    pub state_hash: Option<String>,
    pub phase: String,
}

/// A pass-type projection row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRow {
    pub code: String,
    pub kind: String,
    /// JSON object of per-day admission flags, when present.
    pub day_flags: Option<String>,
    pub count: i64,
}

/// One entry of the persistent broadcast retry queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBroadcast {
    pub id: i64,
    pub payload: Vec<u8>,
    pub attempts: i64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the store at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, creates tables if
    /// needed, and runs additive migrations.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.apply_pragmas()?;
        store.integrity_check()?;
        store.apply_schema()?;
        store.run_migrations()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        store.run_migrations()?;
        Ok(store)
    }

    pub fn integrity_check(&self) -> StoreResult<()> {
        let result: String = self
            .conn
            .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scan log
    // -----------------------------------------------------------------------

    /// Insert a single scan.  Idempotent on `scan_id`.
    pub fn append_scan(&mut self, scan: &ScanRecord) -> StoreResult<()> {
        if scan.qr_code.is_empty() || scan.device_id.is_empty() {
            return Err(StoreError::InvalidData(
                "code and device_id must be non-empty".to_owned(),
            ));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO scans (scan_id, code, ts_ms, device_id, day)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                scan.scan_id.to_string(),
                scan.qr_code,
                scan.ts_ms,
                scan.device_id,
                scan.day,
            ],
        )?;
        Ok(())
    }

    /// Insert a batch of scans in one transaction.
    ///
    /// Atomic: a crash mid-batch leaves either all or none of the included
    /// events.  Idempotent per `scan_id`.
    pub fn append_scans_batch(&mut self, scans: &[ScanRecord]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO scans (scan_id, code, ts_ms, device_id, day)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for scan in scans {
                if scan.qr_code.is_empty() || scan.device_id.is_empty() {
                    return Err(StoreError::InvalidData(
                        "code and device_id must be non-empty".to_owned(),
                    ));
                }
                stmt.execute(params![
                    scan.scan_id.to_string(),
                    scan.qr_code,
                    scan.ts_ms,
                    scan.device_id,
                    scan.day,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All scans for a code, ascending by `(ts_ms, device_id)`.
    pub fn load_scans_for(&self, code: &str) -> StoreResult<Vec<ScanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT scan_id, code, ts_ms, device_id, day FROM scans
             WHERE code = ?1 ORDER BY ts_ms ASC, device_id ASC",
        )?;
        let rows = stmt.query_map(params![code], map_scan)?;
        collect_scans(rows)
    }

    /// Scans for a code restricted to one event-day.
    pub fn load_scans_for_day(&self, code: &str, day: &str) -> StoreResult<Vec<ScanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT scan_id, code, ts_ms, device_id, day FROM scans
             WHERE code = ?1 AND day = ?2 ORDER BY ts_ms ASC, device_id ASC",
        )?;
        let rows = stmt.query_map(params![code, day], map_scan)?;
        collect_scans(rows)
    }

    /// Every scan in the log, grouped by nothing; callers regroup.
    pub fn load_all_scans(&self) -> StoreResult<Vec<ScanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT scan_id, code, ts_ms, device_id, day FROM scans
             ORDER BY code ASC, ts_ms ASC, device_id ASC",
        )?;
        let rows = stmt.query_map([], map_scan)?;
        collect_scans(rows)
    }

    /// Scans for the given codes, grouped by code.
    pub fn load_full_state(&self, codes: &[String]) -> StoreResult<BTreeMap<String, Vec<ScanRecord>>> {
        let mut out: BTreeMap<String, Vec<ScanRecord>> = BTreeMap::new();
        for code in codes {
            out.insert(code.clone(), self.load_scans_for(code)?);
        }
        Ok(out)
    }

    pub fn scan_count(&self) -> StoreResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Pass-type projection
    // -----------------------------------------------------------------------

    pub fn upsert_pass_type(&mut self, row: &PassRow) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO pass_types (code, kind, day_flags, count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(code) DO UPDATE SET
                 kind = excluded.kind,
                 day_flags = excluded.day_flags,
                 count = excluded.count",
            params![row.code, row.kind, row.day_flags, row.count],
        )?;
        Ok(())
    }

    pub fn load_pass_types(&self) -> StoreResult<Vec<PassRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT code, kind, day_flags, count FROM pass_types ORDER BY code")?;
        let rows = stmt.query_map([], |r| {
            Ok(PassRow {
                code: r.get(0)?,
                kind: r.get(1)?,
                day_flags: r.get(2)?,
                count: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Known peers
    // -----------------------------------------------------------------------

    pub fn upsert_peer(&mut self, row: &PeerRow) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO device_state
                 (device_id, ip, last_seen_ms, last_heartbeat_ms, state_hash, phase)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(device_id) DO UPDATE SET
                 ip = excluded.ip,
                 last_seen_ms = excluded.last_seen_ms,
                 last_heartbeat_ms = excluded.last_heartbeat_ms,
                 state_hash = excluded.state_hash,
                 phase = excluded.phase",
            params![
                row.device_id,
                row.ip,
                row.last_seen_ms,
                row.last_heartbeat_ms,
                row.state_hash,
                row.phase,
            ],
        )?;
        Ok(())
    }

    pub fn load_peers(&self) -> StoreResult<Vec<PeerRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, ip, last_seen_ms, last_heartbeat_ms, state_hash, phase
             FROM device_state ORDER BY device_id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(PeerRow {
                device_id: r.get(0)?,
                ip: r.get(1)?,
                last_seen_ms: r.get(2)?,
                last_heartbeat_ms: r.get(3)?,
                state_hash: r.get(4)?,
                phase: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Broadcast retry queue
    // -----------------------------------------------------------------------

    pub fn enqueue_broadcast(&mut self, payload: &[u8], now_ms: i64) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO broadcast_queue (payload, attempts, enqueued_at) VALUES (?1, 0, ?2)",
            params![payload, now_ms],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Oldest-first entries with fewer than `max_attempts` attempts.
    pub fn next_broadcasts(
        &self,
        max_attempts: i64,
        limit: i64,
    ) -> StoreResult<Vec<QueuedBroadcast>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload, attempts FROM broadcast_queue
             WHERE attempts < ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![max_attempts, limit], |r| {
            Ok(QueuedBroadcast {
                id: r.get(0)?,
                payload: r.get(1)?,
                attempts: r.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn bump_broadcast_attempts(&mut self, id: i64) -> StoreResult<i64> {
        self.conn.execute(
            "UPDATE broadcast_queue SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let attempts: i64 = self.conn.query_row(
            "SELECT attempts FROM broadcast_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    pub fn delete_broadcast(&mut self, id: i64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM broadcast_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn queued_broadcast_count(&self) -> StoreResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM broadcast_queue", [], |row| row.get(0))?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Return the persisted device identity, generating and persisting one
    /// via `gen` on first run.
    pub fn get_or_create_device_id(
        &mut self,
        gen_id: impl FnOnce() -> String,
    ) -> StoreResult<String> {
        if let Some(existing) = self.get_setting(KEY_DEVICE_ID)? {
            return Ok(existing);
        }
        let id = gen_id();
        self.put_setting(KEY_DEVICE_ID, &id)?;
        Ok(id)
    }

    pub fn save_config(&mut self, blob: &str) -> StoreResult<()> {
        self.put_setting(KEY_CONFIG_SNAPSHOT, blob)
    }

    pub fn load_config(&self) -> StoreResult<Option<String>> {
        self.get_setting(KEY_CONFIG_SNAPSHOT)
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_setting(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Open helpers
    // -----------------------------------------------------------------------

    fn apply_pragmas(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA wal_autocheckpoint=1000;
             PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Forward-only additive migrations.
    ///
    /// Columns introduced after the first shipped schema are added in place
    /// when a store created by an older build is opened.
    fn run_migrations(&self) -> StoreResult<()> {
        self.ensure_column("pass_types", "count", "INTEGER NOT NULL DEFAULT 0")?;
        self.ensure_column("device_state", "state_hash", "TEXT")?;
        self.ensure_column(
            "device_state",
            "phase",
            "TEXT NOT NULL DEFAULT 'discovering'",
        )?;
        self.ensure_column("broadcast_queue", "enqueued_at", "INTEGER NOT NULL DEFAULT 0")?;
        Ok(())
    }

    fn ensure_column(&self, table: &str, column: &str, decl: &str) -> StoreResult<()> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for name in names {
            if name? == column {
                return Ok(());
            }
        }
        self.conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {decl}"
        ))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn map_scan(row: &rusqlite::Row<'_>) -> Result<(String, String, i64, String, String), rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn collect_scans(
    rows: impl Iterator<Item = Result<(String, String, i64, String, String), rusqlite::Error>>,
) -> StoreResult<Vec<ScanRecord>> {
    let mut scans = Vec::new();
    for row in rows {
        let (scan_id, code, ts_ms, device_id, day) = row?;
        let scan_id: Uuid = scan_id
            .parse()
            .map_err(|_| StoreError::InvalidData(format!("bad scan_id in store: {scan_id}")))?;
        scans.push(ScanRecord {
            scan_id,
            qr_code: code,
            ts_ms,
            device_id,
            day,
        });
    }
    Ok(scans)
}
