//! Converge persistence: a small SQLite ledger of the resource identities a
//! caller has created, so they can be listed, read back and deleted later.
//!
//! Rows are written only after a create converged and removed only after a
//! delete converged; the remote stays the source of truth for state.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: String,
    pub identity: String,
    /// Last state label seen for the resource.
    pub label: String,
    /// Seconds since the epoch of the last write.
    pub ts: i64,
    /// JSON document the kind needs to rebuild the resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl LedgerEntry {
    pub fn new(kind: &str, identity: &str, label: &str) -> Self {
        Self { kind: kind.to_string(), identity: identity.to_string(), label: label.to_string(), ts: now_ts(), data: None }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

pub trait Ledger {
    /// Insert or refresh the row for `(kind, identity)`.
    fn record(&self, entry: &LedgerEntry) -> Result<()>;
    /// Drop a row. Returns whether it existed.
    fn forget(&self, kind: &str, identity: &str) -> Result<bool>;
    fn get(&self, kind: &str, identity: &str) -> Result<Option<LedgerEntry>>;
    /// All rows, optionally of one kind, newest first.
    fn list(&self, kind: Option<&str>) -> Result<Vec<LedgerEntry>>;
}

/// SQLite-backed ledger. Synchronous; each call is a single short statement.
pub struct SqliteLedger {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteLedger {
    /// Open the database at `CONVERGE_DB_PATH`, or `~/.converge/converge.db`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("CONVERGE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS resources (
                kind     TEXT NOT NULL,
                identity TEXT NOT NULL,
                label    TEXT NOT NULL,
                ts       INTEGER NOT NULL,
                data     TEXT,
                PRIMARY KEY (kind, identity)
            )",
            [],
        )
        .context("creating resources table")?;
        // ledgers written before `data` existed
        let has_data: i64 =
            db.query_row("SELECT COUNT(*) FROM pragma_table_info('resources') WHERE name = 'data'", [], |r| r.get(0))?;
        if has_data == 0 {
            db.execute("ALTER TABLE resources ADD COLUMN data TEXT", []).context("adding data column")?;
        }
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "ledger opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("ledger connection lock poisoned"))
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry { kind: row.get(0)?, identity: row.get(1)?, label: row.get(2)?, ts: row.get(3)?, data: row.get(4)? })
}

impl Ledger for SqliteLedger {
    fn record(&self, e: &LedgerEntry) -> Result<()> {
        let started = Instant::now();
        self.conn()?
            .execute(
                "INSERT INTO resources(kind, identity, label, ts, data) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(kind, identity) DO UPDATE SET label = excluded.label, ts = excluded.ts, data = excluded.data",
                (&e.kind, &e.identity, &e.label, e.ts, &e.data),
            )
            .with_context(|| format!("recording {} {}", e.kind, e.identity))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn forget(&self, kind: &str, identity: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute("DELETE FROM resources WHERE kind = ?1 AND identity = ?2", (kind, identity))
            .with_context(|| format!("forgetting {} {}", kind, identity))?;
        counter!("persist_forget_total", 1u64);
        Ok(n > 0)
    }

    fn get(&self, kind: &str, identity: &str) -> Result<Option<LedgerEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT kind, identity, label, ts, data FROM resources WHERE kind = ?1 AND identity = ?2")?;
        let mut rows = stmt.query_map((kind, identity), entry_from_row)?;
        let row = rows.next().transpose()?;
        Ok(row)
    }

    fn list(&self, kind: Option<&str>) -> Result<Vec<LedgerEntry>> {
        let started = Instant::now();
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT kind, identity, label, ts, data FROM resources
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY ts DESC, rowid DESC",
        )?;
        let out = stmt.query_map([kind], entry_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".converge");
        let _ = std::fs::create_dir_all(&p);
        p.push("converge.db");
        return p.to_string_lossy().to_string();
    }
    "converge.db".to_string()
}

pub fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("converge-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    #[test]
    fn record_upserts_and_forget_removes() {
        let l = SqliteLedger::open(&temp_db()).unwrap();
        l.record(&LedgerEntry { kind: "cluster".into(), identity: "cls-1".into(), label: "Creating".into(), ts: 1, data: None }).unwrap();
        l.record(&LedgerEntry { kind: "cluster".into(), identity: "cls-1".into(), label: "Running".into(), ts: 2, data: None }).unwrap();
        let got = l.get("cluster", "cls-1").unwrap().expect("row");
        assert_eq!(got.label, "Running");
        assert_eq!(got.ts, 2);
        assert_eq!(l.list(None).unwrap().len(), 1);

        assert!(l.forget("cluster", "cls-1").unwrap());
        assert!(!l.forget("cluster", "cls-1").unwrap());
        assert!(l.get("cluster", "cls-1").unwrap().is_none());
    }

    #[test]
    fn list_filters_by_kind_newest_first() {
        let l = SqliteLedger::open(&temp_db()).unwrap();
        for (i, (kind, id)) in [("cluster", "cls-1"), ("node_pool", "cls-1#np-1"), ("cluster", "cls-2")].iter().enumerate() {
            l.record(&LedgerEntry { kind: kind.to_string(), identity: id.to_string(), label: "ok".into(), ts: i as i64, data: None }).unwrap();
        }
        let clusters: Vec<String> = l.list(Some("cluster")).unwrap().into_iter().map(|e| e.identity).collect();
        assert_eq!(clusters, vec!["cls-2", "cls-1"]);
        assert_eq!(l.list(None).unwrap().len(), 3);
        // same identity string under another kind is a separate row
        assert!(l.get("node_pool", "cls-1").unwrap().is_none());
    }

    #[test]
    fn data_follows_the_latest_write() {
        let l = SqliteLedger::open(&temp_db()).unwrap();
        l.record(&LedgerEntry::new("permission_set", "cls-1#u-1", "applied").with_data(r#"[{"role":"view"}]"#)).unwrap();
        let got = l.get("permission_set", "cls-1#u-1").unwrap().expect("row");
        assert_eq!(got.data.as_deref(), Some(r#"[{"role":"view"}]"#));
        l.record(&LedgerEntry::new("permission_set", "cls-1#u-1", "applied")).unwrap();
        assert_eq!(l.get("permission_set", "cls-1#u-1").unwrap().expect("row").data, None);
    }

    #[test]
    fn reopening_an_old_ledger_adds_the_data_column() {
        let path = temp_db();
        {
            let db = rusqlite::Connection::open(&path).unwrap();
            db.execute(
                "CREATE TABLE resources (kind TEXT NOT NULL, identity TEXT NOT NULL, label TEXT NOT NULL, ts INTEGER NOT NULL, PRIMARY KEY (kind, identity))",
                [],
            )
            .unwrap();
            db.execute("INSERT INTO resources VALUES ('cluster', 'cls-1', 'Running', 1)", []).unwrap();
        }
        let l = SqliteLedger::open(&path).unwrap();
        let got = l.get("cluster", "cls-1").unwrap().expect("old row");
        assert_eq!(got.data, None);
        l.record(&LedgerEntry::new("cluster", "cls-2", "Running").with_data("{}")).unwrap();
        assert_eq!(l.list(None).unwrap().len(), 2);
    }
}
