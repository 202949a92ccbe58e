use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

use crate::engine::{CycleOutcome, CycleRecord};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // Enable WAL mode for crash safety
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Persist one engine cycle record.
    pub fn record_cycle(&self, leader: &str, record: &CycleRecord) -> anyhow::Result<()> {
        let outcome = match record.outcome {
            CycleOutcome::Applied => "applied",
            CycleOutcome::RolledBack => "rolled_back",
            CycleOutcome::Skipped => "skipped",
        };
        let path_json = serde_json::to_string(&record.path)?;
        self.conn.execute(
            "INSERT INTO cycle_records \
             (leader_id, cycle_index, amount, path, outcome, sim_time, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                leader,
                record.index,
                record.amount,
                path_json,
                outcome,
                record.sim_time,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Open a leader term row; returns its rowid for the later close.
    pub fn record_term_start(&self, leader: &str, elected_at: f64) -> anyhow::Result<i64> {
        self.conn.execute(
            "INSERT INTO leader_terms (leader_id, elected_at) VALUES (?1, ?2)",
            rusqlite::params![leader, elected_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_term_end(&self, term_id: i64, ended_at: f64, reason: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE leader_terms SET ended_at = ?1, end_reason = ?2 WHERE id = ?3",
            rusqlite::params![ended_at, reason, term_id],
        )?;
        Ok(())
    }

    pub fn cycle_count(&self, outcome: Option<&str>) -> anyhow::Result<i64> {
        let count = match outcome {
            Some(o) => self.conn.query_row(
                "SELECT COUNT(*) FROM cycle_records WHERE outcome = ?1",
                [o],
                |r| r.get(0),
            )?,
            None => {
                self.conn
                    .query_row("SELECT COUNT(*) FROM cycle_records", [], |r| r.get(0))?
            }
        };
        Ok(count)
    }

    pub fn term_count(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM leader_terms", [], |r| r.get(0))?)
    }
}

const SCHEMA: &str = r#"
-- One row per rebalancing engine cycle (audit trail)
CREATE TABLE IF NOT EXISTS cycle_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    leader_id TEXT NOT NULL,
    cycle_index INTEGER NOT NULL,
    amount REAL NOT NULL,
    path TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK (outcome IN ('applied', 'rolled_back', 'skipped')),
    sim_time REAL NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cycle_records_leader
    ON cycle_records(leader_id, sim_time);

-- Leader term lifecycle
CREATE TABLE IF NOT EXISTS leader_terms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    leader_id TEXT NOT NULL,
    elected_at REAL NOT NULL,
    ended_at REAL,
    end_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_leader_terms_leader
    ON leader_terms(leader_id, elected_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CycleOutcome, CycleRecord};

    fn record(outcome: CycleOutcome) -> CycleRecord {
        CycleRecord {
            index: 1,
            amount: 100.0,
            path: vec!["node_a".into(), "node_b".into(), "node_c".into()],
            outcome,
            sim_time: 600.0,
        }
    }

    #[test]
    fn test_record_cycle_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.record_cycle("node_a", &record(CycleOutcome::Applied)).unwrap();
        db.record_cycle("node_a", &record(CycleOutcome::Skipped)).unwrap();

        assert_eq!(db.cycle_count(None).unwrap(), 2);
        assert_eq!(db.cycle_count(Some("applied")).unwrap(), 1);
        assert_eq!(db.cycle_count(Some("rolled_back")).unwrap(), 0);

        let path: String = db
            .conn()
            .query_row(
                "SELECT path FROM cycle_records WHERE outcome = 'applied'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let nodes: Vec<String> = serde_json::from_str(&path).unwrap();
        assert_eq!(nodes, vec!["node_a", "node_b", "node_c"]);
    }

    #[test]
    fn test_term_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let term_id = db.record_term_start("node_b", 600.0).unwrap();
        assert_eq!(db.term_count().unwrap(), 1);

        db.record_term_end(term_id, 1200.0, "superseded").unwrap();
        let (ended_at, reason): (f64, String) = db
            .conn()
            .query_row(
                "SELECT ended_at, end_reason FROM leader_terms WHERE id = ?1",
                [term_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(ended_at, 1200.0);
        assert_eq!(reason, "superseded");
    }
}
