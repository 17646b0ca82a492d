use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use gridmarket_agents::{ReportSink, SinkError};
use gridmarket_models::{AgentId, TickReport};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StoreError;
use crate::schema::REPORT_SCHEMA_DDL;

/// Settled tick reports in SQLite.
///
/// File-backed stores use WAL so reports can be inspected while a run is
/// still writing.
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(REPORT_SCHEMA_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(REPORT_SCHEMA_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Persist one report atomically. Writing the same tick again replaces it.
    pub fn write_report(&self, run_id: &str, report: &TickReport) -> Result<(), StoreError> {
        let report_json = serde_json::to_string(report)?;
        let tick = report.tick as i64;
        let settled_at = report.settled_at.to_rfc3339();
        let snapshot = &report.snapshot;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO runs (run_id, started_at) VALUES (?1, ?2)",
            params![run_id, settled_at],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO ticks \
             (run_id, tick, settled_at, average_price, renewable_ratio, market_concentration, \
              carbon_tax_rate, total_fines, report_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                tick,
                settled_at,
                snapshot.average_price,
                snapshot.renewable_ratio,
                snapshot.market_concentration,
                snapshot.carbon_tax_rate,
                report.total_fines(),
                report_json,
            ],
        )?;
        for table in ["agent_deltas", "violations", "rejected_actions"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE run_id = ?1 AND tick = ?2"),
                params![run_id, tick],
            )?;
        }
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO agent_deltas \
                 (run_id, tick, agent_id, kind, resources_before, resources_after, profit_delta) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for delta in &report.agent_deltas {
                stmt.execute(params![
                    run_id,
                    tick,
                    delta.agent_id,
                    delta.kind.as_str(),
                    delta.resources_before,
                    delta.resources_after,
                    delta.profit_delta,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO violations (run_id, tick, agent_id, kind, fine_amount) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for violation in &report.violations {
                stmt.execute(params![
                    run_id,
                    tick,
                    violation.agent_id,
                    violation.kind.as_str(),
                    violation.fine_amount,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO rejected_actions (run_id, tick, agent_id, action, reason) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for rejected in &report.rejected_actions {
                stmt.execute(params![
                    run_id,
                    tick,
                    rejected.agent_id,
                    serde_json::to_string(&rejected.action)?,
                    rejected.reason,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn runs(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT run_id FROM runs ORDER BY started_at, run_id")?;
        let runs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(runs)
    }

    pub fn tick_count(&self, run_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ticks WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn violation_count(&self, run_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM violations WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total fines per agent over a run, largest first.
    pub fn fines_by_agent(&self, run_id: &str) -> Result<Vec<(AgentId, f64)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT agent_id, SUM(fine_amount) AS total FROM violations \
             WHERE run_id = ?1 GROUP BY agent_id ORDER BY total DESC, agent_id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn load_report(&self, run_id: &str, tick: u64) -> Result<Option<TickReport>, StoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT report_json FROM ticks WHERE run_id = ?1 AND tick = ?2",
                params![run_id, tick as i64],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }
}

/// [`ReportSink`] writing every report of one run into a [`SqliteReportStore`].
pub struct SqliteReportSink {
    store: Arc<SqliteReportStore>,
    run_id: String,
}

impl SqliteReportSink {
    pub fn new(store: Arc<SqliteReportStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[async_trait]
impl ReportSink for SqliteReportSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn emit(&self, report: &TickReport) -> Result<(), SinkError> {
        self.store
            .write_report(&self.run_id, report)
            .map_err(|e| SinkError::Backend(e.to_string()))?;
        debug!(run = %self.run_id, tick = report.tick, "Report persisted");
        Ok(())
    }
}
