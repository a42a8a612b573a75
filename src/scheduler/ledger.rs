use crate::error::Result;
use crate::pipeline::{PipelineExecutionResult, RunContext};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Success,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => RunState::Success,
            "failed" => RunState::Failed,
            _ => RunState::Running,
        }
    }

    /// Terminal runs are not picked up again by the scheduler
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub dag_id: String,
    pub logical_date: String,
    pub run_id: String,
    pub state: RunState,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub step: String,
    pub state: String,
    pub attempts: u32,
    pub message: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// SQLite record of every scheduled run and its step attempts
pub struct RunLedger {
    conn: Connection,
}

impl RunLedger {
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dag_runs (
                dag_id        TEXT NOT NULL,
                logical_date  TEXT NOT NULL,
                run_id        TEXT NOT NULL,
                state         TEXT NOT NULL,
                started_at    TEXT NOT NULL,
                finished_at   TEXT,
                PRIMARY KEY (dag_id, logical_date)
            );
            CREATE TABLE IF NOT EXISTS task_instances (
                run_id    TEXT NOT NULL,
                step      TEXT NOT NULL,
                state     TEXT NOT NULL,
                attempts  INTEGER NOT NULL,
                message   TEXT,
                metadata  TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (run_id, step)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Mark a run as started, replacing any earlier attempt at the same date
    pub fn begin_run(&self, ctx: &RunContext) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dag_runs (dag_id, logical_date, run_id, state, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)
             ON CONFLICT(dag_id, logical_date) DO UPDATE SET
                run_id=excluded.run_id, state=excluded.state,
                started_at=excluded.started_at, finished_at=NULL",
            params![
                ctx.dag_id(),
                date_key(ctx.logical_date()),
                ctx.run_id().to_string(),
                RunState::Running.as_str(),
                date_key(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Store the final state of a run together with one row per step
    pub fn finish_run(&mut self, result: &PipelineExecutionResult) -> Result<()> {
        let ctx = &result.context;
        let run_id = ctx.run_id().to_string();
        let state = if result.success {
            RunState::Success
        } else {
            RunState::Failed
        };
        let finished = result.completed_at.unwrap_or_else(Utc::now);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO dag_runs (dag_id, logical_date, run_id, state, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(dag_id, logical_date) DO UPDATE SET
                run_id=excluded.run_id, state=excluded.state, finished_at=excluded.finished_at",
            params![
                ctx.dag_id(),
                date_key(ctx.logical_date()),
                run_id,
                state.as_str(),
                date_key(result.started_at),
                date_key(finished),
            ],
        )?;
        for outcome in &result.steps {
            let mut metadata = BTreeMap::new();
            if let Some(step_result) = &outcome.result {
                metadata.extend(step_result.metadata.clone());
                if let Some(written) = &step_result.output {
                    metadata.insert("rows".to_string(), written.rows.to_string());
                    metadata.insert("bytes".to_string(), written.bytes.to_string());
                    metadata.insert("sha256".to_string(), written.sha256.clone());
                }
            }
            tx.execute(
                "INSERT OR REPLACE INTO task_instances (run_id, step, state, attempts, message, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    outcome.step,
                    outcome.status.as_str(),
                    outcome.attempts as i64,
                    outcome
                        .error
                        .clone()
                        .or_else(|| outcome.result.as_ref().map(|r| r.message.clone())),
                    serde_json::to_string(&metadata)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn state_of(&self, dag_id: &str, logical_date: DateTime<Utc>) -> Result<Option<RunState>> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM dag_runs WHERE dag_id = ?1 AND logical_date = ?2",
                params![dag_id, date_key(logical_date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.map(|s| RunState::parse(&s)))
    }

    pub fn is_terminal(&self, dag_id: &str, logical_date: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .state_of(dag_id, logical_date)?
            .map(|s| s.is_terminal())
            .unwrap_or(false))
    }

    /// Most recent runs by logical date, newest first
    pub fn recent_runs(&self, dag_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT dag_id, logical_date, run_id, state, started_at, finished_at
             FROM dag_runs WHERE dag_id = ?1
             ORDER BY logical_date DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![dag_id, limit as i64], |row| {
            let state: String = row.get(3)?;
            Ok(RunRecord {
                dag_id: row.get(0)?,
                logical_date: row.get(1)?,
                run_id: row.get(2)?,
                state: RunState::parse(&state),
                started_at: row.get(4)?,
                finished_at: row.get(5)?,
            })
        })?;
        let records = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn task_instances(&self, run_id: &str) -> Result<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT step, state, attempts, message, metadata FROM task_instances
             WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let metadata: String = row.get(4)?;
            Ok((
                TaskRecord {
                    step: row.get(0)?,
                    state: row.get(1)?,
                    attempts: row.get::<_, i64>(2)? as u32,
                    message: row.get(3)?,
                    metadata: BTreeMap::new(),
                },
                metadata,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, metadata) = row?;
            record.metadata = serde_json::from_str(&metadata)?;
            records.push(record);
        }
        Ok(records)
    }
}

fn date_key(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
