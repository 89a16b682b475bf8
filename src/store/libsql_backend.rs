//! libSQL backend: durable `JobStore` implementation.
//!
//! Supports local file and in-memory databases. Claims and status updates
//! are serialised under one lock and written as compare-and-set updates
//! (`WHERE id = ? AND status = ?`), so a job can be claimed at most once.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Job, JobFilter, JobStatus, JobStore};
use crate::value::Payload;

/// How many times `claim_next` retries after losing a compare-and-set race.
const MAX_CLAIM_ATTEMPTS: usize = 3;

const JOB_COLUMNS: &str = "id, task_key, status, payload, result, created_at, updated_at";

/// libSQL job store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Held across the read-then-write of every status transition.
    transitions: Mutex<()>,
    /// Last `created_at` handed out; creation timestamps strictly increase.
    last_created: std::sync::Mutex<DateTime<Utc>>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            transitions: Mutex::new(()),
            last_created: std::sync::Mutex::new(DateTime::<Utc>::MIN_UTC),
        };
        migrations::run_migrations(backend.conn()).await?;
        backend.seed_clock().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start the creation clock after the newest stored job so FIFO order
    /// survives a restart with a clock that went backwards.
    async fn seed_clock(&self) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT MAX(created_at) FROM jobs", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("seed_clock: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("seed_clock: {e}")))?
        else {
            return Ok(());
        };
        // NULL when the table is empty.
        if let Some(newest) = optional_text(&row, 0, "MAX(created_at)")? {
            let mut last = self
                .last_created
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *last = parse_datetime(&newest)?;
        }
        Ok(())
    }

    /// Next creation timestamp: now, or one microsecond past the previous
    /// one if the clock has not moved.
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self
            .last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ts = advance_past(*last);
        *last = ts;
        ts
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn collect_jobs(mut rows: libsql::Rows) -> Result<Vec<Job>, DatabaseError> {
    let mut jobs = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("read job row: {e}")))?
    {
        jobs.push(row_to_job(&row)?);
    }
    Ok(jobs)
}

fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Current time, bumped to strictly after `previous` when needed.
fn advance_past(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("timestamp {s:?}: {e}")))
}

/// Read a nullable TEXT column: `None` only for SQL NULL.
fn optional_text(row: &libsql::Row, idx: i32, column: &str) -> Result<Option<String>, DatabaseError> {
    match row
        .get_value(idx)
        .map_err(|e| DatabaseError::Query(format!("{column}: {e}")))?
    {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(text) => Ok(Some(text)),
        other => Err(DatabaseError::Serialization(format!(
            "{column}: expected text or NULL, found {other:?}"
        ))),
    }
}

fn encode_payload(payload: &Payload) -> Result<String, DatabaseError> {
    if let Some((key, _)) = payload.iter().find(|(_, value)| !value.is_finite()) {
        return Err(DatabaseError::Serialization(format!(
            "encode payload: field '{key}' holds a non-finite number"
        )));
    }
    serde_json::to_string(payload)
        .map_err(|e| DatabaseError::Serialization(format!("encode payload: {e}")))
}

fn decode_payload(raw: &str) -> Result<Payload, DatabaseError> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("decode payload: {e}")))
}

/// Map a libsql Row to a Job. Column order matches `JOB_COLUMNS`.
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("job.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("job.id parse: {e}")))?;

    let task_key: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("job.task_key: {e}")))?;

    let status_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("job.status: {e}")))?;
    let status: JobStatus = status_str
        .parse()
        .map_err(DatabaseError::Serialization)?;

    let payload_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("job.payload: {e}")))?;
    let payload = decode_payload(&payload_str)?;

    let result = optional_text(row, 4, "job.result")?
        .map(|raw| decode_payload(&raw))
        .transpose()?;

    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("job.created_at: {e}")))?;
    let updated_str: String = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("job.updated_at: {e}")))?;

    Ok(Job {
        id,
        task_key,
        payload,
        status,
        result,
        created_at: parse_datetime(&created_str)?,
        updated_at: parse_datetime(&updated_str)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn create(&self, task_key: &str, payload: &Payload) -> Result<Job, DatabaseError> {
        let id = Uuid::new_v4();
        let payload_json = encode_payload(payload)?;
        let now = self.next_created_at();
        let ts = format_datetime(&now);

        self.conn()
            .execute(
                "INSERT INTO jobs (id, task_key, status, payload, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    task_key,
                    JobStatus::Pending.as_str(),
                    payload_json,
                    ts.clone(),
                    ts
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create job: {e}")))?;

        Ok(Job {
            id,
            task_key: task_key.to_string(),
            payload: payload.clone(),
            status: JobStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Job, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get job: {e}")))?;

        collect_jobs(rows)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "job".to_string(),
                id: id.to_string(),
            })
    }

    async fn oldest_pending(&self) -> Result<Option<Job>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC LIMIT 1"
                ),
                params![JobStatus::Pending.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("oldest_pending: {e}")))?;

        Ok(collect_jobs(rows).await?.into_iter().next())
    }

    async fn claim_next(&self) -> Result<Option<Job>, DatabaseError> {
        let _guard = self.transitions.lock().await;

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some(job) = self.oldest_pending().await? else {
                return Ok(None);
            };

            let now = advance_past(job.updated_at);
            let affected = self
                .conn()
                .execute(
                    "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                    params![
                        JobStatus::Running.as_str(),
                        format_datetime(&now),
                        job.id.to_string(),
                        JobStatus::Pending.as_str()
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("claim job: {e}")))?;

            if affected == 1 {
                return Ok(Some(Job {
                    status: JobStatus::Running,
                    updated_at: now,
                    ..job
                }));
            }
            debug!(job_id = %job.id, "Job claimed elsewhere, retrying");
        }

        Ok(None)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<&Payload>,
    ) -> Result<Job, DatabaseError> {
        let _guard = self.transitions.lock().await;

        let current = self.get(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(DatabaseError::InvalidTransition {
                id,
                state: current.status,
                target: status,
            });
        }

        let result = if status.is_terminal() {
            Some(result.cloned().unwrap_or_default())
        } else {
            None
        };
        let result_json = result.as_ref().map(encode_payload).transpose()?;
        let now = advance_past(current.updated_at);

        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, result = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
                params![
                    status.as_str(),
                    result_json,
                    format_datetime(&now),
                    id.to_string(),
                    current.status.as_str()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?;

        if affected == 0 {
            let observed = self.get(id).await?;
            return Err(DatabaseError::InvalidTransition {
                id,
                state: observed.status,
                target: status,
            });
        }

        Ok(Job {
            status,
            result,
            updated_at: now,
            ..current
        })
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = match filter.status {
            Some(status) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
                        ),
                        params![status.as_str(), limit],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1"
                        ),
                        params![limit],
                    )
                    .await
            }
        }
        .map_err(|e| DatabaseError::Query(format!("list_jobs: {e}")))?;

        collect_jobs(rows).await
    }

    async fn count_by_status(&self) -> Result<BTreeMap<JobStatus, usize>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT status, COUNT(*) FROM jobs GROUP BY status", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?;

        let mut counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?
        {
            let status_str: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("count.status: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("count.value: {e}")))?;
            let status: JobStatus = status_str.parse().map_err(DatabaseError::Serialization)?;
            counts.insert(status, count.max(0) as usize);
        }
        Ok(counts)
    }
}
