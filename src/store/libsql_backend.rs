//! libSQL backend — async `StatusStore` and `ProgressStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; multi-record inserts run in a transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params, params_from_iter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::status::{
    NewStatusRecord, Outcome, ProgressStatus, ProgressUpdate, QuestionnaireStatus, StatusRecord,
};
use crate::store::migrations;
use crate::store::traits::{
    ProcessStateFilter, ProgressStore, StatusFilter, StatusStore, StatusUpdate,
};

const STATUS_COLUMNS: &str =
    "id, email, process, formation_type, process_state, outcome, data, executed";

const PROGRESS_COLUMNS: &str =
    "email, questionnaire_status, bookkeeping_setup_status, tax_setup_status, updated_at";

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
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

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
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

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Run all pending schema migrations.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    warn!(value = s, "Unparseable timestamp, falling back to the minimum date");
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}

/// Map a libsql Row to a StatusRecord. Column order matches STATUS_COLUMNS.
fn row_to_status(row: &libsql::Row) -> Result<StatusRecord, libsql::Error> {
    let executed: String = row.get(7)?;
    Ok(StatusRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        process: row.get(2)?,
        formation_type: row.get(3)?,
        process_state: row.get(4)?,
        outcome: Outcome::from_code(row.get::<i64>(5)?),
        data: row.get::<String>(6).unwrap_or_default(),
        executed: parse_datetime(&executed),
    })
}

/// Map a libsql Row to a ProgressStatus. Column order matches PROGRESS_COLUMNS.
fn row_to_progress(row: &libsql::Row) -> Result<ProgressStatus, DatabaseError> {
    let questionnaire: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("progress row parse: {e}")))?;
    let updated_at: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("progress row parse: {e}")))?;
    Ok(ProgressStatus {
        email: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("progress row parse: {e}")))?,
        questionnaire_status: questionnaire
            .parse::<QuestionnaireStatus>()
            .map_err(DatabaseError::Serialization)?,
        bookkeeping_setup_status: row.get::<Option<String>>(2).ok().flatten(),
        tax_setup_status: row.get::<Option<String>>(3).ok().flatten(),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Render a filter into a WHERE clause and its positional parameters.
fn where_clause(filter: &StatusFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(id) = &filter.id {
        clauses.push("id = ?".into());
        values.push(Value::Text(id.clone()));
    }
    if let Some(email) = &filter.email {
        clauses.push("email = ?".into());
        values.push(Value::Text(email.clone()));
    }
    if let Some(process) = &filter.process {
        clauses.push("process = ?".into());
        values.push(Value::Text(process.clone()));
    }
    if let Some(prefix) = &filter.formation_prefix {
        // substr avoids LIKE wildcard escaping in the prefix.
        clauses.push("substr(formation_type, 1, length(?)) = ?".into());
        values.push(Value::Text(prefix.clone()));
        values.push(Value::Text(prefix.clone()));
    }
    match filter.process_state {
        Some(ProcessStateFilter::Eq(v)) => {
            clauses.push("process_state = ?".into());
            values.push(Value::Integer(v));
        }
        Some(ProcessStateFilter::Ne(v)) => {
            clauses.push("process_state != ?".into());
            values.push(Value::Integer(v));
        }
        None => {}
    }
    if let Some(outcome) = filter.outcome {
        clauses.push("outcome = ?".into());
        values.push(Value::Integer(outcome.code()));
    }
    if let Some(data) = &filter.data_in {
        if data.is_empty() {
            clauses.push("0".into());
        } else {
            let placeholders = vec!["?"; data.len()].join(", ");
            clauses.push(format!("data IN ({placeholders})"));
            values.extend(data.iter().cloned().map(Value::Text));
        }
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn materialize(record: &NewStatusRecord, now: DateTime<Utc>) -> StatusRecord {
    StatusRecord {
        id: Uuid::new_v4().to_string(),
        email: record.email.clone(),
        process: record.process.clone(),
        formation_type: record.formation_type.clone(),
        process_state: record.process_state,
        outcome: record.outcome,
        data: record.data.clone(),
        executed: record.executed.unwrap_or(now),
    }
}

async fn insert_status_row(conn: &Connection, record: &StatusRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO status_records (id, email, process, formation_type, process_state, outcome, data, executed) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id.clone(),
            record.email.clone(),
            record.process.clone(),
            record.formation_type.clone(),
            record.process_state,
            record.outcome.code(),
            record.data.clone(),
            record.executed.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_status: {e}")))?;
    Ok(())
}

// ── Status records ──────────────────────────────────────────────────

#[async_trait]
impl StatusStore for LibSqlBackend {
    async fn create_status(&self, record: &NewStatusRecord) -> Result<StatusRecord, DatabaseError> {
        let stored = materialize(record, Utc::now());
        insert_status_row(self.conn(), &stored).await?;
        debug!(record_id = %stored.id, process = %stored.process, "Status record inserted");
        Ok(stored)
    }

    async fn bulk_create_status(
        &self,
        records: &[NewStatusRecord],
    ) -> Result<Vec<StatusRecord>, DatabaseError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let stored: Vec<StatusRecord> = records.iter().map(|r| materialize(r, now)).collect();

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("bulk_create_status begin: {e}")))?;

        for record in &stored {
            // Dropping `tx` on error rolls the batch back.
            insert_status_row(&tx, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("bulk_create_status commit: {e}")))?;

        debug!(count = stored.len(), "Status records bulk inserted");
        Ok(stored)
    }

    async fn get_status(&self, id: &str) -> Result<Option<StatusRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STATUS_COLUMNS} FROM status_records WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_status(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_status row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_status: {e}"))),
        }
    }

    async fn query_status(
        &self,
        filter: &StatusFilter,
    ) -> Result<Vec<StatusRecord>, DatabaseError> {
        let (clause, values) = where_clause(filter);
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STATUS_COLUMNS} FROM status_records{clause} ORDER BY rowid"),
                params_from_iter(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("query_status: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_status(&row) {
                    Ok(r) => records.push(r),
                    Err(e) => warn!("Skipping status record row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("query_status: {e}"))),
            }
        }
        Ok(records)
    }

    async fn status_exists(&self, filter: &StatusFilter) -> Result<bool, DatabaseError> {
        let (clause, values) = where_clause(filter);
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT EXISTS(SELECT 1 FROM status_records{clause})"),
                params_from_iter(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("status_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let exists: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("status_exists: {e}")))?;
                Ok(exists != 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("status_exists: {e}"))),
        }
    }

    async fn update_status(
        &self,
        filter: &StatusFilter,
        update: &StatusUpdate,
    ) -> Result<usize, DatabaseError> {
        if update.is_empty() {
            return Ok(0);
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(outcome) = update.outcome {
            sets.push("outcome = ?");
            values.push(Value::Integer(outcome.code()));
        }
        if let Some(executed) = update.executed {
            sets.push("executed = ?");
            values.push(Value::Text(executed.to_rfc3339()));
        }
        if let Some(process_state) = update.process_state {
            sets.push("process_state = ?");
            values.push(Value::Integer(process_state));
        }

        let (clause, filter_values) = where_clause(filter);
        values.extend(filter_values);

        let changed = self
            .conn()
            .execute(
                &format!("UPDATE status_records SET {}{clause}", sets.join(", ")),
                params_from_iter(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?;

        debug!(changed, "Status records updated");
        Ok(changed as usize)
    }
}

// ── Progress ────────────────────────────────────────────────────────

#[async_trait]
impl ProgressStore for LibSqlBackend {
    async fn insert_progress(&self, progress: &ProgressStatus) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO progress_status (email, questionnaire_status, bookkeeping_setup_status, tax_setup_status, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    progress.email.clone(),
                    progress.questionnaire_status.as_str(),
                    opt_text(progress.bookkeeping_setup_status.as_deref()),
                    opt_text(progress.tax_setup_status.as_deref()),
                    progress.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!("insert_progress: {msg}"))
                } else {
                    DatabaseError::Query(format!("insert_progress: {msg}"))
                }
            })?;
        Ok(())
    }

    async fn get_progress(&self, email: &str) -> Result<Option<ProgressStatus>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROGRESS_COLUMNS} FROM progress_status WHERE email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_progress(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_progress: {e}"))),
        }
    }

    async fn update_progress(
        &self,
        email: &str,
        update: &ProgressUpdate,
    ) -> Result<usize, DatabaseError> {
        if update.is_empty() {
            return Ok(0);
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(status) = update.questionnaire_status {
            sets.push("questionnaire_status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(bookkeeping) = &update.bookkeeping_setup_status {
            sets.push("bookkeeping_setup_status = ?");
            values.push(Value::Text(bookkeeping.clone()));
        }
        if let Some(tax) = &update.tax_setup_status {
            sets.push("tax_setup_status = ?");
            values.push(Value::Text(tax.clone()));
        }
        sets.push("updated_at = ?");
        values.push(Value::Text(Utc::now().to_rfc3339()));
        values.push(Value::Text(email.to_string()));

        // The email column is declared COLLATE NOCASE.
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE progress_status SET {} WHERE email = ?",
                    sets.join(", ")
                ),
                params_from_iter(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_progress: {e}")))?;

        debug!(email, changed, "Progress updated");
        Ok(changed as usize)
    }
}
