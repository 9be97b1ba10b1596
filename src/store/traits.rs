//! Store traits — async interfaces over status records and client progress.
//!
//! Handlers and the dispatcher only see these traits. `LibSqlBackend`
//! implements both; tests wrap it to observe call order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::status::{
    Gate, NewStatusRecord, Outcome, PRIMARY_PROCESS_STATE, ProgressStatus, ProgressUpdate,
    StatusRecord,
};

/// Predicate over `process_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStateFilter {
    Eq(i64),
    Ne(i64),
}

/// Conjunctive filter over status records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFilter {
    pub id: Option<String>,
    pub email: Option<String>,
    pub process: Option<String>,
    pub formation_prefix: Option<String>,
    pub process_state: Option<ProcessStateFilter>,
    pub outcome: Option<Outcome>,
    /// Matches when `data` equals any of the values.
    pub data_in: Option<Vec<String>>,
}

impl StatusFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records selected for one dispatch batch.
    pub fn dispatchable(formation_prefix: &str, gate: Gate) -> Self {
        let process_state = match gate {
            Gate::Primary => ProcessStateFilter::Eq(PRIMARY_PROCESS_STATE),
            Gate::Secondary => ProcessStateFilter::Ne(PRIMARY_PROCESS_STATE),
        };
        Self::new()
            .outcome(Outcome::Scheduled)
            .formation_prefix(formation_prefix)
            .process_state(process_state)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }

    pub fn formation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.formation_prefix = Some(prefix.into());
        self
    }

    pub fn process_state(mut self, filter: ProcessStateFilter) -> Self {
        self.process_state = Some(filter);
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn data_in<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_in = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Field changes applied by `update_status`. `None` leaves a column alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub outcome: Option<Outcome>,
    pub executed: Option<DateTime<Utc>>,
    pub process_state: Option<i64>,
}

impl StatusUpdate {
    /// Terminal success stamped at `at`.
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            outcome: Some(Outcome::Completed),
            executed: Some(at),
            process_state: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outcome.is_none() && self.executed.is_none() && self.process_state.is_none()
    }
}

/// Persistence over status records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert one record and return it with its generated id.
    async fn create_status(&self, record: &NewStatusRecord) -> Result<StatusRecord, DatabaseError>;

    /// Insert several records atomically: all or none.
    async fn bulk_create_status(
        &self,
        records: &[NewStatusRecord],
    ) -> Result<Vec<StatusRecord>, DatabaseError>;

    /// Get a record by id.
    async fn get_status(&self, id: &str) -> Result<Option<StatusRecord>, DatabaseError>;

    /// All records matching the filter, in insertion order.
    async fn query_status(&self, filter: &StatusFilter)
    -> Result<Vec<StatusRecord>, DatabaseError>;

    /// Whether at least one record matches.
    async fn status_exists(&self, filter: &StatusFilter) -> Result<bool, DatabaseError> {
        Ok(!self.query_status(filter).await?.is_empty())
    }

    /// Apply `update` to every matching record. Returns the number changed.
    async fn update_status(
        &self,
        filter: &StatusFilter,
        update: &StatusUpdate,
    ) -> Result<usize, DatabaseError>;

    /// Point update by id. Returns whether the record changed.
    async fn update_status_by_id(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .update_status(&StatusFilter::new().id(id), update)
            .await?;
        Ok(changed > 0)
    }
}

/// Persistence over per-client progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Insert a progress record. Fails with `Constraint` if the email exists.
    async fn insert_progress(&self, progress: &ProgressStatus) -> Result<(), DatabaseError>;

    /// Case-insensitive lookup by email.
    async fn get_progress(&self, email: &str) -> Result<Option<ProgressStatus>, DatabaseError>;

    /// Apply `update` to the client's record. Returns the number of rows changed.
    async fn update_progress(
        &self,
        email: &str,
        update: &ProgressUpdate,
    ) -> Result<usize, DatabaseError>;
}
