//! Status records, the persisted unit of scheduled work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Formation tag for records owned by the system dispatcher.
pub const FORMATION_SYSTEM: &str = "Hyke System";
/// Formation tag for the daily email and reminder jobs.
pub const FORMATION_DAILY: &str = "Hyke Daily";
/// Formation tag for records mirrored into the CRM.
pub const FORMATION_SALESFORCE: &str = "Hyke Salesforce";

/// `process_state` value that routes a record to the primary batch.
pub const PRIMARY_PROCESS_STATE: i64 = 1;

/// Outcome of a status record, persisted as an integer code.
///
/// `-1` means pending. The awaiting sentinel used by reminder and NPS
/// matchers shares that code; records that wait on an event are kept away
/// from the system dispatcher by their formation tag, not their outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum Outcome {
    /// Pending, eligible for dispatch.
    Scheduled,
    /// Terminal success.
    Completed,
    /// Any code this crate does not interpret. Never dispatched.
    Other(i64),
}

impl Outcome {
    /// Sentinel matched by reminder and NPS guards.
    pub const AWAITING: Outcome = Outcome::Scheduled;

    pub fn code(self) -> i64 {
        match self {
            Outcome::Scheduled => -1,
            Outcome::Completed => 1,
            Outcome::Other(code) => code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => Outcome::Scheduled,
            1 => Outcome::Completed,
            other => Outcome::Other(other),
        }
    }

    pub fn is_awaiting(self) -> bool {
        self == Outcome::AWAITING
    }
}

impl From<Outcome> for i64 {
    fn from(outcome: Outcome) -> Self {
        outcome.code()
    }
}

impl From<i64> for Outcome {
    fn from(code: i64) -> Self {
        Outcome::from_code(code)
    }
}

/// Which of the two per-run batches a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// `process_state == 1`: client-lifecycle transitions.
    Primary,
    /// Everything else: reminder resolution and NPS aggregation.
    Secondary,
}

impl Gate {
    pub fn of(process_state: i64) -> Self {
        if process_state == PRIMARY_PROCESS_STATE {
            Gate::Primary
        } else {
            Gate::Secondary
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Primary => write!(f, "primary"),
            Gate::Secondary => write!(f, "secondary"),
        }
    }
}

/// A persisted status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: String,
    pub email: String,
    pub process: String,
    pub formation_type: String,
    pub process_state: i64,
    pub outcome: Outcome,
    pub data: String,
    pub executed: DateTime<Utc>,
}

impl StatusRecord {
    pub fn gate(&self) -> Gate {
        Gate::of(self.process_state)
    }
}

/// A status record that has not been inserted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusRecord {
    pub email: String,
    pub process: String,
    pub formation_type: String,
    pub process_state: i64,
    pub outcome: Outcome,
    pub data: String,
    /// `None` lets the store stamp the insert time.
    pub executed: Option<DateTime<Utc>>,
}

impl NewStatusRecord {
    pub fn new(
        email: impl Into<String>,
        process: impl Into<String>,
        formation_type: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            process: process.into(),
            formation_type: formation_type.into(),
            process_state: PRIMARY_PROCESS_STATE,
            outcome: Outcome::Scheduled,
            data: String::new(),
            executed: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_process_state(mut self, process_state: i64) -> Self {
        self.process_state = process_state;
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn executed_at(mut self, executed: DateTime<Utc>) -> Self {
        self.executed = Some(executed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_codes() {
        assert_eq!(Outcome::Scheduled.code(), -1);
        assert_eq!(Outcome::Completed.code(), 1);
        assert_eq!(Outcome::from_code(1), Outcome::Completed);
        assert_eq!(Outcome::from_code(0), Outcome::Other(0));
        assert!(Outcome::from_code(-1).is_awaiting());
        assert!(!Outcome::Completed.is_awaiting());
    }

    #[test]
    fn outcome_serializes_as_code() {
        let json = serde_json::to_string(&Outcome::Completed).unwrap();
        assert_eq!(json, "1");
        let parsed: Outcome = serde_json::from_str("-1").unwrap();
        assert_eq!(parsed, Outcome::Scheduled);
    }

    #[test]
    fn gate_partition() {
        assert_eq!(Gate::of(1), Gate::Primary);
        assert_eq!(Gate::of(2), Gate::Secondary);
        assert_eq!(Gate::of(0), Gate::Secondary);
        assert_eq!(Gate::Secondary.to_string(), "secondary");
    }

    #[test]
    fn new_record_defaults() {
        let record = NewStatusRecord::new("a@x.com", "Running flow", FORMATION_SYSTEM);
        assert_eq!(record.process_state, PRIMARY_PROCESS_STATE);
        assert_eq!(record.outcome, Outcome::Scheduled);
        assert!(record.data.is_empty());
        assert!(record.executed.is_none());

        let chained = record.with_process_state(2).with_data("x");
        assert_eq!(chained.process_state, 2);
        assert_eq!(chained.data, "x");
    }
}
