//! Per-client progress state mutated by handlers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping setup marker written when the running flow starts.
pub const BOOKKEEPING_SETUP_COMPLETED: &str = "completed";
/// Tax setup marker written when the running flow starts.
pub const TAX_SETUP_COMPLETED: &str = "completed2";

/// Kickoff questionnaire stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionnaireStatus {
    #[default]
    NotStarted,
    Scheduled,
    Submitted,
    Reschedule,
}

impl QuestionnaireStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionnaireStatus::NotStarted => "not_started",
            QuestionnaireStatus::Scheduled => "scheduled",
            QuestionnaireStatus::Submitted => "submitted",
            QuestionnaireStatus::Reschedule => "reschedule",
        }
    }
}

impl fmt::Display for QuestionnaireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionnaireStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(QuestionnaireStatus::NotStarted),
            "scheduled" => Ok(QuestionnaireStatus::Scheduled),
            "submitted" => Ok(QuestionnaireStatus::Submitted),
            "reschedule" => Ok(QuestionnaireStatus::Reschedule),
            other => Err(format!("unknown questionnaire status: {other}")),
        }
    }
}

/// One client's progress record. Email is unique, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatus {
    pub email: String,
    pub questionnaire_status: QuestionnaireStatus,
    pub bookkeeping_setup_status: Option<String>,
    pub tax_setup_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressStatus {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            questionnaire_status: QuestionnaireStatus::NotStarted,
            bookkeeping_setup_status: None,
            tax_setup_status: None,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update applied to a progress record. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub questionnaire_status: Option<QuestionnaireStatus>,
    pub bookkeeping_setup_status: Option<String>,
    pub tax_setup_status: Option<String>,
}

impl ProgressUpdate {
    pub fn questionnaire(status: QuestionnaireStatus) -> Self {
        Self {
            questionnaire_status: Some(status),
            ..Default::default()
        }
    }

    /// Bookkeeping and tax setup both marked complete.
    pub fn setup_completed() -> Self {
        Self {
            bookkeeping_setup_status: Some(BOOKKEEPING_SETUP_COMPLETED.to_string()),
            tax_setup_status: Some(TAX_SETUP_COMPLETED.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.questionnaire_status.is_none()
            && self.bookkeeping_setup_status.is_none()
            && self.tax_setup_status.is_none()
    }
}
