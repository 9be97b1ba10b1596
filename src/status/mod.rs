//! Domain model: status records, client progress and report payloads.

pub mod annual_report;
pub mod model;
pub mod progress;

pub use annual_report::{ANNUAL_REPORT_REMINDER, AnnualReportDetails};
pub use model::{
    FORMATION_DAILY, FORMATION_SALESFORCE, FORMATION_SYSTEM, Gate, NewStatusRecord, Outcome,
    PRIMARY_PROCESS_STATE, StatusRecord,
};
pub use progress::{ProgressStatus, ProgressUpdate, QuestionnaireStatus};
