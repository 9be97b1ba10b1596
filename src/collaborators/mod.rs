//! External collaborators invoked by handlers.
//!
//! Each concern is a small async trait so handlers can be exercised with
//! recording fakes. Production implementations:
//! - `email`: transactional email over SMTP
//! - `automation`: survey, folder and NPS endpoints over HTTP
//! - `reminders`: next annual-report reminder written to the status store

pub mod automation;
pub mod email;
pub mod reminders;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CollaboratorError;

pub use automation::{AutomationClient, AutomationConfig};
pub use email::{SmtpConfig, SmtpMailer};
pub use reminders::StoreReminderScheduler;

/// Transactional email template sent when a payment fails.
pub const PAYMENT_ERROR_TEMPLATE: &str =
    "[Action required] - Please update your payment information";

/// Outbound transactional email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_transactional_email(
        &self,
        email: &str,
        template: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Survey delivery and survey-sequence scheduling.
#[async_trait]
pub trait SurveyScheduler: Send + Sync {
    async fn send_client_onboarding_survey(&self, email: &str) -> Result<(), CollaboratorError>;

    async fn schedule_onboarding_survey_sequence(
        &self,
        email: &str,
    ) -> Result<(), CollaboratorError>;

    async fn schedule_next_running_survey_sequence(
        &self,
        email: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Client document folder provisioning.
#[async_trait]
pub trait FolderProvisioner: Send + Sync {
    async fn create_dropbox_folders(&self, email: &str) -> Result<(), CollaboratorError>;
}

/// Global NPS aggregations.
#[async_trait]
pub trait NpsCalculator: Send + Sync {
    async fn calculate_running_nps(&self) -> Result<(), CollaboratorError>;

    async fn calculate_onboarding_nps(&self) -> Result<(), CollaboratorError>;
}

/// Schedules the reminder that follows an uploaded annual report.
#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule_next_annual_report_reminder(
        &self,
        email: &str,
        report_name: &str,
        report_state: Option<&str>,
    ) -> Result<(), CollaboratorError>;
}

/// Every collaborator a handler may call.
#[derive(Clone)]
pub struct Collaborators {
    pub mailer: Arc<dyn Mailer>,
    pub surveys: Arc<dyn SurveyScheduler>,
    pub folders: Arc<dyn FolderProvisioner>,
    pub nps: Arc<dyn NpsCalculator>,
    pub reminders: Arc<dyn ReminderScheduler>,
}
