//! Store-backed annual report reminder scheduling.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Months, Utc};

use crate::collaborators::ReminderScheduler;
use crate::error::CollaboratorError;
use crate::status::{
    ANNUAL_REPORT_REMINDER, AnnualReportDetails, FORMATION_DAILY, NewStatusRecord, Outcome,
};
use crate::store::StatusStore;

/// Writes next year's reminder as a pending daily-formation record.
pub struct StoreReminderScheduler {
    store: Arc<dyn StatusStore>,
}

impl StoreReminderScheduler {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReminderScheduler for StoreReminderScheduler {
    async fn schedule_next_annual_report_reminder(
        &self,
        email: &str,
        report_name: &str,
        report_state: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        let now = Utc::now();
        let details = AnnualReportDetails {
            year: (now.year() + 1).to_string(),
            name: report_name.to_string(),
            state: report_state.map(String::from),
        };
        let executed = now.checked_add_months(Months::new(12)).unwrap_or(now);

        let reminder = self
            .store
            .create_status(
                &NewStatusRecord::new(email, ANNUAL_REPORT_REMINDER, FORMATION_DAILY)
                    .with_outcome(Outcome::AWAITING)
                    .with_data(details.to_string())
                    .executed_at(executed),
            )
            .await?;

        tracing::info!(
            email,
            reminder_id = %reminder.id,
            data = %reminder.data,
            "Next annual report reminder scheduled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, StatusFilter};

    #[tokio::test]
    async fn writes_next_year_reminder() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let scheduler = StoreReminderScheduler::new(store.clone());

        scheduler
            .schedule_next_annual_report_reminder("a@x.com", "Delaware Franchise Tax", Some("DE"))
            .await
            .unwrap();

        let reminders = store
            .query_status(&StatusFilter::new().process(ANNUAL_REPORT_REMINDER))
            .await
            .unwrap();
        assert_eq!(reminders.len(), 1);

        let reminder = &reminders[0];
        let next_year = Utc::now().year() + 1;
        assert_eq!(
            reminder.data,
            format!("{next_year} --- Delaware Franchise Tax --- DE")
        );
        assert_eq!(reminder.formation_type, FORMATION_DAILY);
        assert!(reminder.outcome.is_awaiting());
        assert!(reminder.executed > Utc::now());
    }
}
