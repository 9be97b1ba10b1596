//! One handler per process kind.
//!
//! Each handler receives one status record and the explicit dependencies it
//! may touch. Store and collaborator errors propagate to the dispatcher's
//! per-record guard; the onboarding survey handler alone swallows its own
//! collaborator failure.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::collaborators::{Collaborators, PAYMENT_ERROR_TEMPLATE};
use crate::dispatch::process::ProcessKind;
use crate::error::{DatabaseError, HandlerError};
use crate::status::{
    ANNUAL_REPORT_REMINDER, AnnualReportDetails, FORMATION_DAILY, FORMATION_SALESFORCE,
    FORMATION_SYSTEM, NewStatusRecord, Outcome, ProgressUpdate, QuestionnaireStatus,
    StatusRecord,
};
use crate::store::{ProcessStateFilter, ProgressStore, StatusFilter, StatusStore, StatusUpdate};

/// Daily email job created by the running flow and transition plan handlers.
pub const SCHEDULE_EMAIL: &str = "Schedule Email";
/// Follow-up created when a BK training call is cancelled.
pub const FOLLOWUP_BK_TRAINING: &str = "Followup - BK Training";

const RUNNING_FLOW_EMAIL_DATA: &str = "What's upcoming with Collective?";
const WELCOME_EMAIL_DATA: &str = "Welcome to the Collective community!";

/// `process_state` of the chained second phase of the running flow.
pub const RUNNING_FLOW_SECOND_PHASE: i64 = 2;

/// Behaviour switches for handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerOptions {
    /// Skip follow-up creation when this running flow step already completed.
    pub gate_running_flow_rerun: bool,
}

/// Everything a handler may read or write.
#[derive(Clone)]
pub struct HandlerContext {
    pub statuses: Arc<dyn StatusStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub collaborators: Collaborators,
    pub options: HandlerOptions,
}

/// What a handler did with its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The transition ran.
    Handled,
    /// Nothing was done; the reason is logged.
    Skipped { reason: String },
    /// Nothing was done because the step already completed earlier. Terminal,
    /// like `Handled`.
    AlreadyDone { reason: String },
}

impl HandlerOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        HandlerOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Run the handler for `kind` against `record`.
pub async fn handle(
    kind: ProcessKind,
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    match kind {
        ProcessKind::ClientOnboardingSurvey => client_onboarding_survey(ctx, record).await,
        ProcessKind::PaymentErrorEmail => payment_error_email(ctx, record).await,
        ProcessKind::RunningFlow => running_flow(ctx, record).await,
        ProcessKind::KickoffQuestionnaireCompleted | ProcessKind::KickoffCallScheduled => {
            kickoff(ctx, record, QuestionnaireStatus::Scheduled).await
        }
        ProcessKind::KickoffCallCancelled => {
            kickoff(ctx, record, QuestionnaireStatus::Reschedule).await
        }
        ProcessKind::TransitionPlanSubmitted => transition_plan_submitted(ctx, record).await,
        ProcessKind::BkTrainingCallScheduled => bk_training_call_scheduled(ctx, record).await,
        ProcessKind::BkTrainingCallCancelled => bk_training_call_cancelled(ctx, record).await,
        ProcessKind::AnnualReportUploaded => annual_report_uploaded(ctx, record).await,
        ProcessKind::CalculateNpsRunning => calculate_nps_running(ctx, record).await,
        ProcessKind::CalculateNpsOnboarding => calculate_nps_onboarding(ctx, record).await,
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Set the client's questionnaire status. A missing client is an error.
async fn set_questionnaire(
    ctx: &HandlerContext,
    email: &str,
    status: QuestionnaireStatus,
) -> Result<(), HandlerError> {
    let changed = ctx
        .progress
        .update_progress(email, &ProgressUpdate::questionnaire(status))
        .await?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "progress_status".into(),
            id: email.to_string(),
        }
        .into());
    }
    Ok(())
}

/// CRM copy of an event, carrying the same process name and payload.
fn salesforce_copy(record: &StatusRecord) -> NewStatusRecord {
    NewStatusRecord::new(&record.email, &record.process, FORMATION_SALESFORCE)
        .with_data(&record.data)
}

// ── Primary handlers ────────────────────────────────────────────────

async fn client_onboarding_survey(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    if let Err(e) = ctx
        .collaborators
        .surveys
        .send_client_onboarding_survey(&record.email)
        .await
    {
        error!(
            record_id = %record.id,
            "Can't process onboarding NPS survey: {e}"
        );
    }
    Ok(HandlerOutcome::Handled)
}

async fn payment_error_email(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    ctx.collaborators
        .mailer
        .send_transactional_email(&record.email, PAYMENT_ERROR_TEMPLATE)
        .await?;
    info!(email = %record.email, "Payment information email sent");
    Ok(HandlerOutcome::Handled)
}

async fn running_flow(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    let changed = ctx
        .progress
        .update_progress(&record.email, &ProgressUpdate::setup_completed())
        .await?;
    if changed == 0 {
        warn!(email = %record.email, "No progress record to mark setup completed");
    }

    let has_run_before = ctx
        .statuses
        .status_exists(
            &StatusFilter::new()
                .email(&record.email)
                .process(&record.process)
                .process_state(ProcessStateFilter::Eq(record.process_state))
                .outcome(Outcome::Completed),
        )
        .await?;

    if has_run_before && ctx.options.gate_running_flow_rerun {
        info!(
            email = %record.email,
            "Running flow already completed for this client, not creating follow-ups"
        );
        return Ok(HandlerOutcome::AlreadyDone {
            reason: "running flow already completed".into(),
        });
    }

    let now = Utc::now();
    ctx.statuses
        .bulk_create_status(&[
            NewStatusRecord::new(&record.email, SCHEDULE_EMAIL, FORMATION_DAILY)
                .with_data(RUNNING_FLOW_EMAIL_DATA)
                .executed_at(now + Duration::days(1)),
            NewStatusRecord::new(&record.email, &record.process, FORMATION_SYSTEM)
                .with_process_state(RUNNING_FLOW_SECOND_PHASE),
        ])
        .await?;

    let surveys = &ctx.collaborators.surveys;
    surveys
        .schedule_onboarding_survey_sequence(&record.email)
        .await?;
    surveys
        .schedule_next_running_survey_sequence(&record.email)
        .await?;

    ctx.collaborators
        .folders
        .create_dropbox_folders(&record.email)
        .await?;
    info!(email = %record.email, "Dropbox folders created");

    if has_run_before {
        info!(
            email = %record.email,
            "Running flow has already completed before for this client"
        );
    }

    Ok(HandlerOutcome::Handled)
}

async fn kickoff(
    ctx: &HandlerContext,
    record: &StatusRecord,
    status: QuestionnaireStatus,
) -> Result<HandlerOutcome, HandlerError> {
    set_questionnaire(ctx, &record.email, status).await?;
    ctx.statuses.create_status(&salesforce_copy(record)).await?;
    Ok(HandlerOutcome::Handled)
}

async fn transition_plan_submitted(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    set_questionnaire(ctx, &record.email, QuestionnaireStatus::Submitted).await?;

    let now = Utc::now();
    ctx.statuses
        .bulk_create_status(&[
            NewStatusRecord::new(&record.email, &record.process, FORMATION_SALESFORCE),
            NewStatusRecord::new(&record.email, SCHEDULE_EMAIL, FORMATION_DAILY)
                .with_data(WELCOME_EMAIL_DATA)
                .executed_at(now + Duration::days(1)),
        ])
        .await?;
    Ok(HandlerOutcome::Handled)
}

async fn bk_training_call_scheduled(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    ctx.statuses
        .create_status(
            &NewStatusRecord::new(
                &record.email,
                ProcessKind::BkTrainingCallScheduled.name(),
                FORMATION_SALESFORCE,
            )
            .with_data(&record.data),
        )
        .await?;
    Ok(HandlerOutcome::Handled)
}

async fn bk_training_call_cancelled(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    set_questionnaire(ctx, &record.email, QuestionnaireStatus::Reschedule).await?;

    let now = Utc::now();
    ctx.statuses
        .bulk_create_status(&[
            NewStatusRecord::new(&record.email, FOLLOWUP_BK_TRAINING, FORMATION_DAILY)
                .executed_at(now + Duration::days(2)),
            NewStatusRecord::new(
                &record.email,
                ProcessKind::BkTrainingCallCancelled.name(),
                FORMATION_SALESFORCE,
            ),
        ])
        .await?;
    Ok(HandlerOutcome::Handled)
}

// ── Secondary handlers ──────────────────────────────────────────────

async fn annual_report_uploaded(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    let Some(details) = AnnualReportDetails::parse(&record.data) else {
        warn!(
            record_id = %record.id,
            email = %record.email,
            data = %record.data,
            "Report details missing, skipping annual report upload"
        );
        return Ok(HandlerOutcome::skipped("report details missing"));
    };

    let now = Utc::now();
    let resolved = ctx
        .statuses
        .update_status(
            &StatusFilter::new()
                .email(&record.email)
                .process(ANNUAL_REPORT_REMINDER)
                .outcome(Outcome::AWAITING)
                .data_in(details.reminder_keys()),
            &StatusUpdate::completed(now),
        )
        .await?;

    // Complete the upload before scheduling the next reminder.
    ctx.statuses
        .update_status_by_id(&record.id, &StatusUpdate::completed(now))
        .await?;

    ctx.collaborators
        .reminders
        .schedule_next_annual_report_reminder(
            &record.email,
            &details.name,
            details.state.as_deref(),
        )
        .await?;

    info!(
        email = %record.email,
        report = %details,
        resolved,
        "Annual report upload processed"
    );
    Ok(HandlerOutcome::Handled)
}

async fn calculate_nps_running(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    if !record.outcome.is_awaiting() {
        return Ok(HandlerOutcome::skipped("record is not awaiting aggregation"));
    }
    ctx.collaborators.nps.calculate_running_nps().await?;
    info!(data = %record.data, "Running NPS calculated");
    Ok(HandlerOutcome::Handled)
}

async fn calculate_nps_onboarding(
    ctx: &HandlerContext,
    record: &StatusRecord,
) -> Result<HandlerOutcome, HandlerError> {
    if !record.outcome.is_awaiting() {
        return Ok(HandlerOutcome::skipped("record is not awaiting aggregation"));
    }
    ctx.collaborators.nps.calculate_onboarding_nps().await?;
    info!(data = %record.data, "Onboarding NPS calculated");
    Ok(HandlerOutcome::Handled)
}
