//! Selects pending records per gate and routes each to its handler.
//!
//! A pass loads the Primary batch, runs it to completion, then loads and runs
//! the Secondary batch. Each record runs inside its own span under a timeout;
//! a failing record is logged and counted, never fatal to the batch.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::collaborators::Collaborators;
use crate::config::DispatchConfig;
use crate::dispatch::handlers::{self, HandlerContext, HandlerOptions, HandlerOutcome};
use crate::dispatch::process::ProcessKind;
use crate::dispatch::registry::{ProcessRegistry, Unroutable};
use crate::error::{ConfigError, DatabaseError, HandlerError};
use crate::status::{Gate, Outcome, StatusRecord};
use crate::store::{ProgressStore, StatusFilter, StatusStore, StatusUpdate};

/// Counts for one batch of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub gate: Gate,
    pub selected: usize,
    pub handled: usize,
    pub skipped: usize,
    /// Steps found already completed; terminal like `handled`.
    pub already_done: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Ids of records whose process name did not route.
    pub unroutable: Vec<String>,
    /// Set when the batch could not be loaded.
    pub load_error: Option<String>,
}

impl BatchReport {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            selected: 0,
            handled: 0,
            skipped: 0,
            already_done: 0,
            failed: 0,
            timed_out: 0,
            unroutable: Vec::new(),
            load_error: None,
        }
    }
}

/// Result of a full pass: both batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub primary: BatchReport,
    pub secondary: BatchReport,
}

impl DispatchReport {
    pub fn batches(&self) -> [&BatchReport; 2] {
        [&self.primary, &self.secondary]
    }

    /// Whether either batch failed to load.
    pub fn has_load_error(&self) -> bool {
        self.batches().iter().any(|b| b.load_error.is_some())
    }

    pub fn handled(&self) -> usize {
        self.primary.handled + self.secondary.handled
    }

    pub fn failed(&self) -> usize {
        self.primary.failed
            + self.secondary.failed
            + self.primary.timed_out
            + self.secondary.timed_out
    }
}

/// Drives one pass over the status store.
pub struct Dispatcher {
    config: DispatchConfig,
    registry: ProcessRegistry,
    ctx: HandlerContext,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        statuses: Arc<dyn StatusStore>,
        progress: Arc<dyn ProgressStore>,
        collaborators: Collaborators,
    ) -> Self {
        let options = HandlerOptions {
            gate_running_flow_rerun: config.gate_running_flow_rerun,
        };
        Self {
            config,
            registry: ProcessRegistry::new(),
            ctx: HandlerContext {
                statuses,
                progress,
                collaborators,
                options,
            },
        }
    }

    /// Replace the registry, e.g. to disable some process kinds.
    pub fn with_registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Pending records for one gate, in insertion order.
    pub async fn load_batch(&self, gate: Gate) -> Result<Vec<StatusRecord>, DatabaseError> {
        self.ctx
            .statuses
            .query_status(&StatusFilter::dispatchable(
                &self.config.formation_prefix,
                gate,
            ))
            .await
    }

    /// Route and handle every record, sequentially.
    pub async fn run_batch(&self, gate: Gate, records: Vec<StatusRecord>) -> BatchReport {
        let mut report = BatchReport::new(gate);
        report.selected = records.len();

        for record in records {
            let span = info_span!(
                "record",
                record_id = %record.id,
                process = %record.process,
                email = %record.email,
            );
            self.dispatch_record(gate, &record, &mut report)
                .instrument(span)
                .await;
        }

        report
    }

    async fn dispatch_record(&self, gate: Gate, record: &StatusRecord, report: &mut BatchReport) {
        let kind = match self.registry.resolve(gate, &record.process) {
            Ok(kind) => kind,
            Err(reason) => {
                match &reason {
                    // The only warn for an unknown process; exactly one line per record.
                    Unroutable::UnknownProcess => {
                        warn!("Skipping record: {reason}");
                    }
                    Unroutable::WrongGate { .. } => {
                        debug!("Skipping record: {reason}");
                    }
                }
                report.unroutable.push(record.id.clone());
                return;
            }
        };

        let result = match tokio::time::timeout(
            self.config.record_timeout,
            handlers::handle(kind, &self.ctx, record),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout {
                record_id: record.id.clone(),
                process: record.process.clone(),
                timeout: self.config.record_timeout,
            }),
        };

        match result {
            Ok(HandlerOutcome::Handled) => {
                report.handled += 1;
                if self.config.complete_on_success {
                    self.mark_completed(kind, record).await;
                }
            }
            Ok(HandlerOutcome::Skipped { reason }) => {
                report.skipped += 1;
                info!(%reason, "Record skipped");
            }
            Ok(HandlerOutcome::AlreadyDone { reason }) => {
                report.already_done += 1;
                info!(%reason, "Record already done");
                if self.config.complete_on_success {
                    self.mark_completed(kind, record).await;
                }
            }
            Err(e @ HandlerError::Timeout { .. }) => {
                report.timed_out += 1;
                warn!("Handler timed out, record stays scheduled: {e}");
            }
            Err(e) => {
                report.failed += 1;
                error!(retryable = e.is_retryable(), "Handler failed: {e}");
            }
        }
    }

    /// Compare-and-set SCHEDULED -> COMPLETED. Losing the race is not an error.
    async fn mark_completed(&self, kind: ProcessKind, record: &StatusRecord) {
        let filter = StatusFilter::new()
            .id(&record.id)
            .outcome(Outcome::Scheduled);
        match self
            .ctx
            .statuses
            .update_status(&filter, &StatusUpdate::completed(Utc::now()))
            .await
        {
            Ok(0) => debug!(%kind, "Record already left the scheduled state"),
            Ok(_) => debug!(%kind, "Record marked completed"),
            Err(e) => error!(%kind, "Failed to mark record completed: {e}"),
        }
    }

    async fn run_gate(&self, gate: Gate) -> BatchReport {
        let span = info_span!("batch", %gate);
        async {
            let records = match self.load_batch(gate).await {
                Ok(records) => records,
                Err(e) => {
                    error!("Failed to load batch: {e}");
                    let mut report = BatchReport::new(gate);
                    report.load_error = Some(e.to_string());
                    return report;
                }
            };
            debug!(count = records.len(), "Batch loaded");
            let report = self.run_batch(gate, records).await;
            info!(
                selected = report.selected,
                handled = report.handled,
                skipped = report.skipped,
                already_done = report.already_done,
                failed = report.failed,
                timed_out = report.timed_out,
                unroutable = report.unroutable.len(),
                "Batch finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// One full pass: Primary to completion, then Secondary.
    pub async fn run(&self) -> DispatchReport {
        let primary = self.run_gate(Gate::Primary).await;
        let secondary = self.run_gate(Gate::Secondary).await;
        DispatchReport { primary, secondary }
    }
}

/// Run one pass between start and completion banners.
pub async fn run_scheduled_dispatch(dispatcher: &Dispatcher) -> DispatchReport {
    info!(
        formation_prefix = %dispatcher.config().formation_prefix,
        "Status dispatch started"
    );
    let report = dispatcher.run().await;
    info!(
        handled = report.handled(),
        failed = report.failed(),
        load_error = report.has_load_error(),
        "Status dispatch completed"
    );
    report
}

/// Next fire time of a cron expression.
pub fn next_fire(schedule: &str) -> Result<Option<DateTime<Utc>>, ConfigError> {
    let schedule = cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidValue {
        key: "DISPATCH_SCHEDULE".into(),
        message: format!("invalid cron: {e}"),
    })?;
    Ok(schedule.upcoming(Utc).next())
}

/// Fire a pass on every tick of `schedule` until the schedule runs out.
pub async fn run_on_schedule(dispatcher: &Dispatcher, schedule: &str) -> Result<(), ConfigError> {
    loop {
        let Some(at) = next_fire(schedule)? else {
            info!("Schedule has no upcoming fire time, stopping");
            return Ok(());
        };
        let wait = (at - Utc::now()).to_std().unwrap_or_default();
        debug!(next = %at, "Waiting for next dispatch");
        tokio::time::sleep(wait).await;
        run_scheduled_dispatch(dispatcher).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::collaborators::Mailer;
    use crate::collaborators::testing::{Call, Recorder};
    use crate::error::CollaboratorError;
    use crate::status::{FORMATION_DAILY, FORMATION_SYSTEM, NewStatusRecord, ProgressStatus};
    use crate::store::LibSqlBackend;

    const EMAIL: &str = "a@x.com";

    async fn setup(config: DispatchConfig) -> (Arc<LibSqlBackend>, Arc<Recorder>, Dispatcher) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store.insert_progress(&ProgressStatus::new(EMAIL)).await.unwrap();
        let recorder = Recorder::new();
        let dispatcher = Dispatcher::new(
            config,
            store.clone(),
            store.clone(),
            recorder.collaborators(),
        );
        (store, recorder, dispatcher)
    }

    fn payment(email: &str) -> NewStatusRecord {
        NewStatusRecord::new(email, "Payment error email", FORMATION_SYSTEM)
    }

    fn emails_sent(recorder: &Recorder) -> Vec<String> {
        recorder
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::TransactionalEmail { email, .. } => Some(email),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn only_scheduled_records_reach_handlers() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store.create_status(&payment("pending@x.com")).await.unwrap();
        store
            .create_status(&payment("done@x.com").with_outcome(Outcome::Completed))
            .await
            .unwrap();
        store
            .create_status(&payment("odd@x.com").with_outcome(Outcome::Other(0)))
            .await
            .unwrap();
        store
            .create_status(&NewStatusRecord::new(
                "daily@x.com",
                "Payment error email",
                FORMATION_DAILY,
            ))
            .await
            .unwrap();

        let report = dispatcher.run().await;

        assert_eq!(emails_sent(&recorder), vec!["pending@x.com".to_string()]);
        assert_eq!(report.primary.selected, 1);
        assert_eq!(report.primary.handled, 1);
        assert_eq!(report.secondary.selected, 0);
    }

    #[tokio::test]
    async fn unknown_process_is_skipped_once() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store.create_status(&payment("first@x.com")).await.unwrap();
        let unknown = store
            .create_status(&NewStatusRecord::new(
                EMAIL,
                "Nonexistent Process",
                FORMATION_SYSTEM,
            ))
            .await
            .unwrap();
        store.create_status(&payment("second@x.com")).await.unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.unroutable, vec![unknown.id]);
        assert_eq!(report.primary.handled, 2);
        assert_eq!(
            emails_sent(&recorder),
            vec!["first@x.com".to_string(), "second@x.com".to_string()]
        );
        assert!(!report.has_load_error());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl LogBuffer {
        fn lines_containing(&self, needle: &str) -> usize {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8_lossy(&bytes)
                .lines()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    #[tokio::test]
    async fn unknown_process_logs_one_warning() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (store, _recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store.create_status(&payment("first@x.com")).await.unwrap();
        store
            .create_status(&NewStatusRecord::new(
                EMAIL,
                "Nonexistent Process",
                FORMATION_SYSTEM,
            ))
            .await
            .unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.handled, 1);
        assert_eq!(logs.lines_containing("unknown process"), 1);
    }

    #[tokio::test]
    async fn failing_record_does_not_stop_batch() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        // No progress row for this client, so the questionnaire update fails.
        store
            .create_status(&NewStatusRecord::new(
                "nobody@x.com",
                "Kickoff Call Scheduled",
                FORMATION_SYSTEM,
            ))
            .await
            .unwrap();
        store.create_status(&payment(EMAIL)).await.unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.failed, 1);
        assert_eq!(report.primary.handled, 1);
        assert_eq!(emails_sent(&recorder), vec![EMAIL.to_string()]);
    }

    #[tokio::test]
    async fn collaborator_failure_is_counted() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        recorder.fail_on("transactional_email");
        let record = store.create_status(&payment(EMAIL)).await.unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.failed, 1);
        let record = store.get_status(&record.id).await.unwrap().unwrap();
        assert_eq!(record.outcome, Outcome::Scheduled);
    }

    #[tokio::test]
    async fn guardless_by_default_runs_twice() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store.create_status(&payment(EMAIL)).await.unwrap();

        dispatcher.run().await;
        dispatcher.run().await;

        assert_eq!(emails_sent(&recorder).len(), 2);
    }

    #[tokio::test]
    async fn complete_on_success_prevents_redispatch() {
        let config = DispatchConfig {
            complete_on_success: true,
            ..DispatchConfig::default()
        };
        let (store, recorder, dispatcher) = setup(config).await;
        let record = store.create_status(&payment(EMAIL)).await.unwrap();

        dispatcher.run().await;
        let second = dispatcher.run().await;

        assert_eq!(emails_sent(&recorder).len(), 1);
        assert_eq!(second.primary.selected, 0);
        let record = store.get_status(&record.id).await.unwrap().unwrap();
        assert_eq!(record.outcome, Outcome::Completed);
    }

    #[tokio::test]
    async fn complete_on_success_leaves_failures_scheduled() {
        let config = DispatchConfig {
            complete_on_success: true,
            ..DispatchConfig::default()
        };
        let (store, recorder, dispatcher) = setup(config).await;
        recorder.fail_on("transactional_email");
        let record = store.create_status(&payment(EMAIL)).await.unwrap();

        dispatcher.run().await;

        let record = store.get_status(&record.id).await.unwrap().unwrap();
        assert_eq!(record.outcome, Outcome::Scheduled);
    }

    #[tokio::test]
    async fn gated_rerun_is_completed_when_completion_is_on() {
        let config = DispatchConfig {
            complete_on_success: true,
            gate_running_flow_rerun: true,
            ..DispatchConfig::default()
        };
        let (store, recorder, dispatcher) = setup(config).await;
        store
            .create_status(
                &NewStatusRecord::new(EMAIL, "Running flow", FORMATION_SYSTEM)
                    .with_outcome(Outcome::Completed),
            )
            .await
            .unwrap();
        let rerun = store
            .create_status(&NewStatusRecord::new(EMAIL, "Running flow", FORMATION_SYSTEM))
            .await
            .unwrap();

        let first = dispatcher.run().await;
        let second = dispatcher.run().await;

        assert_eq!(first.primary.selected, 1);
        assert_eq!(first.primary.already_done, 1);
        assert_eq!(first.primary.skipped, 0);
        assert_eq!(second.primary.selected, 0);
        let rerun = store.get_status(&rerun.id).await.unwrap().unwrap();
        assert_eq!(rerun.outcome, Outcome::Completed);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn gated_rerun_stays_scheduled_without_completion() {
        let config = DispatchConfig {
            gate_running_flow_rerun: true,
            ..DispatchConfig::default()
        };
        let (store, _recorder, dispatcher) = setup(config).await;
        store
            .create_status(
                &NewStatusRecord::new(EMAIL, "Running flow", FORMATION_SYSTEM)
                    .with_outcome(Outcome::Completed),
            )
            .await
            .unwrap();
        let rerun = store
            .create_status(&NewStatusRecord::new(EMAIL, "Running flow", FORMATION_SYSTEM))
            .await
            .unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.already_done, 1);
        let rerun = store.get_status(&rerun.id).await.unwrap().unwrap();
        assert_eq!(rerun.outcome, Outcome::Scheduled);
    }

    #[tokio::test]
    async fn chained_running_flow_is_not_rerun() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store
            .create_status(&NewStatusRecord::new(EMAIL, "Running flow", FORMATION_SYSTEM))
            .await
            .unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.handled, 1);
        // The chained second phase is selected by the secondary batch but not routed.
        assert_eq!(report.secondary.selected, 1);
        assert_eq!(report.secondary.unroutable.len(), 1);
        assert_eq!(report.secondary.handled, 0);
        let folders = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::DropboxFolders { .. }))
            .count();
        assert_eq!(folders, 1);
    }

    #[tokio::test]
    async fn secondary_batch_handles_nps() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store
            .create_status(
                &NewStatusRecord::new(EMAIL, "Calculate NPS Running", FORMATION_SYSTEM)
                    .with_process_state(2),
            )
            .await
            .unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.secondary.handled, 1);
        assert_eq!(recorder.calls(), vec![Call::RunningNps]);
    }

    #[tokio::test]
    async fn disabled_kind_is_unroutable() {
        let (store, recorder, dispatcher) = setup(DispatchConfig::default()).await;
        let dispatcher =
            dispatcher.with_registry(ProcessRegistry::with_kinds([ProcessKind::RunningFlow]));
        store.create_status(&payment(EMAIL)).await.unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.unroutable.len(), 1);
        assert!(recorder.calls().is_empty());
    }

    struct SlowMailer;

    #[async_trait]
    impl Mailer for SlowMailer {
        async fn send_transactional_email(
            &self,
            _email: &str,
            _template: &str,
        ) -> Result<(), CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_handler_times_out_and_batch_continues() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let recorder = Recorder::new();
        let mut collaborators = recorder.collaborators();
        collaborators.mailer = Arc::new(SlowMailer);
        let config = DispatchConfig {
            record_timeout: Duration::from_millis(50),
            complete_on_success: true,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(config, store.clone(), store.clone(), collaborators);

        let slow = store.create_status(&payment(EMAIL)).await.unwrap();
        store
            .create_status(
                &NewStatusRecord::new(EMAIL, "Calculate NPS Onboarding", FORMATION_SYSTEM)
                    .with_process_state(2),
            )
            .await
            .unwrap();

        let report = dispatcher.run().await;

        assert_eq!(report.primary.timed_out, 1);
        assert_eq!(report.secondary.handled, 1);
        let slow = store.get_status(&slow.id).await.unwrap().unwrap();
        assert_eq!(slow.outcome, Outcome::Scheduled);
    }

    #[tokio::test]
    async fn scheduled_dispatch_returns_report() {
        let (store, _recorder, dispatcher) = setup(DispatchConfig::default()).await;
        store.create_status(&payment(EMAIL)).await.unwrap();

        let report = run_scheduled_dispatch(&dispatcher).await;
        assert_eq!(report.handled(), 1);
        assert_eq!(report.failed(), 0);
    }

    #[test]
    fn next_fire_parses_cron() {
        let next = next_fire("0 */5 * * * *").unwrap();
        assert!(next.is_some_and(|at| at > Utc::now()));
        assert!(next_fire("not a cron").is_err());
    }
}
