use std::sync::Arc;

use status_dispatch::collaborators::{
    AutomationClient, AutomationConfig, Collaborators, SmtpConfig, SmtpMailer,
    StoreReminderScheduler,
};
use status_dispatch::config::DispatchConfig;
use status_dispatch::dispatch::{Dispatcher, next_fire, run_on_schedule, run_scheduled_dispatch};
use status_dispatch::error::{ConfigError, Result};
use status_dispatch::store::LibSqlBackend;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run().await {
        Ok(true) => Ok(()),
        Ok(false) => {
            eprintln!("Error: a dispatch batch could not be loaded");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Open the database, build collaborators and dispatch. Returns `false` when
/// a single pass could not load one of its batches.
async fn run() -> Result<bool> {
    let config = DispatchConfig::from_env()?;
    if let Some(schedule) = &config.schedule {
        // Reject a bad expression before touching the database.
        next_fire(schedule)?;
    }

    eprintln!("Status Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Formation prefix: {}", config.formation_prefix);
    eprintln!(
        "   Schedule: {}",
        config.schedule.as_deref().unwrap_or("single pass")
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    // ── Collaborators ────────────────────────────────────────────────────
    let smtp =
        SmtpConfig::from_env().ok_or_else(|| ConfigError::MissingEnvVar("SMTP_HOST".into()))?;
    let automation = Arc::new(AutomationClient::new(AutomationConfig::from_env()?)?);

    let collaborators = Collaborators {
        mailer: Arc::new(SmtpMailer::new(smtp)),
        surveys: automation.clone(),
        folders: automation.clone(),
        nps: automation,
        reminders: Arc::new(StoreReminderScheduler::new(db.clone())),
    };

    let schedule = config.schedule.clone();
    let dispatcher = Dispatcher::new(config, db.clone(), db.clone(), collaborators);

    let loaded = match schedule {
        Some(schedule) => {
            run_on_schedule(&dispatcher, &schedule).await?;
            true
        }
        None => !run_scheduled_dispatch(&dispatcher).await.has_load_error(),
    };

    drop(dispatcher);
    drop(db);
    tracing::info!("Database connection closed");

    Ok(loaded)
}
