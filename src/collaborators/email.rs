//! Transactional email over SMTP via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::collaborators::{Mailer, PAYMENT_ERROR_TEMPLATE};
use crate::error::CollaboratorError;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

// ── Mailer ──────────────────────────────────────────────────────────

/// Sends transactional templates through an SMTP relay.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build the message for a template without sending it.
    pub fn build_message(
        &self,
        to: &str,
        template: &str,
    ) -> Result<Message, CollaboratorError> {
        Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                CollaboratorError::Misconfigured {
                    collaborator: "smtp".into(),
                    reason: format!("Invalid from address: {e}"),
                }
            })?)
            .to(to.parse().map_err(|e| CollaboratorError::RequestFailed {
                collaborator: "smtp".into(),
                reason: format!("Invalid to address: {e}"),
            })?)
            .subject(template)
            .body(render_template(template))
            .map_err(|e| CollaboratorError::RequestFailed {
                collaborator: "smtp".into(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

fn send_blocking(config: &SmtpConfig, message: &Message) -> Result<(), CollaboratorError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&config.host)
        .map_err(|e| CollaboratorError::Misconfigured {
            collaborator: "smtp".into(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(config.port)
        .credentials(creds)
        .build();

    transport
        .send(message)
        .map_err(|e| CollaboratorError::RequestFailed {
            collaborator: "smtp".into(),
            reason: format!("SMTP send failed: {e}"),
        })?;
    Ok(())
}

/// Plain-text body for a known template name.
fn render_template(template: &str) -> String {
    match template {
        PAYMENT_ERROR_TEMPLATE => "Hi,\n\n\
             We were unable to process your most recent payment. \
             Please sign in and update your payment information so your \
             services continue without interruption.\n\n\
             Thank you,\nThe Collective team"
            .to_string(),
        other => format!("Hi,\n\n{other}\n\nThank you,\nThe Collective team"),
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_transactional_email(
        &self,
        email: &str,
        template: &str,
    ) -> Result<(), CollaboratorError> {
        let message = self.build_message(email, template)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || send_blocking(&config, &message))
            .await
            .map_err(|e| CollaboratorError::RequestFailed {
                collaborator: "smtp".into(),
                reason: format!("send task failed: {e}"),
            })??;

        tracing::info!(email, template, "Transactional email sent");
        Ok(())
    }
}
