//! Automation service client — surveys, folders and NPS over HTTP.
//!
//! Every operation is a JSON POST against `AUTOMATION_BASE_URL` with a
//! bearer token. Non-2xx responses become `CollaboratorError::Rejected`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::collaborators::{FolderProvisioner, NpsCalculator, SurveyScheduler};
use crate::error::{CollaboratorError, ConfigError};

/// Automation service configuration.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub base_url: String,
    pub api_token: SecretString,
    pub timeout: Duration,
}

impl AutomationConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("AUTOMATION_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("AUTOMATION_BASE_URL".into()))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "AUTOMATION_BASE_URL".into(),
                message: format!("expected an http(s) URL, got '{base_url}'"),
            });
        }

        let api_token =
            SecretString::from(std::env::var("AUTOMATION_API_TOKEN").unwrap_or_default());

        let timeout = std::env::var("AUTOMATION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20));

        Ok(Self {
            base_url,
            api_token,
            timeout,
        })
    }
}

/// HTTP client for the automation service.
pub struct AutomationClient {
    config: AutomationConfig,
    client: reqwest::Client,
}

impl AutomationClient {
    pub fn new(config: AutomationConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CollaboratorError::Misconfigured {
                collaborator: "automation".into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), CollaboratorError> {
        let url = self.endpoint(path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::RequestFailed {
                collaborator: format!("automation:{path}"),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Rejected {
                collaborator: format!("automation:{path}"),
                status: status.as_u16(),
            });
        }

        tracing::debug!(path, "Automation call succeeded");
        Ok(())
    }
}

#[async_trait]
impl SurveyScheduler for AutomationClient {
    async fn send_client_onboarding_survey(&self, email: &str) -> Result<(), CollaboratorError> {
        self.post("surveys/onboarding/send", json!({ "email": email }))
            .await
    }

    async fn schedule_onboarding_survey_sequence(
        &self,
        email: &str,
    ) -> Result<(), CollaboratorError> {
        self.post("surveys/onboarding/sequence", json!({ "email": email }))
            .await
    }

    async fn schedule_next_running_survey_sequence(
        &self,
        email: &str,
    ) -> Result<(), CollaboratorError> {
        self.post("surveys/running/sequence", json!({ "email": email }))
            .await
    }
}

#[async_trait]
impl FolderProvisioner for AutomationClient {
    async fn create_dropbox_folders(&self, email: &str) -> Result<(), CollaboratorError> {
        self.post("folders/dropbox", json!({ "email": email })).await
    }
}

#[async_trait]
impl NpsCalculator for AutomationClient {
    async fn calculate_running_nps(&self) -> Result<(), CollaboratorError> {
        self.post("nps/running/calculate", json!({})).await
    }

    async fn calculate_onboarding_nps(&self) -> Result<(), CollaboratorError> {
        self.post("nps/onboarding/calculate", json!({})).await
    }
}
