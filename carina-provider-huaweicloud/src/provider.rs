//! HuaweiCloud Provider implementation
//!
//! Owns the HTTP client, credentials and resolved project, and hands out
//! per-service [`ServiceClient`]s to the resource handlers.

use std::sync::Arc;
use std::time::Duration;

use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::wait::StateChangeConf;
use tokio::sync::Mutex;
use url::Url;

use crate::client::ServiceClient;
use crate::config::ProviderConfig;
use crate::signer::Credentials;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HuaweiCloud Provider
pub struct HuaweiCloudProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    credentials: Arc<Credentials>,
    project_id: Mutex<Option<String>>,
}

impl HuaweiCloudProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| ProviderError::new("Failed to build HTTP client").with_cause(e))?;

        if config.insecure {
            log::warn!("TLS certificate verification is disabled");
        }

        let credentials = Arc::new(Credentials {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            security_token: config.security_token.clone(),
        });

        Ok(Self {
            project_id: Mutex::new(config.project_id.clone()),
            config,
            http,
            credentials,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Project of the configured region, looked up through IAM on first use
    pub async fn project_id(&self) -> ProviderResult<String> {
        let mut cached = self.project_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        log::debug!("Resolving project ID for region {}", self.config.region);
        let iam = self.service_client_for("iam", String::new())?;
        let response = iam
            .get_with_query("v3/projects", &[("name", self.config.region.clone())])
            .await?;
        let id = response
            .get("projects")
            .and_then(|p| p.as_array())
            .and_then(|projects| {
                projects
                    .iter()
                    .find(|p| p.get("name").and_then(|n| n.as_str()) == Some(self.config.region.as_str()))
            })
            .and_then(|p| p.get("id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                ProviderError::new(format!(
                    "No IAM project found for region {}",
                    self.config.region
                ))
            })?
            .to_string();

        *cached = Some(id.clone());
        Ok(id)
    }

    /// Client for a service in the configured region and project
    pub async fn client(&self, service: &str) -> ProviderResult<ServiceClient> {
        let project_id = self.project_id().await?;
        self.service_client_for(service, project_id)
    }

    fn service_client_for(&self, service: &str, project_id: String) -> ProviderResult<ServiceClient> {
        let endpoint = self.config.endpoint(service);
        let base = Url::parse(&endpoint).map_err(|e| {
            ProviderError::new(format!("Invalid endpoint for {}: {}", service, endpoint))
                .with_cause(e)
        })?;
        Ok(
            ServiceClient::new(self.http.clone(), base, project_id, self.credentials.clone())
                .with_max_retries(self.config.max_retries)
                .with_poll_scale(self.config.poll_scale),
        )
    }

    /// Waiter polling every `poll` after an initial `delay`, both scaled
    /// by the configured `poll_scale`
    pub fn waiter(
        &self,
        pending: &[&str],
        target: &[&str],
        timeout: Duration,
        delay: Duration,
        poll: Duration,
    ) -> StateChangeConf {
        StateChangeConf::new(pending, target, timeout)
            .with_delay(delay)
            .with_poll_interval(poll)
            .scaled(self.config.poll_scale)
    }

    /// Scale a single pause (retry delays and the like)
    pub fn pause(&self, duration: Duration) -> Duration {
        self.config.scaled(duration)
    }
}
