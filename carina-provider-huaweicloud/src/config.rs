//! Provider configuration
//!
//! Settings come from the manifest `provider` block, with the usual
//! `HW_*` environment variables filling anything left unset.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required provider setting '{name}' (or environment variable {env})")]
    Missing { name: &'static str, env: &'static str },

    #[error("invalid provider configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("invalid endpoint '{endpoint}' for service '{service}': {source}")]
    Endpoint {
        service: String,
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Token for temporary AK/SK credentials
    #[serde(default)]
    pub security_token: Option<String>,
    /// Resolved through IAM when omitted
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    /// Service name to base URL overrides
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Attempts for requests rejected with HTTP 429
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
    /// Multiplier applied to every polling pause and retry backoff
    #[serde(default = "default_poll_scale")]
    pub poll_scale: f64,
}

fn default_cloud() -> String {
    DEFAULT_CLOUD.to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_poll_scale() -> f64 {
    1.0
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            security_token: None,
            project_id: None,
            cloud: default_cloud(),
            endpoints: HashMap::new(),
            max_retries: default_max_retries(),
            insecure: false,
            poll_scale: default_poll_scale(),
        }
    }
}

impl ProviderConfig {
    /// Build the configuration from the manifest `provider` block and the
    /// process environment
    pub fn from_json(block: serde_json::Value) -> Result<Self, ConfigError> {
        let block = if block.is_null() {
            serde_json::json!({})
        } else {
            block
        };
        let mut config: ProviderConfig = serde_json::from_value(block)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Fill unset values from environment variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |field: &mut String, env: &str| {
            if field.is_empty()
                && let Some(v) = lookup(env)
            {
                *field = v;
            }
        };
        fill(&mut self.region, "HW_REGION_NAME");
        fill(&mut self.access_key, "HW_ACCESS_KEY");
        fill(&mut self.secret_key, "HW_SECRET_KEY");
        if self.cloud == DEFAULT_CLOUD
            && let Some(cloud) = lookup("HW_CLOUD")
        {
            self.cloud = cloud;
        }
        if self.project_id.is_none() {
            self.project_id = lookup("HW_PROJECT_ID").filter(|v| !v.is_empty());
        }
        if self.security_token.is_none() {
            self.security_token = lookup("HW_SECURITY_TOKEN").filter(|v| !v.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::Missing {
                name: "region",
                env: "HW_REGION_NAME",
            });
        }
        if self.access_key.is_empty() {
            return Err(ConfigError::Missing {
                name: "access_key",
                env: "HW_ACCESS_KEY",
            });
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::Missing {
                name: "secret_key",
                env: "HW_SECRET_KEY",
            });
        }
        for (service, endpoint) in &self.endpoints {
            url::Url::parse(endpoint).map_err(|source| ConfigError::Endpoint {
                service: service.clone(),
                endpoint: endpoint.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Base URL of a service, always ending with `/`
    pub fn endpoint(&self, service: &str) -> String {
        let base = match self.endpoints.get(service) {
            Some(custom) => custom.clone(),
            None => format!("https://{}.{}.{}/", service, self.region, self.cloud),
        };
        if base.ends_with('/') {
            base
        } else {
            format!("{}/", base)
        }
    }

    /// Scale a polling pause
    pub fn scaled(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.poll_scale.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn manifest_values_win_over_environment() {
        let mut config: ProviderConfig =
            serde_json::from_value(json!({"region": "cn-north-4", "access_key": "AK"})).unwrap();
        config.apply_env(env(&[
            ("HW_REGION_NAME", "ap-southeast-1"),
            ("HW_SECRET_KEY", "SK"),
            ("HW_PROJECT_ID", "0123"),
        ]));

        assert_eq!(config.region, "cn-north-4");
        assert_eq!(config.access_key, "AK");
        assert_eq!(config.secret_key, "SK");
        assert_eq!(config.project_id.as_deref(), Some("0123"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let mut config: ProviderConfig =
            serde_json::from_value(json!({"region": "cn-north-4"})).unwrap();
        config.apply_env(env(&[]));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("HW_ACCESS_KEY"));
    }

    #[test]
    fn unknown_settings_are_rejected() {
        let result: Result<ProviderConfig, _> =
            serde_json::from_value(json!({"region": "cn-north-4", "zone": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn endpoint_templates_and_overrides() {
        let mut config = ProviderConfig {
            region: "cn-north-4".to_string(),
            ..Default::default()
        };
        config
            .endpoints
            .insert("gaussdb".to_string(), "http://127.0.0.1:8080".to_string());

        assert_eq!(
            config.endpoint("elb"),
            "https://elb.cn-north-4.myhuaweicloud.com/"
        );
        assert_eq!(config.endpoint("gaussdb"), "http://127.0.0.1:8080/");
    }

    #[test]
    fn invalid_endpoint_fails_validation() {
        let mut config = ProviderConfig {
            region: "cn-north-4".to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            ..Default::default()
        };
        config
            .endpoints
            .insert("elb".to_string(), "not a url".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Endpoint { .. })
        ));
    }

    #[test]
    fn poll_scale_shrinks_pauses() {
        let config = ProviderConfig {
            poll_scale: 0.0,
            ..Default::default()
        };
        assert_eq!(config.scaled(Duration::from_secs(180)), Duration::ZERO);
    }
}
