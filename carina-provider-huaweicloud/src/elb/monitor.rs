//! elb_monitor - Health check of a pool

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use super::{SERVICE, locked_call, pool_loadbalancer, wait_for_status};
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, get_str, has_change, json_str, remove_nil, require_json_str,
    require_str, string_value,
};

const BODY_FIELDS: &[&str] = &[
    "pool_id",
    "protocol",
    "interval",
    "timeout",
    "max_retries",
    "max_retries_down",
    "port",
    "url_path",
    "domain_name",
    "status_code",
    "http_method",
    "enabled",
    "name",
];

const UPDATE_FIELDS: &[&str] = &[
    "protocol",
    "interval",
    "timeout",
    "max_retries",
    "max_retries_down",
    "port",
    "url_path",
    "domain_name",
    "status_code",
    "http_method",
    "enabled",
    "name",
];

pub struct Monitor;

fn monitor_path(id: &str) -> String {
    path("v3/{project_id}/elb/healthmonitors/{id}", &[("id", id)])
}

impl Monitor {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        remove_nil(json!({ "healthmonitor": build_body(schema, attrs, BODY_FIELDS) }))
    }

    fn flatten(schema: &ResourceSchema, body: &JsonValue) -> HashMap<String, Value> {
        let monitor = &body["healthmonitor"];
        let mut attrs = HashMap::new();
        flatten_into(schema, monitor, &mut attrs, &["pool_id"]);
        if let Some(pool_id) = json_str(monitor, "pools.0.id") {
            attrs.insert("pool_id".to_string(), string_value(pool_id));
        }
        attrs
    }
}

#[async_trait]
impl ResourceHandler for Monitor {
    fn name(&self) -> &'static str {
        "elb_monitor"
    }

    fn schema(&self) -> ResourceSchema {
        let int = |name: &str| AttributeSchema::new(name, types::positive_int());

        ResourceSchema::new("elb_monitor")
            .with_description("Health check of a pool")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("pool_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "protocol",
                    AttributeType::Enum(
                        ["HTTP", "HTTPS", "TCP", "UDP_CONNECT", "TLS", "GRPC"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    ),
                )
                .required()
                .with_provider_name("type"),
            )
            .attribute(int("interval").required().with_provider_name("delay"))
            .attribute(int("timeout").required())
            .attribute(int("max_retries").required())
            .attribute(int("max_retries_down").optional_computed())
            .attribute(
                AttributeSchema::new("port", types::port_number())
                    .optional_computed()
                    .with_provider_name("monitor_port"),
            )
            .attribute(AttributeSchema::new("url_path", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("domain_name", AttributeType::String).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("status_code", AttributeType::String)
                    .optional_computed()
                    .with_provider_name("expected_codes"),
            )
            .attribute(
                AttributeSchema::new("http_method", AttributeType::String).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("enabled", AttributeType::Bool)
                    .with_default(Value::Bool(true))
                    .with_provider_name("admin_state_up"),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let pool_id = require_str(&resource.attributes, "pool_id")?;
        let client = provider.client(SERVICE).await?;
        let lb_id = pool_loadbalancer(&client, pool_id).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let response = locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.create,
            Method::POST,
            "v3/{project_id}/elb/healthmonitors",
            Some(&body),
        )
        .await?;
        let id = require_json_str(&response, "healthmonitor.id")?;
        log::info!("Created health monitor {} for pool {}", id, pool_id);
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&monitor_path(identifier)).await?;
        let attrs = Self::flatten(&self.schema(), &body);
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();

        if !changed.is_empty() {
            let timeouts = schema.timeouts.resolve(&to.attributes);
            let pool_id = require_str(&to.attributes, "pool_id")?;
            let client = provider.client(SERVICE).await?;
            let lb_id = pool_loadbalancer(&client, pool_id).await?;
            let body = json!({ "healthmonitor": build_body(&schema, &to.attributes, &changed) });
            locked_call(
                provider,
                &client,
                &lb_id,
                timeouts.update,
                Method::PUT,
                &monitor_path(identifier),
                Some(&body),
            )
            .await?;
        }
        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let timeouts = self.schema().timeouts.resolve(&state.attributes);
        let client = provider.client(SERVICE).await?;
        let pool_id = match get_str(&state.attributes, "pool_id") {
            Some(pool_id) => pool_id.to_string(),
            None => {
                let body = client.get(&monitor_path(identifier)).await?;
                require_json_str(&body, "healthmonitor.pools.0.id")?
            }
        };
        let lb_id = pool_loadbalancer(&client, &pool_id).await?;

        let object_path = monitor_path(identifier);
        locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.delete,
            Method::DELETE,
            &object_path,
            None,
        )
        .await?;
        wait_for_status(provider, &client, &object_path, None, DELETED, timeouts.delete).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_monitor() -> HashMap<String, Value> {
        [
            ("pool_id", string_value("pool-1")),
            ("protocol", string_value("HTTP")),
            ("interval", Value::Int(20)),
            ("timeout", Value::Int(15)),
            ("max_retries", Value::Int(10)),
            ("port", Value::Int(8080)),
            ("url_path", string_value("/health")),
            ("status_code", string_value("200-202")),
            ("enabled", Value::Bool(true)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn create_body_uses_api_names() {
        assert_eq!(
            Monitor::create_body(&Monitor.schema(), &http_monitor()),
            json!({
                "healthmonitor": {
                    "pool_id": "pool-1",
                    "type": "HTTP",
                    "delay": 20,
                    "timeout": 15,
                    "max_retries": 10,
                    "monitor_port": 8080,
                    "url_path": "/health",
                    "expected_codes": "200-202",
                    "admin_state_up": true
                }
            })
        );
    }

    #[test]
    fn flatten_reads_pool_from_list() {
        let response = json!({
            "healthmonitor": {
                "id": "hm-1",
                "type": "TCP",
                "delay": 5,
                "timeout": 3,
                "max_retries": 3,
                "admin_state_up": false,
                "monitor_port": null,
                "pools": [{"id": "pool-1"}]
            }
        });
        let attrs = Monitor::flatten(&Monitor.schema(), &response);
        assert_eq!(attrs.get("pool_id"), Some(&string_value("pool-1")));
        assert_eq!(attrs.get("protocol"), Some(&string_value("TCP")));
        assert_eq!(attrs.get("interval"), Some(&Value::Int(5)));
        assert_eq!(attrs.get("enabled"), Some(&Value::Bool(false)));
        assert!(!attrs.contains_key("port"));
    }
}
