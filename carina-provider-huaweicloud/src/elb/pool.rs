//! elb_pool - Backend server group of a dedicated load balancer

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Map, Value as JsonValue, json};

use super::{SERVICE, listener_loadbalancer, locked_call, pool_loadbalancer, wait_for_status};
use crate::HuaweiCloudProvider;
use crate::client::{ServiceClient, path};
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, get_bool, get_int, get_str, has_change, has_changes, json_str,
    remove_nil, require_json_str, string_value,
};

const BODY_FIELDS: &[&str] = &[
    "lb_method",
    "protocol",
    "loadbalancer_id",
    "listener_id",
    "name",
    "description",
    "persistence",
    "type",
    "vpc_id",
    "protection_status",
    "protection_reason",
    "deletion_protection_enable",
];

const UPDATE_FIELDS: &[&str] = &[
    "lb_method",
    "name",
    "description",
    "persistence",
    "type",
    "vpc_id",
    "protection_status",
    "protection_reason",
    "deletion_protection_enable",
];

const SLOW_START_FIELDS: &[&str] = &["slow_start_enabled", "slow_start_duration"];

pub struct Pool;

fn pool_path(id: &str) -> String {
    path("v3/{project_id}/elb/pools/{id}", &[("id", id)])
}

impl Pool {
    fn slow_start(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let enabled = get_bool(attrs, "slow_start_enabled")?;
        Some(remove_nil(json!({
            "enable": enabled,
            "duration": get_int(attrs, "slow_start_duration"),
        })))
    }

    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        let mut pool = build_body(schema, attrs, BODY_FIELDS);
        if let Some(slow_start) = Self::slow_start(attrs) {
            pool.insert("slow_start".to_string(), slow_start);
        }
        remove_nil(json!({ "pool": pool }))
    }

    fn update_body(schema: &ResourceSchema, from: &State, to: &Resource) -> Option<JsonValue> {
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();
        let mut pool: Map<String, JsonValue> = build_body(schema, &to.attributes, &changed);
        if has_changes(from, to, SLOW_START_FIELDS)
            && let Some(slow_start) = Self::slow_start(&to.attributes)
        {
            pool.insert("slow_start".to_string(), slow_start);
        }
        (!pool.is_empty()).then(|| json!({ "pool": pool }))
    }

    fn flatten(schema: &ResourceSchema, body: &JsonValue) -> HashMap<String, Value> {
        let pool = &body["pool"];
        let mut attrs = HashMap::new();
        flatten_into(schema, pool, &mut attrs, &["loadbalancer_id", "listener_id"]);

        if let Some(lb_id) = json_str(pool, "loadbalancers.0.id") {
            attrs.insert("loadbalancer_id".to_string(), string_value(lb_id));
        }
        if let Some(listener_id) = json_str(pool, "listeners.0.id") {
            attrs.insert("listener_id".to_string(), string_value(listener_id));
        }
        let slow_start = &pool["slow_start"];
        if let Some(enabled) = slow_start["enable"].as_bool() {
            attrs.insert("slow_start_enabled".to_string(), Value::Bool(enabled));
        }
        if let Some(duration) = slow_start["duration"].as_i64() {
            attrs.insert("slow_start_duration".to_string(), Value::Int(duration));
        }
        attrs
    }

    /// The pool hangs off either a load balancer or a listener
    async fn owner(client: &ServiceClient, attrs: &HashMap<String, Value>) -> ProviderResult<String> {
        match get_str(attrs, "loadbalancer_id") {
            Some(lb_id) => Ok(lb_id.to_string()),
            None => match get_str(attrs, "listener_id") {
                Some(listener_id) => listener_loadbalancer(client, listener_id).await,
                None => Err(ProviderError::validation(
                    "one of 'loadbalancer_id' or 'listener_id' must be set",
                )),
            },
        }
    }
}

#[async_trait]
impl ResourceHandler for Pool {
    fn name(&self) -> &'static str {
        "elb_pool"
    }

    fn schema(&self) -> ResourceSchema {
        let enum_of = |values: &[&str]| {
            AttributeType::Enum(values.iter().map(|s| s.to_string()).collect())
        };

        ResourceSchema::new("elb_pool")
            .with_description("Backend server group of a dedicated load balancer")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new(
                    "protocol",
                    enum_of(&["TCP", "UDP", "HTTP", "HTTPS", "QUIC", "GRPC", "TLS"]),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "lb_method",
                    enum_of(&["ROUND_ROBIN", "LEAST_CONNECTIONS", "SOURCE_IP", "QUIC_CID"]),
                )
                .required()
                .with_provider_name("lb_algorithm"),
            )
            .attribute(
                AttributeSchema::new("loadbalancer_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("listener_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new(
                    "persistence",
                    AttributeType::Object(vec![
                        AttributeSchema::new(
                            "type",
                            enum_of(&["SOURCE_IP", "HTTP_COOKIE", "APP_COOKIE"]),
                        )
                        .required(),
                        AttributeSchema::new("cookie_name", AttributeType::String),
                        AttributeSchema::new("timeout", types::positive_int())
                            .with_provider_name("persistence_timeout"),
                    ]),
                )
                .optional_computed()
                .with_provider_name("session_persistence"),
            )
            .attribute(
                AttributeSchema::new("slow_start_enabled", AttributeType::Bool).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("slow_start_duration", types::positive_int())
                    .optional_computed()
                    .required_with(&["slow_start_enabled"]),
            )
            .attribute(
                AttributeSchema::new("type", enum_of(&["instance", "ip", ""])).optional_computed(),
            )
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("protection_status", enum_of(&["nonProtection", "consoleProtection"]))
                    .optional_computed(),
            )
            .attribute(
                AttributeSchema::new("protection_reason", AttributeType::String)
                    .optional_computed(),
            )
            .attribute(
                AttributeSchema::new("deletion_protection_enable", AttributeType::Bool)
                    .optional_computed()
                    .with_provider_name("member_deletion_protection_enable"),
            )
            .exactly_one_of(&["loadbalancer_id", "listener_id"])
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let client = provider.client(SERVICE).await?;
        let lb_id = Self::owner(&client, &resource.attributes).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let response = locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.create,
            Method::POST,
            "v3/{project_id}/elb/pools",
            Some(&body),
        )
        .await?;
        let id = require_json_str(&response, "pool.id")?;
        log::info!("Created pool {} on load balancer {}", id, lb_id);
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&pool_path(identifier)).await?;
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
        let timeouts = schema.timeouts.resolve(&to.attributes);
        let client = provider.client(SERVICE).await?;

        if let Some(body) = Self::update_body(&schema, from, to) {
            let lb_id = pool_loadbalancer(&client, identifier).await?;
            locked_call(
                provider,
                &client,
                &lb_id,
                timeouts.update,
                Method::PUT,
                &pool_path(identifier),
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
        let lb_id = pool_loadbalancer(&client, identifier).await?;

        let object_path = pool_path(identifier);
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

    fn pool_attrs() -> HashMap<String, Value> {
        let persistence: HashMap<String, Value> = [
            ("type".to_string(), string_value("APP_COOKIE")),
            ("cookie_name".to_string(), string_value("sid")),
            ("timeout".to_string(), Value::Int(30)),
        ]
        .into_iter()
        .collect();
        [
            ("protocol", string_value("HTTP")),
            ("lb_method", string_value("ROUND_ROBIN")),
            ("listener_id", string_value("ls-1")),
            ("persistence", Value::Map(persistence)),
            ("slow_start_enabled", Value::Bool(true)),
            ("slow_start_duration", Value::Int(50)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn create_body_renames_persistence_and_slow_start() {
        let body = Pool::create_body(&Pool.schema(), &pool_attrs());
        assert_eq!(
            body,
            json!({
                "pool": {
                    "protocol": "HTTP",
                    "lb_algorithm": "ROUND_ROBIN",
                    "listener_id": "ls-1",
                    "session_persistence": {
                        "type": "APP_COOKIE",
                        "cookie_name": "sid",
                        "persistence_timeout": 30
                    },
                    "slow_start": {"enable": true, "duration": 50}
                }
            })
        );
    }

    #[test]
    fn flatten_reads_owner_ids_from_lists() {
        let response = json!({
            "pool": {
                "id": "pool-1",
                "protocol": "TCP",
                "lb_algorithm": "SOURCE_IP",
                "loadbalancers": [{"id": "lb-1"}],
                "listeners": [],
                "session_persistence": null,
                "slow_start": {"enable": false, "duration": 30},
                "member_deletion_protection_enable": true
            }
        });
        let attrs = Pool::flatten(&Pool.schema(), &response);
        assert_eq!(attrs.get("id"), Some(&string_value("pool-1")));
        assert_eq!(attrs.get("lb_method"), Some(&string_value("SOURCE_IP")));
        assert_eq!(attrs.get("loadbalancer_id"), Some(&string_value("lb-1")));
        assert!(!attrs.contains_key("listener_id"));
        assert!(!attrs.contains_key("persistence"));
        assert_eq!(attrs.get("slow_start_enabled"), Some(&Value::Bool(false)));
        assert_eq!(attrs.get("deletion_protection_enable"), Some(&Value::Bool(true)));
    }

    #[test]
    fn update_body_skips_unchanged_fields() {
        let schema = Pool.schema();
        let from = State::existing(ResourceId::new("elb_pool", "web"), pool_attrs());
        let mut to = Resource::new("elb_pool", "web");
        to.attributes = pool_attrs();
        assert!(Pool::update_body(&schema, &from, &to).is_none());

        to.attributes
            .insert("lb_method".to_string(), string_value("LEAST_CONNECTIONS"));
        to.attributes
            .insert("slow_start_duration".to_string(), Value::Int(100));
        let body = Pool::update_body(&schema, &from, &to).unwrap();
        assert_eq!(
            body,
            json!({
                "pool": {
                    "lb_algorithm": "LEAST_CONNECTIONS",
                    "slow_start": {"enable": true, "duration": 100}
                }
            })
        );
    }

    #[test]
    fn schema_requires_exactly_one_owner() {
        let schema = Pool.schema();
        let mut attrs = pool_attrs();
        attrs.insert("loadbalancer_id".to_string(), string_value("lb-1"));
        assert!(schema.validate(&attrs).is_err());
        attrs.remove("listener_id");
        assert!(schema.validate(&attrs).is_ok());
    }
}
