//! elb_active_standby_pool - Pool with one active and one standby member
//!
//! The API offers no update, so every argument forces replacement.

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use carina_core::wait::DELETED;
use serde_json::{Value as JsonValue, json};

use super::{SERVICE, wait_for_status};
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, get_bool, get_int, json_str, remove_nil, require_json_str,
    string_value,
};

const BODY_FIELDS: &[&str] = &[
    "lb_method",
    "protocol",
    "name",
    "loadbalancer_id",
    "listener_id",
    "type",
    "any_port_enable",
    "vpc_id",
    "description",
    "ip_version",
    "members",
    "healthmonitor",
];

pub struct ActiveStandbyPool;

fn pool_path(id: &str) -> String {
    path("v3/{project_id}/elb/master-slave-pools/{id}", &[("id", id)])
}

fn enum_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|s| s.to_string()).collect())
}

fn member_type() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new("address", AttributeType::String).required(),
        AttributeSchema::new("role", enum_of(&["master", "slave"])).required(),
        AttributeSchema::new("protocol_port", types::port_number()),
        AttributeSchema::new("name", AttributeType::String),
        AttributeSchema::new("subnet_id", AttributeType::String).with_provider_name("subnet_cidr_id"),
        AttributeSchema::new("id", AttributeType::String).computed(),
        AttributeSchema::new("operating_status", AttributeType::String).computed(),
    ])
}

fn healthmonitor_type() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new("type", AttributeType::String).required(),
        AttributeSchema::new("delay", types::positive_int()).required(),
        AttributeSchema::new("max_retries", types::positive_int()).required(),
        AttributeSchema::new("timeout", types::positive_int()).required(),
        AttributeSchema::new("max_retries_down", types::positive_int()),
        AttributeSchema::new("monitor_port", types::port_number()),
        AttributeSchema::new("domain_name", AttributeType::String),
        AttributeSchema::new("expected_codes", AttributeType::String),
        AttributeSchema::new("http_method", AttributeType::String),
        AttributeSchema::new("url_path", AttributeType::String),
        AttributeSchema::new("name", AttributeType::String),
    ])
}

impl ActiveStandbyPool {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        let mut pool = build_body(schema, attrs, BODY_FIELDS);
        if let Some(enabled) = get_bool(attrs, "connection_drain_enabled") {
            pool.insert(
                "connection_drain".to_string(),
                json!({
                    "enable": enabled,
                    "timeout": get_int(attrs, "connection_drain_timeout"),
                }),
            );
        }
        remove_nil(json!({ "pool": pool }))
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
        if let Some(enabled) = pool["connection_drain"]["enable"].as_bool() {
            attrs.insert("connection_drain_enabled".to_string(), Value::Bool(enabled));
        }
        if let Some(timeout) = pool["connection_drain"]["timeout"].as_i64() {
            attrs.insert("connection_drain_timeout".to_string(), Value::Int(timeout));
        }
        attrs
    }
}

#[async_trait]
impl ResourceHandler for ActiveStandbyPool {
    fn name(&self) -> &'static str {
        "elb_active_standby_pool"
    }

    fn schema(&self) -> ResourceSchema {
        let arg = |name: &str, attr_type: AttributeType| {
            AttributeSchema::new(name, attr_type).optional_computed().force_new()
        };

        ResourceSchema::new("elb_active_standby_pool")
            .with_description("Pool with one active and one standby member")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("protocol", enum_of(&["TCP", "UDP", "QUIC", "TLS"]))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("lb_method", enum_of(&["ROUND_ROBIN", "LEAST_CONNECTIONS", "SOURCE_IP", "QUIC_CID"]))
                    .optional_computed()
                    .force_new()
                    .with_provider_name("lb_algorithm"),
            )
            .attribute(
                AttributeSchema::new("members", AttributeType::List(Box::new(member_type())))
                    .required()
                    .force_new()
                    .with_description("Exactly one master and one slave member"),
            )
            .attribute(
                AttributeSchema::new("healthmonitor", healthmonitor_type())
                    .required()
                    .force_new(),
            )
            .attribute(arg("name", AttributeType::String))
            .attribute(arg("description", AttributeType::String))
            .attribute(arg("loadbalancer_id", AttributeType::String))
            .attribute(arg("listener_id", AttributeType::String))
            .attribute(arg("type", enum_of(&["instance", "ip", ""])))
            .attribute(arg("any_port_enable", AttributeType::Bool))
            .attribute(arg("vpc_id", AttributeType::String))
            .attribute(arg("ip_version", enum_of(&["dualstack", "v4", "v6"])))
            .attribute(arg("connection_drain_enabled", AttributeType::Bool))
            .attribute(
                arg("connection_drain_timeout", types::positive_int())
                    .required_with(&["connection_drain_enabled"]),
            )
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
            .attribute(AttributeSchema::new("updated_at", AttributeType::String).computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let client = provider.client(SERVICE).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let response = client.post("v3/{project_id}/elb/master-slave-pools", &body).await?;
        let id = require_json_str(&response, "pool.id")?;
        log::info!("Created active/standby pool {}", id);

        wait_for_status(provider, &client, &pool_path(&id), None, "ACTIVE", timeouts.create).await?;
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
        _from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
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
        let object_path = pool_path(identifier);
        client.delete(&object_path).await?;
        wait_for_status(provider, &client, &object_path, None, DELETED, timeouts.delete).await
    }
}
