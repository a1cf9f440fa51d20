//! gaussdb_mysql_proxy - Database proxy in front of an instance
//!
//! The create call only answers with a job; the proxy being built is the
//! one listed in `ENABLING PROXY` status, and its `pool_id` becomes the id.
//! The listing reports every read replica with its weight, so
//! `readonly_nodes_weight` keeps what was configured rather than being read
//! back. Parameters and access control rules come from their own APIs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use carina_core::provider::{ErrorKind, ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, suppress, types};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value as JsonValue, json};

use super::jobs::wait_for_jobs;
use super::{SERVICE, instance_call};
use crate::HuaweiCloudProvider;
use crate::client::{ApiError, Offset, ServiceClient, path};
use crate::resources::ResourceHandler;
use crate::utils::{
    get_bool, get_int, get_str, has_change, has_changes, json_str, parse_composite_id,
    project_items, remove_nil, require_str, string_value,
};

const ENABLING: &str = "ENABLING PROXY";

const PAGE_SIZE: usize = 100;

pub struct Proxy;

fn proxy_path(instance_id: &str, suffix: &str) -> String {
    path(
        &format!("v3/{{project_id}}/instances/{{instance_id}}/proxy{}", suffix),
        &[("instance_id", instance_id)],
    )
}

fn proxy_action_path(instance_id: &str, proxy_id: &str, action: &str) -> String {
    path(
        &format!("v3/{{project_id}}/instances/{{instance_id}}/proxy/{{proxy_id}}/{}", action),
        &[("instance_id", instance_id), ("proxy_id", proxy_id)],
    )
}

fn split_identifier(identifier: &str) -> ProviderResult<(&str, &str)> {
    let parts = parse_composite_id(identifier, 2, "<instance_id>/<proxy_id>")?;
    Ok((parts[0], parts[1]))
}

/// Proxy errors the service uses instead of 404 once the proxy is gone
fn proxy_error(err: ApiError) -> ProviderError {
    let gone = err.matches(StatusCode::BAD_REQUEST, "DBS.201028")
        || err.matches(StatusCode::CONFLICT, "DBS.200932");
    let converted = ProviderError::from(err);
    if gone {
        converted.with_kind(ErrorKind::NotFound)
    } else {
        converted
    }
}

async fn list_proxies(client: &ServiceClient, instance_id: &str) -> ProviderResult<Vec<JsonValue>> {
    let proxies_path = path(
        "v3/{project_id}/instances/{instance_id}/proxies",
        &[("instance_id", instance_id)],
    );
    let body = client.get(&proxies_path).await.map_err(proxy_error)?;
    Ok(body["proxy_list"].as_array().cloned().unwrap_or_default())
}

fn find_proxy<'a>(proxies: &'a [JsonValue], field: &str, value: &str) -> Option<&'a JsonValue> {
    proxies.iter().find(|p| p["proxy"][field] == value)
}

/// `(id, weight)` of a weight object
fn node_weight(value: &Value) -> Option<(String, i64)> {
    let map = value.as_map()?;
    Some((
        map.get("id")?.as_str()?.to_string(),
        map.get("weight")?.as_int()?,
    ))
}

fn readonly_weights(attrs: &HashMap<String, Value>) -> Vec<(String, i64)> {
    attrs
        .get("readonly_nodes_weight")
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(node_weight)
        .collect()
}

fn weight_json(weights: &[(String, i64)]) -> Vec<JsonValue> {
    weights
        .iter()
        .map(|(id, weight)| json!({ "id": id, "weight": weight }))
        .collect()
}

/// Declared entries of a list attribute missing from the recorded one
fn list_drifted(from: &State, to: &Resource, name: &str) -> bool {
    to.attributes.get(name).is_some_and(|desired| {
        from.attributes
            .get(name)
            .is_none_or(|current| !suppress::subset(current, desired))
    })
}

/// Responses of the rename and auto-add calls carry `result` instead of a job
fn expect_success(response: &JsonValue, what: &str) -> ProviderResult<()> {
    match json_str(response, "result") {
        Some("success") | None => Ok(()),
        Some(other) => Err(ProviderError::new(format!("{} failed: result is {}", what, other))),
    }
}

impl Proxy {
    fn create_body(attrs: &HashMap<String, Value>) -> JsonValue {
        let mut weights = Vec::new();
        if let Some(master) = attrs.get("master_node_weight").and_then(node_weight) {
            weights.push(master);
        }
        weights.extend(readonly_weights(attrs));

        let mut body = json!({
            "flavor_ref": get_str(attrs, "flavor"),
            "node_num": get_int(attrs, "node_num"),
            "proxy_name": get_str(attrs, "proxy_name"),
            "proxy_mode": get_str(attrs, "proxy_mode"),
            "route_mode": get_int(attrs, "route_mode"),
            "subnet_id": get_str(attrs, "subnet_id"),
            "new_node_auto_add_status": get_str(attrs, "new_node_auto_add_status"),
            "new_node_weight": get_int(attrs, "new_node_weight"),
        });
        if !weights.is_empty() {
            body["nodes_read_weight"] = JsonValue::Array(weight_json(&weights));
        }
        remove_nil(body)
    }

    fn weight_body(attrs: &HashMap<String, Value>) -> JsonValue {
        let mut body = Map::new();
        if let Some((_, weight)) = attrs.get("master_node_weight").and_then(node_weight) {
            body.insert("master_weight".to_string(), json!(weight));
        }
        let readonly = readonly_weights(attrs);
        if !readonly.is_empty() {
            body.insert("readonly_nodes".to_string(), JsonValue::Array(weight_json(&readonly)));
        }
        JsonValue::Object(body)
    }

    fn parameters_body(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let items = attrs.get("parameters")?.as_list()?;
        let configurations: Vec<JsonValue> = items.iter().map(Value::to_json).collect();
        Some(json!({ "configurations": configurations }))
    }

    fn access_control_body(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let kind = get_str(attrs, "access_control_type")?;
        let ip_list: Vec<JsonValue> = attrs
            .get("access_control_ip_list")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .map(|entry| remove_nil(entry.to_json()))
            .collect();
        Some(json!({ "type": kind, "ip_list": ip_list }))
    }

    /// Parameters, access control and version, each from its own API
    fn flatten_extras(
        attrs: &mut HashMap<String, Value>,
        parameters: Option<&[JsonValue]>,
        access: Option<&JsonValue>,
        version: Option<&JsonValue>,
    ) {
        if let Some(items) = parameters {
            attrs.insert(
                "parameters".to_string(),
                project_items(items, &[("name", "name"), ("value", "value"), ("elem_type", "elem_type")]),
            );
        }
        if let Some(access) = access {
            if let Some(enabled) = access["enable_ip_group"].as_bool() {
                attrs.insert("open_access_control".to_string(), Value::Bool(enabled));
            }
            if let Some(kind) = access["type"].as_str() {
                attrs.insert("access_control_type".to_string(), string_value(kind));
            }
            if let Some(ips) = access["ip_group"]["ip_list"].as_array() {
                attrs.insert(
                    "access_control_ip_list".to_string(),
                    project_items(ips, &[("ip", "ip"), ("description", "description")]),
                );
            }
        }
        if let Some(version) = version {
            if let Some(current) = version["current_version"].as_str() {
                attrs.insert("current_version".to_string(), string_value(current));
            }
            if let Some(can_upgrade) = version["can_upgrade"].as_bool() {
                attrs.insert("can_upgrade".to_string(), Value::Bool(can_upgrade));
            }
        }
    }

    fn consistence_body(mode: &str) -> JsonValue {
        json!({
            "consistence_mode": mode,
            "session_consistence": mode == "session",
        })
    }

    fn flatten(instance_id: &str, entry: &JsonValue) -> HashMap<String, Value> {
        let proxy = &entry["proxy"];
        let mut attrs = HashMap::new();
        attrs.insert("instance_id".to_string(), string_value(instance_id));

        for (attr, key) in [
            ("flavor", "flavor_ref"),
            ("proxy_name", "name"),
            ("subnet_id", "subnet_id"),
            ("address", "address"),
            ("new_node_auto_add_status", "new_node_auto_add_status"),
            ("consistence_mode", "consistence_mode"),
            ("connection_pool_type", "connection_pool_type"),
            ("status", "status"),
        ] {
            if let Some(v) = proxy[key].as_str() {
                attrs.insert(attr.to_string(), string_value(v));
            }
        }
        for (attr, key) in [("node_num", "node_num"), ("port", "port"), ("route_mode", "route_mode")] {
            if let Some(n) = proxy[key].as_i64() {
                attrs.insert(attr.to_string(), Value::Int(n));
            }
        }
        if let Some(enabled) = proxy["switch_connection_pool_type_enabled"].as_bool() {
            attrs.insert(
                "switch_connection_pool_type_enabled".to_string(),
                Value::Bool(enabled),
            );
        }

        let split = match &proxy["transaction_split"] {
            JsonValue::Bool(true) => "ON",
            JsonValue::String(s) if s == "true" => "ON",
            _ => "OFF",
        };
        attrs.insert("transaction_split".to_string(), string_value(split));

        if let (Some(id), Some(weight)) = (
            entry["master_node"]["id"].as_str(),
            entry["master_node"]["weight"].as_i64(),
        ) {
            attrs.insert(
                "master_node_weight".to_string(),
                Value::Map(HashMap::from([
                    ("id".to_string(), string_value(id)),
                    ("weight".to_string(), Value::Int(weight)),
                ])),
            );
        }

        if let Some(nodes) = proxy["nodes"].as_array() {
            let nodes = nodes
                .iter()
                .map(|node| {
                    let map = ["id", "name", "status", "role", "az_code"]
                        .iter()
                        .filter_map(|key| {
                            node[*key].as_str().map(|v| (key.to_string(), string_value(v)))
                        })
                        .chain(
                            node["frozen_flag"]
                                .as_i64()
                                .map(|flag| ("frozen_flag".to_string(), Value::Int(flag))),
                        )
                        .collect();
                    Value::Map(map)
                })
                .collect();
            attrs.insert("nodes".to_string(), Value::List(nodes));
        }
        attrs
    }

    /// One proxy call, followed by the job it starts when it starts one
    async fn call(
        provider: &HuaweiCloudProvider,
        client: &ServiceClient,
        instance_id: &str,
        timeout: Duration,
        method: Method,
        request_path: &str,
        body: &JsonValue,
    ) -> ProviderResult<JsonValue> {
        let response =
            instance_call(provider, client, instance_id, timeout, method, request_path, Some(body))
                .await?;
        wait_for_jobs(provider, client, &response, timeout).await?;
        Ok(response)
    }

    /// Settings that can only be changed after the proxy exists
    async fn apply_settings(
        provider: &HuaweiCloudProvider,
        client: &ServiceClient,
        instance_id: &str,
        proxy_id: &str,
        from: &State,
        to: &Resource,
        timeout: Duration,
    ) -> ProviderResult<()> {
        let attrs = &to.attributes;

        if has_change(from, to, "port") {
            let body = json!({ "port": get_int(attrs, "port") });
            let port_path = proxy_action_path(instance_id, proxy_id, "port");
            Self::call(provider, client, instance_id, timeout, Method::PUT, &port_path, &body).await?;
        }

        if has_change(from, to, "transaction_split") {
            let body = json!({
                "transaction_split": get_str(attrs, "transaction_split"),
                "proxy_id_list": [proxy_id],
            });
            let split_path = proxy_path(instance_id, "/transaction-split");
            Self::call(provider, client, instance_id, timeout, Method::POST, &split_path, &body).await?;
        }

        if has_change(from, to, "consistence_mode")
            && let Some(mode) = get_str(attrs, "consistence_mode")
        {
            let consistence_path = proxy_action_path(instance_id, proxy_id, "session-consistence");
            let body = Self::consistence_body(mode);
            Self::call(provider, client, instance_id, timeout, Method::PUT, &consistence_path, &body)
                .await?;
        }

        if has_change(from, to, "connection_pool_type") {
            let body = json!({ "connection_pool_type": get_str(attrs, "connection_pool_type") });
            let pool_path = proxy_action_path(instance_id, proxy_id, "connection-pool-type");
            Self::call(provider, client, instance_id, timeout, Method::PUT, &pool_path, &body).await?;
        }

        if list_drifted(from, to, "parameters")
            && let Some(body) = Self::parameters_body(attrs)
        {
            let parameters_path = proxy_action_path(instance_id, proxy_id, "configurations");
            Self::call(provider, client, instance_id, timeout, Method::PUT, &parameters_path, &body)
                .await?;
        }

        if has_change(from, to, "open_access_control")
            && let Some(open) = get_bool(attrs, "open_access_control")
        {
            let body = json!({ "open_access_control": open });
            let switch_path = proxy_action_path(instance_id, proxy_id, "access-control-switch");
            Self::call(provider, client, instance_id, timeout, Method::POST, &switch_path, &body).await?;
        }

        if (has_change(from, to, "access_control_type")
            || list_drifted(from, to, "access_control_ip_list"))
            && let Some(body) = Self::access_control_body(attrs)
        {
            let rule_path = proxy_action_path(instance_id, proxy_id, "access-control");
            Self::call(provider, client, instance_id, timeout, Method::POST, &rule_path, &body).await?;
        }
        Ok(())
    }

    async fn read_extras(
        client: &ServiceClient,
        instance_id: &str,
        proxy_id: &str,
        attrs: &mut HashMap<String, Value>,
    ) {
        let warn = |what: &str, e: &dyn std::fmt::Display| {
            log::warn!("failed to fetch {} of proxy {}: {}", what, proxy_id, e)
        };
        let parameters = client
            .list_all_offset(
                &proxy_action_path(instance_id, proxy_id, "configurations"),
                &[],
                "configurations",
                PAGE_SIZE,
                Offset::Records,
            )
            .await
            .inspect_err(|e| warn("parameters", e))
            .ok();
        let access = client
            .get(&proxy_action_path(instance_id, proxy_id, "ipgroup"))
            .await
            .inspect_err(|e| warn("access control", e))
            .ok();
        let version = client
            .get(&proxy_action_path(instance_id, proxy_id, "taurusproxy/proxy-version"))
            .await
            .inspect_err(|e| warn("version", e))
            .ok();
        Self::flatten_extras(attrs, parameters.as_deref(), access.as_ref(), version.as_ref());
    }
}

#[async_trait]
impl ResourceHandler for Proxy {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_proxy"
    }

    fn schema(&self) -> ResourceSchema {
        let weight = || {
            AttributeType::Object(vec![
                AttributeSchema::new("id", AttributeType::String).required(),
                AttributeSchema::new("weight", AttributeType::Int).required(),
            ])
        };
        let on_off = || AttributeType::Enum(vec!["ON".to_string(), "OFF".to_string()]);

        ResourceSchema::new("gaussdb_mysql_proxy")
            .with_description("Read/write splitting proxy of a GaussDB(for MySQL) instance")
            .with_timeouts(Timeouts::minutes(30, 30, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("instance_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("flavor", AttributeType::String).required())
            .attribute(AttributeSchema::new("node_num", types::positive_int()).required())
            .attribute(AttributeSchema::new("proxy_name", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new(
                    "proxy_mode",
                    AttributeType::Enum(vec!["readwrite".to_string(), "readonly".to_string()]),
                )
                .optional_computed()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("route_mode", AttributeType::Int)
                    .optional_computed()
                    .force_new()
                    .with_description("0 by weight, 1 by load, 2 by connections"),
            )
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("master_node_weight", weight()).optional_computed())
            .attribute(AttributeSchema::new(
                "readonly_nodes_weight",
                AttributeType::List(Box::new(weight())),
            ))
            .attribute(AttributeSchema::new("new_node_auto_add_status", on_off()).optional_computed())
            .attribute(
                AttributeSchema::new("new_node_weight", AttributeType::Int)
                    .required_with(&["new_node_auto_add_status"]),
            )
            .attribute(AttributeSchema::new("port", types::port_number()).optional_computed())
            .attribute(AttributeSchema::new("transaction_split", on_off()).optional_computed())
            .attribute(
                AttributeSchema::new(
                    "consistence_mode",
                    AttributeType::Enum(vec![
                        "session".to_string(),
                        "global".to_string(),
                        "eventual".to_string(),
                    ]),
                )
                .optional_computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "connection_pool_type",
                    AttributeType::Enum(vec!["CLOSED".to_string(), "SESSION".to_string()]),
                )
                .optional_computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "parameters",
                    AttributeType::List(Box::new(AttributeType::Object(vec![
                        AttributeSchema::new("name", AttributeType::String).required(),
                        AttributeSchema::new("value", AttributeType::String).required(),
                        AttributeSchema::new("elem_type", AttributeType::String).required(),
                    ]))),
                )
                .optional_computed()
                .with_suppress_diff(suppress::subset),
            )
            .attribute(AttributeSchema::new("open_access_control", AttributeType::Bool).optional_computed())
            .attribute(
                AttributeSchema::new(
                    "access_control_type",
                    AttributeType::Enum(vec!["white".to_string(), "black".to_string()]),
                )
                .optional_computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "access_control_ip_list",
                    AttributeType::List(Box::new(AttributeType::Object(vec![
                        AttributeSchema::new("ip", AttributeType::String).required(),
                        AttributeSchema::new("description", AttributeType::String),
                    ]))),
                )
                .optional_computed()
                .required_with(&["access_control_type"])
                .with_suppress_diff(suppress::subset),
            )
            .attribute(AttributeSchema::new("address", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("switch_connection_pool_type_enabled", AttributeType::Bool)
                    .computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "nodes",
                    AttributeType::List(Box::new(AttributeType::Map(Box::new(AttributeType::String)))),
                )
                .computed(),
            )
            .attribute(AttributeSchema::new("current_version", AttributeType::String).computed())
            .attribute(AttributeSchema::new("can_upgrade", AttributeType::Bool).computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let attrs = &resource.attributes;
        let timeout = self.schema().timeouts.resolve(attrs).create;
        let instance_id = require_str(attrs, "instance_id")?;
        let client = provider.client(SERVICE).await?;

        let body = Self::create_body(attrs);
        let response = instance_call(
            provider,
            &client,
            instance_id,
            timeout,
            Method::POST,
            &proxy_path(instance_id, ""),
            Some(&body),
        )
        .await?;

        let proxies = list_proxies(&client, instance_id).await?;
        let proxy_id = find_proxy(&proxies, "status", ENABLING)
            .and_then(|p| p["proxy"]["pool_id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::new(format!(
                    "no proxy of instance {} is in {} status after create",
                    instance_id, ENABLING
                ))
            })?;
        wait_for_jobs(provider, &client, &response, timeout).await?;
        log::info!("Created proxy {} for instance {}", proxy_id, instance_id);

        // Only values that differ from what a new proxy starts with
        let mut defaults = State::existing(resource.id.clone(), HashMap::new());
        for (attr, initial) in [
            ("transaction_split", "OFF"),
            ("consistence_mode", "eventual"),
            ("connection_pool_type", "CLOSED"),
        ] {
            defaults.attributes.insert(attr.to_string(), string_value(initial));
        }
        Self::apply_settings(provider, &client, instance_id, &proxy_id, &defaults, resource, timeout)
            .await?;

        let identifier = format!("{}/{}", instance_id, proxy_id);
        self.read(provider, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let (instance_id, proxy_id) = split_identifier(identifier)?;
        let client = provider.client(SERVICE).await?;
        let proxies = list_proxies(&client, instance_id).await?;
        let entry = find_proxy(&proxies, "pool_id", proxy_id).ok_or_else(|| {
            ProviderError::not_found(format!(
                "proxy {} not found in instance {}",
                proxy_id, instance_id
            ))
        })?;
        let mut attrs = Self::flatten(instance_id, entry);
        Self::read_extras(&client, instance_id, proxy_id, &mut attrs).await;
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (instance_id, proxy_id) = split_identifier(identifier)?;
        let attrs = &to.attributes;
        let timeout = self.schema().timeouts.resolve(attrs).update;
        let client = provider.client(SERVICE).await?;

        if has_change(from, to, "flavor") {
            let body = json!({ "flavor_ref": get_str(attrs, "flavor") });
            let flavor_path = proxy_action_path(instance_id, proxy_id, "flavor");
            Self::call(provider, &client, instance_id, timeout, Method::PUT, &flavor_path, &body).await?;
            log::info!("Resized proxy {} to {:?}", proxy_id, get_str(attrs, "flavor"));
        }

        if has_change(from, to, "node_num") {
            let old = get_int(&from.attributes, "node_num").unwrap_or_default();
            let new = get_int(attrs, "node_num").unwrap_or_default();
            if new > old {
                let body = json!({ "node_num": new - old, "proxy_id": proxy_id });
                let enlarge_path = proxy_path(instance_id, "/enlarge");
                Self::call(provider, &client, instance_id, timeout, Method::POST, &enlarge_path, &body)
                    .await?;
            } else {
                let body = json!({ "node_num": old - new });
                let reduce_path = proxy_action_path(instance_id, proxy_id, "reduce");
                Self::call(provider, &client, instance_id, timeout, Method::PUT, &reduce_path, &body)
                    .await?;
            }
            log::info!("Scaled proxy {} from {} to {} node(s)", proxy_id, old, new);
        }

        if has_change(from, to, "proxy_name") {
            let body = json!({ "alias": get_str(attrs, "proxy_name") });
            let rename_path = proxy_action_path(instance_id, proxy_id, "rename");
            let response =
                Self::call(provider, &client, instance_id, timeout, Method::PUT, &rename_path, &body)
                    .await?;
            expect_success(&response, "renaming proxy")?;
        }

        if has_changes(from, to, &["master_node_weight", "readonly_nodes_weight"]) {
            let weight_path = proxy_action_path(instance_id, proxy_id, "weight");
            let body = Self::weight_body(attrs);
            Self::call(provider, &client, instance_id, timeout, Method::PUT, &weight_path, &body).await?;
        }

        if has_changes(from, to, &["new_node_auto_add_status", "new_node_weight"]) {
            let body = remove_nil(json!({
                "switch_status": get_str(attrs, "new_node_auto_add_status"),
                "weight": get_int(attrs, "new_node_weight"),
            }));
            let auto_add_path = proxy_action_path(instance_id, proxy_id, "new-node-auto-add");
            let response =
                Self::call(provider, &client, instance_id, timeout, Method::POST, &auto_add_path, &body)
                    .await?;
            expect_success(&response, "changing new node auto add")?;
        }

        Self::apply_settings(provider, &client, instance_id, proxy_id, from, to, timeout).await?;
        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let (instance_id, proxy_id) = split_identifier(identifier)?;
        let timeout = self.schema().timeouts.resolve(&state.attributes).delete;
        let client = provider.client(SERVICE).await?;
        let body = json!({ "proxy_ids": [proxy_id] });
        let response = client
            .request(Method::DELETE, &proxy_path(instance_id, ""), &[], Some(&body))
            .await
            .map_err(proxy_error)?;
        wait_for_jobs(provider, &client, &response, timeout).await
    }
}
