//! gaussdb_mysql_instance - GaussDB(for MySQL) cluster
//!
//! Creation only covers the core cluster. Switches, parameters, backup
//! policy, addresses, monitoring, auto scaling, encryption, description and
//! tags are applied through their own APIs once the instance is `ACTIVE`,
//! the same calls that update them later. Every mutation goes through
//! [`instance_call`] and is followed by its job where the API returns one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, suppress, types};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Map, Value as JsonValue, json};

use super::jobs::wait_for_jobs;
use super::{SERVICE, instance_call, instance_path, wait_for_instance};
use crate::HuaweiCloudProvider;
use crate::client::{Offset, ServiceClient, path};
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, flatten_tags, get_bool, get_int, get_str,
    has_change, has_changes, json_path, json_str, remove_nil, require_json_str, string_value,
    tags_changed, tags_diff, tags_schema, value_from_api, value_to_api,
};

const CREATE_FIELDS: &[&str] = &[
    "name",
    "flavor",
    "vpc_id",
    "subnet_id",
    "security_group_id",
    "configuration_id",
    "enterprise_project_id",
    "time_zone",
    "read_replicas",
    "availability_zone_mode",
    "password",
    "dedicated_resource_id",
];

const CREATE_PENDING: &[&str] = &["BUILD", "BACKING UP"];
const CREATE_DELAY: Duration = Duration::from_secs(180);
const CREATE_POLL: Duration = Duration::from_secs(20);

const DELETE_PENDING: &[&str] = &["ACTIVE", "BACKING UP", "FAILED"];
const DELETE_DELAY: Duration = Duration::from_secs(10);

const DEFAULT_ENGINE: &str = "gaussdb-mysql";
const DEFAULT_VERSION: &str = "8.0";

/// Backups run every day of the week
const BACKUP_PERIOD: &str = "1,2,3,4,5,6,7";

const CONFIGURATION_SETTLE: Duration = Duration::from_secs(30);

const PAGE_SIZE: usize = 100;

/// Auto scaling fields the cloud reports but never accepts
const AUTO_SCALING_COMPUTED: &[&str] = &["id", "min_flavor", "silence_start_at", "min_read_only_count"];

pub struct Instance;

fn sub_path(id: &str, suffix: &str) -> String {
    format!("{}/{}", instance_path(id), suffix)
}

fn enum_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|s| s.to_string()).collect())
}

fn node_type() -> AttributeType {
    AttributeType::Object(
        ["id", "name", "type", "status", "private_read_ip", "availability_zone"]
            .into_iter()
            .map(|name| AttributeSchema::new(name, AttributeType::String).computed())
            .collect(),
    )
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "ON" } else { "OFF" }
}

fn auto_scaling_type() -> AttributeType {
    let int = |name: &str| AttributeSchema::new(name, AttributeType::Int);
    let computed = |name: &str, attr_type| AttributeSchema::new(name, attr_type).computed();
    AttributeType::Object(vec![
        AttributeSchema::new("status", enum_of(&["ON", "OFF"])).required(),
        AttributeSchema::new(
            "scaling_strategy",
            AttributeType::Object(vec![
                AttributeSchema::new("flavor_switch", enum_of(&["ON", "OFF"])).required(),
                AttributeSchema::new("read_only_switch", enum_of(&["ON", "OFF"])).required(),
            ]),
        )
        .required(),
        int("monitor_cycle"),
        int("silence_cycle"),
        int("enlarge_threshold"),
        AttributeSchema::new("max_flavor", AttributeType::String),
        AttributeSchema::new("reduce_enabled", AttributeType::Bool),
        int("max_read_only_count"),
        int("read_only_weight"),
        computed("id", AttributeType::String),
        computed("min_flavor", AttributeType::String),
        computed("silence_start_at", AttributeType::String),
        computed("min_read_only_count", AttributeType::Int),
    ])
}

/// Read replicas that count toward `read_replicas`
fn is_serving_replica(node: &JsonValue) -> bool {
    node["type"] == "slave" && matches!(node["status"].as_str(), Some("ACTIVE" | "BACKING UP"))
}

/// `id` of the first listed item whose `key` equals `name`
fn find_id_by_name(items: &JsonValue, key: &str, name: &str) -> Option<String> {
    items
        .as_array()?
        .iter()
        .find(|item| item[key].as_str() == Some(name))
        .and_then(|item| item["id"].as_str())
        .map(str::to_string)
}

/// Responses of the per-setting read APIs; `None` when the call failed
#[derive(Default)]
struct SideSettings {
    audit_log: Option<JsonValue>,
    sql_filter: Option<JsonValue>,
    parameters: Option<JsonValue>,
    monitoring: Option<JsonValue>,
    slow_log: Option<JsonValue>,
    auto_scaling: Option<JsonValue>,
    encryption: Option<JsonValue>,
    version: Option<JsonValue>,
}

async fn fetch_side(client: &ServiceClient, id: &str, request_path: &str, what: &str) -> Option<JsonValue> {
    match client.get(request_path).await {
        Ok(body) => Some(body),
        Err(e) => {
            log::warn!("failed to fetch {} of instance {}: {}", what, id, e);
            None
        }
    }
}

impl Instance {
    fn create_body(
        schema: &ResourceSchema,
        attrs: &HashMap<String, Value>,
        region: &str,
    ) -> ProviderResult<JsonValue> {
        let mut body = build_body(schema, attrs, CREATE_FIELDS);
        body.insert("region".to_string(), json!(region));
        body.insert("mode".to_string(), json!("Cluster"));

        let datastore = attrs.get("datastore").and_then(Value::as_map);
        let field = |key: &str, default: &str| {
            datastore
                .and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        body.insert(
            "datastore".to_string(),
            json!({
                "type": field("engine", DEFAULT_ENGINE),
                "version": field("version", DEFAULT_VERSION),
            }),
        );

        if get_str(attrs, "availability_zone_mode") == Some("multi") {
            let master_az = get_str(attrs, "master_availability_zone").ok_or_else(|| {
                ProviderError::validation(
                    "'master_availability_zone' is required in multi availability zone mode",
                )
            })?;
            body.insert("master_availability_zone".to_string(), json!(master_az));
        }
        if let Some(size) = get_int(attrs, "volume_size") {
            body.insert("volume".to_string(), json!({ "size": size }));
        }
        if get_bool(attrs, "table_name_case_sensitivity") == Some(true) {
            body.insert("lower_case_table_names".to_string(), json!(0));
        }
        Ok(remove_nil(JsonValue::Object(body)))
    }

    fn flatten(schema: &ResourceSchema, body: &JsonValue) -> HashMap<String, Value> {
        let instance = &body["instance"];
        let mut attrs = HashMap::new();
        flatten_into(
            schema,
            instance,
            &mut attrs,
            &["port", "datastore", "backup_strategy", "read_replicas", "volume_size", "flavor"],
        );

        if let Some((begin, end)) = json_str(instance, "maintenance_window")
            .and_then(|window| window.split_once('-'))
        {
            attrs.insert("maintain_begin".to_string(), string_value(begin));
            attrs.insert("maintain_end".to_string(), string_value(end));
        }
        if let Some(port) = json_str(instance, "port").and_then(|p| p.parse::<i64>().ok()) {
            attrs.insert("port".to_string(), Value::Int(port));
        }
        if let Some(ip) = json_str(instance, "private_write_ips.0") {
            attrs.insert("private_write_ip".to_string(), string_value(ip));
        }
        if let Some(dns) = json_str(instance, "private_dns_names.0").filter(|d| !d.is_empty()) {
            attrs.insert("private_dns_name".to_string(), string_value(dns));
            let prefix = dns.split('.').next().unwrap_or(dns);
            attrs.insert("private_dns_name_prefix".to_string(), string_value(prefix));
        }

        if let Some(datastore) = instance.get("datastore").filter(|d| d.is_object()) {
            let engine = match datastore["type"].as_str().unwrap_or_default() {
                "GaussDB(for MySQL)" => DEFAULT_ENGINE,
                other => other,
            };
            let version = datastore["version"].as_str().unwrap_or_default();
            attrs.insert(
                "datastore".to_string(),
                Value::Map(HashMap::from([
                    ("engine".to_string(), string_value(engine)),
                    ("version".to_string(), string_value(version)),
                ])),
            );
        }

        if let Some(strategy) = instance.get("backup_strategy").filter(|s| s.is_object()) {
            let mut map = HashMap::new();
            if let Some(start) = strategy["start_time"].as_str() {
                map.insert("start_time".to_string(), string_value(start));
            }
            // keep_days comes back as a string
            let keep_days = strategy["keep_days"]
                .as_str()
                .and_then(|d| d.parse::<i64>().ok())
                .or_else(|| strategy["keep_days"].as_i64());
            if let Some(days) = keep_days {
                map.insert("keep_days".to_string(), Value::Int(days));
            }
            attrs.insert("backup_strategy".to_string(), Value::Map(map));
        }

        let nodes = instance["nodes"].as_array().cloned().unwrap_or_default();
        let mut flavor = None;
        let mut volume_size = None;
        let mut node_list = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut map = HashMap::new();
            for key in ["id", "name", "type", "status", "availability_zone"] {
                if let Some(v) = node[key].as_str() {
                    map.insert(key.to_string(), string_value(v));
                }
            }
            if let Some(ip) = json_str(node, "private_read_ips.0") {
                map.insert("private_read_ip".to_string(), string_value(ip));
            }
            if let Some(size) = json_path(node, "volume.size").and_then(JsonValue::as_i64)
                && size > 0
            {
                volume_size = Some(size);
            }
            if flavor.is_none() {
                flavor = node["flavor_ref"].as_str().filter(|f| !f.is_empty());
            }
            node_list.push(Value::Map(map));
        }
        let replicas = nodes.iter().filter(|n| is_serving_replica(n)).count() as i64;

        attrs.insert("nodes".to_string(), Value::List(node_list));
        attrs.insert("read_replicas".to_string(), Value::Int(replicas));
        if let Some(size) = volume_size {
            attrs.insert("volume_size".to_string(), Value::Int(size));
        }
        if let Some(flavor) = flavor {
            attrs.insert("flavor".to_string(), string_value(flavor));
        }
        attrs
    }

    /// IDs of the read replicas to drop when shrinking by `count`, taken
    /// from the front of the reported ACTIVE replicas
    fn replicas_to_remove(state: &State, count: usize) -> ProviderResult<Vec<String>> {
        let active: Vec<String> = state
            .attributes
            .get("nodes")
            .and_then(Value::as_list)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(Value::as_map)
                    .filter(|node| {
                        node.get("type").and_then(Value::as_str) == Some("slave")
                            && node.get("status").and_then(Value::as_str) == Some("ACTIVE")
                    })
                    .filter_map(|node| node.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // the cluster keeps at least one read replica
        if active.len() <= count {
            return Err(ProviderError::validation(format!(
                "cannot remove {} read replica(s): only {} are active",
                count,
                active.len()
            )));
        }
        Ok(active.into_iter().take(count).collect())
    }

    fn backup_policy_body(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let strategy = attrs.get("backup_strategy")?.as_map()?;
        let mut policy = Map::new();
        if let Some(start) = strategy.get("start_time").and_then(Value::as_str) {
            policy.insert("start_time".to_string(), json!(start));
        }
        if let Some(days) = strategy.get("keep_days").and_then(Value::as_int) {
            policy.insert("keep_days".to_string(), json!(days));
        }
        policy.insert("period".to_string(), json!(BACKUP_PERIOD));
        Some(json!({ "backup_policy": policy }))
    }

    fn maintenance_body(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let begin = get_str(attrs, "maintain_begin")?;
        let end = get_str(attrs, "maintain_end")?;
        Some(json!({ "start_time": begin, "end_time": end }))
    }

    /// Declared parameters whose reported value differs
    fn changed_parameters(from: &State, to: &Resource) -> Map<String, JsonValue> {
        let Some(desired) = to.attributes.get("parameters").and_then(Value::as_map) else {
            return Map::new();
        };
        let current = from.attributes.get("parameters").and_then(Value::as_map);
        desired
            .iter()
            .filter(|(name, value)| current.and_then(|c| c.get(*name)) != Some(*value))
            .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), json!(v))))
            .collect()
    }

    fn flatten_parameters(body: &JsonValue) -> Option<Value> {
        let items = body.get("configuration_parameters")?.as_array()?;
        let map = items
            .iter()
            .filter_map(|item| {
                let name = item["name"].as_str()?;
                let value = item["value"].as_str().unwrap_or_default();
                Some((name.to_string(), string_value(value)))
            })
            .collect();
        Some(Value::Map(map))
    }

    fn monitoring_body(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let enabled = get_bool(attrs, "seconds_level_monitoring_enabled")?;
        let mut body = json!({ "monitor_switch": enabled });
        if enabled && let Some(period) = get_int(attrs, "seconds_level_monitoring_period") {
            body["period"] = json!(period);
        }
        Some(body)
    }

    fn auto_scaling_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let attr = schema.get("auto_scaling")?;
        let mut body = value_to_api(&attr.attr_type, attrs.get("auto_scaling")?);
        if let Some(obj) = body.as_object_mut() {
            for key in AUTO_SCALING_COMPUTED {
                obj.remove(*key);
            }
        }
        Some(remove_nil(body))
    }

    fn encryption_body(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let status = get_str(attrs, "encryption_status")?;
        Some(remove_nil(json!({
            "encryption_status": status,
            "type": get_str(attrs, "encryption_type"),
            "kms_key_id": get_str(attrs, "kms_key_id"),
        })))
    }

    /// Everything the instance reports through its side APIs
    fn flatten_side_settings(
        schema: &ResourceSchema,
        attrs: &mut HashMap<String, Value>,
        side: &SideSettings,
    ) {
        let switch_on = |body: &Option<JsonValue>| {
            body.as_ref()
                .and_then(|b| b["switch_status"].as_str())
                .map(|s| Value::Bool(s.eq_ignore_ascii_case("ON")))
        };
        if let Some(v) = switch_on(&side.audit_log) {
            attrs.insert("audit_log_enabled".to_string(), v);
        }
        if let Some(v) = switch_on(&side.sql_filter) {
            attrs.insert("sql_filter_enabled".to_string(), v);
        }
        if let Some(v) = side.parameters.as_ref().and_then(Self::flatten_parameters) {
            attrs.insert("parameters".to_string(), v);
        }
        if let Some(body) = &side.monitoring {
            if let Some(enabled) = body["monitor_switch"].as_bool() {
                attrs.insert("seconds_level_monitoring_enabled".to_string(), Value::Bool(enabled));
            }
            if let Some(period) = body["period"].as_i64() {
                attrs.insert("seconds_level_monitoring_period".to_string(), Value::Int(period));
            }
        }
        // the switch is reported as "true" or "false"
        if let Some(switch) = side.slow_log.as_ref().and_then(|b| b["open_slow_log_switch"].as_str()) {
            attrs.insert("slow_log_show_original_switch".to_string(), Value::Bool(switch == "true"));
        }
        if let Some(body) = side.auto_scaling.as_ref().filter(|b| b["status"].is_string())
            && let Some(attr) = schema.get("auto_scaling")
            && let Some(v) = value_from_api(&attr.attr_type, body)
        {
            attrs.insert("auto_scaling".to_string(), v);
        }
        if let Some(status) = side.encryption.as_ref().and_then(|b| b["encryption_status"].as_str()) {
            attrs.insert("encryption_status".to_string(), string_value(status.to_uppercase()));
            if let Some(kind) = side.encryption.as_ref().and_then(|b| b["type"].as_str()) {
                attrs.insert("encryption_type".to_string(), string_value(kind));
            }
        }
        if let Some(body) = &side.version {
            if let Some(flag) = body["upgrade_flag"].as_bool() {
                attrs.insert("upgrade_flag".to_string(), Value::Bool(flag));
            }
            for (name, key) in [
                ("current_version", "datastore.current_version"),
                ("current_kernel_version", "datastore.current_kernel_version"),
            ] {
                if let Some(v) = json_str(body, key) {
                    attrs.insert(name.to_string(), string_value(v));
                }
            }
        }
    }

    /// Fill `configuration_id` and `dedicated_resource_id` from their names
    /// when only the name is given
    async fn resolve_names(client: &ServiceClient, to: &Resource) -> ProviderResult<Resource> {
        let mut resolved = to.clone();
        if get_str(&to.attributes, "configuration_id").is_none()
            && let Some(name) = get_str(&to.attributes, "configuration_name")
        {
            let body = client.get("v3/{project_id}/configurations").await?;
            let id = find_id_by_name(&body["configurations"], "name", name).ok_or_else(|| {
                ProviderError::validation(format!("parameter template '{}' not found", name))
            })?;
            resolved.attributes.insert("configuration_id".to_string(), string_value(id));
        }
        if get_str(&to.attributes, "dedicated_resource_id").is_none()
            && let Some(name) = get_str(&to.attributes, "dedicated_resource_name")
        {
            let items = client
                .list_all_offset("v3/{project_id}/dedicated-resources", &[], "resources", PAGE_SIZE, Offset::Records)
                .await?;
            let id = find_id_by_name(&JsonValue::Array(items), "resource_name", name).ok_or_else(|| {
                ProviderError::validation(format!("dedicated resource '{}' not found", name))
            })?;
            resolved.attributes.insert("dedicated_resource_id".to_string(), string_value(id));
        }
        Ok(resolved)
    }

    /// Instance already carrying `name`, for `force_import`
    async fn find_by_name(client: &ServiceClient, name: &str) -> ProviderResult<Option<String>> {
        let items = client
            .list_all_offset(
                "v3/{project_id}/instances",
                &[("name", name.to_string())],
                "instances",
                PAGE_SIZE,
                Offset::Records,
            )
            .await?;
        Ok(find_id_by_name(&JsonValue::Array(items), "name", name))
    }

    /// One mutating call; jobs referenced by the response are awaited
    async fn mutate(
        provider: &HuaweiCloudProvider,
        client: &ServiceClient,
        id: &str,
        timeout: Duration,
        method: Method,
        request_path: &str,
        body: Option<&JsonValue>,
    ) -> ProviderResult<()> {
        let response = instance_call(provider, client, id, timeout, method, request_path, body).await?;
        wait_for_jobs(provider, client, &response, timeout).await
    }

    /// Settings that live outside the create request, applied once the
    /// instance exists (`from` holds what the instance already has)
    async fn apply_settings(
        provider: &HuaweiCloudProvider,
        client: &ServiceClient,
        id: &str,
        from: &State,
        to: &Resource,
        timeout: Duration,
        creating: bool,
    ) -> ProviderResult<()> {
        let schema = Instance.schema();
        let attrs = &to.attributes;
        let mutate = |method: Method, request_path: String, body: Option<JsonValue>| async move {
            Self::mutate(provider, client, id, timeout, method, &request_path, body.as_ref()).await
        };

        if has_change(from, to, "audit_log_enabled")
            && let Some(enabled) = get_bool(attrs, "audit_log_enabled")
        {
            let audit_path = path("v3/{project_id}/instance/{id}/audit-log/switch", &[("id", id)]);
            mutate(Method::POST, audit_path, Some(json!({ "switch_status": on_off(enabled) }))).await?;
        }

        if has_change(from, to, "sql_filter_enabled")
            && let Some(enabled) = get_bool(attrs, "sql_filter_enabled")
        {
            let body = json!({ "switch_status": on_off(enabled) });
            mutate(Method::POST, sub_path(id, "sql-filter/switch"), Some(body)).await?;
        }

        if has_change(from, to, "backup_strategy")
            && let Some(body) = Self::backup_policy_body(attrs)
        {
            let policy_path = path(
                "v3/{project_id}/instances/{id}/backups/policy/update",
                &[("id", id)],
            );
            mutate(Method::PUT, policy_path, Some(body)).await?;
            log::debug!("Updated backup policy of instance {}", id);
        }

        let configuration_applied = has_change(from, to, "configuration_id");
        if configuration_applied
            && let Some(configuration_id) = get_str(attrs, "configuration_id")
        {
            let apply_path = path(
                "v3/{project_id}/configurations/{id}/apply",
                &[("id", configuration_id)],
            );
            mutate(Method::PUT, apply_path, Some(json!({ "instance_ids": [id] }))).await?;
            // parameters take a moment to land after the job reports success
            tokio::time::sleep(provider.pause(CONFIGURATION_SETTLE)).await;
            log::info!(
                "Applied configuration {} to instance {}; some parameters need a restart",
                configuration_id,
                id
            );
        }

        // a new template resets every parameter, so declared ones go out again
        let parameters = if configuration_applied {
            Self::changed_parameters(&State::existing(to.id.clone(), HashMap::new()), to)
        } else {
            Self::changed_parameters(from, to)
        };
        if !parameters.is_empty() {
            let body = json!({ "parameter_values": parameters });
            let response = instance_call(
                provider, client, id, timeout, Method::PUT, &sub_path(id, "configurations"), Some(&body),
            )
            .await?;
            wait_for_jobs(provider, client, &response, timeout).await?;
            if response["restart_required"].as_bool() == Some(true) {
                if creating {
                    mutate(Method::POST, sub_path(id, "restart"), Some(json!({ "delay": false }))).await?;
                    log::info!("Restarted instance {} to apply its parameters", id);
                } else {
                    log::warn!("Parameters of instance {} take effect after a restart", id);
                }
            }
        }

        if has_change(from, to, "private_write_ip")
            && let Some(ip) = get_str(attrs, "private_write_ip")
        {
            mutate(Method::PUT, sub_path(id, "internal-ip"), Some(json!({ "internal_ip": ip }))).await?;
        }

        if has_change(from, to, "port")
            && let Some(port) = get_int(attrs, "port")
        {
            mutate(Method::PUT, sub_path(id, "port"), Some(json!({ "port": port }))).await?;
        }

        if has_change(from, to, "private_dns_name_prefix")
            && let Some(prefix) = get_str(attrs, "private_dns_name_prefix")
        {
            if get_str(&from.attributes, "private_dns_name").is_none() {
                mutate(Method::POST, sub_path(id, "dns"), Some(json!({ "dns_type": "private" }))).await?;
            }
            let body = json!({ "dns_type": "private", "dns_name": prefix });
            mutate(Method::PUT, sub_path(id, "dns"), Some(body)).await?;
        }

        if has_changes(from, to, &["maintain_begin", "maintain_end"])
            && let Some(body) = Self::maintenance_body(attrs)
        {
            mutate(Method::PUT, sub_path(id, "ops-window"), Some(body)).await?;
        }

        if has_changes(from, to, &["seconds_level_monitoring_enabled", "seconds_level_monitoring_period"])
            && let Some(body) = Self::monitoring_body(attrs)
        {
            mutate(Method::PUT, sub_path(id, "monitor-policy"), Some(body)).await?;
        }

        // SSL is on for new instances
        if has_change(from, to, "ssl_option")
            && let Some(option) = get_str(attrs, "ssl_option")
            && !(creating && option == "true")
        {
            let body = json!({ "ssl_option": option == "true" });
            mutate(Method::PUT, sub_path(id, "ssl-option"), Some(body)).await?;
        }

        if has_change(from, to, "slow_log_show_original_switch")
            && let Some(enabled) = get_bool(attrs, "slow_log_show_original_switch")
        {
            let body = json!({ "open_slow_log_switch": enabled });
            mutate(Method::POST, sub_path(id, "slowlog/modify"), Some(body)).await?;
        }

        if has_change(from, to, "description") {
            let alias = get_str(attrs, "description").unwrap_or_default();
            mutate(Method::PUT, sub_path(id, "alias"), Some(json!({ "alias": alias }))).await?;
        }

        // the policy reports fields of its own, so only declared ones count
        let auto_scaling_changed = attrs.get("auto_scaling").is_some_and(|desired| {
            from.attributes
                .get("auto_scaling")
                .is_none_or(|current| !suppress::subset(current, desired))
        });
        if auto_scaling_changed
            && let Some(body) = Self::auto_scaling_body(&schema, attrs)
        {
            mutate(Method::PUT, sub_path(id, "auto-scaling/policy"), Some(body)).await?;
        }

        if has_changes(from, to, &["encryption_status", "encryption_type", "kms_key_id"])
            && let Some(body) = Self::encryption_body(attrs)
            && !(creating && get_str(attrs, "encryption_status") == Some("OFF"))
        {
            mutate(Method::POST, sub_path(id, "backups/encryption"), Some(body)).await?;
        }

        if tags_changed(from, to) {
            let (remove, add) = tags_diff(from.attributes.get("tags"), attrs.get("tags"));
            if !remove.is_empty() {
                let body = json!({"action": "delete", "tags": remove});
                mutate(Method::POST, sub_path(id, "tags/action"), Some(body)).await?;
            }
            if !add.is_empty() {
                let body = json!({"action": "create", "tags": add});
                mutate(Method::POST, sub_path(id, "tags/action"), Some(body)).await?;
            }
        }
        Ok(())
    }

    async fn read_side_settings(client: &ServiceClient, id: &str) -> SideSettings {
        let audit_path = path("v3/{project_id}/instance/{id}/audit-log/switch-status", &[("id", id)]);
        SideSettings {
            audit_log: fetch_side(client, id, &audit_path, "audit log switch").await,
            sql_filter: fetch_side(client, id, &sub_path(id, "sql-filter/switch"), "sql filter switch").await,
            parameters: fetch_side(client, id, &sub_path(id, "configurations"), "parameters").await,
            monitoring: fetch_side(client, id, &sub_path(id, "monitor-policy"), "monitoring policy").await,
            slow_log: fetch_side(client, id, &sub_path(id, "slowlog/query"), "slow log switch").await,
            auto_scaling: fetch_side(client, id, &sub_path(id, "auto-scaling/policy"), "auto scaling policy").await,
            encryption: fetch_side(client, id, &sub_path(id, "backups/encryption"), "backup encryption").await,
            version: fetch_side(client, id, &sub_path(id, "database-version"), "version").await,
        }
    }
}

#[async_trait]
impl ResourceHandler for Instance {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_instance"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("gaussdb_mysql_instance")
            .with_description("GaussDB(for MySQL) cluster")
            .with_timeouts(Timeouts::minutes(60, 60, 30))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("name", types::gaussdb_instance_name()).required())
            .attribute(
                AttributeSchema::new("flavor", AttributeType::String)
                    .required()
                    .with_provider_name("flavor_ref"),
            )
            .attribute(AttributeSchema::new("password", AttributeType::String).required().sensitive())
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("subnet_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("security_group_id", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("configuration_id", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("configuration_name", AttributeType::String)
                    .optional_computed()
                    .conflicts_with(&["configuration_id"])
                    .deprecated("use configuration_id instead"),
            )
            .attribute(
                AttributeSchema::new("parameters", AttributeType::Map(Box::new(AttributeType::String)))
                    .optional_computed()
                    .with_suppress_diff(suppress::subset)
                    .with_description("Parameter name to value; only the declared ones are managed"),
            )
            .attribute(
                AttributeSchema::new("dedicated_resource_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("dedicated_resource_name", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("force_import", AttributeType::Bool)
                    .with_description("Adopt an existing instance with the same name"),
            )
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("table_name_case_sensitivity", AttributeType::Bool).force_new(),
            )
            .attribute(
                AttributeSchema::new("read_replicas", types::positive_int())
                    .with_default(Value::Int(1))
                    .with_provider_name("slave_count"),
            )
            .attribute(AttributeSchema::new("volume_size", types::positive_int()).optional_computed())
            .attribute(
                AttributeSchema::new("time_zone", AttributeType::String)
                    .with_default(string_value("UTC+08:00"))
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("availability_zone_mode", enum_of(&["single", "multi"]))
                    .with_default(string_value("single"))
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("master_availability_zone", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "datastore",
                    AttributeType::Object(vec![
                        AttributeSchema::new("engine", enum_of(&[DEFAULT_ENGINE])).required(),
                        AttributeSchema::new("version", AttributeType::String).required(),
                    ]),
                )
                .optional_computed()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "backup_strategy",
                    AttributeType::Object(vec![
                        AttributeSchema::new("start_time", AttributeType::String).required(),
                        AttributeSchema::new("keep_days", AttributeType::Int),
                    ]),
                )
                .optional_computed(),
            )
            .attribute(
                AttributeSchema::new("private_write_ip", types::ipv4_address())
                    .optional_computed(),
            )
            .attribute(AttributeSchema::new("port", types::port_number()).optional_computed())
            .attribute(
                AttributeSchema::new("maintain_begin", AttributeType::String)
                    .optional_computed()
                    .required_with(&["maintain_end"])
                    .with_description("Start of the maintenance window, HH:MM"),
            )
            .attribute(
                AttributeSchema::new("maintain_end", AttributeType::String)
                    .optional_computed()
                    .required_with(&["maintain_begin"]),
            )
            .attribute(
                AttributeSchema::new("private_dns_name_prefix", AttributeType::String).optional_computed(),
            )
            .attribute(AttributeSchema::new("private_dns_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("audit_log_enabled", AttributeType::Bool).optional_computed())
            .attribute(AttributeSchema::new("sql_filter_enabled", AttributeType::Bool).optional_computed())
            .attribute(
                AttributeSchema::new("ssl_option", enum_of(&["true", "false"]))
                    .with_description("Whether SSL is enabled; new instances have it on"),
            )
            .attribute(
                AttributeSchema::new("seconds_level_monitoring_enabled", AttributeType::Bool)
                    .optional_computed(),
            )
            .attribute(
                AttributeSchema::new("seconds_level_monitoring_period", AttributeType::Int)
                    .optional_computed()
                    .required_with(&["seconds_level_monitoring_enabled"]),
            )
            .attribute(
                AttributeSchema::new("slow_log_show_original_switch", AttributeType::Bool)
                    .optional_computed(),
            )
            .attribute(AttributeSchema::new("auto_scaling", auto_scaling_type()).optional_computed())
            .attribute(
                AttributeSchema::new("encryption_status", enum_of(&["ON", "OFF"])).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("encryption_type", AttributeType::String)
                    .optional_computed()
                    .required_with(&["encryption_status"]),
            )
            .attribute(
                AttributeSchema::new("kms_key_id", AttributeType::String)
                    .required_with(&["encryption_status"]),
            )
            .attribute(
                AttributeSchema::new("description", AttributeType::String).with_provider_name("alias"),
            )
            .attribute(tags_schema())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("mode", AttributeType::String)
                    .computed()
                    .with_provider_name("type"),
            )
            .attribute(AttributeSchema::new("db_user_name", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("created_at", AttributeType::String)
                    .computed()
                    .with_provider_name("created"),
            )
            .attribute(
                AttributeSchema::new("updated_at", AttributeType::String)
                    .computed()
                    .with_provider_name("updated"),
            )
            .attribute(AttributeSchema::new("current_version", AttributeType::String).computed())
            .attribute(AttributeSchema::new("current_kernel_version", AttributeType::String).computed())
            .attribute(AttributeSchema::new("upgrade_flag", AttributeType::Bool).computed())
            .attribute(
                AttributeSchema::new("nodes", AttributeType::List(Box::new(node_type()))).computed(),
            )
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let client = provider.client(SERVICE).await?;

        if get_bool(&resource.attributes, "force_import") == Some(true)
            && let Some(name) = get_str(&resource.attributes, "name")
            && let Some(id) = Self::find_by_name(&client, name).await?
        {
            log::info!("Importing existing GaussDB(for MySQL) instance {} ({})", name, id);
            let current = self.read(provider, &resource.id, &id).await?;
            return self.update(provider, &id, &current, resource).await;
        }

        let resource = &Self::resolve_names(&client, resource).await?;
        let body = Self::create_body(&schema, &resource.attributes, provider.region())?;
        let response = client.post("v3/{project_id}/instances", &body).await?;
        let id = require_json_str(&response, "instance.id")?;
        log::info!("Created GaussDB(for MySQL) instance {}", id);

        wait_for_instance(
            provider,
            &client,
            &id,
            CREATE_PENDING,
            &["ACTIVE"],
            timeouts.create,
            CREATE_DELAY,
            CREATE_POLL,
        )
        .await?;

        // nothing beyond the create request is in place yet
        let created = State::existing(resource.id.clone(), HashMap::new());
        let mut settings = resource.clone();
        settings.attributes.remove("configuration_id");
        Self::apply_settings(provider, &client, &id, &created, &settings, timeouts.create, true).await?;

        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&instance_path(identifier)).await?;
        if json_str(&body, "instance.id").is_none_or(str::is_empty) {
            return Err(ProviderError::not_found(format!("instance {} not found", identifier)));
        }
        let mut attrs = Self::flatten(&self.schema(), &body);

        match client.get(&sub_path(identifier, "tags")).await {
            Ok(tags) => {
                if let Some(tags) = flatten_tags(tags.get("tags")) {
                    attrs.insert("tags".to_string(), tags);
                }
            }
            Err(e) => log::warn!("failed to fetch tags of instance {}: {}", identifier, e),
        }

        let side = Self::read_side_settings(&client, identifier).await;
        Self::flatten_side_settings(&self.schema(), &mut attrs, &side);

        if let Some(configuration_id) = get_str(&attrs, "configuration_id").map(str::to_string)
            && let Some(body) =
                fetch_side(&client, identifier, "v3/{project_id}/configurations", "parameter templates").await
            && let Some(name) = body["configurations"].as_array().and_then(|items| {
                items
                    .iter()
                    .find(|c| c["id"].as_str() == Some(configuration_id.as_str()))
                    .and_then(|c| c["name"].as_str())
            })
        {
            attrs.insert("configuration_name".to_string(), string_value(name));
        }
        if let Some(resource_id) = get_str(&attrs, "dedicated_resource_id").map(str::to_string)
            && let Some(body) =
                fetch_side(&client, identifier, "v3/{project_id}/dedicated-resources", "dedicated resources").await
            && let Some(name) = body["resources"].as_array().and_then(|items| {
                items
                    .iter()
                    .find(|r| r["id"].as_str() == Some(resource_id.as_str()))
                    .and_then(|r| r["resource_name"].as_str())
            })
        {
            attrs.insert("dedicated_resource_name".to_string(), string_value(name));
        }

        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let timeout = self.schema().timeouts.resolve(&to.attributes).update;
        let client = provider.client(SERVICE).await?;
        let id = identifier;
        let to = &Self::resolve_names(&client, to).await?;

        if has_change(from, to, "name")
            && let Some(name) = get_str(&to.attributes, "name")
        {
            let body = json!({ "name": name });
            Self::mutate(provider, &client, id, timeout, Method::PUT, &sub_path(id, "name"), Some(&body)).await?;
        }

        if has_change(from, to, "password")
            && let Some(password) = get_str(&to.attributes, "password")
        {
            let body = json!({ "password": password });
            instance_call(provider, &client, id, timeout, Method::PUT, &sub_path(id, "password"), Some(&body)).await?;
            log::debug!("Reset the administrator password of instance {}", id);
        }

        if has_change(from, to, "flavor")
            && let Some(flavor) = get_str(&to.attributes, "flavor")
        {
            let body = json!({ "resize_flavor": { "spec_code": flavor } });
            Self::mutate(provider, &client, id, timeout, Method::POST, &sub_path(id, "action"), Some(&body)).await?;
        }

        if has_change(from, to, "read_replicas") {
            let old = get_int(&from.attributes, "read_replicas").unwrap_or(0);
            let new = get_int(&to.attributes, "read_replicas").unwrap_or(old);
            if new > old {
                let priorities = vec![1; (new - old) as usize];
                let body = json!({ "priorities": priorities });
                Self::mutate(provider, &client, id, timeout, Method::POST, &sub_path(id, "nodes/enlarge"), Some(&body)).await?;
            } else if new < old {
                for node_id in Self::replicas_to_remove(from, (old - new) as usize)? {
                    let node_path = path(
                        "v3/{project_id}/instances/{id}/nodes/{node_id}",
                        &[("id", id), ("node_id", &node_id)],
                    );
                    Self::mutate(provider, &client, id, timeout, Method::DELETE, &node_path, None).await?;
                    log::debug!("Removed read replica {} from instance {}", node_id, id);
                }
            }
        }

        if has_change(from, to, "volume_size")
            && let Some(size) = get_int(&to.attributes, "volume_size")
        {
            let body = json!({ "size": size });
            Self::mutate(provider, &client, id, timeout, Method::POST, &sub_path(id, "volume/extend"), Some(&body)).await?;
        }

        if has_change(from, to, "security_group_id")
            && let Some(group) = get_str(&to.attributes, "security_group_id")
        {
            let body = json!({ "security_group_id": group });
            Self::mutate(provider, &client, id, timeout, Method::PUT, &sub_path(id, "security-group"), Some(&body)).await?;
        }

        Self::apply_settings(provider, &client, id, from, to, timeout, false).await?;

        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let timeout = self.schema().timeouts.resolve(&state.attributes).delete;
        let client = provider.client(SERVICE).await?;
        client.delete(&instance_path(identifier)).await?;

        wait_for_instance(
            provider,
            &client,
            identifier,
            DELETE_PENDING,
            &[DELETED],
            timeout,
            DELETE_DELAY,
            DELETE_DELAY,
        )
        .await?;
        log::info!("Deleted GaussDB(for MySQL) instance {}", identifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn base_attrs() -> Vec<(&'static str, Value)> {
        vec![
            ("name", string_value("db-1")),
            ("flavor", string_value("gaussdb.mysql.4xlarge.x86.4")),
            ("password", string_value("Secret!234")),
            ("vpc_id", string_value("vpc-1")),
            ("subnet_id", string_value("subnet-1")),
            ("read_replicas", Value::Int(2)),
            ("time_zone", string_value("UTC+08:00")),
            ("availability_zone_mode", string_value("single")),
        ]
    }

    #[test]
    fn create_body_fills_fixed_fields() {
        let mut pairs = base_attrs();
        pairs.push(("volume_size", Value::Int(100)));
        pairs.push(("table_name_case_sensitivity", Value::Bool(true)));
        let body = Instance::create_body(&Instance.schema(), &attrs(&pairs), "cn-north-4").unwrap();

        assert_eq!(body["flavor_ref"], json!("gaussdb.mysql.4xlarge.x86.4"));
        assert_eq!(body["slave_count"], json!(2));
        assert_eq!(body["region"], json!("cn-north-4"));
        assert_eq!(body["mode"], json!("Cluster"));
        assert_eq!(body["datastore"], json!({"type": "gaussdb-mysql", "version": "8.0"}));
        assert_eq!(body["volume"], json!({"size": 100}));
        assert_eq!(body["lower_case_table_names"], json!(0));
        assert!(body.get("master_availability_zone").is_none());
    }

    #[test]
    fn multi_zone_mode_needs_a_master_zone() {
        let mut pairs = base_attrs();
        pairs.push(("availability_zone_mode", string_value("multi")));
        let schema = Instance.schema();
        assert!(Instance::create_body(&schema, &attrs(&pairs), "cn-north-4").is_err());

        pairs.push(("master_availability_zone", string_value("cn-north-4a")));
        let body = Instance::create_body(&schema, &attrs(&pairs), "cn-north-4").unwrap();
        assert_eq!(body["availability_zone_mode"], json!("multi"));
        assert_eq!(body["master_availability_zone"], json!("cn-north-4a"));
    }

    fn instance_response() -> JsonValue {
        json!({
            "instance": {
                "id": "ins-1",
                "name": "db-1",
                "status": "ACTIVE",
                "type": "Cluster",
                "port": "3306",
                "alias": "orders",
                "private_write_ips": ["192.168.0.10"],
                "maintenance_window": "02:00-06:00",
                "db_user_name": "root",
                "datastore": {"type": "GaussDB(for MySQL)", "version": "8.0"},
                "backup_strategy": {"start_time": "08:00-09:00", "keep_days": "7"},
                "nodes": [
                    {"id": "n-1", "type": "master", "status": "ACTIVE", "flavor_ref": "f-1",
                     "volume": {"size": 40}, "private_read_ips": ["192.168.0.11"]},
                    {"id": "n-2", "type": "slave", "status": "ACTIVE", "flavor_ref": "f-1"},
                    {"id": "n-3", "type": "slave", "status": "BACKING UP", "flavor_ref": "f-1"},
                    {"id": "n-4", "type": "slave", "status": "BUILD", "flavor_ref": "f-1"}
                ]
            }
        })
    }

    #[test]
    fn flatten_derives_node_attributes() {
        let attrs = Instance::flatten(&Instance.schema(), &instance_response());
        assert_eq!(attrs.get("port"), Some(&Value::Int(3306)));
        assert_eq!(attrs.get("private_write_ip"), Some(&string_value("192.168.0.10")));
        assert_eq!(attrs.get("maintain_begin"), Some(&string_value("02:00")));
        assert_eq!(attrs.get("maintain_end"), Some(&string_value("06:00")));
        assert_eq!(attrs.get("description"), Some(&string_value("orders")));
        assert_eq!(attrs.get("mode"), Some(&string_value("Cluster")));
        assert_eq!(attrs.get("read_replicas"), Some(&Value::Int(2)));
        assert_eq!(attrs.get("volume_size"), Some(&Value::Int(40)));
        assert_eq!(attrs.get("flavor"), Some(&string_value("f-1")));

        let datastore = attrs["datastore"].as_map().unwrap();
        assert_eq!(datastore.get("engine"), Some(&string_value("gaussdb-mysql")));
        let backup = attrs["backup_strategy"].as_map().unwrap();
        assert_eq!(backup.get("keep_days"), Some(&Value::Int(7)));

        let nodes = attrs["nodes"].as_list().unwrap();
        assert_eq!(nodes.len(), 4);
        let first = nodes[0].as_map().unwrap();
        assert_eq!(first.get("private_read_ip"), Some(&string_value("192.168.0.11")));
    }

    #[test]
    fn shrinking_picks_the_first_active_replicas() {
        let attrs = Instance::flatten(&Instance.schema(), &instance_response());
        let mut state = State::existing(ResourceId::new("gaussdb_mysql_instance", "db"), attrs);
        // only n-2 is ACTIVE, and one replica must remain
        assert!(Instance::replicas_to_remove(&state, 1).is_err());

        let extra = Value::Map(HashMap::from([
            ("id".to_string(), string_value("n-5")),
            ("type".to_string(), string_value("slave")),
            ("status".to_string(), string_value("ACTIVE")),
        ]));
        if let Some(Value::List(nodes)) = state.attributes.get_mut("nodes") {
            nodes.push(extra);
        }
        assert_eq!(Instance::replicas_to_remove(&state, 1).unwrap(), vec!["n-2"]);
    }

    #[test]
    fn backup_policy_runs_daily() {
        let strategy = Value::Map(HashMap::from([
            ("start_time".to_string(), string_value("08:00-09:00")),
            ("keep_days".to_string(), Value::Int(7)),
        ]));
        let body = Instance::backup_policy_body(&attrs(&[("backup_strategy", strategy)])).unwrap();
        assert_eq!(
            body,
            json!({"backup_policy": {"start_time": "08:00-09:00", "keep_days": 7, "period": "1,2,3,4,5,6,7"}})
        );
    }

    #[test]
    fn maintenance_window_needs_both_ends() {
        assert!(Instance::maintenance_body(&attrs(&[("maintain_begin", string_value("02:00"))])).is_none());
        let body = Instance::maintenance_body(&attrs(&[
            ("maintain_begin", string_value("02:00")),
            ("maintain_end", string_value("06:00")),
        ]))
        .unwrap();
        assert_eq!(body, json!({"start_time": "02:00", "end_time": "06:00"}));
    }

    #[test]
    fn only_drifted_parameters_are_sent() {
        let current = Value::Map(HashMap::from([
            ("max_connections".to_string(), string_value("500")),
            ("wait_timeout".to_string(), string_value("28800")),
        ]));
        let from = State::existing(
            ResourceId::new("gaussdb_mysql_instance", "db"),
            attrs(&[("parameters", current)]),
        );
        let desired = Value::Map(HashMap::from([
            ("max_connections".to_string(), string_value("500")),
            ("wait_timeout".to_string(), string_value("600")),
            ("lock_wait_timeout".to_string(), string_value("30")),
        ]));
        let to = Resource::new("gaussdb_mysql_instance", "db").with_attribute("parameters", desired);

        let changed = Instance::changed_parameters(&from, &to);
        assert_eq!(
            JsonValue::Object(changed),
            json!({"wait_timeout": "600", "lock_wait_timeout": "30"})
        );

        let unset = Resource::new("gaussdb_mysql_instance", "db");
        assert!(Instance::changed_parameters(&from, &unset).is_empty());
    }

    #[test]
    fn side_settings_are_flattened() {
        let side = SideSettings {
            audit_log: Some(json!({"switch_status": "ON"})),
            sql_filter: Some(json!({"switch_status": "OFF"})),
            parameters: Some(json!({"configuration_parameters": [
                {"name": "max_connections", "value": "500", "restart_required": false}
            ]})),
            monitoring: Some(json!({"monitor_switch": true, "period": 5})),
            slow_log: Some(json!({"open_slow_log_switch": "true"})),
            auto_scaling: Some(json!({
                "id": "as-1",
                "status": "ON",
                "scaling_strategy": {"flavor_switch": "ON", "read_only_switch": "OFF"},
                "monitor_cycle": 300,
                "min_flavor": "gaussdb.mysql.large.x86.4"
            })),
            encryption: Some(json!({"encryption_status": "on", "type": "kms"})),
            version: Some(json!({
                "upgrade_flag": true,
                "datastore": {"current_version": "2.0.51", "current_kernel_version": "2.0.51.240300"}
            })),
        };
        let schema = Instance.schema();
        let mut attrs = HashMap::new();
        Instance::flatten_side_settings(&schema, &mut attrs, &side);

        assert_eq!(attrs.get("audit_log_enabled"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("sql_filter_enabled"), Some(&Value::Bool(false)));
        assert_eq!(attrs.get("seconds_level_monitoring_enabled"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("seconds_level_monitoring_period"), Some(&Value::Int(5)));
        assert_eq!(attrs.get("slow_log_show_original_switch"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("encryption_status"), Some(&string_value("ON")));
        assert_eq!(attrs.get("encryption_type"), Some(&string_value("kms")));
        assert_eq!(attrs.get("upgrade_flag"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("current_kernel_version"), Some(&string_value("2.0.51.240300")));

        let parameters = attrs["parameters"].as_map().unwrap();
        assert_eq!(parameters.get("max_connections"), Some(&string_value("500")));
        let scaling = attrs["auto_scaling"].as_map().unwrap();
        assert_eq!(scaling.get("id"), Some(&string_value("as-1")));
        assert_eq!(scaling.get("monitor_cycle"), Some(&Value::Int(300)));
    }

    #[test]
    fn failed_side_reads_leave_attributes_unset() {
        let mut attrs = HashMap::new();
        Instance::flatten_side_settings(&Instance.schema(), &mut attrs, &SideSettings::default());
        assert!(attrs.is_empty());
    }

    #[test]
    fn auto_scaling_body_drops_reported_fields() {
        let policy = Value::Map(HashMap::from([
            ("status".to_string(), string_value("ON")),
            (
                "scaling_strategy".to_string(),
                Value::Map(HashMap::from([
                    ("flavor_switch".to_string(), string_value("ON")),
                    ("read_only_switch".to_string(), string_value("ON")),
                ])),
            ),
            ("max_read_only_count".to_string(), Value::Int(3)),
            ("id".to_string(), string_value("as-1")),
            ("min_flavor".to_string(), string_value("f-1")),
        ]));
        let body =
            Instance::auto_scaling_body(&Instance.schema(), &attrs(&[("auto_scaling", policy)])).unwrap();
        assert_eq!(
            body,
            json!({
                "status": "ON",
                "scaling_strategy": {"flavor_switch": "ON", "read_only_switch": "ON"},
                "max_read_only_count": 3
            })
        );
    }

    #[test]
    fn monitoring_period_only_goes_with_the_switch_on() {
        let on = Instance::monitoring_body(&attrs(&[
            ("seconds_level_monitoring_enabled", Value::Bool(true)),
            ("seconds_level_monitoring_period", Value::Int(1)),
        ]))
        .unwrap();
        assert_eq!(on, json!({"monitor_switch": true, "period": 1}));

        let off = Instance::monitoring_body(&attrs(&[
            ("seconds_level_monitoring_enabled", Value::Bool(false)),
            ("seconds_level_monitoring_period", Value::Int(1)),
        ]))
        .unwrap();
        assert_eq!(off, json!({"monitor_switch": false}));
    }

    #[test]
    fn flatten_splits_private_dns_name() {
        let mut response = instance_response();
        response["instance"]["private_dns_names"] = json!(["db1.internal.cn-north-4.example.com"]);
        response["instance"]["created"] = json!("2024-05-01T08:00:00+0800");
        let attrs = Instance::flatten(&Instance.schema(), &response);
        assert_eq!(attrs.get("private_dns_name_prefix"), Some(&string_value("db1")));
        assert_eq!(
            attrs.get("private_dns_name"),
            Some(&string_value("db1.internal.cn-north-4.example.com"))
        );
        assert_eq!(attrs.get("created_at"), Some(&string_value("2024-05-01T08:00:00+0800")));
    }

    #[test]
    fn names_are_matched_exactly() {
        let items = json!([
            {"id": "r-1", "resource_name": "pool-a"},
            {"id": "r-2", "resource_name": "pool-ab"}
        ]);
        assert_eq!(find_id_by_name(&items, "resource_name", "pool-ab").as_deref(), Some("r-2"));
        assert!(find_id_by_name(&items, "resource_name", "pool").is_none());
    }
}
