//! elb_listener - Listener of a dedicated load balancer

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Map, Value as JsonValue, json};

use super::{SERVICE, locked_call, update_tags, wait_for_status};
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, expand_tags, flatten_into, flatten_tags, get_bool, get_str, has_change,
    has_changes, remove_nil, require_json_str, require_str, string_value, tags_changed,
    tags_schema,
};

const BODY_FIELDS: &[&str] = &[
    "protocol",
    "protocol_port",
    "loadbalancer_id",
    "name",
    "default_pool_id",
    "description",
    "idle_timeout",
    "request_timeout",
    "response_timeout",
    "server_certificate",
    "sni_certificate",
    "ca_certificate",
    "tls_ciphers_policy",
    "http2_enable",
    "advanced_forwarding_enabled",
    "protection_status",
    "protection_reason",
];

const UPDATE_FIELDS: &[&str] = &[
    "name",
    "default_pool_id",
    "description",
    "idle_timeout",
    "request_timeout",
    "response_timeout",
    "server_certificate",
    "sni_certificate",
    "ca_certificate",
    "tls_ciphers_policy",
    "http2_enable",
    "advanced_forwarding_enabled",
    "protection_status",
    "protection_reason",
];

/// `(argument, header)` pairs of `insert_headers`
const FORWARD_HEADERS: &[(&str, &str)] = &[
    ("forward_eip", "X-Forwarded-ELB-IP"),
    ("forward_port", "X-Forwarded-Port"),
    ("forward_request_port", "X-Forwarded-For-Port"),
    ("forward_host", "X-Forwarded-Host"),
];

const IP_GROUP_FIELDS: &[&str] = &["access_policy", "ip_group", "ip_group_enable"];

pub struct Listener;

fn listener_path(id: &str) -> String {
    path("v3/{project_id}/elb/listeners/{id}", &[("id", id)])
}

impl Listener {
    /// Forwarding headers only apply to HTTP and HTTPS listeners
    fn insert_headers(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let protocol = get_str(attrs, "protocol")?;
        if !matches!(protocol, "HTTP" | "HTTPS") {
            return None;
        }
        let headers: Map<String, JsonValue> = FORWARD_HEADERS
            .iter()
            .filter_map(|(name, header)| {
                get_bool(attrs, name).map(|v| (header.to_string(), JsonValue::Bool(v)))
            })
            .collect();
        (!headers.is_empty()).then_some(JsonValue::Object(headers))
    }

    fn ip_group(attrs: &HashMap<String, Value>) -> Option<JsonValue> {
        let policy = get_str(attrs, "access_policy")?;
        Some(json!({
            "type": policy,
            "ipgroup_id": get_str(attrs, "ip_group"),
            "enable_ipgroup": get_bool(attrs, "ip_group_enable"),
        }))
    }

    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        let mut listener = build_body(schema, attrs, BODY_FIELDS);
        if let Some(headers) = Self::insert_headers(attrs) {
            listener.insert("insert_headers".to_string(), headers);
        }
        if let Some(ip_group) = Self::ip_group(attrs) {
            listener.insert("ipgroup".to_string(), ip_group);
        }
        let tags = expand_tags(attrs.get("tags"));
        if !tags.is_empty() {
            listener.insert("tags".to_string(), JsonValue::Array(tags));
        }
        remove_nil(json!({ "listener": listener }))
    }

    fn update_body(schema: &ResourceSchema, from: &State, to: &Resource) -> Option<JsonValue> {
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();
        let mut listener = build_body(schema, &to.attributes, &changed);

        let header_names: Vec<&str> = FORWARD_HEADERS.iter().map(|(name, _)| *name).collect();
        if has_changes(from, to, &header_names)
            && let Some(headers) = Self::insert_headers(&to.attributes)
        {
            listener.insert("insert_headers".to_string(), headers);
        }
        if has_changes(from, to, IP_GROUP_FIELDS)
            && let Some(ip_group) = Self::ip_group(&to.attributes)
        {
            listener.insert("ipgroup".to_string(), remove_nil(ip_group));
        }

        (!listener.is_empty()).then(|| json!({ "listener": listener }))
    }

    fn flatten(schema: &ResourceSchema, body: &JsonValue) -> HashMap<String, Value> {
        let listener = &body["listener"];
        let mut attrs = HashMap::new();
        flatten_into(schema, listener, &mut attrs, &["loadbalancer_id"]);

        if let Some(lb_id) = listener.pointer("/loadbalancers/0/id").and_then(JsonValue::as_str) {
            attrs.insert("loadbalancer_id".to_string(), string_value(lb_id));
        }
        for (name, header) in FORWARD_HEADERS {
            if let Some(v) = listener["insert_headers"][*header].as_bool() {
                attrs.insert(name.to_string(), Value::Bool(v));
            }
        }
        let ip_group = &listener["ipgroup"];
        if let Some(policy) = ip_group["type"].as_str() {
            attrs.insert("access_policy".to_string(), string_value(policy));
        }
        if let Some(group) = ip_group["ipgroup_id"].as_str() {
            attrs.insert("ip_group".to_string(), string_value(group));
        }
        if let Some(enabled) = ip_group["enable_ipgroup"].as_bool() {
            attrs.insert("ip_group_enable".to_string(), Value::Bool(enabled));
        }
        if let Some(tags) = flatten_tags(listener.get("tags")) {
            attrs.insert("tags".to_string(), tags);
        }
        attrs
    }
}

#[async_trait]
impl ResourceHandler for Listener {
    fn name(&self) -> &'static str {
        "elb_listener"
    }

    fn schema(&self) -> ResourceSchema {
        let opt_bool = |name: &str| AttributeSchema::new(name, AttributeType::Bool).optional_computed();
        let opt_int = |name: &str, api: &str| {
            AttributeSchema::new(name, types::positive_int())
                .optional_computed()
                .with_provider_name(api)
        };

        ResourceSchema::new("elb_listener")
            .with_description("Listener of a dedicated load balancer")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new(
                    "protocol",
                    AttributeType::Enum(
                        ["TCP", "UDP", "HTTP", "HTTPS", "QUIC", "TLS"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    ),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("protocol_port", types::port_number())
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("loadbalancer_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("default_pool_id", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(opt_int("idle_timeout", "keepalive_timeout"))
            .attribute(opt_int("request_timeout", "client_timeout"))
            .attribute(opt_int("response_timeout", "member_timeout"))
            .attribute(
                AttributeSchema::new("server_certificate", AttributeType::String)
                    .with_provider_name("default_tls_container_ref"),
            )
            .attribute(
                AttributeSchema::new(
                    "sni_certificate",
                    AttributeType::List(Box::new(AttributeType::String)),
                )
                .with_provider_name("sni_container_refs"),
            )
            .attribute(
                AttributeSchema::new("ca_certificate", AttributeType::String)
                    .with_provider_name("client_ca_tls_container_ref"),
            )
            .attribute(AttributeSchema::new("tls_ciphers_policy", AttributeType::String).optional_computed())
            .attribute(opt_bool("http2_enable"))
            .attribute(opt_bool("forward_eip"))
            .attribute(opt_bool("forward_port"))
            .attribute(opt_bool("forward_request_port"))
            .attribute(
                AttributeSchema::new("forward_host", AttributeType::Bool)
                    .optional_computed()
                    .with_default(Value::Bool(true)),
            )
            .attribute(
                AttributeSchema::new(
                    "access_policy",
                    AttributeType::Enum(vec!["white".to_string(), "black".to_string()]),
                )
                .required_with(&["ip_group"]),
            )
            .attribute(
                AttributeSchema::new("ip_group", AttributeType::String)
                    .required_with(&["access_policy"]),
            )
            .attribute(opt_bool("ip_group_enable"))
            .attribute(opt_bool("advanced_forwarding_enabled").with_provider_name("enhance_l7policy_enable"))
            .attribute(
                AttributeSchema::new(
                    "protection_status",
                    AttributeType::Enum(vec![
                        "nonProtection".to_string(),
                        "consoleProtection".to_string(),
                    ]),
                )
                .optional_computed(),
            )
            .attribute(AttributeSchema::new("protection_reason", AttributeType::String))
            .attribute(
                AttributeSchema::new("force_delete", AttributeType::Bool)
                    .with_default(Value::Bool(false)),
            )
            .attribute(tags_schema())
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
        let lb_id = require_str(&resource.attributes, "loadbalancer_id")?;
        let client = provider.client(SERVICE).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let response = locked_call(
            provider,
            &client,
            lb_id,
            timeouts.create,
            Method::POST,
            "v3/{project_id}/elb/listeners",
            Some(&body),
        )
        .await?;
        let id = require_json_str(&response, "listener.id")?;
        log::info!("Created listener {} on load balancer {}", id, lb_id);
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&listener_path(identifier)).await?;
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
        let lb_id = require_str(&to.attributes, "loadbalancer_id")?;
        let client = provider.client(SERVICE).await?;

        if let Some(body) = Self::update_body(&schema, from, to) {
            locked_call(
                provider,
                &client,
                lb_id,
                timeouts.update,
                Method::PUT,
                &listener_path(identifier),
                Some(&body),
            )
            .await?;
        }

        if tags_changed(from, to) {
            update_tags(
                &client,
                "listeners",
                identifier,
                from.attributes.get("tags"),
                to.attributes.get("tags"),
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
        let lb_id = require_str(&state.attributes, "loadbalancer_id")?;
        let client = provider.client(SERVICE).await?;

        let object_path = listener_path(identifier);
        let delete_path = if get_bool(&state.attributes, "force_delete") == Some(true) {
            format!("{}/force", object_path)
        } else {
            object_path.clone()
        };
        locked_call(
            provider,
            &client,
            lb_id,
            timeouts.delete,
            Method::DELETE,
            &delete_path,
            None,
        )
        .await?;
        wait_for_status(provider, &client, &object_path, None, DELETED, timeouts.delete).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_listener() -> HashMap<String, Value> {
        [
            ("protocol", string_value("HTTP")),
            ("protocol_port", Value::Int(80)),
            ("loadbalancer_id", string_value("lb-1")),
            ("idle_timeout", Value::Int(60)),
            ("forward_eip", Value::Bool(true)),
            ("forward_host", Value::Bool(true)),
            ("access_policy", string_value("white")),
            ("ip_group", string_value("ipg-1")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn create_body_maps_timeouts_headers_and_ip_group() {
        let body = Listener::create_body(&Listener.schema(), &http_listener());
        assert_eq!(
            body,
            json!({
                "listener": {
                    "protocol": "HTTP",
                    "protocol_port": 80,
                    "loadbalancer_id": "lb-1",
                    "keepalive_timeout": 60,
                    "insert_headers": {"X-Forwarded-ELB-IP": true, "X-Forwarded-Host": true},
                    "ipgroup": {"type": "white", "ipgroup_id": "ipg-1"}
                }
            })
        );
    }

    #[test]
    fn tcp_listeners_carry_no_forward_headers() {
        let mut attrs = http_listener();
        attrs.insert("protocol".to_string(), string_value("TCP"));
        let body = Listener::create_body(&Listener.schema(), &attrs);
        assert!(body["listener"].get("insert_headers").is_none());
    }

    #[test]
    fn flatten_reads_parent_headers_and_ip_group() {
        let response = json!({
            "listener": {
                "id": "ls-1",
                "protocol": "HTTPS",
                "protocol_port": 443,
                "loadbalancers": [{"id": "lb-1"}],
                "client_timeout": 60,
                "default_tls_container_ref": "cert-1",
                "sni_container_refs": [],
                "insert_headers": {"X-Forwarded-Port": true, "X-Forwarded-Host": false},
                "ipgroup": {"ipgroup_id": "ipg-1", "type": "black", "enable_ipgroup": true},
                "enhance_l7policy_enable": true,
                "tags": []
            }
        });
        let attrs = Listener::flatten(&Listener.schema(), &response);
        assert_eq!(attrs.get("loadbalancer_id"), Some(&string_value("lb-1")));
        assert_eq!(attrs.get("request_timeout"), Some(&Value::Int(60)));
        assert_eq!(attrs.get("server_certificate"), Some(&string_value("cert-1")));
        assert_eq!(attrs.get("forward_port"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("forward_host"), Some(&Value::Bool(false)));
        assert_eq!(attrs.get("access_policy"), Some(&string_value("black")));
        assert_eq!(attrs.get("advanced_forwarding_enabled"), Some(&Value::Bool(true)));
    }

    #[test]
    fn update_body_resends_headers_when_one_changes() {
        let schema = Listener.schema();
        let from = State::existing(ResourceId::new("elb_listener", "web"), http_listener());
        let mut to = Resource::new("elb_listener", "web");
        to.attributes = http_listener();
        to.attributes.insert("forward_port".to_string(), Value::Bool(true));
        to.attributes.insert("name".to_string(), string_value("web-80"));

        let body = Listener::update_body(&schema, &from, &to).unwrap();
        assert_eq!(body["listener"]["name"], json!("web-80"));
        assert_eq!(
            body["listener"]["insert_headers"],
            json!({"X-Forwarded-ELB-IP": true, "X-Forwarded-Port": true, "X-Forwarded-Host": true})
        );
        assert!(body["listener"].get("ipgroup").is_none());
    }
}
