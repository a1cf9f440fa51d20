//! elb_loadbalancer - Dedicated load balancer

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Map, Value as JsonValue, json};

use super::{SERVICE, loadbalancer_path, locked_call, update_tags, wait_for_loadbalancer};
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, expand_tags, flatten_into, flatten_tags, get_bool, get_str, has_change,
    has_changes, remove_nil, require_json_str, string_list, string_value, tags_changed,
    tags_schema,
};

const CREATE_FIELDS: &[&str] = &[
    "name",
    "availability_zone",
    "loadbalancer_type",
    "cross_vpc_backend",
    "vpc_id",
    "ipv4_subnet_id",
    "ipv6_network_id",
    "ipv4_address",
    "ipv6_address",
    "l4_flavor_id",
    "l7_flavor_id",
    "backend_subnets",
    "protection_status",
    "protection_reason",
    "deletion_protection_enable",
    "description",
    "enterprise_project_id",
];

/// Arguments sent through `PUT .../loadbalancers/{id}`
const UPDATE_FIELDS: &[&str] = &[
    "name",
    "description",
    "cross_vpc_backend",
    "ipv4_subnet_id",
    "ipv6_network_id",
    "ipv4_address",
    "ipv6_address",
    "l4_flavor_id",
    "l7_flavor_id",
    "protection_status",
    "protection_reason",
    "deletion_protection_enable",
];

pub struct LoadBalancer;

impl LoadBalancer {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        let mut lb = build_body(schema, attrs, CREATE_FIELDS);

        if let Some(eip_id) = get_str(attrs, "ipv4_eip_id") {
            lb.insert("publicip_ids".to_string(), json!([eip_id]));
        }
        if let Some(iptype) = get_str(attrs, "iptype") {
            lb.insert(
                "publicip".to_string(),
                json!({
                    "ip_version": 4,
                    "network_type": iptype,
                    "bandwidth": {
                        "id": get_str(attrs, "bandwidth_id"),
                        "name": get_str(attrs, "name"),
                        "size": attrs.get("bandwidth_size").and_then(Value::as_int),
                        "charge_mode": get_str(attrs, "bandwidth_charge_mode"),
                        "share_type": get_str(attrs, "sharetype"),
                    },
                }),
            );
        }
        if let Some(bandwidth_id) = get_str(attrs, "ipv6_bandwidth_id") {
            lb.insert("ipv6_bandwidth".to_string(), json!({"id": bandwidth_id}));
        }
        if let Some(enabled) = get_bool(attrs, "autoscaling_enabled") {
            lb.insert(
                "autoscaling".to_string(),
                json!({
                    "enable": enabled,
                    "min_l7_flavor_id": get_str(attrs, "min_l7_flavor_id"),
                }),
            );
        }
        let tags = expand_tags(attrs.get("tags"));
        if !tags.is_empty() {
            lb.insert("tags".to_string(), JsonValue::Array(tags));
        }

        remove_nil(json!({ "loadbalancer": lb }))
    }

    fn update_body(schema: &ResourceSchema, from: &State, to: &Resource) -> Option<JsonValue> {
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();
        let mut params: Map<String, JsonValue> = build_body(schema, &to.attributes, &changed);

        if has_change(from, to, "autoscaling_enabled") {
            let enabled = get_bool(&to.attributes, "autoscaling_enabled").unwrap_or(false);
            let min_flavor = if enabled {
                get_str(&to.attributes, "min_l7_flavor_id").unwrap_or("")
            } else {
                ""
            };
            params.insert(
                "autoscaling".to_string(),
                json!({"enable": enabled, "min_l7_flavor_id": min_flavor}),
            );
        } else if has_change(from, to, "min_l7_flavor_id")
            && get_bool(&to.attributes, "autoscaling_enabled") == Some(true)
        {
            params.insert(
                "autoscaling".to_string(),
                json!({"min_l7_flavor_id": get_str(&to.attributes, "min_l7_flavor_id")}),
            );
        }

        if params.is_empty() {
            None
        } else {
            Some(json!({ "loadbalancer": params }))
        }
    }

    fn flatten(schema: &ResourceSchema, body: &JsonValue) -> HashMap<String, Value> {
        let lb = &body["loadbalancer"];
        let mut attrs = HashMap::new();
        flatten_into(schema, lb, &mut attrs, &[]);

        if let Some(enabled) = lb.pointer("/autoscaling/enable").and_then(JsonValue::as_bool) {
            attrs.insert("autoscaling_enabled".to_string(), Value::Bool(enabled));
        }
        if let Some(min_flavor) = lb
            .pointer("/autoscaling/min_l7_flavor_id")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
        {
            attrs.insert("min_l7_flavor_id".to_string(), string_value(min_flavor));
        }

        for eip in lb["eips"].as_array().into_iter().flatten() {
            let (id_key, address_key) = match eip["ip_version"].as_i64() {
                Some(4) => ("ipv4_eip_id", "ipv4_eip"),
                Some(6) => ("ipv6_eip_id", "ipv6_eip"),
                _ => continue,
            };
            if let Some(id) = eip["eip_id"].as_str() {
                attrs.insert(id_key.to_string(), string_value(id));
            }
            if let Some(address) = eip["eip_address"].as_str() {
                attrs.insert(address_key.to_string(), string_value(address));
            }
        }

        if let Some(tags) = flatten_tags(lb.get("tags")) {
            attrs.insert("tags".to_string(), tags);
        }
        attrs
    }
}

#[async_trait]
impl ResourceHandler for LoadBalancer {
    fn name(&self) -> &'static str {
        "elb_loadbalancer"
    }

    fn schema(&self) -> ResourceSchema {
        let str_list = || AttributeType::List(Box::new(AttributeType::String));
        ResourceSchema::new("elb_loadbalancer")
            .with_description("Dedicated (v3) elastic load balancer")
            .with_timeouts(Timeouts::minutes(10, 10, 5))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("availability_zone", str_list())
                    .required()
                    .with_provider_name("availability_zone_list")
                    .with_description("AZs the load balancer is deployed in"),
            )
            .attribute(
                AttributeSchema::new("loadbalancer_type", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("cross_vpc_backend", AttributeType::Bool)
                    .optional_computed()
                    .with_provider_name("ip_target_enable"),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("ipv4_subnet_id", AttributeType::String)
                    .with_provider_name("vip_subnet_cidr_id"),
            )
            .attribute(
                AttributeSchema::new("ipv6_network_id", AttributeType::String)
                    .with_provider_name("ipv6_vip_virsubnet_id"),
            )
            .attribute(AttributeSchema::new("ipv6_bandwidth_id", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("ipv4_address", types::ipv4_address())
                    .optional_computed()
                    .with_provider_name("vip_address"),
            )
            .attribute(
                AttributeSchema::new("ipv6_address", AttributeType::String)
                    .optional_computed()
                    .with_provider_name("ipv6_vip_address"),
            )
            .attribute(
                AttributeSchema::new("ipv4_eip_id", AttributeType::String)
                    .optional_computed()
                    .force_new()
                    .conflicts_with(&[
                        "iptype",
                        "bandwidth_charge_mode",
                        "bandwidth_size",
                        "sharetype",
                        "bandwidth_id",
                    ]),
            )
            .attribute(
                AttributeSchema::new("iptype", AttributeType::String)
                    .force_new()
                    .conflicts_with(&["ipv4_eip_id"])
                    .with_description("EIP type to create with the load balancer, e.g. 5_bgp"),
            )
            .attribute(
                AttributeSchema::new(
                    "bandwidth_charge_mode",
                    AttributeType::Enum(vec!["bandwidth".to_string(), "traffic".to_string()]),
                )
                .force_new()
                .required_with(&["iptype", "bandwidth_size", "sharetype"])
                .conflicts_with(&["ipv4_eip_id", "bandwidth_id"]),
            )
            .attribute(
                AttributeSchema::new(
                    "sharetype",
                    AttributeType::Enum(vec!["PER".to_string(), "WHOLE".to_string()]),
                )
                .force_new()
                .required_with(&["iptype"])
                .conflicts_with(&["ipv4_eip_id"]),
            )
            .attribute(
                AttributeSchema::new("bandwidth_size", types::positive_int())
                    .force_new()
                    .required_with(&["iptype", "bandwidth_charge_mode", "sharetype"])
                    .conflicts_with(&["ipv4_eip_id", "bandwidth_id"]),
            )
            .attribute(
                AttributeSchema::new("bandwidth_id", AttributeType::String)
                    .force_new()
                    .required_with(&["iptype"])
                    .conflicts_with(&["ipv4_eip_id", "bandwidth_size", "bandwidth_charge_mode"]),
            )
            .attribute(AttributeSchema::new("l4_flavor_id", AttributeType::String))
            .attribute(AttributeSchema::new("l7_flavor_id", AttributeType::String))
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("backend_subnets", str_list())
                    .optional_computed()
                    .with_provider_name("elb_virsubnet_ids"),
            )
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
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("deletion_protection_enable", AttributeType::Bool))
            .attribute(
                AttributeSchema::new("autoscaling_enabled", AttributeType::Bool)
                    .optional_computed()
                    .deprecated("elastic scaling is enabled per flavor"),
            )
            .attribute(
                AttributeSchema::new("min_l7_flavor_id", AttributeType::String)
                    .optional_computed()
                    .required_with(&["l7_flavor_id"]),
            )
            .attribute(
                AttributeSchema::new("force_delete", AttributeType::Bool)
                    .with_default(Value::Bool(false)),
            )
            .attribute(tags_schema())
            .attribute(
                AttributeSchema::new("ipv4_port_id", AttributeType::String)
                    .computed()
                    .with_provider_name("vip_port_id"),
            )
            .attribute(AttributeSchema::new("ipv4_eip", AttributeType::String).computed())
            .attribute(AttributeSchema::new("ipv6_eip_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("ipv6_eip", AttributeType::String).computed())
            .attribute(AttributeSchema::new("provisioning_status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("operating_status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("charge_mode", AttributeType::String).computed())
            .attribute(AttributeSchema::new("guaranteed", AttributeType::Bool).computed())
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
        let response = client
            .post("v3/{project_id}/elb/loadbalancers", &body)
            .await?;
        let id = require_json_str(&response, "loadbalancer.id")?;
        log::info!("Created load balancer {}", id);

        wait_for_loadbalancer(provider, &client, &id, "ACTIVE", timeouts.create).await?;
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&loadbalancer_path(identifier)).await?;
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
        let lb_path = loadbalancer_path(identifier);

        let timeout = timeouts.update;

        if let Some(body) = Self::update_body(&schema, from, to) {
            locked_call(provider, &client, identifier, timeout, Method::PUT, &lb_path, Some(&body)).await?;
        }

        // cannot be changed in the same request as cross_vpc_backend
        if has_change(from, to, "backend_subnets") {
            let subnets = string_list(to.attributes.get("backend_subnets"));
            let body = json!({"loadbalancer": {"elb_virsubnet_ids": subnets}});
            locked_call(provider, &client, identifier, timeout, Method::PUT, &lb_path, Some(&body)).await?;
        }

        if tags_changed(from, to) {
            update_tags(
                &client,
                "loadbalancers",
                identifier,
                from.attributes.get("tags"),
                to.attributes.get("tags"),
            )
            .await?;
        }

        if has_changes(from, to, &["availability_zone"]) {
            let old = string_list(from.attributes.get("availability_zone"));
            let new = string_list(to.attributes.get("availability_zone"));
            let added: Vec<&String> = new.iter().filter(|az| !old.contains(az)).collect();
            let removed: Vec<&String> = old.iter().filter(|az| !new.contains(az)).collect();

            for (action, zones) in [("batch-add", added), ("batch-remove", removed)] {
                if zones.is_empty() {
                    continue;
                }
                let action_path = path(
                    "v3/{project_id}/elb/loadbalancers/{id}/availability-zone/{action}",
                    &[("id", identifier), ("action", action)],
                );
                log::debug!("Load balancer {} {}: {:?}", identifier, action, zones);
                let body = json!({"availability_zone_list": zones});
                locked_call(provider, &client, identifier, timeout, Method::POST, &action_path, Some(&body))
                    .await?;
            }
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

        let mut delete_path = loadbalancer_path(identifier);
        if get_bool(&state.attributes, "force_delete") == Some(true) {
            delete_path.push_str("/force-elb");
        }
        client.delete(&delete_path).await?;
        wait_for_loadbalancer(provider, &client, identifier, DELETED, timeouts.delete).await?;

        // an EIP created together with the load balancer outlives it
        let created_eip = get_str(&state.attributes, "iptype").is_some();
        if let Some(eip_id) = get_str(&state.attributes, "ipv4_eip_id").filter(|id| !id.is_empty())
            && created_eip
        {
            release_eip(provider, eip_id).await;
        }
        Ok(())
    }
}

async fn release_eip(provider: &HuaweiCloudProvider, eip_id: &str) {
    let vpc = match provider.client("vpc").await {
        Ok(client) => client,
        Err(e) => {
            log::warn!("failed to create VPC client, EIP {} was not released: {}", eip_id, e);
            return;
        }
    };
    let eip_path = path("v1/{project_id}/publicips/{id}", &[("id", eip_id)]);
    match vpc.delete(&eip_path).await {
        Ok(_) => log::info!("Released EIP {}", eip_id),
        Err(e) if e.is_not_found() => {}
        Err(e) => log::warn!("failed to delete EIP {}: {}", eip_id, e),
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

    #[test]
    fn create_body_with_new_eip() {
        let schema = LoadBalancer.schema();
        let body = LoadBalancer::create_body(
            &schema,
            &attrs(&[
                ("name", string_value("web")),
                ("availability_zone", Value::List(vec![string_value("cn-north-4a")])),
                ("ipv4_subnet_id", string_value("subnet-1")),
                ("cross_vpc_backend", Value::Bool(true)),
                ("iptype", string_value("5_bgp")),
                ("bandwidth_size", Value::Int(5)),
                ("bandwidth_charge_mode", string_value("traffic")),
                ("sharetype", string_value("PER")),
                ("force_delete", Value::Bool(false)),
            ]),
        );

        assert_eq!(
            body,
            json!({
                "loadbalancer": {
                    "name": "web",
                    "availability_zone_list": ["cn-north-4a"],
                    "vip_subnet_cidr_id": "subnet-1",
                    "ip_target_enable": true,
                    "publicip": {
                        "ip_version": 4,
                        "network_type": "5_bgp",
                        "bandwidth": {
                            "name": "web",
                            "size": 5,
                            "charge_mode": "traffic",
                            "share_type": "PER"
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn create_body_with_existing_eip_and_tags() {
        let schema = LoadBalancer.schema();
        let mut tags = HashMap::new();
        tags.insert("env".to_string(), string_value("prod"));
        let body = LoadBalancer::create_body(
            &schema,
            &attrs(&[
                ("name", string_value("web")),
                ("ipv4_eip_id", string_value("eip-1")),
                ("autoscaling_enabled", Value::Bool(true)),
                ("tags", Value::Map(tags)),
            ]),
        );
        let lb = &body["loadbalancer"];
        assert_eq!(lb["publicip_ids"], json!(["eip-1"]));
        assert_eq!(lb["autoscaling"], json!({"enable": true}));
        assert_eq!(lb["tags"], json!([{"key": "env", "value": "prod"}]));
        assert!(lb.get("publicip").is_none());
    }

    #[test]
    fn read_maps_eips_and_autoscaling() {
        let response = json!({
            "loadbalancer": {
                "id": "lb-1",
                "name": "web",
                "availability_zone_list": ["az1", "az2"],
                "vip_subnet_cidr_id": "subnet-1",
                "vip_address": "192.168.0.10",
                "vip_port_id": "port-1",
                "ip_target_enable": false,
                "provisioning_status": "ACTIVE",
                "autoscaling": {"enable": true, "min_l7_flavor_id": ""},
                "eips": [
                    {"eip_id": "eip-4", "eip_address": "1.2.3.4", "ip_version": 4},
                    {"eip_id": "eip-6", "eip_address": "2001:db8::1", "ip_version": 6}
                ],
                "tags": [{"key": "env", "value": "prod"}],
                "description": null
            }
        });
        let attrs = LoadBalancer::flatten(&LoadBalancer.schema(), &response);

        assert_eq!(attrs.get("id"), Some(&string_value("lb-1")));
        assert_eq!(attrs.get("ipv4_subnet_id"), Some(&string_value("subnet-1")));
        assert_eq!(attrs.get("ipv4_address"), Some(&string_value("192.168.0.10")));
        assert_eq!(attrs.get("ipv4_port_id"), Some(&string_value("port-1")));
        assert_eq!(attrs.get("ipv4_eip_id"), Some(&string_value("eip-4")));
        assert_eq!(attrs.get("ipv6_eip"), Some(&string_value("2001:db8::1")));
        assert_eq!(attrs.get("autoscaling_enabled"), Some(&Value::Bool(true)));
        assert!(!attrs.contains_key("min_l7_flavor_id"));
        assert!(!attrs.contains_key("description"));
        assert_eq!(
            attrs["availability_zone"],
            Value::List(vec![string_value("az1"), string_value("az2")])
        );
        assert!(attrs["tags"].as_map().is_some_and(|t| t.len() == 1));
    }

    #[test]
    fn update_body_only_carries_changes() {
        let schema = LoadBalancer.schema();
        let id = ResourceId::new("elb_loadbalancer", "web");
        let from = State::existing(
            id.clone(),
            attrs(&[
                ("name", string_value("web")),
                ("description", string_value("old")),
                ("l7_flavor_id", string_value("f1")),
            ]),
        );
        let mut to = Resource::new("elb_loadbalancer", "web");
        to.attributes = attrs(&[
            ("name", string_value("web")),
            ("description", string_value("new")),
            ("l7_flavor_id", string_value("f2")),
        ]);

        let body = LoadBalancer::update_body(&schema, &from, &to).unwrap();
        assert_eq!(
            body,
            json!({"loadbalancer": {"description": "new", "l7_flavor_id": "f2"}})
        );

        let unchanged = Resource {
            attributes: from.attributes.clone(),
            ..to
        };
        assert!(LoadBalancer::update_body(&schema, &from, &unchanged).is_none());
    }

    #[test]
    fn eip_arguments_conflict() {
        let schema = LoadBalancer.schema();
        let errors = schema
            .validate(&attrs(&[
                ("name", string_value("web")),
                ("availability_zone", Value::List(vec![string_value("az1")])),
                ("ipv4_eip_id", string_value("eip-1")),
                ("iptype", string_value("5_bgp")),
            ]))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("conflicts")));
    }
}
