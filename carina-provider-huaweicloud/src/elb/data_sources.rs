//! ELB list queries: elb_loadbalancers, elb_listeners, elb_pools, elb_l7policies
//!
//! Each data source turns its arguments into query parameters, follows
//! `page_info.next_marker` through the listing and exposes the objects as a
//! computed list of maps.

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::Value as JsonValue;

use super::SERVICE;
use crate::HuaweiCloudProvider;
use crate::resources::DataSourceHandler;
use crate::utils::{project_items, result_id, string_value};

/// Shape of one list API
struct ListQuery {
    name: &'static str,
    description: &'static str,
    path: &'static str,
    list_key: &'static str,
    /// `(argument, query parameter, type)`
    filters: &'static [(&'static str, &'static str, Filter)],
    /// `(field, API key)` of each listed object
    fields: &'static [(&'static str, &'static str)],
}

#[derive(Clone, Copy)]
enum Filter {
    Str,
    Int,
    Bool,
}

impl Filter {
    fn attr_type(self) -> AttributeType {
        match self {
            Filter::Str => AttributeType::String,
            Filter::Int => AttributeType::Int,
            Filter::Bool => AttributeType::Bool,
        }
    }
}

impl ListQuery {
    fn schema(&self) -> ResourceSchema {
        let mut schema = ResourceSchema::new(self.name)
            .with_description(self.description)
            .as_data_source()
            .attribute(AttributeSchema::new("id", AttributeType::String).computed());
        for (name, _, filter) in self.filters {
            schema = schema.attribute(AttributeSchema::new(*name, filter.attr_type()));
        }
        schema.attribute(
            AttributeSchema::new(
                self.list_key,
                AttributeType::List(Box::new(AttributeType::Map(Box::new(AttributeType::String)))),
            )
            .computed(),
        )
    }

    fn query_params(&self, attrs: &HashMap<String, Value>) -> Vec<(&'static str, String)> {
        self.filters
            .iter()
            .filter_map(|(name, param, _)| {
                let value = match attrs.get(*name)? {
                    Value::String(s) if s.is_empty() => return None,
                    Value::String(s) => s.clone(),
                    Value::Int(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((*param, value))
            })
            .collect()
    }

    fn to_state(&self, query: &Resource, items: &[JsonValue]) -> State {
        let mut attrs = query.attributes.clone();
        let id = result_id(items.iter().filter_map(|item| item["id"].as_str()));
        attrs.insert("id".to_string(), string_value(id.clone()));
        attrs.insert(self.list_key.to_string(), project_items(items, self.fields));
        State::existing(query.id.clone(), attrs).with_identifier(id)
    }

    async fn read(&self, provider: &HuaweiCloudProvider, query: &Resource) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let params = self.query_params(&query.attributes);
        let items = client.list_all_marker(self.path, &params, self.list_key).await?;
        log::debug!("{} matched {} object(s)", self.name, items.len());
        Ok(self.to_state(query, &items))
    }
}

macro_rules! list_data_source {
    ($ty:ident, $query:expr) => {
        pub struct $ty;

        #[async_trait]
        impl DataSourceHandler for $ty {
            fn name(&self) -> &'static str {
                $query.name
            }

            fn schema(&self) -> ResourceSchema {
                $query.schema()
            }

            async fn read(
                &self,
                provider: &HuaweiCloudProvider,
                query: &Resource,
            ) -> ProviderResult<State> {
                $query.read(provider, query).await
            }
        }
    };
}

// =============================================================================
// Queries
// =============================================================================

static LOADBALANCERS: ListQuery = ListQuery {
    name: "elb_loadbalancers",
    description: "Dedicated load balancers matching the given filters",
    path: "v3/{project_id}/elb/loadbalancers",
    list_key: "loadbalancers",
    filters: &[
        ("loadbalancer_id", "id", Filter::Str),
        ("name", "name", Filter::Str),
        ("description", "description", Filter::Str),
        ("vpc_id", "vpc_id", Filter::Str),
        ("ipv4_subnet_id", "vip_subnet_cidr_id", Filter::Str),
        ("ipv4_address", "vip_address", Filter::Str),
        ("l4_flavor_id", "l4_flavor_id", Filter::Str),
        ("l7_flavor_id", "l7_flavor_id", Filter::Str),
        ("operating_status", "operating_status", Filter::Str),
        ("provisioning_status", "provisioning_status", Filter::Str),
        ("protection_status", "protection_status", Filter::Str),
        ("enterprise_project_id", "enterprise_project_id", Filter::Str),
    ],
    fields: &[
        ("id", "id"),
        ("name", "name"),
        ("description", "description"),
        ("loadbalancer_type", "loadbalancer_type"),
        ("vpc_id", "vpc_id"),
        ("ipv4_subnet_id", "vip_subnet_cidr_id"),
        ("ipv6_network_id", "ipv6_vip_virsubnet_id"),
        ("ipv4_address", "vip_address"),
        ("ipv4_port_id", "vip_port_id"),
        ("ipv6_address", "ipv6_vip_address"),
        ("l4_flavor_id", "l4_flavor_id"),
        ("l7_flavor_id", "l7_flavor_id"),
        ("availability_zone", "availability_zone_list"),
        ("cross_vpc_backend", "ip_target_enable"),
        ("operating_status", "operating_status"),
        ("provisioning_status", "provisioning_status"),
        ("protection_status", "protection_status"),
        ("deletion_protection_enable", "deletion_protection_enable"),
        ("enterprise_project_id", "enterprise_project_id"),
        ("created_at", "created_at"),
        ("updated_at", "updated_at"),
    ],
};

static LISTENERS: ListQuery = ListQuery {
    name: "elb_listeners",
    description: "Listeners matching the given filters",
    path: "v3/{project_id}/elb/listeners",
    list_key: "listeners",
    filters: &[
        ("listener_id", "id", Filter::Str),
        ("loadbalancer_id", "loadbalancer_id", Filter::Str),
        ("name", "name", Filter::Str),
        ("description", "description", Filter::Str),
        ("protocol", "protocol", Filter::Str),
        ("protocol_port", "protocol_port", Filter::Int),
        ("default_pool_id", "default_pool_id", Filter::Str),
        ("server_certificate", "default_tls_container_ref", Filter::Str),
        ("ca_certificate", "client_ca_tls_container_ref", Filter::Str),
        ("idle_timeout", "keepalive_timeout", Filter::Int),
        ("request_timeout", "client_timeout", Filter::Int),
        ("response_timeout", "member_timeout", Filter::Int),
        ("tls_ciphers_policy", "tls_ciphers_policy", Filter::Str),
        ("advanced_forwarding_enabled", "enhance_l7policy_enable", Filter::Bool),
        ("protection_status", "protection_status", Filter::Str),
        ("enterprise_project_id", "enterprise_project_id", Filter::Str),
    ],
    fields: &[
        ("id", "id"),
        ("name", "name"),
        ("description", "description"),
        ("protocol", "protocol"),
        ("protocol_port", "protocol_port"),
        ("loadbalancer_id", "loadbalancers.0.id"),
        ("default_pool_id", "default_pool_id"),
        ("http2_enable", "http2_enable"),
        ("forward_eip", "insert_headers.X-Forwarded-ELB-IP"),
        ("forward_port", "insert_headers.X-Forwarded-Port"),
        ("forward_request_port", "insert_headers.X-Forwarded-For-Port"),
        ("forward_host", "insert_headers.X-Forwarded-Host"),
        ("server_certificate", "default_tls_container_ref"),
        ("sni_certificate", "sni_container_refs"),
        ("ca_certificate", "client_ca_tls_container_ref"),
        ("tls_ciphers_policy", "tls_ciphers_policy"),
        ("idle_timeout", "keepalive_timeout"),
        ("request_timeout", "client_timeout"),
        ("response_timeout", "member_timeout"),
        ("advanced_forwarding_enabled", "enhance_l7policy_enable"),
        ("protection_status", "protection_status"),
        ("created_at", "created_at"),
        ("updated_at", "updated_at"),
    ],
};

static POOLS: ListQuery = ListQuery {
    name: "elb_pools",
    description: "Backend server groups matching the given filters",
    path: "v3/{project_id}/elb/pools",
    list_key: "pools",
    filters: &[
        ("pool_id", "id", Filter::Str),
        ("name", "name", Filter::Str),
        ("description", "description", Filter::Str),
        ("loadbalancer_id", "loadbalancer_id", Filter::Str),
        ("listener_id", "listener_id", Filter::Str),
        ("healthmonitor_id", "healthmonitor_id", Filter::Str),
        ("protocol", "protocol", Filter::Str),
        ("lb_method", "lb_algorithm", Filter::Str),
        ("type", "type", Filter::Str),
        ("vpc_id", "vpc_id", Filter::Str),
        ("protection_status", "protection_status", Filter::Str),
        ("enterprise_project_id", "enterprise_project_id", Filter::Str),
    ],
    fields: &[
        ("id", "id"),
        ("name", "name"),
        ("description", "description"),
        ("protocol", "protocol"),
        ("lb_method", "lb_algorithm"),
        ("type", "type"),
        ("vpc_id", "vpc_id"),
        ("loadbalancer_id", "loadbalancers.0.id"),
        ("listener_id", "listeners.0.id"),
        ("healthmonitor_id", "healthmonitor_id"),
        ("ip_version", "ip_version"),
        ("slow_start_enabled", "slow_start.enable"),
        ("slow_start_duration", "slow_start.duration"),
        ("persistence_type", "session_persistence.type"),
        ("protection_status", "protection_status"),
    ],
};

static L7POLICIES: ListQuery = ListQuery {
    name: "elb_l7policies",
    description: "Forwarding policies matching the given filters",
    path: "v3/{project_id}/elb/l7policies",
    list_key: "l7policies",
    filters: &[
        ("l7policy_id", "id", Filter::Str),
        ("name", "name", Filter::Str),
        ("description", "description", Filter::Str),
        ("listener_id", "listener_id", Filter::Str),
        ("action", "action", Filter::Str),
        ("priority", "priority", Filter::Int),
        ("redirect_pool_id", "redirect_pool_id", Filter::Str),
        ("redirect_listener_id", "redirect_listener_id", Filter::Str),
        ("provisioning_status", "provisioning_status", Filter::Str),
        ("enterprise_project_id", "enterprise_project_id", Filter::Str),
    ],
    fields: &[
        ("id", "id"),
        ("name", "name"),
        ("description", "description"),
        ("listener_id", "listener_id"),
        ("action", "action"),
        ("priority", "priority"),
        ("redirect_pool_id", "redirect_pool_id"),
        ("redirect_listener_id", "redirect_listener_id"),
        ("redirect_url", "redirect_url"),
        ("provisioning_status", "provisioning_status"),
        ("created_at", "created_at"),
        ("updated_at", "updated_at"),
    ],
};

list_data_source!(LoadBalancers, LOADBALANCERS);
list_data_source!(Listeners, LISTENERS);
list_data_source!(Pools, POOLS);
list_data_source!(L7Policies, L7POLICIES);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_become_query_parameters() {
        let attrs: HashMap<String, Value> = [
            ("loadbalancer_id".to_string(), string_value("lb-1")),
            ("protocol_port".to_string(), Value::Int(443)),
            ("advanced_forwarding_enabled".to_string(), Value::Bool(true)),
            ("name".to_string(), string_value("")),
        ]
        .into_iter()
        .collect();
        let mut params = LISTENERS.query_params(&attrs);
        params.sort();
        assert_eq!(
            params,
            vec![
                ("enhance_l7policy_enable", "true".to_string()),
                ("loadbalancer_id", "lb-1".to_string()),
                ("protocol_port", "443".to_string()),
            ]
        );
    }

    #[test]
    fn schemas_expose_computed_lists() {
        for query in [&LOADBALANCERS, &LISTENERS, &POOLS, &L7POLICIES] {
            let schema = query.schema();
            assert!(schema.data_source);
            assert!(schema.get(query.list_key).unwrap().is_read_only());
            assert!(schema.get("id").unwrap().is_read_only());
        }
    }

    #[test]
    fn state_carries_projected_items_and_stable_id() {
        let query = Resource::new("elb_pools", "all").with_read_only(true);
        let items = vec![
            json!({"id": "pool-2", "lb_algorithm": "ROUND_ROBIN", "listeners": [{"id": "ls-1"}]}),
            json!({"id": "pool-1", "lb_algorithm": "SOURCE_IP", "listeners": []}),
        ];
        let state = POOLS.to_state(&query, &items);
        assert_eq!(state.identifier.as_deref(), Some(result_id(["pool-1", "pool-2"]).as_str()));

        let pools = state.attributes.get("pools").and_then(Value::as_list).unwrap();
        let first = pools[0].as_map().unwrap();
        assert_eq!(first.get("lb_method"), Some(&string_value("ROUND_ROBIN")));
        assert_eq!(first.get("listener_id"), Some(&string_value("ls-1")));
        assert!(!pools[1].as_map().unwrap().contains_key("listener_id"));
    }
}
