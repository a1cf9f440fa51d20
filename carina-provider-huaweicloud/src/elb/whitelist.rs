//! lb_whitelist - Access control list of a shared load balancer listener

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, suppress, types};
use serde_json::{Value as JsonValue, json};

use super::SERVICE;
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{build_body, flatten_into, has_change, remove_nil, require_json_str};

const BODY_FIELDS: &[&str] = &["listener_id", "enable_whitelist", "whitelist"];
const UPDATE_FIELDS: &[&str] = &["enable_whitelist", "whitelist"];

pub struct Whitelist;

fn whitelist_path(id: &str) -> String {
    path("v2.0/lbaas/whitelists/{id}", &[("id", id)])
}

impl Whitelist {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        remove_nil(json!({ "whitelist": build_body(schema, attrs, BODY_FIELDS) }))
    }

    fn update_body(schema: &ResourceSchema, from: &State, to: &Resource) -> Option<JsonValue> {
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .filter(|name| {
                // Reordering the address list is not a change
                let suppressed = schema
                    .get(name)
                    .and_then(|attr| attr.suppress_diff)
                    .zip(from.attributes.get(*name).zip(to.attributes.get(*name)))
                    .is_some_and(|(same, (old, new))| same(old, new));
                !suppressed
            })
            .collect();
        if changed.is_empty() {
            return None;
        }
        Some(json!({ "whitelist": build_body(schema, &to.attributes, &changed) }))
    }
}

#[async_trait]
impl ResourceHandler for Whitelist {
    fn name(&self) -> &'static str {
        "lb_whitelist"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("lb_whitelist")
            .with_description("Access control list of a shared load balancer listener")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("listener_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("enable_whitelist", AttributeType::Bool)
                    .with_default(Value::Bool(true)),
            )
            .attribute(
                AttributeSchema::new("whitelist", types::comma_separated_ipv4())
                    .optional_computed()
                    .with_suppress_diff(suppress::comma_set)
                    .with_description("Comma separated IPv4 addresses or CIDR blocks"),
            )
            .attribute(AttributeSchema::new("tenant_id", AttributeType::String).computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = Self::create_body(&self.schema(), &resource.attributes);
        let response = client.post("v2.0/lbaas/whitelists", &body).await?;
        let id = require_json_str(&response, "whitelist.id")?;
        log::info!("Created whitelist {}", id);
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&whitelist_path(identifier)).await?;
        let mut attrs = HashMap::new();
        flatten_into(&self.schema(), &body["whitelist"], &mut attrs, &[]);
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        if let Some(body) = Self::update_body(&self.schema(), from, to) {
            let client = provider.client(SERVICE).await?;
            client.put(&whitelist_path(identifier), &body).await?;
            log::info!("Updated whitelist {}", identifier);
        }
        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        _state: &State,
    ) -> ProviderResult<()> {
        let client = provider.client(SERVICE).await?;
        client.delete(&whitelist_path(identifier)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::string_value;

    fn state(whitelist: &str) -> State {
        let attrs: HashMap<String, Value> = [
            ("listener_id".to_string(), string_value("ls-1")),
            ("enable_whitelist".to_string(), Value::Bool(true)),
            ("whitelist".to_string(), string_value(whitelist)),
        ]
        .into_iter()
        .collect();
        State::existing(ResourceId::new("lb_whitelist", "acl"), attrs)
    }

    fn desired(whitelist: &str, enabled: bool) -> Resource {
        Resource::new("lb_whitelist", "acl")
            .with_attribute("listener_id", string_value("ls-1"))
            .with_attribute("enable_whitelist", Value::Bool(enabled))
            .with_attribute("whitelist", string_value(whitelist))
    }

    #[test]
    fn create_body_passes_fields_through() {
        let body = Whitelist::create_body(
            &Whitelist.schema(),
            &desired("192.168.0.1,10.0.0.0/24", true).attributes,
        );
        assert_eq!(
            body,
            json!({
                "whitelist": {
                    "listener_id": "ls-1",
                    "enable_whitelist": true,
                    "whitelist": "192.168.0.1,10.0.0.0/24"
                }
            })
        );
    }

    #[test]
    fn reordered_addresses_need_no_update() {
        let schema = Whitelist.schema();
        let from = state("192.168.0.1,10.0.0.0/24");
        assert!(Whitelist::update_body(&schema, &from, &desired("10.0.0.0/24, 192.168.0.1", true)).is_none());

        let body = Whitelist::update_body(&schema, &from, &desired("10.0.0.0/24", false)).unwrap();
        assert_eq!(
            body,
            json!({"whitelist": {"enable_whitelist": false, "whitelist": "10.0.0.0/24"}})
        );
    }

    #[test]
    fn invalid_entries_fail_validation() {
        let attrs = desired("192.168.0.300", true).attributes;
        assert!(Whitelist.schema().validate(&attrs).is_err());
    }
}
