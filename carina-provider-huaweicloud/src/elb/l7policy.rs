//! elb_l7policy - Forwarding policy of an HTTP or HTTPS listener

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use super::{SERVICE, listener_loadbalancer, locked_call, wait_for_status};
use crate::HuaweiCloudProvider;
use crate::client::{ServiceClient, path};
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, has_change, remove_nil, require_json_str, require_str,
};

const BODY_FIELDS: &[&str] = &[
    "listener_id",
    "action",
    "redirect_pool_id",
    "redirect_listener_id",
    "priority",
    "name",
    "description",
];

const UPDATE_FIELDS: &[&str] = &[
    "redirect_pool_id",
    "redirect_listener_id",
    "priority",
    "name",
    "description",
];

const STATUS_KEY: &str = "l7policy.provisioning_status";

pub struct L7Policy;

fn policy_path(id: &str) -> String {
    path("v3/{project_id}/elb/l7policies/{id}", &[("id", id)])
}

/// Wait for the policy's own provisioning status
async fn wait_for_policy(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    policy_id: &str,
    target: &str,
    timeout: std::time::Duration,
) -> ProviderResult<()> {
    wait_for_status(
        provider,
        client,
        &policy_path(policy_id),
        Some(STATUS_KEY),
        target,
        timeout,
    )
    .await
}

impl L7Policy {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        remove_nil(json!({ "l7policy": build_body(schema, attrs, BODY_FIELDS) }))
    }
}

#[async_trait]
impl ResourceHandler for L7Policy {
    fn name(&self) -> &'static str {
        "elb_l7policy"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("elb_l7policy")
            .with_description("Forwarding policy of an HTTP or HTTPS listener")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("listener_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "action",
                    AttributeType::Enum(vec![
                        "REDIRECT_TO_POOL".to_string(),
                        "REDIRECT_TO_LISTENER".to_string(),
                    ]),
                )
                .optional_computed()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("redirect_pool_id", AttributeType::String)
                    .optional_computed()
                    .conflicts_with(&["redirect_listener_id"]),
            )
            .attribute(
                AttributeSchema::new("redirect_listener_id", AttributeType::String)
                    .optional_computed()
                    .conflicts_with(&["redirect_pool_id"]),
            )
            .attribute(AttributeSchema::new("priority", AttributeType::Int).optional_computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("provisioning_status", AttributeType::String).computed(),
            )
            .exactly_one_of(&["redirect_pool_id", "redirect_listener_id"])
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let listener_id = require_str(&resource.attributes, "listener_id")?;
        let client = provider.client(SERVICE).await?;
        let lb_id = listener_loadbalancer(&client, listener_id).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let response = locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.create,
            Method::POST,
            "v3/{project_id}/elb/l7policies",
            Some(&body),
        )
        .await?;
        let id = require_json_str(&response, "l7policy.id")?;
        log::info!("Created L7 policy {} on listener {}", id, listener_id);

        wait_for_policy(provider, &client, &id, "ACTIVE", timeouts.create).await?;
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&policy_path(identifier)).await?;
        let mut attrs = HashMap::new();
        flatten_into(&self.schema(), &body["l7policy"], &mut attrs, &[]);
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
            let listener_id = require_str(&to.attributes, "listener_id")?;
            let client = provider.client(SERVICE).await?;
            let lb_id = listener_loadbalancer(&client, listener_id).await?;
            let body = json!({ "l7policy": build_body(&schema, &to.attributes, &changed) });
            locked_call(
                provider,
                &client,
                &lb_id,
                timeouts.update,
                Method::PUT,
                &policy_path(identifier),
                Some(&body),
            )
            .await?;
            wait_for_policy(provider, &client, identifier, "ACTIVE", timeouts.update).await?;
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
        let listener_id = require_str(&state.attributes, "listener_id")?;
        let client = provider.client(SERVICE).await?;
        let lb_id = listener_loadbalancer(&client, listener_id).await?;

        locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.delete,
            Method::DELETE,
            &policy_path(identifier),
            None,
        )
        .await?;
        wait_for_policy(provider, &client, identifier, DELETED, timeouts.delete).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::string_value;

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn redirect_targets_are_exclusive() {
        let schema = L7Policy.schema();
        let both = attrs(&[
            ("listener_id", string_value("ls-1")),
            ("redirect_pool_id", string_value("pool-1")),
            ("redirect_listener_id", string_value("ls-2")),
        ]);
        assert!(schema.validate(&both).is_err());

        let neither = attrs(&[("listener_id", string_value("ls-1"))]);
        assert!(schema.validate(&neither).is_err());

        let pool = attrs(&[
            ("listener_id", string_value("ls-1")),
            ("action", string_value("REDIRECT_TO_POOL")),
            ("redirect_pool_id", string_value("pool-1")),
        ]);
        assert!(schema.validate(&pool).is_ok());
    }

    #[test]
    fn create_body_wraps_policy() {
        let body = L7Policy::create_body(
            &L7Policy.schema(),
            &attrs(&[
                ("listener_id", string_value("ls-1")),
                ("action", string_value("REDIRECT_TO_LISTENER")),
                ("redirect_listener_id", string_value("ls-2")),
                ("priority", Value::Int(3)),
            ]),
        );
        assert_eq!(
            body,
            json!({
                "l7policy": {
                    "listener_id": "ls-1",
                    "action": "REDIRECT_TO_LISTENER",
                    "redirect_listener_id": "ls-2",
                    "priority": 3
                }
            })
        );
    }
}
