//! elb_l7rule - Match condition of an L7 policy

use std::collections::HashMap;
use std::time::Duration;

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
    build_body, flatten_into, has_change, parse_composite_id, remove_nil, require_json_str,
    require_str, string_value,
};

const BODY_FIELDS: &[&str] = &["type", "compare_type", "value"];
const UPDATE_FIELDS: &[&str] = &["compare_type", "value"];

pub struct L7Rule;

fn rule_path(policy_id: &str, rule_id: &str) -> String {
    path(
        "v3/{project_id}/elb/l7policies/{policy_id}/rules/{rule_id}",
        &[("policy_id", policy_id), ("rule_id", rule_id)],
    )
}

/// `l7policy_id/rule_id`
fn split_identifier(identifier: &str) -> ProviderResult<(&str, &str)> {
    let parts = parse_composite_id(identifier, 2, "<l7policy_id>/<rule_id>")?;
    Ok((parts[0], parts[1]))
}

async fn wait_for_rule(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    policy_id: &str,
    rule_id: &str,
    target: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    wait_for_status(
        provider,
        client,
        &rule_path(policy_id, rule_id),
        Some("rule.provisioning_status"),
        target,
        timeout,
    )
    .await
}

/// Rules are locked through the load balancer of the policy's listener
async fn policy_loadbalancer(client: &ServiceClient, policy_id: &str) -> ProviderResult<String> {
    let body = client
        .get(&path("v3/{project_id}/elb/l7policies/{id}", &[("id", policy_id)]))
        .await?;
    let listener_id = require_json_str(&body, "l7policy.listener_id")?;
    listener_loadbalancer(client, &listener_id).await
}

impl L7Rule {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        remove_nil(json!({ "rule": build_body(schema, attrs, BODY_FIELDS) }))
    }
}

#[async_trait]
impl ResourceHandler for L7Rule {
    fn name(&self) -> &'static str {
        "elb_l7rule"
    }

    fn schema(&self) -> ResourceSchema {
        let enum_of = |values: &[&str]| {
            AttributeType::Enum(values.iter().map(|s| s.to_string()).collect())
        };

        ResourceSchema::new("elb_l7rule")
            .with_description("Match condition of an L7 policy")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("l7policy_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("type", enum_of(&["HOST_NAME", "PATH"]))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("compare_type", enum_of(&["EQUAL_TO", "REGEX", "STARTS_WITH"]))
                    .required(),
            )
            .attribute(AttributeSchema::new("value", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("provisioning_status", AttributeType::String).computed(),
            )
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let policy_id = require_str(&resource.attributes, "l7policy_id")?;
        let client = provider.client(SERVICE).await?;
        let lb_id = policy_loadbalancer(&client, policy_id).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let rules_path = path(
            "v3/{project_id}/elb/l7policies/{policy_id}/rules",
            &[("policy_id", policy_id)],
        );
        let response = locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.create,
            Method::POST,
            &rules_path,
            Some(&body),
        )
        .await?;
        let rule_id = require_json_str(&response, "rule.id")?;
        log::info!("Created L7 rule {} in policy {}", rule_id, policy_id);

        wait_for_rule(provider, &client, policy_id, &rule_id, "ACTIVE", timeouts.create).await?;
        let identifier = format!("{}/{}", policy_id, rule_id);
        self.read(provider, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let (policy_id, rule_id) = split_identifier(identifier)?;
        let client = provider.client(SERVICE).await?;
        let body = client.get(&rule_path(policy_id, rule_id)).await?;
        let mut attrs = HashMap::new();
        flatten_into(&self.schema(), &body["rule"], &mut attrs, &["l7policy_id"]);
        attrs.insert("l7policy_id".to_string(), string_value(policy_id));
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (policy_id, rule_id) = split_identifier(identifier)?;
        let schema = self.schema();
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();

        if !changed.is_empty() {
            let timeouts = schema.timeouts.resolve(&to.attributes);
            let client = provider.client(SERVICE).await?;
            let lb_id = policy_loadbalancer(&client, policy_id).await?;
            // compare_type and value are always sent together
            let body = json!({
                "rule": build_body(&schema, &to.attributes, UPDATE_FIELDS)
            });
            locked_call(
                provider,
                &client,
                &lb_id,
                timeouts.update,
                Method::PUT,
                &rule_path(policy_id, rule_id),
                Some(&body),
            )
            .await?;
            wait_for_rule(provider, &client, policy_id, rule_id, "ACTIVE", timeouts.update)
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
        let (policy_id, rule_id) = split_identifier(identifier)?;
        let timeouts = self.schema().timeouts.resolve(&state.attributes);
        let client = provider.client(SERVICE).await?;
        let lb_id = policy_loadbalancer(&client, policy_id).await?;

        locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.delete,
            Method::DELETE,
            &rule_path(policy_id, rule_id),
            None,
        )
        .await?;
        wait_for_rule(provider, &client, policy_id, rule_id, DELETED, timeouts.delete).await
    }
}
