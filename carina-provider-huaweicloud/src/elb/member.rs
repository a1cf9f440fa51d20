//! elb_member - Backend server registered in a pool

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use super::{SERVICE, locked_call, pool_loadbalancer, wait_for_status};
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, has_change, parse_composite_id, remove_nil, require_json_str,
    require_str, string_value,
};

const BODY_FIELDS: &[&str] = &["address", "protocol_port", "subnet_id", "weight", "name"];
const UPDATE_FIELDS: &[&str] = &["weight", "name"];

pub struct Member;

fn member_path(pool_id: &str, member_id: &str) -> String {
    path(
        "v3/{project_id}/elb/pools/{pool_id}/members/{member_id}",
        &[("pool_id", pool_id), ("member_id", member_id)],
    )
}

/// `pool_id/member_id`
fn split_identifier(identifier: &str) -> ProviderResult<(&str, &str)> {
    let parts = parse_composite_id(identifier, 2, "<pool_id>/<member_id>")?;
    Ok((parts[0], parts[1]))
}

impl Member {
    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        remove_nil(json!({ "member": build_body(schema, attrs, BODY_FIELDS) }))
    }

    fn flatten(schema: &ResourceSchema, pool_id: &str, body: &JsonValue) -> HashMap<String, Value> {
        let mut attrs = HashMap::new();
        flatten_into(schema, &body["member"], &mut attrs, &["pool_id"]);
        attrs.insert("pool_id".to_string(), string_value(pool_id));
        attrs
    }
}

#[async_trait]
impl ResourceHandler for Member {
    fn name(&self) -> &'static str {
        "elb_member"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("elb_member")
            .with_description("Backend server registered in a pool")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("pool_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("address", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("protocol_port", types::port_number())
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .force_new()
                    .with_provider_name("subnet_cidr_id")
                    .with_description("IPv4 or IPv6 subnet of the backend server"),
            )
            .attribute(AttributeSchema::new("weight", types::weight()).optional_computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("operating_status", AttributeType::String).computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let schema = self.schema();
        let timeouts = schema.timeouts.resolve(&resource.attributes);
        let pool_id = require_str(&resource.attributes, "pool_id")?;
        let client = provider.client(SERVICE).await?;
        let lb_id = pool_loadbalancer(&client, pool_id).await?;

        let body = Self::create_body(&schema, &resource.attributes);
        let members_path = path(
            "v3/{project_id}/elb/pools/{pool_id}/members",
            &[("pool_id", pool_id)],
        );
        let response = locked_call(
            provider,
            &client,
            &lb_id,
            timeouts.create,
            Method::POST,
            &members_path,
            Some(&body),
        )
        .await?;
        let member_id = require_json_str(&response, "member.id")?;
        log::info!("Added member {} to pool {}", member_id, pool_id);

        let identifier = format!("{}/{}", pool_id, member_id);
        self.read(provider, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let (pool_id, member_id) = split_identifier(identifier)?;
        let client = provider.client(SERVICE).await?;
        let body = client.get(&member_path(pool_id, member_id)).await?;
        let attrs = Self::flatten(&self.schema(), pool_id, &body);
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (pool_id, member_id) = split_identifier(identifier)?;
        let schema = self.schema();
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();

        if !changed.is_empty() {
            let timeouts = schema.timeouts.resolve(&to.attributes);
            let client = provider.client(SERVICE).await?;
            let lb_id = pool_loadbalancer(&client, pool_id).await?;
            let body = json!({ "member": build_body(&schema, &to.attributes, &changed) });
            locked_call(
                provider,
                &client,
                &lb_id,
                timeouts.update,
                Method::PUT,
                &member_path(pool_id, member_id),
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
        let (pool_id, member_id) = split_identifier(identifier)?;
        let timeouts = self.schema().timeouts.resolve(&state.attributes);
        let client = provider.client(SERVICE).await?;
        let lb_id = pool_loadbalancer(&client, pool_id).await?;

        let object_path = member_path(pool_id, member_id);
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
