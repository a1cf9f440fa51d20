//! elb_certificate - Server or CA certificate used by HTTPS listeners

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, suppress};
use serde_json::{Value as JsonValue, json};

use super::SERVICE;
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{
    build_body, flatten_into, get_str, has_change, remove_nil, require_json_str,
};

const BODY_FIELDS: &[&str] = &[
    "type",
    "certificate",
    "private_key",
    "domain",
    "name",
    "description",
    "enterprise_project_id",
];

const UPDATE_FIELDS: &[&str] = &["certificate", "private_key", "domain", "name", "description"];

pub struct Certificate;

fn certificate_path(id: &str) -> String {
    path("v3/{project_id}/elb/certificates/{id}", &[("id", id)])
}

impl Certificate {
    /// Server certificates need their private key
    fn check_private_key(attrs: &HashMap<String, Value>) -> ProviderResult<()> {
        let is_server = get_str(attrs, "type").unwrap_or("server") == "server";
        if is_server && get_str(attrs, "private_key").is_none_or(str::is_empty) {
            return Err(ProviderError::validation(
                "'private_key' is required for server certificates",
            ));
        }
        Ok(())
    }

    fn create_body(schema: &ResourceSchema, attrs: &HashMap<String, Value>) -> JsonValue {
        remove_nil(json!({ "certificate": build_body(schema, attrs, BODY_FIELDS) }))
    }

    fn flatten(schema: &ResourceSchema, body: &JsonValue) -> HashMap<String, Value> {
        let mut attrs = HashMap::new();
        // The API never returns the private key
        flatten_into(schema, &body["certificate"], &mut attrs, &["private_key"]);
        attrs
    }
}

#[async_trait]
impl ResourceHandler for Certificate {
    fn name(&self) -> &'static str {
        "elb_certificate"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("elb_certificate")
            .with_description("Server or CA certificate used by HTTPS listeners")
            .with_timeouts(Timeouts::minutes(10, 10, 5))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new(
                    "type",
                    AttributeType::Enum(vec!["server".to_string(), "client".to_string()]),
                )
                .with_default(Value::String("server".to_string()))
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("certificate", AttributeType::String)
                    .required()
                    .with_suppress_diff(suppress::trim_space)
                    .with_description("PEM encoded certificate"),
            )
            .attribute(
                AttributeSchema::new("private_key", AttributeType::String)
                    .sensitive()
                    .with_suppress_diff(suppress::trim_space),
            )
            .attribute(AttributeSchema::new("domain", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("expire_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("create_time", AttributeType::String).computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        Self::check_private_key(&resource.attributes)?;
        let client = provider.client(SERVICE).await?;
        let body = Self::create_body(&self.schema(), &resource.attributes);
        let response = client.post("v3/{project_id}/elb/certificates", &body).await?;
        let id = require_json_str(&response, "certificate.id")?;
        log::info!("Created certificate {}", id);
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&certificate_path(identifier)).await?;
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
        let changed: Vec<&str> = UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|name| has_change(from, to, name))
            .collect();

        if !changed.is_empty() {
            let client = provider.client(SERVICE).await?;
            let body = json!({ "certificate": build_body(&schema, &to.attributes, &changed) });
            client.put(&certificate_path(identifier), &body).await?;
            log::info!("Updated certificate {}", identifier);
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
        client.delete(&certificate_path(identifier)).await?;
        Ok(())
    }
}
