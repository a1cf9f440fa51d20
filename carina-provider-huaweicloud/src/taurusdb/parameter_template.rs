//! gaussdb_mysql_parameter_template - Reusable set of database parameters
//!
//! The detail API lists every parameter of the engine, not only the ones
//! the template overrides, so `parameter_values` is carried over from the
//! recorded state instead of being read back.

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use serde_json::{Map, Value as JsonValue, json};

use super::SERVICE;
use crate::HuaweiCloudProvider;
use crate::client::path;
use crate::resources::ResourceHandler;
use crate::utils::{get_str, has_change, has_changes, require_json_str, string_value};

pub struct ParameterTemplate;

fn template_path(id: &str) -> String {
    path("v3/{project_id}/configurations/{id}", &[("id", id)])
}

/// Parameter values are sent as strings whatever their type
fn parameter_values(value: Option<&Value>) -> Map<String, JsonValue> {
    value
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        Value::Int(n) => n.to_string(),
                        Value::Float(f) => f.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => return None,
                    };
                    Some((k.clone(), JsonValue::String(text)))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ParameterTemplate {
    fn create_body(attrs: &HashMap<String, Value>) -> JsonValue {
        let mut body = json!({
            "name": get_str(attrs, "name"),
            "datastore": {
                "type": get_str(attrs, "datastore_engine").unwrap_or("gaussdb-mysql"),
                "version": get_str(attrs, "datastore_version").unwrap_or("8.0"),
            },
        });
        if let Some(description) = get_str(attrs, "description") {
            body["description"] = json!(description);
        }
        let values = parameter_values(attrs.get("parameter_values"));
        if !values.is_empty() {
            body["parameter_values"] = JsonValue::Object(values);
        }
        body
    }

    fn update_body(from: &State, to: &Resource) -> Option<JsonValue> {
        if !has_changes(from, to, &["name", "description", "parameter_values"]) {
            return None;
        }
        let mut body = Map::new();
        if has_change(from, to, "name") {
            body.insert("name".to_string(), json!(get_str(&to.attributes, "name")));
        }
        if has_change(from, to, "description") {
            let description = get_str(&to.attributes, "description").unwrap_or_default();
            body.insert("description".to_string(), json!(description));
        }
        if has_change(from, to, "parameter_values") {
            body.insert(
                "parameter_values".to_string(),
                JsonValue::Object(parameter_values(to.attributes.get("parameter_values"))),
            );
        }
        Some(JsonValue::Object(body))
    }

    fn flatten(body: &JsonValue) -> HashMap<String, Value> {
        let mut attrs = HashMap::new();
        for (attr, key) in [
            ("name", "name"),
            ("description", "description"),
            ("datastore_version", "datastore_version_name"),
            ("created_at", "created"),
            ("updated_at", "updated"),
        ] {
            if let Some(v) = body[key].as_str() {
                attrs.insert(attr.to_string(), string_value(v));
            }
        }
        if let Some(engine) = body["datastore_name"].as_str() {
            let engine = match engine {
                "GaussDB(for MySQL)" | "gaussdb-mysql" => "gaussdb-mysql",
                other => other,
            };
            attrs.insert("datastore_engine".to_string(), string_value(engine));
        }
        attrs
    }
}

#[async_trait]
impl ResourceHandler for ParameterTemplate {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_parameter_template"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("gaussdb_mysql_parameter_template")
            .with_description("Reusable set of GaussDB(for MySQL) parameters")
            .with_timeouts(Timeouts::minutes(10, 10, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new(
                    "datastore_engine",
                    AttributeType::Enum(vec!["gaussdb-mysql".to_string()]),
                )
                .optional_computed()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("datastore_version", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "parameter_values",
                    AttributeType::Map(Box::new(AttributeType::String)),
                )
                .with_description("Parameter name to value"),
            )
            .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
            .attribute(AttributeSchema::new("updated_at", AttributeType::String).computed())
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = Self::create_body(&resource.attributes);
        let response = client.post("v3/{project_id}/configurations", &body).await?;
        let id = require_json_str(&response, "configurations.id")?;
        log::info!("Created parameter template {}", id);
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get(&template_path(identifier)).await?;
        Ok(State::existing(id.clone(), Self::flatten(&body)).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        if let Some(body) = Self::update_body(from, to) {
            let client = provider.client(SERVICE).await?;
            client.put(&template_path(identifier), &body).await?;
            log::info!("Updated parameter template {}", identifier);
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
        client.delete(&template_path(identifier)).await?;
        Ok(())
    }
}
