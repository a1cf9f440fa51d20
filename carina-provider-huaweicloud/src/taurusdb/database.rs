//! gaussdb_mysql_database - Database inside a GaussDB(for MySQL) instance

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use super::jobs::wait_for_jobs;
use super::{SERVICE, instance_call};
use crate::HuaweiCloudProvider;
use crate::client::{Offset, ServiceClient, path};
use crate::resources::ResourceHandler;
use crate::utils::{get_str, has_change, parse_composite_id, require_str, string_value};

const PAGE_SIZE: usize = 100;

pub struct Database;

fn databases_path(instance_id: &str) -> String {
    path("v3/{project_id}/instances/{id}/databases", &[("id", instance_id)])
}

fn split_identifier(identifier: &str) -> ProviderResult<(&str, &str)> {
    let parts = parse_composite_id(identifier, 2, "<instance_id>/<name>")?;
    Ok((parts[0], parts[1]))
}

/// Find one database in the instance's listing
pub(crate) async fn find_database(
    client: &ServiceClient,
    instance_id: &str,
    name: &str,
) -> ProviderResult<JsonValue> {
    let databases = client
        .list_all_offset(&databases_path(instance_id), &[], "databases", PAGE_SIZE, Offset::Pages)
        .await?;
    databases
        .into_iter()
        .find(|db| db["name"] == name)
        .ok_or_else(|| {
            ProviderError::not_found(format!("database {} not found in instance {}", name, instance_id))
        })
}

impl Database {
    fn create_body(attrs: &HashMap<String, Value>) -> JsonValue {
        let mut database = json!({
            "name": get_str(attrs, "name"),
            "character_set": get_str(attrs, "character_set"),
        });
        if let Some(comment) = get_str(attrs, "description") {
            database["comment"] = json!(comment);
        }
        json!({ "databases": [database] })
    }

    fn flatten(instance_id: &str, database: &JsonValue) -> HashMap<String, Value> {
        let mut attrs = HashMap::new();
        attrs.insert("instance_id".to_string(), string_value(instance_id));
        for (attr, key) in [("name", "name"), ("character_set", "charset"), ("description", "comment")] {
            if let Some(v) = database[key].as_str() {
                attrs.insert(attr.to_string(), string_value(v));
            }
        }
        if let Some(users) = database["users"].as_array() {
            let names = users
                .iter()
                .filter_map(|u| u["name"].as_str())
                .map(string_value)
                .collect();
            attrs.insert("users".to_string(), Value::List(names));
        }
        attrs
    }
}

#[async_trait]
impl ResourceHandler for Database {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_database"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("gaussdb_mysql_database")
            .with_description("Database inside a GaussDB(for MySQL) instance")
            .with_timeouts(Timeouts::minutes(30, 30, 30))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("instance_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
            .attribute(
                AttributeSchema::new("character_set", AttributeType::String)
                    .required()
                    .force_new()
                    .with_description("For example utf8mb4 or gbk"),
            )
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("users", AttributeType::List(Box::new(AttributeType::String)))
                    .computed(),
            )
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let timeout = self.schema().timeouts.resolve(&resource.attributes).create;
        let instance_id = require_str(&resource.attributes, "instance_id")?;
        let name = require_str(&resource.attributes, "name")?;
        let client = provider.client(SERVICE).await?;

        let body = Self::create_body(&resource.attributes);
        let response = instance_call(
            provider,
            &client,
            instance_id,
            timeout,
            Method::POST,
            &databases_path(instance_id),
            Some(&body),
        )
        .await?;
        wait_for_jobs(provider, &client, &response, timeout).await?;
        log::info!("Created database {} in instance {}", name, instance_id);

        self.read(provider, &resource.id, &format!("{}/{}", instance_id, name))
            .await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let (instance_id, name) = split_identifier(identifier)?;
        let client = provider.client(SERVICE).await?;
        let database = find_database(&client, instance_id, name).await?;
        let attrs = Self::flatten(instance_id, &database);
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (instance_id, name) = split_identifier(identifier)?;
        if has_change(from, to, "description") {
            let timeout = self.schema().timeouts.resolve(&to.attributes).update;
            let client = provider.client(SERVICE).await?;
            let comment = get_str(&to.attributes, "description").unwrap_or_default();
            let body = json!({ "database_list": [{ "name": name, "comment": comment }] });
            let comment_path = format!("{}/comment", databases_path(instance_id));
            let response = instance_call(
                provider,
                &client,
                instance_id,
                timeout,
                Method::PUT,
                &comment_path,
                Some(&body),
            )
            .await?;
            wait_for_jobs(provider, &client, &response, timeout).await?;
        }
        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let (instance_id, name) = split_identifier(identifier)?;
        let timeout = self.schema().timeouts.resolve(&state.attributes).delete;
        let client = provider.client(SERVICE).await?;
        let body = json!({ "database_names": [name] });
        let response = instance_call(
            provider,
            &client,
            instance_id,
            timeout,
            Method::DELETE,
            &databases_path(instance_id),
            Some(&body),
        )
        .await?;
        wait_for_jobs(provider, &client, &response, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_need_instance_and_name() {
        assert_eq!(split_identifier("ins-1/orders").unwrap(), ("ins-1", "orders"));
        assert!(split_identifier("orders").is_err());
        assert!(split_identifier("ins-1/").is_err());
    }

    #[test]
    fn create_body_wraps_one_database() {
        let attrs: HashMap<String, Value> = [
            ("name", string_value("orders")),
            ("character_set", string_value("utf8mb4")),
            ("description", string_value("order data")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(
            Database::create_body(&attrs),
            json!({"databases": [{"name": "orders", "character_set": "utf8mb4", "comment": "order data"}]})
        );
    }

    #[test]
    fn flatten_renames_charset_and_comment() {
        let listed = json!({
            "name": "orders",
            "charset": "utf8mb4",
            "comment": "order data",
            "users": [{"name": "app", "host": "%", "readonly": false}]
        });
        let attrs = Database::flatten("ins-1", &listed);
        assert_eq!(attrs.get("instance_id"), Some(&string_value("ins-1")));
        assert_eq!(attrs.get("character_set"), Some(&string_value("utf8mb4")));
        assert_eq!(attrs.get("description"), Some(&string_value("order data")));
        assert_eq!(attrs.get("users"), Some(&Value::List(vec![string_value("app")])));
    }
}
