//! gaussdb_mysql_account - Database user of a GaussDB(for MySQL) instance
//!
//! A user is keyed by name and host; the identifier is
//! `instance_id/name@host`, with `%` when the host is left out.

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
const ANY_HOST: &str = "%";

pub struct Account;

pub(crate) fn users_path(instance_id: &str) -> String {
    path("v3/{project_id}/instances/{id}/db-users", &[("id", instance_id)])
}

/// `instance_id/name@host` into its parts
fn split_identifier(identifier: &str) -> ProviderResult<(&str, &str, &str)> {
    let parts = parse_composite_id(identifier, 2, "<instance_id>/<name>[@<host>]")?;
    let (name, host) = parts[1].split_once('@').unwrap_or((parts[1], ANY_HOST));
    if name.is_empty() || host.is_empty() {
        return Err(ProviderError::validation(format!(
            "invalid identifier '{}', expected format '<instance_id>/<name>[@<host>]'",
            identifier
        )));
    }
    Ok((parts[0], name, host))
}

/// Find one user in the instance's listing
pub(crate) async fn find_user(
    client: &ServiceClient,
    instance_id: &str,
    name: &str,
    host: &str,
) -> ProviderResult<JsonValue> {
    let users = client
        .list_all_offset(&users_path(instance_id), &[], "users", PAGE_SIZE, Offset::Pages)
        .await?;
    users
        .into_iter()
        .find(|user| user["name"] == name && user["host"] == host)
        .ok_or_else(|| {
            ProviderError::not_found(format!(
                "user {}@{} not found in instance {}",
                name, host, instance_id
            ))
        })
}

impl Account {
    fn create_body(attrs: &HashMap<String, Value>) -> JsonValue {
        let mut user = json!({
            "name": get_str(attrs, "name"),
            "host": get_str(attrs, "host").unwrap_or(ANY_HOST),
            "password": get_str(attrs, "password"),
        });
        if let Some(comment) = get_str(attrs, "description") {
            user["comment"] = json!(comment);
        }
        json!({ "users": [user] })
    }

    fn flatten(instance_id: &str, user: &JsonValue) -> HashMap<String, Value> {
        let mut attrs = HashMap::new();
        attrs.insert("instance_id".to_string(), string_value(instance_id));
        for (attr, key) in [("name", "name"), ("host", "host"), ("description", "comment")] {
            if let Some(v) = user[key].as_str() {
                attrs.insert(attr.to_string(), string_value(v));
            }
        }
        attrs
    }

    async fn call(
        provider: &HuaweiCloudProvider,
        instance_id: &str,
        timeout: std::time::Duration,
        method: Method,
        request_path: &str,
        body: &JsonValue,
    ) -> ProviderResult<()> {
        let client = provider.client(SERVICE).await?;
        let response = instance_call(
            provider,
            &client,
            instance_id,
            timeout,
            method,
            request_path,
            Some(body),
        )
        .await?;
        wait_for_jobs(provider, &client, &response, timeout).await
    }
}

#[async_trait]
impl ResourceHandler for Account {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_account"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("gaussdb_mysql_account")
            .with_description("Database user of a GaussDB(for MySQL) instance")
            .with_timeouts(Timeouts::minutes(30, 30, 30))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("instance_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
            .attribute(
                AttributeSchema::new("host", AttributeType::String)
                    .with_default(string_value(ANY_HOST))
                    .force_new()
                    .with_description("Address the user may connect from, `%` for any"),
            )
            .attribute(AttributeSchema::new("password", AttributeType::String).required().sensitive())
            .attribute(AttributeSchema::new("description", AttributeType::String))
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let timeout = self.schema().timeouts.resolve(&resource.attributes).create;
        let instance_id = require_str(&resource.attributes, "instance_id")?;
        let name = require_str(&resource.attributes, "name")?;
        let host = get_str(&resource.attributes, "host").unwrap_or(ANY_HOST);

        let body = Self::create_body(&resource.attributes);
        Self::call(provider, instance_id, timeout, Method::POST, &users_path(instance_id), &body).await?;
        log::info!("Created user {}@{} in instance {}", name, host, instance_id);

        let identifier = format!("{}/{}@{}", instance_id, name, host);
        self.read(provider, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let (instance_id, name, host) = split_identifier(identifier)?;
        let client = provider.client(SERVICE).await?;
        let user = find_user(&client, instance_id, name, host).await?;
        Ok(State::existing(id.clone(), Self::flatten(instance_id, &user)).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (instance_id, name, host) = split_identifier(identifier)?;
        let timeout = self.schema().timeouts.resolve(&to.attributes).update;

        if has_change(from, to, "password") {
            let password = require_str(&to.attributes, "password")?;
            let body = json!({ "users": [{ "name": name, "host": host, "password": password }] });
            let password_path = format!("{}/password", users_path(instance_id));
            Self::call(provider, instance_id, timeout, Method::PUT, &password_path, &body).await?;
            log::debug!("Reset password of user {}@{}", name, host);
        }

        if has_change(from, to, "description") {
            let comment = get_str(&to.attributes, "description").unwrap_or_default();
            let body = json!({ "users": [{ "name": name, "host": host, "comment": comment }] });
            let comment_path = format!("{}/comment", users_path(instance_id));
            Self::call(provider, instance_id, timeout, Method::PUT, &comment_path, &body).await?;
        }

        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let (instance_id, name, host) = split_identifier(identifier)?;
        let timeout = self.schema().timeouts.resolve(&state.attributes).delete;
        let body = json!({ "users": [{ "name": name, "host": host }] });
        Self::call(provider, instance_id, timeout, Method::DELETE, &users_path(instance_id), &body).await
    }
}
