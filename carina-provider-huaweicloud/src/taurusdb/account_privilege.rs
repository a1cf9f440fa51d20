//! gaussdb_mysql_account_privilege - Database grants of one user

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use super::account::{find_user, users_path};
use super::jobs::wait_for_jobs;
use super::{SERVICE, instance_call};
use crate::HuaweiCloudProvider;
use crate::resources::ResourceHandler;
use crate::utils::{get_str, parse_composite_id, require_str, string_value};

pub struct AccountPrivilege;

/// One granted database
#[derive(Debug, Clone, PartialEq, Eq)]
struct Grant {
    name: String,
    readonly: bool,
}

fn privilege_path(instance_id: &str) -> String {
    format!("{}/privilege", users_path(instance_id))
}

fn split_identifier(identifier: &str) -> ProviderResult<(&str, &str, &str)> {
    let parts = parse_composite_id(identifier, 3, "<instance_id>/<account_name>/<host>")?;
    Ok((parts[0], parts[1], parts[2]))
}

fn grants(value: Option<&Value>) -> Vec<Grant> {
    value
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .filter_map(|db| {
            Some(Grant {
                name: db.get("name")?.as_str()?.to_string(),
                readonly: db.get("readonly").and_then(Value::as_bool).unwrap_or(false),
            })
        })
        .collect()
}

/// Grants to revoke and grants to add. A changed `readonly` flag is a
/// revoke followed by a new grant.
fn grant_diff(old: &[Grant], new: &[Grant]) -> (Vec<Grant>, Vec<Grant>) {
    let revoke = old.iter().filter(|g| !new.contains(g)).cloned().collect();
    let grant = new.iter().filter(|g| !old.contains(g)).cloned().collect();
    (revoke, grant)
}

impl AccountPrivilege {
    fn grant_body(name: &str, host: &str, grants: &[Grant]) -> JsonValue {
        let databases: Vec<JsonValue> = grants
            .iter()
            .map(|g| json!({ "name": g.name, "readonly": g.readonly }))
            .collect();
        json!({ "users": [{ "name": name, "host": host, "databases": databases }] })
    }

    fn revoke_body(name: &str, host: &str, grants: &[Grant]) -> JsonValue {
        let databases: Vec<&str> = grants.iter().map(|g| g.name.as_str()).collect();
        json!({ "users": [{ "name": name, "host": host, "databases": databases }] })
    }

    fn flatten(instance_id: &str, user: &JsonValue) -> HashMap<String, Value> {
        let databases = user["databases"]
            .as_array()
            .map(|dbs| {
                dbs.iter()
                    .filter_map(|db| {
                        let name = db["name"].as_str()?;
                        Some(Value::Map(HashMap::from([
                            ("name".to_string(), string_value(name)),
                            (
                                "readonly".to_string(),
                                Value::Bool(db["readonly"].as_bool().unwrap_or(false)),
                            ),
                        ])))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut attrs = HashMap::new();
        attrs.insert("instance_id".to_string(), string_value(instance_id));
        if let Some(name) = user["name"].as_str() {
            attrs.insert("account_name".to_string(), string_value(name));
        }
        if let Some(host) = user["host"].as_str() {
            attrs.insert("host".to_string(), string_value(host));
        }
        attrs.insert("databases".to_string(), Value::List(databases));
        attrs
    }

    async fn send(
        provider: &HuaweiCloudProvider,
        instance_id: &str,
        timeout: std::time::Duration,
        method: Method,
        body: &JsonValue,
    ) -> ProviderResult<()> {
        let client = provider.client(SERVICE).await?;
        let response = instance_call(
            provider,
            &client,
            instance_id,
            timeout,
            method,
            &privilege_path(instance_id),
            Some(body),
        )
        .await?;
        wait_for_jobs(provider, &client, &response, timeout).await
    }
}

#[async_trait]
impl ResourceHandler for AccountPrivilege {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_account_privilege"
    }

    fn schema(&self) -> ResourceSchema {
        let database = AttributeType::Object(vec![
            AttributeSchema::new("name", AttributeType::String).required(),
            AttributeSchema::new("readonly", AttributeType::Bool).with_default(Value::Bool(false)),
        ]);
        ResourceSchema::new("gaussdb_mysql_account_privilege")
            .with_description("Database grants of one GaussDB(for MySQL) user")
            .with_timeouts(Timeouts::minutes(30, 30, 30))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("instance_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("account_name", AttributeType::String).required().force_new())
            .attribute(
                AttributeSchema::new("host", AttributeType::String)
                    .with_default(string_value("%"))
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("databases", AttributeType::List(Box::new(database))).required(),
            )
    }

    async fn create(
        &self,
        provider: &HuaweiCloudProvider,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let attrs = &resource.attributes;
        let timeout = self.schema().timeouts.resolve(attrs).create;
        let instance_id = require_str(attrs, "instance_id")?;
        let name = require_str(attrs, "account_name")?;
        let host = get_str(attrs, "host").unwrap_or("%");

        let body = Self::grant_body(name, host, &grants(attrs.get("databases")));
        Self::send(provider, instance_id, timeout, Method::POST, &body).await?;
        log::info!("Granted database privileges to {}@{}", name, host);

        let identifier = format!("{}/{}/{}", instance_id, name, host);
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
        let (revoke, grant) = grant_diff(
            &grants(from.attributes.get("databases")),
            &grants(to.attributes.get("databases")),
        );

        if !revoke.is_empty() {
            let body = Self::revoke_body(name, host, &revoke);
            Self::send(provider, instance_id, timeout, Method::DELETE, &body).await?;
        }
        if !grant.is_empty() {
            let body = Self::grant_body(name, host, &grant);
            Self::send(provider, instance_id, timeout, Method::POST, &body).await?;
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
        let granted = grants(state.attributes.get("databases"));
        if granted.is_empty() {
            return Ok(());
        }
        let body = Self::revoke_body(name, host, &granted);
        Self::send(provider, instance_id, timeout, Method::DELETE, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(name: &str, readonly: bool) -> Grant {
        Grant {
            name: name.to_string(),
            readonly,
        }
    }

    fn db(name: &str, readonly: bool) -> Value {
        Value::Map(HashMap::from([
            ("name".to_string(), string_value(name)),
            ("readonly".to_string(), Value::Bool(readonly)),
        ]))
    }

    #[test]
    fn readonly_flips_are_revoked_then_granted() {
        let old = vec![grant("orders", false), grant("audit", true)];
        let new = vec![grant("orders", true), grant("audit", true), grant("stock", false)];
        let (revoke, add) = grant_diff(&old, &new);
        assert_eq!(revoke, vec![grant("orders", false)]);
        assert_eq!(add, vec![grant("orders", true), grant("stock", false)]);
    }

    #[test]
    fn grants_default_to_read_write() {
        let value = Value::List(vec![
            db("orders", true),
            Value::Map(HashMap::from([("name".to_string(), string_value("stock"))])),
        ]);
        assert_eq!(grants(Some(&value)), vec![grant("orders", true), grant("stock", false)]);
    }

    #[test]
    fn bodies_name_the_user() {
        let body = AccountPrivilege::grant_body("app", "%", &[grant("orders", true)]);
        assert_eq!(
            body,
            json!({"users": [{"name": "app", "host": "%", "databases": [{"name": "orders", "readonly": true}]}]})
        );
        let body = AccountPrivilege::revoke_body("app", "%", &[grant("orders", true)]);
        assert_eq!(body["users"][0]["databases"], json!(["orders"]));
    }

    #[test]
    fn identifier_has_three_parts() {
        assert_eq!(split_identifier("ins-1/app/%").unwrap(), ("ins-1", "app", "%"));
        assert!(split_identifier("ins-1/app").is_err());
    }

    #[test]
    fn flatten_lists_granted_databases() {
        let user = json!({
            "name": "app",
            "host": "%",
            "databases": [{"name": "orders", "readonly": true}]
        });
        let attrs = AccountPrivilege::flatten("ins-1", &user);
        assert_eq!(attrs.get("account_name"), Some(&string_value("app")));
        assert_eq!(attrs.get("databases"), Some(&Value::List(vec![db("orders", true)])));
    }
}
