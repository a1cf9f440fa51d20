//! gaussdb_mysql_backup - Manual backup of an instance

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use carina_core::wait::DELETED;
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use super::{SERVICE, instance_call};
use crate::HuaweiCloudProvider;
use crate::client::{ServiceClient, path};
use crate::resources::ResourceHandler;
use crate::utils::{flatten_into, get_str, require_json_str, require_str};

const BACKUP_DELAY: Duration = Duration::from_secs(10);
const BACKUP_POLL: Duration = Duration::from_secs(10);

pub struct Backup;

async fn fetch_backup(client: &ServiceClient, backup_id: &str) -> ProviderResult<Option<JsonValue>> {
    let body = client
        .get_with_query("v3/{project_id}/backups", &[("backup_id", backup_id.to_string())])
        .await?;
    Ok(body["backups"]
        .as_array()
        .and_then(|backups| backups.iter().find(|b| b["id"] == backup_id))
        .cloned())
}

async fn wait_for_backup(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    backup_id: &str,
    pending: &[&str],
    target: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    let conf = provider.waiter(pending, &[target], timeout, BACKUP_DELAY, BACKUP_POLL);
    conf.wait_for_state(|| async move {
        let backup = fetch_backup(client, backup_id).await?;
        Ok::<_, ProviderError>(backup.map(|b| {
            let status = b["status"].as_str().unwrap_or_default().to_string();
            ((), status)
        }))
    })
    .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for Backup {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_backup"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("gaussdb_mysql_backup")
            .with_description("Manual backup of a GaussDB(for MySQL) instance")
            .with_timeouts(Timeouts::minutes(30, 30, 10))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("instance_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("description", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("type", AttributeType::String).computed())
            .attribute(AttributeSchema::new("begin_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("end_time", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("size", AttributeType::Float)
                    .computed()
                    .with_description("Backup size in KB"),
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
        let client = provider.client(SERVICE).await?;

        let mut body = json!({
            "instance_id": instance_id,
            "name": require_str(attrs, "name")?,
        });
        if let Some(description) = get_str(attrs, "description") {
            body["description"] = json!(description);
        }
        let response = instance_call(
            provider,
            &client,
            instance_id,
            timeout,
            Method::POST,
            "v3/{project_id}/backups/create",
            Some(&body),
        )
        .await?;
        let id = require_json_str(&response, "backup.id")?;
        log::info!("Started backup {} of instance {}", id, instance_id);

        wait_for_backup(provider, &client, &id, &["BUILDING"], "COMPLETED", timeout).await?;
        self.read(provider, &resource.id, &id).await
    }

    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let backup = fetch_backup(&client, identifier)
            .await?
            .ok_or_else(|| ProviderError::not_found(format!("backup {} not found", identifier)))?;
        let mut attrs = HashMap::new();
        flatten_into(&self.schema(), &backup, &mut attrs, &[]);
        Ok(State::existing(id.clone(), attrs).with_identifier(identifier))
    }

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        self.read(provider, &to.id, identifier).await
    }

    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()> {
        let timeout = self.schema().timeouts.resolve(&state.attributes).delete;
        let client = provider.client(SERVICE).await?;
        let backup_path = path("v3/{project_id}/backups/{id}", &[("id", identifier)]);

        match state.attributes.get("instance_id").and_then(Value::as_str) {
            Some(instance_id) => {
                instance_call(provider, &client, instance_id, timeout, Method::DELETE, &backup_path, None)
                    .await?;
            }
            None => {
                client.delete(&backup_path).await?;
            }
        }
        wait_for_backup(provider, &client, identifier, &["COMPLETED", "DELETING"], DELETED, timeout)
            .await
    }
}
