//! GaussDB(for MySQL) list queries: gaussdb_mysql_instances, gaussdb_mysql_configurations

use std::collections::HashMap;

use async_trait::async_trait;
use carina_core::provider::ProviderResult;
use carina_core::resource::{Resource, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::Value as JsonValue;

use super::SERVICE;
use crate::HuaweiCloudProvider;
use crate::client::Offset;
use crate::resources::DataSourceHandler;
use crate::utils::{get_str, project_items, result_id, string_value};

const PAGE_SIZE: usize = 100;

fn list_schema(name: &str, description: &str, filters: &[&str], list_key: &str) -> ResourceSchema {
    let mut schema = ResourceSchema::new(name)
        .with_description(description)
        .as_data_source()
        .attribute(AttributeSchema::new("id", AttributeType::String).computed());
    for filter in filters {
        schema = schema.attribute(AttributeSchema::new(*filter, AttributeType::String));
    }
    schema.attribute(
        AttributeSchema::new(
            list_key,
            AttributeType::List(Box::new(AttributeType::Map(Box::new(AttributeType::String)))),
        )
        .computed(),
    )
}

fn to_state(query: &Resource, list_key: &str, items: &[JsonValue], fields: &[(&str, &str)]) -> State {
    let mut attrs = query.attributes.clone();
    let id = result_id(items.iter().filter_map(|item| item["id"].as_str()));
    attrs.insert("id".to_string(), string_value(id.clone()));
    attrs.insert(list_key.to_string(), project_items(items, fields));
    State::existing(query.id.clone(), attrs).with_identifier(id)
}

// =============================================================================
// Instances
// =============================================================================

const INSTANCE_FILTERS: &[&str] = &["name", "vpc_id", "subnet_id"];

const INSTANCE_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "name"),
    ("status", "status"),
    ("mode", "type"),
    ("vpc_id", "vpc_id"),
    ("subnet_id", "subnet_id"),
    ("security_group_id", "security_group_id"),
    ("configuration_id", "configuration_id"),
    ("enterprise_project_id", "enterprise_project_id"),
    ("datastore_engine", "datastore.type"),
    ("datastore_version", "datastore.version"),
    ("port", "port"),
    ("private_write_ip", "private_write_ips.0"),
    ("db_user_name", "db_user_name"),
    ("time_zone", "time_zone"),
    ("created_at", "created"),
];

pub struct Instances;

impl Instances {
    fn query_params(attrs: &HashMap<String, Value>) -> Vec<(&'static str, String)> {
        INSTANCE_FILTERS
            .iter()
            .filter_map(|name| {
                get_str(attrs, name)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*name, v.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl DataSourceHandler for Instances {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_instances"
    }

    fn schema(&self) -> ResourceSchema {
        list_schema(
            "gaussdb_mysql_instances",
            "GaussDB(for MySQL) instances matching the given filters",
            INSTANCE_FILTERS,
            "instances",
        )
    }

    async fn read(&self, provider: &HuaweiCloudProvider, query: &Resource) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let params = Self::query_params(&query.attributes);
        let items = client
            .list_all_offset("v3/{project_id}/instances", &params, "instances", PAGE_SIZE, Offset::Records)
            .await?;
        log::debug!("gaussdb_mysql_instances matched {} instance(s)", items.len());
        Ok(to_state(query, "instances", &items, INSTANCE_FIELDS))
    }
}

// =============================================================================
// Parameter templates
// =============================================================================

const CONFIGURATION_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "name"),
    ("description", "description"),
    ("datastore_name", "datastore_name"),
    ("datastore_version", "datastore_version_name"),
    ("user_defined", "user_defined"),
    ("created_at", "created"),
    ("updated_at", "updated"),
];

pub struct Configurations;

impl Configurations {
    /// The listing is not paginated; `name` is matched client side
    fn filter(items: Vec<JsonValue>, name: Option<&str>) -> Vec<JsonValue> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => items.into_iter().filter(|item| item["name"] == name).collect(),
            None => items,
        }
    }
}

#[async_trait]
impl DataSourceHandler for Configurations {
    fn name(&self) -> &'static str {
        "gaussdb_mysql_configurations"
    }

    fn schema(&self) -> ResourceSchema {
        list_schema(
            "gaussdb_mysql_configurations",
            "GaussDB(for MySQL) parameter templates, built-in and user defined",
            &["name"],
            "configurations",
        )
    }

    async fn read(&self, provider: &HuaweiCloudProvider, query: &Resource) -> ProviderResult<State> {
        let client = provider.client(SERVICE).await?;
        let body = client.get("v3/{project_id}/configurations").await?;
        let items = body["configurations"].as_array().cloned().unwrap_or_default();
        let items = Self::filter(items, get_str(&query.attributes, "name"));
        Ok(to_state(query, "configurations", &items, CONFIGURATION_FIELDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filters_are_not_sent() {
        let attrs: HashMap<String, Value> = [
            ("name".to_string(), string_value("")),
            ("vpc_id".to_string(), string_value("vpc-1")),
        ]
        .into();
        assert_eq!(Instances::query_params(&attrs), vec![("vpc_id", "vpc-1".to_string())]);
    }

    #[test]
    fn instances_project_nested_fields() {
        let query = Resource::new("gaussdb_mysql_instances", "all").with_read_only(true);
        let items = vec![json!({
            "id": "ins-1",
            "name": "orders",
            "datastore": {"type": "gaussdb-mysql", "version": "8.0"},
            "private_write_ips": ["192.168.0.10"]
        })];
        let state = to_state(&query, "instances", &items, INSTANCE_FIELDS);
        let instances = state.attributes.get("instances").and_then(Value::as_list).unwrap();
        let first = instances[0].as_map().unwrap();
        assert_eq!(first.get("datastore_version"), Some(&string_value("8.0")));
        assert_eq!(first.get("private_write_ip"), Some(&string_value("192.168.0.10")));
        assert_eq!(state.identifier.as_deref(), Some(result_id(["ins-1"]).as_str()));
    }

    #[test]
    fn configurations_filter_by_name() {
        let items = vec![json!({"id": "c-1", "name": "default"}), json!({"id": "c-2", "name": "tuned"})];
        let filtered = Configurations::filter(items.clone(), Some("tuned"));
        assert_eq!(filtered, vec![json!({"id": "c-2", "name": "tuned"})]);
        assert_eq!(Configurations::filter(items, Some("")).len(), 2);
    }

    #[test]
    fn schemas_are_data_sources() {
        assert!(Instances.schema().data_source);
        assert!(Configurations.schema().get("configurations").unwrap().is_read_only());
    }
}
