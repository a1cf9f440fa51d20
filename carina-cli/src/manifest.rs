//! JSON manifest loading
//!
//! ```json
//! {
//!   "provider": {"region": "cn-north-4"},
//!   "backend": {"type": "local", "path": "carina.state.json"},
//!   "resources": [
//!     {"type": "elb_loadbalancer", "name": "web", "attributes": {"name": "web", "vpc_id": "..."}},
//!     {"type": "elb_listener", "name": "http",
//!      "attributes": {"loadbalancer_id": "${web.id}", "protocol": "HTTP", "protocol_port": 80},
//!      "timeouts": {"create": "20m"}, "protected": true}
//!   ],
//!   "data": [{"type": "gaussdb_mysql_configurations", "name": "tuned", "attributes": {"name": "tuned"}}]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use carina_core::resource::{Resource, Value};
use carina_state::BackendConfig;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::graph::collect_dependencies;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Passed to `ProviderConfig::from_json`
    #[serde(default)]
    pub provider: JsonValue,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
    #[serde(default)]
    pub data: Vec<ResourceBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceBlock {
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Binding name, unique across resources and data sources
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, JsonValue>,
    /// `create` / `update` / `delete` durations such as `"20m"`
    #[serde(default)]
    pub timeouts: HashMap<String, String>,
    #[serde(default)]
    pub protected: bool,
}

impl ResourceBlock {
    fn to_resource(&self, read_only: bool) -> Resource {
        let mut resource = Resource::new(&self.resource_type, &self.name).with_read_only(read_only);
        for (key, value) in &self.attributes {
            if let Some(value) = parse_value(value) {
                resource.attributes.insert(key.clone(), value);
            }
        }
        if !self.timeouts.is_empty() {
            let timeouts = self
                .timeouts
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            resource
                .attributes
                .insert("_timeouts".to_string(), Value::Map(timeouts));
        }
        resource
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: Manifest =
            serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))?;
        manifest.check_bindings()?;
        Ok(manifest)
    }

    /// Bindings must be unique and every reference must name one of them
    fn check_bindings(&self) -> Result<(), String> {
        let mut bindings = HashSet::new();
        for block in self.blocks() {
            if !bindings.insert(block.name.as_str()) {
                return Err(format!("Duplicate binding name '{}'", block.name));
            }
        }

        let mut errors = Vec::new();
        for resource in self.all_resources() {
            let mut deps = HashSet::new();
            for value in resource.attributes.values() {
                collect_dependencies(value, &mut deps);
            }
            let mut unknown: Vec<_> = deps
                .into_iter()
                .filter(|d| !bindings.contains(d.as_str()))
                .collect();
            unknown.sort();
            for dep in unknown {
                errors.push(format!("{}: unknown reference '{}'", resource.id, dep));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }

    fn blocks(&self) -> impl Iterator<Item = &ResourceBlock> {
        self.data.iter().chain(self.resources.iter())
    }

    /// Data sources first, then managed resources, in declaration order
    pub fn all_resources(&self) -> Vec<Resource> {
        self.data
            .iter()
            .map(|b| b.to_resource(true))
            .chain(self.resources.iter().map(|b| b.to_resource(false)))
            .collect()
    }

    /// Bindings marked `protected`
    pub fn protected(&self) -> HashSet<String> {
        self.resources
            .iter()
            .filter(|b| b.protected)
            .map(|b| b.name.clone())
            .collect()
    }
}

/// Like `Value::from_json`, but strings of the form `${binding.attribute}`
/// become references
pub fn parse_value(json: &JsonValue) -> Option<Value> {
    match json {
        JsonValue::String(s) => Some(parse_reference(s).unwrap_or_else(|| Value::String(s.clone()))),
        JsonValue::Array(items) => Some(Value::List(items.iter().filter_map(parse_value).collect())),
        JsonValue::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| parse_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        other => Value::from_json(other),
    }
}

fn parse_reference(s: &str) -> Option<Value> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    let (binding, attribute) = inner.split_once('.')?;
    if binding.is_empty() || attribute.is_empty() || attribute.contains('.') {
        return None;
    }
    Some(Value::ResourceRef(binding.to_string(), attribute.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn references_are_parsed_inside_nested_values() {
        let value = parse_value(&json!({
            "pool": "${web_pool.id}",
            "members": ["${app1.id}", "literal"],
            "port": 80,
            "description": null
        }))
        .unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(
            map.get("pool"),
            Some(&Value::ResourceRef("web_pool".to_string(), "id".to_string()))
        );
        assert_eq!(
            map.get("members"),
            Some(&Value::List(vec![
                Value::ResourceRef("app1".to_string(), "id".to_string()),
                Value::String("literal".to_string()),
            ]))
        );
        assert_eq!(map.get("port"), Some(&Value::Int(80)));
        assert!(!map.contains_key("description"));
    }

    #[test]
    fn malformed_references_stay_strings() {
        for s in ["${web}", "${.id}", "${web.}", "$web.id", "${a.b.c}", "prefix ${web.id}"] {
            assert_eq!(parse_value(&json!(s)), Some(Value::String(s.to_string())), "{}", s);
        }
    }

    #[test]
    fn blocks_become_resources_with_timeouts() {
        let manifest = Manifest::parse(
            r#"{
                "resources": [{
                    "type": "gaussdb_mysql_instance", "name": "db",
                    "attributes": {"name": "db"},
                    "timeouts": {"create": "90m"},
                    "protected": true
                }],
                "data": [{"type": "gaussdb_mysql_configurations", "name": "cfg"}]
            }"#,
        )
        .unwrap();

        let resources = manifest.all_resources();
        assert_eq!(resources.len(), 2);
        assert!(resources[0].is_data_source());
        assert_eq!(resources[1].id.name, "db");
        let Some(Value::Map(timeouts)) = resources[1].attributes.get("_timeouts") else {
            panic!("timeouts missing");
        };
        assert_eq!(timeouts.get("create"), Some(&Value::String("90m".to_string())));
        assert!(manifest.protected().contains("db"));
        assert_eq!(manifest.backend.backend_type, "local");
    }

    #[test]
    fn duplicate_and_unknown_bindings_are_rejected() {
        let err = Manifest::parse(
            r#"{"resources": [
                {"type": "elb_pool", "name": "web"},
                {"type": "elb_listener", "name": "web"}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.contains("Duplicate binding name 'web'"));

        let err = Manifest::parse(
            r#"{"resources": [
                {"type": "elb_member", "name": "app1", "attributes": {"pool_id": "${pool.id}"}}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.contains("unknown reference 'pool'"));
    }
}
