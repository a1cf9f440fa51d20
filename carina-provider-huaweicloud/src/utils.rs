//! Helpers shared by resource handlers: payload mapping, attribute access,
//! tags and composite identifiers

use std::collections::HashMap;

use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, State, Value};
use carina_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::{Map, Value as JsonValue, json};
use sha2::{Digest, Sha256};

// =============================================================================
// Payload Mapping
// =============================================================================

/// Build a request object from the listed attributes, renaming each one to
/// its `provider_name`. Unset attributes are left out.
pub fn build_body(
    schema: &ResourceSchema,
    attributes: &HashMap<String, Value>,
    fields: &[&str],
) -> Map<String, JsonValue> {
    let mut body = Map::new();
    for name in fields {
        let (Some(attr), Some(value)) = (schema.get(name), attributes.get(*name)) else {
            continue;
        };
        body.insert(attr.api_name().to_string(), value_to_api(&attr.attr_type, value));
    }
    body
}

/// Convert a value, renaming nested object fields to their API names
pub fn value_to_api(attr_type: &AttributeType, value: &Value) -> JsonValue {
    match (attr_type, value) {
        (AttributeType::Object(fields), Value::Map(map)) => {
            let mut out = Map::new();
            for (key, inner) in map {
                match fields.iter().find(|f| &f.name == key) {
                    Some(field) => {
                        out.insert(
                            field.api_name().to_string(),
                            value_to_api(&field.attr_type, inner),
                        );
                    }
                    None => {
                        out.insert(key.clone(), inner.to_json());
                    }
                }
            }
            JsonValue::Object(out)
        }
        (AttributeType::List(item), Value::List(items)) => {
            JsonValue::Array(items.iter().map(|v| value_to_api(item, v)).collect())
        }
        (AttributeType::Custom { base, .. }, _) => value_to_api(base, value),
        _ => value.to_json(),
    }
}

/// Convert an API value back, renaming nested object fields to schema names
pub fn value_from_api(attr_type: &AttributeType, json: &JsonValue) -> Option<Value> {
    match (attr_type, json) {
        (AttributeType::Object(fields), JsonValue::Object(obj)) => {
            let map: HashMap<String, Value> = fields
                .iter()
                .filter_map(|field| {
                    obj.get(field.api_name())
                        .and_then(|v| value_from_api(&field.attr_type, v))
                        .map(|v| (field.name.clone(), v))
                })
                .collect();
            Some(Value::Map(map))
        }
        (AttributeType::List(item), JsonValue::Array(items)) => Some(Value::List(
            items.iter().filter_map(|v| value_from_api(item, v)).collect(),
        )),
        (AttributeType::Custom { base, .. }, _) => value_from_api(base, json),
        _ => Value::from_json(json),
    }
}

/// Copy every schema attribute present in `object` into `attributes`,
/// except the ones in `skip`
pub fn flatten_into(
    schema: &ResourceSchema,
    object: &JsonValue,
    attributes: &mut HashMap<String, Value>,
    skip: &[&str],
) {
    for (name, attr) in &schema.attributes {
        // tags come back as a key/value list, see flatten_tags
        if name == "tags" || skip.contains(&name.as_str()) {
            continue;
        }
        if let Some(value) = object
            .get(attr.api_name())
            .and_then(|v| value_from_api(&attr.attr_type, v))
        {
            attributes.insert(name.clone(), value);
        }
    }
}

/// Drop nulls and empty objects, recursively
pub fn remove_nil(json: JsonValue) -> JsonValue {
    match json {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(k, v)| (k, remove_nil(v)))
                .filter(|(_, v)| !v.is_null() && !v.as_object().is_some_and(Map::is_empty))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(remove_nil).collect()),
        other => other,
    }
}

/// Look up a dotted path such as `loadbalancer.provisioning_status`
pub fn json_path<'a>(json: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(json, |node, key| match node {
        JsonValue::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => node.get(key),
    })
}

pub fn json_str<'a>(json: &'a JsonValue, path: &str) -> Option<&'a str> {
    json_path(json, path).and_then(JsonValue::as_str)
}

/// Fetch a required string from a response body
pub fn require_json_str(json: &JsonValue, path: &str) -> ProviderResult<String> {
    json_str(json, path)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::new(format!("response is missing '{}'", path)))
}

// =============================================================================
// Attribute Access
// =============================================================================

pub fn get_str<'a>(attributes: &'a HashMap<String, Value>, name: &str) -> Option<&'a str> {
    attributes.get(name).and_then(Value::as_str)
}

pub fn get_int(attributes: &HashMap<String, Value>, name: &str) -> Option<i64> {
    attributes.get(name).and_then(Value::as_int)
}

pub fn get_bool(attributes: &HashMap<String, Value>, name: &str) -> Option<bool> {
    attributes.get(name).and_then(Value::as_bool)
}

pub fn require_str<'a>(attributes: &'a HashMap<String, Value>, name: &str) -> ProviderResult<&'a str> {
    get_str(attributes, name)
        .ok_or_else(|| ProviderError::validation(format!("'{}' must be set", name)))
}

/// Whether the desired value is set and differs from the recorded one
pub fn has_change(from: &State, to: &Resource, name: &str) -> bool {
    to.attributes
        .get(name)
        .is_some_and(|desired| from.attributes.get(name) != Some(desired))
}

/// Whether any of `names` changed
pub fn has_changes(from: &State, to: &Resource, names: &[&str]) -> bool {
    names.iter().any(|name| has_change(from, to, name))
}

pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn string_value(s: impl Into<String>) -> Value {
    Value::String(s.into())
}

// =============================================================================
// Tag Helpers
// =============================================================================

pub fn tags_schema() -> AttributeSchema {
    AttributeSchema::new("tags", AttributeType::Map(Box::new(AttributeType::String)))
        .with_description("Key/value tags")
}

/// `{"k": "v"}` to `[{"key": "k", "value": "v"}]`
pub fn expand_tags(tags: Option<&Value>) -> Vec<JsonValue> {
    let mut out: Vec<JsonValue> = tags
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| json!({"key": k, "value": v})))
                .collect()
        })
        .unwrap_or_default();
    out.sort_by(|a, b| a["key"].as_str().cmp(&b["key"].as_str()));
    out
}

/// `[{"key": "k", "value": "v"}]` to a map value
pub fn flatten_tags(tags: Option<&JsonValue>) -> Option<Value> {
    let items = tags?.as_array()?;
    let map: HashMap<String, Value> = items
        .iter()
        .filter_map(|tag| {
            let key = tag.get("key")?.as_str()?;
            let value = tag.get("value").and_then(JsonValue::as_str).unwrap_or("");
            Some((key.to_string(), string_value(value)))
        })
        .collect();
    Some(Value::Map(map))
}

/// Tags differ, counting an omitted `tags` argument as "no tags"
pub fn tags_changed(from: &State, to: &Resource) -> bool {
    let (remove, add) = tags_diff(from.attributes.get("tags"), to.attributes.get("tags"));
    !remove.is_empty() || !add.is_empty()
}

/// Tags to remove and tags to add so that `old` becomes `new`
pub fn tags_diff(old: Option<&Value>, new: Option<&Value>) -> (Vec<JsonValue>, Vec<JsonValue>) {
    let empty = HashMap::new();
    let old = old.and_then(Value::as_map).unwrap_or(&empty);
    let new = new.and_then(Value::as_map).unwrap_or(&empty);

    let mut remove: Vec<JsonValue> = old
        .iter()
        .filter(|(k, v)| new.get(*k) != Some(*v))
        .map(|(k, v)| json!({"key": k, "value": v.as_str().unwrap_or("")}))
        .collect();
    let mut add: Vec<JsonValue> = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| json!({"key": k, "value": v.as_str().unwrap_or("")}))
        .collect();
    remove.sort_by(|a, b| a["key"].as_str().cmp(&b["key"].as_str()));
    add.sort_by(|a, b| a["key"].as_str().cmp(&b["key"].as_str()));
    (remove, add)
}

// =============================================================================
// Data Sources
// =============================================================================

/// Stable identifier of a query result: the SHA-256 of its sorted item IDs
pub fn result_id<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = ids.into_iter().collect();
    ids.sort_unstable();
    hex::encode(Sha256::digest(ids.join(",").as_bytes()))
}

/// Project each listed object onto `(attribute, api_key)` pairs
pub fn project_items(items: &[JsonValue], fields: &[(&str, &str)]) -> Value {
    Value::List(
        items
            .iter()
            .map(|item| {
                let map: HashMap<String, Value> = fields
                    .iter()
                    .filter_map(|(name, key)| {
                        json_path(item, key)
                            .and_then(Value::from_json)
                            .map(|v| (name.to_string(), v))
                    })
                    .collect();
                Value::Map(map)
            })
            .collect(),
    )
}

// =============================================================================
// Identifiers
// =============================================================================

/// Split an identifier like `pool_id/member_id` into exactly `parts` pieces
pub fn parse_composite_id<'a>(
    identifier: &'a str,
    parts: usize,
    format: &str,
) -> ProviderResult<Vec<&'a str>> {
    let pieces: Vec<&str> = identifier.splitn(parts, '/').collect();
    if pieces.len() != parts || pieces.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::validation(format!(
            "invalid identifier '{}', expected format '{}'",
            identifier, format
        )));
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_schema() -> ResourceSchema {
        ResourceSchema::new("elb_pool")
            .attribute(
                AttributeSchema::new("lb_method", AttributeType::String)
                    .with_provider_name("lb_algorithm"),
            )
            .attribute(AttributeSchema::new("name", AttributeType::String))
            .attribute(
                AttributeSchema::new(
                    "persistence",
                    AttributeType::Object(vec![
                        AttributeSchema::new("type", AttributeType::String),
                        AttributeSchema::new("timeout", AttributeType::Int)
                            .with_provider_name("persistence_timeout"),
                    ]),
                )
                .with_provider_name("session_persistence"),
            )
    }

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn build_body_renames_fields_and_nested_keys() {
        let mut persistence = HashMap::new();
        persistence.insert("type".to_string(), string_value("SOURCE_IP"));
        persistence.insert("timeout".to_string(), Value::Int(30));
        let attributes = attrs(&[
            ("lb_method", string_value("ROUND_ROBIN")),
            ("persistence", Value::Map(persistence)),
        ]);

        let body = build_body(&pool_schema(), &attributes, &["lb_method", "name", "persistence"]);
        assert_eq!(
            JsonValue::Object(body),
            json!({
                "lb_algorithm": "ROUND_ROBIN",
                "session_persistence": {"type": "SOURCE_IP", "persistence_timeout": 30}
            })
        );
    }

    #[test]
    fn flatten_reverses_the_mapping() {
        let response = json!({
            "lb_algorithm": "LEAST_CONNECTIONS",
            "name": "web",
            "session_persistence": {"type": "HTTP_COOKIE", "persistence_timeout": 60, "cookie_name": null}
        });
        let mut attributes = HashMap::new();
        flatten_into(&pool_schema(), &response, &mut attributes, &["name"]);

        assert_eq!(attributes.get("lb_method"), Some(&string_value("LEAST_CONNECTIONS")));
        assert!(!attributes.contains_key("name"));
        let persistence = attributes["persistence"].as_map().unwrap();
        assert_eq!(persistence.get("timeout"), Some(&Value::Int(60)));
    }

    #[test]
    fn remove_nil_drops_empty_branches() {
        let cleaned = remove_nil(json!({"a": null, "b": {"c": null}, "d": [1], "e": "x"}));
        assert_eq!(cleaned, json!({"d": [1], "e": "x"}));
    }

    #[test]
    fn json_path_walks_objects_and_arrays() {
        let body = json!({"instance": {"nodes": [{"id": "n1"}]}});
        assert_eq!(json_str(&body, "instance.nodes.0.id"), Some("n1"));
        assert!(json_path(&body, "instance.missing").is_none());
        assert!(require_json_str(&body, "instance.id").is_err());
    }

    #[test]
    fn tags_round_trip_and_diff() {
        let mut old = HashMap::new();
        old.insert("env".to_string(), string_value("dev"));
        old.insert("team".to_string(), string_value("core"));
        let mut new = old.clone();
        new.insert("env".to_string(), string_value("prod"));
        new.remove("team");
        new.insert("owner".to_string(), string_value("ops"));

        let (remove, add) = tags_diff(Some(&Value::Map(old.clone())), Some(&Value::Map(new)));
        assert_eq!(
            remove,
            vec![json!({"key": "env", "value": "dev"}), json!({"key": "team", "value": "core"})]
        );
        assert_eq!(
            add,
            vec![json!({"key": "env", "value": "prod"}), json!({"key": "owner", "value": "ops"})]
        );

        let expanded = JsonValue::Array(expand_tags(Some(&Value::Map(old.clone()))));
        assert_eq!(flatten_tags(Some(&expanded)), Some(Value::Map(old)));
    }

    #[test]
    fn composite_ids() {
        assert_eq!(
            parse_composite_id("pool-1/member-2", 2, "<pool_id>/<member_id>").unwrap(),
            vec!["pool-1", "member-2"]
        );
        assert!(parse_composite_id("pool-1", 2, "<pool_id>/<member_id>").is_err());
        assert!(parse_composite_id("pool-1/", 2, "<pool_id>/<member_id>").is_err());
    }

    #[test]
    fn result_ids_ignore_order() {
        let a = result_id(["lb-2", "lb-1"]);
        assert_eq!(a, result_id(["lb-1", "lb-2"]));
        assert_eq!(a.len(), 64);
        assert_ne!(a, result_id(["lb-1"]));
    }

    #[test]
    fn project_items_follows_nested_keys() {
        let items = vec![json!({"id": "ls-1", "loadbalancers": [{"id": "lb-1"}], "name": null})];
        let projected = project_items(&items, &[("id", "id"), ("loadbalancer_id", "loadbalancers.0.id"), ("name", "name")]);
        let first = projected.as_list().unwrap()[0].as_map().unwrap().clone();
        assert_eq!(first.get("loadbalancer_id"), Some(&string_value("lb-1")));
        assert!(!first.contains_key("name"));
    }
}
