//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in the manifest with the "current state"
//! fetched from the Provider, and generates a list of required Effects (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::{AttributeType, ResourceSchema};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A changed attribute cannot be updated in place
    Replace {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
    /// Resource exists but not in desired state -> needs deletion
    Delete(State),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let forces_new = schema.is_some_and(|s| {
        changed
            .iter()
            .any(|name| s.get(name).is_some_and(|a| a.force_new))
    });

    if forces_new {
        Diff::Replace {
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        let attr = schema.and_then(|s| s.get(key));
        let Some(current_value) = current.get(key) else {
            changed.push(key.clone());
            continue;
        };

        if let Some(suppress) = attr.and_then(|a| a.suppress_diff)
            && suppress(current_value, desired_value)
        {
            continue;
        }

        let is_object = attr.is_some_and(|a| matches!(a.attr_type, AttributeType::Object(_)));
        let equal = if is_object {
            map_subset_equal(desired_value, current_value)
        } else {
            current_value == desired_value
        };

        if !equal {
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}

/// Nested blocks compare only the fields the user declared;
/// the cloud fills in the rest.
fn map_subset_equal(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Map(d), Value::Map(c)) => d
            .iter()
            .all(|(k, v)| c.get(k).is_some_and(|cv| map_subset_equal(v, cv))),
        _ => desired == current,
    }
}

/// Compute Diff for multiple resources and generate a Plan
///
/// `current_states` may contain states that no longer appear in `desired`;
/// those are planned for deletion after every other effect.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        if resource.is_data_source() {
            plan.add(Effect::Read {
                resource: resource.clone(),
            });
            continue;
        }

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let d = diff(resource, &current, schemas.get(&resource.id.resource_type));

        match d {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => {
                plan.add(Effect::Update {
                    id,
                    from,
                    to,
                    changed_attributes,
                });
            }
            Diff::Replace {
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                from,
                to,
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
            Diff::Delete(state) => plan.add(Effect::Delete(state)),
        }
    }

    let declared: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !declared.contains(&s.id))
        .collect();
    orphans.sort_by(|a, b| a.id.cmp(&b.id));
    for state in orphans {
        plan.add(Effect::Delete(state.clone()));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, suppress};

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    fn listener_schema() -> ResourceSchema {
        ResourceSchema::new("elb_listener")
            .attribute(AttributeSchema::new("protocol_port", AttributeType::Int).force_new())
            .attribute(AttributeSchema::new("name", AttributeType::String))
            .attribute(
                AttributeSchema::new("whitelist", AttributeType::String)
                    .with_suppress_diff(suppress::comma_set),
            )
            .attribute(AttributeSchema::new(
                "persistence",
                AttributeType::Object(vec![
                    AttributeSchema::new("type", AttributeType::String),
                    AttributeSchema::new("timeout", AttributeType::Int),
                ]),
            ))
    }

    fn existing(attrs: &[(&str, Value)]) -> State {
        State::existing(
            ResourceId::new("elb_listener", "web"),
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
        .with_identifier("listener-id")
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("elb_listener", "web");
        let current = State::not_found(ResourceId::new("elb_listener", "web"));

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_when_same() {
        let desired = Resource::new("elb_listener", "web")
            .with_attribute("name", s("web"))
            .with_attribute("_binding", s("web"));
        let current = existing(&[("name", s("web")), ("id", s("listener-id"))]);

        let result = diff(&desired, &current, Some(&listener_schema()));
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn diff_update_when_different() {
        let desired = Resource::new("elb_listener", "web").with_attribute("name", s("api"));
        let current = existing(&[("name", s("web"))]);

        match diff(&desired, &current, Some(&listener_schema())) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["name".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_when_force_new_changes() {
        let desired = Resource::new("elb_listener", "web")
            .with_attribute("name", s("api"))
            .with_attribute("protocol_port", Value::Int(8080));
        let current = existing(&[("name", s("web")), ("protocol_port", Value::Int(80))]);

        match diff(&desired, &current, Some(&listener_schema())) {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(
                changed_attributes,
                vec!["name".to_string(), "protocol_port".to_string()]
            ),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn suppressed_and_nested_differences_are_ignored() {
        let mut persistence = HashMap::new();
        persistence.insert("type".to_string(), s("SOURCE_IP"));
        let mut remote_persistence = persistence.clone();
        remote_persistence.insert("timeout".to_string(), Value::Int(60));

        let desired = Resource::new("elb_listener", "web")
            .with_attribute("whitelist", s("10.0.0.1,192.168.0.1"))
            .with_attribute("persistence", Value::Map(persistence));
        let current = existing(&[
            ("whitelist", s("192.168.0.1,10.0.0.1")),
            ("persistence", Value::Map(remote_persistence)),
        ]);

        assert!(!diff(&desired, &current, Some(&listener_schema())).is_change());
    }

    #[test]
    fn create_plan_from_resources() {
        let resources = vec![
            Resource::new("elb_pool", "new-pool"),
            Resource::new("elb_pool", "existing-pool").with_attribute("name", s("b")),
            Resource::new("elb_loadbalancers", "all").with_read_only(true),
        ];

        let mut current_states = HashMap::new();
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), s("a"));
        current_states.insert(
            ResourceId::new("elb_pool", "existing-pool"),
            State::existing(ResourceId::new("elb_pool", "existing-pool"), attrs),
        );
        current_states.insert(
            ResourceId::new("elb_pool", "removed"),
            State::existing(ResourceId::new("elb_pool", "removed"), HashMap::new()),
        );

        let plan = create_plan(&resources, &current_states, &HashMap::new());

        assert_eq!(plan.effects().len(), 4);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Update { .. }));
        assert!(matches!(plan.effects()[2], Effect::Read { .. }));
        assert!(matches!(plan.effects()[3], Effect::Delete(_)));
    }
}
