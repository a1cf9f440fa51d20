//! Reference graph: dependency ordering and `${binding.attribute}` resolution

use std::collections::{HashMap, HashSet};

use carina_core::resource::{Resource, Value};

/// Known attributes of every binding seen so far
pub type Bindings = HashMap<String, HashMap<String, Value>>;

/// Binding names a resource references
pub fn resource_dependencies(resource: &Resource) -> HashSet<String> {
    let mut deps = HashSet::new();
    for value in resource.attributes.values() {
        collect_dependencies(value, &mut deps);
    }
    deps
}

pub fn collect_dependencies(value: &Value, deps: &mut HashSet<String>) {
    match value {
        Value::ResourceRef(binding, _) => {
            deps.insert(binding.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_dependencies(item, deps);
            }
        }
        Value::Map(map) => {
            for v in map.values() {
                collect_dependencies(v, deps);
            }
        }
        _ => {}
    }
}

/// Order `(binding, dependencies)` nodes so that every node comes after the
/// nodes it depends on. Dependencies outside the node set are ignored.
/// Returns indices into `nodes`.
pub fn topological_order(nodes: &[(String, HashSet<String>)]) -> Result<Vec<usize>, String> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();

    fn visit(
        i: usize,
        nodes: &[(String, HashSet<String>)],
        index: &HashMap<&str, usize>,
        visited: &mut HashSet<usize>,
        visiting: &mut Vec<usize>,
        sorted: &mut Vec<usize>,
    ) -> Result<(), String> {
        if visited.contains(&i) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|&v| v == i) {
            let mut cycle: Vec<&str> = visiting[pos..].iter().map(|&v| nodes[v].0.as_str()).collect();
            cycle.push(nodes[i].0.as_str());
            return Err(format!("Circular reference: {}", cycle.join(" -> ")));
        }

        visiting.push(i);
        // Sorted for a stable order between runs
        let mut deps: Vec<&String> = nodes[i].1.iter().collect();
        deps.sort();
        for dep in deps {
            if let Some(&j) = index.get(dep.as_str()) {
                visit(j, nodes, index, visited, visiting, sorted)?;
            }
        }
        visiting.pop();
        visited.insert(i);
        sorted.push(i);
        Ok(())
    }

    let mut sorted = Vec::with_capacity(nodes.len());
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();
    for i in 0..nodes.len() {
        visit(i, nodes, &index, &mut visited, &mut visiting, &mut sorted)?;
    }
    Ok(sorted)
}

/// Sort resources so that referenced bindings come first
pub fn sort_resources_by_dependencies(resources: Vec<Resource>) -> Result<Vec<Resource>, String> {
    let nodes: Vec<(String, HashSet<String>)> = resources
        .iter()
        .map(|r| (r.id.name.clone(), resource_dependencies(r)))
        .collect();
    let order = topological_order(&nodes)?;

    let mut slots: Vec<Option<Resource>> = resources.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Replace references whose target attribute is known; unknown ones stay
/// references and print as "known after apply"
pub fn resolve_ref_value(value: &Value, bindings: &Bindings) -> Value {
    match value {
        Value::ResourceRef(binding, attribute) => {
            match bindings.get(binding).and_then(|attrs| attrs.get(attribute)) {
                Some(target) if target != value => resolve_ref_value(target, bindings),
                _ => value.clone(),
            }
        }
        Value::List(items) => Value::List(items.iter().map(|v| resolve_ref_value(v, bindings)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_ref_value(v, bindings)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

pub fn resolve_resource(resource: &Resource, bindings: &Bindings) -> Resource {
    let mut resolved = resource.clone();
    for value in resolved.attributes.values_mut() {
        *value = resolve_ref_value(value, bindings);
    }
    resolved
}

/// Desired attributes, filled in with what the cloud reported
pub fn bind(
    bindings: &mut Bindings,
    resource: &Resource,
    reported: Option<&HashMap<String, Value>>,
) {
    let mut attrs = resource.attributes.clone();
    if let Some(reported) = reported {
        for (k, v) in reported {
            if !attrs.contains_key(k) || attrs.get(k).is_some_and(Value::contains_unresolved_ref) {
                attrs.insert(k.clone(), v.clone());
            }
        }
    }
    bindings.insert(resource.id.name.clone(), attrs);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(binding: &str, attribute: &str) -> Value {
        Value::ResourceRef(binding.to_string(), attribute.to_string())
    }

    fn resource(kind: &str, name: &str, refs: &[&str]) -> Resource {
        let mut r = Resource::new(kind, name);
        for (i, binding) in refs.iter().enumerate() {
            r.attributes.insert(format!("ref{}", i), reference(binding, "id"));
        }
        r
    }

    #[test]
    fn dependencies_come_first() {
        let resources = vec![
            resource("elb_member", "app1", &["pool"]),
            resource("elb_pool", "pool", &["listener"]),
            resource("elb_listener", "listener", &["lb"]),
            resource("elb_loadbalancer", "lb", &[]),
            resource("elb_certificate", "cert", &[]),
        ];
        let names: Vec<String> = sort_resources_by_dependencies(resources)
            .unwrap()
            .into_iter()
            .map(|r| r.id.name)
            .collect();
        assert_eq!(names, vec!["lb", "listener", "pool", "app1", "cert"]);
    }

    #[test]
    fn cycles_are_reported() {
        let resources = vec![
            resource("elb_pool", "a", &["b"]),
            resource("elb_pool", "b", &["a"]),
        ];
        let err = sort_resources_by_dependencies(resources).unwrap_err();
        assert_eq!(err, "Circular reference: a -> b -> a");
    }

    #[test]
    fn known_references_resolve_and_unknown_ones_stay() {
        let mut bindings = Bindings::new();
        let lb = Resource::new("elb_loadbalancer", "lb")
            .with_attribute("name", Value::String("web".to_string()));
        bind(
            &mut bindings,
            &lb,
            Some(&HashMap::from([("id".to_string(), Value::String("lb-1".to_string()))])),
        );

        let listener = Resource::new("elb_listener", "http")
            .with_attribute("loadbalancer_id", reference("lb", "id"))
            .with_attribute("tags", Value::Map(HashMap::from([("lb".to_string(), reference("lb", "name"))])))
            .with_attribute("default_pool_id", reference("pool", "id"));
        let resolved = resolve_resource(&listener, &bindings);

        assert_eq!(
            resolved.attributes.get("loadbalancer_id"),
            Some(&Value::String("lb-1".to_string()))
        );
        assert_eq!(
            resolved.attributes.get("tags").and_then(Value::as_map).and_then(|m| m.get("lb")),
            Some(&Value::String("web".to_string()))
        );
        assert_eq!(resolved.attributes.get("default_pool_id"), Some(&reference("pool", "id")));
    }
}
