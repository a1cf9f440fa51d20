//! Terminal rendering of plans, values and schemas

use std::collections::HashMap;
use std::time::Duration;

use colored::Colorize;

use carina_core::effect::Effect;
use carina_core::plan::Plan;
use carina_core::resource::Value;
use carina_core::schema::{AttributeSchema, ResourceSchema};

pub fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.mutation_count() == 0 {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let schema = schemas.get(&effect.resource_id().resource_type);
        println!("  {}", format_effect(effect));
        for line in effect_details(effect, schema) {
            println!("        {}", line);
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

pub fn format_effect(effect: &Effect) -> String {
    let symbol = effect.symbol();
    let symbol = match effect {
        Effect::Read { .. } => symbol.cyan(),
        Effect::Create(_) => symbol.green(),
        Effect::Update { .. } => symbol.yellow(),
        Effect::Replace { .. } => symbol.magenta(),
        Effect::Delete(_) => symbol.red(),
    };
    format!("{} {}", symbol.bold(), effect.resource_id())
}

/// Attribute lines shown under an effect
fn effect_details(effect: &Effect, schema: Option<&ResourceSchema>) -> Vec<String> {
    let attr = |name: &str| schema.and_then(|s| s.get(name));
    match effect {
        Effect::Create(resource) => {
            let mut attrs: Vec<_> = resource.user_attributes().collect();
            attrs.sort_by(|a, b| a.0.cmp(b.0));
            attrs
                .into_iter()
                .map(|(name, value)| format!("{} = {}", name, display_value(value, attr(name))))
                .collect()
        }
        Effect::Update {
            from,
            to,
            changed_attributes,
            ..
        }
        | Effect::Replace {
            from,
            to,
            changed_attributes,
        } => changed_attributes
            .iter()
            .map(|name| {
                let schema = attr(name);
                let old = from
                    .attributes
                    .get(name)
                    .map(|v| display_value(v, schema))
                    .unwrap_or_else(|| "(unset)".to_string());
                let new = to
                    .attributes
                    .get(name)
                    .map(|v| display_value(v, schema))
                    .unwrap_or_else(|| "(unset)".to_string());
                let line = format!("{}: {} => {}", name, old, new);
                if matches!(effect, Effect::Replace { .. }) && schema.is_some_and(|a| a.force_new) {
                    format!("{} {}", line, "(forces replacement)".red())
                } else {
                    line
                }
            })
            .collect(),
        Effect::Read { .. } | Effect::Delete(_) => Vec::new(),
    }
}

fn display_value(value: &Value, schema: Option<&AttributeSchema>) -> String {
    if schema.is_some_and(|a| a.sensitive) {
        "(sensitive)".dimmed().to_string()
    } else {
        format_value(value)
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let entries: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Value::ResourceRef(binding, attribute) => {
            format!("(known after apply: {}.{})", binding, attribute)
        }
    }
}

// =============================================================================
// Schemas
// =============================================================================

pub fn print_schema_list(schemas: &[ResourceSchema]) {
    let width = schemas.iter().map(|s| s.resource_type.len()).max().unwrap_or(0);
    for kind in [false, true] {
        let title = if kind { "Data sources:" } else { "Resources:" };
        println!("{}", title.cyan().bold());
        for schema in schemas.iter().filter(|s| s.data_source == kind) {
            println!(
                "  {:width$}  {}",
                schema.resource_type,
                schema.description.as_deref().unwrap_or(""),
                width = width
            );
        }
        println!();
    }
}

pub fn print_schema(schema: &ResourceSchema) {
    let kind = if schema.data_source { "data source" } else { "resource" };
    println!("{} ({})", schema.resource_type.bold(), kind);
    if let Some(description) = &schema.description {
        println!("  {}", description);
    }
    if !schema.data_source {
        let t = &schema.timeouts;
        println!(
            "  Timeouts: create {}, update {}, delete {}",
            format_duration(t.create),
            format_duration(t.update),
            format_duration(t.delete)
        );
    }
    println!();

    let mut attrs: Vec<&AttributeSchema> = schema.attributes.values().collect();
    attrs.sort_by(|a, b| a.name.cmp(&b.name));
    for attr in attrs {
        println!("  {} {} {}", attr.name.bold(), attr.attr_type.to_string().dimmed(), attribute_flags(attr));
        if let Some(description) = &attr.description {
            println!("      {}", description);
        }
    }
}

fn attribute_flags(attr: &AttributeSchema) -> String {
    let mut flags = Vec::new();
    if attr.required {
        flags.push("required".to_string());
    } else if attr.is_read_only() {
        flags.push("computed".to_string());
    } else {
        flags.push("optional".to_string());
    }
    if attr.force_new {
        flags.push("force new".to_string());
    }
    if attr.sensitive {
        flags.push("sensitive".to_string());
    }
    if let Some(default) = &attr.default {
        flags.push(format!("default {}", format_value(default)));
    }
    if let Some(message) = &attr.deprecated {
        flags.push(format!("deprecated: {}", message));
    }
    format!("[{}]", flags.join(", "))
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carina_core::schema::AttributeType;

    #[test]
    fn values_render_with_sorted_maps_and_pending_references() {
        let value = Value::Map(HashMap::from([
            ("weight".to_string(), Value::Int(10)),
            ("address".to_string(), Value::String("10.0.0.5".to_string())),
            (
                "pool_id".to_string(),
                Value::ResourceRef("pool".to_string(), "id".to_string()),
            ),
        ]));
        assert_eq!(
            format_value(&value),
            r#"{address: "10.0.0.5", pool_id: (known after apply: pool.id), weight: 10}"#
        );
        assert_eq!(
            format_value(&Value::List(vec![Value::Bool(true), Value::Float(1.5)])),
            "[true, 1.5]"
        );
    }

    #[test]
    fn flags_describe_the_attribute() {
        let attr = AttributeSchema::new("protocol", AttributeType::String)
            .required()
            .force_new();
        assert_eq!(attribute_flags(&attr), "[required, force new]");

        let attr = AttributeSchema::new("host", AttributeType::String)
            .with_default(Value::String("%".to_string()));
        assert_eq!(attribute_flags(&attr), r#"[optional, default "%"]"#);
    }

    #[test]
    fn durations_prefer_minutes() {
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
    }
}
