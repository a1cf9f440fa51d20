//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type,
//! enabling validation before any API call is issued and
//! telling the differ which changes require replacement.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use crate::resource::{Resource, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Floating point number (integers are accepted)
    Float,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block with named fields
    Object(Vec<AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            // References resolve at apply time, their type is checked then
            (_, Value::ResourceRef(_, _)) => Ok(()),
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Float, Value::Int(_) | Value::Float(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Object(fields), Value::Map(map)) => {
                for field in fields {
                    match map.get(&field.name) {
                        Some(v) => field.attr_type.validate(v).map_err(|e| {
                            TypeError::MapValueError {
                                key: field.name.clone(),
                                inner: Box::new(e),
                            }
                        })?,
                        None if field.required => {
                            return Err(TypeError::MissingRequired {
                                name: field.name.clone(),
                            });
                        }
                        None => {}
                    }
                }
                if let Some(unknown) = map.keys().find(|k| !fields.iter().any(|f| &f.name == *k))
                {
                    return Err(TypeError::UnknownAttribute {
                        name: unknown.clone(),
                    });
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Float => "Float".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Object(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                format!("Object{{{}}}", names.join(", "))
            }
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ReadOnly { name: String },

    #[error("Attribute '{name}' conflicts with '{other}'")]
    Conflict { name: String, other: String },

    #[error("Attribute '{name}' requires '{requires}' to be set")]
    MissingDependency { name: String, requires: String },

    #[error("Exactly one of {} must be set", names.join(", "))]
    ExactlyOneOf { names: Vec<String> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Float(_) => "Float".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::ResourceRef(binding, attr) => format!("ResourceRef({}.{})", binding, attr),
        }
    }
}

/// Returns true when two values should be treated as equal for diffing
pub type SuppressDiffFn = fn(&Value, &Value) -> bool;

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Set by the cloud. Users may only set it when `optional` is also true.
    pub computed: bool,
    pub optional: bool,
    /// Changing the value replaces the resource
    pub force_new: bool,
    /// Never printed in plans or logs
    pub sensitive: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Provider-side property name (e.g., "vip_subnet_cidr_id" for `ipv4_subnet_id`)
    pub provider_name: Option<String>,
    pub conflicts_with: Vec<String>,
    pub required_with: Vec<String>,
    pub deprecated: Option<String>,
    pub suppress_diff: Option<SuppressDiffFn>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            optional: true,
            force_new: false,
            sensitive: false,
            default: None,
            description: None,
            provider_name: None,
            conflicts_with: Vec::new(),
            required_with: Vec::new(),
            deprecated: None,
            suppress_diff: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    /// Read-only attribute reported by the cloud
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self
    }

    /// Optional attribute that the cloud fills in when omitted
    pub fn optional_computed(mut self) -> Self {
        self.computed = true;
        self.optional = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn conflicts_with(mut self, names: &[&str]) -> Self {
        self.conflicts_with = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn required_with(mut self, names: &[&str]) -> Self {
        self.required_with = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    pub fn with_suppress_diff(mut self, f: SuppressDiffFn) -> Self {
        self.suppress_diff = Some(f);
        self
    }

    /// Name used in API payloads
    pub fn api_name(&self) -> &str {
        self.provider_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// Operation timeouts of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10 * 60),
            update: Duration::from_secs(10 * 60),
            delete: Duration::from_secs(10 * 60),
        }
    }
}

impl Timeouts {
    pub fn minutes(create: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }

    /// Apply overrides from the internal `_timeouts` attribute
    /// (e.g. `{"create": "20m", "delete": "90s"}`).
    pub fn resolve(&self, attributes: &HashMap<String, Value>) -> Timeouts {
        let mut resolved = *self;
        let Some(Value::Map(overrides)) = attributes.get("_timeouts") else {
            return resolved;
        };
        let pick = |key: &str, current: Duration| {
            overrides
                .get(key)
                .and_then(Value::as_str)
                .and_then(|s| parse_duration(s).ok())
                .unwrap_or(current)
        };
        resolved.create = pick("create", resolved.create);
        resolved.update = pick("update", resolved.update);
        resolved.delete = pick("delete", resolved.delete);
        resolved
    }
}

/// Parse durations such as `90s`, `10m`, `1h` or `1h30m`
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{}'", input))?;
        digits.clear();
        total += match c {
            'h' => n * 3600,
            'm' => n * 60,
            's' => n,
            _ => return Err(format!("invalid duration unit '{}' in '{}'", c, input)),
        };
    }
    if !digits.is_empty() {
        return Err(format!("missing unit in duration '{}'", input));
    }
    Ok(Duration::from_secs(total))
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    pub timeouts: Timeouts,
    /// Data sources are read on every plan and never mutated
    pub data_source: bool,
    pub exactly_one_of: Vec<Vec<String>>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            timeouts: Timeouts::default(),
            data_source: false,
            exactly_one_of: Vec::new(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn as_data_source(mut self) -> Self {
        self.data_source = true;
        self
    }

    pub fn exactly_one_of(mut self, names: &[&str]) -> Self {
        self.exactly_one_of
            .push(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Names of attributes whose change forces replacement, sorted
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .values()
            .filter(|a| a.force_new)
            .map(|a| a.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Fill in schema defaults for attributes the user did not set
    pub fn apply_defaults(&self, resource: &mut Resource) {
        for attr in self.attributes.values() {
            if let Some(default) = &attr.default {
                resource
                    .attributes
                    .entry(attr.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();
        let mut conflicts = BTreeSet::new();
        let is_set = |name: &str| attributes.contains_key(name);

        for (name, schema) in &self.attributes {
            if schema.required && !is_set(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
            if !is_set(name) {
                continue;
            }
            if schema.is_read_only() {
                errors.push(TypeError::ReadOnly { name: name.clone() });
            }
            for other in &schema.conflicts_with {
                if is_set(other) {
                    let pair = if name < other {
                        (name.clone(), other.clone())
                    } else {
                        (other.clone(), name.clone())
                    };
                    conflicts.insert(pair);
                }
            }
            for requires in &schema.required_with {
                if !is_set(requires) {
                    errors.push(TypeError::MissingDependency {
                        name: name.clone(),
                        requires: requires.clone(),
                    });
                }
            }
        }

        // Each conflicting pair is reported once
        for (name, other) in conflicts {
            errors.push(TypeError::Conflict { name, other });
        }

        for group in &self.exactly_one_of {
            let count = group.iter().filter(|n| is_set(n)).count();
            if count != 1 {
                errors.push(TypeError::ExactlyOneOf {
                    names: group.clone(),
                });
            }
        }

        // Type check each attribute
        for (name, value) in attributes {
            if name.starts_with('_') {
                continue;
            }
            match self.attributes.get(name) {
                Some(schema) => {
                    if let Err(e) = schema.attr_type.validate(value) {
                        errors.push(TypeError::MapValueError {
                            key: name.clone(),
                            inner: Box::new(e),
                        });
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value.as_int() {
                Some(n) if n > 0 => Ok(()),
                Some(_) => Err("Value must be positive".to_string()),
                None => Err("Expected integer".to_string()),
            },
        }
    }

    /// TCP/UDP port (1-65535)
    pub fn port_number() -> AttributeType {
        AttributeType::Custom {
            name: "Port".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value.as_int() {
                Some(n) if (1..=65535).contains(&n) => Ok(()),
                Some(n) => Err(format!("Port {} is out of range 1-65535", n)),
                None => Err("Expected integer".to_string()),
            },
        }
    }

    /// Backend weight (0-100)
    pub fn weight() -> AttributeType {
        AttributeType::Custom {
            name: "Weight".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value.as_int() {
                Some(n) if (0..=100).contains(&n) => Ok(()),
                Some(n) => Err(format!("Weight {} is out of range 0-100", n)),
                None => Err("Expected integer".to_string()),
            },
        }
    }

    /// CIDR block type (e.g., "10.0.0.0/16")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value.as_str() {
                Some(s) => validate_cidr(s),
                None => Err("Expected string".to_string()),
            },
        }
    }

    /// Dotted IPv4 address
    pub fn ipv4_address() -> AttributeType {
        AttributeType::Custom {
            name: "Ipv4Address".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value.as_str() {
                Some(s) => validate_ipv4(s),
                None => Err("Expected string".to_string()),
            },
        }
    }

    /// Comma separated list of IPv4 addresses or CIDR blocks
    pub fn comma_separated_ipv4() -> AttributeType {
        AttributeType::Custom {
            name: "Ipv4List".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                let Some(s) = value.as_str() else {
                    return Err("Expected string".to_string());
                };
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .try_for_each(|item| {
                        if item.contains('/') {
                            validate_cidr(item)
                        } else {
                            validate_ipv4(item)
                        }
                    })
            },
        }
    }

    /// GaussDB instance name: 4-64 characters, starting with a letter,
    /// containing only letters, digits, hyphens and underscores
    pub fn gaussdb_instance_name() -> AttributeType {
        AttributeType::Custom {
            name: "InstanceName".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                let Some(s) = value.as_str() else {
                    return Err("Expected string".to_string());
                };
                let len = s.chars().count();
                if !(4..=64).contains(&len) {
                    return Err(format!("Name '{}' must be 4 to 64 characters long", s));
                }
                if !s.starts_with(|c: char| c.is_ascii_alphabetic()) {
                    return Err(format!("Name '{}' must start with a letter", s));
                }
                if let Some(c) = s
                    .chars()
                    .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
                {
                    return Err(format!("Name '{}' contains invalid character '{}'", s, c));
                }
                Ok(())
            },
        }
    }
}

/// Diff suppressors shared by provider schemas
pub mod suppress {
    use super::*;

    /// Comma separated sets compare without regard to order or spacing
    pub fn comma_set(old: &Value, new: &Value) -> bool {
        match (old.as_str(), new.as_str()) {
            (Some(a), Some(b)) => {
                let split = |s: &str| {
                    let mut items: Vec<String> = s
                        .split(',')
                        .map(|i| i.trim().to_string())
                        .filter(|i| !i.is_empty())
                        .collect();
                    items.sort();
                    items
                };
                split(a) == split(b)
            }
            _ => false,
        }
    }

    pub fn case_insensitive(old: &Value, new: &Value) -> bool {
        match (old.as_str(), new.as_str()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    pub fn trim_space(old: &Value, new: &Value) -> bool {
        match (old.as_str(), new.as_str()) {
            (Some(a), Some(b)) => a.trim() == b.trim(),
            _ => false,
        }
    }

    /// The cloud reports a superset of what was declared: every declared
    /// map entry or list item must be present with the same value
    pub fn subset(old: &Value, new: &Value) -> bool {
        match (old, new) {
            (Value::Map(current), Value::Map(declared)) => declared
                .iter()
                .all(|(k, v)| current.get(k) == Some(v)),
            (Value::List(current), Value::List(declared)) => {
                declared.iter().all(|item| current.contains(item))
            }
            _ => false,
        }
    }
}

/// Validate dotted IPv4 address format (e.g., "192.168.0.10")
pub fn validate_ipv4(ip: &str) -> Result<(), String> {
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(format!("Invalid IP address '{}': expected 4 octets", ip));
    }
    for octet in &octets {
        if octet.parse::<u8>().is_err() {
            return Err(format!(
                "Invalid octet '{}' in IP address: must be 0-255",
                octet
            ));
        }
    }
    Ok(())
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let Some((ip, prefix)) = cidr.split_once('/') else {
        return Err(format!(
            "Invalid CIDR format '{}': expected IP/prefix",
            cidr
        ));
    };

    validate_ipv4(ip)?;

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}
