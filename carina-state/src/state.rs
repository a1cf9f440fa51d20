//! State file structures for persisting infrastructure state

use std::collections::HashMap;

use carina_core::resource::{ResourceId, State, Value};
use serde::{Deserialize, Serialize};

/// The state file persisted by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Fixed for the lifetime of the state; a write from another lineage is refused
    pub lineage: String,
    /// Version of Carina that last modified this state
    pub carina_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            carina_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Bump the serial and stamp the running Carina version before a write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.carina_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Add a resource, replacing any entry with the same type and name
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove_resource(&mut self, resource_type: &str, name: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.name == name)?;
        Some(self.resources.remove(pos))
    }

    /// Recorded state of `id`, or `State::not_found` when it is not tracked
    pub fn state_of(&self, id: &ResourceId) -> State {
        self.find_resource(&id.resource_type, &id.name)
            .map(ResourceState::to_state)
            .unwrap_or_else(|| State::not_found(id.clone()))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// e.g. "elb_loadbalancer"
    pub resource_type: String,
    /// Binding name from the manifest
    pub name: String,
    pub provider: String,
    /// Cloud-side identifier (`pool_id/member_id` style for child objects)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub attributes: HashMap<String, serde_json::Value>,
    /// Refuse to destroy while set
    #[serde(default)]
    pub protected: bool,
    /// Bindings this resource referenced when it was last applied; destroy
    /// removes dependents first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl ResourceState {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            identifier: None,
            attributes: HashMap::new(),
            protected: false,
            dependencies: Vec::new(),
        }
    }

    /// Record a provider state
    pub fn from_state(state: &State, provider: impl Into<String>) -> Self {
        let mut resource = Self::new(&state.id.resource_type, &state.id.name, provider);
        resource.identifier = state.identifier.clone();
        resource.attributes = state
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        resource
    }

    pub fn to_state(&self) -> State {
        let attributes = self
            .attributes
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect();
        let state = State::existing(self.id(), attributes);
        match &self.identifier {
            Some(identifier) => state.with_identifier(identifier.clone()),
            None => state,
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serial_only_moves_forward() {
        let mut state = StateFile::new();
        assert_eq!(state.serial, 0);
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
        assert!(!state.lineage.is_empty());
    }

    #[test]
    fn upsert_replaces_by_type_and_name() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("elb_pool", "web", "huaweicloud").with_attribute("lb_method", json!("ROUND_ROBIN")),
        );
        state.upsert_resource(
            ResourceState::new("elb_pool", "web", "huaweicloud").with_attribute("lb_method", json!("SOURCE_IP")),
        );
        state.upsert_resource(ResourceState::new("elb_listener", "web", "huaweicloud"));

        assert_eq!(state.resources.len(), 2);
        assert_eq!(
            state.find_resource("elb_pool", "web").unwrap().attributes.get("lb_method"),
            Some(&json!("SOURCE_IP"))
        );
        assert!(state.remove_resource("elb_pool", "web").is_some());
        assert!(state.remove_resource("elb_pool", "web").is_none());
    }

    #[test]
    fn provider_state_survives_the_file() {
        let id = ResourceId::new("elb_member", "app1");
        let state = State::existing(
            id.clone(),
            HashMap::from([
                ("address".to_string(), Value::String("192.168.0.10".to_string())),
                ("weight".to_string(), Value::Int(10)),
            ]),
        )
        .with_identifier("pool-1/member-1");

        let mut file = StateFile::new();
        file.upsert_resource(ResourceState::from_state(&state, "huaweicloud"));
        let text = serde_json::to_string(&file).unwrap();
        let reloaded: StateFile = serde_json::from_str(&text).unwrap();

        assert_eq!(reloaded.state_of(&id), state);
        assert!(!reloaded.state_of(&ResourceId::new("elb_member", "app2")).exists);
    }

    #[test]
    fn older_files_without_new_fields_still_load() {
        let text = r#"{
            "version": 1, "serial": 3, "lineage": "l-1", "carina_version": "0.1.0",
            "resources": [{"resource_type": "elb_pool", "name": "web", "provider": "huaweicloud", "attributes": {}}]
        }"#;
        let file: StateFile = serde_json::from_str(text).unwrap();
        let pool = &file.resources[0];
        assert!(pool.identifier.is_none());
        assert!(pool.dependencies.is_empty());
        assert!(!pool.protected);
    }
}
