//! Effect - Side effects represented as values
//!
//! An Effect describes one operation against the infrastructure.
//! Nothing happens until an Interpreter executes it.

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Evaluate a data source
    Read { resource: Resource },
    /// Create a new resource
    Create(Resource),
    /// Update a resource in place
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete the existing resource, then create it again
    Replace {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Delete a resource recorded in state
    Delete(State),
}

impl Effect {
    /// Whether this Effect changes infrastructure
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read { .. })
    }

    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Read { resource } => &resource.id,
            Effect::Create(r) => &r.id,
            Effect::Update { id, .. } => id,
            Effect::Replace { to, .. } => &to.id,
            Effect::Delete(state) => &state.id,
        }
    }

    /// Desired resource, for effects that have one
    pub fn target(&self) -> Option<&Resource> {
        match self {
            Effect::Read { resource } => Some(resource),
            Effect::Create(r) => Some(r),
            Effect::Update { to, .. } | Effect::Replace { to, .. } => Some(to),
            Effect::Delete(_) => None,
        }
    }

    /// Single character used when rendering plans
    pub fn symbol(&self) -> &'static str {
        match self {
            Effect::Read { .. } => "<=",
            Effect::Create(_) => "+",
            Effect::Update { .. } => "~",
            Effect::Replace { .. } => "-/+",
            Effect::Delete(_) => "-",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_is_not_mutating() {
        let read = Effect::Read {
            resource: Resource::new("elb_loadbalancers", "all").with_read_only(true),
        };
        assert!(!read.is_mutating());
        assert!(Effect::Create(Resource::new("elb_pool", "web")).is_mutating());
    }

    #[test]
    fn delete_reports_state_id() {
        let state = State::not_found(ResourceId::new("elb_member", "a"));
        let effect = Effect::Delete(state);
        assert_eq!(effect.resource_id(), &ResourceId::new("elb_member", "a"));
        assert!(effect.target().is_none());
    }
}
