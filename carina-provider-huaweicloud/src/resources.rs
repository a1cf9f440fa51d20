//! Resource type registry
//!
//! Every resource and data source is a unit struct implementing
//! [`ResourceHandler`] or [`DataSourceHandler`]. The registry below maps
//! type names to handlers and exposes them as [`ResourceType`]s.

use async_trait::async_trait;
use carina_core::provider::{ProviderResult, ResourceType};
use carina_core::resource::{Resource, ResourceId, State};
use carina_core::schema::ResourceSchema;

use crate::HuaweiCloudProvider;
use crate::{elb, taurusdb};

/// CRUD glue for one resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    /// Create the object and return its refreshed state
    async fn create(&self, provider: &HuaweiCloudProvider, resource: &Resource)
    -> ProviderResult<State>;

    /// Fetch the object. A `NotFound` error drops it from state.
    async fn read(
        &self,
        provider: &HuaweiCloudProvider,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State>;

    async fn update(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State>;

    /// Remove the object. A `NotFound` error counts as success.
    async fn delete(
        &self,
        provider: &HuaweiCloudProvider,
        identifier: &str,
        state: &State,
    ) -> ProviderResult<()>;
}

/// Read-only query over a list API
#[async_trait]
pub trait DataSourceHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    async fn read(&self, provider: &HuaweiCloudProvider, query: &Resource) -> ProviderResult<State>;
}

// =============================================================================
// Registry
// =============================================================================

static RESOURCES: &[&dyn ResourceHandler] = &[
    &elb::loadbalancer::LoadBalancer,
    &elb::listener::Listener,
    &elb::pool::Pool,
    &elb::active_standby_pool::ActiveStandbyPool,
    &elb::member::Member,
    &elb::monitor::Monitor,
    &elb::l7policy::L7Policy,
    &elb::l7rule::L7Rule,
    &elb::certificate::Certificate,
    &elb::whitelist::Whitelist,
    &taurusdb::instance::Instance,
    &taurusdb::database::Database,
    &taurusdb::account::Account,
    &taurusdb::account_privilege::AccountPrivilege,
    &taurusdb::backup::Backup,
    &taurusdb::proxy::Proxy,
    &taurusdb::parameter_template::ParameterTemplate,
];

static DATA_SOURCES: &[&dyn DataSourceHandler] = &[
    &elb::data_sources::LoadBalancers,
    &elb::data_sources::Listeners,
    &elb::data_sources::Pools,
    &elb::data_sources::L7Policies,
    &taurusdb::data_sources::Instances,
    &taurusdb::data_sources::Configurations,
];

pub fn resource_handler(name: &str) -> Option<&'static dyn ResourceHandler> {
    RESOURCES.iter().copied().find(|h| h.name() == name)
}

pub fn data_source_handler(name: &str) -> Option<&'static dyn DataSourceHandler> {
    DATA_SOURCES.iter().copied().find(|h| h.name() == name)
}

struct RegisteredResource(&'static dyn ResourceHandler);

impl ResourceType for RegisteredResource {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }
}

struct RegisteredDataSource(&'static dyn DataSourceHandler);

impl ResourceType for RegisteredDataSource {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema().as_data_source()
    }
}

/// Returns all resource types and data sources supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    let resources = RESOURCES
        .iter()
        .map(|h| Box::new(RegisteredResource(*h)) as Box<dyn ResourceType>);
    let data_sources = DATA_SOURCES
        .iter()
        .map(|h| Box::new(RegisteredDataSource(*h)) as Box<dyn ResourceType>);
    resources.chain(data_sources).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_unique_and_match_schemas() {
        let types = resource_types();
        let names: HashSet<&str> = types.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), types.len());

        for t in &types {
            assert_eq!(t.schema().resource_type, t.name());
        }
    }

    #[test]
    fn lookups() {
        assert!(resource_handler("elb_loadbalancer").is_some());
        assert!(resource_handler("elb_loadbalancers").is_none());
        assert!(data_source_handler("gaussdb_mysql_instances").is_some());
    }

    #[test]
    fn data_sources_are_flagged() {
        for t in resource_types() {
            let schema = t.schema();
            assert_eq!(
                schema.data_source,
                data_source_handler(t.name()).is_some(),
                "{}",
                t.name()
            );
        }
    }

    #[test]
    fn every_schema_has_an_id() {
        for t in resource_types() {
            let schema = t.schema();
            let id = schema.get("id");
            assert!(
                id.is_some_and(|a| a.is_read_only()),
                "{} has no read-only id",
                t.name()
            );
        }
    }
}
