//! Carina HuaweiCloud Provider
//!
//! Dedicated ELB and GaussDB(for MySQL) resources over the HuaweiCloud REST
//! APIs, signed with AK/SK.
//!
//! ## Module Structure
//!
//! - `config` - Provider settings and endpoint resolution
//! - `signer` - SDK-HMAC-SHA256 request signing
//! - `client` - Per-service REST client and API errors
//! - `provider` - HuaweiCloudProvider (project resolution, waiters)
//! - `resources` - Handler traits and the resource type registry
//! - `elb` - Load balancer resources and data sources
//! - `taurusdb` - GaussDB(for MySQL) resources and data sources
//! - `utils` - Payload mapping, tags and identifier helpers

pub mod client;
pub mod config;
pub mod elb;
pub mod provider;
pub mod resources;
pub mod signer;
pub mod taurusdb;
pub mod utils;

pub use config::{ConfigError, ProviderConfig};
pub use provider::HuaweiCloudProvider;

use carina_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult, ResourceType};
use carina_core::resource::{Resource, ResourceId, State};

use resources::{data_source_handler, resource_handler};

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::validation(format!("Unknown resource type: {}", id.resource_type))
        .for_resource(id.clone())
}

/// Keep arguments the API never echoes back (passwords, keys, timeouts)
fn with_desired(mut state: State, desired: &Resource) -> State {
    state.merge_missing(&State::existing(
        desired.id.clone(),
        desired.attributes.clone(),
    ));
    state
}

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for HuaweiCloudProvider {
    fn name(&self) -> &'static str {
        "huaweicloud"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resources::resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move {
            let handler = resource_handler(&id.resource_type).ok_or_else(|| unknown_type(&id))?;
            let Some(identifier) = identifier else {
                return Ok(State::not_found(id));
            };
            match handler.read(self, &id, &identifier).await {
                Ok(state) => Ok(state),
                Err(e) if e.is_not_found() => {
                    log::info!("{} ({}) no longer exists, removing from state", id, identifier);
                    Ok(State::not_found(id))
                }
                Err(e) => Err(e.for_resource(id)),
            }
        })
    }

    fn read_data_source(&self, query: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let query = query.clone();
        Box::pin(async move {
            let handler =
                data_source_handler(&query.id.resource_type).ok_or_else(|| unknown_type(&query.id))?;
            handler
                .read(self, &query)
                .await
                .map_err(|e| e.for_resource(query.id.clone()))
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let handler = resource_handler(&resource.id.resource_type)
                .ok_or_else(|| unknown_type(&resource.id))?;
            log::info!("Creating {}", resource.id);
            let state = handler
                .create(self, &resource)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
            Ok(with_desired(state, &resource))
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move {
            let handler = resource_handler(&id.resource_type).ok_or_else(|| unknown_type(&id))?;
            log::info!("Updating {} ({})", id, identifier);
            let state = handler
                .update(self, &identifier, &from, &to)
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
            Ok(with_desired(state, &to))
        })
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        let state = state.clone();
        Box::pin(async move {
            let handler = resource_handler(&state.id.resource_type)
                .ok_or_else(|| unknown_type(&state.id))?;
            let Some(identifier) = state.identifier.clone() else {
                log::warn!("{} has no identifier, nothing to delete", state.id);
                return Ok(());
            };
            log::info!("Deleting {} ({})", state.id, identifier);
            match handler.delete(self, &identifier, &state).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.for_resource(state.id.clone())),
            }
        })
    }
}
