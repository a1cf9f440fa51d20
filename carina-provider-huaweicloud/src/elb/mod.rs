//! Dedicated load balancer resources (ELB v3) and the shared ELB whitelist
//!
//! Every mutation below a load balancer locks it into a `PENDING_*` state, so
//! handlers wait for the parent to be `ACTIVE` before and after each call and
//! retry the call while the API reports the load balancer as busy.

pub mod active_standby_pool;
pub mod certificate;
pub mod data_sources;
pub mod l7policy;
pub mod l7rule;
pub mod listener;
pub mod loadbalancer;
pub mod member;
pub mod monitor;
pub mod pool;
pub mod whitelist;

use std::future::Future;
use std::time::Duration;

use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::Value;
use carina_core::wait::{DELETED, retry_while_conflict};
use reqwest::Method;
use serde_json::{Value as JsonValue, json};

use crate::HuaweiCloudProvider;
use crate::client::{ServiceClient, is_conflict, path};
use crate::utils::{json_str, tags_diff};

/// Conflict codes returned while a load balancer is being modified
pub const RETRY_CODES: &[&str] = &["ELB.8902", "ELB.8904", "ELB.8907"];

pub(crate) const SERVICE: &str = "elb";

const STATUS_DELAY: Duration = Duration::from_secs(5);
const STATUS_POLL: Duration = Duration::from_secs(1);
const RETRY_DELAY: Duration = Duration::from_secs(5);

const PENDING: &[&str] = &["PENDING_CREATE", "PENDING_UPDATE", "PENDING_DELETE"];
const PENDING_OR_ACTIVE: &[&str] = &["ACTIVE", "PENDING_CREATE", "PENDING_UPDATE", "PENDING_DELETE"];

pub(crate) fn loadbalancer_path(id: &str) -> String {
    path("v3/{project_id}/elb/loadbalancers/{id}", &[("id", id)])
}

// =============================================================================
// Status Waiters
// =============================================================================

/// Poll `object_path` until the status at `status_key` reaches `target`.
///
/// Objects without a status field (`status_key` of `None`) count as
/// `ACTIVE` while they can be fetched. A 404 counts as `DELETED`.
pub(crate) async fn wait_for_status(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    object_path: &str,
    status_key: Option<&str>,
    target: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    let pending = if target == DELETED {
        PENDING_OR_ACTIVE
    } else {
        PENDING
    };
    let conf = provider.waiter(pending, &[target], timeout, STATUS_DELAY, STATUS_POLL);

    conf.wait_for_state(|| async move {
        match client.get(object_path).await {
            Ok(body) => {
                let status = status_key
                    .and_then(|key| json_str(&body, key))
                    .unwrap_or("ACTIVE")
                    .to_string();
                Ok(Some(((), status)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    })
    .await?;
    Ok(())
}

pub(crate) async fn wait_for_loadbalancer(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    loadbalancer_id: &str,
    target: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    log::debug!("Waiting for load balancer {} to become {}", loadbalancer_id, target);
    wait_for_status(
        provider,
        client,
        &loadbalancer_path(loadbalancer_id),
        Some("loadbalancer.provisioning_status"),
        target,
        timeout,
    )
    .await
    .map_err(|e| {
        ProviderError::new(format!(
            "error waiting for load balancer {} to become {}: {}",
            loadbalancer_id, target, e.message
        ))
        .with_kind(e.kind)
    })
}

/// Run `op` against a child of `loadbalancer_id`, retrying while the load
/// balancer is locked by another operation
pub(crate) async fn retry_while_busy<T, Op, Fut>(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    loadbalancer_id: &str,
    timeout: Duration,
    op: Op,
) -> ProviderResult<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    retry_while_conflict(
        timeout,
        provider.pause(RETRY_DELAY),
        op,
        |e: &ProviderError| is_conflict(e, RETRY_CODES),
        || wait_for_loadbalancer(provider, client, loadbalancer_id, "ACTIVE", timeout),
    )
    .await
}

/// Issue one mutation below `loadbalancer_id`: wait for the load balancer to
/// be `ACTIVE`, send the request (retrying while it is busy), then wait again
pub(crate) async fn locked_call(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    loadbalancer_id: &str,
    timeout: Duration,
    method: Method,
    object_path: &str,
    body: Option<&JsonValue>,
) -> ProviderResult<JsonValue> {
    wait_for_loadbalancer(provider, client, loadbalancer_id, "ACTIVE", timeout).await?;
    let method = &method;
    let response = retry_while_busy(provider, client, loadbalancer_id, timeout, || async move {
        client
            .request(method.clone(), object_path, &[], body)
            .await
            .map_err(ProviderError::from)
    })
    .await?;
    wait_for_loadbalancer(provider, client, loadbalancer_id, "ACTIVE", timeout).await?;
    Ok(response)
}

/// Load balancer that owns a listener
pub(crate) async fn listener_loadbalancer(
    client: &ServiceClient,
    listener_id: &str,
) -> ProviderResult<String> {
    let body = client
        .get(&path("v3/{project_id}/elb/listeners/{id}", &[("id", listener_id)]))
        .await?;
    json_str(&body, "listener.loadbalancers.0.id")
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::new(format!("listener {} is not attached to a load balancer", listener_id))
        })
}

/// Load balancer that owns a pool, directly or through its listener
pub(crate) async fn pool_loadbalancer(
    client: &ServiceClient,
    pool_id: &str,
) -> ProviderResult<String> {
    let body = client
        .get(&path("v3/{project_id}/elb/pools/{id}", &[("id", pool_id)]))
        .await?;
    if let Some(lb_id) = json_str(&body, "pool.loadbalancers.0.id") {
        return Ok(lb_id.to_string());
    }
    match json_str(&body, "pool.listeners.0.id") {
        Some(listener_id) => listener_loadbalancer(client, listener_id).await,
        None => Err(ProviderError::new(format!(
            "pool {} is not attached to a load balancer",
            pool_id
        ))),
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Reconcile tags through `v2.0/{project_id}/{kind}/{id}/tags/action`
pub(crate) async fn update_tags(
    client: &ServiceClient,
    kind: &str,
    id: &str,
    old: Option<&Value>,
    new: Option<&Value>,
) -> ProviderResult<()> {
    let action_path = path(
        "v2.0/{project_id}/{kind}/{id}/tags/action",
        &[("kind", kind), ("id", id)],
    );
    let (remove, add) = tags_diff(old, new);

    if !remove.is_empty() {
        log::debug!("Removing {} tag(s) from {} {}", remove.len(), kind, id);
        client
            .post(&action_path, &json!({"action": "delete", "tags": remove}))
            .await?;
    }
    if !add.is_empty() {
        log::debug!("Adding {} tag(s) to {} {}", add.len(), kind, id);
        client
            .post(&action_path, &json!({"action": "create", "tags": add}))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loadbalancer_paths_are_escaped() {
        assert_eq!(
            loadbalancer_path("lb-1"),
            "v3/{project_id}/elb/loadbalancers/lb-1"
        );
        assert_eq!(
            loadbalancer_path("a/b"),
            "v3/{project_id}/elb/loadbalancers/a%2Fb"
        );
    }

    #[test]
    fn retry_codes_cover_busy_load_balancers() {
        for code in ["ELB.8902", "ELB.8904", "ELB.8907"] {
            assert!(RETRY_CODES.contains(&code));
        }
    }
}
