//! GaussDB(for MySQL) resources and data sources
//!
//! Instances run one operation at a time. A second mutation while one is in
//! flight fails with 409 and one of [`RETRY_CODES`]; such calls are retried
//! once the instance is `ACTIVE` again. Most mutations answer with a
//! `job_id` that is then followed through [`jobs::wait_for_job`].

pub mod account;
pub mod account_privilege;
pub mod backup;
pub mod data_sources;
pub mod database;
pub mod instance;
pub mod jobs;
pub mod parameter_template;
pub mod proxy;

use std::future::Future;
use std::time::Duration;

use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::wait::{DELETED, retry_while_conflict};
use reqwest::Method;
use serde_json::Value as JsonValue;

use crate::HuaweiCloudProvider;
use crate::client::{ApiError, ServiceClient, is_conflict, path};
use crate::utils::json_str;

/// Codes returned while another operation holds the instance
pub const RETRY_CODES: &[&str] = &[
    "DBS.200019",
    "DBS.200047",
    "DBS.201014",
    "DBS.200611",
    "DBS.212033",
];

pub(crate) const SERVICE: &str = "gaussdb";

const RETRY_DELAY: Duration = Duration::from_secs(10);
const READY_POLL: Duration = Duration::from_secs(10);

/// Stand-in for every transitional instance status while waiting for ACTIVE
const BUSY: &str = "BUSY";

pub(crate) fn instance_path(id: &str) -> String {
    path("v3/{project_id}/instances/{id}", &[("id", id)])
}

/// Whether the error is a concurrent-operation conflict worth retrying
pub fn is_multi_operation_conflict(err: &ProviderError) -> bool {
    is_conflict(err, RETRY_CODES)
}

/// Current status of an instance. A 404 or an empty body counts as
/// [`DELETED`].
pub(crate) async fn instance_state_refresh(
    client: &ServiceClient,
    instance_id: &str,
) -> Result<Option<((), String)>, ApiError> {
    match client.get(&instance_path(instance_id)).await {
        Ok(body) => {
            let status = match json_str(&body, "instance.id") {
                Some(id) if !id.is_empty() => json_str(&body, "instance.status")
                    .unwrap_or_default()
                    .to_string(),
                _ => DELETED.to_string(),
            };
            Ok(Some(((), status)))
        }
        Err(e) if e.is_not_found() => Ok(Some(((), DELETED.to_string()))),
        Err(e) => Err(e),
    }
}

/// Poll the instance through `pending` until one of `target`
#[allow(clippy::too_many_arguments)]
pub(crate) async fn wait_for_instance(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    instance_id: &str,
    pending: &[&str],
    target: &[&str],
    timeout: Duration,
    delay: Duration,
    poll: Duration,
) -> ProviderResult<()> {
    log::debug!("Waiting for instance {} to become {:?}", instance_id, target);
    let conf = provider.waiter(pending, target, timeout, delay, poll);
    conf.wait_for_state(|| instance_state_refresh(client, instance_id))
        .await
        .map_err(|e| {
            let err = ProviderError::from(e);
            ProviderError::new(format!(
                "error waiting for instance {} to become {:?}: {}",
                instance_id, target, err.message
            ))
            .with_kind(err.kind)
        })?;
    Ok(())
}

/// Wait until no other operation holds the instance
pub(crate) async fn wait_for_instance_active(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    instance_id: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    let conf = provider.waiter(&[BUSY], &["ACTIVE"], timeout, RETRY_DELAY, READY_POLL);
    conf.wait_for_state(|| async move {
        let refreshed = instance_state_refresh(client, instance_id).await?;
        Ok::<_, ApiError>(refreshed.map(|(v, status)| match status.as_str() {
            "ACTIVE" | "FAILED" | DELETED => (v, status),
            _ => (v, BUSY.to_string()),
        }))
    })
    .await?;
    Ok(())
}

/// Run a mutating call against `instance_id`, retrying while the instance
/// is busy with another operation
pub(crate) async fn retry_on_conflict<T, Op, Fut>(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    instance_id: &str,
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
        is_multi_operation_conflict,
        || wait_for_instance_active(provider, client, instance_id, timeout),
    )
    .await
}

/// Send one mutating request for `instance_id` through [`retry_on_conflict`]
pub(crate) async fn instance_call(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    instance_id: &str,
    timeout: Duration,
    method: Method,
    request_path: &str,
    body: Option<&JsonValue>,
) -> ProviderResult<JsonValue> {
    let method = &method;
    retry_on_conflict(provider, client, instance_id, timeout, || async move {
        client
            .request(method.clone(), request_path, &[], body)
            .await
            .map_err(ProviderError::from)
    })
    .await
}
