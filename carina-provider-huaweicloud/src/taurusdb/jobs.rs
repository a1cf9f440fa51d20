//! Asynchronous job tracking
//!
//! Long-running GaussDB operations answer with a `job_id`. The job moves
//! through `Pending` and `Running` to `Completed`; `Failed` (or any other
//! status) ends the wait with an error.

use std::time::Duration;

use carina_core::provider::{ProviderError, ProviderResult};
use serde_json::Value as JsonValue;

use crate::HuaweiCloudProvider;
use crate::client::ServiceClient;
use crate::utils::json_str;

const JOB_DELAY: Duration = Duration::from_secs(10);
const JOB_POLL: Duration = Duration::from_secs(10);

const PENDING: &[&str] = &["Pending", "Running"];
const COMPLETED: &str = "Completed";

/// Poll `v3/{project_id}/jobs?id={job_id}` until the job completes
pub async fn wait_for_job(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    job_id: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    log::debug!("Waiting for job {}", job_id);
    let conf = provider.waiter(PENDING, &[COMPLETED], timeout, JOB_DELAY, JOB_POLL);
    let query = [("id", job_id.to_string())];

    conf.wait_for_state(|| async {
        let body = client.get_with_query("v3/{project_id}/jobs", &query).await?;
        let status = json_str(&body, "job.status").unwrap_or_default().to_string();
        Ok::<_, crate::client::ApiError>(Some(((), status)))
    })
    .await
    .map_err(|e| {
        let err = ProviderError::from(e);
        ProviderError::new(format!("job {} did not complete: {}", job_id, err.message))
            .with_kind(err.kind)
    })?;

    log::debug!("Job {} completed", job_id);
    Ok(())
}

/// Job ids carried by a response. Some operations return several,
/// comma separated, in one `job_id` field.
pub fn job_ids(response: &JsonValue) -> Vec<String> {
    split_job_ids(json_str(response, "job_id").unwrap_or_default())
}

fn split_job_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Wait for every job referenced by `response`, in order
pub async fn wait_for_jobs(
    provider: &HuaweiCloudProvider,
    client: &ServiceClient,
    response: &JsonValue,
    timeout: Duration,
) -> ProviderResult<()> {
    for job_id in job_ids(response) {
        wait_for_job(provider, client, &job_id, timeout).await?;
    }
    Ok(())
}
