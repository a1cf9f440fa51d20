//! REST client for HuaweiCloud service endpoints
//!
//! A [`ServiceClient`] is bound to one service (elb, gaussdb, vpc, iam) and one
//! project. Paths are written relative to the service root, e.g.
//! `v3/{project_id}/elb/loadbalancers/{id}`; `{project_id}` is filled in here,
//! other placeholders through [`path`].

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use carina_core::provider::{ErrorKind, ProviderError};
use regex::Regex;
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;
use url::Url;

use crate::signer::{self, Credentials};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{method} {url} returned {status}: {}", display_code(code, message, body))]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        body: String,
    },

    #[error("invalid request path '{0}'")]
    Path(String),

    #[error("failed to sign request: {0}")]
    Signing(#[from] hmac::digest::InvalidLength),
}

fn display_code(code: &Option<String>, message: &Option<String>, body: &str) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!("[{}] {}", code, message),
        (Some(code), None) => format!("[{}]", code),
        (None, Some(message)) => message.clone(),
        (None, None) => body.to_string(),
    }
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Service error code such as `DBS.200047`
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// 409 carrying one of the given error codes
    pub fn is_conflict_with(&self, codes: &[&str]) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
            && self.code().is_some_and(|code| codes.contains(&code))
    }

    /// Status and error code both match
    pub fn matches(&self, status: StatusCode, code: &str) -> bool {
        self.status() == Some(status) && self.code() == Some(code)
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let kind = match err.status() {
            Some(StatusCode::NOT_FOUND) => ErrorKind::NotFound,
            Some(StatusCode::CONFLICT) => ErrorKind::Conflict,
            Some(StatusCode::BAD_REQUEST) => ErrorKind::Validation,
            _ => ErrorKind::Other,
        };
        ProviderError::new(err.to_string())
            .with_kind(kind)
            .with_cause(err)
    }
}

/// The API failure behind a provider error, if any
pub fn api_error(err: &ProviderError) -> Option<&ApiError> {
    err.cause.as_deref()?.downcast_ref::<ApiError>()
}

/// 409 with one of `codes`, for errors already converted at the provider boundary
pub fn is_conflict(err: &ProviderError, codes: &[&str]) -> bool {
    api_error(err).is_some_and(|e| e.is_conflict_with(codes))
}

/// Pull `(code, message)` out of the error body shapes used across services
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<JsonValue>(body) else {
        return (None, None);
    };
    let text = |v: Option<&JsonValue>| v.and_then(JsonValue::as_str).map(str::to_string);

    if json.get("error_code").is_some() {
        return (text(json.get("error_code")), text(json.get("error_msg")));
    }
    if let Some(inner) = json.get("error").filter(|e| e.is_object()) {
        return (text(inner.get("code")), text(inner.get("message")));
    }
    (text(json.get("code")), text(json.get("message")))
}

/// Fill `{name}` placeholders, escaping each value as one path segment
pub fn path(template: &str, params: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match params.iter().find(|(k, _)| *k == name) {
                Some((_, value)) => urlencoding::encode(value).into_owned(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

const SENSITIVE_KEYS: &[&str] = &["password", "private_key", "secret"];

/// Copy of a request body safe to write to the log
fn masked(body: &JsonValue) -> JsonValue {
    match body {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| {
                    if SENSITIVE_KEYS.iter().any(|s| k.contains(s)) {
                        (k.clone(), JsonValue::String("***".to_string()))
                    } else {
                        (k.clone(), masked(v))
                    }
                })
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(masked).collect()),
        other => other.clone(),
    }
}

/// How a list API pages its results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// `offset` counts records
    Records,
    /// `offset` counts pages of `limit` records
    Pages,
}

#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base: Url,
    project_id: String,
    credentials: Arc<Credentials>,
    max_retries: u32,
    poll_scale: f64,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base", &self.base.as_str())
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    pub fn new(
        http: reqwest::Client,
        base: Url,
        project_id: impl Into<String>,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            http,
            base,
            project_id: project_id.into(),
            credentials,
            max_retries: 5,
            poll_scale: 1.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_scale(mut self, poll_scale: f64) -> Self {
        self.poll_scale = poll_scale.max(0.0);
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let filled = path.replace("{project_id}", &self.project_id);
        if PLACEHOLDER.is_match(&filled) {
            return Err(ApiError::Path(filled));
        }
        self.base
            .join(filled.trim_start_matches('/'))
            .map_err(|_| ApiError::Path(filled))
    }

    pub async fn get(&self, path: &str) -> Result<JsonValue, ApiError> {
        self.request(Method::GET, path, &[], None).await
    }

    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, ApiError> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &JsonValue) -> Result<JsonValue, ApiError> {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &JsonValue) -> Result<JsonValue, ApiError> {
        self.request(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<JsonValue, ApiError> {
        self.request(Method::DELETE, path, &[], None).await
    }

    pub async fn delete_with_body(
        &self,
        path: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, ApiError> {
        self.request(Method::DELETE, path, &[], Some(body)).await
    }

    /// Follow `page_info.next_marker` until the listing is exhausted
    pub async fn list_all_marker(
        &self,
        path: &str,
        query: &[(&str, String)],
        list_key: &str,
    ) -> Result<Vec<JsonValue>, ApiError> {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut params = query.to_vec();
            if let Some(m) = &marker {
                params.push(("marker", m.clone()));
            }
            let page = self.get_with_query(path, &params).await?;
            let batch = page
                .get(list_key)
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            if batch.is_empty() {
                break;
            }
            items.extend(batch);

            marker = page
                .pointer("/page_info/next_marker")
                .and_then(JsonValue::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        Ok(items)
    }

    /// Page through an `offset`/`limit` listing until a short page is returned
    pub async fn list_all_offset(
        &self,
        path: &str,
        query: &[(&str, String)],
        list_key: &str,
        limit: usize,
        offset: Offset,
    ) -> Result<Vec<JsonValue>, ApiError> {
        let mut items = Vec::new();
        let mut page_number = 0usize;

        loop {
            let position = match offset {
                Offset::Records => items.len(),
                Offset::Pages => page_number,
            };
            let mut params = query.to_vec();
            params.push(("offset", position.to_string()));
            params.push(("limit", limit.to_string()));

            let page = self.get_with_query(path, &params).await?;
            let batch = page
                .get(list_key)
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            let count = batch.len();
            items.extend(batch);
            page_number += 1;

            let total = page
                .get("total_count")
                .and_then(JsonValue::as_u64)
                .map(|t| t as usize);
            if count < limit || total.is_some_and(|t| items.len() >= t) {
                break;
            }
        }

        Ok(items)
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, ApiError> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        if let Some(json) = body
            && log::log_enabled!(log::Level::Trace)
        {
            log::trace!("{} {} body: {}", method, url, masked(json));
        }
        let payload = match body {
            Some(json) => serde_json::to_vec(json).map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            })?,
            None => Vec::new(),
        };

        let mut attempt = 0u32;
        let mut backoff = RATE_LIMIT_BACKOFF.mul_f64(self.poll_scale);
        loop {
            attempt += 1;
            let (status, text) = self.send(&method, &url, &payload).await?;

            if status == StatusCode::TOO_MANY_REQUESTS && attempt <= self.max_retries {
                log::debug!(
                    "{} {} throttled, retrying in {:?} (attempt {})",
                    method,
                    url,
                    backoff,
                    attempt
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            if !status.is_success() {
                let (code, message) = parse_error_body(&text);
                return Err(ApiError::Status {
                    method,
                    url: url.to_string(),
                    status,
                    code,
                    message,
                    body: text,
                });
            }

            if text.trim().is_empty() {
                return Ok(JsonValue::Null);
            }
            return serde_json::from_str(&text).map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            });
        }
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        payload: &[u8],
    ) -> Result<(StatusCode, String), ApiError> {
        let transport = |source| ApiError::Transport {
            url: url.to_string(),
            source,
        };

        let mut headers = vec![("Content-Type", "application/json")];
        if !self.project_id.is_empty() {
            headers.push((signer::HEADER_PROJECT_ID, self.project_id.as_str()));
        }
        let signed = signer::sign(
            &self.credentials,
            method.as_str(),
            url,
            &headers,
            payload,
            chrono::Utc::now(),
        )?;

        let mut request = self.http.request(method.clone(), url.clone());
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !payload.is_empty() {
            request = request.body(payload.to_vec());
        }

        log::debug!("{} {}", method, url);
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        log::trace!("{} {} -> {}", method, url, status);
        Ok((status, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ServiceClient {
        ServiceClient::new(
            reqwest::Client::new(),
            Url::parse("https://gaussdb.cn-north-4.myhuaweicloud.com/").unwrap(),
            "0123",
            Arc::new(Credentials {
                access_key: "AK".to_string(),
                secret_key: "SK".to_string(),
                security_token: None,
            }),
        )
    }

    fn status_error(status: StatusCode, body: &str) -> ApiError {
        let (code, message) = parse_error_body(body);
        ApiError::Status {
            method: Method::POST,
            url: "https://example.com".to_string(),
            status,
            code,
            message,
            body: body.to_string(),
        }
    }

    #[test]
    fn placeholders_are_filled_and_escaped() {
        assert_eq!(
            path(
                "v3/{project_id}/instances/{instance_id}/databases/{name}",
                &[("instance_id", "abc"), ("name", "db 1")]
            ),
            "v3/{project_id}/instances/abc/databases/db%201"
        );
    }

    #[test]
    fn url_substitutes_project_and_rejects_leftovers() {
        let c = client();
        assert_eq!(
            c.url("v3/{project_id}/instances").unwrap().as_str(),
            "https://gaussdb.cn-north-4.myhuaweicloud.com/v3/0123/instances"
        );
        assert!(matches!(
            c.url("v3/{project_id}/instances/{instance_id}"),
            Err(ApiError::Path(_))
        ));
    }

    #[test]
    fn error_bodies_are_parsed() {
        assert_eq!(
            parse_error_body(r#"{"error_code":"DBS.200047","error_msg":"busy"}"#),
            (Some("DBS.200047".to_string()), Some("busy".to_string()))
        );
        assert_eq!(
            parse_error_body(r#"{"error":{"code":"ELB.8904","message":"immutable"},"request_id":"x"}"#),
            (Some("ELB.8904".to_string()), Some("immutable".to_string()))
        );
        assert_eq!(
            parse_error_body(r#"{"code":"APIGW.0101","message":"not found"}"#),
            (Some("APIGW.0101".to_string()), Some("not found".to_string()))
        );
        assert_eq!(parse_error_body("<html>"), (None, None));
    }

    #[test]
    fn conflict_classification() {
        let err = status_error(
            StatusCode::CONFLICT,
            r#"{"error_code":"DBS.201014","error_msg":"operation in progress"}"#,
        );
        assert!(err.is_conflict_with(&["DBS.200047", "DBS.201014"]));
        assert!(!err.is_conflict_with(&["DBS.200019"]));
        assert!(err.to_string().contains("[DBS.201014] operation in progress"));

        let provider_err: ProviderError = err.into();
        assert_eq!(provider_err.kind, ErrorKind::Conflict);
        assert!(is_conflict(&provider_err, &["DBS.201014"]));
        assert_eq!(api_error(&provider_err).and_then(ApiError::code), Some("DBS.201014"));
    }

    #[test]
    fn secrets_are_masked_in_logged_bodies() {
        let body = serde_json::json!({
            "password": "Secret@123",
            "user": {"name": "root", "password": "x"},
            "certificate": {"private_key": "-----BEGIN", "content": "pem"}
        });
        let shown = masked(&body).to_string();
        assert!(!shown.contains("Secret@123"));
        assert!(!shown.contains("BEGIN"));
        assert!(shown.contains("root"));
        assert!(shown.contains("pem"));
    }

    #[test]
    fn not_found_maps_to_provider_kind() {
        let err = status_error(StatusCode::NOT_FOUND, "");
        assert!(err.is_not_found());
        let provider_err: ProviderError = err.into();
        assert!(provider_err.is_not_found());
    }
}
