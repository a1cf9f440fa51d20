//! AK/SK request signing (SDK-HMAC-SHA256)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const HEADER_DATE: &str = "X-Sdk-Date";
pub const HEADER_PROJECT_ID: &str = "X-Project-Id";
pub const HEADER_SECURITY_TOKEN: &str = "X-Security-Token";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

type HmacSha256 = Hmac<Sha256>;

/// Access key pair used to sign requests
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("security_token", &self.security_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Headers to attach to a request, including `Authorization`
#[derive(Debug)]
pub struct SignedHeaders {
    pub headers: Vec<(String, String)>,
}

/// Sign a request. `headers` are the application headers that should be
/// covered by the signature; host, date and token headers are added here.
pub fn sign(
    credentials: &Credentials,
    method: &str,
    url: &Url,
    headers: &[(&str, &str)],
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<SignedHeaders, InvalidLength> {
    let date = now.format(DATE_FORMAT).to_string();

    let mut to_sign: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    to_sign.insert(HEADER_DATE.to_ascii_lowercase(), date.clone());
    to_sign.insert("host".to_string(), host_header(url));
    if let Some(token) = &credentials.security_token {
        to_sign.insert(HEADER_SECURITY_TOKEN.to_ascii_lowercase(), token.clone());
    }

    let signed_headers = to_sign.keys().cloned().collect::<Vec<_>>().join(";");
    let request = canonical_request(method, url, &to_sign, &signed_headers, body);
    let string_to_sign = format!(
        "{}\n{}\n{}",
        ALGORITHM,
        date,
        hex::encode(Sha256::digest(request.as_bytes()))
    );
    let signature = hmac_hex(&credentials.secret_key, &string_to_sign)?;

    let mut out: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    out.push((HEADER_DATE.to_string(), date));
    if let Some(token) = &credentials.security_token {
        out.push((HEADER_SECURITY_TOKEN.to_string(), token.clone()));
    }
    out.push((
        "Authorization".to_string(),
        format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key, signed_headers, signature
        ),
    ));
    Ok(SignedHeaders { headers: out })
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn canonical_request(
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
    body: &[u8],
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(body))
    )
}

fn canonical_uri(url: &Url) -> String {
    let mut path = url
        .path()
        .split('/')
        .map(|segment| {
            let raw = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&raw).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/");
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_hex(key: &str, data: &str) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
