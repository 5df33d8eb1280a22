//! Helpers for the Google JSON APIs
use std::borrow::Borrow;

use reqwest::{Response, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serializer};

use crate::error;

/// Google sends 64-bit integers as JSON strings
pub fn num_to_str<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(value) => serializer.serialize_str(&value.to_string()),
        None => serializer.serialize_none(),
    }
}

pub fn num_from_str<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use std::str::FromStr;

    let s = String::deserialize(deserializer)?;
    Ok(Some(i64::from_str(&s).map_err(serde::de::Error::custom)?))
}

pub async fn check_response(
    method: &str,
    path: &str,
    res: Response,
) -> treemirror::Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.map_err(error::io)?;
    Err(status_error(&format!("{method} {path}"), status, &body))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

/// Rejected or insufficient credentials.
/// Other 403 reasons (e.g. `fileNotDownloadable`) concern a single file.
fn is_auth_failure(status: StatusCode, body: &str) -> bool {
    match status {
        StatusCode::UNAUTHORIZED => true,
        StatusCode::FORBIDDEN => {
            let body: ErrorBody = serde_json::from_str(body).unwrap_or_default();
            body.error.errors.iter().any(|item| {
                matches!(
                    item.reason.as_deref(),
                    Some("authError" | "insufficientPermissions")
                )
            })
        }
        _ => false,
    }
}

/// Error for an unsuccessful response to `what`.
/// Authorization failures map to [`treemirror::Error::Auth`], which aborts a mirror pass.
pub fn status_error(what: &str, status: StatusCode, body: &str) -> treemirror::Error {
    let msg = format!("{what} returned {status}\n{body}");
    if is_auth_failure(status, body) {
        treemirror::Error::Auth(msg)
    } else {
        treemirror::Error::Api(msg)
    }
}

pub fn url_with_query<B, P, Q, K, V>(
    base_url: B,
    path: P,
    query_params: Q,
) -> treemirror::Result<Url>
where
    B: AsRef<str>,
    P: AsRef<str>,
    Q: IntoIterator,
    Q::Item: Borrow<(K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let base = format!("{}{}", base_url.as_ref(), path.as_ref());
    Url::parse_with_params(&base, query_params)
        .map_err(|err| treemirror::Error::Bug(format!("Invalid URL {base}: {err}")))
}
