//! Response handling shared by the auth and REST clients.

use crate::error::{GatewayError, GatewayResult};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::warn;

/// Length and digest of a body, safe to log.
pub(crate) fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Human-readable message from a Supabase error body.
///
/// Auth answers with `error_description` or `msg`, PostgREST with
/// `message`.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Turn a non-success response into a [`GatewayError::Status`].
pub(crate) async fn response_error(response: Response, context: &str) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body_summary = summarize_response_body(&body);
    warn!(status = %status, body_summary = %body_summary, "{context}");

    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    GatewayError::Status {
        status: status.as_u16(),
        message,
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}
