use anyhow::Result;
use serde::de::DeserializeOwned;
use shared::error::{ApiException, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("identity provider rejected the request: {0}")]
    Identity(String),
    #[error("not authenticated")]
    NotAuthenticated,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway connect failed: {0}")]
    Connect(String),
    #[error("gateway is not connected")]
    NotConnected,
    #[error("gateway reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: usize },
}

/// Decodes a backend response: 2xx bodies deserialize into `T`, everything
/// else becomes a typed [`ApiException`] carrying the structured error code.
/// Responses without a parseable error body map to `internal`.
pub async fn decode_api_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let exception = match serde_json::from_str::<shared::error::ApiError>(&body) {
        Ok(api_error) => ApiException::from(api_error),
        Err(_) => ApiException::new(
            ErrorCode::Internal,
            format!("unexpected backend response ({status}): {body}"),
        ),
    };
    Err(exception.into())
}

/// Like [`decode_api_response`], for endpoints whose success body carries
/// nothing the client needs (delete/read acknowledgements).
pub async fn ensure_api_success(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    let exception = match serde_json::from_str::<shared::error::ApiError>(&body) {
        Ok(api_error) => ApiException::from(api_error),
        Err(_) => ApiException::new(
            ErrorCode::Internal,
            format!("unexpected backend response ({status}): {body}"),
        ),
    };
    Err(exception.into())
}

/// Pulls the structured api error back out of an `anyhow` chain, if present.
pub fn api_exception(err: &anyhow::Error) -> Option<&ApiException> {
    err.downcast_ref::<ApiException>()
}

/// True when the failure is a token-scoped rejection that must end the
/// session everywhere.
pub fn ends_session(err: &anyhow::Error) -> bool {
    api_exception(err).is_some_and(|exception| exception.code.ends_session())
}
