//! HTTP client for the internal control API.
//!
//! The public tier never touches the registry directly; it resolves and
//! mutates sessions through this client, which keeps the trust boundary in
//! one place and lets the control API run in a separate process if deployed
//! that way.

use reqwest::StatusCode;

use crate::api::error::ApiError;
use crate::api::{SessionCreated, SessionInfo};

/// Shared connect and request timeouts for control API calls.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Clone)]
pub struct ControlClient {
    base: String,
    client: reqwest::Client,
}

impl ControlClient {
    /// Build a client for the control API at `base` (e.g.
    /// `http://127.0.0.1:6090`).
    pub fn new(base: String) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        Ok(Self { base, client })
    }

    /// Create a session. A non-2xx status from the control API becomes a
    /// creation error with the upstream detail attached.
    pub async fn create_session(&self) -> Result<SessionCreated, ApiError> {
        let url = format!("{}/internal/sessions", self.base);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = upstream_detail(resp).await;
            return Err(ApiError::SessionCreateFailed(format!(
                "control API returned {status}: {detail}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| ApiError::InternalError(format!("invalid control API response: {e}")))
    }

    /// Look a session up. `Ok(None)` means the control API reported 404.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, ApiError> {
        let url = format!("{}/internal/sessions/{}", self.base, session_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ApiError::InternalError(format!(
                "control API returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map(Some)
            .map_err(|e| ApiError::InternalError(format!("invalid control API response: {e}")))
    }

    /// Delete a session. Returns `false` if the control API reported 404;
    /// delete stays idempotent across the tiers.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let url = format!("{}/internal/sessions/{}", self.base, session_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(ApiError::InternalError(format!(
                "control API returned {}",
                resp.status()
            )));
        }
        Ok(true)
    }

    /// Record activity on a session. Returns `false` on 404.
    pub async fn touch_activity(&self, session_id: &str) -> Result<bool, ApiError> {
        let url = format!("{}/internal/sessions/{}/activity", self.base, session_id);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(ApiError::InternalError(format!(
                "control API returned {}",
                resp.status()
            )));
        }
        Ok(true)
    }
}

/// Pull a best-effort error description out of an upstream response body.
async fn upstream_detail(resp: reqwest::Response) -> String {
    match resp.json::<serde_json::Value>().await {
        Ok(body) => body["error"]["message"]
            .as_str()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => "unknown error".to_string(),
    }
}
