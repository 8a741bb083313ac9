//! Stream proxy server
//!
//! Browsers and CLI clients must never hold the avatar hosting API key. The
//! proxy exposes `POST /api/streams`, re-encodes the submitted multipart form
//! and forwards it to `{upstream}/v1/streams` with the key in `x-api-key`.
//!
//! Response translation:
//!
//! | Upstream           | Proxy response                                |
//! |--------------------|-----------------------------------------------|
//! | 2xx with JSON body | 200 with the same JSON                        |
//! | 401                | 401 `{"error":"Unauthorized"}`                |
//! | anything else      | 500 `{"error":"Error while creating stream"}` |

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use reqwest::multipart::Form;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{AvatalkError, Result};
use crate::provisioning::{resolve_endpoint, STREAMS_PATH};

/// Upstream path of the stream creation endpoint
pub const UPSTREAM_STREAMS_PATH: &str = "v1/streams";

/// Header carrying the API key upstream
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state of the proxy handlers
#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    upstream: Url,
    api_key: Arc<str>,
}

impl std::fmt::Debug for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyState")
            .field("upstream", &self.upstream.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ProxyState {
    /// Proxy state forwarding to `upstream_url` with `api_key`
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::Config`] when the URL is invalid or the key is
    /// empty.
    pub fn new(upstream_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AvatalkError::Config("proxy API key is empty".to_string()).into());
        }
        let upstream = resolve_endpoint(upstream_url, UPSTREAM_STREAMS_PATH)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AvatalkError::Proxy(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upstream,
            api_key: api_key.into(),
        })
    }

    /// Proxy state from configuration
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::Config`] when the upstream URL or API key is
    /// missing.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        if config.upstream_url.trim().is_empty() {
            return Err(AvatalkError::Config(
                "proxy.upstream_url is required (or set AVATALK_UPSTREAM_URL)".to_string(),
            )
            .into());
        }
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            AvatalkError::Config("proxy API key is not set (use AVATALK_API_KEY)".to_string())
        })?;
        Self::new(&config.upstream_url, api_key)
    }

    /// The resolved upstream endpoint
    pub fn upstream(&self) -> &Url {
        &self.upstream
    }
}

/// Build the proxy router
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route(&format!("/{}", STREAMS_PATH), post(create_stream))
        .with_state(state)
}

async fn create_stream(State(state): State<ProxyState>, mut multipart: Multipart) -> Response {
    let mut form = Form::new();
    let mut fields = 0usize;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                match field.text().await {
                    Ok(value) => {
                        form = form.text(name, value);
                        fields += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read form field '{}': {}", name, e);
                        return creation_failed();
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Malformed multipart body: {}", e);
                return creation_failed();
            }
        }
    }

    tracing::debug!(fields, upstream = %state.upstream, "Forwarding stream request");
    match forward(&state, form).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => match e.downcast_ref::<AvatalkError>() {
            Some(AvatalkError::Unauthorized(_)) => {
                tracing::warn!("Upstream rejected the API key");
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Unauthorized"})),
                )
                    .into_response()
            }
            _ => {
                tracing::error!("Error while creating stream: {:#}", e);
                creation_failed()
            }
        },
    }
}

fn creation_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Error while creating stream"})),
    )
        .into_response()
}

async fn forward(state: &ProxyState, form: Form) -> Result<Value> {
    let response = state
        .client
        .post(state.upstream.clone())
        .header(API_KEY_HEADER, state.api_key.as_ref())
        .multipart(form)
        .send()
        .await
        .map_err(|e| AvatalkError::Proxy(format!("Upstream request failed: {}", e)))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AvatalkError::Unauthorized(format!("Upstream returned {}", status)).into());
    }
    if !status.is_success() {
        return Err(AvatalkError::Proxy(format!("Upstream returned {}", status)).into());
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| AvatalkError::Proxy(format!("Upstream body is not JSON: {}", e)).into())
}

/// Bind the configured address and serve until Ctrl-C
///
/// # Errors
///
/// Returns an error when the configuration is incomplete, the address cannot
/// be bound, or the server fails.
pub async fn serve(config: &ProxyConfig) -> Result<()> {
    let state = ProxyState::from_config(config)?;
    let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
        AvatalkError::Proxy(format!("Failed to bind {}: {}", config.bind_address, e))
    })?;
    tracing::info!(
        "Stream proxy listening on {} (upstream {})",
        listener.local_addr()?,
        state.upstream
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Stream proxy stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_resolution() {
        let state = ProxyState::new("https://avatar.example.com", "key").unwrap();
        assert_eq!(
            state.upstream().as_str(),
            "https://avatar.example.com/v1/streams"
        );
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(ProxyState::new("https://avatar.example.com", " ").is_err());
    }

    #[test]
    fn test_from_config_requires_key_and_upstream() {
        let mut config = ProxyConfig::default();
        assert!(ProxyState::from_config(&config).is_err());

        config.upstream_url = "https://avatar.example.com".to_string();
        let err = ProxyState::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("AVATALK_API_KEY"));

        config.api_key = Some("secret".to_string());
        assert!(ProxyState::from_config(&config).is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let state = ProxyState::new("https://avatar.example.com", "secret").unwrap();
        assert!(!format!("{:?}", state).contains("secret"));
    }
}
