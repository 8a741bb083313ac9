//! Stream provisioning client
//!
//! Requests a new avatar session from the stream proxy. The proxy forwards
//! the multipart form to the avatar hosting service with the API key
//! attached and returns the session descriptor needed to join a room.

use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AvatalkError, Result};

/// Relative path of the provisioning endpoint on the proxy
pub const STREAMS_PATH: &str = "api/streams";

/// Session duration used when the caller does not pick one
pub const DEFAULT_MAX_DURATION_SECS: u32 = 300;

/// Credentials and identifiers needed to join a live room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Room access token
    pub token: String,
    /// Session identifier
    pub session_id: String,
    /// Media stream identifier; empty when the service omits it
    #[serde(default)]
    pub stream_id: String,
}

impl SessionDescriptor {
    /// Validate a provisioning response body
    ///
    /// `token` and `session_id` must be present as strings. A partially
    /// populated descriptor is never returned.
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::InvalidDescriptor`] when a required field is
    /// missing or not a string.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let field = |name: &str| value.get(name).and_then(serde_json::Value::as_str);

        let token = field("token").ok_or_else(|| {
            AvatalkError::InvalidDescriptor("response has no string 'token'".to_string())
        })?;
        let session_id = field("session_id").ok_or_else(|| {
            AvatalkError::InvalidDescriptor("response has no string 'session_id'".to_string())
        })?;
        let stream_id = field("stream_id").unwrap_or_default();

        Ok(Self {
            token: token.to_string(),
            session_id: session_id.to_string(),
            stream_id: stream_id.to_string(),
        })
    }
}

/// Parameters of a provisioning request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Avatar to host
    pub avatar_id: String,
    /// Language the avatar speaks with, e.g. "ko"
    pub language: String,
    /// Server-side session timeout; the service accepts 1..=3600
    pub max_duration_secs: Option<u32>,
}

impl SessionRequest {
    /// Request for `avatar_id` with the default duration
    pub fn new(avatar_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            avatar_id: avatar_id.into(),
            language: language.into(),
            max_duration_secs: None,
        }
    }

    /// Set the server-side session timeout
    pub fn with_max_duration(mut self, secs: u32) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    /// Multipart form fields in wire order
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("aiavatar_id", self.avatar_id.clone()),
            ("language", self.language.clone()),
            (
                "max_duration_s",
                self.max_duration_secs
                    .unwrap_or(DEFAULT_MAX_DURATION_SECS)
                    .to_string(),
            ),
        ]
    }
}

/// Source of session descriptors
///
/// Implemented by [`StreamProvisioningClient`] for the real proxy and by
/// [`crate::room::loopback::LoopbackProvisioner`] for offline sessions.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync + std::fmt::Debug {
    /// Obtain a descriptor for a new session
    async fn request_session(&self, request: &SessionRequest) -> Result<SessionDescriptor>;
}

/// HTTP client for the stream proxy
///
/// # Examples
///
/// ```no_run
/// use avatalk::provisioning::{Provisioner, SessionRequest, StreamProvisioningClient};
///
/// # async fn example() -> avatalk::Result<()> {
/// let client = StreamProvisioningClient::new("http://localhost:3000")?;
/// let descriptor = client
///     .request_session(&SessionRequest::new("avatar-123", "ko").with_max_duration(600))
///     .await?;
/// println!("session {}", descriptor.session_id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StreamProvisioningClient {
    client: Client,
    endpoint: Url,
}

impl StreamProvisioningClient {
    /// Create a client for the proxy at `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`AvatalkError::Config`] if `base_url` is not a valid URL, or
    /// an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a client with an explicit request timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let endpoint = resolve_endpoint(base_url, STREAMS_PATH)?;
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AvatalkError::Provisioning(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self { client, endpoint })
    }

    /// The fully resolved provisioning endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Join a relative `path` onto `base_url`, keeping any path prefix of the base
pub(crate) fn resolve_endpoint(base_url: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(base_url)
        .map_err(|e| AvatalkError::Config(format!("Invalid URL '{}': {}", base_url, e)))?;
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path)
        .map_err(|e| AvatalkError::Config(format!("Invalid URL '{}': {}", base_url, e)).into())
}

#[async_trait::async_trait]
impl Provisioner for StreamProvisioningClient {
    async fn request_session(&self, request: &SessionRequest) -> Result<SessionDescriptor> {
        let form = request
            .form_fields()
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        tracing::info!(
            avatar_id = %request.avatar_id,
            language = %request.language,
            "Requesting new avatar stream"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| AvatalkError::Provisioning(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::error!("Stream proxy rejected credentials");
            return Err(AvatalkError::Unauthorized(format!("Server error: {}", status)).into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Stream proxy returned error {}: {}", status, body);
            return Err(AvatalkError::Provisioning(format!("Server error: {}", status)).into());
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            AvatalkError::InvalidDescriptor(format!("Response is not JSON: {}", e))
        })?;
        let descriptor = SessionDescriptor::from_json(&body)?;
        tracing::debug!(session_id = %descriptor.session_id, "Stream provisioned");
        Ok(descriptor)
    }
}
