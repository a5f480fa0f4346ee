use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{self, Session, SessionManager, Validation};
use crate::error::ApiError;

/// Outbound request description
///
/// Cloneable so it can be replayed after a token refresh. The retry marker
/// is never flipped in place: `mark_retried` returns a new value.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    retried: bool,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    /// Add or replace a header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Raw request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON request body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::ValidationError(format!("Invalid JSON body: {}", e)))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Copy of this request flagged as already retried
    pub fn mark_retried(&self) -> Self {
        Self {
            retried: true,
            ..self.clone()
        }
    }

    /// Copy of this request carrying `Authorization: Bearer <token>`
    pub fn with_bearer(&self, token: &str) -> Result<Self, ApiError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiError::ValidationError(format!("Invalid access token: {}", e)))?;
        value.set_sensitive(true);

        let mut next = self.clone();
        next.headers.insert(AUTHORIZATION, value);
        Ok(next)
    }

    fn build(&self, client: &Client) -> Result<reqwest::Request, ApiError> {
        let mut builder = client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        if let Some(ref body) = self.body {
            builder = builder.body(body.clone());
        }
        Ok(builder.build()?)
    }
}

/// Parse an HTTP method name (case-insensitive)
pub fn parse_method(s: &str) -> Result<Method, ApiError> {
    match s.to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(ApiError::ValidationError(format!(
            "Unsupported HTTP method: {}",
            other
        ))),
    }
}

/// HTTP client for the gateway with bearer injection and refresh-on-401
pub struct AuthenticatedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session owner, shared with the rest of the application
    sessions: Arc<SessionManager>,

    /// Gateway base URL (login, refresh and validate live here)
    base_url: String,

    /// Call the validate endpoint after every successful response
    validate_after_response: bool,
}

impl AuthenticatedClient {
    /// Create a new client
    pub fn new(
        sessions: Arc<SessionManager>,
        base_url: impl Into<String>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(client, sessions, base_url))
    }

    /// Create a client around an existing reqwest client
    pub fn with_client(
        client: Client,
        sessions: Arc<SessionManager>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            sessions,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            validate_after_response: false,
        }
    }

    /// Enable or disable token validation after each successful response
    pub fn validate_after_response(mut self, enabled: bool) -> Self {
        self.validate_after_response = enabled;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve `path` against the base URL; absolute URLs pass through
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    pub fn request(&self, method: Method, path: &str) -> OutboundRequest {
        OutboundRequest::new(method, self.resolve_url(path))
    }

    pub fn get(&self, path: &str) -> OutboundRequest {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> OutboundRequest {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> OutboundRequest {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> OutboundRequest {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> OutboundRequest {
        self.request(Method::DELETE, path)
    }

    /// Log in and install the resulting session
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let session = auth::login(&self.client, &self.base_url, email, password).await?;
        self.sessions.set(session.clone()).await?;
        Ok(session)
    }

    /// Drop the current session
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.sessions.clear().await
    }

    /// Fetch the user's profile and store it in the session identity
    pub async fn load_profile(&self, users_url: &str) -> Result<Session, ApiError> {
        let session = self.sessions.get().await.ok_or(ApiError::NoSession)?;
        let url = format!(
            "{}/usuario/{}",
            users_url.trim_end_matches('/'),
            session.user.user_id
        );

        let body: serde_json::Value = self
            .execute_json(OutboundRequest::new(Method::GET, url))
            .await?;
        let profile = match body.get("data") {
            Some(data) => data.clone(),
            None => body,
        };

        let full_name = profile
            .get("nombreCompleto")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        // Only the identity is written, tokens refreshed meanwhile stay
        self.sessions
            .update_identity(|user| {
                if full_name.is_some() {
                    user.full_name = full_name;
                }
                user.profile = Some(profile);
            })
            .await
    }

    /// Check the current access token against the validate endpoint
    /// A rejected token terminates the session. A gateway that cannot be
    /// reached leaves the session alone and fails with `Transport`.
    pub async fn validate_session(&self) -> Result<(), ApiError> {
        let token = self.sessions.access_token().await.ok_or(ApiError::NoSession)?;
        match auth::validate_token(&self.client, &self.base_url, &token).await {
            Ok(Validation::Valid) => Ok(()),
            Ok(Validation::Rejected { status, message }) => {
                tracing::warn!(status = status, "Token validation failed: {}", message);
                self.terminate_session().await;
                Err(ApiError::SessionInvalidated(format!(
                    "Token validation failed: {} - {}",
                    status, message
                )))
            }
            Err(e) => {
                tracing::error!(error = %e, "Validate request failed, session kept");
                Err(ApiError::Transport(e))
            }
        }
    }

    /// Execute a request and deserialize its JSON body
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: OutboundRequest,
    ) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await?;
        let value = serde_json::from_slice(&bytes).context("Failed to parse response body")?;
        Ok(value)
    }

    /// Execute a request
    ///
    /// - attaches the session's access token when a session exists
    /// - on the first 401: refreshes the tokens and replays once
    /// - 401 without session: clears state, fails with `NoSession`
    /// - refresh failure: clears the session, fails with `RefreshFailed`
    /// - anything else: surfaced as is
    pub async fn execute(&self, request: OutboundRequest) -> Result<Response, ApiError> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            url = %request.url(),
            "Sending HTTP request"
        );

        let request = self.decorate(request).await?;
        let response = self.send(&request_id, &request).await?;
        let status = response.status();

        if status.is_success() {
            return self.accept(&request_id, response).await;
        }

        if status == StatusCode::UNAUTHORIZED && !request.is_retried() {
            return self.refresh_and_retry(&request_id, request).await;
        }

        Err(self.reject(&request_id, &request, response).await)
    }

    /// Attach the current access token, if any
    async fn decorate(&self, request: OutboundRequest) -> Result<OutboundRequest, ApiError> {
        match self.sessions.access_token().await {
            Some(token) if !token.is_empty() => request.with_bearer(&token),
            _ => Ok(request),
        }
    }

    async fn refresh_and_retry(
        &self,
        request_id: &str,
        request: OutboundRequest,
    ) -> Result<Response, ApiError> {
        // Flag first so the replay can never trigger another refresh
        let retry = request.mark_retried();

        let Some(session) = self.sessions.get().await else {
            tracing::warn!(request_id = %request_id, "Received 401 without a session");
            self.terminate_session().await;
            return Err(ApiError::NoSession);
        };

        tracing::warn!(
            request_id = %request_id,
            "Received 401, refreshing token and retrying..."
        );

        let tokens = match auth::refresh_session(&self.client, &self.base_url, &session).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!(request_id = %request_id, "Token refresh failed: {:#}", e);
                self.terminate_session().await;
                return Err(ApiError::RefreshFailed(e));
            }
        };

        let session = self.sessions.apply_refresh(tokens).await?;
        let retry = retry.with_bearer(&session.access_token)?;

        let response = self.send(request_id, &retry).await?;
        if response.status().is_success() {
            return self.accept(request_id, response).await;
        }

        Err(self.reject(request_id, &retry, response).await)
    }

    /// Success path, with the optional validation check
    async fn accept(&self, request_id: &str, response: Response) -> Result<Response, ApiError> {
        tracing::debug!(
            request_id = %request_id,
            status = %response.status(),
            "Request successful"
        );

        if self.validate_after_response && self.sessions.get().await.is_some() {
            self.validate_session().await?;
        }

        Ok(response)
    }

    async fn send(&self, request_id: &str, request: &OutboundRequest) -> Result<Response, ApiError> {
        let req = request.build(&self.client)?;

        match self.client.execute(req).await {
            Ok(response) => {
                tracing::debug!(
                    request_id = %request_id,
                    status = %response.status(),
                    retried = request.is_retried(),
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                // Categorize the error for better debugging
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else if e.is_body() {
                    "body_error"
                } else {
                    "unknown"
                };

                tracing::error!(
                    request_id = %request_id,
                    error_kind = error_kind,
                    error = %e,
                    url = %request.url(),
                    "HTTP request error"
                );
                Err(ApiError::Transport(e))
            }
        }
    }

    /// Turn a non-success response into the final error
    async fn reject(
        &self,
        request_id: &str,
        request: &OutboundRequest,
        response: Response,
    ) -> ApiError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();

        tracing::error!(
            request_id = %request_id,
            status = status.as_u16(),
            url = %request.url(),
            retried = request.is_retried(),
            response_body = %error_text,
            "HTTP request failed with error response"
        );

        ApiError::Upstream {
            status: status.as_u16(),
            message: error_text,
        }
    }

    /// Clear the session; a storage failure here must not mask the auth error
    async fn terminate_session(&self) {
        if let Err(e) = self.sessions.clear().await {
            tracing::error!("Failed to clear session: {}", e);
        }
    }
}
