use crate::models::{GenerationRequest, QueuedRequest, QuotaRejection};
use anyhow::{anyhow, Context, Result};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub const GENERATE_SPEECH_PATH: &str = "/api/generate-speech";
pub const USAGE_PATH: &str = "/api/usage";
pub const SUBSCRIPTION_PATH: &str = "/api/subscription";

const CLIENT_USER_AGENT: &str = concat!("carivox-client/", env!("CARGO_PKG_VERSION"));

/// The slice of the auth provider's state the core is allowed to read.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

/// Fixed session, mainly for tests and headless tooling.
#[derive(Debug, Clone)]
pub struct StaticSession(pub Session);

impl SessionProvider for StaticSession {
    fn current_session(&self) -> Option<Session> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionBody {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageBody {
    #[serde(default)]
    generation_count: u32,
}

/// Result of one synthesis call: either audio bytes or the backend's
/// authoritative quota rejection.
#[derive(Debug, Clone)]
pub enum SynthesisResponse {
    Audio(Vec<u8>),
    QuotaRejected(QuotaRejection),
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    http: Client,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_client(timeout_ms)?,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn fetch_subscription_status(&self, session: &Session) -> Result<String> {
        let endpoint = self.endpoint(SUBSCRIPTION_PATH);
        let response = apply_session(self.http.get(&endpoint), session)
            .send()
            .await
            .map_err(|error| anyhow!(reason_from_request_error(&error, &endpoint)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(reason_from_http_status(status, &endpoint)));
        }
        let body: SubscriptionBody = response
            .json()
            .await
            .with_context(|| format!("failed to decode subscription response from {endpoint}"))?;
        Ok(body.status)
    }

    /// Current month's generation count. A month with no record yet reads
    /// as zero.
    pub async fn fetch_usage(&self, session: &Session, month: &str) -> Result<u32> {
        let endpoint = self.endpoint(USAGE_PATH);
        let response = apply_session(self.http.get(&endpoint), session)
            .query(&[("month", month)])
            .send()
            .await
            .map_err(|error| anyhow!(reason_from_request_error(&error, &endpoint)))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(anyhow!(reason_from_http_status(status, &endpoint)));
        }
        let body: UsageBody = response
            .json()
            .await
            .with_context(|| format!("failed to decode usage response from {endpoint}"))?;
        Ok(body.generation_count)
    }

    pub async fn generate_speech(
        &self,
        session: &Session,
        request: &GenerationRequest,
    ) -> Result<SynthesisResponse> {
        let endpoint = self.endpoint(GENERATE_SPEECH_PATH);
        let response = apply_session(self.http.post(&endpoint), session)
            .json(request)
            .send()
            .await
            .map_err(|error| anyhow!(reason_from_request_error(&error, &endpoint)))?;
        let status = response.status();

        if status == StatusCode::FORBIDDEN {
            let rejection: QuotaRejection = response
                .json()
                .await
                .with_context(|| format!("failed to decode quota rejection from {endpoint}"))?;
            return Ok(SynthesisResponse::QuotaRejected(rejection));
        }
        if !status.is_success() {
            return Err(anyhow!(reason_from_http_status(status, &endpoint)));
        }
        let audio = response
            .bytes()
            .await
            .with_context(|| format!("failed to read audio payload from {endpoint}"))?;
        Ok(SynthesisResponse::Audio(audio.to_vec()))
    }

    /// Replays a queued request verbatim: stored method, headers and body,
    /// no session re-stamping (the headers captured at enqueue time carry
    /// whatever auth the first attempt had).
    pub async fn replay(&self, request: &QueuedRequest) -> Result<()> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| anyhow!("invalid HTTP method on queued request: {}", request.method))?;
        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder
            .send()
            .await
            .map_err(|error| anyhow!(reason_from_request_error(&error, &request.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(reason_from_http_status(status, &request.url)));
        }
        Ok(())
    }
}

fn apply_session(request: RequestBuilder, session: &Session) -> RequestBuilder {
    request
        .bearer_auth(&session.access_token)
        .header("X-Carivox-User", &session.user_id)
}

fn build_client(timeout_ms: u64) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_static(CLIENT_USER_AGENT),
    );
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json, audio/mpeg;q=0.9"),
    );
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .default_headers(headers)
        .build()
        .context("failed to initialize backend HTTP client")
}

fn reason_from_http_status(status: StatusCode, endpoint: &str) -> String {
    let reason = match status {
        StatusCode::UNAUTHORIZED => "auth_expired",
        StatusCode::FORBIDDEN => "auth_forbidden",
        StatusCode::NOT_FOUND => "endpoint_not_found",
        StatusCode::TOO_MANY_REQUESTS => "rate_limited",
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => "upstream_timeout",
        StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::INTERNAL_SERVER_ERROR => "upstream_unavailable",
        _ if status.is_client_error() => "client_error",
        _ if status.is_server_error() => "server_error",
        _ => "request_rejected",
    };
    format!("{reason}@{}:{endpoint}", status.as_u16())
}

fn reason_from_request_error(error: &reqwest::Error, endpoint: &str) -> String {
    let reason = if error.is_timeout() {
        "request_timeout"
    } else if error.is_connect() {
        "connect_failed"
    } else if error.is_request() {
        "request_build_failed"
    } else if error.is_decode() {
        "response_decode_failed"
    } else {
        "request_failed"
    };
    format!("{reason}@{endpoint}")
}
