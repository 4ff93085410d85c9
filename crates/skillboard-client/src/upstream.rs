use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use skillboard_core::error::AppError;
use skillboard_core::traits::UpstreamClient;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "SkillBoard/0.1 (profile analyzer)";
const PLACEHOLDER: &str = "{id}";

/// Bodies longer than this are cut down before they end up in an error message.
const MAX_ERROR_BODY: usize = 200;

/// How an identifier is put into the upstream request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStyle {
    /// `GET` the endpoint template with `{id}` replaced by the identifier.
    Rest,
    /// `POST {"query", "variables": {"username"}}` to the endpoint.
    GraphQl { query: String },
}

/// HTTP upstream using reqwest.
///
/// Returns the upstream's JSON payload untouched and classifies failures
/// into [`AppError`] so the orchestrator can decide what to retry.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    style: RequestStyle,
    bearer_token: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(style: RequestStyle) -> Result<Self, AppError> {
        Self::build(style, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        let rebuilt = Self::build(self.style, timeout)?;
        Ok(Self {
            bearer_token: self.bearer_token,
            headers: self.headers,
            ..rebuilt
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn style(&self) -> &RequestStyle {
        &self.style
    }

    fn build(style: RequestStyle, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            style,
            bearer_token: None,
            headers: Vec::new(),
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else if e.is_builder() {
            AppError::ConfigError(format!("Invalid request: {e}"))
        } else {
            AppError::NetworkError(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: GraphQlVariables<'a>,
}

#[derive(Serialize)]
struct GraphQlVariables<'a> {
    username: &'a str,
}

impl UpstreamClient for HttpUpstream {
    async fn call(&self, identifier: &str, endpoint: &str) -> Result<serde_json::Value, AppError> {
        let mut request = match &self.style {
            RequestStyle::Rest => self.client.get(render_endpoint(endpoint, identifier)?),
            RequestStyle::GraphQl { query } => self.client.post(endpoint).json(&GraphQlRequest {
                query,
                variables: GraphQlVariables {
                    username: identifier,
                },
            }),
        };
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;

        tracing::trace!(%identifier, %endpoint, status, "Upstream responded");
        classify_response(identifier, status, &body)
    }
}

/// Substitute the percent-encoded identifier into a REST endpoint template.
pub fn render_endpoint(template: &str, identifier: &str) -> Result<Url, AppError> {
    if !template.contains(PLACEHOLDER) {
        return Err(AppError::ConfigError(format!(
            "endpoint '{template}' has no {PLACEHOLDER} placeholder"
        )));
    }
    // form encoding turns spaces into '+', which means nothing in a path.
    let encoded = url::form_urlencoded::byte_serialize(identifier.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    let rendered = template.replace(PLACEHOLDER, &encoded);
    Url::parse(&rendered)
        .map_err(|e| AppError::ConfigError(format!("Invalid endpoint '{rendered}': {e}")))
}

/// Turn an upstream HTTP response into a payload or a classified error.
///
/// - 404, or any error message saying the profile does not exist: `NotFound`
/// - 429: `RateLimitExceeded`
/// - other non-2xx: `HttpError` with the upstream status
/// - 2xx whose payload reports failure (`success: false`, `status: "FAILED"`,
///   a GraphQL `errors` array): `NotFound` when the message says so, otherwise
///   a 502 `HttpError` so the attempt is retried
pub fn classify_response(
    identifier: &str,
    status: u16,
    body: &str,
) -> Result<serde_json::Value, AppError> {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(error_message);

    if status == 404 {
        return Err(AppError::NotFound(
            message.unwrap_or_else(|| format!("'{identifier}' not found")),
        ));
    }
    if status == 429 {
        return Err(AppError::RateLimitExceeded);
    }
    if !(200..300).contains(&status) {
        return Err(match message {
            Some(msg) if mentions_not_found(&msg) => AppError::NotFound(msg),
            Some(msg) => AppError::HttpError {
                status,
                message: msg,
            },
            None => AppError::HttpError {
                status,
                message: truncate(body),
            },
        });
    }

    let Some(payload) = parsed else {
        return Err(AppError::SerializationError(format!(
            "upstream returned non-JSON body: {}",
            truncate(body)
        )));
    };

    if reports_failure(&payload) {
        let msg = message.unwrap_or_else(|| "upstream reported failure".to_string());
        if mentions_not_found(&msg) {
            return Err(AppError::NotFound(msg));
        }
        return Err(AppError::HttpError {
            status: 502,
            message: msg,
        });
    }

    Ok(payload)
}

fn reports_failure(payload: &serde_json::Value) -> bool {
    payload.get("success").and_then(|v| v.as_bool()) == Some(false)
        || payload
            .get("status")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("failed"))
        || payload
            .get("errors")
            .and_then(|v| v.as_array())
            .is_some_and(|errors| !errors.is_empty())
}

/// First human-readable error message in a JSON error body.
fn error_message(payload: &serde_json::Value) -> Option<String> {
    let text = |v: &serde_json::Value| v.as_str().map(str::to_string);

    payload
        .get("message")
        .and_then(text)
        .or_else(|| payload.get("comment").and_then(text))
        .or_else(|| {
            payload.get("error").and_then(|e| {
                text(e).or_else(|| e.get("message").and_then(text))
            })
        })
        .or_else(|| {
            payload
                .get("errors")
                .and_then(|v| v.as_array())
                .and_then(|errors| errors.first())
                .and_then(|first| first.get("message").and_then(text))
        })
}

fn mentions_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("does not exist") || lower.contains("doesn't exist")
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}...")
    }
}
