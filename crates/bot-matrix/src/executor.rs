use std::time::Duration;

use bot_core::{RequestError, RetryPolicy, SharedTokenStore};
use reqwest::{Method, header::AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// One client API call, relative to the resolved `.../_matrix/` base.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
}

impl ApiRequest {
    /// `path` is split on `/`; use [`ApiRequest::segment`] for ids that must be escaped.
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: &str, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    /// Append a single path segment. Reserved characters are percent-encoded.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Client-side limit for the whole call, overriding the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a single HTTP answer is handled by the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Success(Value),
    RateLimited { retry_after_ms: Option<u64> },
    Failed(RequestError),
}

/// Classify one status/body pair.
///
/// Only `200` with a JSON body succeeds and only `429` is retried. A `401`/`403`
/// needs both `errcode` and `error` to count as unauthorized.
pub fn classify_response(status: u16, body: &str) -> ResponseOutcome {
    let json = serde_json::from_str::<Value>(body).ok();

    match (status, json) {
        (200, Some(json)) => ResponseOutcome::Success(json),
        (429, json) => ResponseOutcome::RateLimited {
            retry_after_ms: json
                .as_ref()
                .and_then(|json| json.get("retry_after_ms"))
                .and_then(Value::as_u64),
        },
        (401 | 403, Some(json)) => {
            let errcode = json.get("errcode").and_then(Value::as_str);
            let message = json.get("error").and_then(Value::as_str);
            match (errcode, message) {
                (Some(errcode), Some(message)) => {
                    ResponseOutcome::Failed(RequestError::Unauthorized {
                        errcode: errcode.to_owned(),
                        message: message.to_owned(),
                    })
                }
                _ => unknown(status, body),
            }
        }
        _ => unknown(status, body),
    }
}

fn unknown(status: u16, body: &str) -> ResponseOutcome {
    ResponseOutcome::Failed(RequestError::UnknownResponse {
        status,
        body: body.to_owned(),
    })
}

/// Issues authenticated calls against one homeserver with rate-limit retry.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: Url,
    tokens: SharedTokenStore,
    retry: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        tokens: SharedTokenStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url,
            tokens,
            retry,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, request: &ApiRequest) -> Result<Url, RequestError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RequestError::Transport(format!("base url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    /// Run `request` until it succeeds, fails for good, or the attempts run out.
    ///
    /// The authorization header is read from the token store on every attempt.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, RequestError> {
        let url = self.endpoint(request)?;
        let max_attempts = self.retry.max_attempts();

        for attempt in 0..max_attempts {
            let mut builder = self.http.request(request.method.clone(), url.clone());
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(header) = self.tokens.read().await.authorization_header() {
                builder = builder.header(AUTHORIZATION, header);
            }

            let response = builder
                .send()
                .await
                .map_err(|err| RequestError::Transport(err.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|err| RequestError::Transport(err.to_string()))?;

            match classify_response(status, &body) {
                ResponseOutcome::Success(json) => return Ok(json),
                ResponseOutcome::RateLimited { retry_after_ms } => {
                    if attempt + 1 == max_attempts {
                        break;
                    }
                    let delay = self.retry.delay_for_attempt(attempt, retry_after_ms);
                    debug!(
                        method = %request.method,
                        %url,
                        attempt,
                        ?delay,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                ResponseOutcome::Failed(err) => {
                    if let RequestError::Unauthorized { errcode, message } = &err {
                        warn!(method = %request.method, %url, %errcode, "request not authorized: {message}");
                    }
                    return Err(err);
                }
            }
        }

        Err(RequestError::RateLimitExhausted {
            attempts: max_attempts,
        })
    }
}
