//! Remote data fetch with bounded retry
//!
//! `Fetcher` is the seam the pipelines depend on; `HttpFetcher` is the
//! reqwest-backed implementation against the match data API.

use crate::domain::error::{EtlError, EtlResult};
use crate::infra::config::Config;
use crate::infra::metrics::PipelineMetrics;
use crate::io::artifacts::ArtifactKind;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Relative time range requested for movement and shot logs (seconds)
const EVENT_RANGE_END_SECS: u32 = 1650; // covers a full match

/// Logs bundled into the general events payload
const EVENTS_INCLUDE: &str = "safeZoneUpdateEvents,eliminationEvents,knockedDownEvents,\
healthUpdateEvents,shieldUpdateEvents,reviveEvents,rebootEvents";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Artifact { kind: ArtifactKind, owner: String },
    /// Tournaments active within the last `interval_secs`
    Tournaments { interval_secs: u64 },
}

impl ApiRequest {
    pub fn artifact(kind: ArtifactKind, owner: impl Into<String>) -> Self {
        ApiRequest::Artifact { kind, owner: owner.into() }
    }

    /// Path relative to the API base and its query parameters
    pub fn endpoint(&self) -> EtlResult<(String, Vec<(&'static str, String)>)> {
        let range = || {
            vec![
                ("startTimeRelative", "0".to_string()),
                ("endTimeRelative", EVENT_RANGE_END_SECS.to_string()),
            ]
        };
        let endpoint = match self {
            ApiRequest::Tournaments { interval_secs } => {
                ("/tournaments".to_string(), vec![("intervalS", interval_secs.to_string())])
            }
            ApiRequest::Artifact { kind, owner } => match kind {
                ArtifactKind::MatchInfo => (format!("/matches/{owner}"), vec![]),
                ArtifactKind::Players => (format!("/matches/{owner}/players"), vec![]),
                ArtifactKind::Movement => (format!("/matches/{owner}/events/movement"), range()),
                ArtifactKind::Shots => (format!("/matches/{owner}/events/shots"), range()),
                ArtifactKind::Events => (
                    format!("/matches/{owner}/events"),
                    vec![("include", EVENTS_INCLUDE.to_string())],
                ),
                ArtifactKind::WindowInfo => {
                    ("/tournaments".to_string(), vec![("eventWindowId", owner.clone())])
                }
                ArtifactKind::WindowMatches => (
                    "/matches".to_string(),
                    vec![("eventWindowId", owner.clone()), ("ignoreUploads", "true".to_string())],
                ),
                ArtifactKind::Weapons => {
                    return Err(EtlError::MissingData(format!(
                        "weapons for {owner} have no remote endpoint"
                    )))
                }
            },
        };
        Ok(endpoint)
    }

    pub fn label(&self) -> String {
        match self {
            ApiRequest::Artifact { kind, owner } => format!("{kind}/{owner}"),
            ApiRequest::Tournaments { interval_secs } => format!("tournaments/{interval_secs}s"),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ApiRequest) -> EtlResult<Value>;
}

/// Capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts(),
            base_delay: config.fetch_base_delay(),
            max_delay: config.fetch_max_delay(),
        }
    }

    /// Delay before retry number `retry` (0 for the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// 5xx and 429 are worth retrying; every other non-success status is final
#[inline]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

enum Attempt {
    Done(Value),
    Retry(String),
    Fatal(String),
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl HttpFetcher {
    pub fn new(config: &Config, metrics: Arc<PipelineMetrics>) -> EtlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .build()
            .map_err(|e| EtlError::Fetch {
                target: config.api_base_url().to_string(),
                reason: format!("failed to create HTTP client: {e}"),
                transient: false,
            })?;

        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(env_var = %config.api_key_env(), "api_key_missing");
        }

        Ok(Self {
            client,
            base_url: config.api_base_url().to_string(),
            api_key,
            policy: RetryPolicy::from_config(config),
            metrics,
        })
    }

    async fn attempt(&self, url: &str, query: &[(&'static str, String)]) -> Attempt {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return Attempt::Retry(e.to_string())
            }
            Err(e) => return Attempt::Fatal(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {}", status.as_u16());
            return if is_retryable_status(status) {
                Attempt::Retry(reason)
            } else {
                Attempt::Fatal(reason)
            };
        }

        match response.json::<Value>().await {
            Ok(v) => Attempt::Done(v),
            Err(e) if e.is_timeout() => Attempt::Retry(e.to_string()),
            Err(e) => Attempt::Fatal(format!("invalid JSON body: {e}")),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ApiRequest) -> EtlResult<Value> {
        let (path, query) = request.endpoint()?;
        let url = format!("{}{}", self.base_url, path);
        let target = request.label();

        let mut last_reason = String::new();
        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                self.metrics.record_fetch_retry();
                warn!(
                    target = %target,
                    attempt = %attempt,
                    delay_ms = %delay.as_millis(),
                    reason = %last_reason,
                    "fetch_retry"
                );
                tokio::time::sleep(delay).await;
            }

            self.metrics.record_fetch();
            match self.attempt(&url, &query).await {
                Attempt::Done(value) => {
                    debug!(target = %target, attempts = %(attempt + 1), "fetch_ok");
                    return Ok(value);
                }
                Attempt::Retry(reason) => last_reason = reason,
                Attempt::Fatal(reason) => {
                    return Err(EtlError::Fetch { target, reason, transient: false });
                }
            }
        }

        Err(EtlError::Fetch {
            target,
            reason: format!("retries exhausted: {last_reason}"),
            transient: true,
        })
    }
}
