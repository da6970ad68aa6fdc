// Copyright 2024-2025 The swh-scan Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Batched, rate-limit-aware client for the archive's web API.
//!
//! The client chunks arbitrarily large inputs into server-acceptable
//! batches, dispatches several batches concurrently, and paces itself from
//! the `X-RateLimit-*` headers the server volunteers. All batch workers
//! share one throttle; its sleep interval is recomputed after every
//! response.

use std::collections::HashMap;
use std::str::FromStr as _;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::StreamExt as _;
use futures::stream;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::swhid::CoreId;
use crate::swhid::IdParseError;
use crate::swhid::QualifiedId;

/// Server-enforced ceiling on one `known/` batch.
pub const QUERY_LIMIT: usize = 1000;
/// Retry budget per batch.
pub const MAX_RETRY: u32 = 10;
/// Ceiling on one `provenance/whereare/` batch.
pub const MAX_WHEREARE_BATCH: usize = 100;
/// In-flight `whereare` batches.
pub const MAX_CONCURRENT_PROVENANCE_QUERIES: usize = 5;
/// In-flight `known/` batches.
const MAX_CONCURRENT_KNOWN_QUERIES: usize = 4;
/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const KNOWN_ENDPOINT: &str = "known/";
const WHEREARE_ENDPOINT: &str = "provenance/whereare/";
const WHEREIS_ENDPOINT: &str = "provenance/whereis/";

/// Error escaping the archive client.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("malformed identifier {text:?} in an archive reply")]
    Parse {
        text: String,
        #[source]
        source: IdParseError,
    },
    #[error("{endpoint}: HTTP {status} {reason}")]
    Http {
        status: u16,
        reason: String,
        endpoint: String,
    },
    /// The server rejected a batch as too large. Batches are sized by this
    /// client, so this means a client invariant was broken; it is not
    /// retried.
    #[error("{endpoint}: request payload exceeded the server limit")]
    PayloadTooLarge { endpoint: String },
    #[error("the provenance API rejected the credentials")]
    NoProvenanceAccess,
    #[error("{endpoint}: transport error")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid archive API URL {0:?}")]
    BadApiUrl(String),
    #[error("the bearer token is not a valid header value")]
    BadToken,
}

/// Oracle answering "does the archive hold these objects?".
#[async_trait]
pub trait KnownSource: Send + Sync {
    /// For each input identifier, whether the archive holds the exact
    /// object. The result covers every input.
    async fn known(&self, ids: &[CoreId]) -> Result<HashMap<CoreId, bool>, ArchiveError>;
}

/// Oracle answering provenance queries.
#[async_trait]
pub trait ProvenanceSource: Send + Sync {
    /// For each input identifier, in order, an anchored identifier if the
    /// archive can name one.
    async fn provenance_batch(
        &self,
        ids: &[CoreId],
    ) -> Result<Vec<Option<QualifiedId>>, ArchiveError>;
}

/// Rate-limit information carried by a reply, all parts optional.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct RateLimitInfo {
    limit: Option<i64>,
    remaining: Option<i64>,
    /// Absolute reset time, epoch seconds.
    reset_at: Option<i64>,
}

impl RateLimitInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| -> Option<i64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };
        Self {
            limit: number("X-RateLimit-Limit"),
            remaining: number("X-RateLimit-Remaining"),
            reset_at: number("X-RateLimit-Reset"),
        }
    }
}

/// Self-throttling schedule shared by every batch worker.
///
/// The schedule is deliberately not atomic with respect to concurrent
/// replies; a later reply simply recomputes the interval.
#[derive(Debug, Default)]
struct Throttle {
    /// Seconds to wait before the next request.
    sleep: f64,
}

impl Throttle {
    fn delay(&self) -> Duration {
        if self.sleep > 0.0 {
            Duration::from_secs_f64(self.sleep)
        } else {
            Duration::ZERO
        }
    }

    /// Recomputes the interval after a successful reply.
    ///
    /// The first 40% of the window is free; past that the brake grows as
    /// the credit depletes (the factor ranges from 1 to roughly 1000), and
    /// an exhausted window is waited out entirely.
    fn on_success(&mut self, info: RateLimitInfo, now: f64) {
        self.sleep = 0.0;
        let (Some(limit), Some(remaining), Some(reset_at)) =
            (info.limit, info.remaining, info.reset_at)
        else {
            return;
        };
        let window = reset_at as f64 - now;
        if window <= 0.0 {
            return;
        }
        if remaining <= 0 {
            self.sleep = window;
            tracing::warn!(seconds = self.sleep, "rate limit exhausted, waiting out the window");
            return;
        }
        let credit = remaining as f64 / limit as f64;
        if credit > 0.6 {
            return;
        }
        let factor = (0.4 + credit).powf(-1.5);
        self.sleep = window / remaining as f64 * factor;
        tracing::debug!(seconds = self.sleep, remaining, limit, "throttling requests");
    }

    /// Backs off after a failed reply: wait out an exhausted window with a
    /// 10% margin, otherwise double the interval (starting at one second).
    fn on_failure(&mut self, info: RateLimitInfo, now: f64) {
        if let (Some(remaining), Some(reset_at)) = (info.remaining, info.reset_at)
            && remaining <= 0
        {
            let wait = (reset_at as f64 - now) * 1.1;
            if wait > 0.0 && wait >= self.sleep {
                self.sleep = wait;
                return;
            }
        }
        self.sleep = if self.sleep <= 0.0 {
            1.0
        } else {
            self.sleep * 2.0
        };
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
struct KnownEntry {
    known: bool,
}

/// Client for the archive's web API.
pub struct ArchiveClient {
    http: reqwest::Client,
    api_url: Url,
    throttle: Mutex<Throttle>,
}

impl ArchiveClient {
    /// Builds a client for the API rooted at `api_url`, optionally
    /// authenticating every request with a bearer token.
    pub fn new(api_url: Url, bearer_token: Option<&str>) -> Result<Self, ArchiveError> {
        // A trailing slash matters when endpoint paths are joined on.
        let api_url = if api_url.path().ends_with('/') {
            api_url
        } else {
            let mut url = api_url;
            url.set_path(&format!("{}/", url.path()));
            url
        };
        let mut builder = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("swh-scan/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = bearer_token {
            let mut headers = HeaderMap::new();
            let mut value: reqwest::header::HeaderValue = format!("Bearer {token}")
                .parse()
                .map_err(|_| ArchiveError::BadToken)?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let http = builder.build().map_err(|source| ArchiveError::Transport {
            endpoint: api_url.to_string(),
            source,
        })?;
        Ok(Self {
            http,
            api_url,
            throttle: Mutex::new(Throttle::default()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ArchiveError> {
        self.api_url
            .join(path)
            .map_err(|_| ArchiveError::BadApiUrl(format!("{}{path}", self.api_url)))
    }

    /// Whether the archive holds each of `ids`.
    ///
    /// Inputs of any size are accepted; they are chunked into batches of at
    /// most [`QUERY_LIMIT`] dispatched concurrently. The result covers
    /// every input identifier.
    pub async fn known(&self, ids: &[CoreId]) -> Result<HashMap<CoreId, bool>, ArchiveError> {
        let mut verdicts = HashMap::with_capacity(ids.len());
        let pending: Vec<_> = ids
            .chunks(QUERY_LIMIT)
            .map(|chunk| self.known_batch(chunk))
            .collect();
        let mut batches = stream::iter(pending).buffer_unordered(MAX_CONCURRENT_KNOWN_QUERIES);
        while let Some(batch) = batches.next().await {
            verdicts.extend(batch?);
        }
        Ok(verdicts)
    }

    async fn known_batch(&self, chunk: &[CoreId]) -> Result<HashMap<CoreId, bool>, ArchiveError> {
        debug_assert!(chunk.len() <= QUERY_LIMIT);
        let endpoint = self.endpoint(KNOWN_ENDPOINT)?;
        let body: Vec<String> = chunk.iter().map(CoreId::to_string).collect();
        let response = self
            .request_with_retry(&endpoint, AuthFailure::Retried, || {
                self.http.post(endpoint.clone()).json(&body)
            })
            .await?;
        let raw: HashMap<String, KnownEntry> =
            response
                .json()
                .await
                .map_err(|source| ArchiveError::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
        let mut verdicts = HashMap::with_capacity(chunk.len());
        for (id, text) in chunk.iter().zip(&body) {
            match raw.get(text) {
                Some(entry) => {
                    verdicts.insert(*id, entry.known);
                }
                None => {
                    // The server is contracted to cover every input.
                    tracing::warn!(%id, "archive reply missing an identifier, treating as unknown");
                    verdicts.insert(*id, false);
                }
            }
        }
        Ok(verdicts)
    }

    /// Provenance of each of `ids`, in order.
    ///
    /// Chunked into batches of at most [`MAX_WHEREARE_BATCH`], at most
    /// [`MAX_CONCURRENT_PROVENANCE_QUERIES`] in flight.
    pub async fn provenance_batch(
        &self,
        ids: &[CoreId],
    ) -> Result<Vec<Option<QualifiedId>>, ArchiveError> {
        let mut results = Vec::with_capacity(ids.len());
        let pending: Vec<_> = ids
            .chunks(MAX_WHEREARE_BATCH)
            .map(|chunk| self.whereare_batch(chunk))
            .collect();
        let mut batches = stream::iter(pending).buffered(MAX_CONCURRENT_PROVENANCE_QUERIES);
        while let Some(batch) = batches.next().await {
            results.extend(batch?);
        }
        Ok(results)
    }

    async fn whereare_batch(
        &self,
        chunk: &[CoreId],
    ) -> Result<Vec<Option<QualifiedId>>, ArchiveError> {
        debug_assert!(chunk.len() <= MAX_WHEREARE_BATCH);
        let endpoint = self.endpoint(WHEREARE_ENDPOINT)?;
        let body: Vec<String> = chunk.iter().map(CoreId::to_string).collect();
        let response = self
            .request_with_retry(&endpoint, AuthFailure::NoProvenanceAccess, || {
                self.http.post(endpoint.clone()).json(&body)
            })
            .await?;
        let raw: Vec<Option<String>> =
            response
                .json()
                .await
                .map_err(|source| ArchiveError::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
        if raw.len() != chunk.len() {
            tracing::warn!(
                sent = chunk.len(),
                received = raw.len(),
                "archive provenance reply length mismatch"
            );
        }
        let mut results: Vec<Option<QualifiedId>> = raw
            .into_iter()
            .map(|text| {
                let text = text?;
                match QualifiedId::from_str(&text) {
                    Ok(qualified) => Some(qualified),
                    Err(err) => {
                        // Fatal for this item only.
                        tracing::warn!(%text, ?err, "dropping malformed provenance reply");
                        None
                    }
                }
            })
            .collect();
        results.resize(chunk.len(), None);
        Ok(results)
    }

    /// Single-shot provenance lookup.
    pub async fn whereis(&self, id: &CoreId) -> Result<Option<QualifiedId>, ArchiveError> {
        let endpoint = self.endpoint(&format!("{WHEREIS_ENDPOINT}{id}/"))?;
        let response = self
            .request_with_retry(&endpoint, AuthFailure::NoProvenanceAccess, || {
                self.http.get(endpoint.clone())
            })
            .await?;
        let body = response
            .text()
            .await
            .map_err(|source| ArchiveError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        // An empty body and a JSON null both mean "no provenance".
        if body.trim().is_empty() {
            return Ok(None);
        }
        let raw: Option<String> =
            serde_json::from_str(&body).map_err(|_| ArchiveError::Parse {
                text: body.clone(),
                source: IdParseError::Syntax(body.clone()),
            })?;
        let Some(text) = raw else {
            return Ok(None);
        };
        let qualified = QualifiedId::from_str(&text).map_err(|source| ArchiveError::Parse {
            text,
            source,
        })?;
        Ok(Some(qualified))
    }

    /// Issues one request, pacing and retrying per the shared throttle.
    ///
    /// Every attempt first waits out the current sleep interval. Transport
    /// errors and non-success statuses consume the retry budget, except
    /// 413 (a broken client invariant) and, on provenance endpoints,
    /// 401/403, which surface immediately.
    async fn request_with_retry(
        &self,
        endpoint: &Url,
        auth_failure: AuthFailure,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, ArchiveError> {
        let mut retries_left = MAX_RETRY;
        loop {
            let delay = self.throttle.lock().unwrap().delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let error = match build().send().await {
                Ok(response) => {
                    let info = RateLimitInfo::from_headers(response.headers());
                    if response.status().is_success() {
                        self.throttle.lock().unwrap().on_success(info, now_secs());
                        return Ok(response);
                    }
                    self.throttle.lock().unwrap().on_failure(info, now_secs());
                    let status = response.status();
                    if status == StatusCode::PAYLOAD_TOO_LARGE {
                        return Err(ArchiveError::PayloadTooLarge {
                            endpoint: endpoint.to_string(),
                        });
                    }
                    if auth_failure == AuthFailure::NoProvenanceAccess
                        && (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN)
                    {
                        return Err(ArchiveError::NoProvenanceAccess);
                    }
                    ArchiveError::Http {
                        status: status.as_u16(),
                        reason: status.canonical_reason().unwrap_or("unknown").to_owned(),
                        endpoint: endpoint.to_string(),
                    }
                }
                Err(source) => {
                    self.throttle
                        .lock()
                        .unwrap()
                        .on_failure(RateLimitInfo::default(), now_secs());
                    ArchiveError::Transport {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                }
            };
            retries_left -= 1;
            if retries_left == 0 {
                return Err(error);
            }
            tracing::debug!(%endpoint, retries_left, ?error, "retrying archive request");
        }
    }
}

/// How a 401/403 reply is handled for an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AuthFailure {
    /// Treated like any other failure, consuming the retry budget.
    Retried,
    /// Surfaced at once as [`ArchiveError::NoProvenanceAccess`].
    NoProvenanceAccess,
}

#[async_trait]
impl KnownSource for ArchiveClient {
    async fn known(&self, ids: &[CoreId]) -> Result<HashMap<CoreId, bool>, ArchiveError> {
        ArchiveClient::known(self, ids).await
    }
}

#[async_trait]
impl ProvenanceSource for ArchiveClient {
    async fn provenance_batch(
        &self,
        ids: &[CoreId],
    ) -> Result<Vec<Option<QualifiedId>>, ArchiveError> {
        ArchiveClient::provenance_batch(self, ids).await
    }
}
