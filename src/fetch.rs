use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use url::Url;

const USER_AGENT_VALUE: &str = concat!("mangapipe/", env!("CARGO_PKG_VERSION"));
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// A listing page answered 404; see [`Fetcher::fetch_listing`].
    #[error("GET {url}: not found")]
    NotFound { url: String },
    #[error("GET {url} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// One HTTP client plus the retry policy every stage shares.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;
        Ok(Self { client, retry })
    }

    /// GETs `url` as text. Non-2xx statuses (404 included) and transport
    /// errors are retried with a fixed delay.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.get_text(url, false).await
    }

    /// Like [`Fetcher::fetch`], but a 404 marks the end of a paginated listing
    /// and ends immediately with [`FetchError::NotFound`].
    pub async fn fetch_listing(&self, url: &str) -> Result<String, FetchError> {
        self.get_text(url, true).await
    }

    async fn get_text(&self, url: &str, stop_on_not_found: bool) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: err.to_string(),
        })?;

        let attempts = self.retry.max_attempts;
        let mut last = String::new();
        for attempt in 1..=attempts {
            let response = self
                .client
                .get(parsed.clone())
                .header(USER_AGENT, USER_AGENT_VALUE)
                .header(ACCEPT, HTML_ACCEPT)
                .send()
                .await;

            match response {
                Ok(resp) if stop_on_not_found && resp.status() == StatusCode::NOT_FOUND => {
                    tracing::debug!(url, "not found");
                    return Err(FetchError::NotFound {
                        url: url.to_owned(),
                    });
                }
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) => return Ok(body),
                    Err(err) => last = format!("read body: {err}"),
                },
                Ok(resp) => last = format!("status {}", resp.status()),
                Err(err) => last = err.to_string(),
            }

            tracing::warn!(url, attempt, attempts, error = %last, "fetch attempt failed");
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_owned(),
            attempts,
            last,
        })
    }

    /// HEADs `url` once and reports whether it serves an image.
    pub async fn is_image(&self, url: &str) -> bool {
        let response = self
            .client
            .head(url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await;
        match response {
            Ok(resp) => {
                let is_image = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.to_ascii_lowercase().starts_with("image/"));
                resp.status().is_success() && is_image
            }
            Err(err) => {
                tracing::debug!(url, ?err, "image probe failed");
                false
            }
        }
    }
}
