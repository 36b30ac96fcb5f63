use crate::config::ScraperConfig;
use anyhow::Context;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::Retry;
use tracing::{debug, warn};
use url::Url;

/// A request that did not produce a usable body. Carries the target it was
/// made for; callers decide whether to log, aggregate or give up.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid endpoint {endpoint:?}: {source}")]
    Endpoint {
        target: String,
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed after {attempts} attempt(s): {source}")]
    Transport {
        target: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn target(&self) -> &str {
        match self {
            FetchError::Endpoint { target, .. } | FetchError::Transport { target, .. } => target,
        }
    }
}

/// Shared HTTP session. Cloned configuration only; safe to use from many tasks.
pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .context("Invalid accept_language header value")?,
        );

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Delay before retry `n` is `retry_delay * n`.
    fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        let base = self.retry_delay;
        (1..=self.max_retries).map(move |n| base * n)
    }

    /// GET `endpoint` with query `params`.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        target: &str,
    ) -> Result<String, FetchError> {
        let url = Url::parse_with_params(endpoint, params).map_err(|source| {
            FetchError::Endpoint {
                target: target.to_string(),
                endpoint: endpoint.to_string(),
                source,
            }
        })?;

        self.execute(target, || self.inner.get(url.clone())).await
    }

    /// POST `fields` as an urlencoded form body.
    pub async fn post_form(
        &self,
        endpoint: &str,
        fields: &[(&str, &str)],
        referer: Option<&str>,
        target: &str,
    ) -> Result<String, FetchError> {
        let url = Url::parse(endpoint).map_err(|source| FetchError::Endpoint {
            target: target.to_string(),
            endpoint: endpoint.to_string(),
            source,
        })?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();

        self.execute(target, || {
            let req = self
                .inner
                .post(url.clone())
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.clone());
            match referer {
                Some(r) => req.header(header::REFERER, r),
                None => req,
            }
        })
        .await
    }

    /// Send with retry. Transport errors and non-2xx statuses are retried
    /// until the backoff schedule runs out; the last error is returned.
    async fn execute<F>(&self, target: &str, build: F) -> Result<String, FetchError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let build = &build;

        let result = Retry::spawn(self.backoff(), move || async move {
            let n = attempts_ref.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("{}: attempt {}", target, n);

            let outcome = match build().send().await.and_then(|r| r.error_for_status()) {
                Ok(resp) => resp.text().await,
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                warn!("{}: attempt {} failed: {}", target, n, e);
            }
            outcome
        })
        .await;

        result.map_err(|source| FetchError::Transport {
            target: target.to_string(),
            attempts: attempts.load(Ordering::Relaxed),
            source,
        })
    }
}
