//! The single entry point for image bytes.
//!
//! Redirects are followed by hand so the hop count is bounded and every hop
//! carries the same headers. The body is streamed into a sibling `.part` file
//! and only renamed onto the destination once it is strictly larger than the
//! configured minimum; anything smaller is assumed to be an error page.

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{LOCATION, REFERER, USER_AGENT};
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::PipelineConfig;
use crate::store::remove_if_exists;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },
    #[error("unexpected status {0}")]
    BadStatus(u16),
    #[error("file too small ({0} bytes)")]
    TooSmall(u64),
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
    max_redirects: u32,
    min_bytes: u64,
}

impl Fetcher {
    pub fn new(config: &PipelineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.limits.download_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build download http client")?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_redirects: config.limits.max_redirects,
            min_bytes: config.limits.min_image_bytes,
        })
    }

    /// Downloads `url` to `dest` and returns the number of bytes kept.
    ///
    /// On every error, cancellation included, neither `dest` nor the partial
    /// file is left behind.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        referer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let part = part_path(dest);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.fetch_inner(url, dest, &part, referer) => result,
        };

        if let Err(err) = remove_if_exists(&part).await {
            tracing::warn!(path = %part.display(), ?err, "failed to remove partial download");
        }
        if result.is_err() {
            if let Err(err) = remove_if_exists(dest).await {
                tracing::warn!(path = %dest.display(), ?err, "failed to remove invalid download");
            }
        }
        result
    }

    async fn fetch_inner(
        &self,
        url: &str,
        dest: &Path,
        part: &Path,
        referer: Option<&str>,
    ) -> Result<u64, FetchError> {
        let mut current = parse_url(url)?;
        let mut hops = 0_u32;

        loop {
            let mut request = self
                .client
                .get(current.clone())
                .header(USER_AGENT, &self.user_agent);
            if let Some(referer) = referer {
                request = request.header(REFERER, referer);
            }

            tracing::debug!(url = %current, hops, "GET");
            let response = request.send().await.map_err(FetchError::Network)?;
            let status = response.status();

            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
                else {
                    return Err(FetchError::BadStatus(status.as_u16()));
                };

                remove_if_exists(dest).await?;
                hops += 1;
                if hops > self.max_redirects {
                    return Err(FetchError::TooManyRedirects {
                        limit: self.max_redirects,
                    });
                }
                current = current
                    .join(&location)
                    .map_err(|source| FetchError::InvalidUrl {
                        url: location,
                        source,
                    })?;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::BadStatus(status.as_u16()));
            }

            let size = self.write_body(response, part).await?;
            tokio::fs::rename(part, dest).await?;
            return Ok(size);
        }
    }

    async fn write_body(
        &self,
        mut response: reqwest::Response,
        part: &Path,
    ) -> Result<u64, FetchError> {
        if let Some(parent) = part.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(part).await?;
        while let Some(chunk) = response.chunk().await.map_err(FetchError::Network)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let size = tokio::fs::metadata(part).await?.len();
        if size <= self.min_bytes {
            return Err(FetchError::TooSmall(size));
        }
        Ok(size)
    }

    /// True when a valid image is already at `path`. An undersized file is
    /// deleted so the caller can download over it.
    pub async fn validate_existing(&self, path: &Path) -> anyhow::Result<bool> {
        match crate::store::file_size(path).await? {
            Some(size) if size > self.min_bytes => Ok(true),
            Some(size) => {
                tracing::info!(path = %path.display(), size, "deleting undersized image");
                remove_if_exists(path)
                    .await
                    .with_context(|| format!("delete undersized image: {}", path.display()))?;
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// Sibling of `dest` that receives the body until it is known to be valid.
pub fn part_path(dest: &Path) -> std::path::PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{name}.part.{}", uuid::Uuid::new_v4().simple()))
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|source| FetchError::InvalidUrl {
        url: url.to_owned(),
        source,
    })
}
