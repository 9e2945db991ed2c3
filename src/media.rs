use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use url::Url;

use crate::config::PipelineConfig;
use crate::formats::{CategoryMember, CategoryPage, FILE_NAMESPACE, SearchHit};

/// Read access to the media repository's category tree and search index.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn category_members(
        &self,
        category: &str,
        continuation: Option<&str>,
    ) -> anyhow::Result<CategoryPage>;

    /// Full-text search restricted to the file namespace.
    async fn search(&self, query: &str, limit: u32) -> anyhow::Result<Vec<SearchHit>>;

    /// Direct download URL for a file title.
    fn file_url(&self, title: &str) -> String;
}

/// MediaWiki `api.php` client.
#[derive(Debug, Clone)]
pub struct MediaWikiClient {
    client: reqwest::Client,
    api_url: Url,
    file_path_url: Url,
    user_agent: String,
    page_limit: u32,
}

impl MediaWikiClient {
    pub fn new(config: &PipelineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.limits.page_timeout_secs))
            .build()
            .context("build media api http client")?;

        Ok(Self {
            client,
            api_url: Url::parse(&config.media.api_url).context("parse media.api_url")?,
            file_path_url: Url::parse(&config.media.file_path_url)
                .context("parse media.file_path_url")?,
            user_agent: config.user_agent.clone(),
            page_limit: config.media.page_limit.max(1),
        })
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let response = self
            .client
            .get(self.api_url.clone())
            .header(USER_AGENT, &self.user_agent)
            .query(&[("action", "query"), ("format", "json")])
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {}", self.api_url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("media api returned status {status}");
        }

        response.json::<T>().await.context("parse media api json")
    }
}

#[derive(Debug, Deserialize)]
struct CategoryMembersResponse {
    #[serde(default)]
    query: Option<CategoryMembersQuery>,
    #[serde(default, rename = "continue")]
    continuation: Option<CategoryContinue>,
}

#[derive(Debug, Deserialize)]
struct CategoryMembersQuery {
    #[serde(default)]
    categorymembers: Vec<CategoryMember>,
}

#[derive(Debug, Deserialize)]
struct CategoryContinue {
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[async_trait]
impl MediaRepository for MediaWikiClient {
    async fn category_members(
        &self,
        category: &str,
        continuation: Option<&str>,
    ) -> anyhow::Result<CategoryPage> {
        let mut params = vec![
            ("list", "categorymembers".to_owned()),
            ("cmtitle", category.to_owned()),
            ("cmlimit", self.page_limit.to_string()),
        ];
        if let Some(token) = continuation {
            params.push(("cmcontinue", token.to_owned()));
        }

        let parsed: CategoryMembersResponse = self
            .query(&params)
            .await
            .with_context(|| format!("list members of {category}"))?;

        let query = parsed
            .query
            .ok_or_else(|| anyhow::anyhow!("media api response has no query: {category}"))?;

        Ok(CategoryPage {
            members: query.categorymembers,
            next_continuation: parsed
                .continuation
                .and_then(|c| c.cmcontinue)
                .filter(|token| !token.is_empty()),
        })
    }

    async fn search(&self, query: &str, limit: u32) -> anyhow::Result<Vec<SearchHit>> {
        let params = [
            ("list", "search".to_owned()),
            ("srsearch", query.to_owned()),
            ("srnamespace", FILE_NAMESPACE.to_string()),
            ("srlimit", limit.max(1).to_string()),
        ];

        let parsed: SearchResponse = self
            .query(&params)
            .await
            .with_context(|| format!("search {query:?}"))?;

        Ok(parsed.query.map(|q| q.search).unwrap_or_default())
    }

    fn file_url(&self, title: &str) -> String {
        file_path_url(&self.file_path_url, title)
    }
}

/// `{base}/{file name}` with the name percent-encoded as one path segment.
pub fn file_path_url(base: &Url, title: &str) -> String {
    let name = crate::normalize::file_name(title);
    let mut url = base.clone();
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().push(name);
        }
        Err(()) => return format!("{}/{name}", base.as_str().trim_end_matches('/')),
    }
    url.to_string()
}
