use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{CatalogConfig, PipelineConfig};
use crate::formats::{CatalogEntry, DEFAULT_EXAM_TIPS, Marker, Theory};

static ZOOM_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"zZoomAndPanToView\(\s*(-?\d+),\s*(-?\d+),\s*(-?[\d.]+)")
        .expect("valid zoom call regex")
});

const MAX_FEATURE_NOTES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub text: String,
    pub url: Url,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexReport {
    pub start_page_failed: bool,
    pub chapters: usize,
    pub chapters_failed: usize,
    pub entries: usize,
    pub slide_pages: usize,
    pub slide_pages_failed: usize,
}

/// What a slide page adds to its entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlideDetails {
    pub description: Option<String>,
    pub theory: Theory,
    pub markers: Vec<Marker>,
}

impl SlideDetails {
    pub fn apply(self, entry: &mut CatalogEntry) {
        entry.description = Some(self.description.unwrap_or_else(|| entry.name.clone()));
        entry.theory = Some(self.theory);
        entry.markers = self.markers;
    }
}

pub struct CatalogCrawler {
    client: reqwest::Client,
    catalog: CatalogConfig,
    user_agent: String,
    page_timeout: Duration,
    start_page_timeout: Duration,
}

impl CatalogCrawler {
    pub fn new(config: &PipelineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build catalog http client")?;

        Ok(Self {
            client,
            catalog: config.catalog.clone(),
            user_agent: config.user_agent.clone(),
            page_timeout: Duration::from_secs(config.limits.page_timeout_secs),
            start_page_timeout: Duration::from_secs(config.limits.start_page_timeout_secs),
        })
    }

    async fn load_page(&self, url: &Url, timeout: Duration) -> anyhow::Result<(Url, String)> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url}: status {status}");
        }

        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .with_context(|| format!("read body: {url}"))?;
        Ok((final_url, html))
    }

    async fn load_page_or_cancel(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<anyhow::Result<(Url, String)>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            loaded = self.load_page(url, timeout) => Some(loaded),
        }
    }

    /// Walks the start page's chapters and returns every slide found, in
    /// crawl order. An unreachable start page yields an empty crawl. `None`
    /// means the walk was cancelled part-way.
    pub async fn build_index(
        &self,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<(Vec<CatalogEntry>, IndexReport)>> {
        let start_url = Url::parse(&self.catalog.start_url).context("parse catalog.start_url")?;
        let Some(loaded) = self
            .load_page_or_cancel(&start_url, self.start_page_timeout, cancel)
            .await
        else {
            return Ok(None);
        };
        let (start_base, start_html) = match loaded {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(url = %start_url, ?err, "catalog start page unavailable");
                let report = IndexReport {
                    start_page_failed: true,
                    ..IndexReport::default()
                };
                return Ok(Some((Vec::new(), report)));
            }
        };

        let chapters = chapter_links(
            &start_html,
            &start_base,
            &self.catalog.chapter_pattern,
            &start_url,
        );
        tracing::info!(chapters = chapters.len(), "catalog: found chapters");

        let mut report = IndexReport {
            chapters: chapters.len(),
            ..IndexReport::default()
        };
        let mut builder = IndexBuilder::default();

        for chapter in chapters {
            let Some(loaded) = self
                .load_page_or_cancel(&chapter.url, self.page_timeout, cancel)
                .await
            else {
                return Ok(None);
            };
            let (base, html) = match loaded {
                Ok(page) => page,
                Err(err) => {
                    report.chapters_failed += 1;
                    tracing::warn!(
                        chapter = %chapter.text,
                        url = %chapter.url,
                        ?err,
                        "failed to scan chapter; skipping"
                    );
                    continue;
                }
            };

            let slides = slide_links(&html, &base, &self.catalog.slide_pattern);
            if slides.is_empty() {
                tracing::warn!(
                    chapter = %chapter.text,
                    url = %chapter.url,
                    "chapter has no slide links"
                );
            }
            let added = builder.add_chapter(&chapter.text, slides);
            tracing::debug!(chapter = %chapter.text, added, "catalog: scanned chapter");
        }

        let entries = builder.finish();
        report.entries = entries.len();
        Ok(Some((entries, report)))
    }

    /// Scrapes every entry's slide page in place, one page at a time. A page
    /// that fails to load leaves its entry as it was. Returns `false` when
    /// cancelled.
    pub async fn enrich_entries(
        &self,
        entries: &mut [CatalogEntry],
        report: &mut IndexReport,
        cancel: &CancellationToken,
    ) -> bool {
        for entry in entries.iter_mut() {
            let url = match Url::parse(&entry.source_url) {
                Ok(url) => url,
                Err(err) => {
                    report.slide_pages_failed += 1;
                    tracing::warn!(id = %entry.id, ?err, "slide url does not parse; skipping");
                    continue;
                }
            };

            let Some(loaded) = self
                .load_page_or_cancel(&url, self.page_timeout, cancel)
                .await
            else {
                return false;
            };
            match loaded {
                Ok((_, html)) => {
                    let details = parse_slide_page(&html);
                    tracing::debug!(
                        id = %entry.id,
                        markers = details.markers.len(),
                        "catalog: scraped slide page"
                    );
                    details.apply(entry);
                    report.slide_pages += 1;
                }
                Err(err) => {
                    report.slide_pages_failed += 1;
                    tracing::warn!(id = %entry.id, url = %url, ?err, "failed to scrape slide page");
                }
            }
        }
        true
    }
}

/// Collects entries across chapters, keeping the first chapter for a
/// `sourceUrl` seen twice and keeping ids unique.
#[derive(Debug, Default)]
struct IndexBuilder {
    entries: Vec<CatalogEntry>,
    seen_urls: HashSet<String>,
    id_counts: HashMap<String, usize>,
}

impl IndexBuilder {
    fn add_chapter(&mut self, category: &str, slides: Vec<PageLink>) -> usize {
        let mut added = 0;
        for slide in slides {
            let source_url = slide.url.to_string();
            if self.seen_urls.contains(&source_url) {
                continue;
            }
            let Some(base_id) = slide_id(&slide.url) else {
                tracing::debug!(url = %slide.url, "slide url yields an empty id; skipping");
                continue;
            };

            let count = self.id_counts.entry(base_id.clone()).or_insert(0);
            *count += 1;
            let id = if *count == 1 {
                base_id
            } else {
                format!("{base_id}-{count}")
            };

            self.seen_urls.insert(source_url.clone());
            self.entries
                .push(CatalogEntry::new(id, slide.text, source_url, category));
            added += 1;
        }
        added
    }

    fn finish(self) -> Vec<CatalogEntry> {
        self.entries
    }
}

/// Chapter links on the navigation page, minus the page itself and links
/// without text.
pub fn chapter_links(html: &str, base: &Url, pattern: &str, start_url: &Url) -> Vec<PageLink> {
    let root_name = start_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_owned);
    let start = without_fragment(start_url);

    let mut seen = HashSet::new();
    matching_links(html, base, pattern)
        .into_iter()
        .filter(|link| {
            if link.url == start {
                return false;
            }
            match &root_name {
                Some(name) => !link.url.path().ends_with(name.as_str()),
                None => true,
            }
        })
        .filter(|link| seen.insert(link.url.clone()))
        .collect()
}

pub fn slide_links(html: &str, base: &Url, pattern: &str) -> Vec<PageLink> {
    matching_links(html, base, pattern)
}

fn matching_links(html: &str, base: &Url, pattern: &str) -> Vec<PageLink> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let url = base.join(href).ok()?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return None;
            }
            let url = without_fragment(&url);
            if !url.as_str().contains(pattern) {
                return None;
            }
            let text = anchor
                .text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }
            Some(PageLink { text, url })
        })
        .collect()
}

/// Second-to-last `/` segment of the slide URL, restricted to `[A-Za-z0-9-]`.
pub fn slide_id(url: &Url) -> Option<String> {
    let url = without_fragment(url);
    let segments = url.as_str().split('/').collect::<Vec<_>>();
    if segments.len() < 2 {
        return None;
    }
    let id = segments[segments.len() - 2]
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>();
    (!id.is_empty()).then_some(id)
}

/// Description, sidebar notes and markers of one slide page.
///
/// The description is the element right after the first `h2`. Every `li` and
/// `p` under `.sidebarPage` is a note: notes mentioning "function" or
/// "location" are filed there, the rest become features. Zoom buttons inside
/// a note become markers described by that note.
pub fn parse_slide_page(html: &str) -> SlideDetails {
    let document = Html::parse_document(html);
    let mut details = SlideDetails {
        description: heading_description(&document),
        theory: Theory {
            exam_tips: DEFAULT_EXAM_TIPS.to_owned(),
            ..Theory::default()
        },
        markers: Vec::new(),
    };

    let (Ok(notes), Ok(buttons)) = (
        Selector::parse(".sidebarPage li, .sidebarPage p"),
        Selector::parse(r#"button[onclick^="zZoomAndPanToView"]"#),
    ) else {
        return details;
    };

    let mut seen_markers = 0_usize;
    for note in document.select(&notes) {
        let text = element_text(note);
        if text.is_empty() {
            continue;
        }

        let lower = text.to_lowercase();
        if lower.contains("function") {
            details.theory.function.push(text.clone());
        } else if lower.contains("location") {
            details.theory.location.push(text.clone());
        } else {
            details.theory.features.push(text.clone());
        }

        for button in note.select(&buttons) {
            let index = seen_markers;
            seen_markers += 1;
            let Some((x, y, zoom)) = button.value().attr("onclick").and_then(parse_coordinates)
            else {
                continue;
            };
            if x == 0 || y == 0 {
                continue;
            }
            details.markers.push(Marker {
                id: format!("m-{index}"),
                label: element_text(button),
                description: text.clone(),
                x,
                y,
                zoom,
            });
        }
    }

    details.theory.features.truncate(MAX_FEATURE_NOTES);
    details
}

/// `(x, y, zoom)` from a `zZoomAndPanToView(x, y, zoom)` handler.
pub fn parse_coordinates(onclick: &str) -> Option<(i64, i64, f64)> {
    let captures = ZOOM_CALL.captures(onclick)?;
    let x = captures[1].parse().ok()?;
    let y = captures[2].parse().ok()?;
    let zoom = captures[3].parse().ok()?;
    Some((x, y, zoom))
}

fn heading_description(document: &Html) -> Option<String> {
    let selector = Selector::parse("h2").ok()?;
    let heading = document.select(&selector).next()?;
    let sibling = heading.next_siblings().find_map(ElementRef::wrap)?;
    let text = element_text(sibling);
    (!text.is_empty()).then_some(text)
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn without_fragment(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);
    out
}

pub async fn run(
    config: &PipelineConfig,
    force: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let index_path = config.index_path();
    if !force {
        if let Some(size) = crate::store::file_size(&index_path).await? {
            if size > config.limits.min_index_bytes {
                tracing::info!(
                    path = %index_path.display(),
                    size,
                    "index: existing index is populated; skipping crawl"
                );
                return Ok(());
            }
        }
    }

    tracing::info!(url = %config.catalog.start_url, "index: crawling catalog");
    let crawler = CatalogCrawler::new(config)?;
    let Some((mut entries, mut report)) = crawler.build_index(cancel).await? else {
        anyhow::bail!("index cancelled; previous index left untouched");
    };

    if entries.is_empty() {
        tracing::warn!(
            start_page_failed = report.start_page_failed,
            chapters = report.chapters,
            failed = report.chapters_failed,
            "index: crawl found no slides; previous index left untouched"
        );
        return Ok(());
    }

    if config.catalog.scrape_slide_pages {
        tracing::info!(entries = entries.len(), "index: scraping slide pages");
        if !crawler.enrich_entries(&mut entries, &mut report, cancel).await {
            anyhow::bail!(
                "index cancelled while scraping slide pages; previous index left untouched"
            );
        }
    }

    crate::store::write_json_atomic(&index_path, &entries)
        .await
        .with_context(|| format!("write index: {}", index_path.display()))?;
    tracing::info!(
        chapters = report.chapters,
        failed = report.chapters_failed,
        entries = report.entries,
        slide_pages = report.slide_pages,
        slide_pages_failed = report.slide_pages_failed,
        path = %index_path.display(),
        "index: done"
    );
    Ok(())
}
