use std::path::PathBuf;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::discover::Corpus;
use crate::fetch::{FetchError, Fetcher};
use crate::formats::{AssetSource, CatalogEntry, MergedSlide};
use crate::matcher::{Match, MatchTier, Matcher};
use crate::media::MediaRepository;

/// Where one entry is in Stage C. `Valid` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Matched(MatchTier),
    Unmatched,
    Downloading,
    FallbackDownloading,
    Valid { downloaded: bool, fallback: bool },
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub entries: usize,
    pub matched_override: usize,
    pub matched_containment: usize,
    pub matched_keywords: usize,
    pub matched_live: usize,
    pub unmatched: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub fallbacks: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl MergeReport {
    fn record(&mut self, tier: Option<MatchTier>, state: EntryState) {
        self.entries += 1;
        match tier {
            Some(MatchTier::Override) => self.matched_override += 1,
            Some(MatchTier::Containment) => self.matched_containment += 1,
            Some(MatchTier::Keywords) => self.matched_keywords += 1,
            Some(MatchTier::LiveSearch) => self.matched_live += 1,
            None => self.unmatched += 1,
        }
        match state {
            EntryState::Valid {
                downloaded,
                fallback,
            } => {
                if downloaded {
                    self.downloaded += 1;
                } else {
                    self.skipped += 1;
                }
                if fallback {
                    self.fallbacks += 1;
                }
            }
            _ => self.failed += 1,
        }
    }
}

struct EntryOutcome {
    slide: MergedSlide,
    tier: Option<MatchTier>,
    state: EntryState,
}

pub struct Merger<'a> {
    config: &'a PipelineConfig,
    fetcher: &'a Fetcher,
    matcher: Matcher<'a>,
    images_dir: PathBuf,
}

impl<'a> Merger<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        fetcher: &'a Fetcher,
        corpus: &'a Corpus,
        repo: &'a dyn MediaRepository,
    ) -> Self {
        Self {
            config,
            fetcher,
            matcher: Matcher::new(corpus, repo, &config.overrides, &config.media.search_suffix),
            images_dir: config.images_dir(),
        }
    }

    /// Matches and downloads every entry in catalog order. Batches of
    /// `limits.download_batch_size` entries run concurrently; the next batch
    /// starts only when the previous one is done. Cancellation aborts
    /// downloads in flight and stops after the current batch.
    pub async fn merge_and_download(
        &self,
        index: &[CatalogEntry],
        cancel: &CancellationToken,
    ) -> (Vec<MergedSlide>, MergeReport) {
        let mut report = MergeReport::default();
        let mut slides = Vec::with_capacity(index.len());
        let batch_size = self.config.limits.download_batch_size.max(1);
        let total = index.len();

        for (batch_index, batch) in index.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let outcomes = futures::future::join_all(
                batch.iter().map(|entry| self.process_entry(entry, cancel)),
            )
            .await;
            for outcome in outcomes {
                report.record(outcome.tier, outcome.state);
                slides.push(outcome.slide);
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            tracing::debug!(
                done = (batch_index * batch_size + batch.len()).min(total),
                total,
                "merge: progress"
            );
        }

        (slides, report)
    }

    async fn process_entry(
        &self,
        entry: &CatalogEntry,
        cancel: &CancellationToken,
    ) -> EntryOutcome {
        let mut state = EntryState::Pending;
        let matched = self.matcher.match_entry(entry).await;
        let tier = matched.as_ref().map(|m| m.tier);
        advance(
            entry,
            &mut state,
            tier.map_or(EntryState::Unmatched, EntryState::Matched),
        );

        let thumbnail = thumbnail_url(&entry.source_url, &self.config.catalog.thumbnail_path);
        let fallback_file = format!("{}.png", entry.id);

        let (candidate_url, file_name, source_name, referer) = match &matched {
            Some(Match { asset, .. }) => (
                Some(asset.url.clone()),
                format!("{}.{}", entry.id, extension_for(&asset.title)),
                self.asset_source_name(asset.source),
                None,
            ),
            None => (
                thumbnail.clone(),
                fallback_file.clone(),
                format!("{} (thumbnail)", self.config.catalog.label),
                Some(self.config.catalog.referer.as_str()),
            ),
        };

        let mut slide = MergedSlide {
            entry: categorized(entry),
            image_url: self.config.image_url(&file_name),
            source_name,
        };
        let dest = self.images_dir.join(&file_name);

        if self.is_valid(&dest).await {
            advance(
                entry,
                &mut state,
                EntryState::Valid {
                    downloaded: false,
                    fallback: false,
                },
            );
            return EntryOutcome { slide, tier, state };
        }

        let fallback_dest = self.images_dir.join(&fallback_file);
        if matched.is_some() && self.is_valid(&fallback_dest).await {
            slide.image_url = self.config.image_url(&fallback_file);
            slide.source_name = self.fallback_source_name();
            advance(
                entry,
                &mut state,
                EntryState::Valid {
                    downloaded: false,
                    fallback: true,
                },
            );
            return EntryOutcome { slide, tier, state };
        }

        let Some(candidate_url) = candidate_url else {
            tracing::warn!(
                id = %entry.id,
                source_url = %entry.source_url,
                "no image candidate for entry"
            );
            advance(entry, &mut state, EntryState::Failed);
            return EntryOutcome { slide, tier, state };
        };

        advance(entry, &mut state, EntryState::Downloading);
        tracing::info!(
            id = %entry.id,
            file = %file_name,
            source = %slide.source_name,
            "downloading"
        );
        let fetched = self
            .fetcher
            .fetch(&candidate_url, &dest, referer, cancel)
            .await;
        let primary_err = match fetched {
            Ok(bytes) => {
                tracing::debug!(id = %entry.id, bytes, "downloaded");
                advance(
                    entry,
                    &mut state,
                    EntryState::Valid {
                        downloaded: true,
                        fallback: false,
                    },
                );
                return EntryOutcome { slide, tier, state };
            }
            Err(err) => err,
        };
        if matches!(primary_err, FetchError::Cancelled) {
            tracing::debug!(id = %entry.id, "download cancelled");
            advance(entry, &mut state, EntryState::Failed);
            return EntryOutcome { slide, tier, state };
        }
        tracing::warn!(id = %entry.id, url = %candidate_url, err = %primary_err, "download failed");

        let (true, Some(thumbnail)) = (matched.is_some(), thumbnail) else {
            advance(entry, &mut state, EntryState::Failed);
            return EntryOutcome { slide, tier, state };
        };

        advance(entry, &mut state, EntryState::FallbackDownloading);
        tracing::info!(id = %entry.id, url = %thumbnail, "falling back to catalog thumbnail");
        match self
            .fetcher
            .fetch(
                &thumbnail,
                &fallback_dest,
                Some(self.config.catalog.referer.as_str()),
                cancel,
            )
            .await
        {
            Ok(_) => {
                slide.image_url = self.config.image_url(&fallback_file);
                slide.source_name = self.fallback_source_name();
                advance(
                    entry,
                    &mut state,
                    EntryState::Valid {
                        downloaded: true,
                        fallback: true,
                    },
                );
            }
            Err(err) => {
                tracing::warn!(
                    id = %entry.id,
                    url = %thumbnail,
                    err = %err,
                    "fallback download failed"
                );
                advance(entry, &mut state, EntryState::Failed);
            }
        }
        EntryOutcome { slide, tier, state }
    }

    async fn is_valid(&self, path: &std::path::Path) -> bool {
        match self.fetcher.validate_existing(path).await {
            Ok(valid) => valid,
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "cannot check existing image");
                false
            }
        }
    }

    fn asset_source_name(&self, source: AssetSource) -> String {
        let label = &self.config.media.label;
        match source {
            AssetSource::Corpus => label.clone(),
            AssetSource::CorpusLive => format!("{label} (live search)"),
            AssetSource::Override => format!("{label} (override)"),
        }
    }

    fn fallback_source_name(&self) -> String {
        format!("{} (fallback)", self.config.catalog.label)
    }
}

/// Entries from an index without chapter names are filed by keyword.
fn categorized(entry: &CatalogEntry) -> CatalogEntry {
    let mut entry = entry.clone();
    if entry.category.trim().is_empty() {
        entry.category =
            crate::classify::category_for(&entry.name, entry.description.as_deref()).to_owned();
    }
    entry
}

fn advance(entry: &CatalogEntry, state: &mut EntryState, next: EntryState) {
    tracing::debug!(id = %entry.id, from = ?*state, to = ?next, "entry state");
    *state = next;
}

/// The catalog's own thumbnail for a slide page: `thumbnail_path` resolved
/// next to the page.
pub fn thumbnail_url(source_url: &str, thumbnail_path: &str) -> Option<String> {
    let authority_start = source_url.find("://").map_or(0, |i| i + 3);
    let slash = source_url.rfind('/')?;
    if slash < authority_start {
        return None;
    }
    let base = &source_url[..slash];
    Some(format!("{base}/{}", thumbnail_path.trim_start_matches('/')))
}

/// `svg` keeps vector assets intact; everything else is stored as `jpg`
/// since the repository rarely reports the real type up front.
pub fn extension_for(title: &str) -> &'static str {
    if title.to_ascii_lowercase().ends_with(".svg") {
        "svg"
    } else {
        "jpg"
    }
}

pub async fn run(
    config: &PipelineConfig,
    corpus: &Corpus,
    repo: &dyn MediaRepository,
    cancel: &CancellationToken,
) -> anyhow::Result<MergeReport> {
    let index_path = config.index_path();
    let index: Vec<CatalogEntry> = crate::store::read_json(&index_path)
        .await
        .with_context(|| format!("read index: {}", index_path.display()))?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "index not found: {} (run `histoslide index` first)",
                index_path.display()
            )
        })?;

    let images_dir = config.images_dir();
    tokio::fs::create_dir_all(&images_dir)
        .await
        .with_context(|| format!("create images dir: {}", images_dir.display()))?;

    tracing::info!(entries = index.len(), assets = corpus.len(), "merge: matching and downloading");
    let fetcher = Fetcher::new(config)?;
    let merger = Merger::new(config, &fetcher, corpus, repo);
    let (slides, report) = merger.merge_and_download(&index, cancel).await;

    if report.cancelled {
        anyhow::bail!(
            "merge cancelled after {} of {} entries; output dataset left untouched",
            report.entries,
            index.len()
        );
    }

    let output_path = config.output_path();
    crate::store::write_json_atomic(&output_path, &slides)
        .await
        .with_context(|| format!("write dataset: {}", output_path.display()))?;

    tracing::info!(
        entries = report.entries,
        containment = report.matched_containment,
        keywords = report.matched_keywords,
        live = report.matched_live,
        overrides = report.matched_override,
        unmatched = report.unmatched,
        downloaded = report.downloaded,
        skipped = report.skipped,
        fallbacks = report.fallbacks,
        failed = report.failed,
        path = %output_path.display(),
        "merge: done"
    );
    Ok(report)
}
