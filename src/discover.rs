//! Asset discovery over the media repository's category tree.
//!
//! The walk is a FIFO frontier of `(category, depth)` drained by a bounded
//! pool of listing tasks. Tasks only report what they saw; the coordinating
//! loop owns the frontier, the visited-set and the corpus. Listings are
//! committed in the order they were scheduled, so the corpus and the frontier
//! come out in breadth-first order whatever the task timing.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::formats::{AssetRecord, AssetSource, CATEGORY_NAMESPACE, FILE_NAMESPACE};
use crate::media::MediaRepository;

/// The accumulated, persisted set of discovered assets. Titles are unique and
/// records are never evicted.
#[derive(Debug, Default, Clone)]
pub struct Corpus {
    assets: Vec<AssetRecord>,
    seen: HashSet<String>,
}

impl Corpus {
    /// Builds a corpus from persisted records, recomputing missing clean keys
    /// and dropping repeated titles.
    pub fn from_records(records: Vec<AssetRecord>) -> Self {
        let mut corpus = Self::default();
        for mut record in records {
            if record.clean.is_empty() {
                record.clean = crate::normalize::normalize(&record.title);
            }
            corpus.insert(record);
        }
        corpus
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let records: Option<Vec<AssetRecord>> = crate::store::read_json(path)
            .await
            .with_context(|| format!("read corpus: {}", path.display()))?;
        Ok(Self::from_records(records.unwrap_or_default()))
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        crate::store::write_json_atomic(path, &self.assets)
            .await
            .with_context(|| format!("write corpus: {}", path.display()))
    }

    /// Adds `record` unless its title is already present.
    pub fn insert(&mut self, record: AssetRecord) -> bool {
        if !self.seen.insert(record.title.clone()) {
            return false;
        }
        self.assets.push(record);
        true
    }

    pub fn contains_title(&self, title: &str) -> bool {
        self.seen.contains(title)
    }

    pub fn assets(&self) -> &[AssetRecord] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub categories: usize,
    pub categories_failed: usize,
    pub added: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
struct CategoryListing {
    depth: u32,
    files: Vec<String>,
    subcategories: Vec<String>,
    failed: bool,
}

/// Pages through one category until the repository stops returning a
/// continuation token. A failed page ends the listing but keeps what was
/// already gathered.
async fn list_category(
    repo: &dyn MediaRepository,
    category: &str,
    depth: u32,
) -> CategoryListing {
    let mut listing = CategoryListing {
        depth,
        files: Vec::new(),
        subcategories: Vec::new(),
        failed: false,
    };
    let mut continuation: Option<String> = None;

    loop {
        let page = match repo.category_members(category, continuation.as_deref()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(category, depth, ?err, "category listing failed; abandoning branch");
                listing.failed = true;
                break;
            }
        };

        for member in page.members {
            match member.ns {
                FILE_NAMESPACE => listing.files.push(member.title),
                CATEGORY_NAMESPACE => listing.subcategories.push(member.title),
                _ => {}
            }
        }

        match page.next_continuation {
            Some(token) if continuation.as_deref() != Some(token.as_str()) => {
                continuation = Some(token);
            }
            Some(_) => {
                tracing::warn!(category, "repository repeated a continuation token; stopping");
                break;
            }
            None => break,
        }
    }

    listing
}

/// Walks the category tree under `seed` and adds new file members to
/// `corpus` in breadth-first order.
pub async fn discover_assets(
    repo: Arc<dyn MediaRepository>,
    seed: &str,
    corpus: &mut Corpus,
    max_depth: u32,
    concurrency: usize,
    cancel: &CancellationToken,
) -> anyhow::Result<DiscoveryReport> {
    let concurrency = concurrency.max(1);
    let mut report = DiscoveryReport::default();
    let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut join_set = JoinSet::new();
    let mut completed: BTreeMap<u64, CategoryListing> = BTreeMap::new();
    let mut next_spawn = 0_u64;
    let mut next_commit = 0_u64;

    visited.insert(seed.to_owned());
    frontier.push_back((seed.to_owned(), 0));

    while !frontier.is_empty() || !join_set.is_empty() {
        while !cancel.is_cancelled() && join_set.len() < concurrency {
            let Some((category, depth)) = frontier.pop_front() else {
                break;
            };
            tracing::debug!(category = %category, depth, "discover: scanning category");
            let repo = Arc::clone(&repo);
            let seq = next_spawn;
            next_spawn += 1;
            join_set.spawn(async move {
                (seq, list_category(repo.as_ref(), &category, depth).await)
            });
        }

        if join_set.is_empty() {
            // Cancelled with work still queued.
            break;
        }

        let joined = tokio::select! {
            joined = join_set.join_next() => joined,
            () = cancel.cancelled() => {
                join_set.abort_all();
                report.cancelled = true;
                break;
            }
        };
        let Some(joined) = joined else {
            break;
        };
        let (seq, listing) = joined.context("join category listing task")?;
        completed.insert(seq, listing);

        while let Some(listing) = completed.remove(&next_commit) {
            next_commit += 1;
            commit_listing(
                listing,
                repo.as_ref(),
                corpus,
                &mut report,
                &mut visited,
                &mut frontier,
                max_depth,
            );
        }
    }

    if cancel.is_cancelled() {
        report.cancelled = true;
    }
    Ok(report)
}

fn commit_listing(
    listing: CategoryListing,
    repo: &dyn MediaRepository,
    corpus: &mut Corpus,
    report: &mut DiscoveryReport,
    visited: &mut HashSet<String>,
    frontier: &mut VecDeque<(String, u32)>,
    max_depth: u32,
) {
    report.categories += 1;
    if listing.failed {
        report.categories_failed += 1;
    }

    for title in listing.files {
        if corpus.contains_title(&title) {
            continue;
        }
        let url = repo.file_url(&title);
        if corpus.insert(AssetRecord::new(AssetSource::Corpus, title, url)) {
            report.added += 1;
        }
    }

    let next_depth = listing.depth + 1;
    if next_depth > max_depth {
        return;
    }
    for subcategory in listing.subcategories {
        if visited.insert(subcategory.clone()) {
            frontier.push_back((subcategory, next_depth));
        }
    }
}

pub async fn run(
    config: &PipelineConfig,
    repo: Arc<dyn MediaRepository>,
    force: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<Corpus> {
    let assets_path = config.assets_path();
    let mut corpus = Corpus::load(&assets_path).await?;

    if !force && corpus.len() >= config.limits.min_corpus_assets {
        tracing::info!(
            assets = corpus.len(),
            "discover: corpus is populated; reusing it"
        );
        return Ok(corpus);
    }

    tracing::info!(
        seed = %config.media.seed_category,
        existing = corpus.len(),
        max_depth = config.limits.max_category_depth,
        concurrency = config.limits.category_concurrency,
        "discover: crawling categories"
    );
    let report = discover_assets(
        repo,
        &config.media.seed_category,
        &mut corpus,
        config.limits.max_category_depth,
        config.limits.category_concurrency,
        cancel,
    )
    .await?;

    corpus.save(&assets_path).await?;
    tracing::info!(
        categories = report.categories,
        failed = report.categories_failed,
        added = report.added,
        assets = corpus.len(),
        cancelled = report.cancelled,
        "discover: done"
    );
    if report.cancelled {
        anyhow::bail!(
            "discover cancelled; partial corpus of {} assets saved to {}",
            corpus.len(),
            assets_path.display()
        );
    }
    Ok(corpus)
}
