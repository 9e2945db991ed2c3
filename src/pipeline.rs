use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::discover::Corpus;
use crate::media::{MediaRepository, MediaWikiClient};
use crate::merge::MergeReport;
use crate::store::RunLock;

/// Runs index, discover and merge in that order against one data root.
pub async fn run(
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<MergeReport> {
    let _lock = RunLock::acquire(&config.data_root).context("acquire run lock")?;
    let repo: Arc<dyn MediaRepository> = Arc::new(MediaWikiClient::new(config)?);

    tracing::info!(data_root = %config.data_root.display(), "run: index");
    crate::catalog::run(config, false, cancel)
        .await
        .context("index")?;

    if cancel.is_cancelled() {
        anyhow::bail!("cancelled after index stage");
    }

    tracing::info!("run: discover");
    let corpus = crate::discover::run(config, Arc::clone(&repo), false, cancel)
        .await
        .context("discover")?;

    if cancel.is_cancelled() {
        anyhow::bail!("cancelled after discover stage");
    }

    tracing::info!("run: merge");
    crate::merge::run(config, &corpus, repo.as_ref(), cancel)
        .await
        .context("merge")
}

pub async fn index(
    config: &PipelineConfig,
    force: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let _lock = RunLock::acquire(&config.data_root).context("acquire run lock")?;
    crate::catalog::run(config, force, cancel).await
}

pub async fn discover(
    config: &PipelineConfig,
    force: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<Corpus> {
    let _lock = RunLock::acquire(&config.data_root).context("acquire run lock")?;
    let repo: Arc<dyn MediaRepository> = Arc::new(MediaWikiClient::new(config)?);
    crate::discover::run(config, repo, force, cancel).await
}

/// Stage C alone, over whatever corpus is already on disk.
pub async fn merge(
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<MergeReport> {
    let _lock = RunLock::acquire(&config.data_root).context("acquire run lock")?;
    let repo = MediaWikiClient::new(config)?;
    let corpus = Corpus::load(&config.assets_path()).await?;
    crate::merge::run(config, &corpus, &repo, cancel).await
}
