use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Every tunable of a pipeline run. Missing YAML keys fall back to the
/// built-in defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub user_agent: String,
    pub catalog: CatalogConfig,
    pub media: MediaConfig,
    pub limits: Limits,
    pub paths: PathsConfig,
    /// Slide id → media title to use instead of matching.
    pub overrides: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            catalog: CatalogConfig::default(),
            media: MediaConfig::default(),
            limits: Limits::default(),
            paths: PathsConfig::default(),
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub start_url: String,
    /// Substring of a resolved href that marks a chapter link.
    pub chapter_pattern: String,
    /// Substring of a resolved href that marks a slide link.
    pub slide_pattern: String,
    pub referer: String,
    /// Thumbnail location relative to the slide page's directory.
    pub thumbnail_path: String,
    pub label: String,
    /// Visit every slide page for its description, notes and markers.
    pub scrape_slide_pages: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            start_url: "https://histologyguide.com/slidebox/slidebox.html".to_owned(),
            chapter_pattern: "slidebox/".to_owned(),
            slide_pattern: "/slideview/".to_owned(),
            referer: "https://histologyguide.com/".to_owned(),
            thumbnail_path: "imgs/slide.png".to_owned(),
            label: "HistologyGuide".to_owned(),
            scrape_slide_pages: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub api_url: String,
    pub file_path_url: String,
    pub seed_category: String,
    pub search_suffix: String,
    /// `cmlimit` sent with each category listing request.
    pub page_limit: u32,
    pub label: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            api_url: "https://commons.wikimedia.org/w/api.php".to_owned(),
            file_path_url: "https://commons.wikimedia.org/wiki/Special:FilePath".to_owned(),
            seed_category: "Category:Histology_by_organ_system".to_owned(),
            search_suffix: "histology".to_owned(),
            page_limit: 500,
            label: "Wikimedia Commons".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// A local image is valid only when strictly larger than this.
    pub min_image_bytes: u64,
    pub min_index_bytes: u64,
    pub min_corpus_assets: usize,
    pub max_category_depth: u32,
    pub max_redirects: u32,
    pub category_concurrency: usize,
    pub download_batch_size: usize,
    pub page_timeout_secs: u64,
    pub start_page_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_image_bytes: 8_000,
            min_index_bytes: 1_000,
            min_corpus_assets: 1_000,
            max_category_depth: 2,
            max_redirects: 5,
            category_concurrency: 4,
            download_batch_size: 1,
            page_timeout_secs: 30,
            start_page_timeout_secs: 60,
            download_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub index_file: String,
    pub assets_file: String,
    pub output_file: String,
    pub images_dir: String,
    pub image_url_prefix: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            index_file: "index.json".to_owned(),
            assets_file: "assets.json".to_owned(),
            output_file: "tissues.json".to_owned(),
            images_dir: "slides".to_owned(),
            image_url_prefix: "/slides".to_owned(),
        }
    }
}

impl PipelineConfig {
    pub fn index_path(&self) -> PathBuf {
        self.data_root.join(&self.paths.index_file)
    }

    pub fn assets_path(&self) -> PathBuf {
        self.data_root.join(&self.paths.assets_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.data_root.join(&self.paths.output_file)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_root.join(&self.paths.images_dir)
    }

    pub fn image_url(&self, file_name: &str) -> String {
        format!(
            "{}/{file_name}",
            self.paths.image_url_prefix.trim_end_matches('/')
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.max_redirects == 0 {
            anyhow::bail!("limits.max_redirects must be >= 1");
        }
        if self.limits.category_concurrency == 0 {
            anyhow::bail!("limits.category_concurrency must be >= 1");
        }
        if self.limits.download_batch_size == 0 {
            anyhow::bail!("limits.download_batch_size must be >= 1");
        }

        for (key, value) in [
            ("catalog.start_url", &self.catalog.start_url),
            ("media.api_url", &self.media.api_url),
            ("media.file_path_url", &self.media.file_path_url),
        ] {
            let url = Url::parse(value).with_context(|| format!("parse {key}: {value}"))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("{key} must be http/https: {url}");
            }
        }

        Ok(())
    }
}

/// Reads the YAML config at `path`, or the defaults when no path is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("read config: {}", path.display()))?;
            if contents.trim().is_empty() {
                PipelineConfig::default()
            } else {
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
        }
        None => PipelineConfig::default(),
    };

    config.validate().context("validate config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> anyhow::Result<()> {
        let config = load(None)?;
        assert_eq!(config.limits.min_image_bytes, 8_000);
        assert_eq!(config.index_path(), PathBuf::from("data/index.json"));
        assert_eq!(config.image_url("sl-1.jpg"), "/slides/sl-1.jpg");
        Ok(())
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("histoslide.yaml");
        std::fs::write(
            &path,
            "data_root: /tmp/slides\nlimits:\n  max_category_depth: 4\noverrides:\n  MH-016: File:Renal_corpuscle.svg\n",
        )?;

        let config = load(Some(&path))?;
        assert_eq!(config.data_root, PathBuf::from("/tmp/slides"));
        assert_eq!(config.limits.max_category_depth, 4);
        assert_eq!(config.limits.max_redirects, 5);
        assert_eq!(config.media.search_suffix, "histology");
        assert_eq!(
            config.overrides.get("MH-016").map(String::as_str),
            Some("File:Renal_corpuscle.svg")
        );
        Ok(())
    }

    #[test]
    fn zero_limits_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("histoslide.yaml");
        std::fs::write(&path, "limits:\n  category_concurrency: 0\n")?;

        let err = load(Some(&path)).expect_err("zero concurrency must be rejected");
        assert!(format!("{err:#}").contains("category_concurrency"));
        Ok(())
    }
}
