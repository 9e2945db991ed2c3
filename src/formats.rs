use serde::{Deserialize, Serialize};

/// One slide as enumerated by the catalog's chapter pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    #[serde(alias = "url")]
    pub source_url: String,
    #[serde(default)]
    pub category: String,
    /// Filled only when slide pages are scraped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theory: Option<Theory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<Marker>,
}

impl CatalogEntry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_url: source_url.into(),
            category: category.into(),
            description: None,
            theory: None,
            markers: Vec::new(),
        }
    }
}

pub const DEFAULT_EXAM_TIPS: &str = "See distinguishing features.";

/// Sidebar notes of a slide page, sorted by what they talk about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theory {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub function: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub exam_tips: String,
}

/// A labelled point of interest on the slide image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    pub label: String,
    pub description: String,
    pub x: i64,
    pub y: i64,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetSource {
    #[serde(alias = "Commons")]
    Corpus,
    #[serde(alias = "Commons (Live)")]
    CorpusLive,
    Override,
}

/// A candidate image on the media repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub source: AssetSource,
    pub title: String,
    /// Cached clean key. Older corpus files may lack it; see `Corpus::from_records`.
    #[serde(default)]
    pub clean: String,
    pub url: String,
}

impl AssetRecord {
    pub fn new(source: AssetSource, title: impl Into<String>, url: impl Into<String>) -> Self {
        let title = title.into();
        let clean = crate::normalize::normalize(&title);
        Self {
            source,
            title,
            clean,
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSlide {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub image_url: String,
    pub source_name: String,
}

/// One member row of a category listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryMember {
    pub ns: i64,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPage {
    pub members: Vec<CategoryMember>,
    pub next_continuation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub ns: i64,
    pub title: String,
}

pub const FILE_NAMESPACE: i64 = 6;
pub const CATEGORY_NAMESPACE: i64 = 14;
