//! Best-effort linking of catalog entries to media assets.
//!
//! Tiers run in a fixed order and a tier is only consulted when every earlier
//! one found nothing. Within a tier the first qualifying record in corpus
//! order wins; there is no scoring.

use std::collections::BTreeMap;

use crate::discover::Corpus;
use crate::formats::{AssetRecord, AssetSource, CatalogEntry};
use crate::media::MediaRepository;
use crate::normalize::{clean_entry_name, keywords};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Override,
    Containment,
    Keywords,
    LiveSearch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub asset: AssetRecord,
    pub tier: MatchTier,
}

pub struct Matcher<'a> {
    corpus: &'a Corpus,
    repo: &'a dyn MediaRepository,
    overrides: &'a BTreeMap<String, String>,
    search_suffix: &'a str,
}

impl<'a> Matcher<'a> {
    pub fn new(
        corpus: &'a Corpus,
        repo: &'a dyn MediaRepository,
        overrides: &'a BTreeMap<String, String>,
        search_suffix: &'a str,
    ) -> Self {
        Self {
            corpus,
            repo,
            overrides,
            search_suffix,
        }
    }

    pub async fn match_entry(&self, entry: &CatalogEntry) -> Option<Match> {
        if let Some(title) = self.overrides.get(&entry.id) {
            return Some(Match {
                asset: AssetRecord::new(
                    AssetSource::Override,
                    title.clone(),
                    self.repo.file_url(title),
                ),
                tier: MatchTier::Override,
            });
        }

        let name = clean_entry_name(&entry.name);

        if let Some(asset) = find_containing(self.corpus, &name) {
            return Some(Match {
                asset: asset.clone(),
                tier: MatchTier::Containment,
            });
        }

        if let Some(asset) = find_by_keywords(self.corpus, &name) {
            return Some(Match {
                asset: asset.clone(),
                tier: MatchTier::Keywords,
            });
        }

        self.live_search(entry, &name).await.map(|asset| Match {
            asset,
            tier: MatchTier::LiveSearch,
        })
    }

    async fn live_search(&self, entry: &CatalogEntry, name: &str) -> Option<AssetRecord> {
        if name.is_empty() {
            return None;
        }

        let query = format!("{name} {}", self.search_suffix).trim().to_owned();
        let hits = match self.repo.search(&query, 1).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(id = %entry.id, query = %query, ?err, "live search failed");
                return None;
            }
        };

        let hit = hits.into_iter().next()?;
        let url = self.repo.file_url(&hit.title);
        Some(AssetRecord::new(AssetSource::CorpusLive, hit.title, url))
    }
}

/// First record whose clean key contains `name` or is contained in it.
pub fn find_containing<'c>(corpus: &'c Corpus, name: &str) -> Option<&'c AssetRecord> {
    if name.is_empty() {
        return None;
    }
    corpus.assets().iter().find(|asset| {
        !asset.clean.is_empty()
            && (asset.clean.contains(name) || name.contains(asset.clean.as_str()))
    })
}

/// First record whose clean key contains every keyword of `name`.
pub fn find_by_keywords<'c>(corpus: &'c Corpus, name: &str) -> Option<&'c AssetRecord> {
    let keywords = keywords(name);
    if keywords.is_empty() {
        return None;
    }
    corpus
        .assets()
        .iter()
        .find(|asset| keywords.iter().all(|keyword| asset.clean.contains(keyword)))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::formats::{CategoryPage, SearchHit};

    #[derive(Default)]
    struct SearchStub {
        hits: Vec<SearchHit>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaRepository for SearchStub {
        async fn category_members(
            &self,
            _category: &str,
            _continuation: Option<&str>,
        ) -> anyhow::Result<CategoryPage> {
            Ok(CategoryPage::default())
        }

        async fn search(&self, query: &str, _limit: u32) -> anyhow::Result<Vec<SearchHit>> {
            self.queries.lock().expect("queries lock").push(query.to_owned());
            if self.fail {
                anyhow::bail!("search unavailable");
            }
            Ok(self.hits.clone())
        }

        fn file_url(&self, title: &str) -> String {
            format!("https://files.example/{}", crate::normalize::file_name(title))
        }
    }

    fn corpus(titles: &[&str]) -> Corpus {
        Corpus::from_records(
            titles
                .iter()
                .map(|title| {
                    AssetRecord::new(
                        AssetSource::Corpus,
                        *title,
                        format!("https://files.example/{title}"),
                    )
                })
                .collect(),
        )
    }

    fn entry(id: &str, name: &str) -> CatalogEntry {
        CatalogEntry::new(
            id,
            name,
            format!("https://hg.example/slideview/{id}/01.html"),
            "Test",
        )
    }

    #[tokio::test]
    async fn containment_matches_more_specific_catalog_name() {
        let corpus = corpus(&["File:Liver_lobule.jpg", "File:Renal_corpuscle.jpg"]);
        let repo = SearchStub::default();
        let overrides = BTreeMap::new();
        let matcher = Matcher::new(&corpus, &repo, &overrides, "histology");

        let found = matcher
            .match_entry(&entry("MH-1", "Renal Corpuscle (high mag)"))
            .await
            .expect("containment match");
        assert_eq!(found.tier, MatchTier::Containment);
        assert_eq!(found.asset.clean, "renal corpuscle");
        assert!(repo.queries.lock().expect("queries lock").is_empty());
    }

    #[tokio::test]
    async fn containment_matches_more_specific_asset_title() {
        let corpus = corpus(&["File:Thyroid_gland_histology.jpg"]);
        let repo = SearchStub::default();
        let overrides = BTreeMap::new();
        let matcher = Matcher::new(&corpus, &repo, &overrides, "histology");

        let found = matcher
            .match_entry(&entry("sl-1", "MH 123 Thyroid Gland"))
            .await
            .expect("containment match");
        assert_eq!(found.asset.title, "File:Thyroid_gland_histology.jpg");
    }

    #[tokio::test]
    async fn keyword_tier_requires_every_keyword_and_takes_first() {
        let corpus = corpus(&[
            "File:Small_intestine_villi.jpg",
            "File:Jejunum_wall_small_intestine_HE.jpg",
            "File:Small_intestine_wall_2.jpg",
        ]);
        let repo = SearchStub::default();
        let overrides = BTreeMap::new();
        let matcher = Matcher::new(&corpus, &repo, &overrides, "histology");

        let found = matcher
            .match_entry(&entry("MH-2", "Wall of the Small Intestine"))
            .await
            .expect("keyword match");
        assert_eq!(found.tier, MatchTier::Keywords);
        assert_eq!(found.asset.title, "File:Jejunum_wall_small_intestine_HE.jpg");
    }

    #[tokio::test]
    async fn live_search_is_last_resort_and_not_added_to_corpus() {
        let corpus = corpus(&["File:Liver_lobule.jpg"]);
        let repo = SearchStub {
            hits: vec![SearchHit {
                ns: 6,
                title: "File:Cornea_of_eye.jpg".to_owned(),
            }],
            ..SearchStub::default()
        };
        let overrides = BTreeMap::new();
        let matcher = Matcher::new(&corpus, &repo, &overrides, "histology");

        let found = matcher
            .match_entry(&entry("MH-3", "Cornea"))
            .await
            .expect("live match");
        assert_eq!(found.tier, MatchTier::LiveSearch);
        assert_eq!(found.asset.source, AssetSource::CorpusLive);
        assert_eq!(found.asset.url, "https://files.example/Cornea_of_eye.jpg");
        assert_eq!(
            *repo.queries.lock().expect("queries lock"),
            vec!["cornea histology".to_owned()]
        );
        assert_eq!(corpus.len(), 1);
    }

    #[tokio::test]
    async fn failed_live_search_yields_no_match() {
        let corpus = Corpus::default();
        let repo = SearchStub {
            fail: true,
            ..SearchStub::default()
        };
        let overrides = BTreeMap::new();
        let matcher = Matcher::new(&corpus, &repo, &overrides, "histology");

        assert!(matcher.match_entry(&entry("MH-4", "Spleen")).await.is_none());
    }

    #[tokio::test]
    async fn override_wins_before_corpus() {
        let corpus = corpus(&["File:Renal_corpuscle.jpg"]);
        let repo = SearchStub::default();
        let overrides = BTreeMap::from([(
            "MH-016".to_owned(),
            "File:Renal_corpuscle.svg".to_owned(),
        )]);
        let matcher = Matcher::new(&corpus, &repo, &overrides, "histology");

        let found = matcher
            .match_entry(&entry("MH-016", "Renal corpuscle"))
            .await
            .expect("override match");
        assert_eq!(found.tier, MatchTier::Override);
        assert_eq!(found.asset.url, "https://files.example/Renal_corpuscle.svg");
    }

    #[test]
    fn empty_names_never_match_everything() {
        let corpus = corpus(&["File:Anything.jpg"]);
        assert!(find_containing(&corpus, "").is_none());
        assert!(find_by_keywords(&corpus, "of the").is_none());
    }
}
