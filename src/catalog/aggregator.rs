use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::fetcher::CatalogFetcher;
use super::model::{IndexEntry, PaperDocument};
use crate::error::{Result, SyncError};
use crate::model::RepoSource;

/// Deduplicated index: one entry per id, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: IndexMap<String, IndexEntry>,
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The sources a load actually reads: every enabled source in list order, or
/// a single builtin fallback when none is enabled. The fallback is the first
/// builtin source in the list, else `builtin`.
pub fn effective_sources(sources: &[RepoSource], builtin: &RepoSource) -> Vec<RepoSource> {
    let enabled: Vec<RepoSource> = sources.iter().filter(|s| s.enabled).cloned().collect();
    if !enabled.is_empty() {
        return enabled;
    }
    let fallback = sources
        .iter()
        .find(|s| s.is_builtin)
        .unwrap_or(builtin)
        .clone();
    vec![fallback]
}

pub struct CatalogAggregator {
    fetcher: Arc<dyn CatalogFetcher>,
    builtin: RepoSource,
    /// Bumped by every index load; a load that finishes under an older
    /// generation is discarded
    generation: AtomicU64,
    /// Cancelled when a newer index load starts
    in_flight: Mutex<CancellationToken>,
    last_known: RwLock<Option<Arc<Catalog>>>,
}

impl CatalogAggregator {
    pub fn new(fetcher: Arc<dyn CatalogFetcher>, builtin_url: String) -> Self {
        Self {
            fetcher,
            builtin: RepoSource {
                id: "builtin".to_string(),
                url: builtin_url,
                name: "Built-in catalog".to_string(),
                enabled: true,
                is_builtin: true,
            },
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(CancellationToken::new()),
            last_known: RwLock::new(None),
        }
    }

    /// What a load over `sources` would read.
    pub fn effective_sources(&self, sources: &[RepoSource]) -> Vec<RepoSource> {
        effective_sources(sources, &self.builtin)
    }

    /// The most recent catalog a load completed with, if any.
    pub fn last_known(&self) -> Option<Arc<Catalog>> {
        self.last_known.read().clone()
    }

    /// Fetch every effective source's index in parallel and merge by id.
    ///
    /// A failing source contributes nothing; only when every source fails is
    /// the load an error. On a collision the later source wins while the id
    /// keeps its first-seen position. If another load is started before this
    /// one settles, this one abandons its fetches and returns
    /// [`SyncError::Superseded`]. Neither error touches the last known catalog.
    pub async fn load_index(&self, sources: &[RepoSource]) -> Result<Arc<Catalog>> {
        let cancel = CancellationToken::new();
        let generation = {
            let mut in_flight = self.in_flight.lock();
            std::mem::replace(&mut *in_flight, cancel.clone()).cancel();
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let sources = self.effective_sources(sources);
        tracing::debug!("Loading catalog index from {} source(s)", sources.len());

        let fetches = sources.iter().map(|source| async move {
            let result = self.fetcher.fetch_index(source).await;
            if let Err(e) = &result {
                tracing::warn!("Catalog source {} failed: {}", source.id, e);
            }
            result.ok()
        });
        let results = tokio::select! {
            _ = cancel.cancelled() => None,
            results = join_all(fetches) => Some(results),
        };

        let results = match results {
            Some(results) if self.generation.load(Ordering::SeqCst) == generation => results,
            _ => {
                tracing::debug!("Discarding superseded catalog load {}", generation);
                return Err(SyncError::Superseded);
            }
        };
        if results.iter().all(Option::is_none) {
            return Err(SyncError::Network(format!(
                "all {} catalog source(s) failed",
                sources.len()
            )));
        }

        let mut entries = IndexMap::new();
        for (source, list) in sources.iter().zip(results) {
            for mut entry in list.unwrap_or_default() {
                entry.source_url = Some(source.url.clone());
                entries.insert(entry.id.clone(), entry);
            }
        }

        let catalog = Arc::new(Catalog { entries });
        tracing::info!("Catalog loaded with {} entries", catalog.len());
        *self.last_known.write() = Some(catalog.clone());
        Ok(catalog)
    }

    /// Fetch one paper from every effective source and merge its questions
    /// by id, later source winning. `None` if no source has the paper.
    pub async fn load_paper(
        &self,
        sources: &[RepoSource],
        paper_id: &str,
    ) -> Result<Option<PaperDocument>> {
        let sources = self.effective_sources(sources);

        let fetches = sources.iter().map(|source| async move {
            match self.fetcher.fetch_paper(source, paper_id).await {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!("Paper {} from {} failed: {}", paper_id, source.id, e);
                    None
                }
            }
        });
        let results = join_all(fetches).await;

        let mut merged: Option<PaperDocument> = None;
        for (source, document) in sources.iter().zip(results) {
            let Some(document) = document else {
                continue;
            };
            let target = merged.get_or_insert_with(|| PaperDocument {
                paper_id: paper_id.to_string(),
                questions: IndexMap::new(),
            });
            for (id, mut question) in document.questions {
                question.source_url = Some(source.url.clone());
                target.questions.insert(id, question);
            }
        }

        if merged.is_none() {
            tracing::debug!("No source carries paper {}", paper_id);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Question;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedFetcher {
        /// `None` fails the fetch
        indexes: HashMap<String, Option<Vec<IndexEntry>>>,
        papers: HashMap<String, PaperDocument>,
        delays: HashMap<String, Duration>,
    }

    #[async_trait]
    impl CatalogFetcher for ScriptedFetcher {
        async fn fetch_index(&self, source: &RepoSource) -> Result<Vec<IndexEntry>> {
            if let Some(delay) = self.delays.get(&source.id) {
                tokio::time::sleep(*delay).await;
            }
            match self.indexes.get(&source.id) {
                Some(Some(entries)) => Ok(entries.clone()),
                _ => Err(SyncError::Network(format!("{} unreachable", source.id))),
            }
        }

        async fn fetch_paper(
            &self,
            source: &RepoSource,
            paper_id: &str,
        ) -> Result<Option<PaperDocument>> {
            if self.indexes.get(&source.id) == Some(&None) {
                return Err(SyncError::Network(format!("{} unreachable", source.id)));
            }
            Ok(self
                .papers
                .get(&format!("{}/{}", source.id, paper_id))
                .cloned())
        }
    }

    fn source(id: &str) -> RepoSource {
        RepoSource {
            id: id.to_string(),
            url: format!("https://{}.example.org", id),
            name: id.to_uppercase(),
            enabled: true,
            is_builtin: false,
        }
    }

    fn entry(id: &str, number: u32) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            paper_id: "p1".to_string(),
            number: Some(number),
            kind: None,
            tags: Vec::new(),
            source_url: None,
        }
    }

    fn question(id: &str, stem: &str) -> (String, Question) {
        let mut fields = serde_json::Map::new();
        fields.insert("stem".to_string(), stem.into());
        (
            id.to_string(),
            Question {
                id: id.to_string(),
                source_url: None,
                fields,
            },
        )
    }

    fn aggregator(fetcher: ScriptedFetcher) -> CatalogAggregator {
        CatalogAggregator::new(Arc::new(fetcher), "https://builtin.example.org".to_string())
    }

    #[tokio::test]
    async fn test_later_source_wins_in_first_seen_order() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher
            .indexes
            .insert("a".to_string(), Some(vec![entry("1", 1), entry("2", 2)]));
        fetcher
            .indexes
            .insert("b".to_string(), Some(vec![entry("2", 20), entry("3", 3)]));

        let catalog = aggregator(fetcher)
            .load_index(&[source("a"), source("b")])
            .await
            .unwrap();

        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["1", "2", "3"]);
        let two = catalog.get("2").unwrap();
        assert_eq!(two.number, Some(20));
        assert_eq!(two.source_url.as_deref(), Some("https://b.example.org"));
    }

    #[tokio::test]
    async fn test_failing_source_is_isolated() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher.indexes.insert("a".to_string(), None);
        fetcher
            .indexes
            .insert("b".to_string(), Some(vec![entry("3", 3)]));

        let catalog = aggregator(fetcher)
            .load_index(&[source("a"), source("b")])
            .await
            .unwrap();
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["3"]);
    }

    #[tokio::test]
    async fn test_disabled_sources_are_skipped() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher
            .indexes
            .insert("a".to_string(), Some(vec![entry("1", 1)]));
        fetcher
            .indexes
            .insert("b".to_string(), Some(vec![entry("1", 10)]));
        let mut b = source("b");
        b.enabled = false;

        let catalog = aggregator(fetcher)
            .load_index(&[source("a"), b])
            .await
            .unwrap();
        assert_eq!(catalog.get("1").unwrap().number, Some(1));
    }

    #[test]
    fn test_fallback_prefers_listed_builtin() {
        let fallback = source("fallback");
        let mut listed = source("listed");
        listed.is_builtin = true;
        listed.enabled = false;
        let mut other = source("other");
        other.enabled = false;

        let effective = effective_sources(&[other.clone(), listed], &fallback);
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].id, "listed");

        let effective = effective_sources(&[other], &fallback);
        assert_eq!(effective[0].id, "fallback");

        assert_eq!(effective_sources(&[], &fallback)[0].id, "fallback");
    }

    #[tokio::test]
    async fn test_no_sources_uses_builtin() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher
            .indexes
            .insert("builtin".to_string(), Some(vec![entry("9", 9)]));

        let catalog = aggregator(fetcher).load_index(&[]).await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get("9").unwrap().source_url.as_deref(),
            Some("https://builtin.example.org")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_load_is_discarded() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher
            .indexes
            .insert("slow".to_string(), Some(vec![entry("1", 1)]));
        fetcher
            .delays
            .insert("slow".to_string(), Duration::from_secs(1));
        fetcher
            .indexes
            .insert("fast".to_string(), Some(vec![entry("2", 2)]));
        let aggregator = aggregator(fetcher);

        let slow_set = [source("slow")];
        let fast_set = [source("fast")];
        let started = tokio::time::Instant::now();
        let (first, second) = tokio::join!(
            async {
                let result = aggregator.load_index(&slow_set).await;
                (result, started.elapsed())
            },
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                aggregator.load_index(&fast_set).await
            }
        );

        // Returns as soon as the newer load starts, not after the slow fetch
        let (first, waited) = first;
        assert!(matches!(first, Err(SyncError::Superseded)));
        assert!(waited < Duration::from_secs(1));
        let second = second.unwrap();
        let last_known = aggregator.last_known().unwrap();
        assert_eq!(last_known.ids().collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(*last_known, *second);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_last_known() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher
            .indexes
            .insert("a".to_string(), Some(vec![entry("1", 1)]));
        fetcher.indexes.insert("down".to_string(), None);
        let aggregator = aggregator(fetcher);

        aggregator.load_index(&[source("a")]).await.unwrap();
        let result = aggregator.load_index(&[source("down")]).await;
        assert!(matches!(result, Err(SyncError::Network(_))));
        assert_eq!(aggregator.last_known().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paper_questions_merge_across_sources() {
        let mut fetcher = ScriptedFetcher::default();
        fetcher.indexes.insert("a".to_string(), Some(Vec::new()));
        fetcher.indexes.insert("b".to_string(), Some(Vec::new()));
        fetcher.indexes.insert("c".to_string(), None);
        fetcher.papers.insert(
            "a/p1".to_string(),
            PaperDocument {
                paper_id: "p1".to_string(),
                questions: [question("q1", "old"), question("q2", "only a")]
                    .into_iter()
                    .collect(),
            },
        );
        fetcher.papers.insert(
            "b/p1".to_string(),
            PaperDocument {
                paper_id: "p1".to_string(),
                questions: [question("q1", "new")].into_iter().collect(),
            },
        );
        let aggregator = aggregator(fetcher);
        let sources = [source("a"), source("b"), source("c")];

        let paper = aggregator.load_paper(&sources, "p1").await.unwrap().unwrap();
        assert_eq!(paper.questions.keys().collect::<Vec<_>>(), vec!["q1", "q2"]);
        assert_eq!(paper.questions["q1"].fields["stem"], "new");
        assert_eq!(
            paper.questions["q2"].source_url.as_deref(),
            Some("https://a.example.org")
        );

        assert!(aggregator
            .load_paper(&sources, "missing")
            .await
            .unwrap()
            .is_none());
    }
}
