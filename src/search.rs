use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::{
    embedding::{Embedder, embed_query},
    error::{Error, Result},
    vector_store::{
        DistanceMetric,
        MetadataField,
        MetadataValue,
        PostMetadata,
        Predicate,
        VectorStore,
    },
};

/// Profile filter value meaning "any profile".
pub const ANY_PROFILE: &str = "*";

/// Candidates fetched per requested result when boosting by interactions.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 3;

/// Weight of semantic similarity in the hybrid score.
pub const SIMILARITY_WEIGHT: f32 = 0.7;

/// Weight of normalized interaction volume in the hybrid score.
pub const INTERACTION_WEIGHT: f32 = 0.3;

/// Parameters for a single search request.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub collection: String,
    pub top_k: usize,
    /// Restrict to one author. `None`, empty and [`ANY_PROFILE`] disable it.
    pub profile: Option<String>,
    /// Minimum interaction count. `None` or `0` disables the bound.
    pub min_interactions: Option<i64>,
    /// Re-rank candidates by a blend of similarity and interaction volume.
    pub boost_interactions: bool,
    /// How many candidates per result to fetch when boosting.
    pub overfetch_factor: usize,
}

impl SearchParams {
    pub fn new(query: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collection: collection.into(),
            top_k: 5,
            profile: None,
            min_interactions: None,
            boost_interactions: false,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

/// One ranked post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub text: String,
    pub metadata: PostMetadata,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_score: Option<f32>,
}

impl ScoredResult {
    /// The score results are ordered by.
    pub fn rank_score(&self) -> f32 {
        self.hybrid_score.unwrap_or(self.similarity)
    }
}

/// Compose the metadata filter for a search.
///
/// With both a profile and a positive interaction bound the result is their
/// conjunction; with one of them it is that single condition.
pub fn build_predicate(
    profile: Option<&str>,
    min_interactions: Option<i64>,
) -> Result<Predicate> {
    let mut predicate = Predicate::NoFilter;

    if let Some(profile) = profile
        && !profile.is_empty()
        && profile != ANY_PROFILE
    {
        predicate = predicate.and(Predicate::Equals(
            MetadataField::Profile,
            MetadataValue::Text(profile.to_string()),
        ));
    }

    match min_interactions {
        Some(n) if n < 0 => {
            return Err(Error::InvalidFilter(format!(
                "minimum interactions must not be negative, got {n}"
            )));
        }
        Some(n) if n > 0 => {
            predicate = predicate
                .and(Predicate::Gte(MetadataField::InteractionCount, n as u64));
        }
        _ => {}
    }

    Ok(predicate)
}

/// Number of candidates to request from the store.
pub fn fetch_count(top_k: usize, boost_interactions: bool, overfetch_factor: usize) -> usize {
    if boost_interactions {
        top_k.saturating_mul(overfetch_factor)
    } else {
        top_k
    }
}

/// Map a cosine distance in `[0, 2]` to a similarity in `[0, 1]`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

/// Blend similarity with interaction volume and re-sort.
///
/// Interaction counts are normalized by the largest count among the
/// candidates. When every candidate has zero interactions the ratio is
/// undefined and the similarity order is left untouched.
pub fn apply_interaction_boost(results: &mut [ScoredResult]) {
    let Some(max_interactions) =
        results.iter().map(|r| r.metadata.interaction_count).max()
    else {
        return;
    };
    if max_interactions == 0 {
        return;
    }

    for r in results.iter_mut() {
        let norm = r.metadata.interaction_count as f32 / max_interactions as f32;
        r.hybrid_score =
            Some(SIMILARITY_WEIGHT * r.similarity + INTERACTION_WEIGHT * norm);
    }

    results.sort_by(|a, b| {
        b.rank_score()
            .partial_cmp(&a.rank_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn validate(params: &SearchParams) -> Result<()> {
    if params.top_k == 0 {
        return Err(Error::InvalidFilter("top_k must be at least 1".into()));
    }
    if params.boost_interactions && params.overfetch_factor == 0 {
        return Err(Error::InvalidFilter(
            "overfetch factor must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Execute the retrieval and ranking pipeline.
///
/// 1. Validate parameters and build the metadata filter
/// 2. Check the collection was built with this model and cosine distance
/// 3. Embed the query and fetch nearest neighbours (over-fetching when boosting)
/// 4. Convert distances to similarities, optionally re-rank by interactions
/// 5. Truncate to `top_k`
///
/// An empty candidate set is an empty result, not an error.
pub fn execute_search(
    params: &SearchParams,
    store: &dyn VectorStore,
    model: &mut dyn Embedder,
) -> Result<Vec<ScoredResult>> {
    validate(params)?;
    let predicate =
        build_predicate(params.profile.as_deref(), params.min_interactions)?;

    let info = store.collection_info(&params.collection)?;
    if info.metric != DistanceMetric::Cosine {
        return Err(Error::IncompatibleIndex(format!(
            "collection '{}' does not use cosine distance",
            params.collection
        )));
    }
    if info.model_id != model.model_id() {
        return Err(Error::IncompatibleIndex(format!(
            "collection '{}' was built with model '{}', not '{}'",
            params.collection,
            info.model_id,
            model.model_id()
        )));
    }

    let query_embedding = embed_query(model, &params.query)?;
    if let Some(dimension) = info.dimension
        && dimension != query_embedding.len()
    {
        return Err(Error::Embedding(format!(
            "query embedding has {} dimensions, index has {dimension}",
            query_embedding.len()
        )));
    }

    let fetch_k = fetch_count(
        params.top_k,
        params.boost_interactions,
        params.overfetch_factor,
    );
    debug!(?predicate, fetch_k, "querying collection");

    let response =
        store.query(&params.collection, &query_embedding, fetch_k, &predicate)?;
    debug!(candidates = response.len(), "retrieved candidates");

    let mut results: Vec<ScoredResult> = response
        .documents
        .into_iter()
        .zip(response.metadatas)
        .zip(response.distances)
        .map(|((text, metadata), distance)| ScoredResult {
            text,
            metadata,
            similarity: distance_to_similarity(distance),
            hybrid_score: None,
        })
        .collect();

    if params.boost_interactions {
        apply_interaction_boost(&mut results);
    }

    results.truncate(params.top_k);
    Ok(results)
}

/// Distinct profiles present in a collection, sorted.
pub fn list_profiles(
    store: &dyn VectorStore,
    collection: &str,
) -> Result<BTreeSet<String>> {
    Ok(store
        .list_metadata(collection)?
        .into_iter()
        .map(|m| m.profile)
        .filter(|p| !p.is_empty())
        .collect())
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[ScoredResult], query: &str) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Query: {query}\n");
    for (i, r) in results.iter().enumerate() {
        let mut scores = format!("sim={:.3}", r.similarity);
        if let Some(hybrid) = r.hybrid_score {
            scores.push_str(&format!("  hybrid={hybrid:.3}"));
        }
        println!("--- #{} [{scores}] ---", i + 1);
        println!(
            "  {}  |  {}  |  {} interactions",
            r.metadata.profile, r.metadata.date, r.metadata.interaction_count
        );
        if !r.metadata.post_url.is_empty() {
            println!("  {}", r.metadata.post_url);
        }
        println!("  {}\n", truncate_chars(&r.text, 300));
    }
    println!("{} result(s)", results.len());
}

/// Format results as JSON output.
pub fn format_json(results: &[ScoredResult], query: &str) -> Result<()> {
    let out = serde_json::json!({
        "query": query,
        "result_count": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{
        CollectionInfo,
        InMemoryStore,
        IndexedEntry,
    };

    fn scored(similarity: f32, interactions: u64) -> ScoredResult {
        ScoredResult {
            text: format!("{similarity}"),
            metadata: PostMetadata {
                interaction_count: interactions,
                ..Default::default()
            },
            similarity,
            hybrid_score: None,
        }
    }

    /// Maps known texts to fixed vectors; anything else is [0, 0, 1].
    struct TableEmbedder {
        id: &'static str,
        table: Vec<(&'static str, Vec<f32>)>,
        calls: usize,
    }

    impl Embedder for TableEmbedder {
        fn model_id(&self) -> &str {
            self.id
        }

        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls += 1;
            Ok(texts
                .iter()
                .map(|t| {
                    self.table
                        .iter()
                        .find(|(k, _)| k == t)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
                })
                .collect())
        }
    }

    fn embedder() -> TableEmbedder {
        TableEmbedder {
            id: "table",
            table: vec![("climate", vec![1.0, 0.0, 0.0])],
            calls: 0,
        }
    }

    fn store_with(entries: Vec<(&str, Vec<f32>, &str, u64)>) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_or_replace_collection(
                "posts",
                &CollectionInfo {
                    metric: DistanceMetric::Cosine,
                    model_id: "table".to_string(),
                    dimension: Some(3),
                },
            )
            .unwrap();
        let entries: Vec<IndexedEntry> = entries
            .into_iter()
            .map(|(id, embedding, profile, n)| IndexedEntry {
                id: id.to_string(),
                embedding,
                text: id.to_string(),
                metadata: PostMetadata {
                    profile: profile.to_string(),
                    interaction_count: n,
                    ..Default::default()
                },
            })
            .collect();
        store.insert("posts", &entries).unwrap();
        store
    }

    fn params(top_k: usize) -> SearchParams {
        SearchParams {
            top_k,
            ..SearchParams::new("climate", "posts")
        }
    }

    #[test]
    fn predicate_composition() {
        assert_eq!(build_predicate(None, None).unwrap(), Predicate::NoFilter);
        assert_eq!(
            build_predicate(Some(ANY_PROFILE), Some(0)).unwrap(),
            Predicate::NoFilter
        );
        assert_eq!(build_predicate(Some(""), None).unwrap(), Predicate::NoFilter);

        let profile_only = build_predicate(Some("X"), None).unwrap();
        assert_eq!(
            profile_only,
            Predicate::Equals(MetadataField::Profile, MetadataValue::Text("X".into()))
        );

        let count_only = build_predicate(None, Some(100)).unwrap();
        assert_eq!(
            count_only,
            Predicate::Gte(MetadataField::InteractionCount, 100)
        );

        let both = build_predicate(Some("X"), Some(100)).unwrap();
        assert_eq!(both, Predicate::And(Box::new(profile_only), Box::new(count_only)));
    }

    #[test]
    fn negative_min_interactions_is_invalid() {
        assert!(matches!(
            build_predicate(None, Some(-1)),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn fetch_count_overfetches_only_when_boosting() {
        assert_eq!(fetch_count(5, false, 3), 5);
        assert_eq!(fetch_count(5, true, 3), 15);
        assert_eq!(fetch_count(5, true, 1), 5);
    }

    #[test]
    fn similarity_conversion() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert_eq!(distance_to_similarity(1.0), 0.5);
        assert_eq!(distance_to_similarity(2.0), 0.0);
    }

    #[test]
    fn hybrid_boost_reorders() {
        let mut results = vec![scored(0.9, 0), scored(0.85, 1000), scored(0.5, 2000)];
        apply_interaction_boost(&mut results);

        let hybrid: Vec<f32> = results.iter().map(|r| r.hybrid_score.unwrap()).collect();
        let expected = [0.745, 0.65, 0.63];
        for (h, e) in hybrid.iter().zip(expected) {
            assert!((h - e).abs() < 1e-5, "{h} != {e}");
        }
        let order: Vec<f32> = results.iter().map(|r| r.similarity).collect();
        assert_eq!(order, vec![0.85, 0.5, 0.9]);
    }

    #[test]
    fn hybrid_boost_skipped_without_interactions() {
        let mut results = vec![scored(0.9, 0), scored(0.8, 0), scored(0.1, 0)];
        apply_interaction_boost(&mut results);

        assert!(results.iter().all(|r| r.hybrid_score.is_none()));
        let order: Vec<f32> = results.iter().map(|r| r.similarity).collect();
        assert_eq!(order, vec![0.9, 0.8, 0.1]);
    }

    #[test]
    fn hybrid_boost_on_empty_is_noop() {
        let mut results: Vec<ScoredResult> = vec![];
        apply_interaction_boost(&mut results);
        assert!(results.is_empty());
    }

    #[test]
    fn search_returns_at_most_top_k_by_similarity() {
        let store = store_with(vec![
            ("exact", vec![1.0, 0.0, 0.0], "A", 0),
            ("close", vec![0.9, 0.1, 0.0], "A", 0),
            ("far", vec![0.0, 1.0, 0.0], "B", 0),
        ]);
        let results = execute_search(&params(2), &store, &mut embedder()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "exact");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].text, "close");
        assert!(results.iter().all(|r| r.hybrid_score.is_none()));
    }

    #[test]
    fn search_with_boost_promotes_popular_post() {
        let store = store_with(vec![
            ("exact", vec![1.0, 0.0, 0.0], "A", 0),
            ("close", vec![0.9, 0.1, 0.0], "A", 0),
            ("popular", vec![0.7, 0.7, 0.0], "B", 10_000),
        ]);
        let mut p = params(1);
        p.boost_interactions = true;

        let results = execute_search(&p, &store, &mut embedder()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "popular");
        assert!(results[0].hybrid_score.is_some());
    }

    #[test]
    fn search_applies_filters() {
        let store = store_with(vec![
            ("a1", vec![1.0, 0.0, 0.0], "A", 5),
            ("a2", vec![0.9, 0.1, 0.0], "A", 500),
            ("b1", vec![1.0, 0.0, 0.0], "B", 900),
        ]);
        let mut p = params(5);
        p.profile = Some("A".to_string());
        p.min_interactions = Some(100);

        let results = execute_search(&p, &store, &mut embedder()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "a2");
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let store = store_with(vec![("a1", vec![1.0, 0.0, 0.0], "A", 5)]);
        let mut p = params(5);
        p.profile = Some("Nobody".to_string());
        assert!(execute_search(&p, &store, &mut embedder()).unwrap().is_empty());
    }

    #[test]
    fn invalid_params_fail_before_embedding() {
        let store = store_with(vec![]);
        let mut model = embedder();

        let err = execute_search(&params(0), &store, &mut model).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));

        let mut p = params(3);
        p.min_interactions = Some(-10);
        let err = execute_search(&p, &store, &mut model).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));

        assert_eq!(model.calls, 0);
    }

    #[test]
    fn missing_collection_is_an_error() {
        let store = InMemoryStore::new();
        let err = execute_search(&params(3), &store, &mut embedder()).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "collection", .. }));
    }

    #[test]
    fn model_mismatch_is_rejected() {
        let store = store_with(vec![("a1", vec![1.0, 0.0, 0.0], "A", 5)]);
        let mut other = TableEmbedder {
            id: "other-model",
            ..embedder()
        };
        let err = execute_search(&params(3), &store, &mut other).unwrap_err();
        assert!(matches!(err, Error::IncompatibleIndex(_)));
        assert_eq!(other.calls, 0);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = store_with(vec![("a1", vec![1.0, 0.0, 0.0], "A", 5)]);
        let mut short = TableEmbedder {
            table: vec![("climate", vec![1.0, 0.0])],
            ..embedder()
        };
        let err = execute_search(&params(3), &store, &mut short).unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn list_profiles_is_sorted_and_distinct() {
        let store = store_with(vec![
            ("1", vec![1.0, 0.0, 0.0], "Zed", 0),
            ("2", vec![1.0, 0.0, 0.0], "Amy", 0),
            ("3", vec![1.0, 0.0, 0.0], "Zed", 0),
        ]);
        let profiles: Vec<String> =
            list_profiles(&store, "posts").unwrap().into_iter().collect();
        assert_eq!(profiles, vec!["Amy", "Zed"]);
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("æøå", 2), "æø...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
