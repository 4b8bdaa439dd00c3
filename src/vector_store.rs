use std::{collections::HashMap, sync::RwLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata stored alongside every indexed post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    pub profile: String,
    pub date: String,
    pub interaction_count: u64,
    pub post_url: String,
    pub source_url: String,
}

/// Fields a [`Predicate`] can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Profile,
    Date,
    InteractionCount,
    PostUrl,
    SourceUrl,
}

/// A comparable metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    Integer(u64),
}

impl PostMetadata {
    pub fn get(&self, field: MetadataField) -> MetadataValue {
        match field {
            MetadataField::Profile => MetadataValue::Text(self.profile.clone()),
            MetadataField::Date => MetadataValue::Text(self.date.clone()),
            MetadataField::InteractionCount => {
                MetadataValue::Integer(self.interaction_count)
            }
            MetadataField::PostUrl => MetadataValue::Text(self.post_url.clone()),
            MetadataField::SourceUrl => {
                MetadataValue::Text(self.source_url.clone())
            }
        }
    }
}

/// Metadata filter applied by the store before ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Unrestricted retrieval.
    NoFilter,
    Equals(MetadataField, MetadataValue),
    /// Integer field greater than or equal to the bound.
    Gte(MetadataField, u64),
    And(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Conjoin two predicates, dropping `NoFilter` sides so a single
    /// condition is never wrapped in a redundant conjunction.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::NoFilter, p) | (p, Predicate::NoFilter) => p,
            (a, b) => Predicate::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn matches(&self, metadata: &PostMetadata) -> bool {
        match self {
            Predicate::NoFilter => true,
            Predicate::Equals(field, value) => metadata.get(*field) == *value,
            Predicate::Gte(field, bound) => match metadata.get(*field) {
                MetadataValue::Integer(n) => n >= *bound,
                MetadataValue::Text(_) => false,
            },
            Predicate::And(a, b) => a.matches(metadata) && b.matches(metadata),
        }
    }
}

/// Distance function a collection ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in `[0, 2]`.
    Cosine,
}

/// Facts recorded when a collection is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub metric: DistanceMetric,
    pub model_id: String,
    /// `None` for an empty collection.
    pub dimension: Option<usize>,
}

/// The persisted unit: one embedded post.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: PostMetadata,
}

/// Nearest neighbours in ascending distance order, as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub documents: Vec<String>,
    pub metadatas: Vec<PostMetadata>,
    pub distances: Vec<f32>,
}

impl QueryResponse {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// A persistent store of embedded posts grouped into named collections.
pub trait VectorStore {
    /// Drop any collection with this name and create an empty one.
    fn create_or_replace_collection(
        &self,
        name: &str,
        info: &CollectionInfo,
    ) -> Result<()>;

    /// Largest number of entries accepted by a single `insert` call.
    fn max_batch_size(&self) -> usize;

    /// Add entries. Fails if any id already exists in the collection.
    fn insert(&self, collection: &str, entries: &[IndexedEntry]) -> Result<()>;

    /// Return up to `k` entries matching `predicate`, nearest first.
    fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        predicate: &Predicate,
    ) -> Result<QueryResponse>;

    fn count(&self, collection: &str) -> Result<usize>;

    fn collection_info(&self, collection: &str) -> Result<CollectionInfo>;

    /// Metadata of every entry in the collection.
    fn list_metadata(&self, collection: &str) -> Result<Vec<PostMetadata>>;
}

/// Cosine distance `1 - cos(a, b)`. Zero vectors are treated as orthogonal.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 2.0)
}

/// Exact nearest-neighbour ranking over a candidate set.
///
/// Candidates failing the predicate are skipped; the rest are sorted by
/// ascending cosine distance and truncated to `k`.
pub(crate) fn rank_exact<'a, I>(
    query: &[f32],
    candidates: I,
    k: usize,
    predicate: &Predicate,
) -> QueryResponse
where
    I: IntoIterator<Item = (&'a [f32], &'a str, &'a PostMetadata)>,
{
    let filtered: Vec<_> = candidates
        .into_iter()
        .filter(|(_, _, meta)| predicate.matches(meta))
        .collect();

    let mut scored: Vec<(f32, &str, &PostMetadata)> = filtered
        .par_iter()
        .map(|&(embedding, text, meta)| {
            (cosine_distance(query, embedding), text, meta)
        })
        .collect();

    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);

    let mut response = QueryResponse::default();
    for (distance, text, meta) in scored {
        response.documents.push(text.to_string());
        response.metadatas.push(meta.clone());
        response.distances.push(distance);
    }
    response
}

#[derive(Debug)]
struct MemoryCollection {
    info: CollectionInfo,
    entries: Vec<IndexedEntry>,
}

/// Non-persistent [`VectorStore`] kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    max_batch_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_max_batch_size(usize::MAX)
    }

    /// Limit the number of entries per insert, to mimic backends that cap it.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_batch_size,
        }
    }

    fn missing(name: &str) -> Error {
        Error::NotFound {
            kind: "collection",
            name: name.to_string(),
        }
    }

    fn poisoned() -> Error {
        Error::Config("in-memory store lock poisoned".to_string())
    }
}

impl VectorStore for InMemoryStore {
    fn create_or_replace_collection(
        &self,
        name: &str,
        info: &CollectionInfo,
    ) -> Result<()> {
        let mut collections =
            self.collections.write().map_err(|_| Self::poisoned())?;
        collections.insert(
            name.to_string(),
            MemoryCollection {
                info: info.clone(),
                entries: Vec::new(),
            },
        );
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn insert(&self, collection: &str, entries: &[IndexedEntry]) -> Result<()> {
        if entries.len() > self.max_batch_size {
            return Err(Error::Config(format!(
                "batch of {} exceeds the limit of {}",
                entries.len(),
                self.max_batch_size
            )));
        }

        let mut collections =
            self.collections.write().map_err(|_| Self::poisoned())?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        for (i, entry) in entries.iter().enumerate() {
            let clashes = target.entries.iter().any(|e| e.id == entry.id)
                || entries[..i].iter().any(|e| e.id == entry.id);
            if clashes {
                return Err(Error::DuplicateId(entry.id.clone()));
            }
        }
        target.entries.extend_from_slice(entries);
        Ok(())
    }

    fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        predicate: &Predicate,
    ) -> Result<QueryResponse> {
        let collections =
            self.collections.read().map_err(|_| Self::poisoned())?;
        let target = collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        Ok(rank_exact(
            embedding,
            target.entries.iter().map(|e| {
                (e.embedding.as_slice(), e.text.as_str(), &e.metadata)
            }),
            k,
            predicate,
        ))
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let collections =
            self.collections.read().map_err(|_| Self::poisoned())?;
        collections
            .get(collection)
            .map(|c| c.entries.len())
            .ok_or_else(|| Self::missing(collection))
    }

    fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let collections =
            self.collections.read().map_err(|_| Self::poisoned())?;
        collections
            .get(collection)
            .map(|c| c.info.clone())
            .ok_or_else(|| Self::missing(collection))
    }

    fn list_metadata(&self, collection: &str) -> Result<Vec<PostMetadata>> {
        let collections =
            self.collections.read().map_err(|_| Self::poisoned())?;
        collections
            .get(collection)
            .map(|c| c.entries.iter().map(|e| e.metadata.clone()).collect())
            .ok_or_else(|| Self::missing(collection))
    }
}
