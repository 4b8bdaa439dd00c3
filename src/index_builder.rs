use std::collections::HashSet;

use tracing::info;

use crate::{
    collection_db::DEFAULT_MAX_BATCH_SIZE,
    corpus::CleanPost,
    embedding::{DEFAULT_EMBED_BATCH_SIZE, Embedder, embed_in_batches},
    error::{Error, Result},
    vector_store::{
        CollectionInfo,
        DistanceMetric,
        IndexedEntry,
        PostMetadata,
        VectorStore,
    },
};

/// Name of the collection searched when none is given.
pub const DEFAULT_COLLECTION: &str = "posts";

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub collection: String,
    /// Texts per embedding call.
    pub embed_batch_size: usize,
    /// Entries per store insert; also capped by the store's own limit.
    pub insert_batch_size: usize,
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            insert_batch_size: DEFAULT_MAX_BATCH_SIZE,
            show_progress: false,
        }
    }
}

/// Summary of a completed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub collection: String,
    pub indexed: usize,
    pub dimension: Option<usize>,
}

/// Embed `posts` and write them as a fresh collection.
///
/// Ids are checked for uniqueness and all embeddings are computed before
/// the store is touched, so a duplicate id or a failed embedding run leaves
/// any existing collection as it was. The collection
/// is then dropped and recreated, and entries are inserted in chunks no
/// larger than the store accepts. Re-running on the same corpus yields an
/// equivalent collection.
pub fn build_index(
    posts: &[CleanPost],
    model: &mut dyn Embedder,
    store: &dyn VectorStore,
    options: &BuildOptions,
) -> Result<BuildReport> {
    let insert_batch_size = options.insert_batch_size.min(store.max_batch_size());
    if insert_batch_size == 0 {
        return Err(Error::Config("insert batch size must be at least 1".into()));
    }
    ensure_unique_ids(posts)?;

    info!(
        posts = posts.len(),
        model = model.model_id(),
        "embedding corpus"
    );
    let texts: Vec<String> = posts.iter().map(|p| p.text.clone()).collect();
    let embeddings = embed_in_batches(
        model,
        &texts,
        options.embed_batch_size,
        options.show_progress,
    )?;
    let dimension = embeddings.first().map(Vec::len);

    store.create_or_replace_collection(
        &options.collection,
        &CollectionInfo {
            metric: DistanceMetric::Cosine,
            model_id: model.model_id().to_string(),
            dimension,
        },
    )?;

    let mut indexed = 0;
    for (post_chunk, embedding_chunk) in posts
        .chunks(insert_batch_size)
        .zip(embeddings.chunks(insert_batch_size))
    {
        let entries: Vec<IndexedEntry> = post_chunk
            .iter()
            .zip(embedding_chunk)
            .map(|(post, embedding)| to_entry(post, embedding.clone()))
            .collect();
        store.insert(&options.collection, &entries)?;
        indexed += entries.len();
        info!(indexed, total = posts.len(), "indexed batch");
    }

    let count = store.count(&options.collection)?;
    info!(collection = %options.collection, count, "index build complete");

    Ok(BuildReport {
        collection: options.collection.clone(),
        indexed: count,
        dimension,
    })
}

fn ensure_unique_ids(posts: &[CleanPost]) -> Result<()> {
    let mut seen = HashSet::with_capacity(posts.len());
    for post in posts {
        if !seen.insert(post.id.as_str()) {
            return Err(Error::DuplicateId(post.id.clone()));
        }
    }
    Ok(())
}

fn to_entry(post: &CleanPost, embedding: Vec<f32>) -> IndexedEntry {
    IndexedEntry {
        id: post.id.clone(),
        embedding,
        text: post.text.clone(),
        metadata: PostMetadata {
            profile: post.profile.clone(),
            date: post.date.clone(),
            interaction_count: post.interaction_count,
            post_url: post.post_url.clone(),
            source_url: post.source_url.clone(),
        },
    }
}
