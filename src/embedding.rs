use kdam::{BarExt, tqdm};

use crate::error::{Error, Result};

/// Number of texts embedded per model call during index builds.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 256;

/// A text embedding model.
///
/// Implementations must be deterministic for a given model version and
/// return vectors of the same dimensionality on every call. The index and
/// the queries against it must be embedded by the same model.
pub trait Embedder {
    /// Identifier of the model, recorded with every index it builds.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`.
///
/// Batching only bounds memory: the output is identical to embedding
/// everything in one call. Any failing batch aborts the whole run, as does
/// a batch with the wrong number of vectors or a vector whose dimension
/// differs from the first one.
pub fn embed_in_batches(
    model: &mut dyn Embedder,
    texts: &[String],
    batch_size: usize,
    show_progress: bool,
) -> Result<Vec<Vec<f32>>> {
    if batch_size == 0 {
        return Err(Error::Config("embedding batch size must be at least 1".into()));
    }

    let mut pb = tqdm!(
        total = texts.len(),
        desc = "Embedding",
        disable = !show_progress
    );

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    let mut dimension = None;

    for batch in texts.chunks(batch_size) {
        let embedded = model.embed(batch)?;
        if embedded.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "model returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }

        for vector in &embedded {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.len() != expected || expected == 0 {
                return Err(Error::Embedding(format!(
                    "inconsistent embedding dimension: expected {expected}, got {}",
                    vector.len()
                )));
            }
        }

        vectors.extend(embedded);
        pb.update(batch.len())?;
    }

    if show_progress {
        pb.refresh()?;
        eprintln!();
    }

    Ok(vectors)
}

/// Embed a single query string.
pub fn embed_query(model: &mut dyn Embedder, query: &str) -> Result<Vec<f32>> {
    model
        .embed(&[query.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("model returned no vector for the query".into()))
}
