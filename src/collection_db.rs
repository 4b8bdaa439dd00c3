use std::path::Path;

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};

use crate::{
    error::{Error, Result},
    vector_store::{
        CollectionInfo,
        IndexedEntry,
        PostMetadata,
        Predicate,
        QueryResponse,
        VectorStore,
        rank_exact,
    },
};

/// Collection name -> JSON-encoded [`CollectionInfo`].
const COLLECTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("collections");

/// Header size: 4 bytes embedding dimension.
const HEADER_SIZE: usize = 4;

/// Default cap on entries written per transaction.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 5000;

/// Per-collection table names.
struct CollectionTables {
    vectors: String,
    documents: String,
    metadata: String,
}

impl CollectionTables {
    fn new(name: &str) -> Self {
        Self {
            vectors: format!("{name}/vectors"),
            documents: format!("{name}/documents"),
            metadata: format!("{name}/metadata"),
        }
    }

    fn vectors(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.vectors)
    }

    fn documents(&self) -> TableDefinition<'_, &'static str, &'static str> {
        TableDefinition::new(&self.documents)
    }

    fn metadata(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.metadata)
    }
}

/// Persistent [`VectorStore`] in a single redb file.
///
/// Each collection owns three tables keyed by entry id: the embedding, the
/// post text and its JSON metadata. Embeddings are stored as
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 values in native byte order (a `bytemuck` cast)
///
/// Queries scan the collection exactly; there is no approximate index.
pub struct CollectionDb {
    db: Database,
    max_batch_size: usize,
}

impl CollectionDb {
    /// Open or create a collection database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use postseek::CollectionDb;
    ///
    /// let db = CollectionDb::open(&tmp.path().join("index.redb")).unwrap();
    /// assert!(db.list_collections().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(COLLECTIONS)?;
        txn.commit()?;

        Ok(Self {
            db,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        })
    }

    /// Override the per-insert entry cap.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Names of all collections in the database.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }

    fn ensure_exists(&self, name: &str) -> Result<CollectionInfo> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let Some(guard) = table.get(name)? else {
            return Err(Error::NotFound {
                kind: "collection",
                name: name.to_string(),
            });
        };
        Ok(serde_json::from_slice(guard.value())?)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + embedding.len() * 4);
    bytes.extend_from_slice(&(embedding.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(embedding));
    bytes
}

/// Returns `None` if the header and payload length disagree.
fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }
    Some(bytemuck::pod_collect_to_vec(payload))
}

impl VectorStore for CollectionDb {
    fn create_or_replace_collection(
        &self,
        name: &str,
        info: &CollectionInfo,
    ) -> Result<()> {
        let tables = CollectionTables::new(name);
        let encoded = serde_json::to_vec(info)?;

        let txn = self.db.begin_write()?;
        txn.delete_table(tables.vectors())?;
        txn.delete_table(tables.documents())?;
        txn.delete_table(tables.metadata())?;
        txn.open_table(tables.vectors())?;
        txn.open_table(tables.documents())?;
        txn.open_table(tables.metadata())?;
        {
            let mut collections = txn.open_table(COLLECTIONS)?;
            collections.insert(name, encoded.as_slice())?;
        }
        txn.commit()?;
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
        self.ensure_exists(collection)?;
        if entries.is_empty() {
            return Ok(());
        }

        let tables = CollectionTables::new(collection);
        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(tables.vectors())?;
            let mut documents = txn.open_table(tables.documents())?;
            let mut metadata = txn.open_table(tables.metadata())?;

            for entry in entries {
                let id = entry.id.as_str();
                if vectors.get(id)?.is_some() {
                    // Dropping the transaction without commit discards
                    // everything written so far in this batch.
                    return Err(Error::DuplicateId(entry.id.clone()));
                }
                let meta = serde_json::to_vec(&entry.metadata)?;
                vectors.insert(id, encode_embedding(&entry.embedding).as_slice())?;
                documents.insert(id, entry.text.as_str())?;
                metadata.insert(id, meta.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        predicate: &Predicate,
    ) -> Result<QueryResponse> {
        self.ensure_exists(collection)?;

        let tables = CollectionTables::new(collection);
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(tables.vectors())?;
        let documents = txn.open_table(tables.documents())?;
        let metadata = txn.open_table(tables.metadata())?;

        // Filter on metadata first so only matching vectors are decoded.
        let mut candidates: Vec<(Vec<f32>, String, PostMetadata)> = Vec::new();
        for entry in metadata.iter()? {
            let (id, meta_bytes) = entry?;
            let meta: PostMetadata = serde_json::from_slice(meta_bytes.value())?;
            if !predicate.matches(&meta) {
                continue;
            }
            let id = id.value();
            let vector = vectors
                .get(id)?
                .and_then(|guard| decode_embedding(guard.value()))
                .ok_or_else(|| {
                    Error::Config(format!("corrupt embedding for entry {id}"))
                })?;
            let text = documents
                .get(id)?
                .map(|guard| guard.value().to_string())
                .unwrap_or_default();
            candidates.push((vector, text, meta));
        }

        Ok(rank_exact(
            embedding,
            candidates
                .iter()
                .map(|(v, t, m)| (v.as_slice(), t.as_str(), m)),
            k,
            &Predicate::NoFilter,
        ))
    }

    fn count(&self, collection: &str) -> Result<usize> {
        self.ensure_exists(collection)?;
        let tables = CollectionTables::new(collection);
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(tables.vectors())?;
        Ok(vectors.len()? as usize)
    }

    fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        self.ensure_exists(collection)
    }

    fn list_metadata(&self, collection: &str) -> Result<Vec<PostMetadata>> {
        self.ensure_exists(collection)?;
        let tables = CollectionTables::new(collection);
        let txn = self.db.begin_read()?;
        let metadata = txn.open_table(tables.metadata())?;
        let mut result = Vec::new();
        for entry in metadata.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for CollectionDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionDb")
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}
