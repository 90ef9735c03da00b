//! The document-scoped vector index.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use apiq_embeddings::{Embedding, rank_top_k, to_unit_score};
use apiq_spec_parser::Chunk;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::record::{
    DocumentRecord, IndexStats, IndexedChunk, QueryFilter, RetrievedMatch, StoredDocument,
};
use crate::storage::DocumentStore;

/// Vector index over API operation chunks.
///
/// Cloning is cheap and shares the same index. Readers take a shared lock and
/// never block each other. Writers to one document are serialized; writers to
/// different documents persist concurrently and only contend on the in-memory
/// swap. Every write commits on a spawned task, so dropping the caller's
/// future never leaves a half-applied write.
#[derive(Clone)]
pub struct VectorIndex {
    inner: Arc<Inner>,
}

struct Inner {
    dimension: usize,
    store: Option<DocumentStore>,
    state: RwLock<State>,
    doc_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct State {
    /// Keyed by chunk id.
    chunks: HashMap<String, IndexedChunk>,
    /// Keyed by doc id.
    documents: HashMap<String, DocumentRecord>,
}

impl VectorIndex {
    /// Open a persistent index rooted at `dir`, loading any saved documents.
    pub async fn open(dir: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let store = DocumentStore::open(dir).await?;
        let loaded = store.load_all().await?;

        let mut state = State::default();
        let mut next_seq = 0;
        for stored in loaded {
            for indexed in &stored.chunks {
                if indexed.vector.len() != dimension {
                    return Err(IndexError::DimensionMismatch {
                        id: indexed.chunk.chunk_id.clone(),
                        expected: dimension,
                        actual: indexed.vector.len(),
                    });
                }
                next_seq = next_seq.max(indexed.seq + 1);
            }
            state.insert(stored);
        }

        info!(
            root = %store.root().display(),
            documents = state.documents.len(),
            chunks = state.chunks.len(),
            "opened vector index"
        );
        Ok(Self::from_parts(dimension, Some(store), state, next_seq))
    }

    /// A non-persistent index.
    pub fn in_memory(dimension: usize) -> Self {
        Self::from_parts(dimension, None, State::default(), 0)
    }

    fn from_parts(dimension: usize, store: Option<DocumentStore>, state: State, next_seq: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                dimension,
                store,
                state: RwLock::new(state),
                doc_locks: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(next_seq),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.store.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    /// Replace `document`'s chunk set with `entries`, all or nothing.
    ///
    /// The batch is validated before anything is written: every vector must
    /// match the index dimension and every chunk must belong to `document`.
    /// Returns the stored record with `chunk_ids` filled in.
    pub async fn upsert(
        &self,
        mut document: DocumentRecord,
        entries: Vec<(Chunk, Embedding)>,
    ) -> Result<DocumentRecord> {
        self.ensure_open()?;

        let mut seen = HashSet::new();
        for (chunk, vector) in &entries {
            if vector.len() != self.inner.dimension {
                return Err(IndexError::DimensionMismatch {
                    id: chunk.chunk_id.clone(),
                    expected: self.inner.dimension,
                    actual: vector.len(),
                });
            }
            if chunk.doc_id != document.doc_id {
                return Err(IndexError::DocumentMismatch {
                    chunk_id: chunk.chunk_id.clone(),
                    expected: document.doc_id.clone(),
                    actual: chunk.doc_id.clone(),
                });
            }
            if !seen.insert(chunk.chunk_id.as_str()) {
                return Err(IndexError::DuplicateChunk(chunk.chunk_id.clone()));
            }
        }
        document.chunk_ids = entries.iter().map(|(c, _)| c.chunk_id.clone()).collect();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.commit_upsert(document, entries).await })
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?
    }

    /// Remove every chunk owned by `doc_id`. Returns how many were removed;
    /// an unknown id removes nothing.
    pub async fn delete(&self, doc_id: &str) -> Result<usize> {
        self.ensure_open()?;

        let inner = Arc::clone(&self.inner);
        let doc_id = doc_id.to_string();
        tokio::spawn(async move { inner.commit_delete(&doc_id).await })
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?
    }

    /// Top `top_k` chunks by descending cosine similarity; ties go to the
    /// earliest inserted.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<RetrievedMatch>> {
        self.ensure_open()?;
        if vector.len() != self.inner.dimension {
            return Err(IndexError::DimensionMismatch {
                id: "query".to_string(),
                expected: self.inner.dimension,
                actual: vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let default_filter = QueryFilter::default();
        let filter = filter.unwrap_or(&default_filter);
        // Unit scores clamp negatives to zero, so a zero floor admits all.
        let min_cosine = if filter.min_score > 0.0 {
            filter.min_score
        } else {
            f32::NEG_INFINITY
        };

        let state = self.inner.state.read().await;
        let mut candidates: Vec<&IndexedChunk> = state
            .chunks
            .values()
            .filter(|indexed| filter.admits(&indexed.chunk))
            .collect();
        candidates.sort_by_key(|indexed| indexed.seq);

        let ranked = rank_top_k(
            vector,
            candidates
                .iter()
                .map(|indexed| (indexed.chunk.chunk_id.as_str(), indexed.vector.as_slice())),
            top_k,
            min_cosine,
        )?;

        let matches: Vec<RetrievedMatch> = ranked
            .into_iter()
            .filter_map(|hit| {
                let indexed = state.chunks.get(&hit.id)?;
                let document = state.documents.get(&indexed.chunk.doc_id)?;
                Some(RetrievedMatch {
                    chunk_id: hit.id,
                    doc_id: document.doc_id.clone(),
                    document_name: document.name.clone(),
                    doc_type: document.source_type,
                    base_url: document.base_url.clone(),
                    similarity_score: to_unit_score(hit.score),
                    text: indexed.chunk.text.clone(),
                    metadata: indexed.chunk.metadata.clone(),
                })
            })
            .collect();

        debug!(candidates = candidates.len(), matches = matches.len(), "index query");
        Ok(matches)
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.inner.state.read().await;
        let mut document_types = BTreeMap::new();
        for document in state.documents.values() {
            *document_types.entry(document.source_type).or_insert(0) += 1;
        }
        IndexStats {
            total_chunks: state.chunks.len(),
            unique_documents: state.documents.len(),
            document_types,
        }
    }

    /// Look up a document record.
    pub async fn document(&self, doc_id: &str) -> Result<DocumentRecord> {
        self.inner
            .state
            .read()
            .await
            .documents
            .get(doc_id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(doc_id.to_string()))
    }

    /// All document records, most recently indexed first.
    pub async fn documents(&self) -> Vec<DocumentRecord> {
        let state = self.inner.state.read().await;
        let mut documents: Vec<DocumentRecord> = state.documents.values().cloned().collect();
        documents.sort_by(|a, b| {
            b.indexed_at
                .cmp(&a.indexed_at)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        documents
    }

    /// A document's chunks in operation order.
    pub async fn chunks_for(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let state = self.inner.state.read().await;
        let document = state
            .documents
            .get(doc_id)
            .ok_or_else(|| IndexError::NotFound(doc_id.to_string()))?;
        Ok(document
            .chunk_ids
            .iter()
            .filter_map(|id| state.chunks.get(id))
            .map(|indexed| indexed.chunk.clone())
            .collect())
    }

    /// Delete every document.
    pub async fn clear(&self) -> Result<usize> {
        self.ensure_open()?;
        let doc_ids: Vec<String> = self
            .inner
            .state
            .read()
            .await
            .documents
            .keys()
            .cloned()
            .collect();

        let mut removed = 0;
        for doc_id in &doc_ids {
            removed += self.delete(doc_id).await?;
        }
        info!(documents = doc_ids.len(), chunks = removed, "cleared vector index");
        Ok(removed)
    }

    /// Wait until no write is in flight. Commits persist before they return,
    /// so nothing else is buffered.
    pub async fn flush(&self) -> Result<()> {
        let locks: Vec<Arc<Mutex<()>>> =
            self.inner.doc_locks.lock().await.values().cloned().collect();
        for lock in locks {
            drop(lock.lock().await);
        }
        Ok(())
    }

    /// Flush and reject further operations.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush().await?;
        info!("closed vector index");
        Ok(())
    }
}

impl Inner {
    async fn doc_lock(&self, doc_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.doc_locks.lock().await;
        Arc::clone(locks.entry(doc_id.to_string()).or_default())
    }

    /// Forget `doc_id`'s lock once nobody else holds or waits on it.
    async fn release_doc_lock(&self, doc_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.doc_locks.lock().await;
        let registered = locks.get(doc_id).is_some_and(|l| Arc::ptr_eq(l, &lock));
        // One reference in the map, one here.
        if registered && Arc::strong_count(&lock) == 2 {
            locks.remove(doc_id);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    async fn commit_upsert(
        &self,
        document: DocumentRecord,
        entries: Vec<(Chunk, Embedding)>,
    ) -> Result<DocumentRecord> {
        let doc_id = document.doc_id.clone();
        let lock = self.doc_lock(&doc_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.upsert_locked(document, entries).await
        };
        self.release_doc_lock(&doc_id, lock).await;
        result
    }

    async fn upsert_locked(
        &self,
        document: DocumentRecord,
        entries: Vec<(Chunk, Embedding)>,
    ) -> Result<DocumentRecord> {
        // `close` may have run since the caller's check.
        self.ensure_open()?;

        // Re-upserted chunks keep their original position for tie-breaks.
        let previous: HashMap<String, u64> = {
            let state = self.state.read().await;
            entries
                .iter()
                .filter_map(|(chunk, _)| {
                    state
                        .chunks
                        .get(&chunk.chunk_id)
                        .filter(|indexed| indexed.chunk.doc_id == document.doc_id)
                        .map(|indexed| (chunk.chunk_id.clone(), indexed.seq))
                })
                .collect()
        };

        let chunks = entries
            .into_iter()
            .map(|(chunk, vector)| IndexedChunk {
                seq: previous
                    .get(&chunk.chunk_id)
                    .copied()
                    .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed)),
                chunk,
                vector,
            })
            .collect();
        let stored = StoredDocument { document, chunks };

        if let Some(store) = &self.store {
            store.write(&stored).await?;
        }

        let record = stored.document.clone();
        let chunk_count = stored.chunks.len();
        {
            let mut state = self.state.write().await;
            state.remove(&record.doc_id);
            state.insert(stored);
        }

        info!(doc_id = %record.doc_id, chunks = chunk_count, "committed document");
        Ok(record)
    }

    async fn commit_delete(&self, doc_id: &str) -> Result<usize> {
        let lock = self.doc_lock(doc_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.delete_locked(doc_id).await
        };
        self.release_doc_lock(doc_id, lock).await;
        result
    }

    async fn delete_locked(&self, doc_id: &str) -> Result<usize> {
        self.ensure_open()?;

        if !self.state.read().await.documents.contains_key(doc_id) {
            debug!(doc_id, "delete of unknown document");
            return Ok(0);
        }

        if let Some(store) = &self.store {
            store.remove(doc_id).await?;
        }
        let removed = self.state.write().await.remove(doc_id);

        info!(doc_id, chunks = removed, "deleted document");
        Ok(removed)
    }
}

impl State {
    fn insert(&mut self, stored: StoredDocument) {
        for indexed in stored.chunks {
            self.chunks.insert(indexed.chunk.chunk_id.clone(), indexed);
        }
        self.documents
            .insert(stored.document.doc_id.clone(), stored.document);
    }

    /// Drop a document and its chunks, returning the chunk count.
    fn remove(&mut self, doc_id: &str) -> usize {
        let Some(document) = self.documents.remove(doc_id) else {
            return 0;
        };
        document
            .chunk_ids
            .iter()
            .filter(|id| self.chunks.remove(id.as_str()).is_some())
            .count()
    }
}
