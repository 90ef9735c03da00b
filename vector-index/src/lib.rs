//! # Vector Index
//!
//! Stores chunk vectors grouped by owning document and answers cosine
//! similarity queries across all of them.
//!
//! ```text
//!            upsert(doc, chunks+vectors)        query(vector, k, filter)
//!                     │                                   │
//!                     ▼                                   ▼
//!   ┌──────────────────────────────┐        ┌──────────────────────────┐
//!   │ per-document mutex           │        │ shared read lock         │
//!   │  → persist {doc}.json (tmp)  │        │  → filter → rank by cos  │
//!   │  → swap under write lock     │        │  → ties by insertion seq │
//!   └──────────────────────────────┘        └──────────────────────────┘
//!                     │
//!          chunks: chunk_id → IndexedChunk
//!          documents: doc_id → DocumentRecord
//! ```
//!
//! A document and its chunks live in one file, so no chunk can outlive its
//! document on disk or in memory.

pub mod error;
pub mod index;
pub mod record;
mod storage;

pub use error::{IndexError, Result, StorageError};
pub use index::VectorIndex;
pub use record::{
    DocumentRecord, IndexStats, IndexedChunk, QueryFilter, RetrievedMatch, StoredDocument,
};
