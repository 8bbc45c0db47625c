//! # Vector Store
//!
//! Append-only, file-persisted similarity index for document chunks.
//!
//! ```text
//! chunks ──> embeddings ──> VectorIndex::add ──> <base>.vec + <base>.meta.json
//!                                  │
//!                         query ──> search(k) ──> ranked SearchHit list
//! ```
//!
//! Vectors are expected to be unit-normalized, so inner product equals
//! cosine similarity. The index never updates or deletes records in place.

mod codec;
mod error;
mod index;
mod metadata;

pub use error::{Result, VectorStoreError};
pub use index::{l2_normalize, IndexPaths, VectorIndex};
pub use metadata::{SearchHit, VectorMetadata};
