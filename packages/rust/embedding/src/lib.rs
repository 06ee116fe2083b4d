//! Text chunking and the remote embedding client adapter.
//!
//! This crate provides:
//! - [`chunker`] — token-bounded splitting along paragraph/sentence/word boundaries
//! - [`EmbeddingClient`] — remote embedding calls, averaging per-chunk vectors
//!   component-wise for oversized documents

pub mod chunker;
pub mod client;

pub use chunker::{chunk_text, estimate_tokens, truncate_to_estimate};
pub use client::{EmbeddingClient, HARD_TOKEN_CEILING, SOFT_TOKEN_LIMIT, average_vectors};
