//! Shared types, error model, events, and configuration for siteharvest.
//!
//! This crate is the foundation depended on by all other siteharvest crates.
//! It provides:
//! - [`HarvestError`] — the unified error type
//! - Domain types ([`CrawlRequest`], [`PageRecord`], [`CrawlSummary`], [`RunId`])
//! - The per-orchestrator observer surface ([`EventBus`], [`ProgressEvent`])
//! - Configuration ([`AppConfig`], [`CrawlerConfig`], config loading)

pub mod config;
pub mod error;
pub mod events;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendConfig, CrawlPolicyConfig, CrawlerConfig, EmbeddingConfig,
    apply_env_overrides, config_dir, config_file_path, credential, init_config, load_config,
    load_config_from,
};
pub use error::{HarvestError, Result};
pub use events::{EventBus, EventKind, ProgressEvent, SubscriptionId};
pub use types::{
    CrawlMode, CrawlRequest, CrawlStatus, CrawlSummary, PageMetadata, PageRecord, PageStatus,
    RunId, content_hash,
};
