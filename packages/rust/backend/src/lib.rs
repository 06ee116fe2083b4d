//! Remote crawl backend client, asynchronous task polling, and response
//! shapes.
//!
//! This crate provides:
//! - [`BackendClient`] — `POST /crawl`, `GET /task/{id}`, `GET /health`
//! - [`poller`] — bounded polling with fixed inter-attempt delay
//! - [`response`] — wire types and the ordered content-field resolver

pub mod client;
pub mod poller;
pub mod response;

pub use client::BackendClient;
pub use poller::{TaskState, poll_until_done};
pub use response::{
    CrawlRequestBody, CrawlResponse, LinkEntry, LinkSet, MarkdownField, RemoteResult,
    TaskStatusResponse, raw_variant, resolve_content,
};
