//! Core domain types for siteharvest crawl runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// CrawlRequest
// ---------------------------------------------------------------------------

/// How much of the site to cover, starting from the seed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Crawl the seed address only.
    SinglePage,
    /// Discover, prioritize, and crawl the whole site in batches.
    SmartSite,
}

/// Immutable input to one orchestration run.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// The starting address supplied by the caller.
    pub seed_address: url::Url,
    /// Single-page or whole-site mode.
    pub mode: CrawlMode,
}

impl CrawlRequest {
    /// Single-page request for `seed`.
    pub fn single_page(seed: url::Url) -> Self {
        Self {
            seed_address: seed,
            mode: CrawlMode::SinglePage,
        }
    }

    /// Whole-site request starting at `seed`.
    pub fn smart_site(seed: url::Url) -> Self {
        Self {
            seed_address: seed,
            mode: CrawlMode::SmartSite,
        }
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// Terminal outcome for one crawled address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Completed,
    Failed,
}

impl PageStatus {
    /// Storage key for the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown page status: {other}")),
        }
    }
}

/// Content-derived metadata stored alongside each page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Page title, when the backend surfaced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// SHA-256 hash of the extracted content.
    pub content_hash: String,
    /// Extracted content length in bytes.
    pub content_len: usize,
}

/// One finished page, produced once per crawled address and immutable after
/// creation. Owned by the orchestrator until handed to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Unique record identifier (UUID v7).
    pub id: String,
    /// The crawled address.
    pub address: String,
    /// Position of the address in the prioritized list; part of the storage key.
    pub sequence_number: u32,
    /// Best extracted content (see the backend content-field hierarchy).
    pub content: String,
    /// Rawer content variant kept for reprocessing, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Internal links the backend reported on this page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links_found: Vec<String>,
    /// Semantic embedding of `content`; absent when embedding was skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Content-derived metadata.
    pub metadata: PageMetadata,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When crawling of this address finished (success or failure).
    pub completed_at: DateTime<Utc>,
    /// Terminal outcome.
    pub status: PageStatus,
    /// Failure description when `status` is [`PageStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageRecord {
    /// Build a completed record, hashing the content for change detection.
    pub fn completed(
        address: impl Into<String>,
        sequence_number: u32,
        content: String,
        raw_content: Option<String>,
        links_found: Vec<String>,
        title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let metadata = PageMetadata {
            title,
            content_hash: content_hash(&content),
            content_len: content.len(),
        };
        Self {
            id: Uuid::now_v7().to_string(),
            address: address.into(),
            sequence_number,
            content,
            raw_content,
            links_found,
            embedding: None,
            metadata,
            created_at: now,
            completed_at: now,
            status: PageStatus::Completed,
            error: None,
        }
    }

    /// Build a failed record carrying the error description.
    pub fn failed(address: impl Into<String>, sequence_number: u32, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            address: address.into(),
            sequence_number,
            content: String::new(),
            raw_content: None,
            links_found: Vec::new(),
            embedding: None,
            metadata: PageMetadata::default(),
            created_at: now,
            completed_at: now,
            status: PageStatus::Failed,
            error: Some(error.into()),
        }
    }

    /// Attach an embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Compute the SHA-256 hash of page content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// CrawlStatus / CrawlSummary
// ---------------------------------------------------------------------------

/// Orchestrator state machine: Idle → Discovering → Crawling → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Idle,
    Discovering,
    Crawling,
    Completed,
    Failed,
    Cancelled,
}

impl CrawlStatus {
    /// Whether this status ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Crawling => "crawling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Aggregate view over all records of one run. UI-facing only; individual
/// pages are persisted separately, so the summary carries no bulk content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// The run this summary aggregates.
    pub run_id: RunId,
    /// The seed address the run started from.
    pub seed_address: String,
    /// Terminal status of the run.
    pub status: CrawlStatus,
    /// Addresses attempted (completed + failed).
    pub total_pages: usize,
    /// Addresses crawled successfully.
    pub completed: usize,
    /// Addresses recorded as failed.
    pub failed: usize,
    /// completed / total, 0.0 for an empty run.
    pub success_rate: f64,
    /// First attempted address, in sequence order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_address: Option<String>,
    /// Last attempted address, in sequence order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_address: Option<String>,
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: u64,
    /// Records were written individually as they completed.
    pub persisted_individually: bool,
}

impl CrawlSummary {
    /// Aggregate `records` (any order) into a summary for `run_id`.
    pub fn from_records(
        run_id: RunId,
        seed_address: impl Into<String>,
        status: CrawlStatus,
        records: &[PageRecord],
        elapsed: std::time::Duration,
    ) -> Self {
        let completed = records
            .iter()
            .filter(|r| r.status == PageStatus::Completed)
            .count();
        let failed = records.len() - completed;

        let mut ordered: Vec<&PageRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.sequence_number);

        Self {
            run_id,
            seed_address: seed_address.into(),
            status,
            total_pages: records.len(),
            completed,
            failed,
            success_rate: if records.is_empty() {
                0.0
            } else {
                completed as f64 / records.len() as f64
            },
            first_address: ordered.first().map(|r| r.address.clone()),
            last_address: ordered.last().map(|r| r.address.clone()),
            elapsed_ms: elapsed.as_millis() as u64,
            persisted_individually: true,
        }
    }
}
