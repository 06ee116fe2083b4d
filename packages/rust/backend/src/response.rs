//! Wire types for the remote crawl backend, plus the content-field resolver.
//!
//! Backend responses are dynamically shaped: results may carry content in any
//! of several fields, links as strings or objects, and markdown as a plain
//! string or a nested record. The resolver below is an ordered list of named
//! extractors over the result record, so the "try this field, else that one"
//! policy lives in one place instead of being scattered through callers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Body for `POST /crawl`.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlRequestBody {
    pub urls: Vec<String>,
    pub browser_config: serde_json::Value,
    pub crawler_config: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Reply to `POST /crawl`: either immediate results or an async task handle.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub results: Option<Vec<RemoteResult>>,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Reply to `GET /task/{task_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    pub status: String,
    #[serde(default)]
    pub results: Option<Vec<RemoteResult>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One crawled page as the backend reports it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteResult {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub extracted_content: Option<String>,
    #[serde(default)]
    pub markdown: Option<MarkdownField>,
    #[serde(default)]
    pub cleaned_html: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub links: Option<LinkSet>,
    #[serde(default)]
    pub metadata: Option<ResultMetadata>,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Markdown arrives either as a plain string or as a record with variants.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MarkdownField {
    Plain(String),
    Detailed {
        #[serde(default)]
        raw_markdown: Option<String>,
        #[serde(default)]
        fit_markdown: Option<String>,
    },
}

/// Links grouped by scope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkSet {
    #[serde(default)]
    pub internal: Vec<LinkEntry>,
    #[serde(default)]
    pub external: Vec<LinkEntry>,
}

/// A link, as a bare string or an object with an `href`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LinkEntry {
    Plain(String),
    Object {
        href: String,
        #[serde(default)]
        text: Option<String>,
    },
}

impl LinkEntry {
    /// The link's address regardless of shape.
    pub fn href(&self) -> &str {
        match self {
            Self::Plain(href) => href,
            Self::Object { href, .. } => href,
        }
    }
}

/// Result-level metadata fields we care about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub title: Option<String>,
}

impl RemoteResult {
    /// Internal link addresses reported for this page.
    pub fn internal_links(&self) -> Vec<String> {
        self.links
            .as_ref()
            .map(|set| set.internal.iter().map(|l| l.href().to_string()).collect())
            .unwrap_or_default()
    }

    /// Reported page title, when present.
    pub fn title(&self) -> Option<String> {
        self.metadata.as_ref().and_then(|m| m.title.clone())
    }
}

// ---------------------------------------------------------------------------
// Content resolver pipeline
// ---------------------------------------------------------------------------

/// A named content extractor over a result record.
type Resolver = (&'static str, fn(&RemoteResult) -> Option<String>);

/// Content-field hierarchy, best first.
const CONTENT_RESOLVERS: &[Resolver] = &[
    ("extracted_content", |r| non_empty(r.extracted_content.as_deref())),
    ("raw_markdown", |r| match &r.markdown {
        Some(MarkdownField::Detailed { raw_markdown, .. }) => non_empty(raw_markdown.as_deref()),
        _ => None,
    }),
    ("fit_markdown", |r| match &r.markdown {
        Some(MarkdownField::Detailed { fit_markdown, .. }) => non_empty(fit_markdown.as_deref()),
        _ => None,
    }),
    ("cleaned_html", |r| non_empty(r.cleaned_html.as_deref())),
    ("markdown", |r| match &r.markdown {
        Some(MarkdownField::Plain(s)) => non_empty(Some(s)),
        _ => None,
    }),
    ("html", |r| non_empty(r.html.as_deref())),
];

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Walk the content hierarchy and return the first non-empty field, tagged
/// with the field name it came from.
pub fn resolve_content(result: &RemoteResult) -> Option<(&'static str, String)> {
    CONTENT_RESOLVERS
        .iter()
        .find_map(|(name, resolver)| resolver(result).map(|content| (*name, content)))
}

/// The rawest variant worth keeping alongside the resolved content.
pub fn raw_variant(result: &RemoteResult) -> Option<String> {
    non_empty(result.html.as_deref()).or_else(|| non_empty(result.cleaned_html.as_deref()))
}
