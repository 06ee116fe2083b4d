//! Candidate-link discovery: filtering, prioritization, and seed-page link
//! extraction.
//!
//! Everything here is pure — no I/O, deterministic for identical input — so
//! the orchestrator can run it between network phases without suspension.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// File extensions that never lead to crawlable page content
/// (archives, media, binaries, static assets).
const SKIP_EXTENSIONS: &[&str] = &[
    ".zip", ".tar", ".gz", ".tgz", ".rar", ".7z", ".exe", ".dmg", ".pkg", ".deb", ".rpm", ".iso",
    ".mp3", ".mp4", ".avi", ".mov", ".mkv", ".wav", ".flac", ".png", ".jpg", ".jpeg", ".gif",
    ".svg", ".webp", ".ico", ".woff", ".woff2", ".ttf", ".eot", ".css", ".js",
];

/// Path fragments that mark low-value pages (auth flows, commerce chrome,
/// admin surfaces).
const LOW_VALUE_SEGMENTS: &[&str] = &[
    "login", "signin", "sign-in", "signup", "sign-up", "auth", "logout", "cart", "checkout",
    "basket", "admin", "wp-admin",
];

/// Path keywords that mark high-value pages, worth crawling sooner.
const HIGH_VALUE_KEYWORDS: &[&str] = &[
    "docs", "api", "guide", "tutorial", "blog", "product", "reference",
];

// ---------------------------------------------------------------------------
// Filter & prioritize
// ---------------------------------------------------------------------------

/// Filter a raw link set against `base` and order it best-first.
///
/// Rejects cross-host links, non-content file extensions, and low-value path
/// patterns; normalizes relative hrefs against `base` (unparsable ones are
/// silently discarded); deduplicates by exact normalized address. Priority
/// key is path-segment depth, reduced by one when the path carries a
/// high-value keyword; ties keep discovery order. The result is truncated to
/// `max_results`.
pub fn filter_and_prioritize(links: &[String], base: &Url, max_results: usize) -> Vec<String> {
    let base_host = base.host_str().unwrap_or("");

    let mut seen = HashSet::new();
    let mut candidates: Vec<(u32, String)> = Vec::new();

    for raw in links {
        let Some(resolved) = normalize_link(raw, base) else {
            continue;
        };

        if resolved.host_str().unwrap_or("") != base_host {
            continue;
        }

        let path = resolved.path().to_ascii_lowercase();
        if has_skip_extension(&path) || is_low_value(&path) {
            continue;
        }

        let address = normalized_string(&resolved);
        if !seen.insert(address.clone()) {
            continue;
        }

        candidates.push((priority_key(&path), address));
    }

    // Stable sort: equal keys keep discovery order.
    candidates.sort_by_key(|(key, _)| *key);
    candidates.truncate(max_results);
    candidates.into_iter().map(|(_, address)| address).collect()
}

/// Resolve a raw href to an absolute URL, dropping anchors and non-HTTP
/// schemes. Returns `None` for anything unusable.
fn normalize_link(raw: &str, base: &Url) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
    {
        return None;
    }

    let mut resolved = base.join(trimmed).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Render a URL for deduplication (fragment already stripped; drop a
/// trailing slash except at the root).
fn normalized_string(url: &Url) -> String {
    let mut s = url.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

fn has_skip_extension(path: &str) -> bool {
    SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_low_value(path: &str) -> bool {
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .any(|seg| LOW_VALUE_SEGMENTS.contains(&seg))
}

/// Depth-based priority, boosted one level for high-value keywords.
/// Lower is crawled sooner.
fn priority_key(path: &str) -> u32 {
    let depth = path.split('/').filter(|seg| !seg.is_empty()).count() as u32;
    if HIGH_VALUE_KEYWORDS.iter().any(|kw| path.contains(kw)) {
        depth.saturating_sub(1)
    } else {
        depth
    }
}

// ---------------------------------------------------------------------------
// Seed-page link extraction
// ---------------------------------------------------------------------------

/// Extract all `a[href]` links from an HTML document, resolved against
/// `base_url`. Anchors, `javascript:` and `mailto:` hrefs are skipped and
/// fragments stripped; cross-host links are kept here and rejected later by
/// [`filter_and_prioritize`].
pub fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").expect("static selector");
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }

            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}
