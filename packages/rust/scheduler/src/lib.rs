//! Batch scheduling: fixed-size partitioning, strictly sequential batches,
//! per-batch retry with linear back-off, and cool-off pauses between batches.
//!
//! The scheduler never touches the network itself — crawling one batch is
//! delegated to the supplied callback, which may fan out internally up to the
//! configured concurrency cap. A batch failing all its attempts is recorded
//! and never fatal to the run.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use siteharvest_shared::{CrawlerConfig, EventBus, PageRecord, ProgressEvent, Result};

// ---------------------------------------------------------------------------
// BatchConfig
// ---------------------------------------------------------------------------

/// Scheduling knobs, carved out of the full crawler config.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Addresses per batch.
    pub batch_size: usize,
    /// Pause between batches; also the linear back-off unit for retries.
    pub cool_off: Duration,
    /// Total attempts per batch before its addresses are recorded as failed.
    pub max_retries: u32,
}

impl From<&CrawlerConfig> for BatchConfig {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            cool_off: config.cool_off,
            max_retries: config.max_retries,
        }
    }
}

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// Partition `urls` into consecutive batches of at most `batch_size`.
/// The batches cover the list exactly, in order, with no overlap.
pub fn partition(urls: &[String], batch_size: usize) -> Vec<Vec<String>> {
    if batch_size == 0 {
        return vec![urls.to_vec()];
    }
    urls.chunks(batch_size).map(<[String]>::to_vec).collect()
}

// ---------------------------------------------------------------------------
// crawl_in_batches
// ---------------------------------------------------------------------------

/// Crawl `urls` batch by batch, returning every resolved record (successful
/// and failed) in completion order.
///
/// Per batch the callback is attempted up to `max_retries` times with a
/// `cool_off * attempt` wait between attempts; when all attempts fail, the
/// batch's addresses are recorded as failed and scheduling moves on. The
/// cancellation token is checked at every batch boundary: remaining
/// addresses are reported skipped and no further batch starts.
#[instrument(skip_all, fields(urls = urls.len(), batch_size = config.batch_size))]
pub async fn crawl_in_batches<F, Fut>(
    urls: &[String],
    config: &BatchConfig,
    events: &EventBus,
    cancel: &CancellationToken,
    mut crawl_one_batch: F,
) -> Vec<PageRecord>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<PageRecord>>>,
{
    let sequence_of: HashMap<&str, u32> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| (url.as_str(), i as u32))
        .collect();

    let batches = partition(urls, config.batch_size);
    let total = batches.len();
    let mut records: Vec<PageRecord> = Vec::with_capacity(urls.len());

    for (index, batch) in batches.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!(batch = index, "cancellation observed, skipping remaining batches");
            skip_remaining(urls, &records, events);
            break;
        }

        events.emit(ProgressEvent::BatchStarted {
            index,
            total,
            size: batch.len(),
        });

        let outcome = run_batch_with_retries(&batch, config, &mut crawl_one_batch, cancel).await;

        // A batch in flight when cancellation lands is allowed to finish, but
        // its result is discarded and nothing further starts.
        if cancel.is_cancelled() {
            info!(batch = index, "cancellation observed, discarding in-flight batch");
            skip_remaining(urls, &records, events);
            break;
        }

        match outcome {
            BatchOutcome::Resolved(batch_records) => {
                let covered: HashSet<String> =
                    batch_records.iter().map(|r| r.address.clone()).collect();

                for record in &batch_records {
                    emit_resolution(events, record);
                }
                records.extend(batch_records);

                // A well-behaved callback covers every address; anything it
                // dropped is still accounted for.
                for address in &batch {
                    if !covered.contains(address.as_str()) {
                        let seq = sequence_of.get(address.as_str()).copied().unwrap_or(0);
                        let record =
                            PageRecord::failed(address, seq, "address missing from batch result");
                        emit_resolution(events, &record);
                        records.push(record);
                    }
                }
            }
            BatchOutcome::Exhausted(error) => {
                warn!(batch = index, %error, "batch failed all attempts");
                for address in &batch {
                    let seq = sequence_of.get(address.as_str()).copied().unwrap_or(0);
                    let record = PageRecord::failed(address, seq, error.clone());
                    emit_resolution(events, &record);
                    records.push(record);
                }
            }
            BatchOutcome::Cancelled => {
                info!(batch = index, "cancellation observed mid-batch");
                skip_remaining(urls, &records, events);
                break;
            }
        }

        // Cool off before the next batch, never after the last one.
        if index + 1 < total && !cancel.is_cancelled() {
            debug!(cool_off_ms = config.cool_off.as_millis() as u64, "cooling off");
            tokio::time::sleep(config.cool_off).await;
        }
    }

    records
}

enum BatchOutcome {
    Resolved(Vec<PageRecord>),
    Exhausted(String),
    Cancelled,
}

async fn run_batch_with_retries<F, Fut>(
    batch: &[String],
    config: &BatchConfig,
    crawl_one_batch: &mut F,
    cancel: &CancellationToken,
) -> BatchOutcome
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<PageRecord>>>,
{
    let attempts = config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match crawl_one_batch(batch.to_vec()).await {
            Ok(records) => return BatchOutcome::Resolved(records),
            Err(e) if e.is_cancelled() => return BatchOutcome::Cancelled,
            Err(e) => {
                warn!(attempt, error = %e, "batch attempt failed");
                last_error = e.to_string();
                if attempt < attempts && !cancel.is_cancelled() {
                    // Linear back-off, scaled by the attempt number.
                    tokio::time::sleep(config.cool_off * attempt).await;
                }
            }
        }
    }

    BatchOutcome::Exhausted(last_error)
}

fn emit_resolution(events: &EventBus, record: &PageRecord) {
    match record.status {
        siteharvest_shared::PageStatus::Completed => events.emit(ProgressEvent::UrlCrawled {
            address: record.address.clone(),
        }),
        siteharvest_shared::PageStatus::Failed => events.emit(ProgressEvent::UrlFailed {
            address: record.address.clone(),
            error: record.error.clone().unwrap_or_default(),
        }),
    }
}

/// Report every not-yet-resolved address as skipped.
fn skip_remaining(urls: &[String], resolved: &[PageRecord], events: &EventBus) {
    let done: HashSet<&str> = resolved.iter().map(|r| r.address.as_str()).collect();
    for address in urls {
        if !done.contains(address.as_str()) {
            events.emit(ProgressEvent::UrlSkipped {
                address: address.clone(),
                reason: "crawl cancelled".into(),
            });
        }
    }
}
