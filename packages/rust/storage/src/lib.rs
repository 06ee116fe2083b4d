//! libSQL persistence layer for crawled pages.
//!
//! The [`Storage`] struct wraps a local libSQL database holding page records,
//! crawl run history, and full-text search. The page upsert is idempotent and
//! keyed by `(address, sequence_number)`, so duplicate delivery on retry
//! leaves exactly one stored record per key.
//!
//! Similarity search loads stored vectors and ranks by cosine distance in
//! process; the textual FTS5 search is the fallback when no query vector is
//! supplied.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};

use siteharvest_shared::{HarvestError, PageMetadata, PageRecord, PageStatus, Result, RunId};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Page record operations
    // -----------------------------------------------------------------------

    /// Upsert a page record (insert or update on conflict by
    /// `address + sequence_number`).
    pub async fn upsert_record(&self, record: &PageRecord) -> Result<()> {
        let links_json = serde_json::to_string(&record.links_found)
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        let embedding_json = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO pages (id, address, sequence_number, content, raw_content, links_json,
                                    embedding_json, title, content_hash, content_len, created_at,
                                    completed_at, status, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(address, sequence_number) DO UPDATE SET
                   content = excluded.content,
                   raw_content = excluded.raw_content,
                   links_json = excluded.links_json,
                   embedding_json = excluded.embedding_json,
                   title = excluded.title,
                   content_hash = excluded.content_hash,
                   content_len = excluded.content_len,
                   completed_at = excluded.completed_at,
                   status = excluded.status,
                   error = excluded.error",
                params![
                    record.id.as_str(),
                    record.address.as_str(),
                    i64::from(record.sequence_number),
                    record.content.as_str(),
                    record.raw_content.as_deref(),
                    links_json.as_str(),
                    embedding_json.as_deref(),
                    record.metadata.title.as_deref(),
                    record.metadata.content_hash.as_str(),
                    record.metadata.content_len as i64,
                    record.created_at.to_rfc3339(),
                    record.completed_at.to_rfc3339(),
                    record.status.as_str(),
                    record.error.as_deref(),
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a record by its storage key.
    pub async fn get_record(
        &self,
        address: &str,
        sequence_number: u32,
    ) -> Result<Option<PageRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM pages WHERE address = ?1 AND sequence_number = ?2"),
                params![address, i64::from(sequence_number)],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    /// List all records in sequence order.
    pub async fn list_records(&self) -> Result<Vec<PageRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM pages ORDER BY sequence_number, address"),
                params![],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    /// Total number of stored records.
    pub async fn count_records(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM pages", params![])
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n as u64)
                .map_err(|e| HarvestError::Storage(e.to_string())),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Nearest records to `query` by cosine distance over stored embeddings.
    /// Records without a vector are not candidates.
    pub async fn search_similar(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(PageRecord, f64)>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM pages WHERE embedding_json IS NOT NULL"),
                params![],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut scored = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let record = row_to_record(&row)?;
            if let Some(vector) = &record.embedding {
                if let Some(score) = cosine_similarity(query, vector) {
                    scored.push((record, score));
                }
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Full-text search over title/address/content — the fallback when no
    /// query vector is supplied.
    pub async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<PageRecord>> {
        let columns: String = RECORD_COLUMNS
            .split(", ")
            .map(|c| format!("p.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {columns}
                     FROM pages_fts fts
                     JOIN pages p ON p.rowid = fts.rowid
                     WHERE pages_fts MATCH ?1
                     ORDER BY rank
                     LIMIT ?2"
                ),
                params![query, limit as i64],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Crawl run operations
    // -----------------------------------------------------------------------

    /// Record the start of a crawl run.
    pub async fn insert_crawl_run(&self, run_id: &RunId, seed_address: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, seed_address, started_at) VALUES (?1, ?2, ?3)",
                params![run_id.to_string(), seed_address, now.as_str()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Record a crawl run's completion with summary stats.
    pub async fn finish_crawl_run(&self, run_id: &RunId, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE crawl_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id.to_string()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Column list shared by every record query; order must match [`row_to_record`].
const RECORD_COLUMNS: &str = "id, address, sequence_number, content, raw_content, links_json, \
                              embedding_json, title, content_hash, content_len, created_at, \
                              completed_at, status, error";

/// Convert a database row to a [`PageRecord`].
fn row_to_record(row: &libsql::Row) -> Result<PageRecord> {
    let links_json: String = row
        .get(5)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;
    let links_found: Vec<String> =
        serde_json::from_str(&links_json).map_err(|e| HarvestError::Storage(e.to_string()))?;

    let embedding = match row.get::<String>(6).ok() {
        Some(json) => Some(
            serde_json::from_str::<Vec<f32>>(&json)
                .map_err(|e| HarvestError::Storage(e.to_string()))?,
        ),
        None => None,
    };

    let status: PageStatus = row
        .get::<String>(12)
        .map_err(|e| HarvestError::Storage(e.to_string()))?
        .parse()
        .map_err(HarvestError::Storage)?;

    Ok(PageRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        address: row
            .get::<String>(1)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        sequence_number: row
            .get::<i64>(2)
            .map_err(|e| HarvestError::Storage(e.to_string()))? as u32,
        content: row
            .get::<String>(3)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        raw_content: row.get::<String>(4).ok(),
        links_found,
        embedding,
        metadata: PageMetadata {
            title: row.get::<String>(7).ok(),
            content_hash: row
                .get::<String>(8)
                .map_err(|e| HarvestError::Storage(e.to_string()))?,
            content_len: row
                .get::<i64>(9)
                .map_err(|e| HarvestError::Storage(e.to_string()))? as usize,
        },
        created_at: parse_timestamp(row, 10)?,
        completed_at: parse_timestamp(row, 11)?,
        status,
        error: row.get::<String>(13).ok(),
    })
}

fn parse_timestamp(row: &libsql::Row, index: i32) -> Result<DateTime<Utc>> {
    let s: String = row
        .get(index)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HarvestError::Storage(format!("invalid date: {e}")))
}

/// Cosine similarity in [-1, 1]; `None` for mismatched dimensions or a zero
/// vector.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return None;
    }
    Some(dot / denom)
}
