//! SQL migration definitions for the siteharvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: pages, crawl_runs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawled pages, keyed by (address, sequence_number) for idempotent upserts
CREATE TABLE IF NOT EXISTS pages (
    id              TEXT PRIMARY KEY,
    address         TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    content         TEXT NOT NULL,
    raw_content     TEXT,
    links_json      TEXT NOT NULL DEFAULT '[]',
    embedding_json  TEXT,
    title           TEXT,
    content_hash    TEXT NOT NULL,
    content_len     INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    completed_at    TEXT NOT NULL,
    status          TEXT NOT NULL,
    error           TEXT,
    UNIQUE(address, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_pages_address ON pages(address);
CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status);

-- Crawl run history
CREATE TABLE IF NOT EXISTS crawl_runs (
    id           TEXT PRIMARY KEY,
    seed_address TEXT NOT NULL,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    stats_json   TEXT
);

-- Full-text search on pages (the textual fallback when no query vector is supplied)
CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
    title,
    address,
    content,
    content=pages,
    content_rowid=rowid
);

-- Triggers to keep FTS in sync with pages table
CREATE TRIGGER IF NOT EXISTS pages_fts_insert AFTER INSERT ON pages BEGIN
    INSERT INTO pages_fts(rowid, title, address, content)
    VALUES (new.rowid, new.title, new.address, new.content);
END;

CREATE TRIGGER IF NOT EXISTS pages_fts_delete AFTER DELETE ON pages BEGIN
    INSERT INTO pages_fts(pages_fts, rowid, title, address, content)
    VALUES ('delete', old.rowid, old.title, old.address, old.content);
END;

CREATE TRIGGER IF NOT EXISTS pages_fts_update AFTER UPDATE ON pages BEGIN
    INSERT INTO pages_fts(pages_fts, rowid, title, address, content)
    VALUES ('delete', old.rowid, old.title, old.address, old.content);
    INSERT INTO pages_fts(rowid, title, address, content)
    VALUES (new.rowid, new.title, new.address, new.content);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
