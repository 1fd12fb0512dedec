//! SQL schema for the Canon SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per real-world customer. Rows are only written by resolution.
CREATE TABLE IF NOT EXISTS customers (
    customer_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    phone       TEXT,              -- digits only
    document    TEXT,              -- trimmed
    email       TEXT,              -- lower-cased
    created_at  TEXT NOT NULL,     -- from the originating sighting
    updated_at  TEXT NOT NULL,
    CHECK (phone IS NOT NULL OR document IS NOT NULL OR email IS NOT NULL)
);

-- Each key is unique on its own; the three are independently nullable.
CREATE UNIQUE INDEX IF NOT EXISTS customers_phone_idx
    ON customers(phone) WHERE phone IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS customers_document_idx
    ON customers(document) WHERE document IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS customers_email_idx
    ON customers(email) WHERE email IS NOT NULL;

-- Intake pipeline tables. Contact fields are stored as captured.
CREATE TABLE IF NOT EXISTS quotations (
    sighting_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    phone       TEXT,
    document    TEXT,
    email       TEXT,
    occurred_at TEXT,
    recorded_at TEXT NOT NULL,
    reference   TEXT,
    customer_id TEXT REFERENCES customers(customer_id)
);

CREATE TABLE IF NOT EXISTS course_orders (
    sighting_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    phone       TEXT,
    document    TEXT,
    email       TEXT,
    occurred_at TEXT,
    recorded_at TEXT NOT NULL,
    reference   TEXT,
    customer_id TEXT REFERENCES customers(customer_id)
);

CREATE INDEX IF NOT EXISTS quotations_unlinked_idx
    ON quotations(recorded_at) WHERE customer_id IS NULL;
CREATE INDEX IF NOT EXISTS course_orders_unlinked_idx
    ON course_orders(recorded_at) WHERE customer_id IS NULL;

-- Durable work list. Completed rows are kept for audit until pruned.
CREATE TABLE IF NOT EXISTS resolution_queue (
    entry_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    source_table  TEXT NOT NULL,   -- 'quotation' | 'course_order'
    sighting_id   TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending'
                  CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    error_message TEXT,
    customer_id   TEXT,
    claimed_by    TEXT,
    claimed_at    TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

-- At most one live entry per sighting.
CREATE UNIQUE INDEX IF NOT EXISTS resolution_queue_live_idx
    ON resolution_queue(source_table, sighting_id)
    WHERE status IN ('pending', 'processing');
CREATE INDEX IF NOT EXISTS resolution_queue_status_idx
    ON resolution_queue(status, created_at, entry_id);

PRAGMA user_version = 1;
";
