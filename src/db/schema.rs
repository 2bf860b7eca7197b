/// Schema for the offline store. Both the cache generations and the pending
/// action queue live in one database file.
pub const SCHEMA: &str = r#"
-- Cache generations and their lifecycle state
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Response snapshots, one per (generation, normalized request)
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (generation, key_hash)
);

-- Deferred mutating requests. AUTOINCREMENT keeps ids monotonic and never reused.
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL
);
"#;
