//! SQLite-dialect schema for the libSQL backend.
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so the whole batch runs
//! on each startup.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS intents (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    canceled INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_intents_expires ON intents(expires_at);
CREATE INDEX IF NOT EXISTS idx_intents_updated ON intents(updated_at);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    time TEXT NOT NULL,
    kind TEXT NOT NULL,
    from_user INTEGER NOT NULL,
    to_user INTEGER,
    amount INTEGER NOT NULL,
    success INTEGER NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions(from_user, time);
CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions(to_user, time);
"#;
