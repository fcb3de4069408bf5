use rusqlite::Connection;

/// Tables are created idempotently, so opening an existing database is a
/// no-op.
///
/// A root reference has a NULL `origin_id`, and NULLs are distinct in a
/// SQLite unique index: the `(origin, receiver, target)` rule only binds
/// derived references.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS capability (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    max_derive  INTEGER NOT NULL CHECK (max_derive >= 0),
    UNIQUE (name, max_derive)
);

CREATE TABLE IF NOT EXISTS agent (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL CHECK (kind IN ('anonymous', 'user', 'group')),
    user_id     INTEGER,
    group_id    INTEGER,
    is_default  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS reference (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id    TEXT NOT NULL UNIQUE,
    origin_id    INTEGER REFERENCES reference (id),
    depth        INTEGER NOT NULL CHECK (depth >= 0),
    receiver_id  TEXT NOT NULL REFERENCES agent (id),
    target_kind  TEXT NOT NULL,
    target_key   TEXT NOT NULL,
    UNIQUE (origin_id, receiver_id, target_kind, target_key)
);

CREATE INDEX IF NOT EXISTS reference_receiver ON reference (receiver_id, target_kind);

CREATE TABLE IF NOT EXISTS reference_capability (
    reference_id   INTEGER NOT NULL REFERENCES reference (id),
    capability_id  INTEGER NOT NULL REFERENCES capability (id),
    PRIMARY KEY (reference_id, capability_id)
);
";

pub(crate) fn migrate(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch(SCHEMA)
}
