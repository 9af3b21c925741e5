//! SQL schema for the postwatch SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS courses (
    course_id        INTEGER PRIMARY KEY,
    group_mode       INTEGER NOT NULL DEFAULT 0,  -- 0 none | 1 separate | 2 visible
    force_group_mode INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS forums (
    forum_id    INTEGER PRIMARY KEY,
    course_id   INTEGER NOT NULL,
    name        TEXT    NOT NULL DEFAULT '',
    forum_type  TEXT    NOT NULL DEFAULT 'general',
    group_mode  INTEGER NOT NULL DEFAULT 0,
    grouping_id INTEGER
);

CREATE TABLE IF NOT EXISTS discussions (
    discussion_id INTEGER PRIMARY KEY,
    forum_id      INTEGER NOT NULL,
    name          TEXT    NOT NULL DEFAULT '',
    group_id      INTEGER NOT NULL DEFAULT 0,
    first_post_id INTEGER NOT NULL,
    created       TEXT    NOT NULL,   -- RFC 3339 UTC
    time_start    TEXT,
    time_end      TEXT
);

CREATE TABLE IF NOT EXISTS posts (
    post_id       INTEGER PRIMARY KEY,
    discussion_id INTEGER NOT NULL,
    parent_id     INTEGER,
    author_id     INTEGER NOT NULL,
    created       TEXT    NOT NULL,
    modified      TEXT    NOT NULL,
    subject       TEXT    NOT NULL,
    mail_now      INTEGER NOT NULL DEFAULT 0,
    mailed        INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS users (
    user_id     INTEGER PRIMARY KEY,
    username    TEXT    NOT NULL DEFAULT '',
    email       TEXT    NOT NULL,
    first_name  TEXT    NOT NULL DEFAULT '',
    last_name   TEXT    NOT NULL DEFAULT '',
    mail_digest INTEGER NOT NULL DEFAULT 0,
    deleted     INTEGER NOT NULL DEFAULT 0,
    suspended   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS course_groups (
    group_id    INTEGER PRIMARY KEY,
    course_id   INTEGER NOT NULL,
    name        TEXT    NOT NULL DEFAULT '',
    grouping_id INTEGER
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL,
    user_id  INTEGER NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS forum_subscriptions (
    forum_id INTEGER NOT NULL,
    user_id  INTEGER NOT NULL,
    PRIMARY KEY (forum_id, user_id)
);

-- One row per explicit stance; `since` is NULL for unsubscriptions.
CREATE TABLE IF NOT EXISTS discussion_subscriptions (
    forum_id      INTEGER NOT NULL,
    discussion_id INTEGER NOT NULL,
    user_id       INTEGER NOT NULL,
    state         TEXT    NOT NULL,   -- 'subscribed' | 'unsubscribed'
    since         TEXT,
    PRIMARY KEY (discussion_id, user_id)
);

-- -1 defers to users.mail_digest.
CREATE TABLE IF NOT EXISTS forum_digests (
    forum_id    INTEGER NOT NULL,
    user_id     INTEGER NOT NULL,
    mail_digest INTEGER NOT NULL,
    PRIMARY KEY (forum_id, user_id)
);

-- forum_id 0 grants or denies site-wide.
CREATE TABLE IF NOT EXISTS capabilities (
    user_id    INTEGER NOT NULL,
    forum_id   INTEGER NOT NULL DEFAULT 0,
    capability TEXT    NOT NULL,
    allowed    INTEGER NOT NULL,
    PRIMARY KEY (user_id, forum_id, capability)
);

-- Mail handed to the platform transport. Append-only.
CREATE TABLE IF NOT EXISTS outbox (
    message_id   TEXT PRIMARY KEY,
    channel      TEXT NOT NULL,    -- 'email' | 'message'
    from_name    TEXT NOT NULL,
    from_address TEXT NOT NULL,
    to_name      TEXT NOT NULL,
    to_address   TEXT NOT NULL,
    subject      TEXT NOT NULL,
    body_text    TEXT NOT NULL,
    body_html    TEXT NOT NULL,
    queued_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS posts_discussion_idx ON posts(discussion_id, author_id);
CREATE INDEX IF NOT EXISTS posts_created_idx    ON posts(created);
CREATE INDEX IF NOT EXISTS groups_course_idx    ON course_groups(course_id);

PRAGMA user_version = 1;
";
