use anyhow::Result;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id              TEXT PRIMARY KEY CHECK(id GLOB '[a-zA-Z0-9_-]*' AND length(id) > 0),
    display_name    TEXT NOT NULL DEFAULT '',
    push_token      TEXT,
    tasks_completed INTEGER NOT NULL DEFAULT 0,
    tasks_posted    INTEGER NOT NULL DEFAULT 0,
    total_earnings  REAL NOT NULL DEFAULT 0,
    rating          REAL NOT NULL DEFAULT 0,
    trust_score     REAL NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS tasks (
    id                   TEXT PRIMARY KEY CHECK(id GLOB '[a-zA-Z0-9_-]*' AND length(id) > 0),
    title                TEXT NOT NULL,
    subject              TEXT NOT NULL DEFAULT '',
    description          TEXT NOT NULL DEFAULT '',
    status               TEXT NOT NULL DEFAULT 'open' CHECK(status IN (
        'open', 'awaiting_expert', 'in_progress', 'working', 'pending_review', 'delivered',
        'completed', 'revision_requested', 'disputed', 'cancelled', 'payment_received')),
    created_by           TEXT NOT NULL,
    creator_name         TEXT NOT NULL DEFAULT '',
    assigned_expert_id   TEXT,
    assigned_expert_name TEXT,
    created_at           TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at           TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY CHECK(id GLOB '[a-zA-Z0-9_-]*' AND length(id) > 0),
    task_id    TEXT REFERENCES tasks(id),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id  TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    user_id  TEXT NOT NULL REFERENCES users(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (chat_id, user_id)
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id          INTEGER PRIMARY KEY,
    chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    sender_id   TEXT NOT NULL,
    sender_name TEXT NOT NULL DEFAULT '',
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS notifications (
    id           INTEGER PRIMARY KEY,
    user_id      TEXT NOT NULL,
    kind         TEXT NOT NULL CHECK(kind IN ('newTask', 'taskAccepted', 'taskCompleted', 'messageReceived')),
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    read         INTEGER NOT NULL DEFAULT 0,
    from_user_id TEXT,
    task_id      TEXT,
    chat_id      TEXT,
    created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS notifications_by_user ON notifications(user_id, read);

-- Change outbox: one row per document write the trigger worker must see.
CREATE TABLE IF NOT EXISTS doc_changes (
    id         INTEGER PRIMARY KEY,
    collection TEXT NOT NULL,
    doc_id     TEXT NOT NULL,
    kind       TEXT NOT NULL CHECK(kind IN ('create', 'update')),
    before     TEXT,
    after      TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TRIGGER IF NOT EXISTS tasks_created AFTER INSERT ON tasks
BEGIN
    INSERT INTO doc_changes (collection, doc_id, kind, before, after)
    VALUES ('tasks', NEW.id, 'create', NULL, json_object(
        'id', NEW.id, 'title', NEW.title, 'subject', NEW.subject, 'status', NEW.status,
        'createdBy', NEW.created_by, 'creatorName', NEW.creator_name,
        'assignedExpertId', NEW.assigned_expert_id,
        'assignedExpertName', NEW.assigned_expert_name));
END;

CREATE TRIGGER IF NOT EXISTS tasks_updated AFTER UPDATE ON tasks
BEGIN
    INSERT INTO doc_changes (collection, doc_id, kind, before, after)
    VALUES ('tasks', NEW.id, 'update',
        json_object(
            'id', OLD.id, 'title', OLD.title, 'subject', OLD.subject, 'status', OLD.status,
            'createdBy', OLD.created_by, 'creatorName', OLD.creator_name,
            'assignedExpertId', OLD.assigned_expert_id,
            'assignedExpertName', OLD.assigned_expert_name),
        json_object(
            'id', NEW.id, 'title', NEW.title, 'subject', NEW.subject, 'status', NEW.status,
            'createdBy', NEW.created_by, 'creatorName', NEW.creator_name,
            'assignedExpertId', NEW.assigned_expert_id,
            'assignedExpertName', NEW.assigned_expert_name));
END;

CREATE TRIGGER IF NOT EXISTS chat_messages_created AFTER INSERT ON chat_messages
BEGIN
    INSERT INTO doc_changes (collection, doc_id, kind, before, after)
    VALUES ('chat_messages', NEW.id, 'create', NULL, json_object(
        'id', NEW.id, 'chatId', NEW.chat_id, 'senderId', NEW.sender_id,
        'senderName', NEW.sender_name, 'text', NEW.text));
END;
";

fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn)?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn)?;
    init(&conn)?;
    Ok(conn)
}
