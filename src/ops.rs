use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::model::{
    Chat, ChatMessage, NewNotification, NotificationRecord, Task, TaskStatus, UserProfile,
    UserStats,
};
use crate::validate::{
    require_participant, require_text, validate_id, validate_participants,
};

// ── users ──────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, display_name, push_token, tasks_completed, tasks_posted, \
     total_earnings, rating, trust_score";

fn read_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        push_token: row.get(2)?,
        tasks_completed: row.get(3)?,
        tasks_posted: row.get(4)?,
        total_earnings: row.get(5)?,
        rating: row.get(6)?,
        trust_score: row.get(7)?,
    })
}

pub fn add_user(
    conn: &Connection,
    id: &str,
    display_name: &str,
    push_token: Option<&str>,
) -> Result<()> {
    validate_id("user", id)?;
    if find_user(conn, id)?.is_some() {
        bail!("user '{id}' already exists");
    }
    conn.execute(
        "INSERT INTO users (id, display_name, push_token) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, display_name, push_token],
    )?;
    Ok(())
}

pub fn find_user(conn: &Connection, id: &str) -> Result<Option<UserProfile>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            read_user_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> Result<UserProfile> {
    find_user(conn, id)?.with_context(|| format!("user '{id}' not found"))
}

/// Store (or clear, with `None`) the device push token for a user.
pub fn set_push_token(conn: &Connection, id: &str, token: Option<&str>) -> Result<()> {
    let token = token.filter(|t| !t.is_empty());
    let rows = conn.execute(
        "UPDATE users SET push_token = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?2",
        rusqlite::params![token, id],
    )?;
    if rows == 0 {
        bail!("user '{id}' not found");
    }
    Ok(())
}

pub fn user_stats(conn: &Connection, id: &str) -> Result<Option<UserStats>> {
    Ok(find_user(conn, id)?.as_ref().map(UserStats::from))
}

/// Cumulative per-user counters bumped by the completion trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    TasksCompleted,
    TasksPosted,
}

impl Counter {
    fn column(self) -> &'static str {
        match self {
            Self::TasksCompleted => "tasks_completed",
            Self::TasksPosted => "tasks_posted",
        }
    }
}

/// Relative increment in a single statement; concurrent writers never lose updates.
pub fn increment_counter(conn: &Connection, user_id: &str, counter: Counter) -> Result<()> {
    let column = counter.column();
    let rows = conn.execute(
        &format!(
            "UPDATE users SET {column} = {column} + 1, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?1"
        ),
        [user_id],
    )?;
    if rows == 0 {
        bail!("user '{user_id}' not found");
    }
    Ok(())
}

// ── tasks ──────────────────────────────────────────────────────────────

const TASK_COLUMNS: &str = "id, title, subject, description, status, created_by, creator_name, \
     assigned_expert_id, assigned_expert_name, created_at, updated_at";

fn read_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        subject: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        created_by: row.get(5)?,
        creator_name: row.get(6)?,
        assigned_expert_id: row.get(7)?,
        assigned_expert_name: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

// Only `open`: the acceptance notification fires on open -> in_progress.
const ACCEPT_OPEN: &str = "
UPDATE tasks
SET status = 'in_progress', assigned_expert_id = ?1, assigned_expert_name = ?2,
    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?3 AND status = 'open' AND assigned_expert_id IS NULL
";

const COMPLETE_IN_PROGRESS: &str = "
UPDATE tasks
SET status = 'completed',
    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?1 AND status = 'in_progress'
";

// Compare-and-set against the status the caller checked.
const CANCEL_FROM: &str = "
UPDATE tasks
SET status = 'cancelled',
    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?1 AND status = ?2
";

pub fn find_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id],
            read_task_row,
        )
        .optional()?;
    Ok(task)
}

pub fn get_task(conn: &Connection, id: &str) -> Result<Task> {
    find_task(conn, id)?.with_context(|| format!("task '{id}' not found"))
}

pub fn post_task(
    conn: &Connection,
    id: &str,
    title: &str,
    subject: &str,
    description: &str,
    created_by: &str,
) -> Result<()> {
    validate_id("task", id)?;
    require_text("title", title)?;
    if find_task(conn, id)?.is_some() {
        bail!("task '{id}' already exists");
    }
    let creator = get_user(conn, created_by)?;
    conn.execute(
        "INSERT INTO tasks (id, title, subject, description, created_by, creator_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, title, subject, description, creator.id, creator.display_name],
    )?;
    Ok(())
}

/// An expert takes an unassigned task; it moves to `in_progress`.
pub fn accept_task(conn: &Connection, id: &str, expert_id: &str) -> Result<()> {
    let task = get_task(conn, id)?;
    let expert = get_user(conn, expert_id)?;
    if task.created_by == expert.id {
        bail!("'{expert_id}' cannot accept their own task");
    }
    let rows = conn.execute(
        ACCEPT_OPEN,
        rusqlite::params![expert.id, expert.display_name, id],
    )?;
    if rows == 0 {
        match task.assigned_expert_id {
            Some(a) => bail!("task '{id}' is already assigned to '{a}'"),
            None => bail!("task '{id}' is {} and cannot be accepted", task.status),
        }
    }
    Ok(())
}

pub fn complete_task(conn: &Connection, id: &str) -> Result<()> {
    let task = get_task(conn, id)?;
    let rows = conn.execute(COMPLETE_IN_PROGRESS, [id])?;
    if rows == 0 {
        bail!("task '{id}' is {} and cannot be completed", task.status);
    }
    Ok(())
}

pub fn cancel_task(conn: &Connection, id: &str) -> Result<()> {
    let task = get_task(conn, id)?;
    if task.status.is_terminal() {
        bail!("task '{id}' is already {}", task.status);
    }
    let rows = conn.execute(CANCEL_FROM, rusqlite::params![id, task.status])?;
    if rows == 0 {
        bail!("task '{id}' changed while cancelling; try again");
    }
    Ok(())
}

pub fn list_tasks(conn: &Connection, status: Option<TaskStatus>) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE ?1 IS NULL OR status = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map([status], read_task_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn tasks_posted_by(conn: &Connection, user_id: &str) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE created_by = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map([user_id], read_task_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn tasks_assigned_to(conn: &Connection, user_id: &str) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE assigned_expert_id = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map([user_id], read_task_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

// ── chats ──────────────────────────────────────────────────────────────

pub fn open_chat(
    conn: &Connection,
    id: &str,
    participants: [&str; 2],
    task_id: Option<&str>,
) -> Result<()> {
    validate_id("chat", id)?;
    validate_participants(&participants)?;
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    if exists {
        bail!("chat '{id}' already exists");
    }
    for user in participants {
        get_user(conn, user)?;
    }
    if let Some(t) = task_id {
        get_task(conn, t)?;
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO chats (id, task_id) VALUES (?1, ?2)",
        rusqlite::params![id, task_id],
    )?;
    for (position, user) in participants.iter().enumerate() {
        tx.execute(
            "INSERT INTO chat_members (chat_id, user_id, position) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, user, position as i64],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Participants in the order they were given when the chat was opened.
/// Empty if the chat does not exist.
pub fn chat_participants(conn: &Connection, chat_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map([chat_id], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn get_chat(conn: &Connection, id: &str) -> Result<Chat> {
    let (task_id, created_at): (Option<String>, String) = conn
        .query_row(
            "SELECT task_id, created_at FROM chats WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .with_context(|| format!("chat '{id}' not found"))?;
    Ok(Chat {
        id: id.to_string(),
        participants: chat_participants(conn, id)?,
        task_id,
        created_at,
    })
}

/// Append a message; returns its id.
pub fn send_message(conn: &Connection, chat_id: &str, sender_id: &str, text: &str) -> Result<i64> {
    require_text("message", text)?;
    let chat = get_chat(conn, chat_id)?;
    require_participant(chat_id, &chat.participants, sender_id)?;
    let sender = get_user(conn, sender_id)?;
    conn.execute(
        "INSERT INTO chat_messages (chat_id, sender_id, sender_name, text) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![chat_id, sender.id, sender.display_name, text],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_messages(conn: &Connection, chat_id: &str) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, sender_id, sender_name, text, created_at
         FROM chat_messages WHERE chat_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([chat_id], |row| {
        Ok(ChatMessage {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            text: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

// ── notifications ──────────────────────────────────────────────────────

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, title, body, read, from_user_id, task_id, chat_id, created_at";

fn read_notification_row(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        read: row.get::<_, i64>(5)? != 0,
        from_user_id: row.get(6)?,
        task_id: row.get(7)?,
        chat_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub fn insert_notification(conn: &Connection, n: &NewNotification) -> Result<i64> {
    conn.execute(
        "INSERT INTO notifications (user_id, kind, title, body, from_user_id, task_id, chat_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            n.user_id,
            n.kind,
            n.title,
            n.body,
            n.from_user_id,
            n.task_id,
            n.chat_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest first.
pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    unread_only: bool,
) -> Result<Vec<NotificationRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
         ORDER BY id DESC"
    ))?;
    let rows = stmt.query_map(rusqlite::params![user_id, unread_only], read_notification_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn unread_count(conn: &Connection, user_id: &str) -> Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Returns false if no such notification exists. Marking twice is fine.
pub fn mark_read(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

/// Delete notifications older than `days`. Returns how many went.
pub fn prune_notifications(conn: &Connection, days: u32) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM notifications
         WHERE created_at < strftime('%Y-%m-%dT%H:%M:%SZ', 'now', '-' || ?1 || ' days')",
        [days],
    )?;
    Ok(rows)
}
