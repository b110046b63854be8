//! The change outbox: SQLite triggers append a row to `doc_changes` for every
//! task insert/update and every chat message insert, carrying JSON snapshots
//! of the document before and after the write. The trigger worker claims rows
//! here and turns them into typed [`DocChange`]s.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::Deserialize;

use crate::model::TaskStatus;

/// A task document as seen by a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDoc {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subject: String,
    pub status: TaskStatus,
    pub created_by: String,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub assigned_expert_id: Option<String>,
    #[serde(default)]
    pub assigned_expert_name: Option<String>,
}

/// A chat message document as seen by a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub id: i64,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocChange {
    TaskCreated { after: TaskDoc },
    TaskUpdated { before: TaskDoc, after: TaskDoc },
    MessageCreated { message: MessageDoc },
}

#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub id: i64,
    pub collection: String,
    pub doc_id: String,
    pub kind: String,
    pub before: Option<String>,
    pub after: String,
}

impl ChangeRow {
    pub fn decode(&self) -> Result<DocChange> {
        let context = || format!("change #{} ({} {})", self.id, self.collection, self.doc_id);
        match (self.collection.as_str(), self.kind.as_str()) {
            ("tasks", "create") => Ok(DocChange::TaskCreated {
                after: serde_json::from_str(&self.after).with_context(context)?,
            }),
            ("tasks", "update") => {
                let before = self
                    .before
                    .as_deref()
                    .with_context(|| format!("{}: update without before snapshot", context()))?;
                Ok(DocChange::TaskUpdated {
                    before: serde_json::from_str(before).with_context(context)?,
                    after: serde_json::from_str(&self.after).with_context(context)?,
                })
            }
            ("chat_messages", "create") => Ok(DocChange::MessageCreated {
                message: serde_json::from_str(&self.after).with_context(context)?,
            }),
            (collection, kind) => bail!("{}: no handler for {kind} on {collection}", context()),
        }
    }
}

/// Oldest pending changes first.
pub fn pending(conn: &Connection, limit: usize) -> Result<Vec<ChangeRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, collection, doc_id, kind, before, after FROM doc_changes ORDER BY id LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(ChangeRow {
            id: row.get(0)?,
            collection: row.get(1)?,
            doc_id: row.get(2)?,
            kind: row.get(3)?,
            before: row.get(4)?,
            after: row.get(5)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Take ownership of a change by deleting it. Returns false if another worker
/// got there first. Claimed changes are never redelivered.
pub fn claim(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM doc_changes WHERE id = ?1", [id])?;
    Ok(rows > 0)
}

pub fn backlog(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM doc_changes", [], |row| row.get(0))?;
    Ok(count as usize)
}
