use anyhow::{bail, Result};
use rusqlite::Connection;

use crate::outbox::TaskDoc;

/// Recipient id the new-task broadcast has always been addressed to. No
/// profile normally carries it, so the push no-ops.
pub const ALL_RECIPIENT: &str = "all";

/// Decides who hears about a newly posted task.
pub trait RecipientResolver: Send + Sync {
    fn resolve(&self, conn: &Connection, task: &TaskDoc) -> Result<Vec<String>>;
}

/// Addresses the broadcast to [`ALL_RECIPIENT`].
pub struct Placeholder;

impl RecipientResolver for Placeholder {
    fn resolve(&self, _conn: &Connection, _task: &TaskDoc) -> Result<Vec<String>> {
        Ok(vec![ALL_RECIPIENT.to_string()])
    }
}

/// Nobody is told about new tasks.
pub struct Nobody;

impl RecipientResolver for Nobody {
    fn resolve(&self, _conn: &Connection, _task: &TaskDoc) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub fn from_name(name: &str) -> Result<Box<dyn RecipientResolver>> {
    match name {
        "placeholder" => Ok(Box::new(Placeholder)),
        "nobody" => Ok(Box::new(Nobody)),
        _ => bail!("unknown recipient resolver '{name}': must be placeholder or nobody"),
    }
}
