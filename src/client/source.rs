use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::model::{Task, TaskStats};
use crate::ops;

/// Which side of the marketplace the user is currently acting as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Requester,
    Expert,
}

impl Role {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "requester" => Ok(Self::Requester),
            "expert" => Ok(Self::Expert),
            _ => anyhow::bail!("invalid role '{s}': must be requester or expert"),
        }
    }
}

/// Where the store gets its task list and stats from.
pub trait TaskSource {
    fn load_tasks(&self, role: Role, user_id: &str)
        -> impl Future<Output = Result<Vec<Task>>> + Send;

    fn load_stats(&self, role: Role, user_id: &str)
        -> impl Future<Output = Result<TaskStats>> + Send;
}

/// Reads straight from the marketplace database.
#[derive(Clone)]
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn tasks_for(&self, role: Role, user_id: &str) -> Result<Vec<Task>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))?;
        match role {
            Role::Requester => ops::tasks_posted_by(&conn, user_id),
            Role::Expert => ops::tasks_assigned_to(&conn, user_id),
        }
    }
}

impl TaskSource for SqliteSource {
    async fn load_tasks(&self, role: Role, user_id: &str) -> Result<Vec<Task>> {
        self.tasks_for(role, user_id)
    }

    async fn load_stats(&self, role: Role, user_id: &str) -> Result<TaskStats> {
        Ok(TaskStats::from_tasks(&self.tasks_for(role, user_id)?))
    }
}
