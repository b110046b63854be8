use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    AwaitingExpert,
    InProgress,
    Working,
    PendingReview,
    Delivered,
    Completed,
    RevisionRequested,
    Disputed,
    Cancelled,
    PaymentReceived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 11] = [
        Self::Open,
        Self::AwaitingExpert,
        Self::InProgress,
        Self::Working,
        Self::PendingReview,
        Self::Delivered,
        Self::Completed,
        Self::RevisionRequested,
        Self::Disputed,
        Self::Cancelled,
        Self::PaymentReceived,
    ];

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("invalid status '{s}'"))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::AwaitingExpert => "awaiting_expert",
            Self::InProgress => "in_progress",
            Self::Working => "working",
            Self::PendingReview => "pending_review",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::RevisionRequested => "revision_requested",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
            Self::PaymentReceived => "payment_received",
        }
    }

    /// Still waiting for an expert to pick it up.
    pub fn is_unassigned(self) -> bool {
        matches!(self, Self::Open | Self::AwaitingExpert)
    }

    /// No further transitions are accepted from here.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::PaymentReceived
        )
    }

    /// Returns display icon: .=open, *=being worked on, x=completed, -=cancelled, !=disputed
    pub fn icon(self) -> &'static str {
        match self {
            Self::Open | Self::AwaitingExpert => ".",
            Self::Completed | Self::PaymentReceived => "x",
            Self::Cancelled => "-",
            Self::Disputed => "!",
            _ => "*",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).map_err(|e| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_by: String,
    pub creator_name: String,
    pub assigned_expert_id: Option<String>,
    pub assigned_expert_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub participants: Vec<String>,
    pub task_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    NewTask,
    TaskAccepted,
    TaskCompleted,
    MessageReceived,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewTask => "newTask",
            Self::TaskAccepted => "taskAccepted",
            Self::TaskCompleted => "taskCompleted",
            Self::MessageReceived => "messageReceived",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "newTask" => Ok(Self::NewTask),
            "taskAccepted" => Ok(Self::TaskAccepted),
            "taskCompleted" => Ok(Self::TaskCompleted),
            "messageReceived" => Ok(Self::MessageReceived),
            _ => anyhow::bail!("invalid notification kind '{s}'"),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for NotificationKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NotificationKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).map_err(|e| FromSqlError::Other(e.into()))
    }
}

/// A notification as persisted for the recipient's in-app inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub from_user_id: Option<String>,
    pub task_id: Option<String>,
    pub chat_id: Option<String>,
    pub created_at: String,
}

/// Fields the trigger router supplies when it asks for a record to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub from_user_id: Option<String>,
    pub task_id: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub push_token: Option<String>,
    pub tasks_completed: i64,
    pub tasks_posted: i64,
    pub total_earnings: f64,
    pub rating: f64,
    pub trust_score: f64,
}

/// Payload of the `getUserStats` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub tasks_created: i64,
    pub tasks_completed: i64,
    pub total_earnings: f64,
    pub rating: f64,
    pub trust_score: f64,
}

impl From<&UserProfile> for UserStats {
    fn from(user: &UserProfile) -> Self {
        Self {
            tasks_created: user.tasks_posted,
            tasks_completed: user.tasks_completed,
            total_earnings: user.total_earnings,
            rating: user.rating,
            trust_score: user.trust_score,
        }
    }
}

/// Per-role task counts shown next to the cached task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: u32,
    pub open: u32,
    pub active: u32,
    pub completed: u32,
    pub cancelled: u32,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            match task.status {
                s if s.is_unassigned() => stats.open += 1,
                TaskStatus::Completed | TaskStatus::PaymentReceived => stats.completed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                _ => stats.active += 1,
            }
        }
        stats
    }
}
