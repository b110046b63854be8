use crate::client::AppState;
use crate::model::{Chat, ChatMessage, NotificationRecord, Task, UserProfile, UserStats};

pub fn format_task_detail(task: &Task) -> String {
    let mut out = String::new();
    out.push_str(&format!("Id:          {}\n", task.id));
    out.push_str(&format!("Title:       {}\n", task.title));
    out.push_str(&format!("Status:      {}\n", task.status));
    if !task.subject.is_empty() {
        out.push_str(&format!("Subject:     {}\n", task.subject));
    }
    if !task.description.is_empty() {
        out.push_str(&format!("Description: {}\n", task.description));
    }
    out.push_str(&format!(
        "Posted by:   {} ({})\n",
        task.creator_name, task.created_by
    ));
    if let Some(ref expert) = task.assigned_expert_id {
        let name = task.assigned_expert_name.as_deref().unwrap_or("");
        out.push_str(&format!("Expert:      {name} ({expert})\n"));
    }
    out.push_str(&format!("Created:     {}\n", task.created_at));
    out.push_str(&format!("Updated:     {}\n", task.updated_at));
    out
}

pub fn format_task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        let expert = task
            .assigned_expert_id
            .as_ref()
            .map(|e| format!(" (expert: {e})"))
            .unwrap_or_default();
        out.push_str(&format!(
            "{} {}  {} [{}]{}\n",
            task.status.icon(),
            task.id,
            task.title,
            task.status,
            expert
        ));
    }
    out
}

pub fn format_user(user: &UserProfile) -> String {
    let mut out = String::new();
    out.push_str(&format!("Id:          {}\n", user.id));
    out.push_str(&format!("Name:        {}\n", user.display_name));
    out.push_str(&format!(
        "Push token:  {}\n",
        user.push_token.as_deref().unwrap_or("(none)")
    ));
    out.push_str(&format_stats(&UserStats::from(user)));
    out
}

pub fn format_stats(stats: &UserStats) -> String {
    format!(
        "Posted:      {}\nCompleted:   {}\nEarnings:    {:.2}\nRating:      {:.1}\nTrust score: {:.1}\n",
        stats.tasks_created, stats.tasks_completed, stats.total_earnings, stats.rating, stats.trust_score
    )
}

pub fn format_notifications(records: &[NotificationRecord]) -> String {
    let mut out = String::new();
    for n in records {
        let marker = if n.read { " " } else { "*" };
        out.push_str(&format!(
            "{marker} {:>4} [{}] {}: {}  {}\n",
            n.id, n.created_at, n.kind, n.title, n.body
        ));
    }
    out
}

pub fn format_chat(chat: &Chat, messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Chat:        {}\n", chat.id));
    out.push_str(&format!("Between:     {}\n", chat.participants.join(", ")));
    if let Some(ref task) = chat.task_id {
        out.push_str(&format!("Task:        {task}\n"));
    }
    if !messages.is_empty() {
        out.push('\n');
        for m in messages {
            out.push_str(&format!("  [{}] {}: {}\n", m.created_at, m.sender_name, m.text));
        }
    }
    out
}

/// One-line summary of the client store, printed on every change.
pub fn format_state(state: &AppState) -> String {
    let mut line = format!(
        "[{:?}] tab={} unread={} tasks={} (open {}, active {}, completed {}, cancelled {})",
        state.role,
        state.active_tab,
        state.unread_notifications,
        state.stats.total,
        state.stats.open,
        state.stats.active,
        state.stats.completed,
        state.stats.cancelled,
    );
    if state.wallet.visible {
        line.push_str(" wallet=open");
    }
    if !state.initialized {
        line.push_str(" (loading)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationKind, TaskStatus};

    fn make_task(id: &str, status: TaskStatus, expert: Option<&str>) -> Task {
        Task {
            id: id.to_string(),
            title: format!("{id} title"),
            subject: String::new(),
            description: String::new(),
            status,
            created_by: "r1".to_string(),
            creator_name: "Riley".to_string(),
            assigned_expert_id: expert.map(str::to_string),
            assigned_expert_name: expert.map(|_| "Emery".to_string()),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn flat_list() {
        let tasks = vec![
            make_task("a", TaskStatus::Open, None),
            make_task("b", TaskStatus::InProgress, Some("e1")),
        ];
        let out = format_task_list(&tasks);
        assert!(out.contains(". a  a title [open]"));
        assert!(out.contains("* b  b title [in_progress] (expert: e1)"));
    }

    #[test]
    fn detail_shows_expert_only_when_assigned() {
        let out = format_task_detail(&make_task("a", TaskStatus::Open, None));
        assert!(!out.contains("Expert:"));
        let out = format_task_detail(&make_task("a", TaskStatus::InProgress, Some("e1")));
        assert!(out.contains("Expert:      Emery (e1)"));
    }

    #[test]
    fn unread_marker() {
        let record = NotificationRecord {
            id: 7,
            user_id: "r1".into(),
            kind: NotificationKind::TaskAccepted,
            title: "Task Accepted!".into(),
            body: "b".into(),
            read: false,
            from_user_id: None,
            task_id: None,
            chat_id: None,
            created_at: "2025-01-01T00:00:00Z".into(),
        };
        let out = format_notifications(&[record]);
        assert!(out.starts_with("*    7 [2025-01-01T00:00:00Z] taskAccepted: Task Accepted!"));
    }

    #[test]
    fn state_summary() {
        let state = AppState {
            unread_notifications: 2,
            ..AppState::default()
        };
        let line = format_state(&state);
        assert!(line.contains("[Requester] tab=home unread=2"));
        assert!(line.ends_with("(loading)"));
    }
}
