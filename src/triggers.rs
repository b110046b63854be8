//! Decision logic for document triggers. [`route`] looks at one change (plus
//! whatever context the worker loaded for it) and returns the side effects to
//! attempt. It does no I/O; the executor runs the effects.

use std::collections::BTreeMap;

use crate::model::{NewNotification, NotificationKind, TaskStatus};
use crate::ops::Counter;
use crate::outbox::{MessageDoc, TaskDoc};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TaskCreated {
        task: TaskDoc,
        recipients: Vec<String>,
    },
    TaskUpdated {
        before: TaskDoc,
        after: TaskDoc,
    },
    MessageSent {
        message: MessageDoc,
        participants: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Push {
        user_id: String,
        title: String,
        body: String,
        data: BTreeMap<String, String>,
    },
    Record(NewNotification),
    Increment {
        user_id: String,
        counter: Counter,
    },
}

/// An expert took the task: open → in_progress with the expert newly set on
/// the same write.
pub fn is_acceptance(before: &TaskDoc, after: &TaskDoc) -> bool {
    before.status == TaskStatus::Open
        && after.status == TaskStatus::InProgress
        && before.assigned_expert_id.is_none()
        && after.assigned_expert_id.is_some()
}

pub fn is_completion(before: &TaskDoc, after: &TaskDoc) -> bool {
    before.status == TaskStatus::InProgress && after.status == TaskStatus::Completed
}

pub fn route(event: &Event) -> Vec<Effect> {
    match event {
        Event::TaskCreated { task, recipients } => task_created(task, recipients),
        Event::TaskUpdated { before, after } => {
            if is_acceptance(before, after) {
                task_accepted(after)
            } else if is_completion(before, after) {
                task_completed(after)
            } else {
                Vec::new()
            }
        }
        Event::MessageSent {
            message,
            participants,
        } => message_sent(message, participants),
    }
}

fn task_data(kind: NotificationKind, task_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("type".to_string(), kind.as_str().to_string()),
        ("taskId".to_string(), task_id.to_string()),
    ])
}

fn task_created(task: &TaskDoc, recipients: &[String]) -> Vec<Effect> {
    let title = "New Task Available".to_string();
    let body = if task.subject.is_empty() {
        task.title.clone()
    } else {
        format!("{} ({})", task.title, task.subject)
    };

    let mut effects = Vec::new();
    for recipient in recipients.iter().filter(|r| **r != task.created_by) {
        effects.push(Effect::Push {
            user_id: recipient.clone(),
            title: title.clone(),
            body: body.clone(),
            data: task_data(NotificationKind::NewTask, &task.id),
        });
        effects.push(Effect::Record(NewNotification {
            user_id: recipient.clone(),
            kind: NotificationKind::NewTask,
            title: title.clone(),
            body: body.clone(),
            from_user_id: Some(task.created_by.clone()),
            task_id: Some(task.id.clone()),
            chat_id: None,
        }));
    }
    effects
}

fn task_accepted(task: &TaskDoc) -> Vec<Effect> {
    let Some(expert_id) = task.assigned_expert_id.clone() else {
        return Vec::new();
    };
    let expert_name = task
        .assigned_expert_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(&expert_id);
    let title = "Task Accepted!".to_string();
    let body = format!("{expert_name} has accepted your task \"{}\"", task.title);

    vec![
        Effect::Push {
            user_id: task.created_by.clone(),
            title: title.clone(),
            body: body.clone(),
            data: task_data(NotificationKind::TaskAccepted, &task.id),
        },
        Effect::Record(NewNotification {
            user_id: task.created_by.clone(),
            kind: NotificationKind::TaskAccepted,
            title,
            body,
            from_user_id: Some(expert_id),
            task_id: Some(task.id.clone()),
            chat_id: None,
        }),
    ]
}

fn task_completed(task: &TaskDoc) -> Vec<Effect> {
    let title = "Task Completed!".to_string();
    let body = format!("Your task \"{}\" has been completed", task.title);

    let mut effects = vec![
        Effect::Push {
            user_id: task.created_by.clone(),
            title: title.clone(),
            body: body.clone(),
            data: task_data(NotificationKind::TaskCompleted, &task.id),
        },
        Effect::Record(NewNotification {
            user_id: task.created_by.clone(),
            kind: NotificationKind::TaskCompleted,
            title,
            body,
            from_user_id: task.assigned_expert_id.clone(),
            task_id: Some(task.id.clone()),
            chat_id: None,
        }),
    ];
    if let Some(expert_id) = &task.assigned_expert_id {
        effects.push(Effect::Increment {
            user_id: expert_id.clone(),
            counter: Counter::TasksCompleted,
        });
    }
    effects.push(Effect::Increment {
        user_id: task.created_by.clone(),
        counter: Counter::TasksPosted,
    });
    effects
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

fn message_sent(message: &MessageDoc, participants: &[String]) -> Vec<Effect> {
    let sender = if message.sender_name.is_empty() {
        &message.sender_id
    } else {
        &message.sender_name
    };
    let title = format!("New message from {sender}");
    let body = preview(&message.text);
    let data = BTreeMap::from([
        (
            "type".to_string(),
            NotificationKind::MessageReceived.as_str().to_string(),
        ),
        ("chatId".to_string(), message.chat_id.clone()),
        ("senderId".to_string(), message.sender_id.clone()),
    ]);

    let mut effects = Vec::new();
    for recipient in participants.iter().filter(|p| **p != message.sender_id) {
        effects.push(Effect::Push {
            user_id: recipient.clone(),
            title: title.clone(),
            body: body.clone(),
            data: data.clone(),
        });
        effects.push(Effect::Record(NewNotification {
            user_id: recipient.clone(),
            kind: NotificationKind::MessageReceived,
            title: title.clone(),
            body: body.clone(),
            from_user_id: Some(message.sender_id.clone()),
            task_id: None,
            chat_id: Some(message.chat_id.clone()),
        }));
    }
    effects
}
