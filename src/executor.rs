use log::{debug, warn};
use rusqlite::Connection;

use crate::dispatch::{Delivery, Dispatcher};
use crate::ops;
use crate::triggers::Effect;

/// Tally of one batch of effects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub pushed: usize,
    pub skipped: usize,
    pub recorded: usize,
    pub incremented: usize,
    pub failed: usize,
}

impl Report {
    pub fn absorb(&mut self, other: Report) {
        self.pushed += other.pushed;
        self.skipped += other.skipped;
        self.recorded += other.recorded;
        self.incremented += other.incremented;
        self.failed += other.failed;
    }
}

/// Attempt every effect once, in order. A failing effect is logged and
/// counted; it never stops the ones after it.
pub fn execute(conn: &Connection, dispatcher: &Dispatcher, effects: &[Effect]) -> Report {
    let mut report = Report::default();
    for effect in effects {
        match effect {
            Effect::Push {
                user_id,
                title,
                body,
                data,
            } => match dispatcher.send(conn, user_id, title, body, data.clone()) {
                Delivery::Sent => report.pushed += 1,
                Delivery::NoProfile | Delivery::NoToken => report.skipped += 1,
                Delivery::Rejected | Delivery::LookupFailed => report.failed += 1,
            },
            Effect::Record(notification) => match ops::insert_notification(conn, notification) {
                Ok(id) => {
                    debug!(
                        "Recorded {} notification #{id} for {}",
                        notification.kind, notification.user_id
                    );
                    report.recorded += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to record {} notification for {}: {e:#}",
                        notification.kind, notification.user_id
                    );
                    report.failed += 1;
                }
            },
            Effect::Increment { user_id, counter } => {
                match ops::increment_counter(conn, user_id, *counter) {
                    Ok(()) => report.incremented += 1,
                    Err(e) => {
                        warn!("Failed to increment {counter:?} for {user_id}: {e:#}");
                        report.failed += 1;
                    }
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::db;
    use crate::model::{NewNotification, NotificationKind};
    use crate::ops::fixtures::marketplace;
    use crate::ops::Counter;
    use crate::push::testing::RecordingProvider;

    fn push(user: &str) -> Effect {
        Effect::Push {
            user_id: user.into(),
            title: "t".into(),
            body: "b".into(),
            data: BTreeMap::new(),
        }
    }

    fn record(user: &str) -> Effect {
        Effect::Record(NewNotification {
            user_id: user.into(),
            kind: NotificationKind::MessageReceived,
            title: "t".into(),
            body: "b".into(),
            from_user_id: None,
            task_id: None,
            chat_id: None,
        })
    }

    #[test]
    fn failures_do_not_stop_later_effects() {
        let conn = db::open_memory().unwrap();
        marketplace(&conn);
        let provider = Arc::new(RecordingProvider::failing_for(&["tok-r1"]));
        let dispatcher = Dispatcher::new(provider.clone());

        let effects = vec![
            push("r1"),
            record("r1"),
            Effect::Increment {
                user_id: "ghost".into(),
                counter: Counter::TasksPosted,
            },
            push("e1"),
            push("e2"),
            Effect::Increment {
                user_id: "e1".into(),
                counter: Counter::TasksCompleted,
            },
        ];
        let report = execute(&conn, &dispatcher, &effects);
        assert_eq!(
            report,
            Report {
                pushed: 1,
                skipped: 1,
                recorded: 1,
                incremented: 1,
                failed: 2,
            }
        );
        assert_eq!(provider.attempts().len(), 2);
        assert_eq!(ops::get_user(&conn, "e1").unwrap().tasks_completed, 1);
    }

    #[test]
    fn record_failure_keeps_push() {
        let conn = db::open_memory().unwrap();
        marketplace(&conn);
        conn.execute_batch("DROP TABLE notifications").unwrap();
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = Dispatcher::new(provider.clone());

        let report = execute(&conn, &dispatcher, &[record("r1"), push("r1")]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pushed, 1);
    }
}
