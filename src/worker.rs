use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use rusqlite::Connection;

use crate::dispatch::Dispatcher;
use crate::executor::{self, Report};
use crate::ops;
use crate::outbox::{self, ChangeRow, DocChange};
use crate::resolver::RecipientResolver;
use crate::triggers::{self, Event};
use crate::watch::DbWatcher;

const BATCH: usize = 100;

/// Drains the change outbox: claim a change, load what the router needs to
/// decide, run the router, attempt its effects.
pub struct TriggerWorker {
    conn: Connection,
    dispatcher: Dispatcher,
    resolver: Box<dyn RecipientResolver>,
}

impl TriggerWorker {
    pub fn new(
        conn: Connection,
        dispatcher: Dispatcher,
        resolver: Box<dyn RecipientResolver>,
    ) -> Self {
        Self {
            conn,
            dispatcher,
            resolver,
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Process every pending change. Only an unusable outbox is an error;
    /// everything that goes wrong for an individual change is logged.
    pub fn process_pending(&self) -> Result<Report> {
        let mut total = Report::default();
        loop {
            let rows = outbox::pending(&self.conn, BATCH)?;
            if rows.is_empty() {
                break;
            }
            for row in rows {
                if !outbox::claim(&self.conn, row.id)? {
                    continue;
                }
                total.absorb(self.handle(&row));
            }
        }
        Ok(total)
    }

    fn handle(&self, row: &ChangeRow) -> Report {
        let change = match row.decode() {
            Ok(change) => change,
            Err(e) => {
                error!("Dropping undecodable change: {e:#}");
                return Report {
                    failed: 1,
                    ..Report::default()
                };
            }
        };
        let event = self.enrich(change);
        let effects = triggers::route(&event);
        if effects.is_empty() {
            return Report::default();
        }
        debug!(
            "Change #{} ({} {}) -> {} effect(s)",
            row.id,
            row.collection,
            row.doc_id,
            effects.len()
        );
        let report = executor::execute(&self.conn, &self.dispatcher, &effects);
        if report.failed > 0 {
            warn!(
                "Change #{} ({} {}): {} of {} effect(s) failed",
                row.id,
                row.collection,
                row.doc_id,
                report.failed,
                effects.len()
            );
        }
        report
    }

    fn enrich(&self, change: DocChange) -> Event {
        match change {
            DocChange::TaskCreated { after } => {
                let recipients = self
                    .resolver
                    .resolve(&self.conn, &after)
                    .unwrap_or_else(|e| {
                        warn!("Failed to resolve recipients for task {}: {e:#}", after.id);
                        Vec::new()
                    });
                Event::TaskCreated {
                    task: after,
                    recipients,
                }
            }
            DocChange::TaskUpdated { before, after } => Event::TaskUpdated { before, after },
            DocChange::MessageCreated { message } => {
                let participants = ops::chat_participants(&self.conn, &message.chat_id)
                    .unwrap_or_else(|e| {
                        warn!("Failed to load participants of chat {}: {e:#}", message.chat_id);
                        Vec::new()
                    });
                Event::MessageSent {
                    message,
                    participants,
                }
            }
        }
    }

    /// Process changes until `running` goes false, waking on database writes
    /// and at least every `poll`. An unreadable outbox is logged and retried
    /// on the next wake.
    pub fn run(&self, watcher: &DbWatcher, poll: Duration, running: &AtomicBool) {
        info!("Trigger worker started (poll={}s)", poll.as_secs());
        while running.load(Ordering::SeqCst) {
            match self.process_pending() {
                Ok(report) if report != Report::default() => info!(
                    "Processed changes: {} pushed, {} skipped, {} recorded, {} counters, {} failed",
                    report.pushed, report.skipped, report.recorded, report.incremented, report.failed
                ),
                Ok(_) => {}
                Err(e) => error!("Failed to read change outbox: {e:#}"),
            }
            watcher.wait(poll);
        }
        info!("Trigger worker stopped");
    }
}
