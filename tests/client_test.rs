use std::sync::{Arc, Mutex};

use anyhow::Result;

use assignmint::client::{Role, SqliteSource, Store};
use assignmint::db;
use assignmint::dispatch::Dispatcher;
use assignmint::ops;
use assignmint::push::{PushMessage, PushProvider};
use assignmint::resolver::Nobody;
use assignmint::worker::TriggerWorker;

struct Discard;

impl PushProvider for Discard {
    fn send(&self, _message: &PushMessage) -> Result<()> {
        Ok(())
    }
}

fn shared_db() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db").to_string_lossy().into_owned();
    let conn = db::open(&path).unwrap();
    db::init(&conn).unwrap();
    ops::add_user(&conn, "r1", "Riley", Some("tok-r1")).unwrap();
    ops::add_user(&conn, "e1", "Emery", Some("tok-e1")).unwrap();
    ops::post_task(&conn, "t1", "Essay", "english", "", "r1").unwrap();
    ops::post_task(&conn, "t2", "Proof", "math", "", "r1").unwrap();
    (dir, path)
}

fn open(path: &str) -> rusqlite::Connection {
    let conn = db::open(path).unwrap();
    db::init(&conn).unwrap();
    conn
}

#[tokio::test]
async fn store_follows_the_database() {
    let (_dir, path) = shared_db();
    let worker = TriggerWorker::new(open(&path), Dispatcher::new(Discard), Box::new(Nobody));
    let store = Store::new(SqliteSource::new(open(&path)), "r1", Role::Requester);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(move |state| sink.lock().unwrap().push(state.clone()));

    store.initialize().await.unwrap();
    let state = store.state();
    assert!(state.initialized);
    assert_eq!(state.tasks.len(), 2);
    assert_eq!(state.stats.open, 2);

    // An expert accepts; the trigger worker writes the creator's record.
    ops::accept_task(worker.conn(), "t1", "e1").unwrap();
    worker.process_pending().unwrap();

    let inbox = ops::list_notifications(worker.conn(), "r1", true).unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(store.notification_arrived(&inbox[0]));
    store.refresh().await.unwrap();

    let state = store.state();
    assert_eq!(state.unread_notifications, 1);
    assert_eq!(state.stats.active, 1);
    assert_eq!(state.stats.open, 1);

    // Reading it on another device: the authoritative count wins.
    ops::mark_read(worker.conn(), inbox[0].id).unwrap();
    store.set_unread(ops::unread_count(worker.conn(), "r1").unwrap());
    assert_eq!(store.state().unread_notifications, 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4, "initialize, arrival, refresh, reset");
}

#[tokio::test]
async fn expert_view_shows_assigned_work() {
    let (_dir, path) = shared_db();
    let conn = open(&path);
    ops::accept_task(&conn, "t2", "e1").unwrap();

    let store = Store::new(SqliteSource::new(open(&path)), "e1", Role::Requester);
    store.initialize().await.unwrap();
    assert!(store.state().tasks.is_empty());

    store.switch_role(Role::Expert).await.unwrap();
    let state = store.state();
    assert_eq!(state.role, Role::Expert);
    assert_eq!(state.tasks.len(), 1);
    assert_eq!(state.tasks[0].id, "t2");
    assert_eq!(state.stats.active, 1);
}
