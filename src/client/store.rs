//! Observable application state for the app shell.
//!
//! One [`Store`] is created by the application root and passed to whatever
//! needs it. Consumers [`subscribe`](Store::subscribe) to be told about every
//! change; writers go through [`set_state`](Store::set_state) or one of the
//! named operations. Listeners run synchronously on the writer's thread, after
//! the state lock has been released.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::Result;
use log::{debug, warn};
use tokio::sync::OnceCell;

use super::source::{Role, TaskSource};
use crate::model::{NotificationRecord, Task, TaskStats};

pub const DEFAULT_TAB: &str = "home";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletOverlay {
    pub visible: bool,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub initialized: bool,
    pub active_tab: String,
    pub wallet: WalletOverlay,
    pub unread_notifications: u32,
    pub role: Role,
    pub tasks: Vec<Task>,
    pub stats: TaskStats,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            initialized: false,
            active_tab: DEFAULT_TAB.to_string(),
            wallet: WalletOverlay::default(),
            unread_notifications: 0,
            role: Role::default(),
            tasks: Vec::new(),
            stats: TaskStats::default(),
        }
    }
}

/// A shallow update: every `Some` field replaces the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub initialized: Option<bool>,
    pub active_tab: Option<String>,
    pub wallet: Option<WalletOverlay>,
    pub unread_notifications: Option<u32>,
    pub role: Option<Role>,
    pub tasks: Option<Vec<Task>>,
    pub stats: Option<TaskStats>,
}

fn assign<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *slot != v => {
            *slot = v;
            true
        }
        _ => false,
    }
}

impl AppState {
    /// Returns true if any field actually changed.
    pub fn merge(&mut self, patch: StatePatch) -> bool {
        // `|` rather than `||`: every field must be applied.
        assign(&mut self.initialized, patch.initialized)
            | assign(&mut self.active_tab, patch.active_tab)
            | assign(&mut self.wallet, patch.wallet)
            | assign(&mut self.unread_notifications, patch.unread_notifications)
            | assign(&mut self.role, patch.role)
            | assign(&mut self.tasks, patch.tasks)
            | assign(&mut self.stats, patch.stats)
    }
}

type Listener = Arc<dyn Fn(&AppState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Keeps a listener registered. Dropping it (or calling
/// [`unsubscribe`](Subscription::unsubscribe)) removes the listener.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut l = listeners.lock().unwrap_or_else(|e| e.into_inner());
            l.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

struct Inner {
    state: AppState,
    /// Bumped on every reload; a load only lands if its generation is still current.
    generation: u64,
}

pub struct Store<S> {
    source: S,
    user_id: String,
    inner: Mutex<Inner>,
    listeners: Arc<Mutex<Listeners>>,
    init: OnceCell<()>,
}

impl<S: TaskSource> Store<S> {
    pub fn new(source: S, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            source,
            user_id: user_id.into(),
            inner: Mutex::new(Inner {
                state: AppState {
                    role,
                    ..AppState::default()
                },
                generation: 0,
            }),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            init: OnceCell::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> AppState {
        self.lock().state.clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&AppState) + Send + Sync + 'static) -> Subscription {
        let mut l = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let id = l.next_id;
        l.next_id += 1;
        l.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn broadcast(&self, state: &AppState) {
        let listeners: Vec<Listener> = {
            let l = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            l.entries.iter().map(|(_, f)| f.clone()).collect()
        };
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                warn!("State listener panicked; continuing with the rest");
            }
        }
    }

    /// Apply `f` under the lock; broadcast the result if it reports a change.
    fn update(&self, f: impl FnOnce(&mut Inner) -> bool) -> bool {
        let snapshot = {
            let mut inner = self.lock();
            if !f(&mut inner) {
                return false;
            }
            inner.state.clone()
        };
        self.broadcast(&snapshot);
        true
    }

    /// Shallow-merge `patch`. Listeners hear about it only if something
    /// actually changed. Returns whether it did.
    pub fn set_state(&self, patch: StatePatch) -> bool {
        self.update(|inner| inner.state.merge(patch))
    }

    pub fn set_active_tab(&self, tab: impl Into<String>) -> bool {
        self.set_state(StatePatch {
            active_tab: Some(tab.into()),
            ..StatePatch::default()
        })
    }

    pub fn open_wallet(&self, params: BTreeMap<String, String>) -> bool {
        self.set_state(StatePatch {
            wallet: Some(WalletOverlay {
                visible: true,
                params,
            }),
            ..StatePatch::default()
        })
    }

    pub fn close_wallet(&self) -> bool {
        self.set_state(StatePatch {
            wallet: Some(WalletOverlay::default()),
            ..StatePatch::default()
        })
    }

    /// Count a freshly delivered notification record.
    pub fn notification_arrived(&self, record: &NotificationRecord) -> bool {
        if record.read || record.user_id != self.user_id {
            return false;
        }
        self.update(|inner| {
            inner.state.unread_notifications += 1;
            true
        })
    }

    /// Replace the unread count with an authoritative value (e.g. from polling).
    pub fn set_unread(&self, count: u32) -> bool {
        self.set_state(StatePatch {
            unread_notifications: Some(count),
            ..StatePatch::default()
        })
    }

    pub fn mark_read(&self) -> bool {
        self.update(|inner| {
            if inner.state.unread_notifications == 0 {
                return false;
            }
            inner.state.unread_notifications -= 1;
            true
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    /// Load the first task list and stats. Concurrent callers share one
    /// load; once it has succeeded this is a no-op. A failed load can be
    /// retried by calling again.
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                let (generation, role) = {
                    let inner = self.lock();
                    (inner.generation, inner.state.role)
                };
                let (tasks, stats) = self.fetch(role).await?;
                self.update(|inner| {
                    let mut patch = StatePatch {
                        initialized: Some(true),
                        ..StatePatch::default()
                    };
                    if inner.generation == generation {
                        patch.tasks = Some(tasks);
                        patch.stats = Some(stats);
                    }
                    inner.state.merge(patch)
                });
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Switch between requester and expert views. Same role is a no-op;
    /// otherwise the task list and stats are reloaded for the new role.
    pub async fn switch_role(&self, role: Role) -> Result<()> {
        let generation = {
            let mut inner = self.lock();
            if inner.state.role == role {
                return Ok(());
            }
            inner.generation += 1;
            inner.generation
        };
        self.set_state(StatePatch {
            role: Some(role),
            ..StatePatch::default()
        });
        self.reload(generation, role).await
    }

    /// Reload tasks and stats for the current role.
    pub async fn refresh(&self) -> Result<()> {
        let (generation, role) = {
            let mut inner = self.lock();
            inner.generation += 1;
            (inner.generation, inner.state.role)
        };
        self.reload(generation, role).await
    }

    async fn fetch(&self, role: Role) -> Result<(Vec<Task>, TaskStats)> {
        let (tasks, stats) = tokio::join!(
            self.source.load_tasks(role, &self.user_id),
            self.source.load_stats(role, &self.user_id),
        );
        Ok((tasks?, stats?))
    }

    async fn reload(&self, generation: u64, role: Role) -> Result<()> {
        let (tasks, stats) = self.fetch(role).await?;
        self.update(|inner| {
            if inner.generation != generation {
                debug!(
                    "Discarding stale {role:?} load (generation {generation}, now {})",
                    inner.generation
                );
                return false;
            }
            inner.state.merge(StatePatch {
                tasks: Some(tasks),
                stats: Some(stats),
                ..StatePatch::default()
            })
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use anyhow::bail;
    use tokio::sync::Notify;

    use super::*;
    use crate::model::{NotificationKind, TaskStatus};

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            subject: String::new(),
            description: String::new(),
            status: TaskStatus::Open,
            created_by: "u1".into(),
            creator_name: String::new(),
            assigned_expert_id: None,
            assigned_expert_name: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[derive(Default)]
    struct FakeSource {
        task_loads: AtomicUsize,
        stats_loads: AtomicUsize,
        fail: AtomicBool,
        expert_gate: Option<Arc<Notify>>,
    }

    impl TaskSource for FakeSource {
        async fn load_tasks(&self, role: Role, _user_id: &str) -> Result<Vec<Task>> {
            self.task_loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if role == Role::Expert {
                if let Some(gate) = &self.expert_gate {
                    gate.notified().await;
                }
            }
            if self.fail.load(Ordering::SeqCst) {
                bail!("offline");
            }
            Ok(vec![task(&format!("{role:?}-task"))])
        }

        async fn load_stats(&self, _role: Role, _user_id: &str) -> Result<TaskStats> {
            self.stats_loads.fetch_add(1, Ordering::SeqCst);
            Ok(TaskStats {
                total: 1,
                open: 1,
                ..TaskStats::default()
            })
        }
    }

    fn counting_listener(store: &Store<FakeSource>) -> (Arc<Mutex<Vec<AppState>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.subscribe(move |s| sink.lock().unwrap().push(s.clone()));
        (seen, sub)
    }

    #[test]
    fn unchanged_patch_is_silent() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let (seen, _sub) = counting_listener(&store);

        assert!(!store.set_active_tab(DEFAULT_TAB));
        assert!(!store.set_state(StatePatch {
            role: Some(Role::Requester),
            unread_notifications: Some(0),
            ..StatePatch::default()
        }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn change_notifies_every_listener_once() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let (first, _a) = counting_listener(&store);
        let (second, _b) = counting_listener(&store);

        assert!(store.set_state(StatePatch {
            active_tab: Some("wallet".into()),
            unread_notifications: Some(3),
            ..StatePatch::default()
        }));
        for seen in [first, second] {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].active_tab, "wallet");
            assert_eq!(seen[0].unread_notifications, 3);
            assert_eq!(seen[0].role, Role::Requester);
        }
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let _bad = store.subscribe(|_| panic!("listener bug"));
        let (seen, _good) = counting_listener(&store);

        store.set_active_tab("chat");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let (seen, sub) = counting_listener(&store);
        store.set_active_tab("chat");
        sub.unsubscribe();
        store.set_active_tab("profile");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn wallet_overlay_open_and_close() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let params = BTreeMap::from([("amount".to_string(), "25".to_string())]);
        assert!(store.open_wallet(params.clone()));
        let state = store.state();
        assert!(state.wallet.visible);
        assert_eq!(state.wallet.params, params);
        assert!(store.close_wallet());
        assert!(!store.state().wallet.visible);
        assert!(!store.close_wallet());
    }

    #[test]
    fn unread_count_tracking() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let record = |user: &str, read: bool| NotificationRecord {
            id: 1,
            user_id: user.into(),
            kind: NotificationKind::MessageReceived,
            title: "t".into(),
            body: "b".into(),
            read,
            from_user_id: None,
            task_id: None,
            chat_id: None,
            created_at: String::new(),
        };
        assert!(store.notification_arrived(&record("u1", false)));
        assert!(store.notification_arrived(&record("u1", false)));
        assert!(!store.notification_arrived(&record("u1", true)));
        assert!(!store.notification_arrived(&record("someone-else", false)));
        assert_eq!(store.state().unread_notifications, 2);

        assert!(store.mark_read());
        assert_eq!(store.state().unread_notifications, 1);
        assert!(store.set_unread(0));
        assert!(!store.mark_read());
    }

    #[tokio::test]
    async fn concurrent_initialize_loads_once() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        let (seen, _sub) = counting_listener(&store);

        let (a, b) = tokio::join!(store.initialize(), store.initialize());
        a.unwrap();
        b.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.source.task_loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.source.stats_loads.load(Ordering::SeqCst), 1);
        assert!(store.is_initialized());
        let state = store.state();
        assert!(state.initialized);
        assert_eq!(state.tasks[0].id, "Requester-task");
        assert_eq!(state.stats.total, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_initialize_can_retry() {
        let source = FakeSource::default();
        source.fail.store(true, Ordering::SeqCst);
        let store = Store::new(source, "u1", Role::Requester);

        assert!(store.initialize().await.is_err());
        assert!(!store.is_initialized());
        assert!(!store.state().initialized);

        store.source.fail.store(false, Ordering::SeqCst);
        store.initialize().await.unwrap();
        assert!(store.state().initialized);
        assert_eq!(store.source.task_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn same_role_is_a_no_op() {
        let store = Store::new(FakeSource::default(), "u1", Role::Requester);
        store.switch_role(Role::Requester).await.unwrap();
        assert_eq!(store.source.task_loads.load(Ordering::SeqCst), 0);

        store.switch_role(Role::Expert).await.unwrap();
        let state = store.state();
        assert_eq!(state.role, Role::Expert);
        assert_eq!(state.tasks[0].id, "Expert-task");
        assert_eq!(store.source.task_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_load_is_discarded() {
        let gate = Arc::new(Notify::new());
        let source = FakeSource {
            expert_gate: Some(gate.clone()),
            ..FakeSource::default()
        };
        let store = Store::new(source, "u1", Role::Requester);

        let (to_expert, back) = tokio::join!(store.switch_role(Role::Expert), async {
            tokio::task::yield_now().await;
            let result = store.switch_role(Role::Requester).await;
            gate.notify_one();
            result
        });
        to_expert.unwrap();
        back.unwrap();

        let state = store.state();
        assert_eq!(state.role, Role::Requester);
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].id, "Requester-task");
    }
}
