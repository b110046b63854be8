//! Client-side consumer of notification records: the app's observable state
//! store and the data source it loads from.

pub mod source;
pub mod store;

pub use source::{Role, SqliteSource, TaskSource};
pub use store::{AppState, StatePatch, Store, Subscription, WalletOverlay};
