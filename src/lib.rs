pub mod client;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod executor;
pub mod http;
pub mod model;
pub mod ops;
pub mod outbox;
pub mod output;
pub mod paths;
pub mod push;
pub mod resolver;
pub mod triggers;
pub mod validate;
pub mod watch;
pub mod worker;
