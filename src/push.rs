use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;

use crate::config::PushConfig;

/// What gets handed to the push-messaging provider. `data` carries the
/// deep-link fields (`type`, `taskId`, `chatId`) the app reads on tap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

pub trait PushProvider: Send + Sync {
    fn send(&self, message: &PushMessage) -> Result<()>;
}

impl<T: PushProvider + ?Sized> PushProvider for Arc<T> {
    fn send(&self, message: &PushMessage) -> Result<()> {
        (**self).send(message)
    }
}

impl<T: PushProvider + ?Sized> PushProvider for Box<T> {
    fn send(&self, message: &PushMessage) -> Result<()> {
        (**self).send(message)
    }
}

/// Writes each push to the log instead of delivering it.
pub struct LogProvider;

impl PushProvider for LogProvider {
    fn send(&self, message: &PushMessage) -> Result<()> {
        info!(
            "push to {}: {} | {} {:?}",
            message.token, message.title, message.body, message.data
        );
        Ok(())
    }
}

/// Appends each push as one JSON line to a spool file; an external forwarder
/// owns actual delivery.
pub struct SpoolProvider {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpoolProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl PushProvider for SpoolProvider {
    fn send(&self, message: &PushMessage) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open spool {}", self.path.display()))?;
        f.write_all(line.as_bytes())
            .with_context(|| format!("failed to write spool {}", self.path.display()))?;
        Ok(())
    }
}

pub fn from_config(config: &PushConfig) -> Result<Box<dyn PushProvider>> {
    match config.provider.as_deref().unwrap_or("log") {
        "log" => Ok(Box::new(LogProvider)),
        "spool" => {
            let path = config
                .spool_path
                .as_deref()
                .context("push.provider = \"spool\" requires push.spool_path")?;
            Ok(Box::new(SpoolProvider::new(path)))
        }
        other => bail!("unknown push provider '{other}': must be log or spool"),
    }
}
