use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::paths;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_POLL_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    /// `log` (default) or `spool`.
    pub provider: Option<String>,
    pub spool_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    /// Who hears about new tasks: `placeholder` (default) or `nobody`.
    pub resolver: Option<String>,
    /// Fallback poll interval; normal operation is woken by file events.
    pub poll_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    pub bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Notifications older than this are removed by `prune`. Unset keeps everything.
    pub days: Option<u32>,
}

impl TriggerConfig {
    pub fn resolver_name(&self) -> &str {
        self.resolver.as_deref().unwrap_or("placeholder")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs.unwrap_or(DEFAULT_POLL_SECS))
    }
}

impl HttpConfig {
    pub fn bind_addr(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }
}

impl Config {
    /// Load config from `ASSIGNMINT_CONFIG` or `~/.assignmint/config.toml`.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(&paths::config_path()))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        match self.push.provider.as_deref() {
            None | Some("log") => {}
            Some("spool") if self.push.spool_path.is_none() => bail!(
                "invalid {}: push.provider = \"spool\" requires push.spool_path",
                path.display()
            ),
            Some("spool") => {}
            Some(other) => bail!(
                "invalid {}: unknown push.provider '{other}' (log, spool)",
                path.display()
            ),
        }
        match self.triggers.resolver_name() {
            "placeholder" | "nobody" => {}
            other => bail!(
                "invalid {}: unknown triggers.resolver '{other}' (placeholder, nobody)",
                path.display()
            ),
        }
        if self.triggers.poll_secs == Some(0) {
            bail!("invalid {}: triggers.poll_secs must be positive", path.display());
        }
        if self.retention.days == Some(0) {
            bail!("invalid {}: retention.days must be positive", path.display());
        }
        Ok(())
    }
}
