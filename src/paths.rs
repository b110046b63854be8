//! Where AssignMint keeps its files when nothing says otherwise.

fn home() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".into())
}

/// Checks `ASSIGNMINT_CONFIG`, falls back to `$HOME/.assignmint/config.toml`.
pub fn config_path() -> String {
    std::env::var("ASSIGNMINT_CONFIG")
        .unwrap_or_else(|_| format!("{}/.assignmint/config.toml", home()))
}

/// `$HOME/.assignmint/assignmint.db`
pub fn default_db_path() -> String {
    format!("{}/.assignmint/assignmint.db", home())
}

/// Pick the database path: explicit flag/env first, then config, then the default.
pub fn resolve_db_path(explicit: Option<&str>, configured: Option<&str>) -> String {
    explicit
        .or(configured)
        .map(str::to_string)
        .unwrap_or_else(default_db_path)
}
