use anyhow::{bail, Result};

/// Validate a document id: must be non-empty and match [a-zA-Z0-9_-]+
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("{kind} id must not be empty");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("{kind} id '{id}' contains invalid characters: only a-z, A-Z, 0-9, _, - allowed");
    }
    Ok(())
}

/// A chat has exactly two distinct participants.
pub fn validate_participants(participants: &[&str]) -> Result<()> {
    match participants {
        [a, b] if a == b => bail!("a chat needs two different participants"),
        [a, b] => {
            validate_id("user", a)?;
            validate_id("user", b)
        }
        _ => bail!(
            "a chat needs exactly two participants, got {}",
            participants.len()
        ),
    }
}

pub fn require_participant(chat_id: &str, participants: &[String], sender: &str) -> Result<()> {
    if !participants.iter().any(|p| p == sender) {
        bail!("'{sender}' is not a participant of chat '{chat_id}'");
    }
    Ok(())
}

pub fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty");
    }
    Ok(())
}
