use std::collections::BTreeMap;

use log::{debug, warn};
use rusqlite::Connection;

use crate::ops;
use crate::push::{PushMessage, PushProvider};

/// Outcome of a best-effort push. Nothing here is an error to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No profile for the recipient.
    NoProfile,
    /// Profile exists but has no push token.
    NoToken,
    /// The provider refused or failed; already logged.
    Rejected,
    /// The profile lookup itself failed; already logged.
    LookupFailed,
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::LookupFailed)
    }
}

pub struct Dispatcher {
    provider: Box<dyn PushProvider>,
}

impl Dispatcher {
    pub fn new(provider: impl PushProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
        }
    }

    /// Resolve the recipient's push token and hand the message to the
    /// provider. At most one attempt; failures are logged and reported in
    /// the returned [`Delivery`], never raised.
    pub fn send(
        &self,
        conn: &Connection,
        recipient: &str,
        title: &str,
        body: &str,
        data: BTreeMap<String, String>,
    ) -> Delivery {
        let user = match ops::find_user(conn, recipient) {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("No profile for {recipient}, skipping push");
                return Delivery::NoProfile;
            }
            Err(e) => {
                warn!("Failed to look up {recipient} for push: {e:#}");
                return Delivery::LookupFailed;
            }
        };
        let Some(token) = user.push_token.filter(|t| !t.is_empty()) else {
            debug!("No push token for {recipient}, skipping push");
            return Delivery::NoToken;
        };

        let message = PushMessage {
            token,
            title: title.to_string(),
            body: body.to_string(),
            data,
        };
        match self.provider.send(&message) {
            Ok(()) => {
                debug!("Push sent to {recipient}: {title}");
                Delivery::Sent
            }
            Err(e) => {
                warn!("Push to {recipient} failed: {e:#}");
                Delivery::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db;
    use crate::ops::fixtures::marketplace;
    use crate::push::testing::RecordingProvider;

    fn data() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), "taskAccepted".to_string()),
            ("taskId".to_string(), "t1".to_string()),
        ])
    }

    #[test]
    fn sends_to_stored_token() {
        let conn = db::open_memory().unwrap();
        marketplace(&conn);
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = Dispatcher::new(provider.clone());

        let outcome = dispatcher.send(&conn, "r1", "Task Accepted!", "Emery took it", data());
        assert_eq!(outcome, Delivery::Sent);
        let attempts = provider.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].token, "tok-r1");
        assert_eq!(attempts[0].data["taskId"], "t1");
    }

    #[test]
    fn missing_token_skips_provider() {
        let conn = db::open_memory().unwrap();
        marketplace(&conn);
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher = Dispatcher::new(provider.clone());

        assert_eq!(
            dispatcher.send(&conn, "e2", "t", "b", data()),
            Delivery::NoToken
        );
        assert_eq!(
            dispatcher.send(&conn, "ghost", "t", "b", data()),
            Delivery::NoProfile
        );
        assert!(provider.attempts().is_empty());
    }

    #[test]
    fn provider_failure_is_swallowed() {
        let conn = db::open_memory().unwrap();
        marketplace(&conn);
        let provider = Arc::new(RecordingProvider::failing_for(&["tok-r1"]));
        let dispatcher = Dispatcher::new(provider.clone());

        let outcome = dispatcher.send(&conn, "r1", "t", "b", data());
        assert_eq!(outcome, Delivery::Rejected);
        assert!(outcome.is_failure());
        assert_eq!(provider.attempts().len(), 1);
    }

    #[test]
    fn broken_store_reports_lookup_failure() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(RecordingProvider::default());
        assert_eq!(
            dispatcher.send(&conn, "r1", "t", "b", data()),
            Delivery::LookupFailed
        );
    }
}
