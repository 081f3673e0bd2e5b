use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

/// Identifies one presented authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ReplayRecord {
    pub client: String,
    pub server: String,
    pub ctime: i64,
    pub cusec: u32,
}

/// Authenticators seen within the replay window.
///
/// [Receipt of KRB_AP_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3):
/// > the server MUST utilize a replay cache to remember any authenticator presented within the
/// > allowable clock skew.
#[derive(Debug)]
pub(crate) struct ReplayCache {
    window: Duration,
    seen: Mutex<HashMap<ReplayRecord, OffsetDateTime>>,
}

impl ReplayCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records the authenticator. Returns `false` if it was already present.
    pub fn check_and_insert(&self, record: ReplayRecord, now: OffsetDateTime) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        let window = self.window;
        seen.retain(|_, inserted| now - *inserted <= window);

        if seen.contains_key(&record) {
            return false;
        }

        seen.insert(record, now);

        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
