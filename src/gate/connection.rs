use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::NegotiationError;
use crate::mapper::Identity;
use crate::negotiation::NegotiationSession;

#[derive(Debug, Default)]
pub(crate) enum ConnectionState {
    #[default]
    Idle,
    Negotiating(NegotiationSession),
    Authenticated(Identity),
    /// Terminal: every later request on the connection is rejected.
    Rejected(NegotiationError),
}

/// Negotiation state of one client connection.
///
/// The host creates one value per accepted connection and inserts a clone of it into the
/// extensions of every request read from that connection. The negotiation session lives inside
/// and is dropped together with the last clone, so it never outlives the connection.
///
/// Rounds on one connection are serialized by the inner mutex.
#[derive(Debug, Clone, Default)]
pub struct NegotiateConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl NegotiateConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity cached by a previous successful negotiation.
    pub fn identity(&self) -> Option<Identity> {
        match &*self.lock() {
            ConnectionState::Authenticated(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn is_negotiating(&self) -> bool {
        matches!(&*self.lock(), ConnectionState::Negotiating(_))
    }

    /// Reason the connection was rejected, if it was.
    pub fn rejection(&self) -> Option<NegotiationError> {
        match &*self.lock() {
            ConnectionState::Rejected(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
