//! Per-producer session state.

use crate::consumer::ConsumerConnectionListener;
use crate::producer::ProducerId;
use crate::server::ConnectionId;
use std::fmt;
use std::sync::Arc;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for OFFER.
    Unattached,
    /// OFFER received, waiting for the consumer to connect.
    Identified,
    /// START sent, clause updates are delivered.
    Active,
    /// Terminal. Nothing is delivered any more.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unattached => "unattached",
            SessionState::Identified => "identified",
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// What a session held when it was disconnected.
pub struct Detached {
    /// State before the transition.
    pub previous: SessionState,
    /// The attached listener, present only if the session was active.
    pub listener: Option<Arc<dyn ConsumerConnectionListener>>,
}

/// A producer session.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    producer: Option<ProducerId>,
    listener: Option<Arc<dyn ConsumerConnectionListener>>,
}

impl Session {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Unattached,
            producer: None,
            listener: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn producer(&self) -> Option<&ProducerId> {
        self.producer.as_ref()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    /// Records the producer identity. Only the first OFFER counts.
    pub fn identify(&mut self, producer: ProducerId) -> bool {
        if self.state != SessionState::Unattached {
            return false;
        }
        self.producer = Some(producer);
        self.state = SessionState::Identified;
        true
    }

    /// Attaches the listener of an identified session.
    pub fn attach(&mut self, listener: Arc<dyn ConsumerConnectionListener>) -> bool {
        if self.state != SessionState::Identified {
            return false;
        }
        self.listener = Some(listener);
        self.state = SessionState::Active;
        true
    }

    /// Listener of an active session.
    pub fn listener(&self) -> Option<&Arc<dyn ConsumerConnectionListener>> {
        match self.state {
            SessionState::Active => self.listener.as_ref(),
            _ => None,
        }
    }

    /// Moves to `Disconnected`.
    ///
    /// Returns `None` if the session already was; the first caller wins.
    pub fn disconnect(&mut self) -> Option<Detached> {
        if self.state == SessionState::Disconnected {
            return None;
        }
        let previous = std::mem::replace(&mut self.state, SessionState::Disconnected);
        let listener = self.listener.take();
        Some(Detached {
            previous,
            listener: if previous == SessionState::Active {
                listener
            } else {
                None
            },
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("producer", &self.producer)
            .field("listener_attached", &self.listener.is_some())
            .finish()
    }
}
