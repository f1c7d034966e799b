use std::time::Instant;
use tracing::debug;

use crate::types::{ConnectionState, DisconnectReason};

/// Outcome of asking the session to start a caller-initiated disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStep {
    /// Nothing to tear down
    AlreadyDisconnected,
    /// A connect attempt is in flight and will settle on its own
    ConnectInFlight,
    /// Teardown should proceed
    Proceed,
}

/// Connection lifecycle state machine
///
/// Disconnected → Connecting → Connected → Disconnecting → Disconnected, with
/// Error reachable from Connecting on a transport failure. Transitions are
/// plain methods; callers hold the lock around them.
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    connected_since: Option<Instant>,
    last_error: Option<String>,
    last_disconnect: Option<DisconnectReason>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a disconnected session
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected_since: None,
            last_error: None,
            last_disconnect: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether ingestion and feedback are currently allowed
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// When the current connection was established
    #[must_use]
    pub const fn connected_since(&self) -> Option<Instant> {
        self.connected_since
    }

    /// Reason of the last connection failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Why the last connection ended
    #[must_use]
    pub const fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.last_disconnect
    }

    /// Enter Connecting; returns false if a connection exists or is underway
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.state = ConnectionState::Connecting;
                true
            }
            state => {
                debug!("Ignoring connect request while {state}");
                false
            }
        }
    }

    /// Connecting → Connected
    pub fn mark_connected(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        self.state = ConnectionState::Connected;
        self.connected_since = Some(Instant::now());
        self.last_error = None;
    }

    /// Record a transport failure and enter Error
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = ConnectionState::Error;
        self.connected_since = None;
        self.last_error = Some(reason.into());
    }

    /// Error → Disconnected once cleanup has run
    pub fn settle_after_error(&mut self) {
        if self.state == ConnectionState::Error {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Start a caller-initiated disconnect
    pub fn begin_disconnect(&mut self) -> DisconnectStep {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                DisconnectStep::AlreadyDisconnected
            }
            ConnectionState::Disconnecting => DisconnectStep::AlreadyDisconnected,
            ConnectionState::Connecting => DisconnectStep::ConnectInFlight,
            ConnectionState::Connected => {
                self.state = ConnectionState::Disconnecting;
                DisconnectStep::Proceed
            }
        }
    }

    /// Disconnecting → Disconnected
    pub fn finish_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connected_since = None;
        self.last_disconnect = Some(DisconnectReason::Requested);
    }

    /// Handle an unsolicited drop; returns true if the session was Connected
    pub fn mark_lost(&mut self) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        self.connected_since = None;
        self.last_disconnect = Some(DisconnectReason::Lost);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut session = Session::new();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        assert!(session.begin_connect());
        assert_eq!(session.state(), ConnectionState::Connecting);

        session.mark_connected();
        assert!(session.is_connected());
        assert!(session.connected_since().is_some());

        assert_eq!(session.begin_disconnect(), DisconnectStep::Proceed);
        assert_eq!(session.state(), ConnectionState::Disconnecting);

        session.finish_disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.last_disconnect(), Some(DisconnectReason::Requested));
    }

    #[test]
    fn test_duplicate_connect_is_rejected() {
        let mut session = Session::new();
        assert!(session.begin_connect());
        assert!(!session.begin_connect());

        session.mark_connected();
        assert!(!session.begin_connect());
    }

    #[test]
    fn test_failure_settles_to_disconnected() {
        let mut session = Session::new();
        assert!(session.begin_connect());

        session.fail("no device");
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(session.last_error(), Some("no device"));

        session.settle_after_error();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.last_error(), Some("no device"));
        assert!(session.begin_connect());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut session = Session::new();
        assert_eq!(session.begin_disconnect(), DisconnectStep::AlreadyDisconnected);

        assert!(session.begin_connect());
        assert_eq!(session.begin_disconnect(), DisconnectStep::ConnectInFlight);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_lost_only_applies_while_connected() {
        let mut session = Session::new();
        assert!(!session.mark_lost());

        assert!(session.begin_connect());
        session.mark_connected();
        assert!(session.mark_lost());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.last_disconnect(), Some(DisconnectReason::Lost));

        assert!(!session.mark_lost());
    }
}
