use std::fmt;

use crate::core::ExponentialBackoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transient; always followed by `Disconnected`.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        })
    }
}

/// Connection state machine. Every transition returns the states a consumer observes, in order.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
    session: u64,
    backoff: ExponentialBackoff,
}

impl ConnectionTracker {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session: 0,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of sessions opened so far; the current one when connected.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn connecting(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    /// Returns the new session number.
    pub fn opened(&mut self) -> u64 {
        self.state = ConnectionState::Connected;
        self.session += 1;
        self.backoff.reset();
        self.session
    }

    /// Close or failure; returns the observed states and the delay before the next attempt.
    pub fn lost(&mut self, failed: bool) -> (Vec<ConnectionState>, std::time::Duration) {
        let mut observed = vec![];
        if failed {
            observed.push(ConnectionState::Error);
        }
        self.state = ConnectionState::Disconnected;
        observed.push(self.state);

        self.backoff.bump();
        (observed, self.backoff.next_delay())
    }

    pub fn shutdown(&mut self) -> ConnectionState {
        self.state = ConnectionState::Disconnected;
        self.state
    }
}
