//! Connection state management.
//!
//! Owns the lifecycle of the single transport handle for a session: connect,
//! reconnect with bounded exponential backoff, send gating, and close-signal
//! classification. Pure state: the host executes the returned
//! [`TransportCommand`]s against the real socket and feeds
//! [`TransportEvent`]s back in.

use std::cmp;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::session::protocol::ClientFrame;

/// First reconnect delay (doubles per attempt).
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Reconnect attempts before the connection is declared lost.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Classified close signal, as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseSignal {
    /// Clean closure. No retry.
    Normal,
    /// Server-issued termination of the match. Fatal, no retry.
    ServerTermination,
    /// Our own deliberate leave. No retry.
    ClientLeft,
    /// The match id is unknown to the server. Fatal, no retry.
    MatchNotFound,
    /// Anything else: transient drop, retry with backoff.
    Abnormal(u16),
}

impl CloseSignal {
    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            4001 => Self::ServerTermination,
            4002 => Self::ClientLeft,
            4004 => Self::MatchNotFound,
            other => Self::Abnormal(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::ServerTermination => 4001,
            Self::ClientLeft => 4002,
            Self::MatchNotFound => 4004,
            Self::Abnormal(code) => *code,
        }
    }

    /// Only abnormal drops are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Abnormal(_))
    }
}

/// Inbound events from the transport, fed in by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport opened.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The transport closed with the given signal.
    Closed(CloseSignal),
    /// The transport errored without closing yet.
    Failed(String),
}

/// Outbound effects for the host to execute against the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    /// Open the transport for this session's match.
    Open,
    /// Serialize and send a frame.
    Send(ClientFrame),
    /// Close the transport with the given signal.
    Close(CloseSignal),
}

/// Connection errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Send attempted while the transport is not connected.
    NotConnected,
    /// Send attempted after the session ended.
    SessionOver,
    /// Reconnect attempts exceeded the bound.
    RetriesExhausted,
    /// Non-retryable close signal.
    Fatal(CloseSignal),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected to game server"),
            Self::SessionOver => write!(f, "Session is over"),
            Self::RetriesExhausted => write!(f, "Reconnect attempts exhausted"),
            Self::Fatal(signal) => write!(f, "Connection closed ({})", signal.code()),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transport error reported; resolution arrives with the close signal.
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// What a close means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Clean end; nothing further to do.
    Idle,
    /// A reconnect has been scheduled.
    RetryScheduled { delay: Duration, attempt: u32 },
    /// The connection is gone for good.
    Fatal(ConnectionError),
}

/// Connection manager for the session's single transport handle.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    fingerprint: String,
    state: ConnectionState,
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    reconnect_at: Option<Instant>,
    /// Cleared by manual leave or any terminal outcome.
    reconnectable: bool,
    /// Set once the session ends; blocks all sends.
    session_over: bool,
    last_error: Option<ConnectionError>,
}

impl ConnectionManager {
    pub fn new(fingerprint: String) -> Self {
        Self {
            fingerprint,
            state: ConnectionState::Disconnected,
            attempts: 0,
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_at: None,
            reconnectable: true,
            session_over: false,
            last_error: None,
        }
    }

    /// Override the backoff schedule.
    pub fn with_backoff(mut self, base: Duration, cap: Duration, max_attempts: u32) -> Self {
        self.base_delay = base;
        self.max_delay = cap;
        self.max_attempts = max_attempts;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    /// Next scheduled reconnect, if any.
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Begin connecting. No-op when already connecting/connected or when the
    /// connection is permanently down.
    pub fn connect(&mut self) -> Vec<TransportCommand> {
        if self.session_over || !self.reconnectable {
            warn!("connect refused: session no longer reconnectable");
            return Vec::new();
        }
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!("connect skipped: already {}", self.state.as_str());
            return Vec::new();
        }

        self.reconnect_at = None;
        self.state = ConnectionState::Connecting;
        vec![TransportCommand::Open]
    }

    /// The transport opened: reset the backoff and join the match.
    pub fn on_opened(&mut self) -> Vec<TransportCommand> {
        if self.session_over {
            return vec![TransportCommand::Close(CloseSignal::ClientLeft)];
        }
        info!("transport open, joining as {}", self.fingerprint);
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.last_error = None;
        vec![TransportCommand::Send(ClientFrame::Join {
            player_fingerprint: self.fingerprint.clone(),
        })]
    }

    /// Gate an outbound frame. Refuses unless connected and the session is
    /// still live, recording the error.
    pub fn send(&mut self, frame: ClientFrame) -> Result<TransportCommand, ConnectionError> {
        if self.session_over {
            self.last_error = Some(ConnectionError::SessionOver);
            return Err(ConnectionError::SessionOver);
        }
        if !self.state.is_connected() {
            self.last_error = Some(ConnectionError::NotConnected);
            return Err(ConnectionError::NotConnected);
        }
        Ok(TransportCommand::Send(frame))
    }

    /// The transport errored. The decision whether to retry is made when the
    /// matching close signal arrives.
    pub fn on_failed(&mut self, detail: &str) {
        warn!("transport error: {}", detail);
        self.state = ConnectionState::Error;
    }

    /// Classify a close and decide what happens next.
    pub fn on_closed(&mut self, signal: CloseSignal, now: Instant) -> CloseDisposition {
        self.state = ConnectionState::Disconnected;

        if !signal.is_retryable() {
            self.reconnect_at = None;
            match signal {
                CloseSignal::Normal | CloseSignal::ClientLeft => {
                    debug!("transport closed cleanly ({})", signal.code());
                    CloseDisposition::Idle
                }
                fatal => {
                    self.reconnectable = false;
                    let error = ConnectionError::Fatal(fatal);
                    self.last_error = Some(error.clone());
                    CloseDisposition::Fatal(error)
                }
            }
        } else if self.session_over || !self.reconnectable {
            CloseDisposition::Idle
        } else if self.attempts >= self.max_attempts {
            self.reconnectable = false;
            self.last_error = Some(ConnectionError::RetriesExhausted);
            CloseDisposition::Fatal(ConnectionError::RetriesExhausted)
        } else {
            let delay = cmp::min(self.base_delay * 2u32.pow(self.attempts), self.max_delay);
            self.attempts += 1;
            self.reconnect_at = Some(now + delay);
            info!(
                "reconnecting in {:?} (attempt {}/{})",
                delay, self.attempts, self.max_attempts
            );
            CloseDisposition::RetryScheduled {
                delay,
                attempt: self.attempts,
            }
        }
    }

    /// Reopen the transport once the scheduled backoff delay has elapsed.
    pub fn poll_reconnect(&mut self, now: Instant) -> Vec<TransportCommand> {
        match self.reconnect_at {
            Some(at) if now >= at => self.connect(),
            _ => Vec::new(),
        }
    }

    /// Manual disconnect: best-effort `leave`, then close with a distinct
    /// signal so the peer reacts without waiting on a timeout. Permanently
    /// non-reconnectable afterwards.
    pub fn disconnect(&mut self) -> Vec<TransportCommand> {
        let mut commands = Vec::new();
        if self.state.is_connected() && !self.session_over {
            commands.push(TransportCommand::Send(ClientFrame::Leave {
                player_fingerprint: self.fingerprint.clone(),
            }));
        }
        commands.push(TransportCommand::Close(CloseSignal::ClientLeft));

        self.reconnectable = false;
        self.reconnect_at = None;
        self.state = ConnectionState::Disconnected;
        commands
    }

    /// The session ended: block sends and cancel any pending reconnect.
    pub fn mark_session_over(&mut self) {
        self.session_over = true;
        self.reconnectable = false;
        self.reconnect_at = None;
    }
}
