//! Match-level session lifecycle.
//!
//! Tracks where the session is in its life and validates transitions.
//!
//! # State Diagram
//!
//! ```text
//! ┌─────────┐  both players   ┌────────┐  all rounds    ┌──────────┐
//! │ Waiting │────────────────▶│ Active │───────────────▶│ Finished │
//! └────┬────┘    present      └───┬────┘   resolved     └──────────┘
//!      │                          │
//!      │ terminate                │ terminate
//!      ▼                          ▼
//! ┌────────────────────────────────────┐
//! │        Terminated(reason)          │   (absorbing)
//! └────────────────────────────────────┘
//! ```
//!
//! `Terminated` is absorbing: once entered, every further event is rejected
//! and reconnection is blocked.

use std::fmt;

use crate::session::protocol::{Role, Snapshot};

/// Why a session ended irrecoverably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The local player's decision deadline expired.
    Timeout,
    /// The local player left on purpose.
    ClientLeft,
    /// Authoritative termination pushed by the server.
    Server(String),
    /// Fatal protocol violation observed locally.
    Protocol(String),
    /// The transport could not be re-established.
    ConnectionFailed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ClientLeft => write!(f, "client left"),
            Self::Server(reason) => write!(f, "{}", reason),
            Self::Protocol(detail) => write!(f, "protocol error: {}", detail),
            Self::ConnectionFailed => write!(f, "connection failed"),
        }
    }
}

/// Session status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatchStatus {
    /// Connected, waiting for the opponent slot to fill.
    #[default]
    Waiting,
    /// Both slots filled, rounds in progress.
    Active,
    /// All rounds resolved.
    Finished,
    /// Ended irrecoverably before completion.
    Terminated { reason: TerminationReason },
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Terminated { .. } => "terminated",
        }
    }

    /// Rounds can be played.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Terminated { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated { reason } => write!(f, "terminated({})", reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Lifecycle transition events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A snapshot reported both player slots filled.
    BothPlayersPresent,
    /// A snapshot reported the round count reached the cap.
    AllRoundsResolved,
    /// Forced end: timeout, leave, server termination, protocol error.
    Terminate(TerminationReason),
}

/// Error when a lifecycle transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: MatchStatus,
    pub event: LifecycleEvent,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid transition from {} via {:?}: {}",
            self.from, self.event, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Session lifecycle state machine.
#[derive(Debug, Clone, Default)]
pub struct SessionLifecycle {
    status: MatchStatus,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    activated_at: Option<chrono::DateTime<chrono::Utc>>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            status: MatchStatus::Waiting,
            created_at: Some(chrono::Utc::now()),
            activated_at: None,
            ended_at: None,
        }
    }

    pub fn status(&self) -> &MatchStatus {
        &self.status
    }

    /// Apply an event in place, returning an error if invalid.
    pub fn apply_mut(&mut self, event: LifecycleEvent) -> Result<(), InvalidTransition> {
        let next = self.transition(&event)?;
        match &next {
            MatchStatus::Active => self.activated_at = Some(chrono::Utc::now()),
            MatchStatus::Finished | MatchStatus::Terminated { .. } => {
                self.ended_at = Some(chrono::Utc::now())
            }
            MatchStatus::Waiting => {}
        }
        self.status = next;
        Ok(())
    }

    /// Calculate the next status for an event.
    fn transition(&self, event: &LifecycleEvent) -> Result<MatchStatus, InvalidTransition> {
        use LifecycleEvent::*;
        use MatchStatus::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.status.clone(),
            event: event.clone(),
            reason,
        };

        match (&self.status, event) {
            (Terminated { .. }, _) => Err(invalid("Session is terminated")),

            (Waiting, BothPlayersPresent) => Ok(Active),
            (Active, BothPlayersPresent) => Err(invalid("Already active")),
            (Finished, BothPlayersPresent) => Err(invalid("Match already finished")),

            // A rejoin snapshot may report completion straight away.
            (Waiting, AllRoundsResolved) | (Active, AllRoundsResolved) => Ok(Finished),
            (Finished, AllRoundsResolved) => Err(invalid("Already finished")),

            (Finished, Terminate(_)) => Err(invalid("Match already finished")),
            (_, Terminate(reason)) => Ok(Terminated {
                reason: reason.clone(),
            }),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status.is_terminated()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn termination_reason(&self) -> Option<&TerminationReason> {
        match &self.status {
            MatchStatus::Terminated { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.created_at
    }

    pub fn activated_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.activated_at
    }

    pub fn ended_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.ended_at
    }
}

/// Error when the local fingerprint matches neither filled player slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleError {
    pub fingerprint: String,
}

impl fmt::Display for RoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fingerprint {} matches neither player slot",
            self.fingerprint
        )
    }
}

impl std::error::Error for RoleError {}

/// Derive the local role from an authoritative snapshot.
///
/// The client never chooses its own slot. Returns `Ok(None)` while a slot is
/// still unfilled (the first snapshot can arrive before the server has
/// processed our `join`); once both slots are filled, a fingerprint that
/// matches neither is a fatal protocol error.
pub fn derive_role(fingerprint: &str, snapshot: &Snapshot) -> Result<Option<Role>, RoleError> {
    if snapshot.player1_fingerprint.as_deref() == Some(fingerprint) {
        return Ok(Some(Role::Player1));
    }
    if snapshot.player2_fingerprint.as_deref() == Some(fingerprint) {
        return Ok(Some(Role::Player2));
    }
    if snapshot.both_players_present() {
        return Err(RoleError {
            fingerprint: fingerprint.to_string(),
        });
    }
    Ok(None)
}
