//! Parley Session Library
//!
//! This crate provides the client-side session synchronization engine for
//! Parley matches: two anonymous participants playing a fixed number of
//! rounds of a simultaneous-decision game, with the server acting as
//! authoritative referee.
//!
//! # Overview
//!
//! The session module provides:
//!
//! - **Connection Management** - Transport connection state machine with
//!   close-signal classification and bounded exponential reconnect backoff.
//!
//! - **Session Lifecycle** - Match-level state machine (waiting, active,
//!   finished, terminated) with validated transitions and role derivation.
//!
//! - **Round Control** - Per-round phase machine parameterized by the game
//!   variant (single simultaneous choice, or dual simultaneous offers with
//!   responses), driven entirely by authoritative server snapshots.
//!
//! - **Timer Supervision** - Decision deadlines, fixed display timers, and
//!   the forced-timeout termination path.
//!
//! - **History & Reconciliation** - Append-only round ledger and idempotent
//!   merging of authoritative snapshots into local state.
//!
//! # Design Principles
//!
//! 1. **State machines validate transitions** - Invalid state changes are
//!    rejected at runtime with clear errors.
//!
//! 2. **No networking** - This crate is pure state. The transport is a typed
//!    event source: the host feeds [`TransportEvent`]s in and executes the
//!    [`TransportCommand`]s that come back.
//!
//! 3. **The server is authoritative** - Local phase and timer values are
//!    provisional; a merged snapshot always wins over local guesses.
//!
//! 4. **Serialization-ready** - All wire types round-trip through JSON.
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use parley_session::session::{
//!     MatchSession, ResolutionStrategy, SessionConfig, TransportEvent,
//! };
//!
//! let mut session = MatchSession::new(
//!     "match-1".to_string(),
//!     "player_abc".to_string(),
//!     ResolutionStrategy::OfferResponse,
//!     SessionConfig::default(),
//! );
//!
//! // Ask the host to open the transport.
//! let commands = session.connect();
//! assert!(!commands.is_empty());
//!
//! // The host feeds transport events back in as they happen.
//! let _ = session.handle(TransportEvent::Opened, Instant::now());
//! ```

pub mod session;

// Re-export everything from the session module at crate root
pub use session::*;
