//! Session synchronization module for Parley.
//!
//! This module provides the core state types and machines:
//!
//! - `protocol` - Wire types for the persistent channel and matchmaking REST
//! - `connection` - Transport connection state and reconnect backoff
//! - `lifecycle` - Match-level session state machine and role derivation
//! - `round` - Per-round phase machine and payoff resolution
//! - `timer` - Decision deadlines, display timers, termination grace
//! - `history` - Append-only resolved-round ledger
//! - `merge` - Idempotent reconciliation of authoritative snapshots
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            MatchSession                              │
//! │                                                                      │
//! │   TransportEvent ──▶ ConnectionManager ──▶ TransportCommand          │
//! │        │                                                             │
//! │        │ frames                                                      │
//! │        ▼                                                             │
//! │   ServerEvent ──▶ merge() ──▶ SessionLocalState                      │
//! │        │             │              │                                │
//! │        │             ▼              ▼                                │
//! │        │      HistoryAggregator  RoundController ──▶ TimerSupervisor │
//! │        ▼                                                             │
//! │   SessionLifecycle (Waiting ▶ Active ▶ Finished | Terminated)        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One logical session per match: inbound frames, timer ticks, and user
//! actions are discrete, non-overlapping calls on one [`MatchSession`], and
//! all state mutation is synchronous inside them. The host must drain
//! inbound transport events before calling [`MatchSession::tick`], so a
//! freshly arrived snapshot is always applied before local timeout logic
//! runs and a late-but-valid server update supersedes a client-side timeout
//! race.

pub mod connection;
pub mod history;
pub mod lifecycle;
pub mod merge;
pub mod protocol;
pub mod round;
pub mod timer;

// Re-export commonly used types
pub use connection::{
    CloseDisposition, CloseSignal, ConnectionError, ConnectionManager, ConnectionState,
    TransportCommand, TransportEvent, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY,
    RECONNECT_MAX_DELAY,
};
pub use history::{HistoryAggregator, HistoryError, DEFAULT_ROUND_CAP};
pub use lifecycle::{
    derive_role, InvalidTransition, LifecycleEvent, MatchStatus, RoleError, SessionLifecycle,
    TerminationReason,
};
pub use merge::{merge, MergeError, MergeOutcome, PendingAction, SessionLocalState};
pub use protocol::{
    ActionEcho, Choice, ClientFrame, CurrentRound, GameMode, MatchCreateStatus, MatchCreated,
    MatchStats, Matchmaker, Role, RoundRecord, ServerEvent, ServerFrame, Snapshot, TargetPlayer,
    Verdict,
};
pub use round::{
    offer_response_payoff, single_action_payoff, Decision, OfferError, Proposal, ResolutionStrategy,
    RoundController, RoundPhase, COIN_POOL,
};
pub use timer::{TimerConfig, TimerSignal, TimerSupervisor, TERMINATION_GRACE};

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Session-wide configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rounds per match.
    pub round_cap: u32,
    /// Deadline limits.
    pub timers: TimerConfig,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            round_cap: DEFAULT_ROUND_CAP,
            timers: TimerConfig::default(),
            reconnect_base: RECONNECT_BASE_DELAY,
            reconnect_cap: RECONNECT_MAX_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Why a user action was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The session has already finished or terminated.
    SessionOver,
    /// The match is not active (still waiting for the opponent).
    MatchNotActive,
    /// The action does not belong to the current phase.
    WrongPhase { phase: Option<RoundPhase> },
    /// The decision for this round was already submitted.
    AlreadyActed,
    /// The local role is not derived yet.
    NoRole,
    /// The proposal split is invalid.
    InvalidOffer(OfferError),
    /// The transport refused the frame.
    Connection(ConnectionError),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionOver => write!(f, "Session is over"),
            Self::MatchNotActive => write!(f, "Match is not active"),
            Self::WrongPhase { phase } => match phase {
                Some(phase) => write!(f, "Action not valid in phase {}", phase.as_str()),
                None => write!(f, "No round in progress"),
            },
            Self::AlreadyActed => write!(f, "Decision already submitted for this round"),
            Self::NoRole => write!(f, "Player role not derived yet"),
            Self::InvalidOffer(err) => write!(f, "{}", err),
            Self::Connection(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<OfferError> for ActionError {
    fn from(err: OfferError) -> Self {
        Self::InvalidOffer(err)
    }
}

impl From<ConnectionError> for ActionError {
    fn from(err: ConnectionError) -> Self {
        Self::Connection(err)
    }
}

/// One match session: the explicit context object owning the transport
/// handle state and the session-state value. Instantiated once per match;
/// no two sessions share either.
#[derive(Debug)]
pub struct MatchSession {
    match_id: String,
    fingerprint: String,
    connection: ConnectionManager,
    lifecycle: SessionLifecycle,
    controller: RoundController,
    timers: TimerSupervisor,
    history: HistoryAggregator,
    local: SessionLocalState,
    last_error: Option<String>,
    navigate_away: bool,
}

impl MatchSession {
    pub fn new(
        match_id: String,
        fingerprint: String,
        strategy: ResolutionStrategy,
        config: SessionConfig,
    ) -> Self {
        let connection = ConnectionManager::new(fingerprint.clone()).with_backoff(
            config.reconnect_base,
            config.reconnect_cap,
            config.max_reconnect_attempts,
        );
        Self {
            match_id,
            fingerprint,
            connection,
            lifecycle: SessionLifecycle::new(),
            controller: RoundController::new(strategy),
            timers: TimerSupervisor::new(config.timers),
            history: HistoryAggregator::with_cap(config.round_cap),
            local: SessionLocalState::default(),
            last_error: None,
            navigate_away: false,
        }
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn status(&self) -> &MatchStatus {
        self.lifecycle.status()
    }

    pub fn phase(&self) -> RoundPhase {
        self.controller.phase()
    }

    pub fn round(&self) -> u32 {
        self.controller.round()
    }

    pub fn role(&self) -> Option<Role> {
        self.local.role
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn local(&self) -> &SessionLocalState {
        &self.local
    }

    pub fn history(&self) -> &HistoryAggregator {
        &self.history
    }

    /// Last observable error (server-reported or local protocol failure).
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The post-termination grace countdown has elapsed; the surrounding
    /// application is expected to navigate away now.
    pub fn should_navigate_away(&self) -> bool {
        self.navigate_away
    }

    /// Open the transport.
    pub fn connect(&mut self) -> Vec<TransportCommand> {
        if self.lifecycle.is_terminated() {
            warn!("connect refused: {}", self.lifecycle.status());
            return Vec::new();
        }
        let commands = self.connection.connect();
        self.local.connection = self.connection.state();
        commands
    }

    /// Event inbox: feed one transport event in, get outward effects back.
    pub fn handle(&mut self, event: TransportEvent, now: Instant) -> Vec<TransportCommand> {
        let commands = match event {
            TransportEvent::Opened => self.connection.on_opened(),
            TransportEvent::Frame(text) => self.on_frame(&text, now),
            TransportEvent::Closed(signal) => self.on_closed(signal, now),
            TransportEvent::Failed(detail) => {
                self.connection.on_failed(&detail);
                Vec::new()
            }
        };
        self.local.connection = self.connection.state();
        commands
    }

    /// Evaluate reconnect backoff and every armed deadline against `now`.
    /// Call only after all pending inbound events have been handled.
    pub fn tick(&mut self, now: Instant) -> Vec<TransportCommand> {
        let mut commands = self.connection.poll_reconnect(now);

        for signal in self.timers.tick(now) {
            match signal {
                TimerSignal::ClientTimeout(decision) => {
                    info!("decision deadline expired ({:?}); forcing termination", decision);
                    // Best-effort notification; no default action is substituted.
                    if let Ok(command) = self.connection.send(ClientFrame::Timeout {
                        player_fingerprint: self.fingerprint.clone(),
                    }) {
                        commands.push(command);
                    }
                    commands.extend(self.terminate(TerminationReason::Timeout, now));
                }
                TimerSignal::ResultsElapsed => {
                    if self.controller.on_results_elapsed() {
                        self.timers.arm_transition(now);
                        self.local.phase = Some(self.controller.phase());
                    }
                }
                TimerSignal::TransitionElapsed => {
                    if self.controller.on_transition_elapsed() {
                        self.local.phase = Some(self.controller.phase());
                    }
                }
                TimerSignal::GraceElapsed => {
                    self.navigate_away = true;
                }
            }
        }

        self.local.connection = self.connection.state();
        self.local.offer_time_left = self.timers.offer_time_left(now);
        self.local.response_time_left = self.timers.response_time_left(now);
        commands
    }

    /// Submit the single-action decision for the current round.
    pub fn submit_choice(
        &mut self,
        choice: Choice,
        now: Instant,
    ) -> Result<Vec<TransportCommand>, ActionError> {
        self.guard_decision(RoundPhase::Choosing)?;
        let command = self.connection.send(ClientFrame::MakeChoice {
            player_fingerprint: self.fingerprint.clone(),
            choice,
        })?;
        self.local.pending_local_action = Some(PendingAction::Choice(choice));
        self.timers.clear_decision();
        self.local.offer_time_left = self.timers.offer_time_left(now);
        Ok(vec![command])
    }

    /// Submit this round's proposal: offer `offer`, keep the remainder.
    pub fn submit_offer(
        &mut self,
        offer: u32,
        now: Instant,
    ) -> Result<Vec<TransportCommand>, ActionError> {
        self.guard_decision(RoundPhase::Offering)?;
        let proposal = Proposal::from_offer(offer)?;
        let command = self.connection.send(ClientFrame::MakeOffer {
            player_fingerprint: self.fingerprint.clone(),
            coins_to_keep: proposal.keep,
            coins_to_offer: proposal.offer,
        })?;
        self.local.pending_local_action = Some(PendingAction::Offer(proposal));
        self.timers.clear_decision();
        self.local.offer_time_left = self.timers.offer_time_left(now);
        Ok(vec![command])
    }

    /// Answer the opposing proposal.
    pub fn submit_response(
        &mut self,
        verdict: Verdict,
        now: Instant,
    ) -> Result<Vec<TransportCommand>, ActionError> {
        self.guard_decision(RoundPhase::Responding)?;
        let role = self.local.role.ok_or(ActionError::NoRole)?;
        let command = self.connection.send(ClientFrame::RespondToOffer {
            player_fingerprint: self.fingerprint.clone(),
            target_player: TargetPlayer::from(role.opponent()),
            response: verdict,
        })?;
        self.local.pending_local_action = Some(PendingAction::Response(verdict));
        self.timers.clear_decision();
        self.local.response_time_left = self.timers.response_time_left(now);
        Ok(vec![command])
    }

    /// Leave the match on purpose. Best-effort `leave`, a distinct close
    /// signal, and a permanent end to this session.
    pub fn leave(&mut self) -> Vec<TransportCommand> {
        info!("leaving match {}", self.match_id);
        let commands = self.connection.disconnect();
        if !self.lifecycle.is_terminal() {
            let _ = self
                .lifecycle
                .apply_mut(LifecycleEvent::Terminate(TerminationReason::ClientLeft));
        }
        self.local.termination_reason = Some(TerminationReason::ClientLeft);
        self.timers.cancel_all();
        self.connection.mark_session_over();
        self.local.connection = self.connection.state();
        commands
    }

    // Inbound processing

    fn on_frame(&mut self, text: &str, now: Instant) -> Vec<TransportCommand> {
        if self.lifecycle.is_terminated() {
            debug!("frame ignored: session terminated");
            return Vec::new();
        }

        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("malformed server frame: {}", err);
                self.last_error = Some(format!("Malformed server frame: {}", err));
                return Vec::new();
            }
        };

        let mut commands = Vec::new();
        for event in frame.into_events() {
            if self.lifecycle.is_terminated() {
                break;
            }
            commands.extend(self.on_server_event(event, now));
        }
        commands
    }

    fn on_server_event(&mut self, event: ServerEvent, now: Instant) -> Vec<TransportCommand> {
        match event {
            ServerEvent::State(snapshot) => self.on_snapshot(&snapshot, now),
            ServerEvent::GameOver {
                player1_score,
                player2_score,
            } => {
                if !self.history.totals_match(player1_score, player2_score) {
                    warn!(
                        "server totals ({}, {}) disagree with ledger {:?}",
                        player1_score,
                        player2_score,
                        self.history.totals()
                    );
                }
                if !self.lifecycle.is_terminal() {
                    let _ = self.lifecycle.apply_mut(LifecycleEvent::AllRoundsResolved);
                }
                self.timers.cancel_all();
                Vec::new()
            }
            ServerEvent::Terminated { reason, .. } => {
                info!("match terminated by server: {}", reason);
                self.terminate(TerminationReason::Server(reason), now)
            }
            ServerEvent::Action(echo) => {
                self.on_action_echo(echo, now);
                Vec::new()
            }
            ServerEvent::RoundResults(_) => {
                // Informational; the snapshot is the sole state authority.
                Vec::new()
            }
            ServerEvent::Error(message) => {
                warn!("server error: {}", message);
                self.last_error = Some(message);
                Vec::new()
            }
        }
    }

    fn on_snapshot(&mut self, snapshot: &Snapshot, now: Instant) -> Vec<TransportCommand> {
        let outcome = match merge(
            &mut self.local,
            snapshot,
            &mut self.history,
            &mut self.controller,
            &self.fingerprint,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return self.terminate(TerminationReason::Protocol(err.to_string()), now);
            }
        };

        let phase_entered = match outcome {
            MergeOutcome::Stale => return Vec::new(),
            MergeOutcome::Applied { phase_entered, .. } => phase_entered,
        };

        // A valid snapshot supersedes any recorded transient error.
        self.last_error = None;

        if *self.lifecycle.status() == MatchStatus::Waiting && snapshot.both_players_present() {
            let _ = self.lifecycle.apply_mut(LifecycleEvent::BothPlayersPresent);
        }
        if snapshot.game_over && !self.lifecycle.is_terminal() {
            let _ = self.lifecycle.apply_mut(LifecycleEvent::AllRoundsResolved);
        }

        self.refresh_timers(phase_entered, now);
        Vec::new()
    }

    fn on_action_echo(&mut self, echo: ActionEcho, now: Instant) {
        // Actions for any round but the current one are stale or premature.
        if let Some(number) = echo.round_number {
            if !self.controller.accepts_action_for_round(number) {
                debug!("ignoring action echo for round {}", number);
                return;
            }
        }

        let role = if self.local.snapshot.player1_fingerprint.as_deref()
            == Some(echo.player_fingerprint.as_str())
        {
            Role::Player1
        } else if self.local.snapshot.player2_fingerprint.as_deref()
            == Some(echo.player_fingerprint.as_str())
        {
            Role::Player2
        } else {
            debug!("ignoring action echo from unknown player");
            return;
        };

        // Provisional update of the current round's made-flags; the next
        // snapshot is authoritative and overwrites all of this.
        let round = self
            .local
            .snapshot
            .current_round_state
            .get_or_insert_with(CurrentRound::default);

        match (echo.action.as_str(), role) {
            ("make_offer", Role::Player1) => {
                round.player1_offer_made = true;
                round.player1_coins_to_keep = echo.coins_to_keep;
                round.player1_coins_to_offer = echo.coins_to_offer;
            }
            ("make_offer", Role::Player2) => {
                round.player2_offer_made = true;
                round.player2_coins_to_keep = echo.coins_to_keep;
                round.player2_coins_to_offer = echo.coins_to_offer;
            }
            ("respond_to_offer", Role::Player1) => {
                round.player1_response_made = true;
                round.player1_response = echo.response;
            }
            ("respond_to_offer", Role::Player2) => {
                round.player2_response_made = true;
                round.player2_response = echo.response;
            }
            ("make_choice", Role::Player1) => round.player1_action = echo.choice,
            ("make_choice", Role::Player2) => round.player2_action = echo.choice,
            _ => {
                debug!("ignoring unrecognized action echo: {}", echo.action);
                return;
            }
        }

        let snapshot = self.local.snapshot.clone();
        let update = self.controller.apply_snapshot(&snapshot);
        self.local.phase = Some(self.controller.phase());
        self.refresh_timers(update.entered, now);
    }

    fn on_closed(&mut self, signal: CloseSignal, now: Instant) -> Vec<TransportCommand> {
        match self.connection.on_closed(signal, now) {
            CloseDisposition::Idle | CloseDisposition::RetryScheduled { .. } => Vec::new(),
            CloseDisposition::Fatal(error) => {
                self.last_error = Some(error.to_string());
                let reason = match error {
                    ConnectionError::Fatal(CloseSignal::ServerTermination) => {
                        TerminationReason::Server("Match terminated by server".to_string())
                    }
                    ConnectionError::Fatal(CloseSignal::MatchNotFound) => {
                        TerminationReason::Server("Match not found".to_string())
                    }
                    _ => TerminationReason::ConnectionFailed,
                };
                self.terminate(reason, now)
            }
        }
    }

    // Internals

    /// Common gate for user decisions: active match, right phase, not
    /// already acted.
    fn guard_decision(&self, expected: RoundPhase) -> Result<(), ActionError> {
        if self.lifecycle.is_terminal() {
            return Err(ActionError::SessionOver);
        }
        if !self.lifecycle.status().is_active() {
            return Err(ActionError::MatchNotActive);
        }
        if self.controller.phase() != expected {
            return Err(ActionError::WrongPhase {
                phase: self.local.phase,
            });
        }
        if self.local.pending_local_action.is_some() {
            return Err(ActionError::AlreadyActed);
        }
        if let Some(role) = self.local.role {
            let strategy = self.controller.strategy();
            let round = self.local.snapshot.current_round_state.as_ref();
            if !strategy.awaiting_local(expected, round, role) {
                return Err(ActionError::AlreadyActed);
            }
        }
        Ok(())
    }

    /// Re-arm deadlines after a merged update, per the current phase.
    fn refresh_timers(&mut self, phase_entered: bool, now: Instant) {
        if self.lifecycle.is_terminal() {
            self.timers.cancel_all();
            return;
        }

        let phase = self.controller.phase();
        match phase {
            RoundPhase::Choosing | RoundPhase::Offering | RoundPhase::Responding => {
                let awaiting = match self.local.role {
                    Some(role) if self.lifecycle.status().is_active() => {
                        self.local.pending_local_action.is_none()
                            && self.controller.strategy().awaiting_local(
                                phase,
                                self.local.snapshot.current_round_state.as_ref(),
                                role,
                            )
                    }
                    _ => false,
                };
                if awaiting {
                    // Reset to the full limit on every snapshot-driven
                    // re-evaluation that lands in this phase.
                    if let Some(decision) = self.controller.strategy().decision_for(phase) {
                        self.timers.arm_decision(decision, now);
                    }
                } else {
                    self.timers.clear_decision();
                }
            }
            RoundPhase::Results => {
                self.timers.clear_decision();
                if phase_entered {
                    self.timers.arm_results(now);
                }
            }
            RoundPhase::Transition => {
                self.timers.clear_decision();
            }
            RoundPhase::GameOver => {
                self.timers.cancel_all();
            }
        }

        self.local.offer_time_left = self.timers.offer_time_left(now);
        self.local.response_time_left = self.timers.response_time_left(now);
    }

    /// Irrecoverable end: enter the absorbing terminated state, cancel every
    /// pending deadline, block the transport, and start the grace countdown.
    fn terminate(&mut self, reason: TerminationReason, now: Instant) -> Vec<TransportCommand> {
        if self.lifecycle.is_terminal() {
            return Vec::new();
        }

        let _ = self
            .lifecycle
            .apply_mut(LifecycleEvent::Terminate(reason.clone()));
        self.local.termination_reason = Some(reason);
        self.timers.cancel_all();
        self.timers.arm_grace(now);

        let mut commands = Vec::new();
        if self.connection.state().is_connected() {
            commands.push(TransportCommand::Close(CloseSignal::Normal));
        }
        self.connection.mark_session_over();
        self.local.connection = self.connection.state();
        commands
    }
}
