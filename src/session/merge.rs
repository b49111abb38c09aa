//! Authoritative snapshot reconciliation.
//!
//! Merges server snapshots into the transient local session state. The
//! merge is idempotent under re-delivery and never lets a round transition
//! silently drop its own result: completed rounds are handed to the history
//! ledger before any round-scoped local field is overwritten. Local state
//! is provisional and always loses to the merged snapshot; only
//! locally-derived fields (role, timer countdowns, pending action) survive.

use std::fmt;

use log::{debug, warn};

use crate::session::connection::ConnectionState;
use crate::session::history::{HistoryAggregator, HistoryError};
use crate::session::lifecycle::{derive_role, RoleError, TerminationReason};
use crate::session::protocol::{Choice, Role, Snapshot, Verdict};
use crate::session::round::{Proposal, RoundController, RoundPhase};

/// An action submitted locally and not yet confirmed by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Choice(Choice),
    Offer(Proposal),
    Response(Verdict),
}

/// Transient per-session state, reconstructible from the last snapshot plus
/// the local timers.
#[derive(Debug, Clone, Default)]
pub struct SessionLocalState {
    /// Current round number as last reported by the server (0 before the
    /// first snapshot).
    pub round: u32,
    /// Current round phase, re-selected on every merge.
    pub phase: Option<RoundPhase>,
    /// Mirror of the connection status, for display.
    pub connection: ConnectionState,
    /// Whole seconds left on the offer/choice window, if armed.
    pub offer_time_left: Option<u64>,
    /// Whole seconds left on the response window, if armed.
    pub response_time_left: Option<u64>,
    /// Locally submitted action awaiting snapshot confirmation.
    pub pending_local_action: Option<PendingAction>,
    /// Set once the session is terminated.
    pub termination_reason: Option<TerminationReason>,
    /// Locally derived role; never overwritten by merges, only re-derived.
    pub role: Option<Role>,
    /// Last merged authoritative snapshot.
    pub snapshot: Snapshot,
}

/// Merge failures. All fatal protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The ledger rejected a completed round extracted from the snapshot.
    History(HistoryError),
    /// The snapshot advanced the round but carries no record of the round it
    /// completed.
    MissingRoundRecord { round: u32 },
    /// The local fingerprint matches neither filled slot.
    Role(RoleError),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::History(err) => write!(f, "{}", err),
            Self::MissingRoundRecord { round } => {
                write!(f, "Snapshot advanced past round {} without its result", round)
            }
            Self::Role(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for MergeError {}

impl From<HistoryError> for MergeError {
    fn from(err: HistoryError) -> Self {
        Self::History(err)
    }
}

impl From<RoleError> for MergeError {
    fn from(err: RoleError) -> Self {
        Self::Role(err)
    }
}

/// What a merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Stale or duplicate delivery; discarded.
    Stale,
    Applied {
        /// The round number moved forward.
        round_advanced: bool,
        /// Completed rounds appended to the ledger.
        appended: usize,
        /// A phase was (re-)entered; display timers re-arm on entry.
        phase_entered: bool,
    },
}

/// Merge an authoritative snapshot into local state.
///
/// Rules, in order: discard stale rounds; extract completed-round results
/// into the ledger before overwriting round-scoped fields; shallow-merge the
/// snapshot over local state, preserving locally-derived fields; re-run
/// phase selection and role derivation against the merged result. Applying
/// the same snapshot twice is a no-op beyond the idempotent overwrite.
pub fn merge(
    local: &mut SessionLocalState,
    snapshot: &Snapshot,
    history: &mut HistoryAggregator,
    controller: &mut RoundController,
    fingerprint: &str,
) -> Result<MergeOutcome, MergeError> {
    // 1. Stale or duplicate delivery.
    if snapshot.current_round < local.round {
        debug!(
            "discarding stale snapshot: round {} < {}",
            snapshot.current_round, local.round
        );
        return Ok(MergeOutcome::Stale);
    }

    let round_advanced = snapshot.current_round > local.round;

    // 2. Bank completed rounds before any round-scoped field is overwritten.
    // After a reconnect the snapshot may be several rounds ahead; append
    // every resolved record the ledger is missing, in order.
    let mut appended = 0;
    for record in &snapshot.round_history {
        if record.round_number > history.last_round_number() {
            history.append(record.clone())?;
            appended += 1;
        }
    }

    // A round transition must never silently drop its own result.
    if round_advanced
        && !snapshot.game_over
        && history.last_round_number() + 1 < snapshot.current_round
    {
        let round = history.last_round_number() + 1;
        warn!("snapshot advanced without the result of round {}", round);
        return Err(MergeError::MissingRoundRecord { round });
    }

    // 3. Shallow merge. Everything snapshot-scoped is overwritten wholesale;
    // locally-derived fields live alongside and are left untouched.
    local.snapshot = snapshot.clone();
    local.round = snapshot.current_round;

    // 4. Re-run role derivation and phase selection on the merged result.
    if let Some(role) = derive_role(fingerprint, snapshot)? {
        local.role = Some(role);
    }

    let update = controller.apply_snapshot(snapshot);
    local.phase = Some(controller.phase());

    // A confirmed or obsolete optimistic action is dropped.
    if round_advanced {
        local.pending_local_action = None;
    } else if let (Some(role), Some(round)) = (local.role, &snapshot.current_round_state) {
        let confirmed = match local.pending_local_action {
            Some(PendingAction::Choice(_)) => round.choice_made(role),
            Some(PendingAction::Offer(_)) => round.offer_made(role),
            Some(PendingAction::Response(_)) => round.response_made(role),
            None => false,
        };
        if confirmed {
            local.pending_local_action = None;
        }
    }

    Ok(MergeOutcome::Applied {
        round_advanced,
        appended,
        phase_entered: update.entered,
    })
}
