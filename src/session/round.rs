//! Per-round phase control.
//!
//! One engine drives both game variants behind a tagged resolution strategy.
//! The client never advances a phase on its own say-so: phase is inferred
//! from authoritative snapshot data on every merge, with only the fixed
//! `Results` and `Transition` displays progressing on local timers.

use serde::{Deserialize, Serialize};

use crate::session::protocol::{Choice, CurrentRound, Role, RoundRecord, Snapshot, Verdict};

/// Fixed pool split by each proposal in the offer-response variant.
pub const COIN_POOL: u32 = 100;

/// Game variant, selecting phase flow and payoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// One simultaneous 2x2 move per round.
    SingleAction,
    /// Dual simultaneous proposals, each answered by the other party.
    OfferResponse,
}

/// Sub-state of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Choosing,
    Offering,
    Responding,
    /// Fixed-duration, non-interactive display of the round outcome.
    Results,
    /// Fixed countdown before the next round's phase resets.
    Transition,
    /// Round cap reached. Terminal for the round controller.
    GameOver,
}

impl RoundPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Choosing => "choosing",
            Self::Offering => "offering",
            Self::Responding => "responding",
            Self::Results => "results",
            Self::Transition => "transition",
            Self::GameOver => "game_over",
        }
    }

    /// Phases that wait on a player decision.
    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Choosing | Self::Offering | Self::Responding)
    }
}

/// The decision a phase waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Choice,
    Offer,
    Response,
}

impl ResolutionStrategy {
    /// The phase every fresh round starts in.
    pub fn first_phase(&self) -> RoundPhase {
        match self {
            Self::SingleAction => RoundPhase::Choosing,
            Self::OfferResponse => RoundPhase::Offering,
        }
    }

    /// The decision a phase waits on, if any.
    pub fn decision_for(&self, phase: RoundPhase) -> Option<Decision> {
        match phase {
            RoundPhase::Choosing => Some(Decision::Choice),
            RoundPhase::Offering => Some(Decision::Offer),
            RoundPhase::Responding => Some(Decision::Response),
            _ => None,
        }
    }

    /// Infer the round phase from authoritative data. A phase advances only
    /// when the fields it requires are present for both players.
    pub fn select_phase(&self, snapshot: &Snapshot) -> RoundPhase {
        if snapshot.game_over
            || (snapshot.max_rounds > 0 && snapshot.current_round > snapshot.max_rounds)
        {
            return RoundPhase::GameOver;
        }

        let round = match &snapshot.current_round_state {
            Some(round) => round,
            // First frame of a fresh round.
            None => return self.first_phase(),
        };

        match self {
            Self::SingleAction => {
                if round.both_choices_made() {
                    RoundPhase::Results
                } else {
                    RoundPhase::Choosing
                }
            }
            Self::OfferResponse => {
                if !round.both_offers_made() {
                    RoundPhase::Offering
                } else if !round.both_responses_made() {
                    RoundPhase::Responding
                } else {
                    RoundPhase::Results
                }
            }
        }
    }

    /// Whether the local player still owes the decision for `phase`.
    pub fn awaiting_local(
        &self,
        phase: RoundPhase,
        round: Option<&CurrentRound>,
        role: Role,
    ) -> bool {
        let round = match round {
            Some(round) => round,
            None => return phase.is_decision(),
        };
        match phase {
            RoundPhase::Choosing => !round.choice_made(role),
            RoundPhase::Offering => !round.offer_made(role),
            RoundPhase::Responding => !round.response_made(role),
            _ => false,
        }
    }

    /// Recompute a resolved round's payoffs from its decision fields.
    /// Used to cross-check server-credited values; `None` when the record
    /// is missing the fields this variant requires.
    pub fn resolve(&self, record: &RoundRecord) -> Option<(i64, i64)> {
        match self {
            Self::SingleAction => {
                let (p1, p2) = (record.player1_action?, record.player2_action?);
                Some(single_action_payoff(p1, p2))
            }
            Self::OfferResponse => {
                let p1 = Proposal::split(
                    record.player1_coins_to_keep?,
                    record.player1_coins_to_offer?,
                )
                .ok()?;
                let p2 = Proposal::split(
                    record.player2_coins_to_keep?,
                    record.player2_coins_to_offer?,
                )
                .ok()?;
                Some(offer_response_payoff(
                    &p1,
                    &p2,
                    record.player1_response_to_p2?,
                    record.player2_response_to_p1?,
                ))
            }
        }
    }
}

/// Fixed 2x2 payoff lookup.
pub fn single_action_payoff(player1: Choice, player2: Choice) -> (i64, i64) {
    use Choice::*;
    match (player1, player2) {
        (Cooperate, Cooperate) => (20, 20),
        (Cooperate, Defect) => (0, 30),
        (Defect, Cooperate) => (30, 0),
        (Defect, Defect) => (10, 10),
    }
}

/// Invalid proposal split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// `keep + offer` does not equal the pool.
    SplitMismatch { keep: u32, offer: u32 },
}

impl std::fmt::Display for OfferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SplitMismatch { keep, offer } => write!(
                f,
                "Coins to keep ({}) + coins to offer ({}) must equal {}",
                keep, offer, COIN_POOL
            ),
        }
    }
}

impl std::error::Error for OfferError {}

/// One player's proposal over the pool: keep `keep`, offer `offer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub keep: u32,
    pub offer: u32,
}

impl Proposal {
    /// Build from the offered amount; the remainder is kept.
    pub fn from_offer(offer: u32) -> Result<Self, OfferError> {
        if offer > COIN_POOL {
            return Err(OfferError::SplitMismatch {
                keep: 0,
                offer,
            });
        }
        Ok(Self {
            keep: COIN_POOL - offer,
            offer,
        })
    }

    /// Build from an explicit split, validating it covers the pool exactly.
    pub fn split(keep: u32, offer: u32) -> Result<Self, OfferError> {
        if keep + offer != COIN_POOL {
            return Err(OfferError::SplitMismatch { keep, offer });
        }
        Ok(Self { keep, offer })
    }
}

/// Resolve one offer-response round.
///
/// Each proposal is evaluated independently by the other party's verdict:
/// accepted, the proposer banks `keep` and the accepter banks `offer`;
/// rejected, that proposal pays nobody. A player's round total is the sum of
/// the proposals in which they are a beneficiary.
pub fn offer_response_payoff(
    player1: &Proposal,
    player2: &Proposal,
    response1: Verdict,
    response2: Verdict,
) -> (i64, i64) {
    let mut earned1: i64 = 0;
    let mut earned2: i64 = 0;

    // Player 1's proposal, answered by player 2.
    if response2 == Verdict::Accept {
        earned1 += i64::from(player1.keep);
        earned2 += i64::from(player1.offer);
    }
    // Player 2's proposal, answered by player 1.
    if response1 == Verdict::Accept {
        earned2 += i64::from(player2.keep);
        earned1 += i64::from(player2.offer);
    }

    (earned1, earned2)
}

/// Result of feeding a merged snapshot to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseUpdate {
    /// The phase (or round) changed; display timers re-arm on entry.
    pub entered: bool,
    /// The current round number moved forward.
    pub round_advanced: bool,
}

/// Per-round phase machine, parameterized by the resolution strategy.
#[derive(Debug, Clone)]
pub struct RoundController {
    strategy: ResolutionStrategy,
    round: u32,
    phase: RoundPhase,
}

impl RoundController {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            round: 1,
            phase: strategy.first_phase(),
        }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == RoundPhase::GameOver
    }

    /// An inbound action belongs to the current round, or it is ignored.
    pub fn accepts_action_for_round(&self, round_number: u32) -> bool {
        round_number == self.round
    }

    /// Re-select the phase against a freshly merged snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> PhaseUpdate {
        let selected = self.strategy.select_phase(snapshot);
        let next_round = snapshot.current_round.max(1);
        let round_advanced = next_round > self.round;

        if round_advanced {
            self.round = next_round;
            self.phase = selected;
            return PhaseUpdate {
                entered: true,
                round_advanced: true,
            };
        }

        // Same round. The local display may be ahead of the server data:
        // once we've moved on to Transition, a snapshot still reporting the
        // resolved round must not bounce us back into Results.
        if selected == self.phase
            || (self.phase == RoundPhase::Transition && selected == RoundPhase::Results)
        {
            return PhaseUpdate {
                entered: false,
                round_advanced: false,
            };
        }

        self.phase = selected;
        PhaseUpdate {
            entered: true,
            round_advanced: false,
        }
    }

    /// The results display elapsed: move to the transition countdown.
    pub fn on_results_elapsed(&mut self) -> bool {
        if self.phase == RoundPhase::Results {
            self.phase = RoundPhase::Transition;
            true
        } else {
            false
        }
    }

    /// The transition countdown elapsed: optimistically reset to the first
    /// phase; the next snapshot re-selects authoritatively.
    pub fn on_transition_elapsed(&mut self) -> bool {
        if self.phase == RoundPhase::Transition {
            self.phase = self.strategy.first_phase();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot_with_round(number: u32, round: CurrentRound) -> Snapshot {
        Snapshot {
            current_round: number,
            max_rounds: 25,
            current_round_state: Some(round),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_action_payoffs() {
        use Choice::*;
        assert_eq!(single_action_payoff(Cooperate, Cooperate), (20, 20));
        assert_eq!(single_action_payoff(Cooperate, Defect), (0, 30));
        assert_eq!(single_action_payoff(Defect, Cooperate), (30, 0));
        assert_eq!(single_action_payoff(Defect, Defect), (10, 10));
    }

    #[test]
    fn test_offer_response_both_accept() {
        // P1 offers 30 (keeps 70), P2 offers 40 (keeps 60); both accept.
        let p1 = Proposal::from_offer(30).unwrap();
        let p2 = Proposal::from_offer(40).unwrap();
        assert_eq!(
            offer_response_payoff(&p1, &p2, Verdict::Accept, Verdict::Accept),
            (110, 90)
        );
    }

    #[test]
    fn test_offer_response_both_reject() {
        let p1 = Proposal::from_offer(30).unwrap();
        let p2 = Proposal::from_offer(40).unwrap();
        assert_eq!(
            offer_response_payoff(&p1, &p2, Verdict::Reject, Verdict::Reject),
            (0, 0)
        );
    }

    #[test]
    fn test_offer_response_mixed() {
        // P1 keeps 30 / offers 70; P2 keeps 10 / offers 90.
        let p1 = Proposal::split(30, 70).unwrap();
        let p2 = Proposal::split(10, 90).unwrap();

        // P1 rejects P2's proposal, P2 accepts P1's: only P1's proposal pays.
        assert_eq!(
            offer_response_payoff(&p1, &p2, Verdict::Reject, Verdict::Accept),
            (30, 70)
        );
        // P1 accepts, P2 rejects: only P2's proposal pays.
        assert_eq!(
            offer_response_payoff(&p1, &p2, Verdict::Accept, Verdict::Reject),
            (90, 10)
        );
    }

    #[test]
    fn test_proposal_split_validated() {
        assert!(Proposal::split(70, 30).is_ok());
        assert_eq!(
            Proposal::split(70, 40).unwrap_err(),
            OfferError::SplitMismatch { keep: 70, offer: 40 }
        );
        assert!(Proposal::from_offer(101).is_err());
    }

    #[test]
    fn test_phase_selection_single_action() {
        let strategy = ResolutionStrategy::SingleAction;

        let empty = snapshot_with_round(1, CurrentRound::default());
        assert_eq!(strategy.select_phase(&empty), RoundPhase::Choosing);

        let one_choice = snapshot_with_round(
            1,
            CurrentRound {
                player1_action: Some(Choice::Cooperate),
                ..Default::default()
            },
        );
        assert_eq!(strategy.select_phase(&one_choice), RoundPhase::Choosing);

        let both = snapshot_with_round(
            1,
            CurrentRound {
                player1_action: Some(Choice::Cooperate),
                player2_action: Some(Choice::Defect),
                ..Default::default()
            },
        );
        assert_eq!(strategy.select_phase(&both), RoundPhase::Results);
    }

    #[test]
    fn test_phase_selection_offer_response() {
        let strategy = ResolutionStrategy::OfferResponse;

        let empty = snapshot_with_round(1, CurrentRound::default());
        assert_eq!(strategy.select_phase(&empty), RoundPhase::Offering);

        let one_offer = snapshot_with_round(
            1,
            CurrentRound {
                player1_offer_made: true,
                ..Default::default()
            },
        );
        assert_eq!(strategy.select_phase(&one_offer), RoundPhase::Offering);

        let both_offers = snapshot_with_round(
            1,
            CurrentRound {
                player1_offer_made: true,
                player2_offer_made: true,
                ..Default::default()
            },
        );
        assert_eq!(strategy.select_phase(&both_offers), RoundPhase::Responding);

        let resolved = snapshot_with_round(
            1,
            CurrentRound {
                player1_offer_made: true,
                player2_offer_made: true,
                player1_response_made: true,
                player2_response_made: true,
                ..Default::default()
            },
        );
        assert_eq!(strategy.select_phase(&resolved), RoundPhase::Results);
    }

    #[test]
    fn test_fresh_round_without_state_starts_first_phase() {
        let strategy = ResolutionStrategy::OfferResponse;
        let snapshot = Snapshot {
            current_round: 1,
            max_rounds: 25,
            ..Default::default()
        };
        assert_eq!(strategy.select_phase(&snapshot), RoundPhase::Offering);
    }

    #[test]
    fn test_game_over_selection() {
        let strategy = ResolutionStrategy::SingleAction;
        let snapshot = Snapshot {
            current_round: 25,
            max_rounds: 25,
            game_over: true,
            ..Default::default()
        };
        assert_eq!(strategy.select_phase(&snapshot), RoundPhase::GameOver);
    }

    #[test]
    fn test_controller_round_advance_resets_phase() {
        let mut controller = RoundController::new(ResolutionStrategy::OfferResponse);

        let resolved = snapshot_with_round(
            1,
            CurrentRound {
                round_number: 1,
                player1_offer_made: true,
                player2_offer_made: true,
                player1_response_made: true,
                player2_response_made: true,
                ..Default::default()
            },
        );
        let update = controller.apply_snapshot(&resolved);
        assert!(update.entered);
        assert_eq!(controller.phase(), RoundPhase::Results);

        let next = snapshot_with_round(
            2,
            CurrentRound {
                round_number: 2,
                ..Default::default()
            },
        );
        let update = controller.apply_snapshot(&next);
        assert!(update.round_advanced);
        assert_eq!(controller.round(), 2);
        assert_eq!(controller.phase(), RoundPhase::Offering);
    }

    #[test]
    fn test_controller_transition_holds_against_stale_results() {
        let mut controller = RoundController::new(ResolutionStrategy::OfferResponse);
        let resolved = snapshot_with_round(
            1,
            CurrentRound {
                round_number: 1,
                player1_offer_made: true,
                player2_offer_made: true,
                player1_response_made: true,
                player2_response_made: true,
                ..Default::default()
            },
        );

        controller.apply_snapshot(&resolved);
        assert!(controller.on_results_elapsed());
        assert_eq!(controller.phase(), RoundPhase::Transition);

        // Same resolved round re-delivered: hold the transition display.
        let update = controller.apply_snapshot(&resolved);
        assert!(!update.entered);
        assert_eq!(controller.phase(), RoundPhase::Transition);

        assert!(controller.on_transition_elapsed());
        assert_eq!(controller.phase(), RoundPhase::Offering);
    }

    #[test]
    fn test_controller_stale_action_gate() {
        let mut controller = RoundController::new(ResolutionStrategy::SingleAction);
        let snapshot = snapshot_with_round(
            3,
            CurrentRound {
                round_number: 3,
                ..Default::default()
            },
        );
        controller.apply_snapshot(&snapshot);

        assert!(controller.accepts_action_for_round(3));
        assert!(!controller.accepts_action_for_round(2)); // stale
        assert!(!controller.accepts_action_for_round(4)); // premature
    }

    #[test]
    fn test_awaiting_local() {
        let strategy = ResolutionStrategy::OfferResponse;
        let round = CurrentRound {
            player1_offer_made: true,
            ..Default::default()
        };

        assert!(!strategy.awaiting_local(RoundPhase::Offering, Some(&round), Role::Player1));
        assert!(strategy.awaiting_local(RoundPhase::Offering, Some(&round), Role::Player2));
        assert!(!strategy.awaiting_local(RoundPhase::Results, Some(&round), Role::Player2));
        assert!(strategy.awaiting_local(RoundPhase::Offering, None, Role::Player1));
    }

    #[test]
    fn test_resolve_record_cross_check() {
        let record = RoundRecord {
            round_number: 1,
            player1_coins_to_keep: Some(70),
            player1_coins_to_offer: Some(30),
            player2_coins_to_keep: Some(60),
            player2_coins_to_offer: Some(40),
            player1_response_to_p2: Some(Verdict::Accept),
            player2_response_to_p1: Some(Verdict::Accept),
            player1_earned: 110,
            player2_earned: 90,
            ..Default::default()
        };
        assert_eq!(
            ResolutionStrategy::OfferResponse.resolve(&record),
            Some((110, 90))
        );

        let record = RoundRecord {
            round_number: 1,
            player1_action: Some(Choice::Defect),
            player2_action: Some(Choice::Cooperate),
            ..Default::default()
        };
        assert_eq!(
            ResolutionStrategy::SingleAction.resolve(&record),
            Some((30, 0))
        );
    }
}
