//! Deadline supervision.
//!
//! One decision deadline at a time (the phase the local player must act in),
//! fixed display timers for the results/transition phases, and the short
//! grace countdown that follows a forced termination. Deadlines are plain
//! `Instant`s; the host drives them by calling `tick(now)` from its event
//! loop, after any freshly arrived snapshot has been applied.

use std::time::{Duration, Instant};

use crate::session::round::Decision;

/// Decision window for the single-action variant.
pub const CHOICE_TIME_LIMIT: Duration = Duration::from_secs(10);

/// Decision window for making an offer.
pub const OFFER_TIME_LIMIT: Duration = Duration::from_secs(25);

/// Decision window for answering the opposing proposal.
pub const RESPONSE_TIME_LIMIT: Duration = Duration::from_secs(25);

/// How long the round outcome stays on screen.
pub const RESULTS_DISPLAY_DURATION: Duration = Duration::from_secs(5);

/// Countdown between rounds.
pub const TRANSITION_COUNTDOWN: Duration = Duration::from_secs(3);

/// Grace period between a forced termination and navigation away.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Configured limits for every supervised deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub choice_limit: Duration,
    pub offer_limit: Duration,
    pub response_limit: Duration,
    pub results_duration: Duration,
    pub transition_duration: Duration,
    pub termination_grace: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            choice_limit: CHOICE_TIME_LIMIT,
            offer_limit: OFFER_TIME_LIMIT,
            response_limit: RESPONSE_TIME_LIMIT,
            results_duration: RESULTS_DISPLAY_DURATION,
            transition_duration: TRANSITION_COUNTDOWN,
            termination_grace: TERMINATION_GRACE,
        }
    }
}

impl TimerConfig {
    pub fn limit(&self, decision: Decision) -> Duration {
        match decision {
            Decision::Choice => self.choice_limit,
            Decision::Offer => self.offer_limit,
            Decision::Response => self.response_limit,
        }
    }
}

/// A deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    /// The local player's decision window expired with no action sent.
    /// Forces termination of the session; no default action is substituted.
    ClientTimeout(Decision),
    /// The fixed results display elapsed; request the next phase.
    ResultsElapsed,
    /// The transition countdown elapsed; request the next phase.
    TransitionElapsed,
    /// The post-termination grace countdown elapsed; the application is
    /// expected to navigate away.
    GraceElapsed,
}

#[derive(Debug, Clone, Copy)]
struct DecisionDeadline {
    decision: Decision,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
enum DisplayDeadline {
    Results(Instant),
    Transition(Instant),
}

/// Deadline supervisor for one session.
#[derive(Debug, Clone, Default)]
pub struct TimerSupervisor {
    config: TimerConfig,
    decision: Option<DecisionDeadline>,
    display: Option<DisplayDeadline>,
    grace: Option<Instant>,
}

impl TimerSupervisor {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            decision: None,
            display: None,
            grace: None,
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Arm (or re-arm) the decision deadline at its full configured limit.
    /// Called on every snapshot-driven re-evaluation that lands in a decision
    /// phase the local player still owes, so a partially consumed countdown
    /// resets whenever the phase is (re-)entered.
    pub fn arm_decision(&mut self, decision: Decision, now: Instant) {
        self.decision = Some(DecisionDeadline {
            decision,
            expires_at: now + self.config.limit(decision),
        });
    }

    /// Drop the decision deadline (the local player has acted, or the phase
    /// no longer waits on them).
    pub fn clear_decision(&mut self) {
        self.decision = None;
    }

    /// Start the fixed results display.
    pub fn arm_results(&mut self, now: Instant) {
        self.display = Some(DisplayDeadline::Results(now + self.config.results_duration));
    }

    /// Start the fixed transition countdown.
    pub fn arm_transition(&mut self, now: Instant) {
        self.display = Some(DisplayDeadline::Transition(
            now + self.config.transition_duration,
        ));
    }

    /// Start the post-termination grace countdown.
    pub fn arm_grace(&mut self, now: Instant) {
        self.grace = Some(now + self.config.termination_grace);
    }

    /// Cancel every pending deadline atomically (terminal transitions).
    pub fn cancel_all(&mut self) {
        self.decision = None;
        self.display = None;
        self.grace = None;
    }

    /// Seconds remaining on the pending decision of the given kind.
    pub fn remaining(&self, decision: Decision, now: Instant) -> Option<Duration> {
        self.decision
            .filter(|d| d.decision == decision)
            .map(|d| d.expires_at.saturating_duration_since(now))
    }

    /// Whole seconds left on the offer window, if armed.
    pub fn offer_time_left(&self, now: Instant) -> Option<u64> {
        self.remaining(Decision::Offer, now)
            .or_else(|| self.remaining(Decision::Choice, now))
            .map(|d| d.as_secs())
    }

    /// Whole seconds left on the response window, if armed.
    pub fn response_time_left(&self, now: Instant) -> Option<u64> {
        self.remaining(Decision::Response, now).map(|d| d.as_secs())
    }

    /// Evaluate every deadline against `now`. Each signal fires once.
    pub fn tick(&mut self, now: Instant) -> Vec<TimerSignal> {
        let mut signals = Vec::new();

        if let Some(deadline) = self.decision {
            if now >= deadline.expires_at {
                self.decision = None;
                signals.push(TimerSignal::ClientTimeout(deadline.decision));
            }
        }

        match self.display {
            Some(DisplayDeadline::Results(at)) if now >= at => {
                self.display = None;
                signals.push(TimerSignal::ResultsElapsed);
            }
            Some(DisplayDeadline::Transition(at)) if now >= at => {
                self.display = None;
                signals.push(TimerSignal::TransitionElapsed);
            }
            _ => {}
        }

        if let Some(at) = self.grace {
            if now >= at {
                self.grace = None;
                signals.push(TimerSignal::GraceElapsed);
            }
        }

        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> TimerSupervisor {
        TimerSupervisor::new(TimerConfig::default())
    }

    #[test]
    fn test_decision_deadline_fires_once() {
        let mut timers = supervisor();
        let start = Instant::now();

        timers.arm_decision(Decision::Offer, start);
        assert!(timers.tick(start + Duration::from_secs(24)).is_empty());

        let signals = timers.tick(start + Duration::from_secs(25));
        assert_eq!(signals, vec![TimerSignal::ClientTimeout(Decision::Offer)]);

        // Consumed: no repeat.
        assert!(timers.tick(start + Duration::from_secs(26)).is_empty());
    }

    #[test]
    fn test_reentry_resets_to_full_limit() {
        let mut timers = supervisor();
        let start = Instant::now();

        timers.arm_decision(Decision::Response, start);
        let partway = start + Duration::from_secs(20);
        assert_eq!(
            timers.remaining(Decision::Response, partway),
            Some(Duration::from_secs(5))
        );

        // Phase re-evaluated from a new snapshot: back to the full limit.
        timers.arm_decision(Decision::Response, partway);
        assert_eq!(
            timers.remaining(Decision::Response, partway),
            Some(Duration::from_secs(25))
        );
        assert!(timers.tick(start + Duration::from_secs(25)).is_empty());
    }

    #[test]
    fn test_display_timers_request_next_phase() {
        let mut timers = supervisor();
        let start = Instant::now();

        timers.arm_results(start);
        assert_eq!(
            timers.tick(start + Duration::from_secs(5)),
            vec![TimerSignal::ResultsElapsed]
        );

        timers.arm_transition(start);
        assert_eq!(
            timers.tick(start + Duration::from_secs(3)),
            vec![TimerSignal::TransitionElapsed]
        );
    }

    #[test]
    fn test_grace_countdown() {
        let mut timers = supervisor();
        let start = Instant::now();

        timers.arm_grace(start);
        assert!(timers.tick(start + Duration::from_secs(4)).is_empty());
        assert_eq!(
            timers.tick(start + Duration::from_secs(5)),
            vec![TimerSignal::GraceElapsed]
        );
    }

    #[test]
    fn test_cancel_all_is_atomic() {
        let mut timers = supervisor();
        let start = Instant::now();

        timers.arm_decision(Decision::Choice, start);
        timers.arm_results(start);
        timers.arm_grace(start);
        timers.cancel_all();

        assert!(timers.tick(start + Duration::from_secs(60)).is_empty());
        assert_eq!(timers.offer_time_left(start), None);
    }

    #[test]
    fn test_time_left_views() {
        let mut timers = supervisor();
        let start = Instant::now();

        timers.arm_decision(Decision::Offer, start);
        assert_eq!(timers.offer_time_left(start), Some(25));
        assert_eq!(timers.response_time_left(start), None);

        timers.arm_decision(Decision::Choice, start);
        assert_eq!(timers.offer_time_left(start), Some(10));
    }
}
