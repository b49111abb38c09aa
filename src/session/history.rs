//! Round history ledger.
//!
//! Append-only record of resolved rounds plus running totals derived by
//! summation. Entries are never mutated after insertion.

use std::fmt;

use crate::session::protocol::{Role, RoundRecord};

/// Maximum rounds per match.
pub const DEFAULT_ROUND_CAP: u32 = 25;

/// History errors. All of these are protocol violations: the server feed
/// promised a monotonic, gap-free round sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryError {
    /// A record for this round number was already appended.
    DuplicateRound(u32),
    /// Round number lower than the last appended entry.
    OutOfOrder { last: u32, got: u32 },
    /// Round number skips ahead of the expected successor.
    RoundGap { expected: u32, got: u32 },
    /// Appending would exceed the round cap.
    CapExceeded(u32),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRound(n) => write!(f, "Round {} already recorded", n),
            Self::OutOfOrder { last, got } => {
                write!(f, "Round {} arrived after round {}", got, last)
            }
            Self::RoundGap { expected, got } => {
                write!(f, "Expected round {}, got round {}", expected, got)
            }
            Self::CapExceeded(cap) => write!(f, "History already holds {} rounds", cap),
        }
    }
}

impl std::error::Error for HistoryError {}

/// Append-only ledger of resolved rounds.
#[derive(Debug, Clone, Default)]
pub struct HistoryAggregator {
    rounds: Vec<RoundRecord>,
    cap: u32,
}

impl HistoryAggregator {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_ROUND_CAP)
    }

    pub fn with_cap(cap: u32) -> Self {
        Self {
            rounds: Vec::new(),
            cap,
        }
    }

    /// Append a resolved round. Accepted at most once per round number, and
    /// only as the direct successor of the last appended entry.
    pub fn append(&mut self, record: RoundRecord) -> Result<(), HistoryError> {
        let last = self.last_round_number();
        let expected = last + 1;

        if record.round_number <= last {
            if self.rounds.iter().any(|r| r.round_number == record.round_number) {
                return Err(HistoryError::DuplicateRound(record.round_number));
            }
            return Err(HistoryError::OutOfOrder {
                last,
                got: record.round_number,
            });
        }
        if record.round_number > expected {
            return Err(HistoryError::RoundGap {
                expected,
                got: record.round_number,
            });
        }
        if self.rounds.len() as u32 >= self.cap {
            return Err(HistoryError::CapExceeded(self.cap));
        }

        self.rounds.push(record);
        Ok(())
    }

    /// Resolved rounds, in order.
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Round number of the last appended entry (0 when empty).
    pub fn last_round_number(&self) -> u32 {
        self.rounds.last().map(|r| r.round_number).unwrap_or(0)
    }

    /// Running total for one player, derived by summation.
    pub fn total(&self, role: Role) -> i64 {
        self.rounds.iter().map(|r| r.earned(role)).sum()
    }

    /// Both running totals.
    pub fn totals(&self) -> (i64, i64) {
        (self.total(Role::Player1), self.total(Role::Player2))
    }

    /// Cross-check server-provided totals against the derived sums.
    pub fn totals_match(&self, player1_score: i64, player2_score: i64) -> bool {
        self.totals() == (player1_score, player2_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(number: u32, p1: i64, p2: i64) -> RoundRecord {
        RoundRecord {
            round_number: number,
            player1_earned: p1,
            player2_earned: p2,
            ..Default::default()
        }
    }

    #[test]
    fn test_append_in_order() {
        let mut history = HistoryAggregator::new();
        history.append(record(1, 20, 20)).unwrap();
        history.append(record(2, 0, 30)).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.last_round_number(), 2);
        assert_eq!(history.totals(), (20, 50));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut history = HistoryAggregator::new();
        history.append(record(1, 10, 10)).unwrap();

        let err = history.append(record(1, 10, 10)).unwrap_err();
        assert_eq!(err, HistoryError::DuplicateRound(1));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut history = HistoryAggregator::new();
        history.append(record(1, 10, 10)).unwrap();
        history.append(record(2, 10, 10)).unwrap();
        history.append(record(3, 10, 10)).unwrap();

        // 2 exists -> duplicate, but a never-seen lower number is out of order
        let mut pruned = HistoryAggregator::new();
        pruned.append(record(1, 10, 10)).unwrap();
        pruned.append(record(2, 10, 10)).unwrap();
        assert_eq!(
            history.append(record(2, 10, 10)).unwrap_err(),
            HistoryError::DuplicateRound(2)
        );
        assert_eq!(
            pruned.append(record(0, 10, 10)).unwrap_err(),
            HistoryError::OutOfOrder { last: 2, got: 0 }
        );
    }

    #[test]
    fn test_gap_rejected() {
        let mut history = HistoryAggregator::new();
        history.append(record(1, 10, 10)).unwrap();

        let err = history.append(record(3, 10, 10)).unwrap_err();
        assert_eq!(err, HistoryError::RoundGap { expected: 2, got: 3 });
    }

    #[test]
    fn test_cap_enforced() {
        let mut history = HistoryAggregator::with_cap(2);
        history.append(record(1, 10, 10)).unwrap();
        history.append(record(2, 10, 10)).unwrap();

        let err = history.append(record(3, 10, 10)).unwrap_err();
        assert_eq!(err, HistoryError::CapExceeded(2));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_totals_cross_check() {
        let mut history = HistoryAggregator::new();
        history.append(record(1, 110, 90)).unwrap();
        history.append(record(2, 0, 0)).unwrap();

        assert!(history.totals_match(110, 90));
        assert!(!history.totals_match(110, 100));
    }
}
