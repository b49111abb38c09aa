//! Wire protocol types.
//!
//! Everything that crosses the persistent channel, in both directions, plus
//! the matchmaking REST collaborator interface. Client frames are tagged by
//! an `action` field; server frames arrive as a single envelope that may
//! carry several payloads at once and is decomposed into [`ServerEvent`]s.

use serde::{Deserialize, Serialize};

/// Match mode: paired with a live opponent or with the server-side bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Online,
    Bot,
}

/// Which of the two fixed player slots this client occupies.
///
/// Derived locally by fingerprint comparison against the snapshot, never
/// chosen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player1,
    Player2,
}

impl Role {
    pub fn opponent(&self) -> Role {
        match self {
            Role::Player1 => Role::Player2,
            Role::Player2 => Role::Player1,
        }
    }
}

/// A move in the single-action variant. Serialized capitalized, as the
/// server spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice {
    Cooperate,
    Defect,
}

/// Verdict on the opposing proposal in the offer-response variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
}

/// Addressee of a `respond_to_offer` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPlayer {
    #[serde(rename = "player_1")]
    Player1,
    #[serde(rename = "player_2")]
    Player2,
}

impl From<Role> for TargetPlayer {
    fn from(role: Role) -> Self {
        match role {
            Role::Player1 => TargetPlayer::Player1,
            Role::Player2 => TargetPlayer::Player2,
        }
    }
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        player_fingerprint: String,
    },
    MakeChoice {
        player_fingerprint: String,
        choice: Choice,
    },
    MakeOffer {
        player_fingerprint: String,
        coins_to_keep: u32,
        coins_to_offer: u32,
    },
    RespondToOffer {
        player_fingerprint: String,
        target_player: TargetPlayer,
        response: Verdict,
    },
    Timeout {
        player_fingerprint: String,
    },
    Leave {
        player_fingerprint: String,
    },
}

impl ClientFrame {
    /// Serialize for the wire.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The per-round state block inside a snapshot.
///
/// Carries the union of both variants' fields; the resolution strategy
/// decides which of them gate each phase. Made-flags and value fields are
/// redundant on the wire, so presence checks accept either.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurrentRound {
    pub round_number: u32,

    // Single-action variant
    pub player1_action: Option<Choice>,
    pub player2_action: Option<Choice>,

    // Offer-response variant
    pub player1_offer_made: bool,
    pub player2_offer_made: bool,
    pub player1_response_made: bool,
    pub player2_response_made: bool,
    pub player1_coins_to_keep: Option<u32>,
    pub player1_coins_to_offer: Option<u32>,
    pub player2_coins_to_keep: Option<u32>,
    pub player2_coins_to_offer: Option<u32>,
    pub player1_response: Option<Verdict>,
    pub player2_response: Option<Verdict>,
}

impl CurrentRound {
    pub fn choice_made(&self, role: Role) -> bool {
        match role {
            Role::Player1 => self.player1_action.is_some(),
            Role::Player2 => self.player2_action.is_some(),
        }
    }

    pub fn offer_made(&self, role: Role) -> bool {
        match role {
            Role::Player1 => self.player1_offer_made || self.player1_coins_to_offer.is_some(),
            Role::Player2 => self.player2_offer_made || self.player2_coins_to_offer.is_some(),
        }
    }

    pub fn response_made(&self, role: Role) -> bool {
        match role {
            Role::Player1 => self.player1_response_made || self.player1_response.is_some(),
            Role::Player2 => self.player2_response_made || self.player2_response.is_some(),
        }
    }

    pub fn both_choices_made(&self) -> bool {
        self.choice_made(Role::Player1) && self.choice_made(Role::Player2)
    }

    pub fn both_offers_made(&self) -> bool {
        self.offer_made(Role::Player1) && self.offer_made(Role::Player2)
    }

    pub fn both_responses_made(&self) -> bool {
        self.response_made(Role::Player1) && self.response_made(Role::Player2)
    }
}

/// A resolved round as it appears in the snapshot's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoundRecord {
    pub round_number: u32,

    // Single-action variant
    pub player1_action: Option<Choice>,
    pub player2_action: Option<Choice>,

    // Offer-response variant
    pub player1_coins_to_keep: Option<u32>,
    pub player1_coins_to_offer: Option<u32>,
    pub player2_coins_to_keep: Option<u32>,
    pub player2_coins_to_offer: Option<u32>,
    pub player1_response_to_p2: Option<Verdict>,
    pub player2_response_to_p1: Option<Verdict>,

    /// Round payoffs. The single-action server spells these `playerNPoints`.
    #[serde(alias = "player1Points")]
    pub player1_earned: i64,
    #[serde(alias = "player2Points")]
    pub player2_earned: i64,
}

impl RoundRecord {
    pub fn earned(&self, role: Role) -> i64 {
        match role {
            Role::Player1 => self.player1_earned,
            Role::Player2 => self.player2_earned,
        }
    }
}

/// An authoritative, full-state update pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub current_round: u32,
    pub max_rounds: u32,
    pub player1_score: i64,
    pub player2_score: i64,
    pub round_history: Vec<RoundRecord>,
    pub waiting_for_opponent: bool,
    pub game_over: bool,
    pub game_mode: GameMode,
    pub player1_fingerprint: Option<String>,
    pub player2_fingerprint: Option<String>,
    pub current_round_state: Option<CurrentRound>,
}

impl Snapshot {
    /// Both player slots filled.
    pub fn both_players_present(&self) -> bool {
        self.player1_fingerprint.is_some() && self.player2_fingerprint.is_some()
    }

    pub fn fingerprint(&self, role: Role) -> Option<&str> {
        match role {
            Role::Player1 => self.player1_fingerprint.as_deref(),
            Role::Player2 => self.player2_fingerprint.as_deref(),
        }
    }

    pub fn score(&self, role: Role) -> i64 {
        match role {
            Role::Player1 => self.player1_score,
            Role::Player2 => self.player2_score,
        }
    }
}

/// Echo of another participant's (or our own) action, broadcast by the
/// server ahead of the next snapshot. Provisional: the snapshot wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEcho {
    pub player_fingerprint: String,
    pub action: String,
    pub round_number: Option<u32>,
    pub coins_to_keep: Option<u32>,
    pub coins_to_offer: Option<u32>,
    pub response: Option<Verdict>,
    pub target_player: Option<TargetPlayer>,
    pub choice: Option<Choice>,
}

/// Server → client envelope. One frame may carry several payloads;
/// [`ServerFrame::into_events`] splits it into typed events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerFrame {
    pub game_state: Option<Snapshot>,

    pub game_over: Option<bool>,
    pub player1_score: Option<i64>,
    pub player2_score: Option<i64>,

    pub match_terminated: Option<bool>,
    pub game_aborted: Option<bool>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub redirect_to: Option<String>,

    pub round_results: Option<serde_json::Value>,
    pub error: Option<String>,

    // Action echo fields
    pub action: Option<String>,
    pub player_fingerprint: Option<String>,
    pub round_number: Option<u32>,
    pub coins_to_keep: Option<u32>,
    pub coins_to_offer: Option<u32>,
    pub response: Option<Verdict>,
    pub target_player: Option<TargetPlayer>,
    pub choice: Option<Choice>,
}

/// A single typed payload extracted from a [`ServerFrame`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Authoritative full-state update.
    State(Snapshot),
    /// All rounds resolved; final scores.
    GameOver {
        player1_score: i64,
        player2_score: i64,
    },
    /// Server-declared end of the match (`match_terminated` or
    /// `game_aborted` on the wire).
    Terminated {
        reason: String,
        redirect_to: Option<String>,
    },
    /// Provisional echo of a participant action.
    Action(ActionEcho),
    /// Raw round results payload; informational only.
    RoundResults(serde_json::Value),
    /// Server-reported error.
    Error(String),
}

impl ServerFrame {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<ServerFrame, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decompose the envelope into typed events, termination first so the
    /// consumer can stop processing the rest of a terminal frame.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.match_terminated.unwrap_or(false) || self.game_aborted.unwrap_or(false) {
            let reason = self
                .reason
                .or(self.message)
                .unwrap_or_else(|| "match terminated".to_string());
            events.push(ServerEvent::Terminated {
                reason,
                redirect_to: self.redirect_to,
            });
            return events;
        }

        if let Some(error) = self.error {
            events.push(ServerEvent::Error(error));
        }
        if let Some(snapshot) = self.game_state {
            events.push(ServerEvent::State(snapshot));
        }
        if self.game_over.unwrap_or(false) {
            events.push(ServerEvent::GameOver {
                player1_score: self.player1_score.unwrap_or(0),
                player2_score: self.player2_score.unwrap_or(0),
            });
        }
        if let (Some(action), Some(player_fingerprint)) = (self.action, self.player_fingerprint) {
            events.push(ServerEvent::Action(ActionEcho {
                player_fingerprint,
                action,
                round_number: self.round_number,
                coins_to_keep: self.coins_to_keep,
                coins_to_offer: self.coins_to_offer,
                response: self.response,
                target_player: self.target_player,
                choice: self.choice,
            }));
        }
        if let Some(results) = self.round_results {
            events.push(ServerEvent::RoundResults(results));
        }

        events
    }
}

/// Outcome of `create_match` on the matchmaking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchCreateStatus {
    Created,
    Joined,
}

/// Response shape of the matchmaking `create_match` endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchCreated {
    pub match_id: String,
    pub status: MatchCreateStatus,
}

/// Response shape of the matchmaking `match_stats` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MatchStats {
    pub players_count: u32,
    pub is_ready: bool,
}

/// Matchmaking REST collaborator. Out of core scope: implementations live
/// in the host application, typically wrapping an HTTP client.
pub trait Matchmaker {
    type Error;

    /// Allocate or join a match for this fingerprint.
    fn create_match(&self, mode: GameMode, fingerprint: &str)
        -> Result<MatchCreated, Self::Error>;

    /// Poll slot occupancy while waiting for an opponent.
    fn match_stats(&self, match_id: &str) -> Result<MatchStats, Self::Error>;
}
