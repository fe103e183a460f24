use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type GameId = String;
pub type PlayerId = String;
pub type RoundId = String;
pub type PromptId = String;
pub type ResponseId = String;
pub type VoteId = String;
pub type ModelId = String;

/// Sentinel stored in `Response.text` when a contestant failed to submit.
/// Excluded when computing votable prompts; triggers auto-win scoring.
pub const FORFEIT_MARKER: &str = "__FORFEIT__";

/// Minimum active contestants required to start a game.
pub const MIN_PLAYERS: usize = 2;

/// Hard cap on answer length; longer submissions are truncated.
pub const MAX_ANSWER_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Lobby,
    Writing,
    Voting,
    RoundResults,
    FinalResults,
}

impl GameStatus {
    /// A game still in play; terminal games refuse host actions.
    pub fn is_active(&self) -> bool {
        !matches!(self, GameStatus::FinalResults)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerKind {
    Human,
    Ai,
    Spectator,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationStatus {
    Active,
    Disconnected,
}

/// Structured reason a model call produced no real answer or vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// The model returned only whitespace or quotes.
    Empty,
    /// The call itself failed (timeout, API error).
    Error,
    /// The model answered but not with a recognizable candidate label.
    InvalidLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    /// 4-character uppercase room code, unique among live games.
    pub room_code: String,
    pub status: GameStatus,
    /// 1-indexed; 0 while still in the lobby.
    pub current_round: u32,
    pub total_rounds: u32,
    pub host_player_id: PlayerId,
    pub phase_deadline: Option<DateTime<Utc>>,
    pub timers_disabled: bool,
    /// Index into the ordered votable prompts of the current round.
    pub voting_prompt_index: usize,
    pub voting_revealing: bool,
    /// Bumped on every externally visible state change; drives ETag 304s.
    pub version: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Room code of a rematch game, once one is created.
    pub next_game_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub game_id: GameId,
    pub name: String,
    pub kind: PlayerKind,
    pub model_id: Option<ModelId>,
    pub score: i64,
    /// Small positive float scaling this player's future vote weight.
    pub humor_rating: f64,
    pub win_streak: u32,
    pub idle_rounds: u32,
    pub participation_status: ParticipationStatus,
    pub last_seen: DateTime<Utc>,
    /// Long-lived token that lets a reloaded browser reclaim this slot.
    #[serde(skip_serializing)]
    pub rejoin_token: String,
}

impl Player {
    /// Non-spectator and not disconnected; the quorum population.
    pub fn is_active_contestant(&self) -> bool {
        self.kind != PlayerKind::Spectator
            && self.participation_status == ParticipationStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: RoundId,
    pub game_id: GameId,
    pub round_number: u32,
    /// Set once by the scoring commit; the idempotency latch.
    pub scored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: PromptId,
    pub round_id: RoundId,
    pub text: String,
    /// Stable position within the round; prompt order never changes.
    pub position: usize,
    /// Written by the scoring commit; None until scored or on a tie.
    pub winner_response_id: Option<ResponseId>,
}

/// "This player must answer this prompt."
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub prompt_id: PromptId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: ResponseId,
    pub prompt_id: PromptId,
    pub player_id: PlayerId,
    pub text: String,
    /// Written at scoring time.
    pub points_earned: Option<i64>,
    pub fail_reason: Option<FailReason>,
    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn is_forfeit(&self) -> bool {
        self.text == FORFEIT_MARKER
    }
}

/// A voter's pick on one prompt. `response_id == None` with no fail
/// reason is an abstention; with a fail reason it is an error vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub prompt_id: PromptId,
    pub voter_id: PlayerId,
    pub response_id: Option<ResponseId>,
    pub fail_reason: Option<FailReason>,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn is_cast(&self) -> bool {
        self.response_id.is_some()
    }

    pub fn is_abstention(&self) -> bool {
        self.response_id.is_none() && self.fail_reason.is_none()
    }
}

/// Decorative emoji on a response; never affects scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub response_id: ResponseId,
    pub player_id: PlayerId,
    pub emoji: String,
}

/// Per-(game, model) running token/cost totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameModelUsage {
    pub game_id: GameId,
    pub model_id: ModelId,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forfeit_detection() {
        let resp = Response {
            id: "r1".to_string(),
            prompt_id: "p1".to_string(),
            player_id: "pl1".to_string(),
            text: FORFEIT_MARKER.to_string(),
            points_earned: None,
            fail_reason: Some(FailReason::Error),
            created_at: Utc::now(),
        };
        assert!(resp.is_forfeit());
    }

    #[test]
    fn test_vote_classification() {
        let mut vote = Vote {
            id: "v1".to_string(),
            prompt_id: "p1".to_string(),
            voter_id: "pl1".to_string(),
            response_id: None,
            fail_reason: None,
            created_at: Utc::now(),
        };
        assert!(vote.is_abstention());
        assert!(!vote.is_cast());

        vote.fail_reason = Some(FailReason::Error);
        assert!(!vote.is_abstention());

        vote.response_id = Some("r1".to_string());
        vote.fail_reason = None;
        assert!(vote.is_cast());
    }

    #[test]
    fn test_status_serializes_screaming() {
        let s = serde_json::to_string(&GameStatus::RoundResults).unwrap();
        assert_eq!(s, "\"ROUND_RESULTS\"");
    }
}
