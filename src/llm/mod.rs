mod gateway;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub use gateway::GatewayClient;

use crate::types::{FailReason, GameId, PlayerId, ResponseId, FORFEIT_MARKER};

/// Errors that can occur during model calls. These never escape the
/// orchestrator; they become forfeits and fallback votes.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("response parsing failed: {0}")]
    Parse(String),
}

/// Provider-reported token counts for one call. Zero on failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One prior round from the contestant's own perspective, injected as
/// context so later rounds can learn.
#[derive(Debug, Clone)]
pub struct JokeHistoryEntry {
    pub round_number: u32,
    pub prompt_text: String,
    pub own_text: String,
    pub won: bool,
    /// The winning answer, when someone else's joke beat this one.
    pub winning_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JokeOutcome {
    /// Cleaned joke text, or `FORFEIT_MARKER` on failure.
    pub text: String,
    pub usage: TokenUsage,
    pub fail_reason: Option<FailReason>,
}

impl JokeOutcome {
    pub fn forfeit(reason: FailReason, usage: TokenUsage) -> Self {
        Self {
            text: FORFEIT_MARKER.to_string(),
            usage,
            fail_reason: Some(reason),
        }
    }
}

/// A labelled answer the voter model chooses among. Presented in fixed
/// order with labels A, B, ...
#[derive(Debug, Clone)]
pub struct VoteCandidate {
    pub response_id: ResponseId,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// None only when there was nothing to vote on.
    pub chosen_response_id: Option<ResponseId>,
    pub usage: TokenUsage,
    pub fail_reason: Option<FailReason>,
}

/// Identifies the vote for the deterministic fallback.
#[derive(Debug, Clone)]
pub struct VoteContext {
    pub game_id: GameId,
    pub round_number: u32,
    pub voter_id: PlayerId,
}

/// LLM operations the orchestrator needs. Implementations must never
/// panic; every failure maps to a forfeit or fallback outcome.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate_joke(
        &self,
        model_id: &str,
        prompt_text: &str,
        history: &[JokeHistoryEntry],
    ) -> JokeOutcome;

    async fn ai_vote(
        &self,
        model_id: &str,
        prompt_text: &str,
        candidates: &[VoteCandidate],
        ctx: &VoteContext,
    ) -> VoteOutcome;
}

/// Used when no gateway is configured: every joke forfeits and every
/// vote falls back deterministically.
pub struct DisabledClient;

#[async_trait]
impl ModelClient for DisabledClient {
    async fn generate_joke(
        &self,
        _model_id: &str,
        _prompt_text: &str,
        _history: &[JokeHistoryEntry],
    ) -> JokeOutcome {
        JokeOutcome::forfeit(FailReason::Error, TokenUsage::default())
    }

    async fn ai_vote(
        &self,
        _model_id: &str,
        _prompt_text: &str,
        candidates: &[VoteCandidate],
        ctx: &VoteContext,
    ) -> VoteOutcome {
        fallback_vote(candidates, ctx, FailReason::Error, TokenUsage::default())
    }
}

/// Strip whitespace and one layer of matching surrounding quotes.
pub fn clean_joke_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('\u{201c}')
                .and_then(|s| s.strip_suffix('\u{201d}'))
        })
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

/// Deterministic candidate index for a failed vote:
/// `sha256(gameId:roundNumber:voterId)` first 8 bytes as u64, mod N.
/// Repeated runs with the same inputs always pick the same candidate.
pub fn fallback_vote_index(ctx: &VoteContext, candidate_count: usize) -> usize {
    let input = format!("{}:{}:{}", ctx.game_id, ctx.round_number, ctx.voter_id);
    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    (u64::from_be_bytes(bytes) % candidate_count as u64) as usize
}

/// Resolve a failed or short-circuited vote per the contract: zero
/// candidates means no vote, one candidate wins trivially, otherwise the
/// deterministic fallback picks.
pub fn fallback_vote(
    candidates: &[VoteCandidate],
    ctx: &VoteContext,
    reason: FailReason,
    usage: TokenUsage,
) -> VoteOutcome {
    match candidates.len() {
        0 => VoteOutcome {
            chosen_response_id: None,
            usage,
            fail_reason: None,
        },
        1 => VoteOutcome {
            chosen_response_id: Some(candidates[0].response_id.clone()),
            usage,
            fail_reason: None,
        },
        n => VoteOutcome {
            chosen_response_id: Some(
                candidates[fallback_vote_index(ctx, n)].response_id.clone(),
            ),
            usage,
            fail_reason: Some(reason),
        },
    }
}

/// Candidate label for position `i`: A, B, C, ...
pub fn candidate_label(i: usize) -> char {
    (b'A' + (i as u8)) as char
}

/// Map a model's answer back to a candidate index. Accepts the first
/// ASCII letter in the reply so "B" and "The answer is B." both work.
pub fn parse_vote_label(reply: &str, candidate_count: usize) -> Option<usize> {
    let letter = reply.chars().find(|c| c.is_ascii_alphabetic())?;
    let index = (letter.to_ascii_uppercase() as u8).wrapping_sub(b'A') as usize;
    (index < candidate_count).then_some(index)
}
