//! Pure scoring kernel. No I/O, no clocks, no randomness: the same
//! inputs always produce byte-identical outputs, so clients can replay
//! it over revealed prompts to show live standings.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{FailReason, PlayerId, PlayerKind, PromptId, ResponseId, FORFEIT_MARKER};

/// Base points pool per prompt, before the round multiplier.
pub const BASE_POOL: i64 = 100;
/// Flat bonus when every eligible voter cast for the winner.
pub const UNANIMOUS_BONUS: i64 = 25;
/// Charged to the author of a forfeited response.
pub const FORFEIT_PENALTY: i64 = -10;

pub const RATING_MIN: f64 = 0.5;
pub const RATING_MAX: f64 = 2.0;
const RATING_UP: f64 = 1.1;
const RATING_DOWN: f64 = 0.9;

/// One response as the kernel sees it.
#[derive(Debug, Clone)]
pub struct ResponseInput {
    pub id: ResponseId,
    pub player_id: PlayerId,
    pub player_kind: PlayerKind,
    pub text: String,
}

impl ResponseInput {
    fn is_forfeit(&self) -> bool {
        self.text == FORFEIT_MARKER
    }
}

/// One vote as the kernel sees it.
#[derive(Debug, Clone)]
pub struct VoteInput {
    pub voter_id: PlayerId,
    pub response_id: Option<ResponseId>,
    pub fail_reason: Option<FailReason>,
}

/// Everything the kernel needs about one prompt.
#[derive(Debug, Clone)]
pub struct PromptInput {
    pub prompt_id: PromptId,
    pub responses: Vec<ResponseInput>,
    pub votes: Vec<VoteInput>,
    /// Active contestants who did not author a response to this prompt.
    pub eligible_voters: usize,
}

/// Mutable per-player state the kernel reads and rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub score: i64,
    pub humor_rating: f64,
    pub win_streak: u32,
}

/// Kernel output for one prompt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptScore {
    pub prompt_id: PromptId,
    pub response_points: BTreeMap<ResponseId, i64>,
    pub penalties: BTreeMap<PlayerId, i64>,
    pub winner_response_id: Option<ResponseId>,
    /// New humor ratings for voters whose rating moved.
    pub rating_updates: BTreeMap<PlayerId, f64>,
    pub unanimous: bool,
    pub ai_beat_human: bool,
    pub human_beat_ai: bool,
}

/// Kernel output for a whole round.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundScore {
    pub prompts: Vec<PromptScore>,
    /// Net point change per player (response points plus penalties).
    pub player_deltas: BTreeMap<PlayerId, i64>,
    /// Full post-round state per player, ready to persist.
    pub updated: BTreeMap<PlayerId, PlayerState>,
    pub top_scorer: Option<PlayerId>,
}

fn clamp_rating(rating: f64) -> f64 {
    rating.clamp(RATING_MIN, RATING_MAX)
}

/// Later rounds matter more: 1.0, 1.25, 1.5, ... capped at 2.0.
pub fn round_multiplier(round_number: u32) -> f64 {
    (1.0 + 0.25 * (round_number.saturating_sub(1)) as f64).min(2.0)
}

fn points_pool(round_number: u32) -> i64 {
    (BASE_POOL as f64 * round_multiplier(round_number)).round() as i64
}

/// Score one prompt. `ratings` holds voters' current humor ratings;
/// unknown voters weigh 1.0.
pub fn score_prompt(
    prompt: &PromptInput,
    ratings: &BTreeMap<PlayerId, f64>,
    round_number: u32,
) -> PromptScore {
    let mut responses: Vec<&ResponseInput> = prompt.responses.iter().collect();
    responses.sort_by(|a, b| a.id.cmp(&b.id));

    let non_forfeit: Vec<&&ResponseInput> = responses.iter().filter(|r| !r.is_forfeit()).collect();
    let candidate_ids: Vec<&ResponseId> = non_forfeit.iter().map(|r| &r.id).collect();

    // A cast vote counts only when it names a real, non-forfeit response.
    let mut cast: Vec<&VoteInput> = prompt
        .votes
        .iter()
        .filter(|v| {
            v.response_id
                .as_ref()
                .map(|id| candidate_ids.contains(&id))
                .unwrap_or(false)
        })
        .collect();
    cast.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));

    let pool = points_pool(round_number);
    let mut response_points: BTreeMap<ResponseId, i64> = BTreeMap::new();
    let mut penalties: BTreeMap<PlayerId, i64> = BTreeMap::new();

    for response in &responses {
        response_points.insert(response.id.clone(), 0);
        if response.is_forfeit() {
            *penalties.entry(response.player_id.clone()).or_insert(0) += FORFEIT_PENALTY;
        }
    }

    if non_forfeit.len() == 1 && responses.len() >= 2 {
        // Forfeit matchup: the surviving response auto-wins the pool
        // regardless of vote distribution.
        response_points.insert(non_forfeit[0].id.clone(), pool);
    } else if !cast.is_empty() {
        let mut weighted: BTreeMap<&ResponseId, f64> = BTreeMap::new();
        let mut total = 0.0;
        for vote in &cast {
            let weight = clamp_rating(ratings.get(&vote.voter_id).copied().unwrap_or(1.0));
            let id = vote.response_id.as_ref().unwrap();
            *weighted.entry(id).or_insert(0.0) += weight;
            total += weight;
        }
        if total > 0.0 {
            for (id, w) in &weighted {
                response_points.insert((*id).clone(), (pool as f64 * w / total).round() as i64);
            }
        }
    }

    // Winner by points, not raw votes; ties produce no winner.
    let max_points = response_points.values().copied().max().unwrap_or(0);
    let winner_response_id = if max_points > 0 {
        let leaders: Vec<&ResponseId> = response_points
            .iter()
            .filter(|(_, p)| **p == max_points)
            .map(|(id, _)| id)
            .collect();
        (leaders.len() == 1).then(|| leaders[0].clone())
    } else {
        None
    };

    let unanimous = match &winner_response_id {
        Some(winner) => {
            prompt.eligible_voters >= 2
                && cast.len() == prompt.eligible_voters
                && cast.iter().all(|v| v.response_id.as_ref() == Some(winner))
        }
        None => false,
    };
    if unanimous {
        let winner = winner_response_id.as_ref().unwrap();
        *response_points.get_mut(winner).unwrap() += UNANIMOUS_BONUS;
    }

    // Voters who backed the winner trend up, others down; bounded so
    // ratings stay in [RATING_MIN, RATING_MAX].
    let mut rating_updates: BTreeMap<PlayerId, f64> = BTreeMap::new();
    if let Some(winner) = &winner_response_id {
        for vote in &cast {
            let current = clamp_rating(ratings.get(&vote.voter_id).copied().unwrap_or(1.0));
            let updated = if vote.response_id.as_ref() == Some(winner) {
                clamp_rating(current * RATING_UP)
            } else {
                clamp_rating(current * RATING_DOWN)
            };
            rating_updates.insert(vote.voter_id.clone(), updated);
        }
    }

    let (ai_beat_human, human_beat_ai) = match &winner_response_id {
        Some(winner) => {
            let winner_kind = responses.iter().find(|r| &r.id == winner).map(|r| r.player_kind);
            let loser_kinds: Vec<PlayerKind> = responses
                .iter()
                .filter(|r| &r.id != winner)
                .map(|r| r.player_kind)
                .collect();
            match winner_kind {
                Some(PlayerKind::Ai) => {
                    (loser_kinds.contains(&PlayerKind::Human), false)
                }
                Some(PlayerKind::Human) => {
                    (false, loser_kinds.contains(&PlayerKind::Ai))
                }
                _ => (false, false),
            }
        }
        None => (false, false),
    };

    PromptScore {
        prompt_id: prompt.prompt_id.clone(),
        response_points,
        penalties,
        winner_response_id,
        rating_updates,
        unanimous,
        ai_beat_human,
        human_beat_ai,
    }
}

/// Score a whole round: fold `score_prompt` over the prompts in the
/// given (stable) order, then settle scores, ratings, and win streaks.
pub fn score_round(
    prompts: &[PromptInput],
    players: &BTreeMap<PlayerId, PlayerState>,
    round_number: u32,
) -> RoundScore {
    let mut ratings: BTreeMap<PlayerId, f64> = players
        .iter()
        .map(|(id, s)| (id.clone(), clamp_rating(s.humor_rating)))
        .collect();

    let author_of: BTreeMap<&ResponseId, &PlayerId> = prompts
        .iter()
        .flat_map(|p| p.responses.iter().map(|r| (&r.id, &r.player_id)))
        .collect();

    let mut player_deltas: BTreeMap<PlayerId, i64> =
        players.keys().map(|id| (id.clone(), 0)).collect();
    let mut prompt_scores = Vec::with_capacity(prompts.len());

    for prompt in prompts {
        let score = score_prompt(prompt, &ratings, round_number);
        for (response_id, points) in &score.response_points {
            if let Some(author) = author_of.get(response_id) {
                *player_deltas.entry((*author).clone()).or_insert(0) += points;
            }
        }
        for (player_id, penalty) in &score.penalties {
            *player_deltas.entry(player_id.clone()).or_insert(0) += penalty;
        }
        for (player_id, rating) in &score.rating_updates {
            ratings.insert(player_id.clone(), *rating);
        }
        prompt_scores.push(score);
    }

    // The round's unique top scorer keeps a streak; everyone else resets.
    let max_delta = player_deltas.values().copied().max().unwrap_or(0);
    let top_scorer = if max_delta > 0 {
        let leaders: Vec<&PlayerId> = player_deltas
            .iter()
            .filter(|(_, d)| **d == max_delta)
            .map(|(id, _)| id)
            .collect();
        (leaders.len() == 1).then(|| leaders[0].clone())
    } else {
        None
    };

    let mut updated: BTreeMap<PlayerId, PlayerState> = BTreeMap::new();
    for (id, state) in players {
        let delta = player_deltas.get(id).copied().unwrap_or(0);
        let win_streak = if top_scorer.as_ref() == Some(id) {
            state.win_streak + 1
        } else {
            0
        };
        updated.insert(
            id.clone(),
            PlayerState {
                score: state.score + delta,
                humor_rating: ratings.get(id).copied().unwrap_or(state.humor_rating),
                win_streak,
            },
        );
    }

    RoundScore {
        prompts: prompt_scores,
        player_deltas,
        updated,
        top_scorer,
    }
}
