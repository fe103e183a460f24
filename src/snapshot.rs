//! Client-facing snapshot of a game. This is the only read surface, so
//! the spoiler rules live here: during VOTING, responses and votes of
//! votable prompts beyond `votingPromptIndex` are withheld until their
//! turn, and during WRITING players see nobody's answers but their own.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;
use crate::types::*;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub id: GameId,
    pub room_code: String,
    pub status: GameStatus,
    pub current_round: u32,
    pub total_rounds: u32,
    pub host_player_id: PlayerId,
    pub phase_deadline: Option<DateTime<Utc>>,
    pub timers_disabled: bool,
    pub voting_prompt_index: usize,
    pub voting_revealing: bool,
    pub version: u64,
    pub next_game_code: Option<String>,
    /// Server clock, for client-side countdown rendering.
    pub server_now: DateTime<Utc>,
    pub players: Vec<PlayerView>,
    pub rounds: Vec<RoundView>,
    pub usage: UsageView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub kind: PlayerKind,
    pub model_id: Option<ModelId>,
    pub score: i64,
    pub humor_rating: f64,
    pub win_streak: u32,
    pub participation_status: ParticipationStatus,
    pub is_host: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub round_number: u32,
    pub scored: bool,
    pub prompts: Vec<PromptView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptView {
    pub id: PromptId,
    pub text: String,
    pub position: usize,
    pub votable: bool,
    pub assigned_player_ids: Vec<PlayerId>,
    pub winner_response_id: Option<ResponseId>,
    /// True when responses/votes are withheld from this snapshot.
    pub hidden: bool,
    pub responses: Vec<ResponseView>,
    pub votes: Vec<VoteView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseView {
    pub id: ResponseId,
    pub player_id: PlayerId,
    pub text: String,
    pub points_earned: Option<i64>,
    pub fail_reason: Option<FailReason>,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub voter_id: PlayerId,
    pub response_id: Option<ResponseId>,
    pub fail_reason: Option<FailReason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageView {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub per_model: Vec<GameModelUsage>,
}

/// Build the snapshot one `viewer` is allowed to see.
pub async fn build(state: &AppState, game: &Game, viewer: Option<&PlayerId>) -> GameSnapshot {
    let players: Vec<PlayerView> = state
        .players_of_game(&game.id)
        .await
        .into_iter()
        .map(|p| PlayerView {
            is_host: p.id == game.host_player_id,
            id: p.id,
            name: p.name,
            kind: p.kind,
            model_id: p.model_id,
            score: p.score,
            humor_rating: p.humor_rating,
            win_streak: p.win_streak,
            participation_status: p.participation_status,
        })
        .collect();

    let mut rounds = Vec::new();
    for round in state.rounds_of_game(&game.id).await {
        let is_current = round.round_number == game.current_round;
        let votable_ids: Vec<PromptId> = state
            .votable_prompts(&round.id)
            .await
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut prompt_views = Vec::new();
        for prompt in state.prompts_of_round(&round.id).await {
            let votable_ordinal = votable_ids.iter().position(|id| *id == prompt.id);

            // Writing: only your own answers exist for you yet.
            // Voting: future votable matchups stay sealed.
            let (hidden, own_only) = if !is_current {
                (false, false)
            } else {
                match game.status {
                    GameStatus::Writing => (false, true),
                    GameStatus::Voting => {
                        let sealed = votable_ordinal
                            .map(|ord| ord > game.voting_prompt_index)
                            .unwrap_or(false);
                        (sealed, false)
                    }
                    _ => (false, false),
                }
            };

            let mut responses = Vec::new();
            let mut votes = Vec::new();
            if !hidden {
                for r in state.responses_of_prompt(&prompt.id).await {
                    if own_only && viewer != Some(&r.player_id) {
                        continue;
                    }
                    responses.push(ResponseView {
                        reactions: state.reactions_for_response(&r.id).await,
                        id: r.id,
                        player_id: r.player_id,
                        text: r.text,
                        points_earned: r.points_earned,
                        fail_reason: r.fail_reason,
                    });
                }
                if !own_only {
                    votes = state
                        .votes_of_prompt(&prompt.id)
                        .await
                        .into_iter()
                        .map(|v| VoteView {
                            voter_id: v.voter_id,
                            response_id: v.response_id,
                            fail_reason: v.fail_reason,
                        })
                        .collect();
                }
            }

            prompt_views.push(PromptView {
                votable: votable_ordinal.is_some()
                    && !(is_current && game.status == GameStatus::Writing),
                assigned_player_ids: state.assignees_of_prompt(&prompt.id).await,
                id: prompt.id,
                text: prompt.text,
                position: prompt.position,
                winner_response_id: prompt.winner_response_id,
                hidden,
                responses,
                votes,
            });
        }

        rounds.push(RoundView {
            round_number: round.round_number,
            scored: round.scored_at.is_some(),
            prompts: prompt_views,
        });
    }

    GameSnapshot {
        id: game.id.clone(),
        room_code: game.room_code.clone(),
        status: game.status,
        current_round: game.current_round,
        total_rounds: game.total_rounds,
        host_player_id: game.host_player_id.clone(),
        phase_deadline: game.phase_deadline,
        timers_disabled: game.timers_disabled,
        voting_prompt_index: game.voting_prompt_index,
        voting_revealing: game.voting_revealing,
        version: game.version,
        next_game_code: game.next_game_code.clone(),
        server_now: Utc::now(),
        players,
        rounds,
        usage: UsageView {
            input_tokens: game.input_tokens,
            output_tokens: game.output_tokens,
            cost_usd: game.cost_usd,
            per_model: state.usage_rows(&game.id).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state;

    async fn voting_game(state: &AppState) -> (Game, Vec<Player>) {
        let (game, _host) = state
            .create_game("Host".to_string(), 1, true)
            .await
            .unwrap();
        for name in ["P2", "P3"] {
            state
                .join_game(&game.id, name.to_string(), PlayerKind::Human, None)
                .await
                .unwrap();
        }
        let contestants = state.players_of_game(&game.id).await;
        state
            .create_round_with_prompts(&game, 1, &contestants)
            .await
            .unwrap();
        state
            .update_game_where(&game.id, |_| true, |g| {
                g.status = GameStatus::Writing;
                g.current_round = 1;
            })
            .await
            .unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        let round = state.current_round(&game).await.unwrap();
        for player in &contestants {
            for prompt_id in state.assigned_prompt_ids(&round.id, &player.id).await {
                state
                    .submit_response(&game, &player.id, &prompt_id, &format!("{} joke", player.name))
                    .await
                    .unwrap();
            }
        }
        state
            .update_game_where(&game.id, |_| true, |g| {
                g.status = GameStatus::Voting;
                g.voting_prompt_index = 0;
            })
            .await
            .unwrap();
        (state.get_game(&game.id).await.unwrap(), contestants)
    }

    // Future matchups are sealed; current and past ones are visible.
    #[tokio::test]
    async fn test_future_prompts_sealed_during_voting() {
        let state = state();
        let (game, contestants) = voting_game(&state).await;
        let round = state.current_round(&game).await.unwrap();
        let votable = state.votable_prompts(&round.id).await;
        assert_eq!(votable.len(), 3);

        // Drop an AI-ish vote on a future prompt directly.
        state
            .insert_vote_unique(Vote {
                id: ulid::Ulid::new().to_string(),
                prompt_id: votable[2].id.clone(),
                voter_id: contestants[0].id.clone(),
                response_id: None,
                fail_reason: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let snapshot = build(&state, &game, None).await;
        let prompts = &snapshot.rounds[0].prompts;
        let find = |id: &PromptId| prompts.iter().find(|p| p.id == *id).unwrap();

        let current = find(&votable[0].id);
        assert!(!current.hidden);
        assert_eq!(current.responses.len(), 2);

        for future in &votable[1..] {
            let view = find(&future.id);
            assert!(view.hidden);
            assert!(view.responses.is_empty());
            assert!(view.votes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_advancing_reveals_previous_votes() {
        let state = state();
        let (game, contestants) = voting_game(&state).await;
        let round = state.current_round(&game).await.unwrap();
        let votable = state.votable_prompts(&round.id).await;

        state
            .insert_vote_unique(Vote {
                id: ulid::Ulid::new().to_string(),
                prompt_id: votable[0].id.clone(),
                voter_id: contestants[2].id.clone(),
                response_id: None,
                fail_reason: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        state
            .update_game_where(&game.id, |_| true, |g| g.voting_prompt_index = 1)
            .await
            .unwrap();
        let game = state.get_game(&game.id).await.unwrap();

        let snapshot = build(&state, &game, None).await;
        let first = snapshot.rounds[0]
            .prompts
            .iter()
            .find(|p| p.id == votable[0].id)
            .unwrap();
        assert!(!first.hidden);
        assert_eq!(first.votes.len(), 1);
    }

    #[tokio::test]
    async fn test_writing_shows_only_own_responses() {
        let state = state();
        let (game, contestants) = voting_game(&state).await;
        // Rewind to WRITING for the visibility check.
        state
            .update_game_where(&game.id, |_| true, |g| g.status = GameStatus::Writing)
            .await
            .unwrap();
        let game = state.get_game(&game.id).await.unwrap();

        let me = &contestants[0];
        let snapshot = build(&state, &game, Some(&me.id)).await;
        for prompt in &snapshot.rounds[0].prompts {
            for response in &prompt.responses {
                assert_eq!(response.player_id, me.id);
            }
            assert!(prompt.votes.is_empty());
        }

        // Anonymous viewer sees no responses at all.
        let snapshot = build(&state, &game, None).await;
        assert!(snapshot.rounds[0]
            .prompts
            .iter()
            .all(|p| p.responses.is_empty()));
    }
}
