//! The phase machine. Every transition is an atomic conditional update
//! on the Game row (`update_game_where`); exactly one caller wins each
//! claim and performs its side effects, everyone else no-ops. Guards
//! always include the round number (and the prompt index for
//! within-voting claims) so stale triggers from earlier rounds can
//! never fire.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::orchestrator;
use crate::scoring::{self, PlayerState, PromptInput, ResponseInput, VoteInput};
use crate::state::AppState;
use crate::types::*;

fn deadline_in(game: &Game, seconds: i64) -> Option<DateTime<Utc>> {
    if game.timers_disabled {
        None
    } else {
        Some(Utc::now() + Duration::seconds(seconds))
    }
}

/// Host action: LOBBY → WRITING. Creates round 1 with prompts and
/// assignments, sets the writing deadline, and fires the AI wave.
pub async fn start_game(state: &Arc<AppState>, game: &Game, caller: &PlayerId) -> ApiResult<()> {
    state.require_host(game, caller)?;
    if game.status != GameStatus::Lobby {
        return Err(ApiError::PhaseMismatch(
            "the game has already started".to_string(),
        ));
    }
    let contestants = state.active_contestants(&game.id).await;
    if contestants.len() < MIN_PLAYERS {
        return Err(ApiError::Validation(format!(
            "need at least {} contestants to start",
            MIN_PLAYERS
        )));
    }
    begin_writing(state, &game.id, GameStatus::Lobby, 1).await?;
    Ok(())
}

/// Claim `expect_status` → WRITING for `round_number`, create the round
/// rows, and fire AI joke generation. Shared by start and next.
async fn begin_writing(
    state: &Arc<AppState>,
    game_id: &GameId,
    expect_status: GameStatus,
    round_number: u32,
) -> ApiResult<bool> {
    let writing_seconds = state.config.writing_seconds;
    let won = state
        .update_game_where(
            game_id,
            |g| g.status == expect_status && g.current_round == round_number - 1,
            |g| {
                g.status = GameStatus::Writing;
                g.current_round = round_number;
                g.voting_prompt_index = 0;
                g.voting_revealing = false;
                g.phase_deadline = deadline_in(g, writing_seconds);
            },
        )
        .await?;
    if !won {
        return Ok(false);
    }

    let game = state
        .get_game(game_id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
    let contestants = state.active_contestants(game_id).await;
    // The unique (gameId, roundNumber) index makes a racing loser a
    // no-op; either way the round exists once we get here.
    state
        .create_round_with_prompts(&game, round_number, &contestants)
        .await?;
    tracing::info!(game = %game.room_code, round_number, "writing phase open");

    orchestrator::spawn_response_generation(state, game_id);
    Ok(true)
}

/// WRITING → VOTING, triggered by a complete quorum, the deadline, or a
/// host force-advance. The claim winner fills forfeits, and either
/// fires AI voting or — when nothing is votable — scores straight
/// through to ROUND_RESULTS.
pub async fn try_close_writing(
    state: &Arc<AppState>,
    game_id: &GameId,
    round_number: u32,
) -> ApiResult<bool> {
    let voting_seconds = state.config.voting_seconds;
    let won = state
        .update_game_where(
            game_id,
            |g| g.status == GameStatus::Writing && g.current_round == round_number,
            |g| {
                g.status = GameStatus::Voting;
                g.voting_prompt_index = 0;
                g.voting_revealing = false;
                g.phase_deadline = deadline_in(g, voting_seconds);
            },
        )
        .await?;
    if !won {
        return Ok(false);
    }

    let game = state
        .get_game(game_id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
    let round = state
        .current_round(&game)
        .await
        .ok_or_else(|| ApiError::NotFound("round".to_string()))?;
    state.fill_forfeit_responses(&game, &round.id).await?;

    let votable = state.votable_prompts(&round.id).await;
    if votable.is_empty() {
        // Every matchup forfeited; nothing to vote on.
        tracing::info!(game = %game.room_code, "no votable prompts, scoring immediately");
        try_finish_voting(state, game_id, round_number).await?;
    } else {
        tracing::info!(game = %game.room_code, votable = votable.len(), "voting phase open");
        orchestrator::spawn_vote_generation(state, game_id);
    }
    Ok(true)
}

/// VOTING (not revealing) → revealing, for one prompt index. The claim
/// winner writes abstentions for everyone who stayed silent.
pub async fn try_reveal_current_prompt(
    state: &Arc<AppState>,
    game_id: &GameId,
    round_number: u32,
    index: usize,
) -> ApiResult<bool> {
    let reveal_seconds = state.config.reveal_seconds;
    let won = state
        .update_game_where(
            game_id,
            |g| {
                g.status == GameStatus::Voting
                    && !g.voting_revealing
                    && g.current_round == round_number
                    && g.voting_prompt_index == index
            },
            |g| {
                g.voting_revealing = true;
                g.phase_deadline = deadline_in(g, reveal_seconds);
            },
        )
        .await?;
    if !won {
        return Ok(false);
    }

    let game = state
        .get_game(game_id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
    if let Some(round) = state.current_round(&game).await {
        if let Some(prompt) = state.votable_prompts(&round.id).await.get(index) {
            state.fill_abstentions(&game, &prompt.id).await?;
        }
    }
    tracing::debug!(game = %game.room_code, index, "revealing matchup");
    Ok(true)
}

/// VOTING (revealing) → next prompt, or ROUND_RESULTS after the last
/// one. Fired by the reveal deadline or a host force-advance.
pub async fn try_advance_after_reveal(
    state: &Arc<AppState>,
    game_id: &GameId,
    round_number: u32,
    index: usize,
) -> ApiResult<bool> {
    let game = state
        .get_game(game_id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
    let Some(round) = state.current_round(&game).await else {
        return Ok(false);
    };
    let votable_count = state.votable_prompts(&round.id).await.len();

    if index + 1 < votable_count {
        let voting_seconds = state.config.voting_seconds;
        let won = state
            .update_game_where(
                game_id,
                |g| {
                    g.status == GameStatus::Voting
                        && g.voting_revealing
                        && g.current_round == round_number
                        && g.voting_prompt_index == index
                },
                |g| {
                    g.voting_prompt_index = index + 1;
                    g.voting_revealing = false;
                    g.phase_deadline = deadline_in(g, voting_seconds);
                },
            )
            .await?;
        if won {
            // AI votes may already satisfy the new prompt's quorum.
            recheck_quorum(state, game_id).await?;
        }
        Ok(won)
    } else {
        try_finish_voting(state, game_id, round_number).await
    }
}

/// Claim VOTING → ROUND_RESULTS and, as the winner, run the scoring
/// kernel over the round and commit its deltas.
async fn try_finish_voting(
    state: &Arc<AppState>,
    game_id: &GameId,
    round_number: u32,
) -> ApiResult<bool> {
    let won = state
        .update_game_where(
            game_id,
            |g| g.status == GameStatus::Voting && g.current_round == round_number,
            |g| {
                g.status = GameStatus::RoundResults;
                g.phase_deadline = None;
            },
        )
        .await?;
    if !won {
        return Ok(false);
    }

    let game = state
        .get_game(game_id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
    let round = state
        .round_by_number(game_id, round_number)
        .await
        .ok_or_else(|| ApiError::NotFound("round".to_string()))?;
    commit_round_scores(state, &game, &round).await?;
    Ok(true)
}

/// Host action from ROUND_RESULTS (next round / podium) and the force
/// lever for every other active phase. Losing a race is not an error:
/// concurrent calls observe "nothing happened".
pub async fn host_next(state: &Arc<AppState>, game: &Game, caller: &PlayerId) -> ApiResult<()> {
    state.require_host(game, caller)?;
    match game.status {
        GameStatus::Lobby => Err(ApiError::PhaseMismatch(
            "the game has not started yet".to_string(),
        )),
        GameStatus::Writing => {
            try_close_writing(state, &game.id, game.current_round).await?;
            Ok(())
        }
        GameStatus::Voting => {
            if game.voting_revealing {
                try_advance_after_reveal(
                    state,
                    &game.id,
                    game.current_round,
                    game.voting_prompt_index,
                )
                .await?;
            } else {
                try_reveal_current_prompt(
                    state,
                    &game.id,
                    game.current_round,
                    game.voting_prompt_index,
                )
                .await?;
            }
            Ok(())
        }
        GameStatus::RoundResults => {
            let enough_left =
                state.active_contestants(&game.id).await.len() >= MIN_PLAYERS;
            if game.current_round < game.total_rounds && enough_left {
                begin_writing(
                    state,
                    &game.id,
                    GameStatus::RoundResults,
                    game.current_round + 1,
                )
                .await?;
            } else {
                state
                    .update_game_where(
                        &game.id,
                        |g| g.status == GameStatus::RoundResults,
                        |g| {
                            g.status = GameStatus::FinalResults;
                            g.phase_deadline = None;
                        },
                    )
                    .await?;
            }
            Ok(())
        }
        GameStatus::FinalResults => Err(ApiError::PhaseMismatch(
            "the game is already over".to_string(),
        )),
    }
}

/// Host action: jump to FINAL_RESULTS from any active phase with
/// pro-rated scoring. Unanswered prompts become forfeits, missing votes
/// become abstentions, and every round not yet scored gets scored.
pub async fn host_end(state: &Arc<AppState>, game: &Game, caller: &PlayerId) -> ApiResult<()> {
    state.require_host(game, caller)?;
    let won = state
        .update_game_where(
            &game.id,
            |g| g.status.is_active(),
            |g| {
                g.status = GameStatus::FinalResults;
                g.phase_deadline = None;
            },
        )
        .await?;
    if !won {
        // Already over; ending twice is not an error.
        return Ok(());
    }

    let game = state
        .get_game(&game.id)
        .await
        .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
    for round in state.rounds_of_game(&game.id).await {
        state.fill_forfeit_responses(&game, &round.id).await?;
        for prompt in state.votable_prompts(&round.id).await {
            state.fill_abstentions(&game, &prompt.id).await?;
        }
        commit_round_scores(state, &game, &round).await?;
    }
    tracing::info!(game = %game.room_code, "game ended by host");
    Ok(())
}

/// Run the pure kernel over one round and persist its outputs: score
/// increments, overwritten ratings/streaks, per-response points, prompt
/// winners, and the `scoredAt` latch. Idempotent: a round already
/// latched is skipped entirely.
async fn commit_round_scores(state: &AppState, game: &Game, round: &Round) -> ApiResult<()> {
    // Latch first so only one caller ever applies deltas.
    let claimed = {
        let mut rounds = state.rounds.write().await;
        match rounds.get_mut(&round.id) {
            Some(r) if r.scored_at.is_none() => {
                r.scored_at = Some(Utc::now());
                true
            }
            Some(_) => false,
            None => return Err(ApiError::NotFound("round".to_string())),
        }
    };
    if !claimed {
        return Ok(());
    }

    let contestants: Vec<Player> = state
        .players_of_game(&game.id)
        .await
        .into_iter()
        .filter(|p| p.kind != PlayerKind::Spectator)
        .collect();
    let active_ids: Vec<PlayerId> = contestants
        .iter()
        .filter(|p| p.is_active_contestant())
        .map(|p| p.id.clone())
        .collect();
    let kind_of: BTreeMap<PlayerId, PlayerKind> = contestants
        .iter()
        .map(|p| (p.id.clone(), p.kind))
        .collect();

    let mut inputs = Vec::new();
    for prompt in state.prompts_of_round(&round.id).await {
        let responses = state.responses_of_prompt(&prompt.id).await;
        let votes = state.votes_of_prompt(&prompt.id).await;
        let eligible = active_ids
            .iter()
            .filter(|id| !responses.iter().any(|r| r.player_id == **id))
            .count();
        inputs.push(PromptInput {
            prompt_id: prompt.id.clone(),
            responses: responses
                .iter()
                .map(|r| ResponseInput {
                    id: r.id.clone(),
                    player_id: r.player_id.clone(),
                    player_kind: kind_of.get(&r.player_id).copied().unwrap_or(PlayerKind::Human),
                    text: r.text.clone(),
                })
                .collect(),
            votes: votes
                .iter()
                .map(|v| VoteInput {
                    voter_id: v.voter_id.clone(),
                    response_id: v.response_id.clone(),
                    fail_reason: v.fail_reason,
                })
                .collect(),
            eligible_voters: eligible,
        });
    }

    let players_state: BTreeMap<PlayerId, PlayerState> = contestants
        .iter()
        .map(|p| {
            (
                p.id.clone(),
                PlayerState {
                    score: p.score,
                    humor_rating: p.humor_rating,
                    win_streak: p.win_streak,
                },
            )
        })
        .collect();

    let outcome = scoring::score_round(&inputs, &players_state, round.round_number);

    // Score moves by increment; rating and streak are overwrites.
    for (player_id, delta) in &outcome.player_deltas {
        if *delta != 0 {
            state.add_player_score(player_id, *delta).await;
        }
    }
    // A contestant with no real answer all round sat this one out.
    let engaged: std::collections::HashSet<&PlayerId> = inputs
        .iter()
        .flat_map(|p| p.responses.iter())
        .filter(|r| r.text != FORFEIT_MARKER)
        .map(|r| &r.player_id)
        .collect();
    {
        let mut players = state.players.write().await;
        for (player_id, updated) in &outcome.updated {
            if let Some(p) = players.get_mut(player_id) {
                p.humor_rating = updated.humor_rating;
                p.win_streak = updated.win_streak;
                if engaged.contains(player_id) {
                    p.idle_rounds = 0;
                } else {
                    p.idle_rounds += 1;
                }
            }
        }
    }
    {
        let mut responses = state.responses.write().await;
        for prompt_score in &outcome.prompts {
            for (response_id, points) in &prompt_score.response_points {
                if let Some(r) = responses.get_mut(response_id) {
                    r.points_earned = Some(*points);
                }
            }
        }
    }
    {
        let mut prompts = state.prompts.write().await;
        for prompt_score in &outcome.prompts {
            if let Some(p) = prompts.get_mut(&prompt_score.prompt_id) {
                p.winner_response_id = prompt_score.winner_response_id.clone();
            }
        }
    }
    for prompt_score in &outcome.prompts {
        if prompt_score.ai_beat_human {
            tracing::info!(game = %game.room_code, prompt = %prompt_score.prompt_id, "an AI out-joked a human");
        }
    }

    // Final bump signals clients that scores landed.
    state.bump_game_version(&game.id).await?;
    tracing::info!(
        game = %game.room_code,
        round = round.round_number,
        top = outcome.top_scorer.as_deref().unwrap_or("-"),
        "round scored"
    );
    Ok(())
}

/// Re-run the quorum check for the current phase and attempt the
/// matching claim. Called after responses, votes, and disconnects.
pub async fn recheck_quorum(state: &Arc<AppState>, game_id: &GameId) -> ApiResult<()> {
    let Some(game) = state.get_game(game_id).await else {
        return Ok(());
    };
    match game.status {
        GameStatus::Writing => {
            if state.writing_complete(&game).await {
                try_close_writing(state, game_id, game.current_round).await?;
            }
        }
        GameStatus::Voting if !game.voting_revealing => {
            if state.current_prompt_voting_complete(&game).await {
                try_reveal_current_prompt(
                    state,
                    game_id,
                    game.current_round,
                    game.voting_prompt_index,
                )
                .await?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Enforce an expired phase deadline. No-op for phases without timers.
pub async fn handle_deadline(state: &Arc<AppState>, game: &Game) -> ApiResult<()> {
    let Some(deadline) = game.phase_deadline else {
        return Ok(());
    };
    if Utc::now() < deadline {
        return Ok(());
    }
    match game.status {
        GameStatus::Writing => {
            try_close_writing(state, &game.id, game.current_round).await?;
        }
        GameStatus::Voting if !game.voting_revealing => {
            try_reveal_current_prompt(state, &game.id, game.current_round, game.voting_prompt_index)
                .await?;
        }
        GameStatus::Voting => {
            try_advance_after_reveal(
                state,
                &game.id,
                game.current_round,
                game.voting_prompt_index,
            )
            .await?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state;

    async fn lobby_game(state: &Arc<AppState>, humans: usize) -> (Game, Vec<Player>) {
        let (game, _host) = state
            .create_game("Host".to_string(), 2, true)
            .await
            .unwrap();
        for i in 1..humans {
            state
                .join_game(&game.id, format!("P{}", i), PlayerKind::Human, None)
                .await
                .unwrap();
        }
        let players = state.players_of_game(&game.id).await;
        (state.get_game(&game.id).await.unwrap(), players)
    }

    async fn answer_everything(state: &Arc<AppState>, game_id: &GameId) {
        let game = state.get_game(game_id).await.unwrap();
        let round = state.current_round(&game).await.unwrap();
        for player in state.players_of_game(game_id).await {
            for prompt_id in state.assigned_prompt_ids(&round.id, &player.id).await {
                state
                    .submit_response(&game, &player.id, &prompt_id, &format!("{} says ha", player.name))
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_start_requires_host_and_min_players() {
        let state = state();
        let (game, players) = lobby_game(&state, 1).await;

        let err = start_game(&state, &game, &players[0].id).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let p2 = state
            .join_game(&game.id, "P2".to_string(), PlayerKind::Human, None)
            .await
            .unwrap();
        let game = state.get_game(&game.id).await.unwrap();

        let err = start_game(&state, &game, &p2.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        start_game(&state, &game, &game.host_player_id.clone()).await.unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::Writing);
        assert_eq!(game.current_round, 1);
        // Timers disabled: no deadline.
        assert!(game.phase_deadline.is_none());
        assert!(state.round_by_number(&game.id, 1).await.is_some());
    }

    #[tokio::test]
    async fn test_close_writing_claim_is_exactly_once() {
        let state = state();
        let (game, _) = lobby_game(&state, 3).await;
        start_game(&state, &game, &game.host_player_id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let state = state.clone();
            let game_id = game.id.clone();
            handles.push(tokio::spawn(async move {
                try_close_writing(&state, &game_id, 1).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(
            state.get_game(&game.id).await.unwrap().status,
            GameStatus::Voting
        );
    }

    #[tokio::test]
    async fn test_deadline_close_fills_forfeits() {
        let state = state();
        let (game, _) = lobby_game(&state, 3).await;
        start_game(&state, &game, &game.host_player_id).await.unwrap();

        // Nobody answered; closing converts every assignment to forfeit.
        try_close_writing(&state, &game.id, 1).await.unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        let round = state.current_round(&game).await.unwrap();
        for prompt in state.prompts_of_round(&round.id).await {
            let responses = state.responses_of_prompt(&prompt.id).await;
            assert_eq!(responses.len(), 2);
            assert!(responses.iter().all(|r| r.is_forfeit()));
        }
        // All matchups forfeited: straight to scored ROUND_RESULTS.
        assert_eq!(game.status, GameStatus::RoundResults);
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        assert!(round.scored_at.is_some());
    }

    #[tokio::test]
    async fn test_full_round_walkthrough() {
        let state = state();
        let (game, players) = lobby_game(&state, 3).await;
        start_game(&state, &game, &game.host_player_id).await.unwrap();
        answer_everything(&state, &game.id).await;

        // Quorum satisfied: recheck closes writing.
        recheck_quorum(&state, &game.id).await.unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::Voting);

        let round = state.current_round(&game).await.unwrap();
        let votable = state.votable_prompts(&round.id).await;
        assert_eq!(votable.len(), 3);

        // Walk every prompt: vote, reveal, advance.
        for index in 0..votable.len() {
            let game = state.get_game(&game.id).await.unwrap();
            assert_eq!(game.voting_prompt_index, index);
            let prompt = &votable[index];
            let responses = state.responses_of_prompt(&prompt.id).await;
            let authors: Vec<PlayerId> =
                responses.iter().map(|r| r.player_id.clone()).collect();
            for voter in players.iter().filter(|p| !authors.contains(&p.id)) {
                state
                    .submit_vote(&game, &voter.id, &prompt.id, Some(responses[0].id.clone()))
                    .await
                    .unwrap();
            }
            recheck_quorum(&state, &game.id).await.unwrap();
            let game = state.get_game(&game.id).await.unwrap();
            assert!(game.voting_revealing, "prompt {} should reveal", index);
            try_advance_after_reveal(&state, &game.id, 1, index)
                .await
                .unwrap();
        }

        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::RoundResults);
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        assert!(round.scored_at.is_some());

        // Every response has points written.
        for prompt in state.prompts_of_round(&round.id).await {
            for response in state.responses_of_prompt(&prompt.id).await {
                assert!(response.points_earned.is_some());
            }
        }

        // next -> round 2; next host_end finishes early.
        host_next(&state, &game, &game.host_player_id).await.unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::Writing);
        assert_eq!(game.current_round, 2);
        assert!(state.round_by_number(&game.id, 2).await.is_some());

        host_end(&state, &game, &game.host_player_id).await.unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::FinalResults);
        let round2 = state.round_by_number(&game.id, 2).await.unwrap();
        assert!(round2.scored_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_next_creates_one_round() {
        let state = state();
        let (game, _) = lobby_game(&state, 3).await;
        start_game(&state, &game, &game.host_player_id).await.unwrap();
        answer_everything(&state, &game.id).await;
        recheck_quorum(&state, &game.id).await.unwrap();

        // Park the game in ROUND_RESULTS by ending voting early.
        let game = state.get_game(&game.id).await.unwrap();
        host_next(&state, &game, &game.host_player_id).await.unwrap(); // reveal 0
        for index in 0..3 {
            try_advance_after_reveal(&state, &game.id, 1, index)
                .await
                .unwrap();
            let g = state.get_game(&game.id).await.unwrap();
            if g.status == GameStatus::Voting && !g.voting_revealing {
                try_reveal_current_prompt(&state, &game.id, 1, g.voting_prompt_index)
                    .await
                    .unwrap();
            }
        }
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::RoundResults);
        let version_before = game.version;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let state = state.clone();
            let game = game.clone();
            handles.push(tokio::spawn(async move {
                host_next(&state, &game, &game.host_player_id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Exactly one Round(2), status WRITING, one transition bump.
        let rounds = state.rounds_of_game(&game.id).await;
        assert_eq!(rounds.iter().filter(|r| r.round_number == 2).count(), 1);
        let after = state.get_game(&game.id).await.unwrap();
        assert_eq!(after.status, GameStatus::Writing);
        assert_eq!(after.version, version_before + 1);
    }

    #[tokio::test]
    async fn test_scoring_commit_is_latched() {
        let state = state();
        let (game, _) = lobby_game(&state, 2).await;
        start_game(&state, &game, &game.host_player_id).await.unwrap();
        answer_everything(&state, &game.id).await;
        recheck_quorum(&state, &game.id).await.unwrap();

        let game = state.get_game(&game.id).await.unwrap();
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        commit_round_scores(&state, &game, &round).await.unwrap();
        let scores_after_first: Vec<i64> = state
            .players_of_game(&game.id)
            .await
            .iter()
            .map(|p| p.score)
            .collect();

        // Second commit is a no-op thanks to the latch.
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        commit_round_scores(&state, &game, &round).await.unwrap();
        let scores_after_second: Vec<i64> = state
            .players_of_game(&game.id)
            .await
            .iter()
            .map(|p| p.score)
            .collect();
        assert_eq!(scores_after_first, scores_after_second);
    }
}
