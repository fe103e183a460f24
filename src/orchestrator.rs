//! Background AI orchestration: joke generation and voting waves for
//! the current round. Model calls for one game fan out concurrently;
//! results are persisted as they land (unique-constraint losses are
//! fine), token usage is committed once per wave, and every wave ends
//! with a quorum re-check so the phase machine can advance.
//!
//! The per-process inflight maps are an optimization only: they stop a
//! polling burst from launching the same wave twice in this process.
//! Correctness comes from the store's unique constraints.

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::config::token_cost_usd;
use crate::llm::{JokeHistoryEntry, TokenUsage, VoteCandidate, VoteContext};
use crate::phase;
use crate::state::AppState;
use crate::types::*;

type SharedTask = Shared<BoxFuture<'static, ()>>;

/// gameId → running wave. A second caller awaits the existing task.
#[derive(Default)]
pub struct InflightMap {
    inner: Mutex<HashMap<GameId, SharedTask>>,
}

impl InflightMap {
    /// Return the running task for `key`, or install the one built by
    /// `make`. The bool is true when this call started the work.
    fn join_or_start<F>(&self, key: &GameId, make: F) -> (SharedTask, bool)
    where
        F: FnOnce() -> BoxFuture<'static, ()>,
    {
        let mut inner = self.inner.lock().expect("inflight map poisoned");
        if let Some(existing) = inner.get(key) {
            (existing.clone(), false)
        } else {
            let task = make().shared();
            inner.insert(key.clone(), task.clone());
            (task, true)
        }
    }

    fn remove(&self, key: &GameId) {
        self.inner.lock().expect("inflight map poisoned").remove(key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Fire-and-forget joke generation for a game's current round.
pub fn spawn_response_generation(state: &Arc<AppState>, game_id: &GameId) {
    let state = state.clone();
    let game_id = game_id.clone();
    tokio::spawn(async move {
        generate_responses_for_current_round(&state, &game_id).await;
    });
}

/// Fire-and-forget AI voting for a game's current round.
pub fn spawn_vote_generation(state: &Arc<AppState>, game_id: &GameId) {
    let state = state.clone();
    let game_id = game_id.clone();
    tokio::spawn(async move {
        generate_votes_for_current_round(&state, &game_id).await;
    });
}

/// Run (or join) the joke wave for this game.
pub async fn generate_responses_for_current_round(state: &Arc<AppState>, game_id: &GameId) {
    let weak = Arc::downgrade(state);
    let (task, _started) = state.inflight_responses.join_or_start(game_id, || {
        let state = state.clone();
        let game_id = game_id.clone();
        async move {
            responses_wave(&state, &game_id).await;
            cleanup(&weak, &game_id, Wave::Responses);
        }
        .boxed()
    });
    task.await;
}

/// Run (or join) the vote wave for this game.
pub async fn generate_votes_for_current_round(state: &Arc<AppState>, game_id: &GameId) {
    let weak = Arc::downgrade(state);
    let (task, _started) = state.inflight_votes.join_or_start(game_id, || {
        let state = state.clone();
        let game_id = game_id.clone();
        async move {
            votes_wave(&state, &game_id).await;
            cleanup(&weak, &game_id, Wave::Votes);
        }
        .boxed()
    });
    task.await;
}

enum Wave {
    Responses,
    Votes,
}

fn cleanup(state: &Weak<AppState>, game_id: &GameId, wave: Wave) {
    if let Some(state) = state.upgrade() {
        match wave {
            Wave::Responses => state.inflight_responses.remove(game_id),
            Wave::Votes => state.inflight_votes.remove(game_id),
        }
    }
}

/// Prior rounds from one contestant's perspective, oldest first.
async fn joke_history(
    state: &AppState,
    game: &Game,
    player_id: &PlayerId,
    current_round: u32,
) -> Vec<JokeHistoryEntry> {
    let mut entries = Vec::new();
    for round in state.rounds_of_game(&game.id).await {
        if round.round_number >= current_round {
            continue;
        }
        for prompt in state.prompts_of_round(&round.id).await {
            let responses = state.responses_of_prompt(&prompt.id).await;
            let Some(own) = responses.iter().find(|r| r.player_id == *player_id) else {
                continue;
            };
            if own.is_forfeit() {
                continue;
            }
            let won = prompt.winner_response_id.as_ref() == Some(&own.id);
            let winning_text = if won {
                None
            } else {
                prompt
                    .winner_response_id
                    .as_ref()
                    .and_then(|id| responses.iter().find(|r| r.id == *id))
                    .map(|r| r.text.clone())
            };
            entries.push(JokeHistoryEntry {
                round_number: round.round_number,
                prompt_text: prompt.text.clone(),
                own_text: own.text.clone(),
                won,
                winning_text,
            });
        }
    }
    entries
}

async fn responses_wave(state: &Arc<AppState>, game_id: &GameId) {
    let Some(game) = state.get_game(game_id).await else {
        return;
    };
    if game.status != GameStatus::Writing {
        return;
    }
    let Some(round) = state.current_round(&game).await else {
        return;
    };

    let ai_players: Vec<Player> = state
        .active_contestants(game_id)
        .await
        .into_iter()
        .filter(|p| p.kind == PlayerKind::Ai)
        .collect();

    // (prompt, player, model, history) for every missing AI answer.
    let mut jobs = Vec::new();
    for player in &ai_players {
        let Some(model_id) = player.model_id.clone() else {
            continue;
        };
        let history = joke_history(state, &game, &player.id, round.round_number).await;
        for prompt_id in state.assigned_prompt_ids(&round.id, &player.id).await {
            let already = state
                .responses_of_prompt(&prompt_id)
                .await
                .iter()
                .any(|r| r.player_id == player.id);
            if already {
                continue;
            }
            let prompt_text = state
                .prompts
                .read()
                .await
                .get(&prompt_id)
                .map(|p| p.text.clone());
            let Some(prompt_text) = prompt_text else {
                continue;
            };
            jobs.push((prompt_id, player.id.clone(), model_id.clone(), prompt_text, history.clone()));
        }
    }
    if jobs.is_empty() {
        // Still re-check: maybe this wave raced a human's last answer.
        let _ = phase::recheck_quorum(state, game_id).await;
        return;
    }
    tracing::info!(game = %game.room_code, jobs = jobs.len(), "AI joke wave starting");

    let mut wave: FuturesUnordered<_> = jobs
        .into_iter()
        .map(|(prompt_id, player_id, model_id, prompt_text, history)| {
            let model = state.model.clone();
            async move {
                let outcome = model.generate_joke(&model_id, &prompt_text, &history).await;
                (prompt_id, player_id, model_id, outcome)
            }
        })
        .collect();

    let mut usage_by_model: HashMap<ModelId, TokenUsage> = HashMap::new();
    let mut inserted_any = false;
    while let Some((prompt_id, player_id, model_id, outcome)) = wave.next().await {
        usage_by_model
            .entry(model_id)
            .or_default()
            .add(outcome.usage);
        let response = Response {
            id: ulid::Ulid::new().to_string(),
            prompt_id,
            player_id,
            text: outcome.text,
            points_earned: None,
            fail_reason: outcome.fail_reason,
            created_at: chrono::Utc::now(),
        };
        match state.insert_response_unique(response).await {
            Ok(true) => inserted_any = true,
            Ok(false) => {} // lost to a forfeit fill or a retry; fine
            Err(e) => tracing::error!("persisting AI response failed: {}", e),
        }
    }

    // Single post-wave usage commit (bumps the version as a side effect).
    let mut committed_usage = false;
    for (model_id, usage) in usage_by_model {
        if usage.input_tokens == 0 && usage.output_tokens == 0 {
            continue;
        }
        let cost = token_cost_usd(&model_id, usage.input_tokens, usage.output_tokens);
        if let Err(e) = state.record_model_usage(game_id, &model_id, usage, cost).await {
            tracing::error!("recording model usage failed: {}", e);
        } else {
            committed_usage = true;
        }
    }
    if inserted_any && !committed_usage {
        let _ = state.bump_game_version(game_id).await;
    }

    if let Err(e) = phase::recheck_quorum(state, game_id).await {
        tracing::error!("quorum re-check after joke wave failed: {}", e);
    }
}

async fn votes_wave(state: &Arc<AppState>, game_id: &GameId) {
    let Some(game) = state.get_game(game_id).await else {
        return;
    };
    if game.status != GameStatus::Voting {
        return;
    }
    let Some(round) = state.current_round(&game).await else {
        return;
    };
    let votable = state.votable_prompts(&round.id).await;

    let ai_players: Vec<Player> = state
        .active_contestants(game_id)
        .await
        .into_iter()
        .filter(|p| p.kind == PlayerKind::Ai)
        .collect();

    // All votable prompts at once, future ones included; the snapshot
    // layer keeps those hidden until their turn.
    let mut jobs = Vec::new();
    for prompt in &votable {
        let responses = state.responses_of_prompt(&prompt.id).await;
        let candidates: Vec<VoteCandidate> = responses
            .iter()
            .filter(|r| !r.is_forfeit())
            .map(|r| VoteCandidate {
                response_id: r.id.clone(),
                text: r.text.clone(),
            })
            .collect();
        let existing = state.votes_of_prompt(&prompt.id).await;
        for player in &ai_players {
            let Some(model_id) = player.model_id.clone() else {
                continue;
            };
            let authored = responses.iter().any(|r| r.player_id == player.id);
            let voted = existing.iter().any(|v| v.voter_id == player.id);
            if authored || voted {
                continue;
            }
            jobs.push((
                prompt.id.clone(),
                prompt.text.clone(),
                player.id.clone(),
                model_id,
                candidates.clone(),
            ));
        }
    }
    if jobs.is_empty() {
        let _ = phase::recheck_quorum(state, game_id).await;
        return;
    }
    tracing::info!(game = %game.room_code, jobs = jobs.len(), "AI vote wave starting");

    let round_number = round.round_number;
    let mut wave: FuturesUnordered<_> = jobs
        .into_iter()
        .map(|(prompt_id, prompt_text, voter_id, model_id, candidates)| {
            let model = state.model.clone();
            let ctx = VoteContext {
                game_id: game_id.clone(),
                round_number,
                voter_id: voter_id.clone(),
            };
            async move {
                let outcome = model
                    .ai_vote(&model_id, &prompt_text, &candidates, &ctx)
                    .await;
                (prompt_id, voter_id, model_id, outcome)
            }
        })
        .collect();

    let mut usage_by_model: HashMap<ModelId, TokenUsage> = HashMap::new();
    let mut inserted_any = false;
    while let Some((prompt_id, voter_id, model_id, outcome)) = wave.next().await {
        usage_by_model
            .entry(model_id)
            .or_default()
            .add(outcome.usage);
        if outcome.chosen_response_id.is_none() && outcome.fail_reason.is_none() {
            // Nothing to vote on for this prompt.
            continue;
        }
        let vote = Vote {
            id: ulid::Ulid::new().to_string(),
            prompt_id: prompt_id.clone(),
            voter_id,
            response_id: outcome.chosen_response_id,
            fail_reason: outcome.fail_reason,
            created_at: chrono::Utc::now(),
        };
        match state.insert_vote_unique(vote).await {
            Ok(true) => {
                inserted_any = true;
                // Live progress only for the matchup everyone is watching;
                // future prompts stay silent until their turn.
                if let Some(current) = state.get_game(game_id).await {
                    let visible = votable
                        .get(current.voting_prompt_index)
                        .map(|p| p.id == prompt_id)
                        .unwrap_or(false);
                    if visible {
                        let _ = state.bump_game_version(game_id).await;
                    }
                }
            }
            Ok(false) => {} // lost to an abstention fill or a human race
            Err(e) => tracing::error!("persisting AI vote failed: {}", e),
        }
    }

    for (model_id, usage) in usage_by_model {
        if usage.input_tokens == 0 && usage.output_tokens == 0 {
            continue;
        }
        let cost = token_cost_usd(&model_id, usage.input_tokens, usage.output_tokens);
        if let Err(e) = state.record_model_usage(game_id, &model_id, usage, cost).await {
            tracing::error!("recording model usage failed: {}", e);
        }
    }
    if inserted_any {
        let _ = state.bump_game_version(game_id).await;
    }

    if let Err(e) = phase::recheck_quorum(state, game_id).await {
        tracing::error!("quorum re-check after vote wave failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::{JokeOutcome, ModelClient, VoteOutcome};
    use crate::phase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted model: fixed joke text, always-failing votes, and a
    /// call counter to observe dedup.
    struct ScriptedModel {
        joke_calls: AtomicUsize,
        vote_calls: AtomicUsize,
        fail_votes: bool,
    }

    impl ScriptedModel {
        fn new(fail_votes: bool) -> Self {
            Self {
                joke_calls: AtomicUsize::new(0),
                vote_calls: AtomicUsize::new(0),
                fail_votes,
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate_joke(
            &self,
            _model_id: &str,
            prompt_text: &str,
            _history: &[JokeHistoryEntry],
        ) -> JokeOutcome {
            self.joke_calls.fetch_add(1, Ordering::SeqCst);
            JokeOutcome {
                text: format!("beep boop re: {}", &prompt_text[..8.min(prompt_text.len())]),
                usage: TokenUsage {
                    input_tokens: 50,
                    output_tokens: 10,
                },
                fail_reason: None,
            }
        }

        async fn ai_vote(
            &self,
            _model_id: &str,
            _prompt_text: &str,
            candidates: &[VoteCandidate],
            ctx: &VoteContext,
        ) -> VoteOutcome {
            self.vote_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_votes {
                crate::llm::fallback_vote(
                    candidates,
                    ctx,
                    FailReason::Error,
                    TokenUsage::default(),
                )
            } else {
                VoteOutcome {
                    chosen_response_id: candidates.first().map(|c| c.response_id.clone()),
                    usage: TokenUsage {
                        input_tokens: 30,
                        output_tokens: 1,
                    },
                    fail_reason: None,
                }
            }
        }
    }

    async fn game_with_ai(
        model: Arc<ScriptedModel>,
    ) -> (Arc<AppState>, Game) {
        let state = Arc::new(AppState::new(Config::for_tests(), model));
        let (game, _host) = state
            .create_game("Host".to_string(), 1, true)
            .await
            .unwrap();
        state
            .join_game(&game.id, "P2".to_string(), PlayerKind::Human, None)
            .await
            .unwrap();
        state
            .join_game(
                &game.id,
                "Bot".to_string(),
                PlayerKind::Ai,
                Some("gpt-4o-mini".to_string()),
            )
            .await
            .unwrap();
        let game = state.get_game(&game.id).await.unwrap();
        phase::start_game(&state, &game, &game.host_player_id)
            .await
            .unwrap();
        (state.clone(), state.get_game(&game.id).await.unwrap())
    }

    #[tokio::test]
    async fn test_response_wave_answers_all_ai_assignments() {
        let model = Arc::new(ScriptedModel::new(false));
        let (state, game) = game_with_ai(model.clone()).await;

        generate_responses_for_current_round(&state, &game.id).await;

        // The bot had 2 assigned prompts.
        assert_eq!(model.joke_calls.load(Ordering::SeqCst), 2);
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        let bot = state
            .players_of_game(&game.id)
            .await
            .into_iter()
            .find(|p| p.kind == PlayerKind::Ai)
            .unwrap();
        for prompt_id in state.assigned_prompt_ids(&round.id, &bot.id).await {
            assert!(state
                .responses_of_prompt(&prompt_id)
                .await
                .iter()
                .any(|r| r.player_id == bot.id && !r.is_forfeit()));
        }

        // Usage aggregated: 2 calls x (50 in + 10 out).
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.input_tokens, 100);
        assert_eq!(game.output_tokens, 20);
        let rows = state.usage_rows(&game.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model_id, "gpt-4o-mini");

        // Second wave finds nothing to do and calls no model.
        generate_responses_for_current_round(&state, &game.id).await;
        assert_eq!(model.joke_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inflight_map_joins_not_restarts() {
        let map = InflightMap::default();
        let counter = Arc::new(AtomicUsize::new(0));

        let make = |counter: Arc<AtomicUsize>| {
            move || {
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
                .boxed()
            }
        };

        let key = "g1".to_string();
        let (t1, started1) = map.join_or_start(&key, make(counter.clone()));
        let (t2, started2) = map.join_or_start(&key, make(counter.clone()));
        assert!(started1);
        assert!(!started2);

        futures::future::join(t1, t2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        map.remove(&key);
        assert_eq!(map.len(), 0);
    }

    // A total model outage during voting still produces one
    // deterministic fallback vote per (prompt, AI voter).
    #[tokio::test]
    async fn test_vote_wave_outage_fallback() {
        let model = Arc::new(ScriptedModel::new(true));
        let (state, game) = game_with_ai(model.clone()).await;

        // Humans answer, AI answers, writing closes, voting opens.
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        for player in state.players_of_game(&game.id).await {
            if player.kind == PlayerKind::Ai {
                continue;
            }
            for prompt_id in state.assigned_prompt_ids(&round.id, &player.id).await {
                state
                    .submit_response(&game, &player.id, &prompt_id, "human joke")
                    .await
                    .unwrap();
            }
        }
        generate_responses_for_current_round(&state, &game.id).await;
        let game = state.get_game(&game.id).await.unwrap();
        assert_eq!(game.status, GameStatus::Voting);

        generate_votes_for_current_round(&state, &game.id).await;

        // Every (votable prompt, non-author AI) pair has an error vote.
        let bot = state
            .players_of_game(&game.id)
            .await
            .into_iter()
            .find(|p| p.kind == PlayerKind::Ai)
            .unwrap();
        let votable = state.votable_prompts(&round.id).await;
        let mut bot_votes = Vec::new();
        for prompt in &votable {
            let authored = state
                .responses_of_prompt(&prompt.id)
                .await
                .iter()
                .any(|r| r.player_id == bot.id);
            let votes = state.votes_of_prompt(&prompt.id).await;
            let bot_vote = votes.iter().find(|v| v.voter_id == bot.id).cloned();
            if authored {
                assert!(bot_vote.is_none());
            } else {
                let vote = bot_vote.expect("bot should have a fallback vote");
                assert_eq!(vote.fail_reason, Some(FailReason::Error));
                assert!(vote.response_id.is_some());
                bot_votes.push(vote);
            }
        }
        assert!(!bot_votes.is_empty());
    }
}
