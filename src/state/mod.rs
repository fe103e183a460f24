mod game;
mod leaderboard;
mod quorum;
mod response;
mod round;
mod vote;

pub use leaderboard::{CleanupReport, LeaderboardEntry};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::llm::{ModelClient, TokenUsage};
use crate::orchestrator::InflightMap;
use crate::types::*;

/// Shared application state: the store tables plus per-process scratch.
///
/// The tables mirror a relational store. All engine coordination goes
/// through four contract operations that a SQL backend could also honor:
/// `update_game_where` (row-level conditional update), the unique
/// inserts for Round/Response/Vote, `add_player_score` (increment), and
/// `record_model_usage` (add-on-conflict upsert). Everything else is
/// plain reads and single-row writes.
pub struct AppState {
    pub config: Config,
    pub model: Arc<dyn ModelClient>,
    pub games: RwLock<HashMap<GameId, Game>>,
    pub players: RwLock<HashMap<PlayerId, Player>>,
    pub rounds: RwLock<HashMap<RoundId, Round>>,
    pub prompts: RwLock<HashMap<PromptId, Prompt>>,
    pub assignments: RwLock<Vec<Assignment>>,
    pub responses: RwLock<HashMap<ResponseId, Response>>,
    pub votes: RwLock<HashMap<VoteId, Vote>>,
    pub reactions: RwLock<Vec<Reaction>>,
    pub model_usage: RwLock<HashMap<(GameId, ModelId), GameModelUsage>>,
    /// In-flight AI generation tasks, one per game. Best-effort dedup;
    /// the unique constraints above carry correctness.
    pub inflight_responses: InflightMap,
    pub inflight_votes: InflightMap,
}

impl AppState {
    pub fn new(config: Config, model: Arc<dyn ModelClient>) -> Self {
        Self {
            config,
            model,
            games: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            rounds: RwLock::new(HashMap::new()),
            prompts: RwLock::new(HashMap::new()),
            assignments: RwLock::new(Vec::new()),
            responses: RwLock::new(HashMap::new()),
            votes: RwLock::new(HashMap::new()),
            reactions: RwLock::new(Vec::new()),
            model_usage: RwLock::new(HashMap::new()),
            inflight_responses: InflightMap::default(),
            inflight_votes: InflightMap::default(),
        }
    }

    /// Atomic conditional update on one Game row. Returns `Ok(true)` and
    /// bumps `version`/`updatedAt` when the predicate held; `Ok(false)`
    /// when another caller won the race. Every phase transition and
    /// every externally visible game write goes through here.
    pub async fn update_game_where<P, M>(
        &self,
        game_id: &GameId,
        pred: P,
        mutate: M,
    ) -> ApiResult<bool>
    where
        P: FnOnce(&Game) -> bool,
        M: FnOnce(&mut Game),
    {
        let mut games = self.games.write().await;
        let game = games
            .get_mut(game_id)
            .ok_or_else(|| ApiError::NotFound("game".to_string()))?;
        if !pred(game) {
            return Ok(false);
        }
        mutate(game);
        game.version += 1;
        game.updated_at = Utc::now();
        Ok(true)
    }

    /// Unconditional version bump, for writes the client must observe.
    pub async fn bump_game_version(&self, game_id: &GameId) -> ApiResult<()> {
        self.update_game_where(game_id, |_| true, |_| {}).await?;
        Ok(())
    }

    pub async fn get_game(&self, game_id: &GameId) -> Option<Game> {
        self.games.read().await.get(game_id).cloned()
    }

    pub async fn get_game_by_code(&self, code: &str) -> Option<Game> {
        let code = code.to_ascii_uppercase();
        self.games
            .read()
            .await
            .values()
            .find(|g| g.room_code == code)
            .cloned()
    }

    pub async fn require_game_by_code(&self, code: &str) -> ApiResult<Game> {
        self.get_game_by_code(code)
            .await
            .ok_or_else(|| ApiError::NotFound("game".to_string()))
    }

    pub async fn get_player(&self, player_id: &PlayerId) -> Option<Player> {
        self.players.read().await.get(player_id).cloned()
    }

    /// Player must exist and belong to the game.
    pub async fn require_player_in_game(
        &self,
        game_id: &GameId,
        player_id: &PlayerId,
    ) -> ApiResult<Player> {
        match self.get_player(player_id).await {
            Some(p) if p.game_id == *game_id => Ok(p),
            Some(_) => Err(ApiError::Validation("player is not in this game".to_string())),
            None => Err(ApiError::Validation("unknown player".to_string())),
        }
    }

    /// Insert a Round unless one exists for `(gameId, roundNumber)`.
    /// The false branch is how a racing caller learns it lost.
    pub async fn insert_round_unique(&self, round: Round) -> ApiResult<bool> {
        let mut rounds = self.rounds.write().await;
        let exists = rounds
            .values()
            .any(|r| r.game_id == round.game_id && r.round_number == round.round_number);
        if exists {
            return Ok(false);
        }
        rounds.insert(round.id.clone(), round);
        Ok(true)
    }

    /// Insert a Response unless the player already answered this prompt.
    pub async fn insert_response_unique(&self, response: Response) -> ApiResult<bool> {
        let mut responses = self.responses.write().await;
        let exists = responses
            .values()
            .any(|r| r.prompt_id == response.prompt_id && r.player_id == response.player_id);
        if exists {
            return Ok(false);
        }
        responses.insert(response.id.clone(), response);
        Ok(true)
    }

    /// Insert a Vote unless the voter already voted on this prompt.
    pub async fn insert_vote_unique(&self, vote: Vote) -> ApiResult<bool> {
        let mut votes = self.votes.write().await;
        let exists = votes
            .values()
            .any(|v| v.prompt_id == vote.prompt_id && v.voter_id == vote.voter_id);
        if exists {
            return Ok(false);
        }
        votes.insert(vote.id.clone(), vote);
        Ok(true)
    }

    /// Increment-style score update, safe under concurrent version bumps.
    pub async fn add_player_score(&self, player_id: &PlayerId, delta: i64) {
        let mut players = self.players.write().await;
        if let Some(player) = players.get_mut(player_id) {
            player.score += delta;
        }
    }

    /// Add-on-conflict upsert of per-model usage plus the game's own
    /// aggregate counters (which ride the version bump so clients see
    /// cost tick up).
    pub async fn record_model_usage(
        &self,
        game_id: &GameId,
        model_id: &ModelId,
        usage: TokenUsage,
        cost_usd: f64,
    ) -> ApiResult<()> {
        {
            let mut table = self.model_usage.write().await;
            let row = table
                .entry((game_id.clone(), model_id.clone()))
                .or_insert_with(|| GameModelUsage {
                    game_id: game_id.clone(),
                    model_id: model_id.clone(),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_usd: 0.0,
                });
            row.input_tokens += usage.input_tokens;
            row.output_tokens += usage.output_tokens;
            row.cost_usd += cost_usd;
        }
        self.update_game_where(
            game_id,
            |_| true,
            |g| {
                g.input_tokens += usage.input_tokens;
                g.output_tokens += usage.output_tokens;
                g.cost_usd += cost_usd;
            },
        )
        .await?;
        Ok(())
    }

    pub async fn usage_rows(&self, game_id: &GameId) -> Vec<GameModelUsage> {
        let mut rows: Vec<GameModelUsage> = self
            .model_usage
            .read()
            .await
            .values()
            .filter(|u| u.game_id == *game_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        rows
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::state;

    #[tokio::test]
    async fn test_update_game_where_claims_once() {
        let state = state();
        let (game, _host) = state
            .create_game("Host".to_string(), 3, false)
            .await
            .unwrap();

        let won_first = state
            .update_game_where(&game.id, |g| g.status == GameStatus::Lobby, |g| {
                g.status = GameStatus::Writing;
            })
            .await
            .unwrap();
        let won_second = state
            .update_game_where(&game.id, |g| g.status == GameStatus::Lobby, |g| {
                g.status = GameStatus::Writing;
            })
            .await
            .unwrap();

        assert!(won_first);
        assert!(!won_second);

        let after = state.get_game(&game.id).await.unwrap();
        assert_eq!(after.status, GameStatus::Writing);
        // Only the winning claim bumped the version.
        assert_eq!(after.version, game.version + 1);
    }

    #[tokio::test]
    async fn test_unique_round_insert() {
        let state = state();
        let (game, _host) = state
            .create_game("Host".to_string(), 3, false)
            .await
            .unwrap();

        let round = Round {
            id: ulid::Ulid::new().to_string(),
            game_id: game.id.clone(),
            round_number: 1,
            scored_at: None,
        };
        assert!(state.insert_round_unique(round.clone()).await.unwrap());

        let dup = Round {
            id: ulid::Ulid::new().to_string(),
            ..round
        };
        assert!(!state.insert_round_unique(dup).await.unwrap());
        assert_eq!(state.rounds.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_usage_upsert_accumulates() {
        let state = state();
        let (game, _host) = state
            .create_game("Host".to_string(), 3, false)
            .await
            .unwrap();

        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        };
        state
            .record_model_usage(&game.id, &"gpt-4o-mini".to_string(), usage, 0.001)
            .await
            .unwrap();
        state
            .record_model_usage(&game.id, &"gpt-4o-mini".to_string(), usage, 0.001)
            .await
            .unwrap();

        let rows = state.usage_rows(&game.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].input_tokens, 200);
        assert_eq!(rows[0].output_tokens, 40);

        let after = state.get_game(&game.id).await.unwrap();
        assert_eq!(after.input_tokens, 200);
        assert!((after.cost_usd - 0.002).abs() < 1e-12);
    }
}
