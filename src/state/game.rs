use chrono::Utc;
use rand::Rng;

use super::AppState;
use crate::config::model_spec;
use crate::error::{ApiError, ApiResult};
use crate::types::*;

/// Safe character set for room codes (excludes 0/O, 1/I/L to avoid
/// confusion when read aloud)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 4;

/// Games with more seats than this refuse joins.
const MAX_PLAYERS: usize = 12;

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

fn new_player(game_id: &GameId, name: String, kind: PlayerKind, model_id: Option<ModelId>) -> Player {
    Player {
        id: ulid::Ulid::new().to_string(),
        game_id: game_id.clone(),
        name,
        kind,
        model_id,
        score: 0,
        humor_rating: 1.0,
        win_streak: 0,
        idle_rounds: 0,
        participation_status: ParticipationStatus::Active,
        last_seen: Utc::now(),
        rejoin_token: ulid::Ulid::new().to_string(),
    }
}

fn validate_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    Ok(name.chars().take(32).collect())
}

impl AppState {
    /// Create a game in LOBBY with its host already seated.
    pub async fn create_game(
        &self,
        host_name: String,
        total_rounds: u32,
        timers_disabled: bool,
    ) -> ApiResult<(Game, Player)> {
        let host_name = validate_name(&host_name)?;
        if total_rounds == 0 || total_rounds > 10 {
            return Err(ApiError::Validation(
                "totalRounds must be between 1 and 10".to_string(),
            ));
        }

        // Collision loop; the code space is small but live games are few.
        let room_code = {
            let games = self.games.read().await;
            loop {
                let code = generate_room_code();
                if !games
                    .values()
                    .any(|g| g.room_code == code && g.status.is_active())
                {
                    break code;
                }
            }
        };

        let now = Utc::now();
        let game_id: GameId = ulid::Ulid::new().to_string();
        let host = new_player(&game_id, host_name, PlayerKind::Human, None);
        let game = Game {
            id: game_id,
            room_code,
            status: GameStatus::Lobby,
            current_round: 0,
            total_rounds,
            host_player_id: host.id.clone(),
            phase_deadline: None,
            timers_disabled,
            voting_prompt_index: 0,
            voting_revealing: false,
            version: 1,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            next_game_code: None,
            created_at: now,
            updated_at: now,
        };

        self.games.write().await.insert(game.id.clone(), game.clone());
        self.players
            .write()
            .await
            .insert(host.id.clone(), host.clone());

        tracing::info!(code = %game.room_code, "game created");
        Ok((game, host))
    }

    /// Point a finished (or abandoned) game at its rematch so its
    /// clients can follow the host into the new room.
    pub async fn link_rematch(&self, old_code: &str, new_code: &str) -> ApiResult<()> {
        let old = self.require_game_by_code(old_code).await?;
        let new_code = new_code.to_string();
        self.update_game_where(&old.id, |_| true, |g| {
            g.next_game_code = Some(new_code);
        })
        .await?;
        Ok(())
    }

    /// Add a player. Contestants can only join in the lobby; spectators
    /// may drop in at any time.
    pub async fn join_game(
        &self,
        game_id: &GameId,
        name: String,
        kind: PlayerKind,
        model_id: Option<ModelId>,
    ) -> ApiResult<Player> {
        let name = validate_name(&name)?;
        let game = self
            .get_game(game_id)
            .await
            .ok_or_else(|| ApiError::NotFound("game".to_string()))?;

        if kind != PlayerKind::Spectator && game.status != GameStatus::Lobby {
            return Err(ApiError::PhaseMismatch(
                "contestants can only join while the game is in the lobby".to_string(),
            ));
        }
        match kind {
            PlayerKind::Ai => {
                let model_id = model_id
                    .as_deref()
                    .ok_or_else(|| ApiError::Validation("AI players need a modelId".to_string()))?;
                if model_spec(model_id).is_none() {
                    return Err(ApiError::Validation(format!(
                        "unknown model: {}",
                        model_id
                    )));
                }
            }
            _ => {
                if model_id.is_some() {
                    return Err(ApiError::Validation(
                        "only AI players carry a modelId".to_string(),
                    ));
                }
            }
        }

        {
            let players = self.players.read().await;
            let seated = players.values().filter(|p| p.game_id == *game_id).count();
            if seated >= MAX_PLAYERS {
                return Err(ApiError::Validation("game is full".to_string()));
            }
            if players
                .values()
                .any(|p| p.game_id == *game_id && p.name.eq_ignore_ascii_case(&name))
            {
                return Err(ApiError::Validation("name already taken".to_string()));
            }
        }

        let player = new_player(game_id, name, kind, model_id);
        self.players
            .write()
            .await
            .insert(player.id.clone(), player.clone());
        self.bump_game_version(game_id).await?;

        tracing::info!(game = %game.room_code, player = %player.name, ?kind, "player joined");
        Ok(player)
    }

    /// Swap a rejoin token for the original player slot. The playerId is
    /// preserved (id continuity); the token rotates on every use.
    pub async fn rejoin_game(&self, game_id: &GameId, rejoin_token: &str) -> ApiResult<Player> {
        let updated = {
            let mut players = self.players.write().await;
            let player = players
                .values_mut()
                .find(|p| p.game_id == *game_id && p.rejoin_token == rejoin_token)
                .ok_or(ApiError::Unauthorized)?;
            player.participation_status = ParticipationStatus::Active;
            player.last_seen = Utc::now();
            player.rejoin_token = ulid::Ulid::new().to_string();
            player.clone()
        };
        self.bump_game_version(game_id).await?;
        tracing::info!(player = %updated.name, "player rejoined");
        Ok(updated)
    }

    /// Host-gated actions call this first.
    pub fn require_host(&self, game: &Game, player_id: &PlayerId) -> ApiResult<()> {
        if game.host_player_id == *player_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "only the host can do that".to_string(),
            ))
        }
    }

    /// All players of a game in stable (join) order.
    pub async fn players_of_game(&self, game_id: &GameId) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .players
            .read()
            .await
            .values()
            .filter(|p| p.game_id == *game_id)
            .cloned()
            .collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }
}
