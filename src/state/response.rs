use chrono::Utc;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::types::*;

impl AppState {
    /// Record a contestant's answer to a prompt they were assigned.
    ///
    /// Duplicate submissions (including a lost race against the forfeit
    /// filler) are treated as "already submitted" and succeed quietly.
    pub async fn submit_response(
        &self,
        game: &Game,
        player_id: &PlayerId,
        prompt_id: &PromptId,
        text: &str,
    ) -> ApiResult<()> {
        if game.status != GameStatus::Writing {
            return Err(ApiError::PhaseMismatch(
                "answers are only accepted during the writing phase".to_string(),
            ));
        }
        let player = self.require_player_in_game(&game.id, player_id).await?;
        if player.kind == PlayerKind::Spectator {
            return Err(ApiError::Forbidden("spectators cannot answer".to_string()));
        }

        let round = self
            .current_round(game)
            .await
            .ok_or_else(|| ApiError::NotFound("round".to_string()))?;
        let assigned = self.assigned_prompt_ids(&round.id, player_id).await;
        if !assigned.contains(prompt_id) {
            return Err(ApiError::Validation(
                "prompt is not assigned to this player".to_string(),
            ));
        }

        let text: String = text.trim().chars().take(MAX_ANSWER_CHARS).collect();
        if text.is_empty() {
            return Err(ApiError::Validation("answer must not be empty".to_string()));
        }
        if text == FORFEIT_MARKER {
            return Err(ApiError::Validation("nice try".to_string()));
        }

        let inserted = self
            .insert_response_unique(Response {
                id: ulid::Ulid::new().to_string(),
                prompt_id: prompt_id.clone(),
                player_id: player_id.clone(),
                text,
                points_earned: None,
                fail_reason: None,
                created_at: Utc::now(),
            })
            .await?;
        if inserted {
            self.bump_game_version(&game.id).await?;
        }
        Ok(())
    }

    /// Write `FORFEIT_MARKER` responses for every contestant assignment
    /// still missing one in this round, so each prompt ends up with a
    /// full response pair. Late model answers lose the unique-insert
    /// race against these, which is the intended outcome.
    pub async fn fill_forfeit_responses(&self, game: &Game, round_id: &RoundId) -> ApiResult<u32> {
        let contestants: Vec<Player> = self
            .players_of_game(&game.id)
            .await
            .into_iter()
            .filter(|p| p.kind != PlayerKind::Spectator)
            .collect();

        let mut filled = 0;
        for player in &contestants {
            for prompt_id in self.assigned_prompt_ids(round_id, &player.id).await {
                let already = self
                    .responses_of_prompt(&prompt_id)
                    .await
                    .iter()
                    .any(|r| r.player_id == player.id);
                if already {
                    continue;
                }
                let inserted = self
                    .insert_response_unique(Response {
                        id: ulid::Ulid::new().to_string(),
                        prompt_id: prompt_id.clone(),
                        player_id: player.id.clone(),
                        text: FORFEIT_MARKER.to_string(),
                        points_earned: None,
                        fail_reason: None,
                        created_at: Utc::now(),
                    })
                    .await?;
                if inserted {
                    filled += 1;
                }
            }
        }
        if filled > 0 {
            tracing::info!(game = %game.room_code, filled, "filled forfeit responses");
        }
        Ok(filled)
    }
}
