use chrono::Utc;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::types::*;

impl AppState {
    /// Record a human vote on the currently visible prompt. A null
    /// `response_id` is an explicit abstention.
    pub async fn submit_vote(
        &self,
        game: &Game,
        voter_id: &PlayerId,
        prompt_id: &PromptId,
        response_id: Option<ResponseId>,
    ) -> ApiResult<()> {
        if game.status != GameStatus::Voting {
            return Err(ApiError::PhaseMismatch(
                "votes are only accepted during the voting phase".to_string(),
            ));
        }
        if game.voting_revealing {
            return Err(ApiError::PhaseMismatch(
                "this matchup is already being revealed".to_string(),
            ));
        }
        let voter = self.require_player_in_game(&game.id, voter_id).await?;
        if voter.kind == PlayerKind::Spectator {
            return Err(ApiError::Forbidden("spectators cannot vote".to_string()));
        }

        let round = self
            .current_round(game)
            .await
            .ok_or_else(|| ApiError::NotFound("round".to_string()))?;
        let votable = self.votable_prompts(&round.id).await;
        let current = votable
            .get(game.voting_prompt_index)
            .ok_or_else(|| ApiError::NotFound("prompt".to_string()))?;
        if current.id != *prompt_id {
            return Err(ApiError::PhaseMismatch(
                "that prompt is not open for voting".to_string(),
            ));
        }

        let responses = self.responses_of_prompt(prompt_id).await;
        if responses.iter().any(|r| r.player_id == *voter_id) {
            return Err(ApiError::Validation(
                "you cannot vote on your own matchup".to_string(),
            ));
        }
        if let Some(chosen) = &response_id {
            let valid = responses
                .iter()
                .any(|r| r.id == *chosen && !r.is_forfeit());
            if !valid {
                return Err(ApiError::Validation(
                    "vote names an unknown or forfeited answer".to_string(),
                ));
            }
        }

        let inserted = self
            .insert_vote_unique(Vote {
                id: ulid::Ulid::new().to_string(),
                prompt_id: prompt_id.clone(),
                voter_id: voter_id.clone(),
                response_id,
                fail_reason: None,
                created_at: Utc::now(),
            })
            .await?;
        if inserted {
            self.bump_game_version(&game.id).await?;
        }
        Ok(())
    }

    /// Write abstentions for every active contestant who neither
    /// authored nor voted on this prompt. Runs under the reveal claim.
    pub async fn fill_abstentions(&self, game: &Game, prompt_id: &PromptId) -> ApiResult<u32> {
        let responses = self.responses_of_prompt(prompt_id).await;
        let votes = self.votes_of_prompt(prompt_id).await;
        let actives = self.active_contestants(&game.id).await;

        let mut filled = 0;
        for player in actives {
            let authored = responses.iter().any(|r| r.player_id == player.id);
            let voted = votes.iter().any(|v| v.voter_id == player.id);
            if authored || voted {
                continue;
            }
            let inserted = self
                .insert_vote_unique(Vote {
                    id: ulid::Ulid::new().to_string(),
                    prompt_id: prompt_id.clone(),
                    voter_id: player.id.clone(),
                    response_id: None,
                    fail_reason: None,
                    created_at: Utc::now(),
                })
                .await?;
            if inserted {
                filled += 1;
            }
        }
        if filled > 0 {
            tracing::debug!(game = %game.room_code, filled, "filled abstentions");
        }
        Ok(filled)
    }

    /// Toggle an emoji reaction on a response. Spectators welcome.
    pub async fn toggle_reaction(
        &self,
        game: &Game,
        player_id: &PlayerId,
        response_id: &ResponseId,
        emoji: &str,
    ) -> ApiResult<()> {
        self.require_player_in_game(&game.id, player_id).await?;
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > 8 {
            return Err(ApiError::Validation("bad emoji".to_string()));
        }

        let prompt_id = {
            let responses = self.responses.read().await;
            responses.get(response_id).map(|r| r.prompt_id.clone())
        };
        let round_id = match prompt_id {
            Some(pid) => self.prompts.read().await.get(&pid).map(|p| p.round_id.clone()),
            None => None,
        };
        let in_game = match round_id {
            Some(rid) => self
                .rounds
                .read()
                .await
                .get(&rid)
                .map(|r| r.game_id == game.id)
                .unwrap_or(false),
            None => false,
        };
        if !in_game {
            return Err(ApiError::NotFound("response".to_string()));
        }

        let reaction = Reaction {
            response_id: response_id.clone(),
            player_id: player_id.clone(),
            emoji: emoji.to_string(),
        };
        {
            let mut reactions = self.reactions.write().await;
            if let Some(pos) = reactions.iter().position(|r| *r == reaction) {
                reactions.remove(pos);
            } else {
                reactions.push(reaction);
            }
        }
        self.bump_game_version(&game.id).await?;
        Ok(())
    }

    pub async fn reactions_for_response(&self, response_id: &ResponseId) -> Vec<Reaction> {
        self.reactions
            .read()
            .await
            .iter()
            .filter(|r| r.response_id == *response_id)
            .cloned()
            .collect()
    }
}
