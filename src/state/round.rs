use std::collections::HashSet;

use super::AppState;
use crate::error::ApiResult;
use crate::prompts;
use crate::types::*;

impl AppState {
    /// Create Round `round_number` with its prompts and assignments.
    ///
    /// Draws one prompt per contestant (excluding texts already used in
    /// this game) and assigns prompt `i` to `(players[i % n],
    /// players[(i+1) % n])`, so every contestant authors exactly two
    /// answers against two different opponents.
    ///
    /// Returns false when the round already existed: a concurrent caller
    /// won the unique `(gameId, roundNumber)` insert, and the loser must
    /// not re-trigger AI work.
    pub async fn create_round_with_prompts(
        &self,
        game: &Game,
        round_number: u32,
        contestants: &[Player],
    ) -> ApiResult<bool> {
        let round = Round {
            id: ulid::Ulid::new().to_string(),
            game_id: game.id.clone(),
            round_number,
            scored_at: None,
        };
        if !self.insert_round_unique(round.clone()).await? {
            tracing::debug!(game = %game.room_code, round_number, "round already created");
            return Ok(false);
        }

        let exclude = self.used_prompt_texts(&game.id).await;
        let texts = prompts::draw(contestants.len(), &exclude);

        let n = contestants.len();
        let mut new_prompts = Vec::with_capacity(n);
        let mut new_assignments = Vec::with_capacity(n * 2);
        for (i, text) in texts.into_iter().enumerate() {
            let prompt = Prompt {
                id: ulid::Ulid::new().to_string(),
                round_id: round.id.clone(),
                text,
                position: i,
                winner_response_id: None,
            };
            new_assignments.push(Assignment {
                prompt_id: prompt.id.clone(),
                player_id: contestants[i % n].id.clone(),
            });
            new_assignments.push(Assignment {
                prompt_id: prompt.id.clone(),
                player_id: contestants[(i + 1) % n].id.clone(),
            });
            new_prompts.push(prompt);
        }

        {
            let mut prompts = self.prompts.write().await;
            for prompt in new_prompts {
                prompts.insert(prompt.id.clone(), prompt);
            }
        }
        self.assignments.write().await.extend(new_assignments);

        tracing::info!(game = %game.room_code, round_number, prompts = n, "round created");
        Ok(true)
    }

    /// Every prompt text already seen in this game, across all rounds.
    pub async fn used_prompt_texts(&self, game_id: &GameId) -> HashSet<String> {
        let round_ids: HashSet<RoundId> = self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.game_id == *game_id)
            .map(|r| r.id.clone())
            .collect();
        self.prompts
            .read()
            .await
            .values()
            .filter(|p| round_ids.contains(&p.round_id))
            .map(|p| p.text.clone())
            .collect()
    }

    pub async fn round_by_number(&self, game_id: &GameId, round_number: u32) -> Option<Round> {
        self.rounds
            .read()
            .await
            .values()
            .find(|r| r.game_id == *game_id && r.round_number == round_number)
            .cloned()
    }

    /// The round the game is currently in, if any.
    pub async fn current_round(&self, game: &Game) -> Option<Round> {
        if game.current_round == 0 {
            return None;
        }
        self.round_by_number(&game.id, game.current_round).await
    }

    pub async fn rounds_of_game(&self, game_id: &GameId) -> Vec<Round> {
        let mut rounds: Vec<Round> = self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.game_id == *game_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.round_number);
        rounds
    }

    /// Prompts of a round in their stable position order.
    pub async fn prompts_of_round(&self, round_id: &RoundId) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .read()
            .await
            .values()
            .filter(|p| p.round_id == *round_id)
            .cloned()
            .collect();
        prompts.sort_by_key(|p| p.position);
        prompts
    }

    pub async fn assignees_of_prompt(&self, prompt_id: &PromptId) -> Vec<PlayerId> {
        self.assignments
            .read()
            .await
            .iter()
            .filter(|a| a.prompt_id == *prompt_id)
            .map(|a| a.player_id.clone())
            .collect()
    }

    /// Prompt ids a player must answer within the given round.
    pub async fn assigned_prompt_ids(
        &self,
        round_id: &RoundId,
        player_id: &PlayerId,
    ) -> Vec<PromptId> {
        let prompt_ids: HashSet<PromptId> = self
            .prompts_of_round(round_id)
            .await
            .into_iter()
            .map(|p| p.id)
            .collect();
        self.assignments
            .read()
            .await
            .iter()
            .filter(|a| a.player_id == *player_id && prompt_ids.contains(&a.prompt_id))
            .map(|a| a.prompt_id.clone())
            .collect()
    }

    pub async fn responses_of_prompt(&self, prompt_id: &PromptId) -> Vec<Response> {
        let mut responses: Vec<Response> = self
            .responses
            .read()
            .await
            .values()
            .filter(|r| r.prompt_id == *prompt_id)
            .cloned()
            .collect();
        responses.sort_by(|a, b| a.id.cmp(&b.id));
        responses
    }

    pub async fn votes_of_prompt(&self, prompt_id: &PromptId) -> Vec<Vote> {
        let mut votes: Vec<Vote> = self
            .votes
            .read()
            .await
            .values()
            .filter(|v| v.prompt_id == *prompt_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.id.cmp(&b.id));
        votes
    }

    /// Votable prompts of a round in position order: those with at least
    /// two non-forfeit responses. `votingPromptIndex` indexes this list.
    pub async fn votable_prompts(&self, round_id: &RoundId) -> Vec<Prompt> {
        let mut votable = Vec::new();
        for prompt in self.prompts_of_round(round_id).await {
            let live = self
                .responses_of_prompt(&prompt.id)
                .await
                .iter()
                .filter(|r| !r.is_forfeit())
                .count();
            if live >= 2 {
                votable.push(prompt);
            }
        }
        votable
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::state;
    use super::*;
    use chrono::Utc;

    async fn seeded_game(
        state: &AppState,
        humans: usize,
    ) -> (Game, Vec<Player>) {
        let (game, host) = state
            .create_game("Host".to_string(), 3, false)
            .await
            .unwrap();
        let mut players = vec![host];
        for i in 1..humans {
            players.push(
                state
                    .join_game(&game.id, format!("P{}", i), PlayerKind::Human, None)
                    .await
                    .unwrap(),
            );
        }
        (game, players)
    }

    #[tokio::test]
    async fn test_round_robin_assignment() {
        let state = state();
        let (game, _) = seeded_game(&state, 3).await;
        let contestants = state.players_of_game(&game.id).await;

        assert!(state
            .create_round_with_prompts(&game, 1, &contestants)
            .await
            .unwrap());

        let round = state.round_by_number(&game.id, 1).await.unwrap();
        let prompts = state.prompts_of_round(&round.id).await;
        assert_eq!(prompts.len(), 3);

        // Prompt i pairs players (i, i+1) mod n.
        for (i, prompt) in prompts.iter().enumerate() {
            let assignees = state.assignees_of_prompt(&prompt.id).await;
            assert_eq!(assignees.len(), 2);
            assert_eq!(assignees[0], contestants[i % 3].id);
            assert_eq!(assignees[1], contestants[(i + 1) % 3].id);
        }

        // Every contestant answers exactly two prompts.
        for player in &contestants {
            assert_eq!(
                state.assigned_prompt_ids(&round.id, &player.id).await.len(),
                2
            );
        }
    }

    #[tokio::test]
    async fn test_round_create_race_single_winner() {
        let state = state();
        let (game, _) = seeded_game(&state, 3).await;
        let contestants = state.players_of_game(&game.id).await;

        let first = state
            .create_round_with_prompts(&game, 1, &contestants)
            .await
            .unwrap();
        let second = state
            .create_round_with_prompts(&game, 1, &contestants)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        // The loser created nothing: still exactly 3 prompts.
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        assert_eq!(state.prompts_of_round(&round.id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_prompt_texts_not_reused_across_rounds() {
        let state = state();
        let (game, _) = seeded_game(&state, 4).await;
        let contestants = state.players_of_game(&game.id).await;

        state
            .create_round_with_prompts(&game, 1, &contestants)
            .await
            .unwrap();
        state
            .create_round_with_prompts(&game, 2, &contestants)
            .await
            .unwrap();

        let r1 = state.round_by_number(&game.id, 1).await.unwrap();
        let r2 = state.round_by_number(&game.id, 2).await.unwrap();
        let t1: HashSet<String> = state
            .prompts_of_round(&r1.id)
            .await
            .into_iter()
            .map(|p| p.text)
            .collect();
        let t2: HashSet<String> = state
            .prompts_of_round(&r2.id)
            .await
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert!(t1.is_disjoint(&t2));
    }

    #[tokio::test]
    async fn test_votable_excludes_forfeits() {
        let state = state();
        let (game, _) = seeded_game(&state, 2).await;
        let contestants = state.players_of_game(&game.id).await;
        state
            .create_round_with_prompts(&game, 1, &contestants)
            .await
            .unwrap();
        let round = state.round_by_number(&game.id, 1).await.unwrap();
        let prompts = state.prompts_of_round(&round.id).await;

        // Prompt 0: two real answers. Prompt 1: one forfeited.
        for (i, text) in [("real a", "real b"), ("real c", FORFEIT_MARKER)]
            .iter()
            .enumerate()
        {
            for (j, t) in [text.0, text.1].iter().enumerate() {
                state
                    .insert_response_unique(Response {
                        id: ulid::Ulid::new().to_string(),
                        prompt_id: prompts[i].id.clone(),
                        player_id: contestants[(i + j) % 2].id.clone(),
                        text: t.to_string(),
                        points_earned: None,
                        fail_reason: None,
                        created_at: Utc::now(),
                    })
                    .await
                    .unwrap();
            }
        }

        let votable = state.votable_prompts(&round.id).await;
        assert_eq!(votable.len(), 1);
        assert_eq!(votable[0].id, prompts[0].id);
    }
}
