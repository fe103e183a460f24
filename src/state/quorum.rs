use super::AppState;
use crate::types::*;

impl AppState {
    /// The quorum population: non-spectators who are not disconnected.
    /// Disconnects shrink this set and thereby unblock progress.
    pub async fn active_contestants(&self, game_id: &GameId) -> Vec<Player> {
        self.players_of_game(game_id)
            .await
            .into_iter()
            .filter(|p| p.is_active_contestant())
            .collect()
    }

    pub async fn active_contestant_ids(&self, game_id: &GameId) -> Vec<PlayerId> {
        self.active_contestants(game_id)
            .await
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    /// True when every active contestant has answered every prompt they
    /// are assigned to in the current round.
    pub async fn writing_complete(&self, game: &Game) -> bool {
        let Some(round) = self.current_round(game).await else {
            return false;
        };
        for player in self.active_contestants(&game.id).await {
            for prompt_id in self.assigned_prompt_ids(&round.id, &player.id).await {
                let answered = self
                    .responses_of_prompt(&prompt_id)
                    .await
                    .iter()
                    .any(|r| r.player_id == player.id);
                if !answered {
                    return false;
                }
            }
        }
        true
    }

    /// True when the prompt at `votingPromptIndex` has at least as many
    /// recorded votes (casts, abstentions, and error votes alike) as
    /// there are active non-author contestants.
    pub async fn current_prompt_voting_complete(&self, game: &Game) -> bool {
        let Some(round) = self.current_round(game).await else {
            return false;
        };
        let votable = self.votable_prompts(&round.id).await;
        let Some(prompt) = votable.get(game.voting_prompt_index) else {
            return false;
        };

        let actives = self.active_contestants(&game.id).await;
        let responses = self.responses_of_prompt(&prompt.id).await;
        let respondents = actives
            .iter()
            .filter(|p| responses.iter().any(|r| r.player_id == p.id))
            .count();
        let needed = actives.len().saturating_sub(respondents);

        self.votes_of_prompt(&prompt.id).await.len() >= needed
    }
}
