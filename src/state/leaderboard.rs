use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::AppState;
use crate::types::*;

/// Cross-game standing for one contestant name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub name: String,
    pub kind: PlayerKind,
    pub games_played: u32,
    pub game_wins: u32,
    pub total_score: i64,
    pub best_score: i64,
}

/// What the cleanup cron removed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub purged_games: u32,
    pub purged_players: u32,
    pub purged_rounds: u32,
}

/// Finished games older than this are purged.
const RETAIN_FINISHED: i64 = 24 * 60 * 60;
/// Unfinished games idle longer than this count as abandoned.
const ABANDON_AFTER: i64 = 2 * 60 * 60;

impl AppState {
    /// Aggregate all FINAL_RESULTS games by contestant name. Names are
    /// the only identity that survives across games.
    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let finished: Vec<GameId> = self
            .games
            .read()
            .await
            .values()
            .filter(|g| g.status == GameStatus::FinalResults)
            .map(|g| g.id.clone())
            .collect();

        let mut entries: HashMap<String, LeaderboardEntry> = HashMap::new();
        for game_id in &finished {
            let contestants: Vec<Player> = self
                .players_of_game(game_id)
                .await
                .into_iter()
                .filter(|p| p.kind != PlayerKind::Spectator)
                .collect();
            let top_score = contestants.iter().map(|p| p.score).max().unwrap_or(0);
            let top_count = contestants.iter().filter(|p| p.score == top_score).count();

            for player in contestants {
                let key = format!("{}:{:?}", player.name.to_lowercase(), player.kind);
                let entry = entries.entry(key).or_insert_with(|| LeaderboardEntry {
                    name: player.name.clone(),
                    kind: player.kind,
                    games_played: 0,
                    game_wins: 0,
                    total_score: 0,
                    best_score: i64::MIN,
                });
                entry.games_played += 1;
                entry.total_score += player.score;
                entry.best_score = entry.best_score.max(player.score);
                // A shared top score is nobody's win.
                if player.score == top_score && top_count == 1 {
                    entry.game_wins += 1;
                }
            }
        }

        let mut board: Vec<LeaderboardEntry> = entries.into_values().collect();
        board.sort_by(|a, b| {
            b.game_wins
                .cmp(&a.game_wins)
                .then(b.total_score.cmp(&a.total_score))
                .then(a.name.cmp(&b.name))
        });
        board
    }

    /// Purge finished games past retention and abandoned games past the
    /// idle threshold, cascading to every child row.
    pub async fn cleanup_games(&self) -> CleanupReport {
        let now = Utc::now();
        let doomed: Vec<GameId> = self
            .games
            .read()
            .await
            .values()
            .filter(|g| {
                let age = now - g.updated_at;
                match g.status {
                    GameStatus::FinalResults => age > Duration::seconds(RETAIN_FINISHED),
                    _ => age > Duration::seconds(ABANDON_AFTER),
                }
            })
            .map(|g| g.id.clone())
            .collect();

        if doomed.is_empty() {
            return CleanupReport {
                purged_games: 0,
                purged_players: 0,
                purged_rounds: 0,
            };
        }
        let doomed_set: HashSet<&GameId> = doomed.iter().collect();

        let round_ids: HashSet<RoundId> = {
            let rounds = self.rounds.read().await;
            rounds
                .values()
                .filter(|r| doomed_set.contains(&r.game_id))
                .map(|r| r.id.clone())
                .collect()
        };
        let prompt_ids: HashSet<PromptId> = {
            let prompts = self.prompts.read().await;
            prompts
                .values()
                .filter(|p| round_ids.contains(&p.round_id))
                .map(|p| p.id.clone())
                .collect()
        };
        let response_ids: HashSet<ResponseId> = {
            let responses = self.responses.read().await;
            responses
                .values()
                .filter(|r| prompt_ids.contains(&r.prompt_id))
                .map(|r| r.id.clone())
                .collect()
        };

        let mut report = CleanupReport {
            purged_games: 0,
            purged_players: 0,
            purged_rounds: round_ids.len() as u32,
        };

        {
            let mut votes = self.votes.write().await;
            votes.retain(|_, v| !prompt_ids.contains(&v.prompt_id));
        }
        {
            let mut reactions = self.reactions.write().await;
            reactions.retain(|r| !response_ids.contains(&r.response_id));
        }
        {
            let mut responses = self.responses.write().await;
            responses.retain(|_, r| !prompt_ids.contains(&r.prompt_id));
        }
        {
            let mut assignments = self.assignments.write().await;
            assignments.retain(|a| !prompt_ids.contains(&a.prompt_id));
        }
        {
            let mut prompts = self.prompts.write().await;
            prompts.retain(|_, p| !round_ids.contains(&p.round_id));
        }
        {
            let mut rounds = self.rounds.write().await;
            rounds.retain(|_, r| !doomed_set.contains(&r.game_id));
        }
        {
            let mut players = self.players.write().await;
            let before = players.len();
            players.retain(|_, p| !doomed_set.contains(&p.game_id));
            report.purged_players = (before - players.len()) as u32;
        }
        {
            let mut usage = self.model_usage.write().await;
            usage.retain(|(game_id, _), _| !doomed_set.contains(game_id));
        }
        {
            let mut games = self.games.write().await;
            let before = games.len();
            games.retain(|id, _| !doomed_set.contains(id));
            report.purged_games = (before - games.len()) as u32;
        }

        tracing::info!(
            games = report.purged_games,
            players = report.purged_players,
            "cleanup pass done"
        );
        report
    }
}
