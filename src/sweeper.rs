//! Per-request housekeeping, invoked from the polling endpoint. There
//! is no background timer: deadlines and disconnects are enforced when
//! somebody asks about the game, and a game nobody watches stays put.
//! Every step is idempotent.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::phase;
use crate::state::AppState;
use crate::types::*;

/// One sweep over a game: heartbeat, disconnect stale players, promote
/// a fresh host if needed, enforce the phase deadline, and re-check the
/// quorum if anybody just dropped out.
pub async fn sweep(
    state: &Arc<AppState>,
    game: &Game,
    player_id: Option<&PlayerId>,
    touch: bool,
) -> ApiResult<()> {
    let now = Utc::now();

    // 1. Heartbeat, throttled to one refresh per window.
    if touch {
        if let Some(player_id) = player_id {
            let window = Duration::from_std(state.config.heartbeat_window)
                .unwrap_or_else(|_| Duration::seconds(10));
            let mut players = state.players.write().await;
            if let Some(player) = players.get_mut(player_id) {
                if player.game_id == game.id && now - player.last_seen >= window {
                    player.last_seen = now;
                    player.participation_status = ParticipationStatus::Active;
                }
            }
        }
    }

    // 2. Flip stale non-AI players to DISCONNECTED. AI contestants never
    //    poll, so their lastSeen is meaningless and they stay active.
    let inactive_after = Duration::from_std(state.config.inactive_after)
        .unwrap_or_else(|_| Duration::seconds(45));
    let mut disconnected_any = false;
    {
        let mut players = state.players.write().await;
        for player in players.values_mut() {
            if player.game_id == game.id
                && player.kind != PlayerKind::Ai
                && player.participation_status == ParticipationStatus::Active
                && now - player.last_seen >= inactive_after
            {
                player.participation_status = ParticipationStatus::Disconnected;
                disconnected_any = true;
                tracing::info!(game = %game.room_code, player = %player.name, "marked disconnected");
            }
        }
    }
    if disconnected_any {
        state.bump_game_version(&game.id).await?;
    }

    // 3. Promote the freshest active human when the host has gone stale.
    let host_stale_after = Duration::from_std(state.config.host_stale_after)
        .unwrap_or_else(|_| Duration::seconds(60));
    let host_stale = state
        .get_player(&game.host_player_id)
        .await
        .map(|h| now - h.last_seen >= host_stale_after)
        .unwrap_or(true);
    if host_stale {
        let successor = state
            .players_of_game(&game.id)
            .await
            .into_iter()
            .filter(|p| {
                p.kind == PlayerKind::Human
                    && p.participation_status == ParticipationStatus::Active
                    && p.id != game.host_player_id
            })
            .max_by_key(|p| p.last_seen);
        if let Some(successor) = successor {
            let successor_id = successor.id.clone();
            let old_host = game.host_player_id.clone();
            state
                .update_game_where(
                    &game.id,
                    |g| g.host_player_id == old_host,
                    |g| g.host_player_id = successor_id,
                )
                .await?;
            tracing::info!(game = %game.room_code, new_host = %successor.name, "host promoted");
        }
    }

    // 4. Enforce an expired phase deadline.
    let fresh = state.get_game(&game.id).await;
    if let Some(fresh) = &fresh {
        phase::handle_deadline(state, fresh).await?;
    }

    // 5. A shrunken quorum may already be satisfied.
    if disconnected_any {
        phase::recheck_quorum(state, &game.id).await?;
    }

    Ok(())
}
