//! `Store` over Supabase tables.
//!
//! Conditional transitions are PATCHes filtered on the expected prior state;
//! PostgREST returns only the rows it changed, so an empty response means a
//! racing writer got there first. `lobbies` carries a partial unique index on
//! `player1_id where status = 'open'`, surfaced here as `StoreError::Conflict`.

use serde_json::json;
use uuid::Uuid;

use super::records::{
    BracketNode, Lobby, MatchProgress, MatchRecord, MatchResult, Slot, Tournament,
};
use super::supabase::{SupabaseClient, SupabaseError};
use super::{Store, StoreError};

const MATCHES: &str = "matches";
const TOURNAMENTS: &str = "tournaments";
const BRACKET_NODES: &str = "bracket_nodes";
const LOBBIES: &str = "lobbies";

fn conflict_aware(err: SupabaseError, what: impl FnOnce() -> String) -> StoreError {
    if err.is_conflict() {
        StoreError::Conflict(what())
    } else {
        StoreError::Supabase(err)
    }
}

impl Store for SupabaseClient {
    async fn insert_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.insert(MATCHES, record)
            .await
            .map_err(|e| conflict_aware(e, || format!("match {} exists", record.id)))
    }

    async fn update_match_progress(&self, progress: &MatchProgress) -> Result<(), StoreError> {
        // a late snapshot never reopens a settled match
        let query = format!("id=eq.{}&status=neq.finished", progress.match_id);
        Ok(self.update(MATCHES, &query, progress).await?)
    }

    async fn record_match_result(&self, result: &MatchResult) -> Result<(), StoreError> {
        let query = format!("id=eq.{}", result.match_id);
        Ok(self.update(MATCHES, &query, result).await?)
    }

    async fn get_match(&self, id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.get_one(MATCHES, &format!("id=eq.{}", id)).await?)
    }

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), StoreError> {
        self.insert(TOURNAMENTS, tournament)
            .await
            .map_err(|e| conflict_aware(e, || format!("tournament {} exists", tournament.id)))
    }

    async fn get_tournament(&self, id: Uuid) -> Result<Option<Tournament>, StoreError> {
        Ok(self.get_one(TOURNAMENTS, &format!("id=eq.{}", id)).await?)
    }

    async fn list_tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
        Ok(self.get(TOURNAMENTS, "order=created_at.desc").await?)
    }

    async fn try_begin_tournament(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = format!("id=eq.{}&status=eq.open", id);
        let rows: Vec<Tournament> = self
            .update_returning(TOURNAMENTS, &query, &json!({ "status": "started" }))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn try_reopen_tournament(&self, id: Uuid) -> Result<bool, StoreError> {
        let query = format!("id=eq.{}&status=eq.started", id);
        let rows: Vec<Tournament> = self
            .update_returning(TOURNAMENTS, &query, &json!({ "status": "open" }))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn complete_tournament(&self, id: Uuid, champion_id: Uuid) -> Result<(), StoreError> {
        let query = format!("id=eq.{}&status=eq.started", id);
        let patch = json!({ "status": "completed", "champion_id": champion_id });
        Ok(self.update(TOURNAMENTS, &query, &patch).await?)
    }

    async fn upsert_bracket_nodes(&self, nodes: &[BracketNode]) -> Result<(), StoreError> {
        Ok(self.upsert(BRACKET_NODES, nodes, "id").await?)
    }

    async fn list_bracket_nodes(&self, tournament_id: Uuid) -> Result<Vec<BracketNode>, StoreError> {
        let query = format!(
            "tournament_id=eq.{}&order=round.asc,position.asc",
            tournament_id
        );
        Ok(self.get(BRACKET_NODES, &query).await?)
    }

    async fn get_bracket_node(&self, id: Uuid) -> Result<Option<BracketNode>, StoreError> {
        Ok(self.get_one(BRACKET_NODES, &format!("id=eq.{}", id)).await?)
    }

    async fn find_bracket_node_by_match(
        &self,
        match_id: Uuid,
    ) -> Result<Option<BracketNode>, StoreError> {
        Ok(self
            .get_one(BRACKET_NODES, &format!("match_id=eq.{}", match_id))
            .await?)
    }

    async fn try_finish_bracket_node(&self, id: Uuid, winner: Slot) -> Result<bool, StoreError> {
        let query = format!("id=eq.{}&status=eq.scheduled", id);
        let patch = json!({ "status": "finished", "winner_slot": winner });
        let rows: Vec<BracketNode> = self.update_returning(BRACKET_NODES, &query, &patch).await?;
        Ok(!rows.is_empty())
    }

    async fn try_fill_bracket_slot(
        &self,
        id: Uuid,
        slot: Slot,
        participant: Uuid,
    ) -> Result<bool, StoreError> {
        let column = match slot {
            Slot::One => "player1_id",
            Slot::Two => "player2_id",
        };
        let query = format!("id=eq.{}&status=eq.not_scheduled&{}=is.null", id, column);
        let patch = json!({ column: participant });
        let rows: Vec<BracketNode> = self.update_returning(BRACKET_NODES, &query, &patch).await?;
        Ok(!rows.is_empty())
    }

    async fn try_schedule_bracket_node(&self, id: Uuid, match_id: Uuid) -> Result<bool, StoreError> {
        let query = format!(
            "id=eq.{}&status=eq.not_scheduled&player1_id=not.is.null&player2_id=not.is.null",
            id
        );
        let patch = json!({ "status": "scheduled", "match_id": match_id });
        let rows: Vec<BracketNode> = self.update_returning(BRACKET_NODES, &query, &patch).await?;
        Ok(!rows.is_empty())
    }

    async fn release_bracket_node(&self, id: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        let query = format!("id=eq.{}&status=eq.scheduled&match_id=eq.{}", id, match_id);
        let patch = json!({ "status": "not_scheduled", "match_id": null });
        Ok(self.update(BRACKET_NODES, &query, &patch).await?)
    }

    async fn find_open_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        let query = format!(
            "status=eq.open&player2_id=is.null&player1_id=neq.{}&order=created_at.asc",
            player_id
        );
        Ok(self.get_one(LOBBIES, &query).await?)
    }

    async fn find_waiting_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        let query = format!("status=eq.open&player1_id=eq.{}", player_id);
        Ok(self.get_one(LOBBIES, &query).await?)
    }

    async fn find_paired_lobby(&self, player_id: Uuid) -> Result<Option<Lobby>, StoreError> {
        let query = format!(
            "status=eq.full&or=(player1_id.eq.{p},player2_id.eq.{p})",
            p = player_id
        );
        Ok(self.get_one(LOBBIES, &query).await?)
    }

    async fn insert_lobby(&self, lobby: &Lobby) -> Result<(), StoreError> {
        self.insert(LOBBIES, lobby).await.map_err(|e| {
            conflict_aware(e, || {
                format!("player {} already waits in a lobby", lobby.player1_id)
            })
        })
    }

    async fn get_lobby(&self, id: Uuid) -> Result<Option<Lobby>, StoreError> {
        Ok(self.get_one(LOBBIES, &format!("id=eq.{}", id)).await?)
    }

    async fn try_fill_lobby(&self, id: Uuid, player_id: Uuid, match_id: Uuid) -> Result<bool, StoreError> {
        let query = format!(
            "id=eq.{}&status=eq.open&player2_id=is.null&player1_id=neq.{}",
            id, player_id
        );
        let patch = json!({ "player2_id": player_id, "status": "full", "match_id": match_id });
        let rows: Vec<Lobby> = self.update_returning(LOBBIES, &query, &patch).await?;
        Ok(!rows.is_empty())
    }

    async fn release_lobby(&self, id: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        let query = format!("id=eq.{}&status=eq.full&match_id=eq.{}", id, match_id);
        let patch = json!({ "status": "open", "player2_id": null, "match_id": null });
        Ok(self.update(LOBBIES, &query, &patch).await?)
    }

    async fn delete_lobby_for_match(&self, match_id: Uuid) -> Result<(), StoreError> {
        Ok(self
            .delete(LOBBIES, &format!("match_id=eq.{}", match_id))
            .await?)
    }
}
