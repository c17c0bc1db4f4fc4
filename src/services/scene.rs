//! Scene service — CRUD, join/part, grid metadata, and state hydration.
//!
//! DESIGN
//! ======
//! Scenes are created and listed via WS-dispatched operations. Scene state
//! is hydrated from Postgres on first join and kept in memory while any
//! participant is connected. Non-privileged participants receive a token
//! snapshot with hidden tokens filtered out — what the visibility resolver
//! conceals, players never see.
//!
//! ERROR HANDLING
//! ==============
//! On last-client part, dirty tokens are flushed before eviction. If that
//! flush fails, the scene is intentionally kept in memory with dirty flags
//! intact so the persistence worker can retry instead of losing edits.

use std::collections::HashMap;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::VisibilityConfig;
use crate::frame::Frame;
use crate::state::{AppState, SceneGrid, SceneState, Token};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("scene not found: {0}")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for SceneError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SCENE_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Row returned from scene queries.
#[derive(Debug, Clone)]
pub struct SceneRow {
    pub id: Uuid,
    pub name: String,
    pub grid: SceneGrid,
}

// =============================================================================
// CRUD
// =============================================================================

/// Create a new scene with its grid metadata.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn create_scene(pool: &PgPool, name: &str, grid: &SceneGrid) -> Result<SceneRow, SceneError> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO scenes (id, name, cell_px, distance_per_cell, units) VALUES ($1, $2, $3, $4, $5)")
        .bind(id)
        .bind(name)
        .bind(grid.cell_px)
        .bind(grid.distance_per_cell)
        .bind(&grid.units)
        .execute(pool)
        .await?;

    Ok(SceneRow { id, name: name.to_string(), grid: grid.clone() })
}

/// List all scenes.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_scenes(pool: &PgPool) -> Result<Vec<SceneRow>, SceneError> {
    let rows = sqlx::query_as::<_, (Uuid, String, f64, f64, String)>(
        "SELECT id, name, cell_px, distance_per_cell, units
         FROM scenes
         ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, cell_px, distance_per_cell, units)| SceneRow {
            id,
            name,
            grid: SceneGrid { cell_px, distance_per_cell, units },
        })
        .collect())
}

/// Delete a scene by ID. Tokens cascade.
///
/// # Errors
///
/// Returns `NotFound` if no row was deleted.
pub async fn delete_scene(pool: &PgPool, scene_id: Uuid) -> Result<(), SceneError> {
    let result = sqlx::query("DELETE FROM scenes WHERE id = $1")
        .bind(scene_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(SceneError::NotFound(scene_id));
    }
    Ok(())
}

/// Update a scene's grid metadata in the store and in memory.
///
/// Grid changes shift every distance computation, so callers are expected
/// to request a visibility recomputation afterwards.
///
/// # Errors
///
/// Returns `NotFound` if the scene row doesn't exist.
pub async fn update_grid(state: &AppState, scene_id: Uuid, grid: &SceneGrid) -> Result<(), SceneError> {
    let result = sqlx::query("UPDATE scenes SET cell_px = $1, distance_per_cell = $2, units = $3 WHERE id = $4")
        .bind(grid.cell_px)
        .bind(grid.distance_per_cell)
        .bind(&grid.units)
        .bind(scene_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(SceneError::NotFound(scene_id));
    }

    let mut scenes = state.scenes.write().await;
    if let Some(scene) = scenes.get_mut(&scene_id) {
        scene.grid = grid.clone();
    }
    Ok(())
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a scene. Hydrates from Postgres if not already in memory.
/// Returns the token snapshot the joining participant is allowed to see:
/// privileged participants get everything, players only revealed tokens.
///
/// # Errors
///
/// Returns a database error if hydration fails.
pub async fn join_scene(
    state: &AppState,
    scene_id: Uuid,
    user_id: Uuid,
    user_name: &str,
    privileged: bool,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<Vec<Token>, SceneError> {
    let row = sqlx::query_as::<_, (f64, f64, String)>(
        "SELECT cell_px, distance_per_cell, units FROM scenes WHERE id = $1",
    )
    .bind(scene_id)
    .fetch_optional(&state.pool)
    .await?;

    let Some((cell_px, distance_per_cell, units)) = row else {
        return Err(SceneError::NotFound(scene_id));
    };
    let grid = SceneGrid { cell_px, distance_per_cell, units };

    // Fetch token snapshot outside locks; we'll apply it only if needed.
    let hydration_snapshot = hydrate_tokens(&state.pool, scene_id).await?;

    let mut scenes = state.scenes.write().await;
    let scene_state = scenes
        .entry(scene_id)
        .or_insert_with(|| SceneState::new(grid));

    // Hydrate from Postgres if this is the first live client for this scene.
    if scene_state.clients.is_empty() {
        scene_state.tokens = hydration_snapshot;
        info!(%scene_id, count = scene_state.tokens.len(), "hydrated scene from database");
    }

    scene_state.add_participant(client_id, user_id, user_name, privileged, tx);

    let tokens: Vec<Token> = scene_state
        .tokens
        .values()
        .filter(|t| privileged || !t.hidden)
        .cloned()
        .collect();

    info!(%scene_id, %client_id, privileged, clients = scene_state.clients.len(), "participant joined scene");
    Ok(tokens)
}

/// Leave a scene. Removes the participant. If last client, flushes dirty
/// tokens and evicts the scene state from memory.
pub async fn part_scene(state: &AppState, scene_id: Uuid, client_id: Uuid) {
    let mut scenes = state.scenes.write().await;
    let Some(scene_state) = scenes.get_mut(&scene_id) else {
        return;
    };

    scene_state.remove_participant(client_id);
    info!(%scene_id, %client_id, remaining = scene_state.clients.len(), "participant left scene");

    if scene_state.clients.is_empty() {
        if scene_state.dirty.is_empty() {
            scenes.remove(&scene_id);
            return;
        }

        let pending: Vec<Token> = scene_state
            .dirty
            .iter()
            .filter_map(|id| scene_state.tokens.get(id).cloned())
            .collect();

        match flush_tokens(&state.pool, &pending).await {
            Ok(()) => {
                scenes.remove(&scene_id);
            }
            Err(e) => {
                // Keep the scene resident so the persistence worker retries.
                warn!(error = %e, %scene_id, count = pending.len(), "part flush failed; keeping scene in memory");
            }
        }
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Deliver a frame to every connected client of a scene, optionally
/// excluding one (usually the sender).
pub async fn broadcast(state: &AppState, scene_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
    let senders: Vec<mpsc::Sender<Frame>> = {
        let scenes = state.scenes.read().await;
        let Some(scene_state) = scenes.get(&scene_id) else {
            return;
        };
        scene_state
            .clients
            .iter()
            .filter(|(client_id, _)| Some(**client_id) != exclude)
            .map(|(_, tx)| tx.clone())
            .collect()
    };

    for tx in senders {
        let _ = tx.send(frame.clone()).await;
    }
}

// =============================================================================
// HYDRATION / FLUSH
// =============================================================================

/// Row shape for token hydration queries.
#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    name: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    hidden: bool,
    actor_id: Option<Uuid>,
    player_owned: bool,
    flags: serde_json::Value,
    version: i32,
}

/// Load all tokens of a scene from Postgres, parsing flags at the boundary.
pub async fn hydrate_tokens(pool: &PgPool, scene_id: Uuid) -> Result<HashMap<Uuid, Token>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TokenRow>(
        "SELECT id, name, x, y, width, height, hidden, actor_id, player_owned, flags, version
         FROM scene_tokens
         WHERE scene_id = $1",
    )
    .bind(scene_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let config = VisibilityConfig::from_flags(&row.flags);
            let token = Token {
                id: row.id,
                scene_id,
                name: row.name,
                x: row.x,
                y: row.y,
                width: row.width,
                height: row.height,
                hidden: row.hidden,
                actor_id: row.actor_id,
                player_owned: row.player_owned,
                flags: row.flags,
                config,
                version: row.version,
            };
            (row.id, token)
        })
        .collect())
}

/// Upsert a batch of tokens in one transaction.
///
/// # Errors
///
/// Returns a database error if any statement or the commit fails.
pub async fn flush_tokens(pool: &PgPool, tokens: &[Token]) -> Result<(), sqlx::Error> {
    if tokens.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for token in tokens {
        sqlx::query(
            "INSERT INTO scene_tokens (id, scene_id, name, x, y, width, height, hidden, actor_id, player_owned, flags, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name,
               x = EXCLUDED.x,
               y = EXCLUDED.y,
               width = EXCLUDED.width,
               height = EXCLUDED.height,
               hidden = EXCLUDED.hidden,
               actor_id = EXCLUDED.actor_id,
               player_owned = EXCLUDED.player_owned,
               flags = EXCLUDED.flags,
               version = EXCLUDED.version",
        )
        .bind(token.id)
        .bind(token.scene_id)
        .bind(&token.name)
        .bind(token.x)
        .bind(token.y)
        .bind(token.width)
        .bind(token.height)
        .bind(token.hidden)
        .bind(token.actor_id)
        .bind(token.player_owned)
        .bind(&token.flags)
        .bind(token.version)
        .execute(tx.as_mut())
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "scene_test.rs"]
mod tests;
