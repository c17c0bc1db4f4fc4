//! Visibility resolver — proximity-based hidden-state recomputation.
//!
//! DESIGN
//! ======
//! `resolve` is a pure diff over an immutable scene snapshot: for every
//! token it computes the desired hidden state from the distance to the
//! nearest player-owned anchor and emits an update ONLY where the desired
//! state differs from the stored one. `recompute_scene_visibility` is the
//! idempotent async entry point: snapshot, resolve, apply the batch as one
//! transaction, commit to memory, broadcast to scene clients.
//!
//! ERROR HANDLING
//! ==============
//! The resolver itself cannot fail: malformed thresholds preserve the
//! token's current state and an empty anchor set resolves to hidden. Store
//! rejection of the write batch is logged and surfaced to the caller with
//! no retry — the next triggering event recomputes from scratch.

use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::{distance, scene};
use crate::state::{AppState, SceneState, Token};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VisibilityError {
    #[error("scene not loaded: {0}")]
    SceneNotLoaded(Uuid),
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for VisibilityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SceneNotLoaded(_) => "E_SCENE_NOT_LOADED",
            Self::Store(_) => "E_STORE",
        }
    }
}

/// One entry of the minimal update set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisibilityUpdate {
    pub token_id: Uuid,
    pub hidden: bool,
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Compute the minimal set of hidden-state changes for a scene snapshot.
///
/// Evaluation is independent per token; ordering carries no meaning.
#[must_use]
pub fn resolve(scene: &SceneState) -> Vec<VisibilityUpdate> {
    let anchors: Vec<&Token> = scene.tokens.values().filter(|t| t.player_owned).collect();

    scene
        .tokens
        .values()
        .filter_map(|token| {
            let desired = desired_hidden(token, &anchors, scene)?;
            (desired != token.hidden).then_some(VisibilityUpdate { token_id: token.id, hidden: desired })
        })
        .collect()
}

/// Desired hidden state for one token, or `None` to leave it untouched.
///
/// Player-owned tokens short-circuit to visible before any threshold logic.
/// A token without a valid positive threshold is never altered. With no
/// anchors on the scene there is no way to verify proximity, so thresholded
/// tokens stay concealed. Otherwise the token is revealed iff the nearest
/// anchor is within-or-equal the converted threshold.
fn desired_hidden(token: &Token, anchors: &[&Token], scene: &SceneState) -> Option<bool> {
    if token.player_owned {
        return Some(false);
    }

    let threshold_feet = token.config.min_visibility_distance_feet?;

    if anchors.is_empty() {
        return Some(true);
    }

    let cutoff = distance::convert_threshold_to_scene_units(threshold_feet, &scene.grid.units);
    let nearest = anchors
        .iter()
        .map(|anchor| distance::distance_between(token, anchor, &scene.grid))
        .fold(f64::INFINITY, f64::min);

    Some(!(nearest <= cutoff))
}

// =============================================================================
// RECOMPUTATION ENTRY POINT
// =============================================================================

/// Recompute and apply visibility for one scene. Idempotent — redundant
/// invocations resolve an empty update set and write nothing.
///
/// Returns the number of applied updates.
///
/// # Errors
///
/// Returns `SceneNotLoaded` if the scene isn't in memory, or `Store` if the
/// batch write is rejected.
pub async fn recompute_scene_visibility(state: &AppState, scene_id: Uuid) -> Result<usize, VisibilityError> {
    // PHASE: RESOLVE OVER SNAPSHOT
    // WHY: the resolver is sync and pure; hold the read lock only to diff.
    let updates = {
        let scenes = state.scenes.read().await;
        let scene = scenes
            .get(&scene_id)
            .ok_or(VisibilityError::SceneNotLoaded(scene_id))?;
        resolve(scene)
    };

    if updates.is_empty() {
        return Ok(0);
    }

    // PHASE: ATOMIC STORE WRITE
    if let Err(e) = apply_batch(state, scene_id, &updates).await {
        error!(error = %e, %scene_id, count = updates.len(), "visibility batch write rejected");
        return Err(VisibilityError::Store(e));
    }

    // PHASE: COMMIT TO MEMORY
    {
        let mut scenes = state.scenes.write().await;
        if let Some(scene) = scenes.get_mut(&scene_id) {
            for update in &updates {
                if let Some(token) = scene.tokens.get_mut(&update.token_id) {
                    token.hidden = update.hidden;
                    token.version += 1;
                }
            }
        }
    }

    info!(%scene_id, count = updates.len(), "visibility recomputed");

    // PHASE: NOTIFY SCENE CLIENTS
    let mut data = Data::new();
    data.insert("updates".into(), serde_json::to_value(&updates).unwrap_or_default());
    let frame = Frame::request("visibility:changed", data).with_scene_id(scene_id);
    scene::broadcast(state, scene_id, &frame, None).await;

    Ok(updates.len())
}

/// Apply the update set against the token collection of one scene as a
/// single transaction.
async fn apply_batch(state: &AppState, scene_id: Uuid, updates: &[VisibilityUpdate]) -> Result<(), sqlx::Error> {
    let mut tx = state.pool.begin().await?;
    for update in updates {
        sqlx::query("UPDATE scene_tokens SET hidden = $1, version = version + 1 WHERE id = $2 AND scene_id = $3")
            .bind(update.hidden)
            .bind(update.token_id)
            .bind(scene_id)
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
#[path = "visibility_test.rs"]
mod tests;
