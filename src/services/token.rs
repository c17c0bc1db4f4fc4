//! Token service — create, update, delete with LWW versioning.
//!
//! DESIGN
//! ======
//! Token mutations update in-memory state immediately, mark the token as
//! dirty for debounced persistence, and return the updated token for
//! broadcast. LWW conflict resolution: incoming version must be >= current
//! version, otherwise the update is rejected as stale.
//!
//! Every mutation is a visibility trigger: after the state change the
//! service routes an apply-all request through the writer (create, move,
//! resize, ownership change, delete all shift proximity math). Creation
//! additionally fires the stealth-on-create hook.

use uuid::Uuid;

use crate::config::VisibilityConfig;
use crate::frame::Data;
use crate::services::{stealth, writer};
use crate::state::{AppState, Token};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token not found: {0}")]
    NotFound(Uuid),
    #[error("scene not loaded: {0}")]
    SceneNotLoaded(Uuid),
    #[error("stale update: incoming version {incoming} < current {current}")]
    StaleUpdate { incoming: i32, current: i32 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for TokenError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_TOKEN_NOT_FOUND",
            Self::SceneNotLoaded(_) => "E_SCENE_NOT_LOADED",
            Self::StaleUpdate { .. } => "E_STALE_UPDATE",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Creation payload for a token.
#[derive(Debug, Clone)]
pub struct CreateToken {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub hidden: bool,
    pub actor_id: Option<Uuid>,
    pub player_owned: bool,
    pub flags: serde_json::Value,
    /// Flags of the originating template, if the token was stamped from one.
    pub template_flags: Option<serde_json::Value>,
}

impl Default for CreateToken {
    fn default() -> Self {
        Self {
            name: "Token".into(),
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            hidden: false,
            actor_id: None,
            player_owned: false,
            flags: serde_json::json!({}),
            template_flags: None,
        }
    }
}

// =============================================================================
// CREATE
// =============================================================================

/// Create a new token on a scene.
///
/// # Errors
///
/// Returns `SceneNotLoaded` if the scene isn't in memory.
pub async fn create_token(
    state: &AppState,
    scene_id: Uuid,
    draft: CreateToken,
    created_by: Uuid,
) -> Result<Token, TokenError> {
    let config = VisibilityConfig::from_flags_with_template(&draft.flags, draft.template_flags.as_ref());
    let token = Token {
        id: Uuid::new_v4(),
        scene_id,
        name: draft.name,
        x: draft.x,
        y: draft.y,
        width: draft.width,
        height: draft.height,
        hidden: draft.hidden,
        actor_id: draft.actor_id,
        player_owned: draft.player_owned,
        flags: draft.flags,
        config,
        version: 1,
    };

    {
        let mut scenes = state.scenes.write().await;
        let scene = scenes
            .get_mut(&scene_id)
            .ok_or(TokenError::SceneNotLoaded(scene_id))?;
        scene.dirty.insert(token.id);
        scene.tokens.insert(token.id, token.clone());
    }

    stealth::maybe_schedule_stealth_check(state, scene_id, &token, created_by).await;
    writer::request_apply_all(state, scene_id, Some(created_by)).await;

    Ok(token)
}

// =============================================================================
// UPDATE
// =============================================================================

/// Update an existing token with LWW conflict resolution.
///
/// Flag updates re-parse the typed config; ownership updates re-anchor the
/// scene. Either way a recomputation request is routed afterwards.
///
/// # Errors
///
/// Returns `StaleUpdate` if `incoming_version < current.version`.
pub async fn update_token(
    state: &AppState,
    scene_id: Uuid,
    token_id: Uuid,
    updates: &Data,
    incoming_version: i32,
    updated_by: Uuid,
) -> Result<Token, TokenError> {
    let updated = {
        let mut scenes = state.scenes.write().await;
        let scene = scenes
            .get_mut(&scene_id)
            .ok_or(TokenError::SceneNotLoaded(scene_id))?;
        let token = scene
            .tokens
            .get_mut(&token_id)
            .ok_or(TokenError::NotFound(token_id))?;

        // LWW: reject stale updates.
        if incoming_version < token.version {
            return Err(TokenError::StaleUpdate { incoming: incoming_version, current: token.version });
        }

        if let Some(name) = updates.get("name").and_then(|v| v.as_str()) {
            token.name = name.to_string();
        }
        if let Some(x) = updates.get("x").and_then(serde_json::Value::as_f64) {
            token.x = x;
        }
        if let Some(y) = updates.get("y").and_then(serde_json::Value::as_f64) {
            token.y = y;
        }
        if let Some(w) = updates.get("width").and_then(serde_json::Value::as_f64) {
            token.width = w;
        }
        if let Some(h) = updates.get("height").and_then(serde_json::Value::as_f64) {
            token.height = h;
        }
        if let Some(hidden) = updates.get("hidden").and_then(serde_json::Value::as_bool) {
            token.hidden = hidden;
        }
        if let Some(owned) = updates.get("player_owned").and_then(serde_json::Value::as_bool) {
            token.player_owned = owned;
        }
        if let Some(flags) = updates.get("flags") {
            token.flags = flags.clone();
            token.config = VisibilityConfig::from_flags(flags);
        }

        token.version += 1;
        scene.dirty.insert(token_id);

        token.clone()
    };

    writer::request_apply_all(state, scene_id, Some(updated_by)).await;

    Ok(updated)
}

// =============================================================================
// DELETE
// =============================================================================

/// Delete a token from a scene. Removes from memory and Postgres immediately.
///
/// # Errors
///
/// Returns `NotFound` if the token doesn't exist.
pub async fn delete_token(
    state: &AppState,
    scene_id: Uuid,
    token_id: Uuid,
    deleted_by: Uuid,
) -> Result<(), TokenError> {
    {
        let mut scenes = state.scenes.write().await;
        let scene = scenes
            .get_mut(&scene_id)
            .ok_or(TokenError::SceneNotLoaded(scene_id))?;

        if scene.tokens.remove(&token_id).is_none() {
            return Err(TokenError::NotFound(token_id));
        }
        scene.dirty.remove(&token_id);
    }

    // Delete from Postgres immediately (not deferred).
    sqlx::query("DELETE FROM scene_tokens WHERE id = $1")
        .bind(token_id)
        .execute(&state.pool)
        .await?;

    writer::request_apply_all(state, scene_id, Some(deleted_by)).await;

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
