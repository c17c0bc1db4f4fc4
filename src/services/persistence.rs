//! Persistence service — background flush for dirty tokens.
//!
//! DESIGN
//! ======
//! A background task flushes dirty tokens, then sleeps before the next
//! cycle. Token mutations land in memory first so websocket handling never
//! blocks on Postgres I/O; this worker trails behind and upserts whatever
//! changed.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after successful writes, and only for the
//! version that was actually flushed. Repeated upserts are acceptable,
//! silent data loss is not.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::state::{AppState, Token};

const DEFAULT_TOKEN_FLUSH_INTERVAL_MS: u64 = 100;

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Spawn the background persistence task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState) -> JoinHandle<()> {
    let flush_interval_ms = env_parse("TOKEN_FLUSH_INTERVAL_MS", DEFAULT_TOKEN_FLUSH_INTERVAL_MS);
    info!(flush_interval_ms, "token persistence flush configured");
    tokio::spawn(async move {
        loop {
            flush_all_dirty(&state).await;
            tokio::time::sleep(Duration::from_millis(flush_interval_ms)).await;
        }
    })
}

async fn flush_all_dirty(state: &AppState) {
    // PHASE: SNAPSHOT DIRTY TOKENS
    // WHY: collect immutable clones under lock, then perform I/O lock-free.
    let batches = {
        let mut scenes = state.scenes.write().await;
        let mut collected = Vec::new();

        for (scene_id, scene_state) in scenes.iter_mut() {
            if scene_state.dirty.is_empty() {
                continue;
            }

            let tokens = scene_state
                .dirty
                .iter()
                .filter_map(|id| scene_state.tokens.get(id).cloned())
                .collect::<Vec<_>>();
            if tokens.is_empty() {
                continue;
            }
            let versions = tokens
                .iter()
                .map(|token| (token.id, token.version))
                .collect::<Vec<_>>();
            collected.push(DirtyFlushBatch { scene_id: *scene_id, tokens, flushed_versions: versions });
        }

        collected
    };

    // PHASE: FLUSH PER SCENE + ACK DIRTY IDS
    // WHY: if flush fails we intentionally keep dirty flags for retry.
    for batch in batches {
        match crate::services::scene::flush_tokens(&state.pool, &batch.tokens).await {
            Ok(()) => {
                clear_flushed_dirty_ids(state, batch.scene_id, &batch.flushed_versions).await;
            }
            Err(e) => {
                error!(error = %e, count = batch.tokens.len(), scene_id = %batch.scene_id, "persistence flush failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) async fn flush_all_dirty_for_tests(state: &AppState) {
    flush_all_dirty(state).await;
}

#[derive(Debug)]
struct DirtyFlushBatch {
    scene_id: Uuid,
    tokens: Vec<Token>,
    flushed_versions: Vec<(Uuid, i32)>,
}

pub(crate) async fn clear_flushed_dirty_ids(state: &AppState, scene_id: Uuid, flushed_versions: &[(Uuid, i32)]) {
    let mut scenes = state.scenes.write().await;
    let Some(scene_state) = scenes.get_mut(&scene_id) else {
        return;
    };

    for (token_id, flushed_version) in flushed_versions {
        // EDGE: keep dirty flag if token was updated again after snapshot.
        let can_clear = match scene_state.tokens.get(token_id) {
            Some(current) => current.version == *flushed_version,
            None => true,
        };
        if can_clear {
            scene_state.dirty.remove(token_id);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
