//! Single-writer coordination for authoritative visibility writes.
//!
//! DESIGN
//! ======
//! Exactly one privileged participant per scene performs the authoritative
//! hidden-state write; everyone else forwards a recomputation request to
//! that participant. There is no leader election protocol and no shared
//! mutable module state: `current_writer` is a pure lookup over the scene's
//! participant set, evaluated fresh on every request.
//!
//! Precedence: first privileged participant with an open channel (by join
//! order), else first privileged participant, else none. With no writer
//! reachable the request is silently dropped — the next triggering event
//! retries naturally, so there is no queue and no retry loop.

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame::{Data, FRAME_OPERATION, Frame};
use crate::services::visibility;
use crate::state::{AppState, SceneState};

/// Coordination operation name carried in forwarded frames.
pub const OP_APPLY_ALL: &str = "applyAll";

// =============================================================================
// ELECTION
// =============================================================================

/// The participant currently designated to perform authoritative writes.
#[must_use]
pub fn current_writer(scene: &SceneState) -> Option<Uuid> {
    let mut privileged: Vec<_> = scene.participants.values().filter(|p| p.privileged).collect();
    privileged.sort_by_key(|p| p.seq);

    privileged
        .iter()
        .find(|p| {
            scene
                .clients
                .get(&p.client_id)
                .is_some_and(|tx| !tx.is_closed())
        })
        .or_else(|| privileged.first())
        .map(|p| p.client_id)
}

// =============================================================================
// REQUEST ROUTING
// =============================================================================

/// Route a visibility recomputation request for a scene.
///
/// If the requesting client IS the current writer, a debounced recompute is
/// scheduled so event bursts within one window collapse into a single
/// resolver invocation. Otherwise the request is forwarded to the writer's
/// channel as a `visibility:apply_all` frame. With no writer reachable the
/// request is skipped silently.
pub async fn request_apply_all(state: &AppState, scene_id: Uuid, requested_by: Option<Uuid>) {
    let forward: Option<mpsc::Sender<Frame>> = {
        let scenes = state.scenes.read().await;
        let Some(scene) = scenes.get(&scene_id) else {
            debug!(%scene_id, "apply-all requested for unloaded scene; skipping");
            return;
        };

        match current_writer(scene) {
            None => {
                debug!(%scene_id, "no privileged writer reachable; skipping apply-all");
                None
            }
            Some(writer) if requested_by == Some(writer) => {
                let state = state.clone();
                scene.recompute.schedule(async move {
                    if let Err(e) = visibility::recompute_scene_visibility(&state, scene_id).await {
                        warn!(error = %e, %scene_id, "debounced visibility recompute failed");
                    }
                });
                None
            }
            Some(writer) => scene.clients.get(&writer).cloned(),
        }
    };

    if let Some(tx) = forward {
        let frame = Frame::request("visibility:apply_all", Data::new())
            .with_scene_id(scene_id)
            .with_data(FRAME_OPERATION, OP_APPLY_ALL)
            .with_data("scene_id", scene_id.to_string());
        if tx.send(frame).await.is_err() {
            debug!(%scene_id, "writer channel closed; skipping apply-all");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "writer_test.rs"]
mod tests;
