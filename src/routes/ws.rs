//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from scene peers → forward to client
//!
//! Handler functions are pure business logic — they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! reply to sender and broadcast to peers.
//!
//! Who a participant is (and whether they are a GM) is the host's concern;
//! the socket accepts it from query parameters and the coordination layer
//! takes it from there.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / broadcast / both)
//! 4. Close → broadcast `scene:part` → cleanup

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services;
use crate::state::{AppState, SceneGrid};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
enum Outcome {
    /// Broadcast done+data to ALL scene clients including sender.
    /// Sender's copy carries `parent_id` for correlation.
    Broadcast(Data),
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Reply to sender with one payload, broadcast different data to peers.
    ReplyAndBroadcast { reply: Data, broadcast: Data },
}

/// Identity of one connected client, parsed at upgrade time.
struct ClientCtx {
    client_id: Uuid,
    user_id: Uuid,
    name: String,
    privileged: bool,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params
        .get("user_id")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(Uuid::new_v4);
    let name = params
        .get("name")
        .cloned()
        .unwrap_or_else(|| "Player".to_string());
    let privileged = params
        .get("gm")
        .is_some_and(|v| v == "true" || v == "1");

    let ctx = ClientCtx { client_id: Uuid::new_v4(), user_id, name, privileged };
    ws.on_upgrade(move |socket| run_ws(socket, state, ctx))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, ctx: ClientCtx) {
    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", ctx.client_id.to_string())
        .with_data("user_id", ctx.user_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(client_id = %ctx.client_id, user_id = %ctx.user_id, privileged = ctx.privileged, "ws: client connected");

    // Track which scene this client has joined.
    let mut current_scene: Option<Uuid> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut current_scene, &ctx, &client_tx, text.as_str()).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Broadcast scene:part to peers BEFORE cleanup (part_scene may evict state).
    if let Some(scene_id) = current_scene {
        let mut part_data = Data::new();
        part_data.insert("client_id".into(), serde_json::json!(ctx.client_id));
        part_data.insert("user_id".into(), serde_json::json!(ctx.user_id));
        let part_frame = Frame::request("scene:part", part_data).with_scene_id(scene_id);
        services::scene::broadcast(&state, scene_id, &part_frame, Some(ctx.client_id)).await;

        services::scene::part_scene(&state, scene_id, ctx.client_id).await;
    }
    info!(client_id = %ctx.client_id, "ws: client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(frame) else {
        return Ok(());
    };
    socket.send(Message::Text(text.into())).await
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// This keeps the websocket transport concerns separate from frame handling,
/// so tests can exercise dispatch end-to-end over plain channels.
async fn process_inbound_text(
    state: &AppState,
    current_scene: &mut Option<Uuid>,
    ctx: &ClientCtx,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %ctx.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection identity as `from`.
    req.from = Some(ctx.user_id.to_string());

    let prefix = req.prefix();
    info!(client_id = %ctx.client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");

    let result = match prefix {
        "scene" => handle_scene(state, current_scene, ctx, client_tx, &req).await,
        "token" => handle_token(state, *current_scene, ctx, &req).await,
        "visibility" => handle_visibility(state, *current_scene, ctx, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome — the dispatch layer owns all outbound logic.
    let scene_id = *current_scene;
    match result {
        Ok(Outcome::Broadcast(data)) => {
            let sender_frame = req.done_with(data);
            // Peers get a copy without parent_id (they didn't originate the request).
            let mut peer_frame = sender_frame.clone();
            peer_frame.id = Uuid::new_v4();
            peer_frame.parent_id = None;
            if let Some(sid) = scene_id {
                services::scene::broadcast(state, sid, &peer_frame, Some(ctx.client_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::Reply(data)) => {
            vec![req.done_with(data)]
        }
        Ok(Outcome::Done) => {
            vec![req.done()]
        }
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            let sender_frame = req.done_with(reply);
            if let Some(sid) = scene_id {
                let notif = Frame::request(&req.syscall, broadcast).with_scene_id(sid);
                services::scene::broadcast(state, sid, &notif, Some(ctx.client_id)).await;
            }
            vec![sender_frame]
        }
        Err(err_frame) => {
            vec![err_frame]
        }
    }
}

// =============================================================================
// SCENE HANDLERS
// =============================================================================

async fn handle_scene(
    state: &AppState,
    current_scene: &mut Option<Uuid>,
    ctx: &ClientCtx,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(scene_id) = req.scene_id.or_else(|| {
                req.data
                    .get("scene_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            }) else {
                return Err(req.error("scene_id required"));
            };

            // Part current scene if already joined.
            if let Some(old_scene) = current_scene.take() {
                services::scene::part_scene(state, old_scene, ctx.client_id).await;
            }

            match services::scene::join_scene(
                state,
                scene_id,
                ctx.user_id,
                &ctx.name,
                ctx.privileged,
                ctx.client_id,
                client_tx.clone(),
            )
            .await
            {
                Ok(tokens) => {
                    *current_scene = Some(scene_id);

                    let mut reply = Data::new();
                    reply.insert("tokens".into(), serde_json::to_value(&tokens).unwrap_or_default());

                    let mut broadcast = Data::new();
                    broadcast.insert("client_id".into(), serde_json::json!(ctx.client_id));
                    broadcast.insert("user_id".into(), serde_json::json!(ctx.user_id));
                    broadcast.insert("name".into(), serde_json::json!(ctx.name));

                    Ok(Outcome::ReplyAndBroadcast { reply, broadcast })
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "part" => {
            if let Some(scene_id) = current_scene.take() {
                services::scene::part_scene(state, scene_id, ctx.client_id).await;
            }
            Ok(Outcome::Done)
        }
        "create" => {
            let name = req
                .data
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled Scene");
            let grid = grid_from_data(&req.data, &SceneGrid::default());
            match services::scene::create_scene(&state.pool, name, &grid).await {
                Ok(row) => {
                    let mut data = Data::new();
                    data.insert("id".into(), serde_json::json!(row.id));
                    data.insert("name".into(), serde_json::json!(row.name));
                    data.insert("grid".into(), serde_json::to_value(&row.grid).unwrap_or_default());
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "list" => match services::scene::list_scenes(&state.pool).await {
            Ok(scenes) => {
                let list: Vec<serde_json::Value> = scenes
                    .iter()
                    .map(|s| serde_json::json!({"id": s.id, "name": s.name, "units": s.grid.units}))
                    .collect();
                let mut data = Data::new();
                data.insert("scenes".into(), serde_json::json!(list));
                Ok(Outcome::Reply(data))
            }
            Err(e) => Err(req.error_from(&e)),
        },
        "delete" => {
            let Some(scene_id) = req
                .data
                .get("scene_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Err(req.error("scene_id required"));
            };
            match services::scene::delete_scene(&state.pool, scene_id).await {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "grid" => {
            let Some(scene_id) = *current_scene else {
                return Err(req.error("must join a scene first"));
            };
            let base = {
                let scenes = state.scenes.read().await;
                scenes
                    .get(&scene_id)
                    .map_or_else(SceneGrid::default, |s| s.grid.clone())
            };
            let grid = grid_from_data(&req.data, &base);
            match services::scene::update_grid(state, scene_id, &grid).await {
                Ok(()) => {
                    // Grid geometry shifted; every distance is stale.
                    services::writer::request_apply_all(state, scene_id, Some(ctx.client_id)).await;
                    let mut data = Data::new();
                    data.insert("grid".into(), serde_json::to_value(&grid).unwrap_or_default());
                    Ok(Outcome::Broadcast(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown scene op: {op}"))),
    }
}

fn grid_from_data(data: &Data, base: &SceneGrid) -> SceneGrid {
    SceneGrid {
        cell_px: data
            .get("cell_px")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(base.cell_px),
        distance_per_cell: data
            .get("distance_per_cell")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(base.distance_per_cell),
        units: data
            .get("units")
            .and_then(|v| v.as_str())
            .unwrap_or(base.units.as_str())
            .to_string(),
    }
}

// =============================================================================
// TOKEN HANDLERS
// =============================================================================

async fn handle_token(
    state: &AppState,
    current_scene: Option<Uuid>,
    ctx: &ClientCtx,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(scene_id) = current_scene else {
        return Err(req.error("must join a scene first"));
    };

    match req.op() {
        "create" => {
            let draft = services::token::CreateToken {
                name: req
                    .data
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Token")
                    .to_string(),
                x: req.data.get("x").and_then(serde_json::Value::as_f64).unwrap_or(0.0),
                y: req.data.get("y").and_then(serde_json::Value::as_f64).unwrap_or(0.0),
                width: req
                    .data
                    .get("width")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(1.0),
                height: req
                    .data
                    .get("height")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(1.0),
                hidden: req
                    .data
                    .get("hidden")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false),
                actor_id: req
                    .data
                    .get("actor_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok()),
                player_owned: req
                    .data
                    .get("player_owned")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false),
                flags: req
                    .data
                    .get("flags")
                    .cloned()
                    .unwrap_or(serde_json::json!({})),
                template_flags: req.data.get("template_flags").cloned(),
            };

            match services::token::create_token(state, scene_id, draft, ctx.client_id).await {
                Ok(token) => Ok(Outcome::Broadcast(token_to_data(&token))),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "update" => {
            let Some(token_id) = req
                .data
                .get("id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Err(req.error("id required"));
            };
            let version = req
                .data
                .get("version")
                .and_then(serde_json::Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(0);

            match services::token::update_token(state, scene_id, token_id, &req.data, version, ctx.client_id).await {
                Ok(token) => Ok(Outcome::Broadcast(token_to_data(&token))),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "delete" => {
            let Some(token_id) = req
                .data
                .get("id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Err(req.error("id required"));
            };

            match services::token::delete_token(state, scene_id, token_id, ctx.client_id).await {
                Ok(()) => {
                    let mut data = Data::new();
                    data.insert("id".into(), serde_json::json!(token_id));
                    Ok(Outcome::Broadcast(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown token op: {op}"))),
    }
}

fn token_to_data(token: &crate::state::Token) -> Data {
    let mut data = Data::new();
    data.insert("token".into(), serde_json::to_value(token).unwrap_or_default());
    data
}

// =============================================================================
// VISIBILITY HANDLERS
// =============================================================================

async fn handle_visibility(
    state: &AppState,
    current_scene: Option<Uuid>,
    ctx: &ClientCtx,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "apply_all" => {
            let Some(scene_id) = req.scene_id.or(current_scene) else {
                return Err(req.error("must join a scene first"));
            };
            services::writer::request_apply_all(state, scene_id, Some(ctx.client_id)).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown visibility op: {op}"))),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
