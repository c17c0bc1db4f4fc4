use super::*;
use crate::state::test_helpers;
use crate::state::SceneGrid;
use tokio::time::{Duration, timeout};

fn scene() -> SceneState {
    SceneState::new(SceneGrid::default())
}

#[tokio::test]
async fn no_privileged_participants_means_no_writer() {
    let mut s = scene();
    let (tx, _rx) = mpsc::channel(4);
    s.add_participant(Uuid::new_v4(), Uuid::new_v4(), "player", false, tx);
    assert_eq!(current_writer(&s), None);
}

#[tokio::test]
async fn first_privileged_by_join_order_wins() {
    let mut s = scene();
    let (tx, _rx_a) = mpsc::channel(4);
    let (tx_b, _rx_b) = mpsc::channel(4);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    s.add_participant(first, Uuid::new_v4(), "gm-1", true, tx);
    s.add_participant(second, Uuid::new_v4(), "gm-2", true, tx_b);

    assert_eq!(current_writer(&s), Some(first));
}

#[tokio::test]
async fn closed_channel_yields_to_next_active_privileged() {
    let mut s = scene();
    let (tx_dead, rx_dead) = mpsc::channel::<crate::frame::Frame>(4);
    let (tx_live, _rx_live) = mpsc::channel(4);
    let dead = Uuid::new_v4();
    let live = Uuid::new_v4();
    s.add_participant(dead, Uuid::new_v4(), "gm-gone", true, tx_dead);
    s.add_participant(live, Uuid::new_v4(), "gm-here", true, tx_live);

    drop(rx_dead);
    assert_eq!(current_writer(&s), Some(live));
}

#[tokio::test]
async fn all_channels_closed_falls_back_to_first_privileged() {
    let mut s = scene();
    let (tx, rx) = mpsc::channel::<crate::frame::Frame>(4);
    let only = Uuid::new_v4();
    s.add_participant(only, Uuid::new_v4(), "gm", true, tx);
    drop(rx);

    assert_eq!(current_writer(&s), Some(only));
}

#[tokio::test]
async fn non_writer_request_forwards_to_writer_channel() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let gm = Uuid::new_v4();
    let player = Uuid::new_v4();
    let (tx_gm, mut rx_gm) = mpsc::channel(8);
    let (tx_player, _rx_player) = mpsc::channel(8);

    {
        let mut scenes = state.scenes.write().await;
        let s = scenes.get_mut(&scene_id).unwrap();
        s.add_participant(gm, Uuid::new_v4(), "gm", true, tx_gm);
        s.add_participant(player, Uuid::new_v4(), "player", false, tx_player);
    }

    request_apply_all(&state, scene_id, Some(player)).await;

    let frame = timeout(Duration::from_millis(200), rx_gm.recv())
        .await
        .expect("forward timed out")
        .expect("writer channel closed");
    assert_eq!(frame.syscall, "visibility:apply_all");
    assert_eq!(frame.scene_id, Some(scene_id));
    assert_eq!(
        frame.data.get(FRAME_OPERATION).and_then(|v| v.as_str()),
        Some(OP_APPLY_ALL)
    );
}

#[tokio::test]
async fn writer_request_is_not_forwarded_back() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let gm = Uuid::new_v4();
    let (tx_gm, mut rx_gm) = mpsc::channel(8);

    {
        let mut scenes = state.scenes.write().await;
        scenes
            .get_mut(&scene_id)
            .unwrap()
            .add_participant(gm, Uuid::new_v4(), "gm", true, tx_gm);
    }

    // Empty scene: the debounced recompute resolves nothing and writes nothing.
    request_apply_all(&state, scene_id, Some(gm)).await;

    assert!(
        timeout(Duration::from_millis(120), rx_gm.recv()).await.is_err(),
        "writer should not receive its own apply-all"
    );
}

#[tokio::test]
async fn no_writer_is_a_silent_skip() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let player = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(8);

    {
        let mut scenes = state.scenes.write().await;
        scenes
            .get_mut(&scene_id)
            .unwrap()
            .add_participant(player, Uuid::new_v4(), "player", false, tx);
    }

    request_apply_all(&state, scene_id, Some(player)).await;
    assert!(timeout(Duration::from_millis(120), rx.recv()).await.is_err());
}

#[tokio::test]
async fn unloaded_scene_is_a_silent_skip() {
    let state = test_helpers::test_app_state();
    request_apply_all(&state, Uuid::new_v4(), None).await;
}
