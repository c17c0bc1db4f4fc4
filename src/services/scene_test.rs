use super::*;
use crate::frame::Data;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

#[tokio::test]
async fn part_unknown_scene_is_noop() {
    let state = test_helpers::test_app_state();
    part_scene(&state, Uuid::new_v4(), Uuid::new_v4()).await;
}

#[tokio::test]
async fn part_evicts_clean_scene_when_last_client_leaves() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let client_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(4);

    {
        let mut scenes = state.scenes.write().await;
        scenes
            .get_mut(&scene_id)
            .unwrap()
            .add_participant(client_id, Uuid::new_v4(), "gm", true, tx);
    }

    part_scene(&state, scene_id, client_id).await;

    let scenes = state.scenes.read().await;
    assert!(!scenes.contains_key(&scene_id));
}

#[tokio::test]
async fn part_keeps_scene_while_clients_remain() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let leaving = Uuid::new_v4();
    let staying = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(4);

    {
        let mut scenes = state.scenes.write().await;
        let scene = scenes.get_mut(&scene_id).unwrap();
        scene.add_participant(leaving, Uuid::new_v4(), "player-1", false, tx.clone());
        scene.add_participant(staying, Uuid::new_v4(), "player-2", false, tx);
    }

    part_scene(&state, scene_id, leaving).await;

    let scenes = state.scenes.read().await;
    let scene = scenes.get(&scene_id).expect("scene should stay resident");
    assert!(!scene.participants.contains_key(&leaving));
    assert!(scene.participants.contains_key(&staying));
}

#[tokio::test]
async fn broadcast_reaches_all_scene_clients() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);

    {
        let mut scenes = state.scenes.write().await;
        let scene = scenes.get_mut(&scene_id).unwrap();
        scene.add_participant(Uuid::new_v4(), Uuid::new_v4(), "a", false, tx_a);
        scene.add_participant(Uuid::new_v4(), Uuid::new_v4(), "b", false, tx_b);
    }

    let frame = Frame::request("visibility:changed", Data::new()).with_scene_id(scene_id);
    broadcast(&state, scene_id, &frame, None).await;

    let a = timeout(Duration::from_millis(200), rx_a.recv())
        .await
        .expect("client A receive timed out")
        .expect("client A channel closed");
    let b = timeout(Duration::from_millis(200), rx_b.recv())
        .await
        .expect("client B receive timed out")
        .expect("client B channel closed");
    assert_eq!(a.syscall, "visibility:changed");
    assert_eq!(b.syscall, "visibility:changed");
}

#[tokio::test]
async fn broadcast_excludes_sender() {
    let state = test_helpers::test_app_state();
    let scene_id = test_helpers::seed_scene(&state).await;
    let sender = Uuid::new_v4();
    let (tx_sender, mut rx_sender) = mpsc::channel(8);
    let (tx_peer, mut rx_peer) = mpsc::channel(8);

    {
        let mut scenes = state.scenes.write().await;
        let scene = scenes.get_mut(&scene_id).unwrap();
        scene.add_participant(sender, Uuid::new_v4(), "sender", false, tx_sender);
        scene.add_participant(Uuid::new_v4(), Uuid::new_v4(), "peer", false, tx_peer);
    }

    let frame = Frame::request("token:update", Data::new()).with_scene_id(scene_id);
    broadcast(&state, scene_id, &frame, Some(sender)).await;

    assert!(
        timeout(Duration::from_millis(80), rx_sender.recv()).await.is_err(),
        "sender should not receive its own broadcast"
    );
    let peer = timeout(Duration::from_millis(200), rx_peer.recv())
        .await
        .expect("peer receive timed out")
        .expect("peer channel closed");
    assert_eq!(peer.syscall, "token:update");
}

#[tokio::test]
async fn flush_empty_batch_is_noop() {
    let state = test_helpers::test_app_state();
    flush_tokens(&state.pool, &[]).await.unwrap();
}

#[tokio::test]
#[ignore = "join_scene hydrates via sqlx"]
async fn join_scene_hydrates_from_store() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(4);
    let _ = join_scene(&state, Uuid::new_v4(), Uuid::new_v4(), "gm", true, Uuid::new_v4(), tx).await;
}

#[tokio::test]
#[ignore = "create_scene hits Postgres via sqlx::query"]
async fn create_scene_inserts_row() {
    let state = test_helpers::test_app_state();
    let _ = create_scene(&state.pool, "Ambush at the Ford", &SceneGrid::default()).await;
}
