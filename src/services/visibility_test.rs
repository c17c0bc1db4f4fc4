use super::*;
use crate::config::VisibilityConfig;
use crate::state::test_helpers::{self, anchor_token, dummy_token, thresholded_token};
use crate::state::SceneGrid;

fn scene_with(grid: SceneGrid, tokens: Vec<Token>) -> SceneState {
    let mut scene = SceneState::new(grid);
    for token in tokens {
        scene.tokens.insert(token.id, token);
    }
    scene
}

/// Place a 1×1 token so its center lands on (`cx`, `cy`) for 100px cells.
fn centered(mut token: Token, cx: f64, cy: f64) -> Token {
    token.x = cx - 50.0;
    token.y = cy - 50.0;
    token
}

fn token_with_flags(flags: serde_json::Value, hidden: bool) -> Token {
    let config = VisibilityConfig::from_flags(&flags);
    Token { flags, config, hidden, ..dummy_token() }
}

#[test]
fn player_owned_always_resolves_visible() {
    // Even hidden, even thresholded, even with zero other anchors.
    let mut player = thresholded_token(5.0);
    player.player_owned = true;
    player.hidden = true;
    let id = player.id;

    let scene = scene_with(SceneGrid::default(), vec![player]);
    let updates = resolve(&scene);
    assert_eq!(updates, vec![VisibilityUpdate { token_id: id, hidden: false }]);
}

#[test]
fn player_owned_already_visible_emits_nothing() {
    let mut player = anchor_token();
    player.hidden = false;
    let scene = scene_with(SceneGrid::default(), vec![player]);
    assert!(resolve(&scene).is_empty());
}

#[test]
fn invalid_thresholds_preserve_current_state() {
    for flags in [
        serde_json::json!({}),
        serde_json::json!({"min_visible_distance": null}),
        serde_json::json!({"min_visible_distance": 0}),
        serde_json::json!({"min_visible_distance": -5}),
        serde_json::json!({"min_visible_distance": ""}),
        serde_json::json!({"min_visible_distance": "close"}),
    ] {
        for hidden in [true, false] {
            let scene = scene_with(
                SceneGrid::default(),
                vec![token_with_flags(flags.clone(), hidden), anchor_token()],
            );
            assert!(resolve(&scene).is_empty(), "flags: {flags}, hidden: {hidden}");
        }
    }
}

#[test]
fn zero_anchors_hides_thresholded_token() {
    let mut target = thresholded_token(1000.0);
    target.hidden = false;
    let id = target.id;

    let scene = scene_with(SceneGrid::default(), vec![target]);
    let updates = resolve(&scene);
    assert_eq!(updates, vec![VisibilityUpdate { token_id: id, hidden: true }]);
}

#[test]
fn zero_anchors_already_hidden_emits_nothing() {
    let scene = scene_with(SceneGrid::default(), vec![thresholded_token(1000.0)]);
    assert!(resolve(&scene).is_empty());
}

#[test]
fn grid_example_reveals_within_threshold() {
    // 100px cells, 5 ft per cell: anchor center (0,0), target center (200,0)
    // is 10 ft out, threshold 10 ft, within-or-equal reveals.
    let anchor = centered(anchor_token(), 0.0, 0.0);
    let target = centered(thresholded_token(10.0), 200.0, 0.0);
    let id = target.id;

    let scene = scene_with(SceneGrid::default(), vec![anchor, target]);
    let updates = resolve(&scene);
    assert_eq!(updates, vec![VisibilityUpdate { token_id: id, hidden: false }]);
}

#[test]
fn grid_example_hides_beyond_threshold() {
    // Same layout moved to center (300,0): 15 ft > 10 ft.
    let anchor = centered(anchor_token(), 0.0, 0.0);
    let mut target = centered(thresholded_token(10.0), 300.0, 0.0);
    target.hidden = false;
    let id = target.id;

    let scene = scene_with(SceneGrid::default(), vec![anchor, target]);
    let updates = resolve(&scene);
    assert_eq!(updates, vec![VisibilityUpdate { token_id: id, hidden: true }]);
}

#[test]
fn exact_boundary_favors_visible() {
    let anchor = centered(anchor_token(), 0.0, 0.0);
    let target = centered(thresholded_token(10.0), 200.0, 0.0);
    let id = target.id;

    let scene = scene_with(SceneGrid::default(), vec![anchor, target]);
    // Distance is exactly the threshold; ≤ reveals, < would not.
    assert_eq!(resolve(&scene), vec![VisibilityUpdate { token_id: id, hidden: false }]);
}

#[test]
fn nearest_anchor_decides() {
    let far = centered(anchor_token(), 10_000.0, 0.0);
    let near = centered(anchor_token(), 100.0, 0.0);
    let target = centered(thresholded_token(10.0), 0.0, 0.0);
    let id = target.id;

    let scene = scene_with(SceneGrid::default(), vec![far, near, target]);
    assert_eq!(resolve(&scene), vec![VisibilityUpdate { token_id: id, hidden: false }]);
}

#[test]
fn metric_scene_converts_threshold() {
    // 100px cells of 1 meter each. 100 ft threshold = 30.48 m; a target
    // 3000px (30 m) out is revealed, one 3100px (31 m) out is not.
    let grid = SceneGrid { cell_px: 100.0, distance_per_cell: 1.0, units: "meters".into() };

    let anchor = centered(anchor_token(), 0.0, 0.0);
    let near = centered(thresholded_token(100.0), 3000.0, 0.0);
    let near_id = near.id;
    let scene = scene_with(grid.clone(), vec![anchor.clone(), near]);
    assert_eq!(resolve(&scene), vec![VisibilityUpdate { token_id: near_id, hidden: false }]);

    let mut far = centered(thresholded_token(100.0), 3100.0, 0.0);
    far.hidden = false;
    let far_id = far.id;
    let scene = scene_with(grid, vec![anchor, far]);
    assert_eq!(resolve(&scene), vec![VisibilityUpdate { token_id: far_id, hidden: true }]);
}

#[test]
fn resolve_twice_is_idempotent() {
    let anchor = centered(anchor_token(), 0.0, 0.0);
    let target = centered(thresholded_token(10.0), 200.0, 0.0);

    let mut scene = scene_with(SceneGrid::default(), vec![anchor, target]);
    let updates = resolve(&scene);
    assert_eq!(updates.len(), 1);

    for update in updates {
        scene.tokens.get_mut(&update.token_id).unwrap().hidden = update.hidden;
    }
    assert!(resolve(&scene).is_empty());
}

#[tokio::test]
async fn recompute_scene_not_loaded() {
    let state = test_helpers::test_app_state();
    let result = recompute_scene_visibility(&state, uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(VisibilityError::SceneNotLoaded(_))));
}

#[tokio::test]
async fn recompute_with_no_changes_writes_nothing() {
    // Anchor + already-correct target: empty update set, no store traffic,
    // so this runs against the lazy dummy pool.
    let state = test_helpers::test_app_state();
    let anchor = centered(anchor_token(), 0.0, 0.0);
    let mut target = centered(thresholded_token(10.0), 200.0, 0.0);
    target.hidden = false;
    let scene_id = test_helpers::seed_scene_with_tokens(&state, vec![anchor, target]).await;

    let applied = recompute_scene_visibility(&state, scene_id).await.unwrap();
    assert_eq!(applied, 0);
}

#[tokio::test]
#[ignore = "applies the update batch via sqlx"]
async fn recompute_applies_batch() {
    let state = test_helpers::test_app_state();
    let anchor = centered(anchor_token(), 0.0, 0.0);
    let target = centered(thresholded_token(10.0), 200.0, 0.0);
    let scene_id = test_helpers::seed_scene_with_tokens(&state, vec![anchor, target]).await;
    let _ = recompute_scene_visibility(&state, scene_id).await;
}
