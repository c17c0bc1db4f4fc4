//! Stealth-on-creation trigger.
//!
//! DESIGN
//! ======
//! When a token configured with `stealth_on_create` enters a scene, a single
//! Stealth check is rolled for it and announced to the scene as a chat
//! frame. The roll is fire-and-forget: it runs on its own task after a short
//! delay so the token has finished registering in the scene graph, and a
//! failed roll is logged and swallowed — token creation never depends on it.
//!
//! Only the creation observed by the current writer schedules a roll, so a
//! table full of clients produces exactly one check per token.
//!
//! The actual roll mechanics belong to an external rules engine; the
//! `SkillRoller` trait is the seam, with a plain d20 roller as default.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::{scene, writer};
use crate::state::{AppState, Token};

const DEFAULT_STEALTH_ROLL_DELAY_MS: u64 = 400;

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// ROLLER SEAM
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RollError {
    #[error("roll failed: {0}")]
    Failed(String),
}

/// Outcome of one skill check.
#[derive(Debug, Clone, Serialize)]
pub struct SkillRoll {
    pub skill: String,
    pub die: i64,
    pub modifier: i64,
    pub total: i64,
    pub formula: String,
}

/// Dice-rolling collaborator. Implementations may defer to a full rules
/// engine; the default is a flat d20.
#[async_trait]
pub trait SkillRoller: Send + Sync {
    async fn roll_skill(&self, skill: &str, modifier: i64) -> Result<SkillRoll, RollError>;
}

/// Uniform 1d20 + modifier.
pub struct DiceRoller;

#[async_trait]
impl SkillRoller for DiceRoller {
    async fn roll_skill(&self, skill: &str, modifier: i64) -> Result<SkillRoll, RollError> {
        let die: i64 = rand::rng().random_range(1..=20);
        let formula = if modifier == 0 { "1d20".to_string() } else { format!("1d20{modifier:+}") };
        Ok(SkillRoll { skill: skill.to_string(), die, modifier, total: die + modifier, formula })
    }
}

// =============================================================================
// TRIGGER
// =============================================================================

/// Schedule a Stealth check for a freshly created token, if its config asks
/// for one and `created_by` is the scene's current writer.
pub async fn maybe_schedule_stealth_check(state: &AppState, scene_id: Uuid, token: &Token, created_by: Uuid) {
    if !token.config.stealth_on_create {
        return;
    }

    let is_writer = {
        let scenes = state.scenes.read().await;
        scenes
            .get(&scene_id)
            .is_some_and(|s| writer::current_writer(s) == Some(created_by))
    };
    if !is_writer {
        return;
    }

    let Some(roller) = state.roller.clone() else {
        debug!(%scene_id, token_id = %token.id, "no roller configured; skipping stealth check");
        return;
    };

    let delay = Duration::from_millis(env_parse("STEALTH_ROLL_DELAY_MS", DEFAULT_STEALTH_ROLL_DELAY_MS));
    let state = state.clone();
    let token_id = token.id;
    let token_name = token.name.clone();
    let modifier = token.config.stealth_modifier;

    tokio::spawn(async move {
        // Let the token finish registering in the renderable scene graph.
        tokio::time::sleep(delay).await;

        match roller.roll_skill("Stealth", modifier).await {
            Ok(roll) => {
                info!(%scene_id, %token_id, total = roll.total, "stealth check rolled");
                let mut data = Data::new();
                data.insert("token_id".into(), serde_json::json!(token_id));
                data.insert("token_name".into(), serde_json::json!(token_name));
                data.insert("roll".into(), serde_json::to_value(&roll).unwrap_or_default());
                let frame = Frame::request("chat:roll", data).with_scene_id(scene_id);
                scene::broadcast(&state, scene_id, &frame, None).await;
            }
            Err(e) => {
                warn!(error = %e, %scene_id, %token_id, "stealth check failed");
            }
        }
    });
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "stealth_test.rs"]
mod tests;
