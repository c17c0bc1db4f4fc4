//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation. The visibility
//! resolver and distance engine are pure; everything stateful flows
//! through `AppState`.

pub mod distance;
pub mod forms;
pub mod persistence;
pub mod scene;
pub mod stealth;
pub mod token;
pub mod visibility;
pub mod writer;
