//! Rescue relay library.
//!
//! Bridges a field robot, an operator console, a vision inference
//! service and a live video feed over independent TCP channels, keeps
//! one staleness-aware record of sensed reality, and derives reactive
//! steering commands from vision detections.

pub mod config;
pub mod decision;
pub mod error;
pub mod follow;
pub mod persist;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod state;
pub mod vision;
