//! Decision collaborator output dispatch.
//!
//! The reasoning service hands back an opaque structured payload. Our
//! only obligation is to pull out the known text fields and deliver
//! them: survivor-facing speech to the robot's TTS, operator messages
//! to the console. A malformed payload is dropped with a diagnostic,
//! never propagated as a control command.

use crate::protocol;
use crate::relay::channel::Channel;
use crate::state::SensorStore;
use log::warn;
use serde_json::Value;

/// Text fields extracted from a decision payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionOutput {
    pub survivor_speech: Option<String>,
    pub gui_message: Option<String>,
}

impl DecisionOutput {
    /// Parse a raw payload. `None` means the payload was not a JSON
    /// object and must be discarded.
    pub fn parse(raw: &str) -> Option<DecisionOutput> {
        let obj = match serde_json::from_str::<Value>(raw.trim()) {
            Ok(Value::Object(obj)) => obj,
            _ => return None,
        };

        let field = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Some(DecisionOutput {
            survivor_speech: field("survivor_speech"),
            gui_message: field("gui_message"),
        })
    }
}

/// Apply one decision payload: cache the raw text for replay/debug,
/// then hand the extracted fields to their channels.
pub async fn dispatch(raw: &str, state: &SensorStore, robot: &Channel, console: &Channel) {
    state.set_last_decision(raw.to_string());

    let Some(output) = DecisionOutput::parse(raw) else {
        warn!("Dropping malformed decision payload");
        return;
    };

    if let Some(speech) = output.survivor_speech {
        robot.send_line(&protocol::tts_line(&speech)).await;
    }
    if let Some(message) = output.gui_message {
        console.send_line(&protocol::gui_message_line(&message)).await;
    }
}
