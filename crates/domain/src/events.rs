use serde::Serialize;

use crate::message::Role;
use crate::stream::StreamChunk;

/// Events published on the run bus. Value-copied: subscribers never hold
/// references into runner state.
///
/// For a given `run_id` events arrive in emission order; ordering across
/// runs is unspecified.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ArenaEvent {
    #[serde(rename = "run.started")]
    RunStarted {
        run_id: String,
        scenario_id: String,
        provider_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },

    #[serde(rename = "turn.started")]
    TurnStarted {
        run_id: String,
        turn_index: usize,
        role: Role,
    },

    /// A streaming delta forwarded as it arrives from the provider.
    #[serde(rename = "chunk")]
    Chunk {
        run_id: String,
        turn_index: usize,
        chunk: StreamChunk,
    },

    #[serde(rename = "tool.invoked")]
    ToolInvoked {
        run_id: String,
        turn_index: usize,
        name: String,
        duration_ms: u64,
        is_error: bool,
    },

    #[serde(rename = "hook.denied")]
    HookDenied {
        run_id: String,
        turn_index: usize,
        hook: String,
        reason: String,
    },

    #[serde(rename = "turn.completed")]
    TurnCompleted {
        run_id: String,
        turn_index: usize,
        latency_ms: u64,
    },

    #[serde(rename = "run.completed")]
    RunCompleted { run_id: String, passed: bool },

    #[serde(rename = "run.failed")]
    RunFailed { run_id: String, error: String },
}

impl ArenaEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ArenaEvent::RunStarted { run_id, .. }
            | ArenaEvent::TurnStarted { run_id, .. }
            | ArenaEvent::Chunk { run_id, .. }
            | ArenaEvent::ToolInvoked { run_id, .. }
            | ArenaEvent::HookDenied { run_id, .. }
            | ArenaEvent::TurnCompleted { run_id, .. }
            | ArenaEvent::RunCompleted { run_id, .. }
            | ArenaEvent::RunFailed { run_id, .. } => run_id,
        }
    }
}
