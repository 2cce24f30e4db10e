use std::fmt;

use serde::Serialize;

/// Observable lifecycle state of a `ToolServer`.
///
/// `Uninitialized → Starting → Ready → ShuttingDown → Stopped`, with
/// `Starting → Stopped` when startup fails and `Uninitialized → Stopped` when
/// the server is stopped before it was ever started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Uninitialized,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

impl ServerState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServerState::Uninitialized => "uninitialized",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::ShuttingDown => "shutting_down",
            ServerState::Stopped => "stopped",
        }
    }

    /// Whether the transition `self → next` is part of the lifecycle.
    pub const fn can_transition_to(&self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (ServerState::Uninitialized, ServerState::Starting)
                | (ServerState::Uninitialized, ServerState::Stopped)
                | (ServerState::Starting, ServerState::Ready)
                | (ServerState::Starting, ServerState::Stopped)
                | (ServerState::Ready, ServerState::ShuttingDown)
                | (ServerState::ShuttingDown, ServerState::Stopped)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
