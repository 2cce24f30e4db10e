//! Tool server lifecycle: scoped resource acquisition, dispatch, and teardown.
mod context;
mod server;
mod state;

pub use context::{ReleaseFailure, ReleaseReport, Resource, ResourceProvider, SharedContext};
pub use server::{LifecycleSettings, ShutdownReport, ToolServer, ToolServerBuilder};
pub use state::ServerState;
