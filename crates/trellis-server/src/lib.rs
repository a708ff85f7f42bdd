//! Live-edit preview server for trellis content.
//!
//! Serves one content document, pushes re-renders to open pages over a
//! WebSocket, and applies editor messages those pages forward.

pub mod live;
pub mod server;
pub mod watcher;

pub use live::{live_client_script, LiveHub, LiveMessage};
pub use server::{router, DevServer, DevServerConfig, ServerError, ServerState, SharedState};
pub use watcher::{FileWatcher, WatchEvent};
