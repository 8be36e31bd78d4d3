//! Comm bridge core: channel manager, action registry and handlers, and the
//! WebSocket host transport that feeds them.
//!
//! Lifecycle:
//! 1. Build a [`state::BridgeState`] around the evaluation gateway and engine lifecycle
//! 2. Wrap it in a [`channel::ChannelManager`] with the default [`actions::ActionRegistry`]
//! 3. Serve `/ws` (host frames) and `/health` via [`server::start_server`]

pub mod actions;
pub mod channel;
pub mod error;
pub mod paths;
pub mod server;
pub mod state;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use {
    actions::{ActionContext, ActionRegistry, ActionResult, HandlerFn},
    channel::{ChannelHandle, ChannelInfo, ChannelManager},
    error::BridgeError,
    state::BridgeState,
};
