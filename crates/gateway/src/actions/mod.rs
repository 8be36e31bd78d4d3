use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {
    commbridge_protocol::{ActionResponse, Envelope, actions},
    tokio_util::sync::CancellationToken,
};

use crate::{channel::ChannelHandle, error::BridgeError, state::BridgeState};

mod engine;
mod files;
mod notify;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every action handler.
pub struct ActionContext {
    pub envelope: Envelope,
    pub state: Arc<BridgeState>,
    pub channel: ChannelHandle,
}

impl ActionContext {
    /// Fires when the owning channel is closed or replaced.
    pub fn cancel(&self) -> &CancellationToken {
        self.channel.cancel_token()
    }

    pub fn action(&self) -> &str {
        &self.envelope.action
    }

    pub fn channel_id(&self) -> &str {
        &self.envelope.channel_id
    }
}

/// The result an action handler produces.
///
/// Handlers report expected failures inside the `Ok` response. An `Err` is
/// turned into an error response by the channel manager.
pub type ActionResult = Result<ActionResponse, BridgeError>;

/// A boxed async action handler.
pub type HandlerFn =
    Box<dyn Fn(ActionContext) -> Pin<Box<dyn Future<Output = ActionResult> + Send>> + Send + Sync>;

// ── Action registry ──────────────────────────────────────────────────────────

pub struct ActionRegistry {
    handlers: HashMap<String, HandlerFn>,
    fallback: HandlerFn,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Registry with every built-in action.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        reg.register_defaults();
        reg
    }

    /// Registry that resolves every tag to the unknown-action handler.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: unknown_action(),
        }
    }

    /// Add or replace the handler for `action`.
    pub fn register(&mut self, action: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(action.into(), handler);
    }

    /// Look up the handler for a tag. Never fails: unregistered tags get a
    /// handler that rejects with [`BridgeError::UnknownAction`].
    pub fn resolve(&self, action: &str) -> &HandlerFn {
        self.handlers.get(action).unwrap_or(&self.fallback)
    }

    /// Name of the handler `resolve` would pick, for logging.
    pub fn resolved_name<'a>(&self, action: &'a str) -> &'a str {
        if self.handlers.contains_key(action) {
            action
        } else {
            actions::UNKNOWN
        }
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_defaults(&mut self) {
        engine::register(self);
        files::register(self);
        notify::register(self);
    }
}

fn unknown_action() -> HandlerFn {
    Box::new(|ctx| {
        Box::pin(async move {
            Err(BridgeError::UnknownAction {
                action: ctx.envelope.action,
            })
        })
    })
}
