use {commbridge_common::PollError, commbridge_service_traits::ServiceError};

/// Failures raised while routing or executing an action.
///
/// Every variant ends up as the `error` text of an `ActionResponse` except
/// [`BridgeError::ChannelState`] and [`BridgeError::ChannelInUse`], which are
/// reported before any handler runs.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A required payload field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    #[error("no open channel with id {channel_id}")]
    ChannelState { channel_id: String },

    /// `comm_open` for an id that another connection holds.
    #[error("channel id {channel_id} is held by another connection")]
    ChannelInUse { channel_id: String },

    #[error("unknown action: {action}")]
    UnknownAction { action: String },

    /// The engine evaluated the expression and reported a failure.
    #[error("{0}")]
    RemoteEvaluation(String),

    /// The evaluation gateway could not be reached.
    #[error("{0}")]
    Transport(#[from] ServiceError),

    #[error("timed out after {attempts} attempts ({budget_ms} ms)")]
    Timeout { attempts: u32, budget_ms: u128 },

    #[error("engine startup failed: {0}")]
    EngineStartup(String),

    #[error("cancelled: channel closed")]
    Cancelled,

    #[error("action handler panicked")]
    Panicked,
}

impl BridgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn channel_state(channel_id: impl Into<String>) -> Self {
        Self::ChannelState {
            channel_id: channel_id.into(),
        }
    }

    /// Stable name of the failure class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ChannelState { .. } => "channel_state",
            Self::ChannelInUse { .. } => "channel_in_use",
            Self::UnknownAction { .. } => "unknown_action",
            Self::RemoteEvaluation(_) => "remote_evaluation",
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::EngineStartup(_) => "engine_startup",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        }
    }
}

impl From<PollError<BridgeError>> for BridgeError {
    fn from(err: PollError<BridgeError>) -> Self {
        match err {
            PollError::Timeout {
                attempts,
                budget_ms,
                ..
            } => Self::Timeout {
                attempts,
                budget_ms,
            },
            PollError::Probe(e) => e,
            PollError::Cancelled { .. } => Self::Cancelled,
        }
    }
}
