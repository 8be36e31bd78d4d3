//! Collaborator interfaces the bridge consumes.
//!
//! The evaluation gateway and the engine lifecycle are external services as
//! far as the dispatch layer is concerned. Each trait has a `Noop`
//! implementation that fails politely, allowing the bridge to run standalone
//! before an engine is wired in.

use {
    async_trait::async_trait,
    commbridge_protocol::{EngineStatus, EvalResult},
};

/// Error type returned by collaborator methods.
///
/// For the evaluation gateway this always means a transport fault: the
/// engine itself reports evaluation failures through `EvalResult::is_error`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ── Evaluation gateway ──────────────────────────────────────────────────────

#[async_trait]
pub trait EvalGateway: Send + Sync {
    /// Evaluate one expression in the engine.
    async fn send_eval(&self, expression: &str) -> ServiceResult<EvalResult>;
}

pub struct NoopEvalGateway;

#[async_trait]
impl EvalGateway for NoopEvalGateway {
    async fn send_eval(&self, _expression: &str) -> ServiceResult<EvalResult> {
        Err("evaluation gateway not configured".into())
    }
}

// ── Engine lifecycle ────────────────────────────────────────────────────────

#[async_trait]
pub trait EngineLifecycle: Send + Sync {
    /// Whether an engine is already bound to this bridge session.
    async fn is_engine_bound(&self) -> bool;
    /// Start the engine and bind it to this session, returning once it is up.
    async fn start_engine_and_bind(&self) -> ServiceResult<()>;
    async fn fetch_engine_status(&self) -> ServiceResult<EngineStatus>;
}

pub struct NoopEngineLifecycle;

#[async_trait]
impl EngineLifecycle for NoopEngineLifecycle {
    async fn is_engine_bound(&self) -> bool {
        false
    }

    async fn start_engine_and_bind(&self) -> ServiceResult<()> {
        Err("engine lifecycle not configured".into())
    }

    async fn fetch_engine_status(&self) -> ServiceResult<EngineStatus> {
        Err("engine lifecycle not configured".into())
    }
}
