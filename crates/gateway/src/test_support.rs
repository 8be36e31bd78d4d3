//! Scripted collaborators for unit tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    commbridge_config::ActionsConfig,
    commbridge_protocol::{EngineStatus, Envelope, EvalResult, Map, Value},
    commbridge_service_traits::{EngineLifecycle, EvalGateway, ServiceError, ServiceResult},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

use crate::{actions::ActionContext, channel::ChannelHandle, state::BridgeState};

type Responder = Box<dyn Fn(&str, u32) -> ServiceResult<EvalResult> + Send + Sync>;

/// Evaluation gateway answering from a closure and recording every call.
pub struct MockEval {
    responder: Responder,
    calls: AtomicU32,
    expressions: Mutex<Vec<String>>,
}

impl MockEval {
    /// The closure receives the expression and the 1-based call number.
    pub fn new(
        responder: impl Fn(&str, u32) -> ServiceResult<EvalResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicU32::new(0),
            expressions: Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::always(EvalResult::success(""))
    }

    pub fn always(result: EvalResult) -> Arc<Self> {
        Self::new(move |_, _| Ok(result.clone()))
    }

    pub fn unreachable() -> Arc<Self> {
        Self::new(|_, _| Err(ServiceError::message("connection refused")))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn expressions(&self) -> Vec<String> {
        self.expressions
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EvalGateway for MockEval {
    async fn send_eval(&self, expression: &str) -> ServiceResult<EvalResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut log) = self.expressions.lock() {
            log.push(expression.to_string());
        }
        (self.responder)(expression, n)
    }
}

/// Engine lifecycle with a switchable bound flag and a startup counter.
pub struct MockEngine {
    bound: AtomicBool,
    starts: AtomicU32,
    start_error: Option<String>,
    startup_delay: Duration,
    status: Result<EngineStatus, String>,
}

impl MockEngine {
    fn build(bound: bool) -> Self {
        Self {
            bound: AtomicBool::new(bound),
            starts: AtomicU32::new(0),
            start_error: None,
            startup_delay: Duration::ZERO,
            status: Ok(EngineStatus {
                licensed: true,
                status: "up".into(),
                extra: Value::Null,
            }),
        }
    }

    pub fn bound() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    pub fn unbound() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    pub fn slow_start(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            startup_delay: delay,
            ..Self::build(false)
        })
    }

    pub fn failing_start(message: &str) -> Arc<Self> {
        Arc::new(Self {
            start_error: Some(message.to_string()),
            ..Self::build(false)
        })
    }

    pub fn with_status(status: Result<EngineStatus, String>) -> Arc<Self> {
        Arc::new(Self {
            status,
            ..Self::build(true)
        })
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLifecycle for MockEngine {
    async fn is_engine_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    async fn start_engine_and_bind(&self) -> ServiceResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !self.startup_delay.is_zero() {
            tokio::time::sleep(self.startup_delay).await;
        }
        if let Some(message) = &self.start_error {
            return Err(ServiceError::message(message));
        }
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_engine_status(&self) -> ServiceResult<EngineStatus> {
        self.status.clone().map_err(ServiceError::message)
    }
}

pub fn state_with(eval: Arc<MockEval>, engine: Arc<MockEngine>) -> Arc<BridgeState> {
    BridgeState::new(eval, engine, ActionsConfig::default())
}

pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Handler context on a fresh channel `c1`. The receiver sees every frame
/// sent on that channel.
pub fn context(
    action: &str,
    data: Map<String, Value>,
    eval: Arc<MockEval>,
    engine: Arc<MockEngine>,
) -> (ActionContext, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = ActionContext {
        envelope: Envelope::new("c1", action, data),
        state: state_with(eval, engine),
        channel: ChannelHandle::new("c1", "commbridge", tx, CancellationToken::new()),
    };
    (ctx, rx)
}
