use std::{sync::Arc, time::Instant};

use {
    commbridge_config::ActionsConfig,
    commbridge_service_traits::{
        EngineLifecycle, EvalGateway, NoopEngineLifecycle, NoopEvalGateway,
    },
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::error::BridgeError;

/// Shared, process-wide bridge state handed to every action handler.
pub struct BridgeState {
    pub version: String,
    pub eval: Arc<dyn EvalGateway>,
    pub engine: Arc<dyn EngineLifecycle>,
    pub actions: ActionsConfig,
    /// Held for the whole of a startup attempt.
    startup: Mutex<()>,
    started_at: Instant,
}

impl BridgeState {
    pub fn new(
        eval: Arc<dyn EvalGateway>,
        engine: Arc<dyn EngineLifecycle>,
        actions: ActionsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            eval,
            engine,
            actions,
            startup: Mutex::new(()),
            started_at: Instant::now(),
        })
    }

    /// State with no engine attached. Actions that need one fail with a
    /// transport error.
    pub fn detached(actions: ActionsConfig) -> Arc<Self> {
        Self::new(
            Arc::new(NoopEvalGateway),
            Arc::new(NoopEngineLifecycle),
            actions,
        )
    }

    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Start the engine unless it is already bound.
    ///
    /// Concurrent callers queue on the startup lock; whoever gets it second
    /// finds the engine bound and returns without a second attempt. Returns
    /// whether this call performed the startup.
    pub async fn ensure_engine_started(&self) -> Result<bool, BridgeError> {
        let _guard = self.startup.lock().await;
        if self.engine.is_engine_bound().await {
            debug!("engine already bound, skipping startup");
            return Ok(false);
        }
        info!("engine not bound, starting");
        self.engine
            .start_engine_and_bind()
            .await
            .map_err(|e| BridgeError::EngineStartup(e.to_string()))?;
        Ok(true)
    }
}
