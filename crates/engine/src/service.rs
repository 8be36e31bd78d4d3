use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    commbridge_common::{PollError, PollOptions, PollOutcome, poll_with_timeout},
    commbridge_config::EngineConfig,
    commbridge_protocol::{EngineStatus, EvalResult},
    commbridge_service_traits::{EngineLifecycle, EvalGateway, ServiceError, ServiceResult},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::client::ProxyClient;

const STARTUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Engine collaborator backed by a running proxy.
///
/// Tracks whether the engine has been bound to this process: set once a
/// startup completes or a status probe reports the engine as up.
#[derive(Debug)]
pub struct ProxyEngine {
    client: ProxyClient,
    bound: AtomicBool,
    startup: PollOptions,
    shutdown: CancellationToken,
}

impl ProxyEngine {
    pub fn new(config: &EngineConfig) -> ServiceResult<Self> {
        let interval_secs = STARTUP_POLL_INTERVAL.as_secs().max(1);
        let attempts = (config.startup_timeout_secs / interval_secs).max(1);
        Ok(Self {
            client: ProxyClient::new(config)?,
            bound: AtomicBool::new(false),
            startup: PollOptions::new(
                STARTUP_POLL_INTERVAL,
                u32::try_from(attempts).unwrap_or(u32::MAX),
            ),
            shutdown: CancellationToken::new(),
        })
    }

    /// Override how startup waits for the engine to come up.
    #[must_use]
    pub fn with_startup_poll(mut self, options: PollOptions) -> Self {
        self.startup = options;
        self
    }

    /// Abort any startup wait in progress.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn client(&self) -> &ProxyClient {
        &self.client
    }

    async fn wait_until_up(&self) -> ServiceResult<()> {
        let client = &self.client;
        let result = poll_with_timeout(self.startup, &self.shutdown, |attempt| async move {
            match client.get_status().await {
                Ok(status) if status.is_up() => PollOutcome::Success(()),
                Ok(status) => {
                    debug!(attempt, status = %status.status, "engine not up yet");
                    PollOutcome::Retryable(format!("engine status is {}", status.status))
                },
                // The proxy may not answer until its server is listening.
                Err(e) => PollOutcome::<(), ServiceError>::Retryable(e.to_string()),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Timeout {
                attempts,
                last_reason,
                ..
            }) => Err(ServiceError::message(format!(
                "engine did not come up after {attempts} status checks{}",
                last_reason
                    .map(|r| format!(" (last: {r})"))
                    .unwrap_or_default()
            ))),
            Err(e) => Err(ServiceError::message(format!("engine startup aborted: {e}"))),
        }
    }
}

#[async_trait]
impl EvalGateway for ProxyEngine {
    async fn send_eval(&self, expression: &str) -> ServiceResult<EvalResult> {
        self.client.eval(expression).await
    }
}

#[async_trait]
impl EngineLifecycle for ProxyEngine {
    async fn is_engine_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    async fn start_engine_and_bind(&self) -> ServiceResult<()> {
        info!(base_url = %self.client.base_url(), "starting engine");
        self.client.start().await?;
        if let Err(e) = self.wait_until_up().await {
            warn!(error = %e, "engine startup failed");
            return Err(e);
        }
        self.bound.store(true, Ordering::Release);
        info!("engine is up");
        Ok(())
    }

    async fn fetch_engine_status(&self) -> ServiceResult<EngineStatus> {
        let status = self.client.get_status().await?;
        if status.is_up() {
            self.bound.store(true, Ordering::Release);
        }
        Ok(status)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn engine_for(server: &mockito::Server) -> ProxyEngine {
        let config = EngineConfig {
            base_url: server.url(),
            ..EngineConfig::default()
        };
        ProxyEngine::new(&config)
            .unwrap()
            .with_startup_poll(PollOptions::new(Duration::from_millis(10), 3))
    }

    fn status_body(status: &str) -> String {
        json!({ "matlab": { "status": status }, "licensing": null, "error": null }).to_string()
    }

    #[test]
    fn startup_attempts_follow_timeout() {
        let config = EngineConfig {
            startup_timeout_secs: 45,
            ..EngineConfig::default()
        };
        let engine = ProxyEngine::new(&config).unwrap();
        assert_eq!(engine.startup.max_attempts, 45);
        assert_eq!(engine.startup.interval, STARTUP_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn start_binds_once_status_is_up() {
        let mut server = mockito::Server::new_async().await;
        let start = server
            .mock("POST", "/start_matlab")
            .with_status(200)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/get_status")
            .with_status(200)
            .with_body(status_body("up"))
            .create_async()
            .await;

        let engine = engine_for(&server);
        assert!(!engine.is_engine_bound().await);
        engine.start_engine_and_bind().await.unwrap();
        assert!(engine.is_engine_bound().await);
        start.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn start_times_out_when_engine_stays_down() {
        let mut server = mockito::Server::new_async().await;
        let _start = server
            .mock("POST", "/start_matlab")
            .with_status(200)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/get_status")
            .with_status(200)
            .with_body(status_body("starting"))
            .expect(3)
            .create_async()
            .await;

        let engine = engine_for(&server);
        let err = engine.start_engine_and_bind().await.unwrap_err();
        assert!(err.to_string().contains("after 3 status checks"));
        assert!(err.to_string().contains("starting"));
        assert!(!engine.is_engine_bound().await);
        status.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_start_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _start = server
            .mock("POST", "/start_matlab")
            .with_status(503)
            .with_body("no licence")
            .create_async()
            .await;

        let engine = engine_for(&server);
        let err = engine.start_engine_and_bind().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn status_probe_reporting_up_binds() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/get_status")
            .with_status(200)
            .with_body(
                json!({ "matlab": { "status": "up" }, "licensing": { "type": "nlm" } }).to_string(),
            )
            .create_async()
            .await;

        let engine = engine_for(&server);
        let status = engine.fetch_engine_status().await.unwrap();
        assert!(status.licensed);
        assert!(engine.is_engine_bound().await);
    }
}
