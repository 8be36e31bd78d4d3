//! Channel lifecycle and envelope routing.
//!
//! The channel map is the only shared mutable state in the bridge. It is
//! touched exclusively through [`ChannelManager`]. Every open channel owns a
//! worker task that drains its inbox in receipt order, so envelopes on one
//! channel never overlap while different channels proceed independently.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    commbridge_protocol::{ActionResponse, Envelope, Map, OutboundFrame, Value},
    futures::FutureExt,
    tokio::sync::{RwLock, mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    actions::{ActionContext, ActionRegistry},
    error::BridgeError,
    state::BridgeState,
};

// ── Channel handle ───────────────────────────────────────────────────────────

/// Cheap, cloneable view of one open channel, handed to action handlers.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: String,
    target_name: String,
    /// Serialized frames for the owning connection's write loop.
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub(crate) fn new(
        id: impl Into<String>,
        target_name: impl Into<String>,
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            target_name: target_name.into(),
            outbound,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the channel was closed, replaced, or torn down.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send one response on this channel.
    pub fn send(&self, response: &ActionResponse) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::channel_state(&self.id));
        }
        let frame = serde_json::to_string(&OutboundFrame::response(&self.id, response.clone()))
            .map_err(|e| BridgeError::Transport(e.into()))?;
        self.outbound
            .send(frame)
            .map_err(|_| BridgeError::channel_state(&self.id))
    }
}

/// One queued request. `reply` is set when the caller waits for the answer.
struct Job {
    envelope: Envelope,
    reply: Option<oneshot::Sender<ActionResponse>>,
}

struct Channel {
    handle: ChannelHandle,
    conn_id: String,
    opened_at: Instant,
    inbox: mpsc::UnboundedSender<Job>,
}

/// Snapshot of one open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub target_name: String,
    pub conn_id: String,
    pub open_for: Duration,
}

// ── Channel manager ──────────────────────────────────────────────────────────

pub struct ChannelManager {
    channels: RwLock<HashMap<String, Channel>>,
    registry: ActionRegistry,
    state: Arc<BridgeState>,
}

impl ChannelManager {
    pub fn new(state: Arc<BridgeState>, registry: ActionRegistry) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            registry,
            state,
        })
    }

    pub fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Register a channel for `conn_id`.
    ///
    /// Re-opening an id on the same connection replaces the channel and
    /// cancels its in-flight work. An id held by another connection is refused.
    pub async fn open(
        self: &Arc<Self>,
        channel_id: &str,
        target_name: &str,
        conn_id: &str,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<(), BridgeError> {
        let handle = ChannelHandle::new(channel_id, target_name, outbound, CancellationToken::new());
        let (inbox, rx) = mpsc::unbounded_channel();

        {
            let mut channels = self.channels.write().await;
            if let Some(existing) = channels.get(channel_id) {
                if existing.conn_id != conn_id {
                    warn!(
                        comm_id = %channel_id,
                        conn_id,
                        owner_conn_id = %existing.conn_id,
                        "comm_open for a channel held by another connection"
                    );
                    return Err(BridgeError::ChannelInUse {
                        channel_id: channel_id.to_string(),
                    });
                }
                warn!(
                    comm_id = %channel_id,
                    conn_id,
                    "channel re-opened, replacing the previous one"
                );
                existing.handle.cancel.cancel();
            }
            channels.insert(channel_id.to_string(), Channel {
                handle: handle.clone(),
                conn_id: conn_id.to_string(),
                opened_at: Instant::now(),
                inbox,
            });
        }

        info!(comm_id = %channel_id, target_name, conn_id, "channel opened");
        tokio::spawn(Arc::clone(self).run_worker(handle, rx));
        Ok(())
    }

    /// Run one envelope through the channel's worker and wait for the
    /// response that was sent for it.
    ///
    /// For in-process callers; connection ownership is not checked. Fails
    /// when `channel_id` is not open, or closes before the envelope runs.
    pub async fn dispatch(
        &self,
        channel_id: &str,
        action: &str,
        payload: Map<String, Value>,
    ) -> Result<ActionResponse, BridgeError> {
        let (reply, answer) = oneshot::channel();
        self.enqueue(None, Job {
            envelope: Envelope::new(channel_id, action, payload),
            reply: Some(reply),
        })
        .await?;
        answer
            .await
            .map_err(|_| BridgeError::channel_state(channel_id))
    }

    /// Queue an envelope from connection `conn_id` on its channel's worker.
    pub async fn submit(&self, conn_id: &str, envelope: Envelope) -> Result<(), BridgeError> {
        self.enqueue(Some(conn_id), Job {
            envelope,
            reply: None,
        })
        .await
    }

    async fn enqueue(&self, conn_id: Option<&str>, job: Job) -> Result<(), BridgeError> {
        let channels = self.channels.read().await;
        let channel_id = job.envelope.channel_id.as_str();
        let channel = channels
            .get(channel_id)
            .filter(|c| conn_id.is_none_or(|conn| c.conn_id == conn));
        let Some(channel) = channel else {
            warn!(
                comm_id = %channel_id,
                conn_id = conn_id.unwrap_or("-"),
                action = %job.envelope.action,
                "message for a channel not open on this connection"
            );
            return Err(BridgeError::channel_state(channel_id));
        };
        channel
            .inbox
            .send(job)
            .map_err(|e| BridgeError::channel_state(e.0.envelope.channel_id))
    }

    /// Remove a channel opened by `conn_id`. Returns false (and logs) when no
    /// such channel is open on that connection.
    pub async fn close(&self, conn_id: &str, channel_id: &str) -> bool {
        let mut channels = self.channels.write().await;
        let owned = channels
            .get(channel_id)
            .is_some_and(|c| c.conn_id == conn_id);
        if !owned {
            warn!(
                comm_id = %channel_id,
                conn_id,
                "close for a channel not open on this connection"
            );
            return false;
        }
        let Some(channel) = channels.remove(channel_id) else {
            return false;
        };
        channel.handle.cancel.cancel();
        info!(
            comm_id = %channel_id,
            open_secs = channel.opened_at.elapsed().as_secs(),
            "channel closed"
        );
        true
    }

    /// Close every channel opened by one connection.
    pub async fn close_connection(&self, conn_id: &str) -> usize {
        let mut channels = self.channels.write().await;
        let ids: Vec<String> = channels
            .iter()
            .filter(|(_, c)| c.conn_id == conn_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(channel) = channels.remove(id) {
                channel.handle.cancel.cancel();
                debug!(comm_id = %id, conn_id, "channel closed with its connection");
            }
        }
        ids.len()
    }

    /// Close all channels.
    pub async fn teardown(&self) -> usize {
        let drained: Vec<_> = self.channels.write().await.drain().collect();
        for (_, channel) in &drained {
            channel.handle.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all channels");
        }
        drained.len()
    }

    /// Send an unsolicited message on an open channel.
    pub async fn notify(
        &self,
        channel_id: &str,
        message: ActionResponse,
    ) -> Result<(), BridgeError> {
        let handle = self
            .handle(channel_id)
            .await
            .ok_or_else(|| BridgeError::channel_state(channel_id))?;
        handle.send(&message)
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_open(&self, channel_id: &str) -> bool {
        self.channels.read().await.contains_key(channel_id)
    }

    pub async fn list(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<_> = self
            .channels
            .read()
            .await
            .values()
            .map(|c| ChannelInfo {
                id: c.handle.id.clone(),
                target_name: c.handle.target_name.clone(),
                conn_id: c.conn_id.clone(),
                open_for: c.opened_at.elapsed(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    async fn handle(&self, channel_id: &str) -> Option<ChannelHandle> {
        self.channels
            .read()
            .await
            .get(channel_id)
            .map(|c| c.handle.clone())
    }

    async fn run_worker(
        self: Arc<Self>,
        handle: ChannelHandle,
        mut inbox: mpsc::UnboundedReceiver<Job>,
    ) {
        while let Some(Job { envelope, reply }) = inbox.recv().await {
            if handle.is_closed() {
                warn!(
                    comm_id = %handle.id,
                    action = %envelope.action,
                    "channel closed before the message was handled"
                );
                continue;
            }
            let response = self.execute(&handle, envelope).await;
            if let Some(reply) = reply {
                let _ = reply.send(response);
            }
        }
        debug!(comm_id = %handle.id, "channel worker stopped");
    }

    /// Resolve, run, and answer one envelope. Always produces a response; a
    /// handler error or panic becomes the response's error text.
    async fn execute(&self, handle: &ChannelHandle, envelope: Envelope) -> ActionResponse {
        let action = envelope.action.clone();
        let handler = self.registry.resolve(&action);
        debug!(
            comm_id = %handle.id,
            action = %action,
            handler = self.registry.resolved_name(&action),
            "dispatching action"
        );

        let ctx = ActionContext {
            envelope,
            state: Arc::clone(&self.state),
            channel: handle.clone(),
        };
        let outcome = AssertUnwindSafe(handler(ctx)).catch_unwind().await;

        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                error!(
                    comm_id = %handle.id,
                    action = %action,
                    kind = err.kind(),
                    error = %err,
                    "action failed"
                );
                ActionResponse::err(&action, err.to_string())
            },
            Err(_) => {
                let err = BridgeError::Panicked;
                error!(
                    comm_id = %handle.id,
                    action = %action,
                    kind = err.kind(),
                    "action handler panicked"
                );
                ActionResponse::err(&action, err.to_string())
            },
        };
        // Responses always echo the request tag.
        response.action = action;

        match handle.send(&response) {
            Ok(()) => debug!(
                comm_id = %handle.id,
                action = %response.action,
                ok = !response.is_error(),
                "response sent"
            ),
            Err(e) => error!(
                comm_id = %handle.id,
                action = %response.action,
                error = %e,
                "response could not be delivered"
            ),
        }
        response
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        crate::test_support::{MockEngine, MockEval, payload, state_with},
        commbridge_protocol::{EvalResult, actions},
        serde_json::json,
    };

    fn manager(eval: Arc<MockEval>) -> Arc<ChannelManager> {
        ChannelManager::new(state_with(eval, MockEngine::bound()), ActionRegistry::new())
    }

    fn ready_engine() -> Arc<MockEval> {
        MockEval::always(EvalResult::success("jsd_rmt_tmw"))
    }

    fn next_response(rx: &mut mpsc::UnboundedReceiver<String>) -> ActionResponse {
        let raw = rx.try_recv().expect("a frame was sent");
        match serde_json::from_str(&raw).unwrap() {
            OutboundFrame::CommMsg { data, .. } => data,
            other => panic!("expected comm_msg, got {other:?}"),
        }
    }

    fn request_data(action: &str) -> Value {
        match action {
            actions::CHECK_FILE_EXISTS => json!({ "mlxFilePath": "/" }),
            actions::CONVERT => json!({ "ipynbFilePath": "/a.ipynb", "mlxFilePath": "/a.mlx" }),
            actions::EDIT => json!({ "mlxFilePath": "/a.mlx" }),
            _ => json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_registered_action_answers_exactly_once() {
        let mgr = manager(ready_engine());
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        for tag in actions::ALL {
            let response = mgr
                .dispatch("c1", tag, payload(request_data(tag)))
                .await
                .unwrap();
            assert_eq!(response.action, *tag);
            assert_eq!(response.error, None, "{tag} failed");

            let sent = next_response(&mut rx);
            assert_eq!(sent, response);
            assert!(rx.try_recv().is_err(), "{tag} sent more than one frame");
        }
    }

    #[tokio::test]
    async fn unknown_action_becomes_an_error_response() {
        let mgr = manager(MockEval::ok());
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        let response = mgr.dispatch("c1", "teleport", Map::new()).await.unwrap();
        assert_eq!(response.action, "teleport");
        assert_eq!(response.error.as_deref(), Some("unknown action: teleport"));
        assert_eq!(next_response(&mut rx), response);
    }

    #[tokio::test]
    async fn dispatch_to_unknown_channel_runs_nothing() {
        let eval = MockEval::ok();
        let mgr = manager(Arc::clone(&eval));
        let err = mgr
            .dispatch("missing", actions::CONVERT, payload(request_data(actions::CONVERT)))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelState { .. }));
        assert_eq!(err.to_string(), "no open channel with id missing");
        assert_eq!(eval.calls(), 0);
    }

    #[tokio::test]
    async fn close_then_dispatch_is_rejected() {
        let eval = MockEval::ok();
        let mgr = manager(Arc::clone(&eval));
        let (tx, _rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        assert!(mgr.close("conn-1", "c1").await);
        let err = mgr
            .dispatch("c1", actions::CONVERT, payload(request_data(actions::CONVERT)))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelState { .. }));
        let err = mgr
            .submit("conn-1", Envelope::new("c1", actions::NUDGE, Map::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelState { .. }));
        assert_eq!(eval.calls(), 0);
    }

    #[tokio::test]
    async fn closing_an_unknown_channel_is_a_noop() {
        let mgr = manager(MockEval::ok());
        assert!(!mgr.close("conn-1", "never-opened").await);
        assert_eq!(mgr.channel_count().await, 0);
    }

    #[tokio::test]
    async fn reopen_on_same_connection_replaces_and_cancels_previous() {
        let mgr = manager(MockEval::ok());
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        mgr.open("c1", "first", "conn-1", tx1).await.unwrap();
        let old = mgr.handle("c1").await.unwrap();

        mgr.open("c1", "second", "conn-1", tx2).await.unwrap();
        assert!(old.is_closed());
        assert_eq!(mgr.channel_count().await, 1);

        mgr.dispatch("c1", actions::NUDGE, Map::new()).await.unwrap();
        assert_eq!(next_response(&mut rx2).action, actions::NUDGE);
        assert_eq!(mgr.list().await[0].target_name, "second");
    }

    #[tokio::test]
    async fn other_connections_cannot_touch_a_channel() {
        let eval = MockEval::ok();
        let mgr = manager(Arc::clone(&eval));
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-a", tx_a).await.unwrap();

        let err = mgr.open("c1", "hijack", "conn-b", tx_b).await.unwrap_err();
        assert!(matches!(err, BridgeError::ChannelInUse { .. }));

        let err = mgr
            .submit("conn-b", Envelope::new("c1", actions::CONVERT, payload(request_data(actions::CONVERT))))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelState { .. }));
        assert!(!mgr.close("conn-b", "c1").await);
        assert_eq!(mgr.close_connection("conn-b").await, 0);

        let info = &mgr.list().await[0];
        assert_eq!(info.conn_id, "conn-a");
        assert_eq!(info.target_name, "commbridge");
        assert!(!mgr.handle("c1").await.unwrap().is_closed());
        assert!(rx_a.try_recv().is_err());
        assert_eq!(eval.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_envelopes_run_in_order_per_channel() {
        let mgr = manager(ready_engine());
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        mgr.submit("conn-1", Envelope::new("c1", actions::EDIT, payload(request_data(actions::EDIT))))
            .await
            .unwrap();
        mgr.submit("conn-1", Envelope::new("c1", actions::NUDGE, payload(json!({ "n": 2 }))))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(next_response(&mut rx).action, actions::EDIT);
        assert_eq!(next_response(&mut rx).action, actions::NUDGE);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_waits_behind_submitted_work() {
        let mgr = manager(ready_engine());
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        mgr.submit("conn-1", Envelope::new("c1", actions::EDIT, payload(request_data(actions::EDIT))))
            .await
            .unwrap();
        let response = mgr.dispatch("c1", actions::NUDGE, Map::new()).await.unwrap();

        assert_eq!(response.action, actions::NUDGE);
        assert_eq!(next_response(&mut rx).action, actions::EDIT);
        assert_eq!(next_response(&mut rx), response);
    }

    #[tokio::test(start_paused = true)]
    async fn close_mid_poll_drops_the_response() {
        let eval = MockEval::always(EvalResult::success("desktop"));
        let mgr = manager(Arc::clone(&eval));
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        mgr.submit("conn-1", Envelope::new("c1", actions::EDIT, payload(request_data(actions::EDIT))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(mgr.close("conn-1", "c1").await);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(eval.calls(), 2);
        assert!(rx.try_recv().is_err());
    }

    async fn explode(_ctx: ActionContext) -> crate::actions::ActionResult {
        panic!("handler bug")
    }

    #[tokio::test]
    async fn panicking_handler_still_answers() {
        let mut registry = ActionRegistry::new();
        registry.register("explode", Box::new(|ctx| Box::pin(explode(ctx))));
        let mgr = ChannelManager::new(state_with(MockEval::ok(), MockEngine::bound()), registry);
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        let response = mgr.dispatch("c1", "explode", Map::new()).await.unwrap();
        assert_eq!(response.error.as_deref(), Some("action handler panicked"));
        assert_eq!(next_response(&mut rx), response);

        // The worker survives and keeps serving the channel.
        let response = mgr.dispatch("c1", actions::NUDGE, Map::new()).await.unwrap();
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn connection_drop_closes_only_its_channels() {
        let mgr = manager(MockEval::ok());
        let (tx, _rx) = mpsc::unbounded_channel();
        mgr.open("a", "t", "conn-1", tx.clone()).await.unwrap();
        mgr.open("b", "t", "conn-1", tx.clone()).await.unwrap();
        mgr.open("c", "t", "conn-2", tx).await.unwrap();

        assert_eq!(mgr.close_connection("conn-1").await, 2);
        assert!(!mgr.is_open("a").await);
        assert!(mgr.is_open("c").await);
        assert_eq!(mgr.teardown().await, 1);
        assert_eq!(mgr.channel_count().await, 0);
    }

    #[tokio::test]
    async fn notify_sends_unsolicited_messages() {
        let mgr = manager(MockEval::ok());
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.open("c1", "commbridge", "conn-1", tx).await.unwrap();

        let note = ActionResponse::ok(actions::NUDGE).with("msg", json!({ "hello": true }));
        mgr.notify("c1", note.clone()).await.unwrap();
        assert_eq!(next_response(&mut rx), note);

        assert!(mgr.notify("nope", note).await.is_err());
    }
}
