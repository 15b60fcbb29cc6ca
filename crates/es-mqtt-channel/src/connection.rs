//! Connection lifecycle: shared link state and the reconnecting manager.
//!
//! `ConnectionState` is the single owner of the "are we connected" flag and
//! the reconnect backoff. The transport's network task mutates it through
//! `ConnectionEvents`; the sampling loop reads it through the manager.
//! Readers must treat `is_connected()` as a snapshot: the network task can
//! flip it at any moment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::QoS;
use tokio::sync::watch;

use crate::channel::{ConnectionEvents, Transport, codes};
use crate::error::{MqttError, MqttResult};
use crate::retry::RetryPolicy;

/// How long `shutdown` waits for the broker to confirm a requested disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Broker link status as last reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    /// A connect request is in flight.
    Connecting,
    Connected,
    /// The last attempt was refused with this code.
    Refused(u8),
}

// ── ConnectionState ───────────────────────────────────────────

/// Link status plus reconnect backoff, shared between the network task
/// and the sampling loop.
pub struct ConnectionState {
    endpoint: String,
    status: watch::Sender<LinkStatus>,
    retry: Mutex<RetryPolicy>,
}

impl ConnectionState {
    pub fn new(endpoint: impl Into<String>, retry: RetryPolicy) -> Self {
        let (status, _) = watch::channel(LinkStatus::Disconnected);
        Self {
            endpoint: endpoint.into(),
            status,
            retry: Mutex::new(retry),
        }
    }

    /// Non-blocking snapshot of the connected flag.
    pub fn is_connected(&self) -> bool {
        *self.status.borrow() == LinkStatus::Connected
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn current_delay(&self) -> Duration {
        self.retry().current_delay()
    }

    /// Mark a new attempt in flight. Returns `false` if already connected.
    fn begin_attempt(&self) -> bool {
        let mut connected = false;
        self.status.send_if_modified(|status| {
            if *status == LinkStatus::Connected {
                connected = true;
                false
            } else {
                *status = LinkStatus::Connecting;
                true
            }
        });
        !connected
    }

    /// Drop an attempt that never got an answer.
    fn abandon_attempt(&self) {
        self.status.send_if_modified(|status| {
            if *status == LinkStatus::Connecting {
                *status = LinkStatus::Disconnected;
                true
            } else {
                false
            }
        });
    }

    fn record_failure(&self) -> Duration {
        self.retry().record_failure()
    }

    fn reset_backoff(&self) {
        self.retry().reset();
    }

    fn retry(&self) -> std::sync::MutexGuard<'_, RetryPolicy> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionEvents for ConnectionState {
    fn on_connect(&self, code: u8) {
        if code == codes::SUCCESS {
            tracing::info!(endpoint = %self.endpoint, "connected to MQTT broker");
            self.reset_backoff();
            self.status.send_replace(LinkStatus::Connected);
        } else {
            tracing::error!(
                endpoint = %self.endpoint,
                code,
                "failed to connect to MQTT broker"
            );
            self.status.send_replace(LinkStatus::Refused(code));
        }
    }

    fn on_disconnect(&self, code: u8) {
        if code == codes::SUCCESS {
            tracing::info!(endpoint = %self.endpoint, "disconnected from MQTT broker");
        } else {
            tracing::warn!(
                endpoint = %self.endpoint,
                code,
                "unexpected disconnection from MQTT broker"
            );
        }
        self.status.send_replace(LinkStatus::Disconnected);
    }
}

// ── ConnectionManager ─────────────────────────────────────────

/// Owns the broker session and keeps it alive.
///
/// `connect()` retries forever with capped exponential backoff; there is
/// no attempt ceiling. The transport's network task is started at most
/// once per manager.
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    state: Arc<ConnectionState>,
    connect_timeout: Duration,
    loop_started: AtomicBool,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, state: Arc<ConnectionState>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            state,
            connect_timeout,
            loop_started: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn current_delay(&self) -> Duration {
        self.state.current_delay()
    }

    /// Block until a broker session is up.
    ///
    /// Each failed attempt sleeps for the current backoff delay, then
    /// doubles it. Cancel by dropping the future.
    pub async fn connect(&self) {
        loop {
            match self.attempt().await {
                Ok(()) => {
                    self.state.reset_backoff();
                    return;
                }
                Err(reason) => {
                    let delay = self.state.record_failure();
                    tracing::error!(
                        endpoint = %self.state.endpoint(),
                        reason = %reason,
                        "MQTT connection attempt failed"
                    );
                    tracing::info!(delay_secs = delay.as_secs_f64(), "retrying MQTT connection");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Publish to the broker, refusing up front if the link is down.
    ///
    /// The link can still drop between the check and the send; the
    /// transport's error covers that case.
    pub async fn send(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        self.transport.publish(topic, payload, qos).await
    }

    /// Gracefully close the session and stop the network task.
    ///
    /// The DISCONNECT is requested first because the network task is what
    /// flushes it to the broker.
    pub async fn shutdown(&self) {
        if self.is_connected() {
            let mut status = self.state.subscribe();
            match self.transport.disconnect().await {
                Ok(()) => {
                    if tokio::time::timeout(
                        DISCONNECT_GRACE,
                        status.wait_for(|s| *s != LinkStatus::Connected),
                    )
                    .await
                    .is_err()
                    {
                        tracing::warn!("broker did not confirm disconnect in time");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to request MQTT disconnect"),
            }
        }

        if self.loop_started.load(Ordering::SeqCst) {
            self.transport.stop_background_loop().await;
        }
    }

    /// One connect attempt. `Err` carries a human-readable failure reason.
    async fn attempt(&self) -> Result<(), String> {
        self.ensure_background_loop()
            .map_err(|e| format!("failed to start network loop: {e}"))?;

        if !self.state.begin_attempt() {
            return Ok(());
        }

        tracing::info!(endpoint = %self.state.endpoint(), "attempting to connect to MQTT broker");
        let mut status = self.state.subscribe();

        if let Err(e) = self.transport.connect().await {
            self.state.abandon_attempt();
            return Err(e.to_string());
        }

        let settled = tokio::time::timeout(
            self.connect_timeout,
            status.wait_for(|s| *s != LinkStatus::Connecting),
        )
        .await
        .map(|changed| changed.map(|s| *s));

        match settled {
            Ok(Ok(LinkStatus::Connected)) => Ok(()),
            Ok(Ok(LinkStatus::Refused(code))) => {
                Err(format!("broker refused connection, return code {code}"))
            }
            Ok(Ok(_)) => Err("connection closed during handshake".to_string()),
            Ok(Err(_)) => Err("connection state channel closed".to_string()),
            Err(_) => {
                self.state.abandon_attempt();
                Err("connection callback not received".to_string())
            }
        }
    }

    fn ensure_background_loop(&self) -> MqttResult<()> {
        if self.loop_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let events: Arc<dyn ConnectionEvents> = self.state.clone();
        if let Err(e) = self.transport.start_background_loop(events) {
            self.loop_started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ConnectOutcome, MockTransport};
    use tokio::time::Instant;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn manager(mock: MockTransport) -> ConnectionManager<MockTransport> {
        let state = Arc::new(ConnectionState::new(
            "localhost:1883",
            RetryPolicy::new(secs(1), secs(300)),
        ));
        ConnectionManager::new(Arc::new(mock), state, secs(2))
    }

    // ── ConnectionState callbacks ───────────────────────────────

    #[test]
    fn on_connect_success_sets_connected_and_resets_backoff() {
        let state = ConnectionState::new("broker:1883", RetryPolicy::default());
        state.record_failure();
        state.record_failure();
        assert_eq!(state.current_delay(), secs(4));

        state.on_connect(codes::SUCCESS);
        assert!(state.is_connected());
        assert_eq!(state.current_delay(), secs(1));
    }

    #[test]
    fn on_connect_failure_clears_connected() {
        let state = ConnectionState::new("broker:1883", RetryPolicy::default());
        state.on_connect(codes::SUCCESS);
        state.on_connect(5);
        assert!(!state.is_connected());
        assert_eq!(state.status(), LinkStatus::Refused(5));
    }

    #[test]
    fn clean_and_unexpected_disconnect_reach_same_state() {
        let state = ConnectionState::new("broker:1883", RetryPolicy::default());

        state.on_connect(codes::SUCCESS);
        state.on_disconnect(codes::SUCCESS);
        assert_eq!(state.status(), LinkStatus::Disconnected);

        state.on_connect(codes::SUCCESS);
        state.on_disconnect(codes::UNSPECIFIED);
        assert_eq!(state.status(), LinkStatus::Disconnected);
    }

    #[test]
    fn begin_attempt_leaves_live_session_alone() {
        let state = ConnectionState::new("broker:1883", RetryPolicy::default());
        assert!(state.begin_attempt());
        assert_eq!(state.status(), LinkStatus::Connecting);

        state.on_connect(codes::SUCCESS);
        assert!(!state.begin_attempt());
        assert!(state.is_connected());
    }

    // ── ConnectionManager ───────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn connect_succeeds_first_try() {
        let mgr = manager(MockTransport::new());
        mgr.connect().await;

        assert!(mgr.is_connected());
        assert_eq!(mgr.current_delay(), secs(1));
        assert_eq!(mgr.transport().connect_calls(), 1);
        assert_eq!(mgr.transport().background_starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_success_resets_delay() {
        let mgr = manager(MockTransport::with_script([
            ConnectOutcome::Silent,
            ConnectOutcome::Refuse(3),
            ConnectOutcome::Fail,
            ConnectOutcome::Accept,
        ]));
        let start = Instant::now();

        mgr.connect().await;

        assert!(mgr.is_connected());
        assert_eq!(mgr.current_delay(), secs(1));
        assert_eq!(mgr.transport().connect_calls(), 4);
        // One 2 s handshake timeout, then backoff sleeps of 1 s, 2 s and 4 s.
        assert_eq!(start.elapsed(), secs(2 + 1 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_saturates_at_max_delay() {
        let mock = MockTransport::new();
        mock.set_fallback(ConnectOutcome::Silent);
        let mgr = Arc::new(manager(mock));

        let task = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.connect().await })
        };

        // Ten silent attempts: 10 x 2 s timeouts plus 1+2+...+256 s of backoff.
        tokio::time::sleep(secs(600)).await;
        assert_eq!(mgr.transport().connect_calls(), 10);
        assert_eq!(mgr.current_delay(), secs(300));
        assert!(!mgr.is_connected());

        tokio::time::sleep(secs(600)).await;
        assert_eq!(mgr.current_delay(), secs(300));

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn late_connack_after_timeout_is_honoured() {
        let mgr = manager(MockTransport::with_script([ConnectOutcome::AcceptAfter(
            Duration::from_millis(2500),
        )]));
        mgr.transport().set_fallback(ConnectOutcome::Silent);

        mgr.connect().await;

        // The answer lands during the 1 s backoff after the 2 s timeout,
        // so the second pass sees a live session without a new request.
        assert!(mgr.is_connected());
        assert_eq!(mgr.transport().connect_calls(), 1);
        assert_eq!(mgr.current_delay(), secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn network_loop_started_once_across_reconnects() {
        let mgr = manager(MockTransport::new());

        for _ in 0..5 {
            mgr.connect().await;
            assert!(mgr.is_connected());
            mgr.transport().drop_connection(codes::UNSPECIFIED);
            assert!(!mgr.is_connected());
        }

        assert_eq!(mgr.transport().connect_calls(), 5);
        assert_eq!(mgr.transport().background_starts(), 1);
    }

    #[tokio::test]
    async fn send_refuses_while_disconnected() {
        let mgr = manager(MockTransport::new());
        let err = mgr
            .send("sensors/bme680/temperature", b"{}", QoS::AtMostOnce)
            .await
            .unwrap_err();

        assert!(matches!(err, MqttError::NotConnected));
        assert!(mgr.transport().published().is_empty());
    }

    #[tokio::test]
    async fn send_forwards_while_connected() {
        let mgr = manager(MockTransport::new());
        mgr.connect().await;
        mgr.send("sensors/bme680/temperature", b"{}", QoS::AtMostOnce)
            .await
            .unwrap();

        assert_eq!(mgr.transport().published().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_disconnects_then_stops_loop() {
        let mgr = manager(MockTransport::new());
        mgr.connect().await;

        mgr.shutdown().await;

        assert!(!mgr.is_connected());
        assert_eq!(mgr.transport().disconnect_calls(), 1);
        assert_eq!(mgr.transport().background_stops(), 1);
    }

    #[tokio::test]
    async fn shutdown_before_connect_touches_nothing() {
        let mgr = manager(MockTransport::new());
        mgr.shutdown().await;

        assert_eq!(mgr.transport().disconnect_calls(), 0);
        assert_eq!(mgr.transport().background_stops(), 0);
    }
}
