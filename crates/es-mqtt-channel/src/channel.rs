//! MQTT transport: broker session plumbing behind a mockable trait.
//!
//! `MqttTransport` wraps `rumqttc::AsyncClient` and owns the `EventLoop`
//! in a background network task. The task only drives the event loop after
//! a connect request and reports every session start or end through
//! `ConnectionEvents`. Each request opens exactly one connection: a request
//! that arrives mid-handshake abandons the pending handshake and starts a
//! fresh one, and rumqttc's own handshake timeout is bounded by the
//! configured connect timeout. Reconnect pacing stays with the caller.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};

/// Result codes delivered to `ConnectionEvents`.
///
/// `1..=5` are the MQTT 3.1.1 CONNACK refusal codes, passed through as-is.
pub mod codes {
    /// Connection accepted, or a clean requested disconnect.
    pub const SUCCESS: u8 = 0;
    /// Transport failure with no broker-supplied code (DNS, TCP, I/O, timeout).
    pub const UNSPECIFIED: u8 = 0x80;
}

/// How long `stop_background_loop` waits for the network task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Capacity of the rumqttc request queue.
const REQUEST_CAPACITY: usize = 64;

// ── Lifecycle callbacks ───────────────────────────────────────

/// Lifecycle notifications invoked by the transport's network task.
pub trait ConnectionEvents: Send + Sync {
    /// A connect attempt finished. `codes::SUCCESS` means the session is up.
    fn on_connect(&self, code: u8);

    /// An established session ended. `codes::SUCCESS` means we asked for it.
    fn on_disconnect(&self, code: u8);
}

// ── Transport trait ───────────────────────────────────────────

/// Abstraction over the broker session.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the network task to (re)establish the session. Returns once the
    /// request is issued; the outcome arrives via `ConnectionEvents`.
    async fn connect(&self) -> MqttResult<()>;

    /// Request a clean DISCONNECT of the current session.
    async fn disconnect(&self) -> MqttResult<()>;

    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    /// Spawn the network task and register lifecycle callbacks. Later calls
    /// are no-ops.
    fn start_background_loop(&self, events: Arc<dyn ConnectionEvents>) -> MqttResult<()>;

    /// Stop the network task, if running.
    async fn stop_background_loop(&self);
}

// ── MqttTransport ─────────────────────────────────────────────

/// rumqttc-backed broker session.
pub struct MqttTransport {
    client: AsyncClient,
    host: String,
    port: u16,
    eventloop: Mutex<Option<EventLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
    connect_requests: Arc<Notify>,
    shutdown: watch::Sender<bool>,
}

impl MqttTransport {
    /// Build a plaintext transport for the configured broker.
    ///
    /// No network I/O happens until the background loop is started and a
    /// connect request is issued.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keepalive());

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        // rumqttc takes whole seconds and times out immediately on zero.
        eventloop
            .network_options
            .set_connection_timeout(config.connect_timeout_secs.max(1));
        let (shutdown, _) = watch::channel(false);

        Self {
            client,
            host: config.broker_host.clone(),
            port: config.broker_port,
            eventloop: Mutex::new(Some(eventloop)),
            task: Mutex::new(None),
            connect_requests: Arc::new(Notify::new()),
            shutdown,
        }
    }

    fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> MqttResult<()> {
        if !self.is_running() {
            return Err(MqttError::Connection(
                "network loop is not running".to_string(),
            ));
        }
        tracing::debug!(host = %self.host, port = self.port, "connect requested");
        self.connect_requests.notify_one();
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::Connection(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        // try_publish: a full request queue fails fast instead of stalling the caller.
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    fn start_background_loop(&self, events: Arc<dyn ConnectionEvents>) -> MqttResult<()> {
        let Some(eventloop) = self
            .eventloop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::debug!("MQTT network loop already started");
            return Ok(());
        };

        let handle = tokio::spawn(drive(
            eventloop,
            events,
            self.connect_requests.clone(),
            self.shutdown.subscribe(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(host = %self.host, port = self.port, "MQTT network loop started");
        Ok(())
    }

    async fn stop_background_loop(&self) {
        let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let _ = self.shutdown.send(true);
        let abort = handle.abort_handle();
        match tokio::time::timeout(STOP_GRACE, handle).await {
            Ok(Ok(())) => tracing::info!("MQTT network loop stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "MQTT network loop ended with error"),
            Err(_) => {
                tracing::warn!("MQTT network loop did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

// ── Network task ──────────────────────────────────────────────

/// Wait for connect requests and run one session per request until shutdown.
async fn drive(
    mut eventloop: EventLoop,
    events: Arc<dyn ConnectionEvents>,
    requests: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = requests.notified() => {}
        }

        if !run_session(&mut eventloop, events.as_ref(), &requests, &mut shutdown).await {
            break;
        }
    }
}

/// Poll the event loop until the session fails or ends.
///
/// Until the CONNACK arrives, a new connect request drops the pending
/// handshake (rumqttc keeps no network state for it) and the next poll
/// dials again. Returns `false` when shutdown was requested.
async fn run_session(
    eventloop: &mut EventLoop,
    events: &dyn ConnectionEvents,
    requests: &Notify,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut established = false;

    loop {
        let polled = tokio::select! {
            biased;
            _ = shutdown.changed() => return false,
            () = requests.notified(), if !established => {
                tracing::debug!("connect requested mid-handshake, redialing");
                continue;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let code = return_code(ack.code);
                events.on_connect(code);
                if code != codes::SUCCESS {
                    return true;
                }
                established = true;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                eventloop.clean();
                events.on_disconnect(codes::UNSPECIFIED);
                return true;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                // Drop the socket so the next request dials a new session.
                eventloop.clean();
                events.on_disconnect(codes::SUCCESS);
                return true;
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                events.on_connect(return_code(code));
                return true;
            }
            Err(e) => {
                tracing::debug!(error = %e, established, "MQTT event loop error");
                if established {
                    events.on_disconnect(codes::UNSPECIFIED);
                } else {
                    events.on_connect(codes::UNSPECIFIED);
                }
                return true;
            }
        }
    }
}

/// MQTT 3.1.1 CONNACK return code byte.
fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => codes::SUCCESS,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}
