//! Connection manager: one logical link to the gateway with auto-reconnect.
//!
//! A supervisor task owns the socket. It retries with exponential backoff
//! until `disconnect` is called or the gateway rejects our credentials.
//! Every supervisor carries the generation it was started with; writes from
//! a superseded supervisor never reach the observable state.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, Stream, StreamExt, future},
    tether_config::ReconnectConfig,
    tether_protocol::{Envelope, decode, encode},
    tokio::{
        sync::{broadcast, mpsc, oneshot, watch},
        time::{Instant, MissedTickBehavior},
    },
    tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    backoff::Backoff,
    error::{Error, Result},
    state::{ConnectionState, StateCell},
    transport::{Connector, Inbound, Link, Outbound, Target, WsConnector},
};

const INCOMING_CAPACITY: usize = 1024;
const WRITE_QUEUE: usize = 64;

/// Timing knobs for the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Zero disables pings and the idle check.
    pub keepalive: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionPolicy {
    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            keepalive: config.keepalive(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// Anything that can push an envelope toward the gateway.
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    /// Returns `true` once the frame was written to the socket.
    async fn send_envelope(&self, envelope: Envelope) -> bool;
}

struct WriteRequest {
    text: String,
    reply: oneshot::Sender<bool>,
}

struct Writer {
    generation: u64,
    tx: mpsc::Sender<WriteRequest>,
}

#[derive(Default)]
struct Control {
    target: Option<Target>,
    cancel: Option<CancellationToken>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    policy: ConnectionPolicy,
    state: StateCell,
    incoming: broadcast::Sender<Envelope>,
    control: Mutex<Control>,
    writer: Mutex<Option<Writer>>,
    last_error: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn record_error(&self, err: &Error) {
        *lock(&self.last_error) = Some(err.to_string());
    }

    fn install_writer(&self, generation: u64, tx: mpsc::Sender<WriteRequest>) {
        *lock(&self.writer) = Some(Writer { generation, tx });
    }

    fn drop_writer(&self, generation: u64) {
        let mut slot = lock(&self.writer);
        if slot.as_ref().is_some_and(|w| w.generation == generation) {
            *slot = None;
        }
    }

    fn current_writer(&self) -> Option<mpsc::Sender<WriteRequest>> {
        let slot = lock(&self.writer);
        let writer = slot.as_ref()?;
        (self.state.is_current(writer.generation)
            && self.state.get() == ConnectionState::Connected)
            .then(|| writer.tx.clone())
    }
}

/// Owns the gateway link. Cheap to clone; clones share the same link.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Manager backed by a real WebSocket.
    #[must_use]
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self::with_connector(Arc::new(WsConnector), policy)
    }

    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>, policy: ConnectionPolicy) -> Self {
        let (incoming, _) = broadcast::channel(INCOMING_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                state: StateCell::new(),
                incoming,
                control: Mutex::new(Control::default()),
                writer: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Start (or keep) a supervised link to `target`.
    ///
    /// Calling again with the same target while a supervisor is alive is a
    /// no-op. A different target cancels the old supervisor first.
    pub fn connect(&self, target: Target) {
        let mut control = lock(&self.inner.control);
        let alive = control.cancel.as_ref().is_some_and(|c| !c.is_cancelled());
        if alive && control.target.as_ref() == Some(&target) {
            debug!(url = %target.url, "connect ignored, already active for this endpoint");
            return;
        }
        if let Some(cancel) = control.cancel.take() {
            if alive {
                info!(url = %target.url, "endpoint changed, replacing gateway connection");
            }
            cancel.cancel();
        }

        let generation = self.inner.state.reset();
        *lock(&self.inner.last_error) = None;
        let cancel = CancellationToken::new();
        control.target = Some(target.clone());
        control.cancel = Some(cancel.clone());
        self.inner
            .state
            .set(generation, ConnectionState::Connecting);

        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            target,
            generation,
            cancel,
        ));
    }

    /// Tear down the link and stop retrying. Idempotent.
    pub fn disconnect(&self) {
        let mut control = lock(&self.inner.control);
        if let Some(cancel) = control.cancel.take() {
            info!("disconnecting from gateway");
            cancel.cancel();
        }
        control.target = None;
        self.inner.state.reset();
    }

    /// Write one envelope. Returns `false` when not connected or the write
    /// fails; nothing is queued for later.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        let text = match encode(envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "refusing to send unencodable envelope");
                return false;
            },
        };
        let Some(tx) = self.inner.current_writer() else {
            debug!("send while not connected, dropping envelope");
            return false;
        };
        let (reply, done) = oneshot::channel();
        if tx.send(WriteRequest { text, reply }).await.is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Raw receiver for decoded inbound envelopes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.incoming.subscribe()
    }

    /// Decoded inbound envelopes, in arrival order. Lagging subscribers skip
    /// what they missed.
    pub fn incoming(&self) -> impl Stream<Item = Envelope> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(envelope) => Some(envelope),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    error!(skipped, "incoming subscriber lagged, envelopes lost");
                    None
                },
            })
        })
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Last connection failure since the most recent `connect`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }
}

#[async_trait]
impl EnvelopeSender for ConnectionManager {
    async fn send_envelope(&self, envelope: Envelope) -> bool {
        self.send(&envelope).await
    }
}

async fn supervise(
    inner: Arc<Inner>,
    target: Target,
    generation: u64,
    cancel: CancellationToken,
) {
    let policy = inner.policy;
    let mut backoff = Backoff::new(policy.initial_backoff, policy.max_backoff);

    loop {
        info!(url = %target.url, "connecting to gateway");
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            attempt = tokio::time::timeout(policy.handshake_timeout, inner.connector.connect(&target)) => attempt,
        };

        match attempt {
            Ok(Ok(link)) => {
                if !inner.state.set(generation, ConnectionState::Connected) {
                    return;
                }
                backoff.reset();
                info!(url = %target.url, "connected to gateway");

                let outcome = run_link(&inner, link, generation, &cancel).await;
                inner.drop_writer(generation);
                match outcome {
                    Ok(()) => debug!("gateway link closed"),
                    Err(e) => {
                        warn!(error = %e, "gateway link failed");
                        inner.record_error(&e);
                    },
                }
            },
            Ok(Err(e)) if e.is_fatal() => {
                error!(error = %e, "gateway rejected credentials, not retrying");
                inner.record_error(&e);
                inner.state.set(generation, ConnectionState::Disconnected);
                cancel.cancel();
                return;
            },
            Ok(Err(e)) => {
                warn!(error = %e, "connection attempt failed");
                inner.record_error(&e);
            },
            Err(_) => {
                warn!(timeout_ms = policy.handshake_timeout.as_millis() as u64, "handshake timed out");
                inner.record_error(&Error::Connection("handshake timed out".into()));
            },
        }

        if cancel.is_cancelled() || !inner.state.set(generation, ConnectionState::Reconnecting) {
            return;
        }
        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

/// Pump one established link until it closes, fails, goes idle, or the
/// supervisor is cancelled.
async fn run_link(
    inner: &Inner,
    link: Link,
    generation: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let Link {
        mut sink,
        mut stream,
    } = link;
    let (tx, mut writes) = mpsc::channel::<WriteRequest>(WRITE_QUEUE);
    inner.install_writer(generation, tx);

    let keepalive = inner.policy.keepalive;
    let ping_every = if keepalive.is_zero() {
        Duration::from_secs(3600)
    } else {
        keepalive
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Outbound::Close).await;
                return Ok(());
            },
            frame = stream.next() => match frame {
                Some(Ok(Inbound::Text(text))) => {
                    last_seen = Instant::now();
                    match decode(&text) {
                        Ok(envelope) => {
                            // No subscribers is fine; the frame is dropped.
                            let _ = inner.incoming.send(envelope);
                        },
                        Err(e) => warn!(error = %e, "skipping malformed frame"),
                    }
                },
                Some(Ok(Inbound::Ping(data))) => {
                    last_seen = Instant::now();
                    sink.send(Outbound::Pong(data)).await?;
                },
                Some(Ok(Inbound::Pong)) => last_seen = Instant::now(),
                Some(Ok(Inbound::Close)) | None => {
                    debug!("gateway closed the connection");
                    return Ok(());
                },
                Some(Err(e)) => return Err(e),
            },
            Some(WriteRequest { text, reply }) = writes.recv() => {
                let result = sink.send(Outbound::Text(text)).await;
                let _ = reply.send(result.is_ok());
                result?;
            },
            _ = ticker.tick(), if !keepalive.is_zero() => {
                if last_seen.elapsed() >= keepalive * 2 {
                    return Err(Error::Connection("keepalive timed out".into()));
                }
                sink.send(Outbound::Ping).await?;
            },
        }
    }
}
