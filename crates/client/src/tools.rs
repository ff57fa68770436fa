//! Device-side tool calls requested by the gateway.
//!
//! Every `tool_request` the bridge accepts is answered with exactly one
//! `tool_response` carrying the same request id: the handler's result, an
//! error text, or [`HANDLER_NOT_CONFIGURED`] when no handler is installed.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Map, Value},
    tether_protocol::{Envelope, HANDLER_NOT_CONFIGURED, ToolRequest},
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::connection::EnvelopeSender;

/// Response text for requests cut short by [`ToolBridge::shutdown`].
pub const TOOL_CANCELLED: &str = "error: tool request cancelled";

/// Executes device actions on behalf of the gateway.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, action: &str, params: Option<&Map<String, Value>>) -> Result<String>;
}

struct BridgeInner {
    sender: Arc<dyn EnvelopeSender>,
    handler: RwLock<Option<Arc<dyn ToolHandler>>>,
    in_flight: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl BridgeInner {
    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> Option<Arc<dyn ToolHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Answers `tool_request` envelopes. Clones share handler and in-flight set.
#[derive(Clone)]
pub struct ToolBridge {
    inner: Arc<BridgeInner>,
}

impl ToolBridge {
    pub fn new(sender: Arc<dyn EnvelopeSender>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                sender,
                handler: RwLock::new(None),
                in_flight: Mutex::new(HashSet::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Install (or replace) the handler. Requests already running keep the
    /// handler they started with.
    pub fn set_handler(&self, handler: Arc<dyn ToolHandler>) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn clear_handler(&self) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.inner.handler().is_some()
    }

    /// Number of requests still waiting for their response to be sent.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight().len()
    }

    /// Start answering one `tool_request`. The returned task resolves to
    /// whether the response was written.
    ///
    /// Returns `None` when the request cannot or must not be answered: it
    /// carries no request id at all, or the same id is already in flight.
    pub fn handle(&self, envelope: &Envelope) -> Option<JoinHandle<bool>> {
        let request = match ToolRequest::from_envelope(envelope) {
            Ok(request) => request,
            Err(tether_protocol::Error::MalformedToolRequest {
                request_id,
                message,
            }) => {
                warn!(request_id = %request_id, error = %message, "malformed tool request");
                let content = format!("error: malformed tool request: {message}");
                return self.respond_once(request_id, |_| async move { content });
            },
            Err(e) => {
                error!(error = %e, "dropping tool request that cannot be answered");
                return None;
            },
        };

        info!(request_id = %request.request_id, action = %request.action, "tool request");
        let handler = self.inner.handler();
        let cancel = self.inner.cancel.clone();
        let ToolRequest {
            request_id,
            action,
            params,
        } = request;

        self.respond_once(request_id, move |id| async move {
            let Some(handler) = handler else {
                debug!(request_id = %id, "no tool handler installed");
                return HANDLER_NOT_CONFIGURED.to_string();
            };
            tokio::select! {
                _ = cancel.cancelled() => TOOL_CANCELLED.to_string(),
                result = handler.handle(&action, params.as_ref()) => match result {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(request_id = %id, action = %action, error = %e, "tool handler failed");
                        format!("error: {e:#}")
                    },
                },
            }
        })
    }

    /// Reserve `request_id`, compute the response content, send it, release.
    fn respond_once<F, Fut>(&self, request_id: String, produce: F) -> Option<JoinHandle<bool>>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        if !self.inner.in_flight().insert(request_id.clone()) {
            warn!(request_id = %request_id, "duplicate tool request ignored");
            return None;
        }

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let content = produce(request_id.clone()).await;
            let sent = inner
                .sender
                .send_envelope(Envelope::tool_response(request_id.clone(), content))
                .await;
            if !sent {
                warn!(request_id = %request_id, "tool response could not be sent");
            }
            inner.in_flight().remove(&request_id);
            sent
        }))
    }

    /// Answer requests from the router's tool queue until it closes or the
    /// bridge is shut down.
    pub async fn run(&self, mut requests: mpsc::UnboundedReceiver<Envelope>) {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                next = requests.recv() => match next {
                    Some(envelope) => {
                        self.handle(&envelope);
                    },
                    None => break,
                },
            }
        }
        debug!("tool bridge stopped");
    }

    /// Cancel running handlers. Their requests are answered with
    /// [`TOOL_CANCELLED`]; new requests are no longer read by `run`.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}
