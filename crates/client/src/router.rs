//! Demultiplexes the inbound envelope stream.
//!
//! [`SessionRouter::route`] is a pure classification. The router instance only
//! owns the three outlets; consumers subscribe to the one they need.
//!
//! Chat and lifecycle traffic are broadcast and hold the last
//! [`CHANNEL_CAPACITY`] envelopes per subscriber; a subscriber that falls
//! further behind loses the oldest. Tool requests go through an unbounded
//! queue with a single consumer so none is ever skipped.

use std::sync::{Arc, Mutex, PoisonError};

use {
    futures::{Stream, StreamExt},
    tether_protocol::{Envelope, EnvelopeType},
    tokio::sync::{broadcast, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, trace},
};

/// Per-subscriber backlog of the broadcast outlets.
pub const CHANNEL_CAPACITY: usize = 256;

/// Destination of one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Plain turns, `status`, `status_end`, `tool_response` and unknown tags.
    Mirror,
    /// `tool_request`.
    ToolBridge,
    /// `exit` and `setup_required`, for host lifecycle handling.
    Lifecycle,
}

#[derive(Clone)]
pub struct SessionRouter {
    chat: broadcast::Sender<Envelope>,
    tool_calls: mpsc::UnboundedSender<Envelope>,
    /// Handed out once by [`SessionRouter::take_tool_calls`].
    tool_calls_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>>,
    lifecycle: broadcast::Sender<Envelope>,
}

impl Default for SessionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRouter {
    #[must_use]
    pub fn new() -> Self {
        let (tool_calls, tool_calls_rx) = mpsc::unbounded_channel();
        Self {
            chat: broadcast::channel(CHANNEL_CAPACITY).0,
            tool_calls,
            tool_calls_rx: Arc::new(Mutex::new(Some(tool_calls_rx))),
            lifecycle: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Classify an envelope. Total over every possible `type`.
    #[must_use]
    pub fn route(envelope: &Envelope) -> Route {
        match envelope.kind() {
            Some(EnvelopeType::ToolRequest) => Route::ToolBridge,
            Some(EnvelopeType::Exit | EnvelopeType::SetupRequired) => Route::Lifecycle,
            Some(
                EnvelopeType::Status
                | EnvelopeType::StatusEnd
                | EnvelopeType::ToolResponse
                | EnvelopeType::Other(_),
            )
            | None => Route::Mirror,
        }
    }

    /// Conversation traffic for the mirror and the voice orchestrator.
    #[must_use]
    pub fn chat(&self) -> broadcast::Receiver<Envelope> {
        self.chat.subscribe()
    }

    /// The tool-request queue. Requests routed before this is called are
    /// kept. Only the first caller gets it.
    #[must_use]
    pub fn take_tool_calls(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.tool_calls_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[must_use]
    pub fn lifecycle(&self) -> broadcast::Receiver<Envelope> {
        self.lifecycle.subscribe()
    }

    /// Forward one envelope to its channel. Returns where it went.
    pub fn dispatch(&self, envelope: Envelope) -> Route {
        let route = Self::route(&envelope);
        trace!(?route, kind = ?envelope.kind(), "routing envelope");
        let delivered = match route {
            Route::Mirror => self.chat.send(envelope).is_ok(),
            Route::Lifecycle => self.lifecycle.send(envelope).is_ok(),
            Route::ToolBridge => match self.tool_calls.send(envelope) {
                Ok(()) => true,
                Err(mpsc::error::SendError(envelope)) => {
                    error!(request_id = ?envelope.request_id(), "tool request queue closed");
                    false
                },
            },
        };
        if !delivered {
            debug!(?route, "no subscribers for routed envelope");
        }
        route
    }

    /// Route every envelope from `incoming`, in order, until it ends or
    /// `cancel` fires.
    pub async fn run(&self, incoming: impl Stream<Item = Envelope>, cancel: CancellationToken) {
        tokio::pin!(incoming);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = incoming.next() => match next {
                    Some(envelope) => {
                        self.dispatch(envelope);
                    },
                    None => break,
                },
            }
        }
        debug!("session router stopped");
    }
}
