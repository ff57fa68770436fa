//! Actor that runs the voice loop.
//!
//! One task owns the [`VoiceMachine`]. Commands, capture reports, chat
//! envelopes and connection changes are all funneled into that task, which
//! steps the machine, publishes the new [`VoiceSession`], and then carries
//! out the resulting effects. Sends and playbacks run in their own tasks
//! and report back as events.

use std::{sync::Arc, time::Duration};

use {
    tether_client::{ConnectionState, EnvelopeSender},
    tether_config::VoiceConfig,
    tether_protocol::Envelope,
    tokio::sync::{broadcast, mpsc, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    collaborators::{CaptureSink, FrameSource, SpeechCapture, SpeechPlayback},
    error::{VoiceError, VoiceResult},
    machine::{Effect, VoiceEvent, VoiceMachine},
    session::VoiceSession,
};

/// Engines and outbound path the orchestrator drives.
#[derive(Clone)]
pub struct VoiceDeps {
    pub capture: Arc<dyn SpeechCapture>,
    pub playback: Arc<dyn SpeechPlayback>,
    pub camera: Option<Arc<dyn FrameSource>>,
    pub screen: Option<Arc<dyn FrameSource>>,
    pub sender: Arc<dyn EnvelopeSender>,
}

/// Handle to a running voice loop. Clones control the same loop.
#[derive(Clone)]
pub struct VoiceOrchestrator {
    events: mpsc::UnboundedSender<VoiceEvent>,
    session: watch::Receiver<VoiceSession>,
    shutdown: CancellationToken,
}

impl VoiceOrchestrator {
    /// Spawn the loop on the current runtime.
    ///
    /// `chat` is the router's chat channel; `connection` is the connection
    /// manager's state.
    pub fn spawn(
        deps: VoiceDeps,
        config: &VoiceConfig,
        chat: broadcast::Receiver<Envelope>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = watch::channel(VoiceSession::default());
        let shutdown = CancellationToken::new();

        let actor = Actor {
            machine: VoiceMachine::new(),
            deps,
            input_mode: config.input_mode.clone(),
            playback_timeout: Duration::from_secs(config.playback_timeout_secs),
            events: events_tx.clone(),
            session: session_tx,
            work: CancellationToken::new(),
        };
        tokio::spawn(actor.run(events_rx, chat, connection, shutdown.clone()));

        Self {
            events: events_tx,
            session: session_rx,
            shutdown,
        }
    }

    /// IDLE → LISTENING. A no-op in any other phase.
    pub fn start(&self) -> VoiceResult<()> {
        self.command(VoiceEvent::Start)
    }

    /// Cancel everything and go IDLE.
    pub fn stop(&self) -> VoiceResult<()> {
        self.command(VoiceEvent::Stop)
    }

    /// Go IDLE once the current reply has been spoken.
    pub fn stop_after_reply(&self) -> VoiceResult<()> {
        self.command(VoiceEvent::StopAfterReply)
    }

    /// Drop the pending or playing reply and listen again.
    pub fn interrupt(&self) -> VoiceResult<()> {
        self.command(VoiceEvent::Interrupt)
    }

    pub fn toggle_camera(&self) -> VoiceResult<()> {
        self.command(VoiceEvent::ToggleCamera)
    }

    pub fn toggle_screen_capture(&self) -> VoiceResult<()> {
        self.command(VoiceEvent::ToggleScreenCapture)
    }

    pub fn session(&self) -> watch::Receiver<VoiceSession> {
        self.session.clone()
    }

    pub fn current(&self) -> VoiceSession {
        self.session.borrow().clone()
    }

    /// Stop the session and end the loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn command(&self, event: VoiceEvent) -> VoiceResult<()> {
        self.events.send(event).map_err(|_| VoiceError::Stopped)
    }
}

struct Actor {
    machine: VoiceMachine,
    deps: VoiceDeps,
    input_mode: String,
    playback_timeout: Duration,
    events: mpsc::UnboundedSender<VoiceEvent>,
    session: watch::Sender<VoiceSession>,
    /// Parent of every outstanding capture start, send and playback.
    work: CancellationToken,
}

impl Actor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<VoiceEvent>,
        mut chat: broadcast::Receiver<Envelope>,
        mut connection: watch::Receiver<ConnectionState>,
        shutdown: CancellationToken,
    ) {
        let mut chat_open = true;
        let mut connection_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = events.recv() => self.apply(event).await,
                next = chat.recv(), if chat_open => match next {
                    Ok(envelope) => self.apply(VoiceEvent::Inbound(envelope)).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "voice chat receiver lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => chat_open = false,
                },
                changed = connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let state = *connection.borrow_and_update();
                        if matches!(
                            state,
                            ConnectionState::Disconnected | ConnectionState::Reconnecting
                        ) {
                            self.apply(VoiceEvent::ConnectionLost).await;
                        }
                    },
                    Err(_) => connection_open = false,
                },
            }
        }

        self.apply(VoiceEvent::Stop).await;
        self.work.cancel();
        debug!("voice loop stopped");
    }

    async fn apply(&mut self, event: VoiceEvent) {
        let effects = self.machine.step(event);
        self.session.send_replace(self.machine.session().clone());
        for effect in effects {
            self.execute(effect).await;
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartCapture { listen } => self.start_capture(listen),
            Effect::StopCapture => {
                if let Err(e) = self.deps.capture.stop().await {
                    warn!(error = %e, "failed to stop capture");
                }
            },
            Effect::StopPlayback => {
                if let Err(e) = self.deps.playback.stop().await {
                    warn!(error = %e, "failed to stop playback");
                }
            },
            Effect::CancelWork => {
                self.work.cancel();
                self.work = CancellationToken::new();
            },
            Effect::SendUtterance {
                reply,
                text,
                with_camera,
                with_screen,
            } => self.send_utterance(reply, text, with_camera, with_screen),
            Effect::Speak { reply, text } => self.speak(reply, text),
        }
    }

    /// Acquire the microphone off the actor so a slow device never holds up
    /// `stop` or `interrupt`.
    fn start_capture(&self, listen: u64) {
        let capture = Arc::clone(&self.deps.capture);
        let sink = CaptureSink::new(listen, self.events.clone());
        let events = self.events.clone();
        let work = self.work.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = work.cancelled() => debug!(listen, "capture start abandoned"),
                result = capture.start(sink) => {
                    if let Err(e) = result {
                        let _ = events.send(VoiceEvent::CaptureFailed {
                            listen,
                            message: e.to_string(),
                        });
                    }
                },
            }
        });
    }

    fn send_utterance(&self, reply: u64, text: String, with_camera: bool, with_screen: bool) {
        let sources: Vec<Arc<dyn FrameSource>> = [
            self.deps.camera.clone().filter(|_| with_camera),
            self.deps.screen.clone().filter(|_| with_screen),
        ]
        .into_iter()
        .flatten()
        .collect();
        let sender = Arc::clone(&self.deps.sender);
        let mode = self.input_mode.clone();
        let events = self.events.clone();
        let work = self.work.clone();

        tokio::spawn(async move {
            let send = async {
                let mut images = Vec::new();
                for source in sources {
                    match source.capture_frame().await {
                        Ok(Some(frame)) => images.push(frame),
                        Ok(None) => {},
                        Err(e) => warn!(error = %e, "sending utterance without frame"),
                    }
                }
                info!(chars = text.len(), images = images.len(), "sending utterance");
                let envelope = Envelope::turn(text)
                    .with_input_mode(mode)
                    .with_images(images);
                sender.send_envelope(envelope).await
            };
            tokio::select! {
                _ = work.cancelled() => debug!(reply, "utterance send abandoned"),
                sent = send => {
                    let _ = events.send(VoiceEvent::SendResult { reply, sent });
                },
            }
        });
    }

    fn speak(&self, reply: u64, text: String) {
        let playback = Arc::clone(&self.deps.playback);
        let limit = self.playback_timeout;
        let events = self.events.clone();
        let work = self.work.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = work.cancelled() => debug!(reply, "playback abandoned"),
                result = tokio::time::timeout(limit, playback.speak(&text)) => {
                    let event = match result {
                        Ok(Ok(())) => VoiceEvent::PlaybackFinished { reply },
                        Ok(Err(e)) => VoiceEvent::PlaybackFailed {
                            reply,
                            message: e.to_string(),
                        },
                        Err(_) => VoiceEvent::PlaybackFailed {
                            reply,
                            message: VoiceError::Playback(format!(
                                "timed out after {}s",
                                limit.as_secs()
                            ))
                            .to_string(),
                        },
                    };
                    let _ = events.send(event);
                },
            }
        });
    }
}
