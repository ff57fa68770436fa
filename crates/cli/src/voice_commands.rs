//! Voice mode with the terminal standing in for microphone and speaker:
//! typed lines are "heard", replies are printed at speaking pace.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    clap::Args,
    tether_client::EnvelopeSender,
    tether_config::TetherConfig,
    tether_voice::{
        CaptureSink, FrameSource, SpeechCapture, SpeechPlayback, VoiceDeps, VoiceError,
        VoiceOrchestrator, VoicePhase, VoiceResult, VoiceSession,
    },
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        sync::Notify,
    },
};

use crate::{device_tools::DeviceTools, session::Session};

const HELP: &str = "Commands: /start /stop /stop-after-reply /interrupt /camera /screen /quit. \
                    Any other line is what you said.";

#[derive(Args)]
pub struct VoiceArgs {
    /// Image attached as the camera frame while the camera is on.
    #[arg(long)]
    frame: Option<PathBuf>,
    /// Simulated speaking time per word, in milliseconds.
    #[arg(long, default_value_t = 250)]
    word_ms: u64,
}

#[derive(Default)]
struct TerminalCapture {
    sink: Mutex<Option<CaptureSink>>,
}

impl TerminalCapture {
    /// Deliver a typed line as the final transcript. Returns `false` when no
    /// capture session is open.
    fn hear(&self, text: &str) -> bool {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sink {
            Some(sink) => {
                sink.final_text(text);
                true
            },
            None => false,
        }
    }
}

#[async_trait]
impl SpeechCapture for TerminalCapture {
    async fn start(&self, sink: CaptureSink) -> VoiceResult<()> {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> VoiceResult<()> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

struct TerminalPlayback {
    per_word: Duration,
    cut: Notify,
}

#[async_trait]
impl SpeechPlayback for TerminalPlayback {
    async fn speak(&self, text: &str) -> VoiceResult<()> {
        println!("agent> {text}");
        let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        tokio::select! {
            _ = tokio::time::sleep(self.per_word.saturating_mul(words)) => {},
            _ = self.cut.notified() => eprintln!("(cut off)"),
        }
        Ok(())
    }

    async fn stop(&self) -> VoiceResult<()> {
        self.cut.notify_waiters();
        Ok(())
    }
}

struct FileFrame {
    path: PathBuf,
}

#[async_trait]
impl FrameSource for FileFrame {
    async fn capture_frame(&self) -> VoiceResult<Option<String>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| VoiceError::Frame(format!("{}: {e}", self.path.display())))?;
        Ok(Some(STANDARD.encode(bytes)))
    }
}

pub async fn run_voice(config: &TetherConfig, args: VoiceArgs) -> Result<()> {
    let session = Session::open(config).await?;
    session.tools.set_handler(Arc::new(DeviceTools));

    let capture = Arc::new(TerminalCapture::default());
    let sender: Arc<dyn EnvelopeSender> = Arc::new(session.connection.clone());
    let deps = VoiceDeps {
        capture: capture.clone(),
        playback: Arc::new(TerminalPlayback {
            per_word: Duration::from_millis(args.word_ms),
            cut: Notify::new(),
        }),
        camera: args
            .frame
            .map(|path| Arc::new(FileFrame { path }) as Arc<dyn FrameSource>),
        screen: None,
        sender,
    };
    let voice = VoiceOrchestrator::spawn(
        deps,
        &config.voice,
        session.router.chat(),
        session.connection.state(),
    );

    eprintln!("{HELP}");
    voice.start()?;

    let mut updates = voice.session();
    let mut last = VoiceSession::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                let sent = match line.trim() {
                    "" => Ok(()),
                    "/quit" => break Ok(()),
                    "/start" => voice.start(),
                    "/stop" => voice.stop(),
                    "/stop-after-reply" => voice.stop_after_reply(),
                    "/interrupt" => voice.interrupt(),
                    "/camera" => voice.toggle_camera(),
                    "/screen" => voice.toggle_screen_capture(),
                    text => {
                        if !capture.hear(text) {
                            eprintln!("(not listening; /start or /interrupt first)");
                        }
                        Ok(())
                    },
                };
                if let Err(e) = sent {
                    break Err(e.into());
                }
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = updates.borrow_and_update().clone();
                report(&last, &current);
                last = current;
            },
        }
    };

    voice.shutdown();
    session.close();
    result
}

/// Print what changed between two snapshots.
fn report(before: &VoiceSession, after: &VoiceSession) {
    if after.phase != before.phase {
        match after.phase {
            VoicePhase::Listening => eprintln!("(listening)"),
            VoicePhase::Processing => eprintln!("(thinking about \"{}\")", after.recognized_text),
            VoicePhase::Speaking | VoicePhase::Idle => eprintln!("[{}]", after.phase),
        }
    }
    if after.status_text != before.status_text
        && let Some(status) = &after.status_text
    {
        eprintln!("... {status}");
    }
    if after.error_message != before.error_message
        && let Some(error) = &after.error_message
    {
        eprintln!("Voice error: {error}");
    }
    if after.camera_active != before.camera_active {
        eprintln!("camera {}", if after.camera_active { "on" } else { "off" });
    }
    if after.screen_capture_active != before.screen_capture_active {
        eprintln!(
            "screen capture {}",
            if after.screen_capture_active { "on" } else { "off" }
        );
    }
}
