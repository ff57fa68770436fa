//! The mirror itself: optimistic sends, inbound turns, the status label and
//! the paginated window the UI observes.

use std::{path::Path, sync::Arc};

use {
    tether_client::EnvelopeSender,
    tether_config::MirrorConfig,
    tether_protocol::{Envelope, EnvelopeType},
    tokio::sync::{Mutex, broadcast, watch},
    tracing::{debug, error, info, warn},
};

use crate::{
    Result,
    media::{ImageAttachment, MediaStore},
    store::TurnStore,
    turn::{Turn, TurnStatus},
};

/// Turn database, relative to the data directory.
pub const DATABASE_FILE: &str = "mirror.db";
/// Saved attachments, relative to the data directory.
pub const MEDIA_DIR: &str = "media";

struct Inner {
    store: TurnStore,
    media: MediaStore,
    sender: Arc<dyn EnvelopeSender>,
    page_size: usize,
    limit: watch::Sender<usize>,
    messages: watch::Sender<Vec<Turn>>,
    status_label: watch::Sender<Option<String>>,
    /// Serializes window re-queries so an older result never overwrites a
    /// newer one.
    refresh: Mutex<()>,
}

/// Sole owner of the turn store. Clones share state.
#[derive(Clone)]
pub struct LocalMirror {
    inner: Arc<Inner>,
}

impl LocalMirror {
    pub fn new(
        store: TurnStore,
        media: MediaStore,
        sender: Arc<dyn EnvelopeSender>,
        config: &MirrorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                media,
                sender,
                page_size: config.page_size,
                limit: watch::channel(config.initial_load).0,
                messages: watch::channel(Vec::new()).0,
                status_label: watch::channel(None).0,
                refresh: Mutex::new(()),
            }),
        }
    }

    /// Open the database and media directory under `data_dir` and load the
    /// initial window.
    pub async fn open(
        data_dir: &Path,
        sender: Arc<dyn EnvelopeSender>,
        config: &MirrorConfig,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let store = TurnStore::open(&data_dir.join(DATABASE_FILE)).await?;
        let mirror = Self::new(store, MediaStore::new(data_dir.join(MEDIA_DIR)), sender, config);
        mirror.refresh().await?;
        info!(path = %data_dir.display(), "local mirror ready");
        Ok(mirror)
    }

    /// Visible turns, oldest first.
    #[must_use]
    pub fn messages(&self) -> watch::Receiver<Vec<Turn>> {
        self.inner.messages.subscribe()
    }

    /// Text of the open `status` pulse, if any.
    #[must_use]
    pub fn status_label(&self) -> watch::Receiver<Option<String>> {
        self.inner.status_label.subscribe()
    }

    /// Current size of the visible window.
    #[must_use]
    pub fn query_limit(&self) -> usize {
        *self.inner.limit.borrow()
    }

    /// Persist a user turn, send it, and record the outcome.
    ///
    /// The turn is stored as `SENDING` before anything goes on the wire and
    /// ends as `SENT` or `FAILED`. Failures are not retried.
    pub async fn send_message(&self, text: &str, images: Vec<ImageAttachment>) -> Result<Turn> {
        let mut saved = Vec::with_capacity(images.len());
        for attachment in &images {
            saved.push(self.inner.media.save(attachment).await?);
        }
        let encoded: Vec<String> = images.iter().map(ImageAttachment::to_base64).collect();

        let mut turn = Turn::outgoing(text, saved);
        self.inner.store.insert(&turn).await?;
        self.refresh_quietly().await;

        let envelope = Envelope::turn(text).with_images(encoded);
        let sent = self.inner.sender.send_envelope(envelope).await;
        turn.status = if sent {
            TurnStatus::Sent
        } else {
            warn!(turn_id = %turn.id, "message could not be sent");
            TurnStatus::Failed
        };
        if let Err(e) = self.inner.store.update_status(&turn.id, turn.status).await {
            error!(turn_id = %turn.id, error = %e, "failed to record send outcome");
        }
        self.refresh_quietly().await;
        debug!(turn_id = %turn.id, status = %turn.status, "user turn settled");
        Ok(turn)
    }

    /// Apply one envelope from the router's chat channel.
    pub async fn handle_inbound(&self, envelope: &Envelope) -> Result<()> {
        match envelope.kind() {
            Some(EnvelopeType::Status) => {
                self.inner
                    .status_label
                    .send_replace(Some(envelope.content().to_string()));
            },
            Some(EnvelopeType::StatusEnd) => {
                self.inner.status_label.send_replace(None);
            },
            Some(
                EnvelopeType::ToolRequest | EnvelopeType::Exit | EnvelopeType::SetupRequired,
            ) => {
                debug!(kind = ?envelope.kind(), "mirror ignoring non-conversation envelope");
            },
            _ => {
                self.inner.status_label.send_replace(None);
                let turn = Turn::received(envelope);
                self.inner.store.insert(&turn).await?;
                self.refresh().await?;
            },
        }
        Ok(())
    }

    /// Widen the window by one page and re-query.
    pub async fn load_more(&self) -> Result<()> {
        let page = self.inner.page_size;
        self.inner.limit.send_modify(|limit| *limit = limit.saturating_add(page));
        self.refresh().await
    }

    pub async fn turn(&self, id: &str) -> Result<Option<Turn>> {
        self.inner.store.get(id).await
    }

    /// Drop the whole history.
    pub async fn clear(&self) -> Result<()> {
        let removed = self.inner.store.clear().await?;
        info!(removed, "cleared local mirror");
        self.refresh().await
    }

    /// Re-query the window and publish it oldest first.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.inner.refresh.lock().await;
        let limit = self.query_limit();
        let mut turns = self.inner.store.recent(limit).await?;
        turns.reverse();
        self.inner.messages.send_replace(turns);
        Ok(())
    }

    /// Refresh for display only. A failure leaves the previous window up.
    async fn refresh_quietly(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "failed to refresh message window");
        }
    }

    /// Consume the router's chat channel until it closes.
    pub async fn run(&self, mut chat: broadcast::Receiver<Envelope>) {
        loop {
            match chat.recv().await {
                Ok(envelope) => {
                    if let Err(e) = self.handle_inbound(&envelope).await {
                        error!(error = %e, "failed to apply inbound envelope");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    error!(skipped, "mirror lagged behind inbound traffic, turns lost");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("local mirror stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{
            store::tests::{execute_raw, memory_store},
            turn::Sender,
        },
        async_trait::async_trait,
        std::sync::{
            Mutex as StdMutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    #[derive(Default)]
    struct FakeSender {
        reject: AtomicBool,
        sent: StdMutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl EnvelopeSender for FakeSender {
        async fn send_envelope(&self, envelope: Envelope) -> bool {
            self.sent.lock().unwrap().push(envelope);
            !self.reject.load(Ordering::SeqCst)
        }
    }

    fn config(initial_load: usize, page_size: usize) -> MirrorConfig {
        MirrorConfig {
            initial_load,
            page_size,
            data_dir: None,
        }
    }

    async fn mirror_with(sender: Arc<FakeSender>, config: &MirrorConfig) -> LocalMirror {
        let media = MediaStore::new(std::env::temp_dir().join("tether-mirror-tests"));
        LocalMirror::new(memory_store().await, media, sender, config)
    }

    async fn mirror() -> (LocalMirror, Arc<FakeSender>) {
        let sender = Arc::new(FakeSender::default());
        (mirror_with(Arc::clone(&sender), &config(50, 30)).await, sender)
    }

    // ── Sending ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn successful_send_marks_sent() {
        let (mirror, sender) = mirror().await;
        let turn = mirror.send_message("Hello", vec![]).await.unwrap();

        assert_eq!(turn.status, TurnStatus::Sent);
        assert_eq!(turn.sender, Sender::User);
        let stored = mirror.turn(&turn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TurnStatus::Sent);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content(), "Hello");
        assert!(sent[0].images().is_empty());
        assert_eq!(sent[0].kind(), None);
    }

    #[tokio::test]
    async fn failed_send_leaves_exactly_one_failed_turn() {
        let (mirror, sender) = mirror().await;
        sender.reject.store(true, Ordering::SeqCst);

        let turn = mirror.send_message("x", vec![]).await.unwrap();
        assert_eq!(turn.status, TurnStatus::Failed);

        let messages = mirror.messages().borrow().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, turn.id);
        assert_eq!(messages[0].status, TurnStatus::Failed);
    }

    #[tokio::test]
    async fn corrupt_history_row_does_not_block_sending() {
        let (mirror, sender) = mirror().await;
        execute_raw(
            &mirror.inner.store,
            "INSERT INTO turns (id, content, sender, timestamp, status) \
             VALUES ('bad', 'old', 'AGENT', 1, 'LOST')",
        )
        .await;

        let turn = mirror.send_message("hello", vec![]).await.unwrap();
        assert_eq!(turn.status, TurnStatus::Sent);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);

        let stored = mirror.turn(&turn.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TurnStatus::Sent);
        let visible: Vec<String> = mirror
            .messages()
            .borrow()
            .iter()
            .map(|t| t.content.clone())
            .collect();
        assert_eq!(visible, vec!["hello"]);
    }

    #[tokio::test]
    async fn images_are_saved_and_sent_as_base64() {
        let dir = tempfile::tempdir().unwrap();
        let sender = Arc::new(FakeSender::default());
        let mirror = LocalMirror::new(
            memory_store().await,
            MediaStore::new(dir.path()),
            sender.clone(),
            &config(50, 30),
        );

        let attachment = ImageAttachment::jpeg(b"jpeg-bytes".to_vec(), 100, 200);
        let turn = mirror
            .send_message("look", vec![attachment.clone()])
            .await
            .unwrap();

        assert_eq!(turn.images.len(), 1);
        assert_eq!((turn.images[0].width, turn.images[0].height), (100, 200));
        assert!(Path::new(&turn.images[0].path).starts_with(dir.path()));
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].images(), &[attachment.to_base64()]);
    }

    #[tokio::test]
    async fn observers_see_new_turns() {
        let (mirror, _) = mirror().await;
        let mut messages = mirror.messages();
        let turn = mirror.send_message("hi", vec![]).await.unwrap();

        messages.changed().await.unwrap();
        let latest = messages.borrow().clone();
        assert_eq!(latest.last().unwrap().id, turn.id);
    }

    // ── Inbound ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn status_then_status_end_clears_label() {
        let (mirror, _) = mirror().await;
        mirror
            .handle_inbound(&Envelope::typed(EnvelopeType::Status, "Thinking..."))
            .await
            .unwrap();
        assert_eq!(mirror.status_label().borrow().as_deref(), Some("Thinking..."));

        mirror
            .handle_inbound(&Envelope::typed(EnvelopeType::StatusEnd, ""))
            .await
            .unwrap();
        assert_eq!(*mirror.status_label().borrow(), None);
        assert!(mirror.messages().borrow().is_empty());
    }

    #[tokio::test]
    async fn agent_turn_clears_label_and_persists() {
        let (mirror, _) = mirror().await;
        mirror
            .handle_inbound(&Envelope::typed(EnvelopeType::Status, "Thinking..."))
            .await
            .unwrap();
        mirror.handle_inbound(&Envelope::turn("Hello!")).await.unwrap();

        assert_eq!(*mirror.status_label().borrow(), None);
        let messages = mirror.messages().borrow().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello!");
        assert_eq!(messages[0].sender, Sender::Agent);
        assert_eq!(messages[0].status, TurnStatus::Received);
    }

    #[tokio::test]
    async fn unknown_types_are_persisted_with_their_tag() {
        let (mirror, _) = mirror().await;
        mirror
            .handle_inbound(&Envelope::typed(EnvelopeType::Other("notice".into()), "fyi"))
            .await
            .unwrap();
        let messages = mirror.messages().borrow().clone();
        assert_eq!(messages[0].message_type.as_deref(), Some("notice"));
    }

    #[tokio::test]
    async fn lifecycle_envelopes_are_not_persisted() {
        let (mirror, _) = mirror().await;
        mirror
            .handle_inbound(&Envelope::typed(EnvelopeType::Exit, "bye"))
            .await
            .unwrap();
        mirror
            .handle_inbound(&Envelope::typed(EnvelopeType::SetupRequired, ""))
            .await
            .unwrap();
        assert_eq!(mirror.inner.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_applies_routed_envelopes() {
        let (mirror, _) = mirror().await;
        let (tx, rx) = broadcast::channel(8);
        tx.send(Envelope::typed(EnvelopeType::Status, "working")).unwrap();
        tx.send(Envelope::turn("done")).unwrap();
        drop(tx);

        mirror.run(rx).await;
        assert_eq!(mirror.messages().borrow().len(), 1);
        assert_eq!(*mirror.status_label().borrow(), None);
    }

    // ── Pagination ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn load_more_widens_by_page_size() {
        let sender = Arc::new(FakeSender::default());
        let mirror = mirror_with(sender, &config(50, 30)).await;
        let mut limits = vec![mirror.query_limit()];
        for _ in 0..3 {
            mirror.load_more().await.unwrap();
            limits.push(mirror.query_limit());
        }
        assert_eq!(limits, vec![50, 80, 110, 140]);
    }

    #[tokio::test]
    async fn window_shows_most_recent_turns_oldest_first() {
        let sender = Arc::new(FakeSender::default());
        let mirror = mirror_with(sender, &config(2, 2)).await;
        for content in ["one", "two", "three", "four", "five"] {
            mirror.handle_inbound(&Envelope::turn(content)).await.unwrap();
            // Distinct timestamps keep the order independent of rowid ties.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let visible = |m: &LocalMirror| -> Vec<String> {
            m.messages().borrow().iter().map(|t| t.content.clone()).collect()
        };
        assert_eq!(visible(&mirror), vec!["four", "five"]);
        mirror.load_more().await.unwrap();
        assert_eq!(visible(&mirror), vec!["two", "three", "four", "five"]);
        mirror.load_more().await.unwrap();
        assert_eq!(visible(&mirror).len(), 5);
    }

    #[tokio::test]
    async fn clear_empties_window() {
        let (mirror, _) = mirror().await;
        mirror.send_message("a", vec![]).await.unwrap();
        mirror.clear().await.unwrap();
        assert!(mirror.messages().borrow().is_empty());
    }

    #[tokio::test]
    async fn open_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let sender: Arc<FakeSender> = Arc::new(FakeSender::default());
        let first = LocalMirror::open(dir.path(), sender.clone(), &config(50, 30))
            .await
            .unwrap();
        let turn = first.send_message("survives", vec![]).await.unwrap();
        drop(first);

        let second = LocalMirror::open(dir.path(), sender, &config(50, 30))
            .await
            .unwrap();
        assert_eq!(second.messages().borrow()[0].id, turn.id);
    }
}
