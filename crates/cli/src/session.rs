//! Wiring of the session core: one connection feeding the router, which
//! feeds the mirror, the tool bridge and any other listeners.

use std::sync::Arc;

use {
    tether_client::{
        ConnectionManager, ConnectionPolicy, EnvelopeSender, SessionRouter, Target, ToolBridge,
    },
    tether_config::TetherConfig,
    tether_mirror::LocalMirror,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

pub struct Session {
    pub connection: ConnectionManager,
    pub router: SessionRouter,
    pub tools: ToolBridge,
    pub mirror: LocalMirror,
    cancel: CancellationToken,
}

impl Session {
    /// Open the mirror, start routing, and begin connecting.
    pub async fn open(config: &TetherConfig) -> anyhow::Result<Self> {
        let target = Target::from_settings(&config.gateway)?;
        let connection = ConnectionManager::new(ConnectionPolicy::from_config(&config.reconnect));
        let router = SessionRouter::new();
        let sender: Arc<dyn EnvelopeSender> = Arc::new(connection.clone());
        let tools = ToolBridge::new(Arc::clone(&sender));
        let data_dir = tether_config::data_dir(config);
        let mirror = LocalMirror::open(&data_dir, sender, &config.mirror).await?;
        let cancel = CancellationToken::new();

        // Subscribe before routing starts so nothing is missed.
        let requests = router
            .take_tool_calls()
            .ok_or_else(|| anyhow::anyhow!("tool request queue already taken"))?;
        tokio::spawn({
            let tools = tools.clone();
            async move { tools.run(requests).await }
        });
        tokio::spawn({
            let mirror = mirror.clone();
            let chat = router.chat();
            async move { mirror.run(chat).await }
        });
        tokio::spawn({
            let router = router.clone();
            let incoming = connection.incoming();
            let cancel = cancel.clone();
            async move { router.run(incoming, cancel).await }
        });

        info!(target = ?target, data_dir = %data_dir.display(), "session opened");
        connection.connect(target);

        Ok(Self {
            connection,
            router,
            tools,
            mirror,
            cancel,
        })
    }

    pub fn close(&self) {
        self.cancel.cancel();
        self.tools.shutdown();
        self.connection.disconnect();
    }
}
