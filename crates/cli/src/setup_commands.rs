use {
    anyhow::Result, clap::Subcommand, serde_json::Value, tether_client::ControlClient,
    tether_config::TetherConfig,
};

#[derive(Subcommand)]
pub enum SetupAction {
    /// Start first-run setup. Sent without authentication.
    Init {
        /// JSON body, e.g. '{"provider":"anthropic"}'.
        #[arg(default_value = "{}")]
        body: String,
    },
    /// Finish setup (authenticated when an API key is configured).
    Complete {
        /// JSON body.
        #[arg(default_value = "{}")]
        body: String,
    },
}

pub async fn handle_setup(config: &TetherConfig, action: SetupAction) -> Result<()> {
    let client = ControlClient::from_settings(&config.gateway);
    match action {
        SetupAction::Init { body } => {
            client.setup_init(&parse_body(&body)?).await?;
            println!("Setup started.");
        },
        SetupAction::Complete { body } => {
            client.setup_complete(&parse_body(&body)?).await?;
            println!("Setup complete.");
        },
    }
    Ok(())
}

fn parse_body(raw: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("body is not valid JSON: {e}"))?;
    if !value.is_object() {
        anyhow::bail!("body must be a JSON object");
    }
    Ok(value)
}
