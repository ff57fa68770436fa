mod chat_commands;
mod config_commands;
mod device_tools;
mod history_commands;
mod session;
mod setup_commands;
mod voice_commands;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tether", about = "Tether: terminal client for a personal AI gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Gateway host (overrides config value).
    #[arg(long, global = true)]
    host: Option<String>,
    /// Gateway WebSocket port (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat with the gateway.
    Chat,
    /// Hands-free voice loop driven from the terminal.
    Voice(voice_commands::VoiceArgs),
    /// Show stored conversation history.
    History {
        /// Number of most recent turns to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Delete all stored turns instead.
        #[arg(long)]
        clear: bool,
    },
    /// First-run gateway setup.
    Setup {
        #[command(subcommand)]
        action: setup_commands::SetupAction,
    },
    /// Gateway settings over the HTTP control plane, or `init` for a local file.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut config = tether_config::discover_and_load();
    if let Some(host) = cli.host.clone() {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), "tether starting");

    match cli.command {
        Commands::Chat => chat_commands::run_chat(&config).await,
        Commands::Voice(args) => voice_commands::run_voice(&config, args).await,
        Commands::History { limit, clear } => {
            history_commands::handle_history(&config, limit, clear).await
        },
        Commands::Setup { action } => setup_commands::handle_setup(&config, action).await,
        Commands::Config { action } => config_commands::handle_config(&config, action).await,
    }
}
