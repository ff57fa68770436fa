use std::path::Path;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    serde_json::{Map, Value},
    tether_client::ControlClient,
    tether_config::TetherConfig,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print gateway settings, or one value by dotted key.
    Get { key: Option<String> },
    /// Describe every setting the gateway accepts.
    Schema,
    /// Change one setting. The value is parsed as JSON, falling back to a
    /// plain string.
    Set { key: String, value: String },
    /// Write a default local `tether.toml`.
    Init {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub async fn handle_config(config: &TetherConfig, action: ConfigAction) -> Result<()> {
    if let ConfigAction::Init { force } = action {
        let path = tether_config::find_or_default_config_path();
        write_default_config(&path, force)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let client = ControlClient::from_settings(&config.gateway);
    match action {
        ConfigAction::Get { key } => {
            let settings = Value::Object(client.config().await?);
            let shown = match key.as_deref() {
                Some(key) => lookup(&settings, key)
                    .ok_or_else(|| anyhow::anyhow!("no setting named '{key}'"))?,
                None => &settings,
            };
            println!("{}", serde_json::to_string_pretty(shown)?);
        },
        ConfigAction::Schema => {
            let schema = client.config_schema().await?;
            for section in &schema.sections {
                println!("{BOLD}{}{RESET} ({})", section.label, section.key);
                for field in &section.fields {
                    let secret = if field.secret {
                        " secret"
                    } else {
                        ""
                    };
                    println!(
                        "  {}.{}  {DIM}{}{secret}{RESET}  {}",
                        section.key, field.key, field.field_type, field.label
                    );
                }
            }
        },
        ConfigAction::Set { key, value } => {
            let mut settings = client.config().await?;
            assign(&mut settings, &key, parse_value(&value))?;
            let result = client.save_config(&settings).await?;
            if let Some(error) = result.error {
                bail!("gateway rejected the change: {error}");
            }
            println!("{}", result.status.as_deref().unwrap_or("saved"));
            if result.restart {
                println!("Restart the gateway for this change to take effect.");
            }
        },
        ConfigAction::Init { .. } => {},
    }
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    if path.extension().and_then(|e| e.to_str()) != Some("toml") {
        bail!("{} is not a TOML file; edit it by hand", path.display());
    }
    tether_config::save_config(&TetherConfig::default(), path)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |node, part| node.get(part))
}

/// Set `key` (dotted path) in `root`, creating intermediate objects.
fn assign(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("invalid key '{key}'");
    }
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("empty key"))?;

    let mut node = root;
    for part in parents {
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            _ => bail!("'{part}' in '{key}' is not a section"),
        };
    }
    node.insert(last.to_string(), value);
    Ok(())
}
