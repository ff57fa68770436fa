use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::TetherConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["tether.toml", "tether.yaml", "tether.yml", "tether.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TetherConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let config = parse_config(&raw, path)?;
    config.validate()?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tether.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tether/tether.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TetherConfig::default()` if no usable config file is found.
/// Environment overrides are applied in both cases.
pub fn discover_and_load() -> TetherConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                TetherConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            TetherConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Apply `TETHER_GATEWAY_HOST`, `TETHER_GATEWAY_PORT`, and `TETHER_API_KEY`.
pub fn apply_env_overrides(config: &mut TetherConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("TETHER_GATEWAY_HOST").filter(|h| !h.is_empty()) {
        config.gateway.host = host;
    }
    if let Some(port) = lookup("TETHER_GATEWAY_PORT") {
        match port.parse() {
            Ok(port) => config.gateway.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid TETHER_GATEWAY_PORT"),
        }
    }
    if let Some(key) = lookup("TETHER_API_KEY") {
        config.gateway.api_key = Some(Secret::new(key));
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/tether/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tether").map(|d| d.config_dir().to_path_buf())
}

/// Returns the directory holding the turn database and saved media.
pub fn data_dir(config: &TetherConfig) -> PathBuf {
    if let Some(dir) = &config.mirror.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "tether")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".tether"))
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether.toml")
}

/// Serialize `config` to TOML and write it to `path`.
///
/// Creates parent directories if needed.
pub fn save_config(config: &TetherConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TetherConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("tether.toml");
        std::fs::write(&toml_path, "[gateway]\nhost = \"10.0.0.2\"\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().gateway.host, "10.0.0.2");

        let yaml_path = dir.path().join("tether.yaml");
        std::fs::write(&yaml_path, "gateway:\n  port: 9001\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().gateway.port, 9001);

        let json_path = dir.path().join("tether.json");
        std::fs::write(&json_path, r#"{"mirror":{"page_size":5}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().mirror.page_size, 5);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[gateway]\nport = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tether.toml");
        let mut cfg = TetherConfig::default();
        cfg.gateway.path = "chat".into();
        save_config(&cfg, &path).unwrap();
        assert_eq!(load_config(&path).unwrap().gateway.path, "chat");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = TetherConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "TETHER_GATEWAY_HOST" => Some("phone.lan".into()),
            "TETHER_GATEWAY_PORT" => Some("7000".into()),
            "TETHER_API_KEY" => Some("abc".into()),
            _ => None,
        });
        assert_eq!(cfg.gateway.host, "phone.lan");
        assert_eq!(cfg.gateway.port, 7000);
        assert_eq!(cfg.gateway.api_key(), Some("abc"));
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut cfg = TetherConfig::default();
        apply_env_overrides(&mut cfg, |name| {
            (name == "TETHER_GATEWAY_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(cfg.gateway.port, 18793);
    }

    #[test]
    fn data_dir_override() {
        let mut cfg = TetherConfig::default();
        cfg.mirror.data_dir = Some(PathBuf::from("/tmp/tether-data"));
        assert_eq!(data_dir(&cfg), PathBuf::from("/tmp/tether-data"));
    }
}
