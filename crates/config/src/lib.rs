//! Configuration loading and env substitution.
//!
//! Config files: `tether.toml`, `tether.yaml`, or `tether.json`
//! Searched in `./` then `~/.config/tether/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_or_default_config_path,
        load_config, save_config,
    },
    schema::{GatewaySettings, MirrorConfig, ReconnectConfig, TetherConfig, VoiceConfig},
};
