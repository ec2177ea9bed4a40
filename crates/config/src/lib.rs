//! Configuration loading for the wagate gateway.
//!
//! Config files are discovered in the working directory and in
//! `~/.config/wagate/`, in TOML, YAML or JSON, with `${ENV_VAR}` placeholders
//! resolved before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config},
    schema::{CredentialStoreConfig, GatewayConfig, ServerConfig, SidecarConfig, WebhookConfig},
};
