use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wagate_config::GatewayConfig,
};

#[derive(Parser)]
#[command(name = "wagate", about = "wagate, a multi-account WhatsApp Web gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (TOML, YAML or JSON). Discovered when omitted.
    #[arg(long, global = true, env = "WAGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Listen address, overriding `server.bind`.
    #[arg(long, global = true, env = "WAGATE_BIND")]
    bind: Option<String>,

    /// Listen port, overriding `server.port`.
    #[arg(long, global = true, env = "WAGATE_PORT")]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default).
    Gateway,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load the config and print the effective settings.
    Check,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// An explicit path must load; otherwise fall back to discovery.
fn resolve_config(path: Option<&PathBuf>) -> anyhow::Result<GatewayConfig> {
    match path {
        Some(path) => wagate_config::load_config(path),
        None => Ok(wagate_config::discover_and_load()),
    }
}

fn apply_overrides(config: &mut GatewayConfig, bind: Option<String>, port: Option<u16>) {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}

fn print_config(config: &GatewayConfig) {
    let credentials = match &config.credentials.base_url {
        Some(url) => format!("{url} (prefix {:?})", config.credentials.key_prefix),
        None => "in-memory".to_string(),
    };
    let webhook = config
        .webhook
        .default_url
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);

    println!("listen       {}:{}", config.server.bind, config.server.port);
    println!("sidecar      {}", config.sidecar.url);
    println!("credentials  {credentials}");
    println!("webhook      {webhook} (timeout {}s)", config.webhook.timeout_secs);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wagate starting");

    let mut config = resolve_config(cli.config.as_ref())?;
    apply_overrides(&mut config, cli.bind, cli.port);
    match cli.command {
        None | Some(Commands::Gateway) => wagate_gateway::start_gateway(config).await,
        Some(Commands::Config {
            action: ConfigAction::Check,
        }) => {
            print_config(&config);
            Ok(())
        },
    }
}
