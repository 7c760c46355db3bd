use std::{path::PathBuf, sync::Arc};

use bridge_cli::{serve, Dispatcher};
use bridge_config::{BackendKind, BridgeConfig};
use clap::Parser;
use tokio::io::BufReader;

/// Drive Delve debugging sessions over JSON lines on stdio.
///
/// Each stdin line is a tool call (`{"id", "tool", "arguments"}`); each
/// stdout line is the reply. Logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "dlv-bridge", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `DLV_BRIDGE_CONFIG` is used as a fallback. When neither is
    /// provided the bridge uses built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend protocol (`rpc` or `dap`), overriding the config file.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Delve executable, overriding the config file.
    #[arg(long)]
    dlv: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config);
    if let Some(kind) = cli.backend {
        config.backend.kind = kind;
    }
    if let Some(dlv) = cli.dlv {
        config.backend.dlv_path = dlv;
    }
    bridge_config::init_tracing(&config.logging);
    tracing::info!(
        target: "bridge.cli",
        backend = %config.backend.kind,
        dlv = %config.backend.dlv_path.display(),
        "dlv-bridge ready"
    );

    let dispatcher = Arc::new(Dispatcher::new(config.backend));
    serve(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

fn load_config(cli_path: Option<PathBuf>) -> BridgeConfig {
    let path = cli_path.or_else(|| std::env::var_os("DLV_BRIDGE_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return BridgeConfig::default();
    };

    match BridgeConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "dlv-bridge: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            BridgeConfig::default()
        }
    }
}
