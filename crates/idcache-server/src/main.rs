use anyhow::{Context, Result};
use clap::Parser;

use idcache_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use idcache_server::{AppConfig, Server, observability, shutdown_signal};

#[derive(Parser)]
#[command(name = "idcache-server")]
#[command(about = "Configuration cache and token cleanup for an OAuth/OIDC server")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "IDCACHE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let rendered = toml::to_string_pretty(&AppConfig::default())
            .context("failed to render default configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    observability::init_tracing();

    let cfg = load_config(Some(&cli.config)).map_err(anyhow::Error::msg)?;
    observability::apply_logging_level(&cfg.logging.level);
    tracing::info!(path = %cli.config, "Configuration loaded");

    let server = Server::build(cfg)
        .await
        .context("failed to assemble idcache instance")?;
    server.run_until(shutdown_signal()).await;

    Ok(())
}
