//! minderd — the Minder host daemon.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use minder_domain::config::Config;
use minder_host::{api, bootstrap};

#[derive(Parser, Debug)]
#[command(name = "minderd", about = "Single-user autonomous agent host")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "minder.toml")]
    config: PathBuf,

    /// Override the bind address from the config.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minder_host=info,minder_store=info,minder_providers=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = load_config(&args.config)?;
    let issues = config.validate();
    for issue in &issues {
        tracing::warn!("{issue}");
    }
    if Config::has_errors(&issues) {
        anyhow::bail!("configuration has errors; refusing to start");
    }

    let bind_addr = args
        .bind
        .clone()
        .unwrap_or_else(|| config.server.bind_addr.clone());

    let state = bootstrap::build_from_config(config)?;
    bootstrap::recover(&state)?;
    let (_workers, _scheduler) = bootstrap::start_background(&state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(%bind_addr, "minderd listening");

    axum::serve(listener, api::router(state)).await?;
    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            Config::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}
