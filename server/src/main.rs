mod context;
mod server;
mod service;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{arg, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::context::ApplicationContext;
use crate::server::run_server;
use wordpool_env::Config;

fn cli() -> Command {
    Command::new("wordpool-server")
        .about("Custodial wagering backend for word-guessing games.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run").arg(
                arg!([config] "The path to config file")
                    .value_parser(clap::value_parser!(PathBuf)),
            ),
        )
}

fn init_logging(config: &Config) {
    let default_level = config.log.level.clone().unwrap_or_else(|| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(path: &PathBuf) -> anyhow::Result<()> {
    let config = Config::from_path(path).await?;
    init_logging(&config);

    let context = Arc::new(ApplicationContext::try_new(config).await?);

    let server_context = context.clone();
    let server_handle = tokio::spawn(async move { run_server(server_context).await });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    context.shutdown().await;
    server_handle.abort();
    Ok(())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("run", subcommand_matches)) => {
            let path = subcommand_matches.get_one::<PathBuf>("config");
            run(path.unwrap_or(&"config.toml".into())).await
        }
        _ => unreachable!(),
    }
}
