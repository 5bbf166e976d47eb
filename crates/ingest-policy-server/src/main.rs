// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::Parser;
use ingest_policy::config::load;
use ingest_policy::SystemClock;
use ingest_policy_server::admin::{app, make_publisher, server, AppState};
use ingest_policy_server::config::ServerConfig;
use prometheus::Registry;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(
        long,
        short,
        default_value = "./ingest-policy-server.yaml",
        help = "Specify the config file path to use"
    )]
    config: String,
    /// Emit logs as JSON lines.
    #[clap(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config: ServerConfig = load(&args.config)?;
    config.validate()?;
    info!(
        "listen on {:?}, worker count {}",
        config.listen_address, config.queue_gate.worker_count
    );

    let publisher = make_publisher(&config)?;
    let state = AppState::new(&config, Arc::new(SystemClock), publisher, Registry::new());
    let listener = tokio::net::TcpListener::bind(config.listen_address).await?;
    server(listener, app(Arc::new(state))).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
