use std::{path::PathBuf, process::exit};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stubwire::StubServerBuilder;

/// Holds command line parameters provided by the user.
#[derive(Parser, Debug)]
#[command(name = "stubwire", version, about)]
struct CommandLineParameters {
    #[arg(short, long, env = "STUBWIRE_PORT", default_value = "8080")]
    port: u16,
    #[arg(short, long, env = "STUBWIRE_EXPOSE")]
    expose: bool,
    /// Directory of stub definition files loaded at startup.
    #[arg(long, env = "STUBWIRE_ROOT_DIR")]
    root_dir: Option<PathBuf>,
    #[arg(long, env = "STUBWIRE_JOURNAL_LIMIT")]
    journal_limit: Option<usize>,
    #[arg(long, env = "STUBWIRE_NEAR_MISS_LIMIT")]
    near_miss_limit: Option<usize>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stubwire=info")),
        )
        .init();

    let params = CommandLineParameters::parse();

    tracing::info!(
        "Starting {} server V{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("{:#?}", params);

    let server = match StubServerBuilder::new()
        .port(params.port)
        .expose(params.expose)
        .stub_dir_option(params.root_dir)
        .journal_limit_option(params.journal_limit)
        .near_miss_limit_option(params.near_miss_limit)
        .build()
    {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("Cannot start server: {}", err);
            exit(1);
        }
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for the shutdown signal: {}", err);
        }
    };

    if let Err(err) = server.start_with_signals(None, shutdown).await {
        tracing::error!("Server stopped with an error: {}", err);
        exit(1);
    }
}
