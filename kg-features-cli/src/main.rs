//! kg-features entry point
//!
//! Loads a knowledge-graph dataset directory and answers one query per
//! invocation: shape, examples, id lookups, embeddings and triple scores.

use clap::Parser;
use kg_features_cli::{run, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();

    let log_filter = match cli.verbose {
        0 => "kg_features=info,kg_features_cli=info",
        1 => "kg_features=debug,kg_features_cli=debug",
        _ => "kg_features=trace,kg_features_cli=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = run(cli, &mut out) {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
