//! Greffier - multi-environment job orchestration and OCR pipeline for
//! Quebec registry document extraction.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use greffier::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "greffier=info"
    } else {
        "greffier=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
