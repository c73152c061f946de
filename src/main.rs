use boxwarden::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Engine events already reach the console sink; keep its records quiet.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,boxwarden_engine=warn")),
        )
        .init();

    boxwarden::app::run(Cli::parse()).await
}
