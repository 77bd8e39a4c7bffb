use clap::Parser;
use dentline_desk::{app, Config};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dentline-desk", about = "Consultation call relay server")]
struct Cli {
    /// Listen port; overrides DENTLINE_DESK_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("dentline-desk listening on {addr}");

    axum::serve(listener, app()).await?;
    Ok(())
}
