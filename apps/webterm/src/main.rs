use clap::Parser;
use webterm::telemetry;
use webterm::terminal::{app, cli::Cli, error::CliError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = telemetry::logging::init(&cli.logging.to_config()) {
        eprintln!("❌ {}", CliError::from(err));
        std::process::exit(1);
    }

    if let Err(err) = app::run(cli).await {
        eprintln!("\r\n❌ {err}");
        std::process::exit(1);
    }
}
