use clap::Parser;

use registrator::cli::{Cli, Command};
use registrator::{agent, logging};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let _guard = logging::init(cli.log_file.as_deref());
    let config = cli.to_config()?;

    match cli.command {
        Some(Command::Ping) => match agent::ping(&config).await {
            Ok(version) => {
                println!("docker {version}");
                Ok(())
            }
            Err(e) => {
                eprintln!("ping failed: {e}");
                std::process::exit(1);
            }
        },
        None => agent::run(config).await,
    }
}
