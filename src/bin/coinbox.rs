use clap::Parser;
use log::{error, info};
use coinbox_session::{init_logging, run, Cli};
use coinbox_session::error::{AppRunError, ConfigError};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("Coin box session ", env!("CARGO_PKG_VERSION")));

    let cli = Cli::parse();

    match run(cli).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("Another instance is already talking to the coin box");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
