use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::config::io::PreferenceStore;
use crate::config::types::{Preferences, SessionSettings};
use crate::device::btle::BtleTransport;
use crate::device::constants::COIN_BOX_ADVERTISED_NAME;
use crate::device::mock::MockTransport;
use crate::device::transport::Transport;
use crate::device::types::DeviceIdentity;
use crate::error::{readable_thread_panic_error, AppRunError, DeviceError, SessionError};
use crate::session::{CoinBoxSession, SessionStatus};

const SIMULATED_DEVICE: &str = "SIMULATED-COINBOX";
const SIMULATED_COIN_INTERVAL: u64 = 700;

#[derive(Parser, Debug)]
#[command(name = "coinbox", version, about = "Talk to a coin acceptor/dispenser over bluetooth")]
pub struct Cli {
    /// Connect to this device instead of the remembered one
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Keep preferences in memory only
    #[arg(long, global = true)]
    pub no_persist: bool,

    /// Talk to a simulated coin box instead of the radio
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// List coin boxes in range
    Scan {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Wait until this many coins have been inserted
    Wait { coins: u32 },
    /// Dispense coins
    Payout { amount: u32 },
    /// Print every session status change
    Status,
    /// Forget the remembered device
    Forget,
}

fn print_status(status: &SessionStatus) {
    println!(
        "{:?}: {} | scanning: {} | coins: {}{}",
        status.connection_state,
        status.indicator(),
        status.scanning,
        status.coin_total,
        if status.manual_selection_requested { " | please pick a device (--device <id>)" } else { "" },
    );
}

/// Resolves once the session is bound. Fails once the session gives up reconnecting.
async fn wait_until_bound(mut status: watch::Receiver<SessionStatus>) -> Result<(), SessionError> {
    loop {
        {
            let current = status.borrow_and_update();
            if current.connected {
                return Ok(());
            }
            if current.manual_selection_requested {
                return Err(SessionError::NotConnected);
            }
        }

        if status.changed().await.is_err() {
            return Err(SessionError::SessionClosed);
        }
    }
}

async fn run_command(session: &CoinBoxSession, command: &CliCommand) -> Result<(), AppRunError> {
    match command {
        CliCommand::Scan { seconds } => {
            session.start_scan().await?;
            sleep(Duration::from_secs(*seconds)).await;
            session.stop_scan().await?;

            for device in session.current_status().discovered_devices {
                println!("{}\t{}", device.identity, device.display_name());
            }
        },
        CliCommand::Wait { coins } => {
            wait_until_bound(session.status()).await?;
            println!("Insert {} coins", coins);
            let total = session.wait_for_coins(*coins).await?;
            println!("Inserted {} coins", total);
        },
        CliCommand::Payout { amount } => {
            wait_until_bound(session.status()).await?;
            let dispensed = session.request_payout(*amount).await?;
            println!("Dispensed {} coins", dispensed.ones);
        },
        CliCommand::Status => {
            let mut status = session.status();
            loop {
                print_status(&status.borrow_and_update());
                if status.changed().await.is_err() {
                    break;
                }
            }
        },
        // handled before the session starts
        CliCommand::Forget => {},
    }

    Ok(())
}

async fn run_session<T: Transport>(transport: T, store: PreferenceStore, settings: SessionSettings, cli: &Cli) -> Result<(), AppRunError> {
    let (session, handle) = CoinBoxSession::start(transport, store, settings);

    match &cli.device {
        Some(device) => session.select_device(DeviceIdentity::new(device.as_str())).await?,
        None => session.bootstrap().await?,
    }

    let result = run_command(&session, &cli.command).await;

    session.shutdown();
    join_runner(handle).await?;
    result
}

async fn join_runner(handle: JoinHandle<Result<(), DeviceError>>) -> Result<(), DeviceError> {
    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            warn!("Session runner failed: {}", readable_thread_panic_error(&err.into_panic()));
            Ok(())
        },
        Err(err) => {
            warn!("Failed to join session runner: {}", err);
            Ok(())
        },
    }
}

pub async fn run(cli: Cli) -> Result<(), AppRunError> {
    let store = if cli.no_persist {
        PreferenceStore::in_memory(Preferences::default())
    } else {
        PreferenceStore::open_default()?
    };

    // only one instance may use the preferences file at a time
    let mut locker = store.locker()?;
    let _lock_guard = match locker.as_mut() {
        Some(locker) => Some(locker.lock()?),
        None => None,
    };

    if cli.command == CliCommand::Forget {
        store.forget_device().await?;
        println!("Forgot remembered device");
        return Ok(());
    }

    let preferences = match store.read().await {
        Ok(preferences) => preferences,
        Err(err) => {
            warn!("Failed to load preferences, using defaults: {}", err);
            Preferences::default()
        },
    };
    let settings = preferences.session;

    if cli.simulate {
        info!("Using a simulated coin box");
        let (transport, handle) = MockTransport::new();
        handle.simulate_firmware(true);
        handle.add_peripheral(SIMULATED_DEVICE, Some(COIN_BOX_ADVERTISED_NAME));
        handle.power(true);

        let coin_acceptor = spawn(async move {
            loop {
                sleep(Duration::from_millis(SIMULATED_COIN_INTERVAL)).await;
                handle.insert_coins(1);
            }
        });

        let result = run_session(transport, store, settings, &cli).await;
        coin_acceptor.abort();
        return result;
    }

    let transport = BtleTransport::new(settings).await?;
    run_session(transport, store, settings, &cli).await
}
