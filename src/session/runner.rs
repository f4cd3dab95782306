use std::sync::Arc;
use futures::channel::mpsc::Receiver;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::io::PreferenceStore;
use crate::config::types::SessionSettings;
use crate::device::transport::Transport;
use crate::device::types::{Channel, TransportEvent};
use crate::error::{DeviceError, SessionError};
use crate::protocol::{clamp_payout_amount, decode_coin_count, decode_status, encode, Command};
use crate::session::coin::CoinSession;
use crate::session::payout::PayoutCoordinator;
use crate::session::supervisor::Supervisor;
use crate::session::types::{SessionCommand, SessionStatus};

/// The single writer around the transport: every transport event, facade command and reconnect
/// timer is handled here, one at a time.
pub struct SessionRunner<T: Transport> {
    transport: Arc<T>,
    settings: SessionSettings,
    status: Arc<watch::Sender<SessionStatus>>,
    supervisor: Supervisor<T>,
    coin: CoinSession,
    payout: PayoutCoordinator,
}

impl<T: Transport> SessionRunner<T> {
    pub fn new(
        transport: Arc<T>,
        store: PreferenceStore,
        settings: SessionSettings,
        status: Arc<watch::Sender<SessionStatus>>,
    ) -> Self {
        let supervisor = Supervisor::new(transport.clone(), store, settings, status.clone());

        SessionRunner {
            transport,
            settings,
            status,
            supervisor,
            coin: CoinSession::new(),
            payout: PayoutCoordinator::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken, mut commands: Receiver<SessionCommand>) -> Result<(), DeviceError> {
        let mut events = self.transport.events().await?;
        self.supervisor.load_remembered().await;

        'mainloop: loop {
            let retry_at = self.supervisor.retry_at();

            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Transport event stream ended");
                        break 'mainloop;
                    },
                },
                command = commands.next() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All session handles dropped");
                        break 'mainloop;
                    },
                },
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.supervisor.on_retry_timer().await;
                },
            }
        }

        info!("Coin box session stopping");
        self.coin.abandon(SessionError::SessionClosed);
        self.payout.abandon(SessionError::SessionClosed);
        self.supervisor.shutdown().await;
        Ok(())
    }

    fn release_pending(&mut self) {
        self.coin.abandon(SessionError::Cancelled);
        self.payout.abandon(SessionError::Cancelled);
    }

    fn publish_coin_total(&self) {
        let total = self.coin.observed_total();
        self.status.send_if_modified(|status| {
            let changed = status.coin_total != total;
            status.coin_total = total;
            changed
        });
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PowerChanged { powered_on } => {
                if !powered_on && self.supervisor.is_bound() {
                    self.release_pending();
                }
                self.supervisor.on_power(powered_on).await;
            },
            TransportEvent::Discovered(device) => {
                self.supervisor.on_discovered(device).await;
            },
            TransportEvent::Disconnected(identity) => {
                if self.supervisor.is_bound_to(&identity) {
                    self.release_pending();
                    self.supervisor.on_disconnected().await;
                }
                else {
                    debug!("Ignoring disconnect of {}", identity);
                }
            },
            TransportEvent::Notification { channel: Channel::CoinCount, value } => {
                match decode_coin_count(&value) {
                    Ok(total) => {
                        self.coin.on_total(total);
                        self.publish_coin_total();
                    },
                    Err(err) => debug!("Discarding frame: {}", err),
                }
            },
            TransportEvent::Notification { channel: Channel::Status, value } => {
                match decode_status(&value) {
                    Ok(event) => {
                        self.payout.on_status(event);
                    },
                    Err(err) => debug!("Discarding frame: {}", err),
                }
            },
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::WaitForCoins { required, resolver } => {
                if !self.supervisor.is_bound() {
                    let _ = resolver.send(Err(SessionError::NotConnected));
                    return;
                }

                if let Err(resolver) = self.coin.arm(required, resolver) {
                    warn!("Rejecting wait for {} coins, a coin session is already armed", required);
                    let _ = resolver.send(Err(SessionError::WaitInProgress));
                    return;
                }
                self.publish_coin_total();

                if let Err(err) = self.write(Command::StartCoinSession).await {
                    self.coin.abandon(SessionError::CommandFailed { source: err });
                }
            },
            SessionCommand::RequestPayout { amount, resolver } => {
                if !self.supervisor.is_bound() {
                    let _ = resolver.send(Err(SessionError::NotConnected));
                    return;
                }

                let amount = clamp_payout_amount(amount);
                if let Err(resolver) = self.payout.begin(amount, resolver) {
                    warn!("Rejecting payout of {} coins, another payout is in progress", amount);
                    let _ = resolver.send(Err(SessionError::PayoutInProgress));
                    return;
                }

                if let Err(err) = self.write(Command::Payout(amount)).await {
                    self.payout.abandon(SessionError::CommandFailed { source: err });
                }
            },
            SessionCommand::ResetDisplayedCoinCount => {
                self.coin.reset_observed();
                self.publish_coin_total();
            },
            SessionCommand::Bootstrap => self.supervisor.bootstrap().await,
            SessionCommand::StartScan => self.supervisor.start_scan().await,
            SessionCommand::StopScan => self.supervisor.stop_scan().await,
            SessionCommand::SelectDevice(identity) => {
                if self.supervisor.is_bound_to(&identity) {
                    debug!("Already bound to {}", identity);
                    return;
                }
                if self.supervisor.is_bound() {
                    self.release_pending();
                    self.supervisor.drop_link().await;
                }
                self.supervisor.select_device(identity).await;
            },
            SessionCommand::Disconnect => {
                if self.supervisor.is_bound() {
                    self.release_pending();
                    self.supervisor.disconnect().await;
                }
            },
            SessionCommand::ForgetDevice => self.supervisor.forget_device().await,
            SessionCommand::AppForeground => self.supervisor.app_foreground().await,
            SessionCommand::AppBackground => self.supervisor.app_background().await,
        }
    }

    async fn write(&self, command: Command) -> Result<(), DeviceError> {
        let frame = encode(command);
        debug!("Writing {:?} as {:02x?}", command, frame);

        let fut = self.transport.write_command(&frame);

        tokio::select! {
            _ = sleep(self.settings.write_deadline()) => {
                warn!("Writing {:?} took too long", command);
                Err(DeviceError::DeadlineExceeded("write"))
            }
            result = fut => {
                if let Err(err) = &result {
                    warn!("Failed to write {:?}: {}", command, err);
                }
                result
            }
        }
    }
}
