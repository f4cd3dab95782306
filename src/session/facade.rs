use std::sync::Arc;
use futures::channel::mpsc::{channel, Sender};
use futures::channel::oneshot;
use futures::SinkExt;
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::io::PreferenceStore;
use crate::config::types::SessionSettings;
use crate::device::transport::Transport;
use crate::device::types::DeviceIdentity;
use crate::error::{DeviceError, SessionError};
use crate::session::runner::SessionRunner;
use crate::session::types::{DispensedCoins, SessionCommand, SessionStatus};

/// Handle to a running coin box session. Cheap to clone; every clone talks to the same session.
#[derive(Clone)]
pub struct CoinBoxSession {
    commands: Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl CoinBoxSession {
    /// Spawn the session runner on the current tokio runtime.
    pub fn start<T: Transport>(
        transport: T,
        store: PreferenceStore,
        settings: SessionSettings,
    ) -> (Self, JoinHandle<Result<(), DeviceError>>) {
        let (command_sender, command_receiver) = channel::<SessionCommand>(16);
        let (status_sender, status_receiver) = watch::channel(SessionStatus::default());
        let cancel = CancellationToken::new();

        let runner = SessionRunner::new(Arc::new(transport), store, settings, Arc::new(status_sender));
        let handle = spawn(runner.run(cancel.clone(), command_receiver));

        let session = CoinBoxSession {
            commands: command_sender,
            status: status_receiver,
            cancel,
        };

        (session, handle)
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .clone()
            .send(command)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Start a coin session and wait until at least `required` coins were inserted. Resolves
    /// with the final observed total.
    pub async fn wait_for_coins(&self, required: u32) -> Result<u16, SessionError> {
        let (resolver, completion) = oneshot::channel();
        self.send(SessionCommand::WaitForCoins { required, resolver }).await?;
        completion.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Dispense `amount` coins (clamped to 65535).
    pub async fn request_payout(&self, amount: u32) -> Result<DispensedCoins, SessionError> {
        let (resolver, completion) = oneshot::channel();
        self.send(SessionCommand::RequestPayout { amount, resolver }).await?;
        completion.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Zero the displayed coin total. An armed coin session keeps waiting.
    pub async fn reset_displayed_coin_count(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ResetDisplayedCoinCount).await
    }

    pub async fn bootstrap(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Bootstrap).await
    }

    pub async fn start_scan(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopScan).await
    }

    pub async fn select_device(&self, identity: DeviceIdentity) -> Result<(), SessionError> {
        self.send(SessionCommand::SelectDevice(identity)).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect).await
    }

    pub async fn forget_device(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ForgetDevice).await
    }

    pub async fn app_foreground(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::AppForeground).await
    }

    pub async fn app_background(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::AppBackground).await
    }

    /// Receiver that observes every published status change.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Stop the runner. Pending requests resolve with `SessionError::SessionClosed`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
