#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use coinbox_session::config::io::PreferenceStore;
use coinbox_session::config::types::{Preferences, SessionSettings};
use coinbox_session::device::constants::COIN_BOX_ADVERTISED_NAME;
use coinbox_session::device::mock::{MockTransport, MockTransportHandle};
use coinbox_session::device::types::DeviceIdentity;
use coinbox_session::error::DeviceError;
use coinbox_session::{CoinBoxSession, SessionStatus};

pub const COIN_BOX: &str = "COINBOX-0001";
pub const OTHER_COIN_BOX: &str = "COINBOX-0002";

const STATUS_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Harness {
    pub session: CoinBoxSession,
    pub radio: MockTransportHandle,
    pub store: PreferenceStore,
    pub runner: JoinHandle<Result<(), DeviceError>>,
}

impl Harness {
    pub fn start(preferences: Preferences) -> Self {
        let (transport, radio) = MockTransport::new();
        let store = PreferenceStore::in_memory(preferences.clone());
        let (session, runner) = CoinBoxSession::start(transport, store.clone(), preferences.session);

        Harness { session, radio, store, runner }
    }

    /// A session that remembers [`COIN_BOX`], which is in range and powered on.
    pub async fn bound() -> Self {
        let harness = Harness::start(remembering(COIN_BOX, SessionSettings::default()));
        harness.radio.add_peripheral(COIN_BOX, Some(COIN_BOX_ADVERTISED_NAME));
        harness.radio.power(true);
        harness.wait_status(|status| status.connected).await;
        harness
    }

    pub async fn wait_status(&self, predicate: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        wait_status(self.session.status(), predicate).await
    }

    /// Yield until the mock saw `frame` written.
    pub async fn wait_write(&self, frame: &[u8]) {
        let radio = self.radio.clone();
        let frame = frame.to_vec();
        timeout(STATUS_TIMEOUT, async move {
            while !radio.writes().contains(&frame) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for command write");
    }

    /// Yield until the mock saw `count` command writes in total.
    pub async fn wait_write_count(&self, count: usize) {
        let radio = self.radio.clone();
        timeout(STATUS_TIMEOUT, async move {
            while radio.writes().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for command writes");
    }

    pub async fn stop(self) {
        self.session.shutdown();
        self.runner.await.expect("runner panicked").expect("runner failed");
    }
}

pub fn remembering(identity: &str, session: SessionSettings) -> Preferences {
    Preferences {
        saved_device: Some(DeviceIdentity::new(identity)),
        session,
    }
}

pub async fn wait_status(
    mut status: watch::Receiver<SessionStatus>,
    predicate: impl Fn(&SessionStatus) -> bool,
) -> SessionStatus {
    timeout(STATUS_TIMEOUT, async move {
        loop {
            {
                let current = status.borrow_and_update();
                if predicate(&current) {
                    return current.clone();
                }
            }
            status.changed().await.expect("session stopped");
        }
    })
    .await
    .expect("timed out waiting for session status")
}
