use futures::channel::oneshot;
use log::{debug, info, warn};

use crate::error::SessionError;

/// Resolves a pending wait-for-coins request with the final observed total.
pub type WaitResolver = oneshot::Sender<Result<u16, SessionError>>;

/// Tracks the running coin total reported by the peripheral and the one outstanding
/// wait-for-coins request, if any.
///
/// `Idle -> Armed -> Idle`: there is no retained completed state, reaching the threshold resolves
/// the request and deactivates the session immediately.
#[derive(Debug, Default)]
pub struct CoinSession {
    required: u16,
    observed: u16,
    pending: Option<WaitResolver>,
}

impl CoinSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn observed_total(&self) -> u16 {
        self.observed
    }

    /// Start a new session. The observed total is zeroed right away so progress of a previous
    /// session never shows up in this one. Hands the resolver back if a session is already armed.
    ///
    /// A session whose caller stopped waiting no longer counts as armed and is replaced. The
    /// threshold is clamped to what the coin counter can report.
    pub fn arm(&mut self, required: u32, resolver: WaitResolver) -> Result<(), WaitResolver> {
        if self.pending.as_ref().map_or(false, |pending| pending.is_canceled()) {
            warn!("Dropping wait for {} coins, the caller stopped waiting", self.required);
            self.pending = None;
        }

        if self.is_armed() {
            return Err(resolver);
        }

        let required = u16::try_from(required).unwrap_or_else(|_| {
            warn!("Clamping wait for {} coins to {}", required, u16::MAX);
            u16::MAX
        });

        info!("Waiting for {} coins", required);
        self.required = required;
        self.observed = 0;
        self.pending = Some(resolver);
        Ok(())
    }

    /// Record a running total from the coin-count channel. Returns true if this resolved the
    /// pending request.
    pub fn on_total(&mut self, total: u16) -> bool {
        self.observed = total;

        if !self.is_armed() || total < self.required {
            return false;
        }

        if let Some(resolver) = self.pending.take() {
            info!("Coin session complete with {} of {} coins", total, self.required);
            if resolver.send(Ok(total)).is_err() {
                debug!("Wait-for-coins caller went away before completion");
            }
            return true;
        }

        false
    }

    /// Zero the observed total without touching an armed session's threshold.
    pub fn reset_observed(&mut self) {
        self.observed = 0;
    }

    /// Release the pending request with an explicit failure. Returns true if one was pending.
    pub fn abandon(&mut self, reason: SessionError) -> bool {
        match self.pending.take() {
            Some(resolver) => {
                warn!("Releasing pending wait for {} coins: {}", self.required, reason);
                let _ = resolver.send(Err(reason));
                true
            },
            None => false,
        }
    }
}
