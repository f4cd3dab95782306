use futures::channel::oneshot;
use log::{debug, info, warn};

use crate::error::SessionError;
use crate::protocol::StatusEvent;
use crate::session::types::DispensedCoins;

pub type PayoutResolver = oneshot::Sender<Result<DispensedCoins, SessionError>>;

/// Correlates the single in-flight payout request with the next payout-completed event. The wire
/// protocol carries no correlation id, so at most one request may be outstanding.
#[derive(Debug, Default)]
pub struct PayoutCoordinator {
    pending: Option<(u16, PayoutResolver)>,
}

impl PayoutCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hands the resolver back if a payout is already in flight. A payout whose caller stopped
    /// waiting is dropped instead.
    pub fn begin(&mut self, amount: u16, resolver: PayoutResolver) -> Result<(), PayoutResolver> {
        let abandoned = self.pending.as_ref().filter(|(_, pending)| pending.is_canceled()).map(|(requested, _)| *requested);
        if let Some(requested) = abandoned {
            warn!("Dropping payout of {} coins, the caller stopped waiting", requested);
            self.pending = None;
        }

        if self.is_pending() {
            return Err(resolver);
        }

        info!("Requesting payout of {} coins", amount);
        self.pending = Some((amount, resolver));
        Ok(())
    }

    /// Returns true if the event resolved the pending request.
    pub fn on_status(&mut self, event: StatusEvent) -> bool {
        match event {
            StatusEvent::PayoutCompleted { dispensed } => match self.pending.take() {
                Some((requested, resolver)) => {
                    info!("Payout complete: {} of {} coins dispensed", dispensed, requested);
                    if resolver.send(Ok(DispensedCoins::single(dispensed))).is_err() {
                        debug!("Payout caller went away before completion");
                    }
                    true
                },
                None => {
                    debug!("Payout completed event ({} coins) without a pending request", dispensed);
                    false
                },
            },
            StatusEvent::Unknown(event_id) => {
                debug!("Ignoring unknown status event 0x{:02x}", event_id);
                false
            },
        }
    }

    pub fn abandon(&mut self, reason: SessionError) -> bool {
        match self.pending.take() {
            Some((requested, resolver)) => {
                warn!("Releasing pending payout of {} coins: {}", requested, reason);
                let _ = resolver.send(Err(reason));
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_resolves_pending_payout() {
        let mut coordinator = PayoutCoordinator::new();
        let (tx, mut rx) = oneshot::channel();
        coordinator.begin(300, tx).unwrap();

        assert!(!coordinator.on_status(StatusEvent::Unknown(0x42)));
        assert!(rx.try_recv().unwrap().is_none());

        assert!(coordinator.on_status(StatusEvent::PayoutCompleted { dispensed: 300 }));
        assert_eq!(rx.try_recv().unwrap().unwrap().unwrap().as_tuple(), (300, 0, 0));
        assert!(!coordinator.is_pending());
    }

    #[test]
    fn completion_without_request_is_ignored() {
        let mut coordinator = PayoutCoordinator::new();
        assert!(!coordinator.on_status(StatusEvent::PayoutCompleted { dispensed: 1 }));
    }

    #[test]
    fn second_payout_is_rejected() {
        let mut coordinator = PayoutCoordinator::new();
        let (first, mut first_rx) = oneshot::channel();
        let (second, _second_rx) = oneshot::channel();

        coordinator.begin(1, first).unwrap();
        assert!(coordinator.begin(2, second).is_err());

        coordinator.on_status(StatusEvent::PayoutCompleted { dispensed: 1 });
        assert_eq!(first_rx.try_recv().unwrap().unwrap().unwrap().ones, 1);
    }

    #[test]
    fn abandon_releases_with_cancellation() {
        let mut coordinator = PayoutCoordinator::new();
        let (tx, mut rx) = oneshot::channel();
        coordinator.begin(5, tx).unwrap();

        assert!(coordinator.abandon(SessionError::Cancelled));
        assert!(matches!(rx.try_recv().unwrap(), Some(Err(SessionError::Cancelled))));
        assert!(!coordinator.on_status(StatusEvent::PayoutCompleted { dispensed: 5 }));
    }

    #[test]
    fn abandoned_caller_does_not_block_next_payout() {
        let mut coordinator = PayoutCoordinator::new();
        let (first, first_rx) = oneshot::channel();
        coordinator.begin(7, first).unwrap();
        drop(first_rx);

        let (second, mut second_rx) = oneshot::channel();
        coordinator.begin(3, second).unwrap();
        assert!(coordinator.on_status(StatusEvent::PayoutCompleted { dispensed: 3 }));
        assert_eq!(second_rx.try_recv().unwrap().unwrap().unwrap().ones, 3);
    }
}
