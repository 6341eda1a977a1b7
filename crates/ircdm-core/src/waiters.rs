//! "Wait until a key for this peer is stored" primitive.
//!
//! One registration per peer, shared by every concurrent awaiter. A store
//! resolves and removes the registration; an awaiter that times out removes
//! it when it was the last one listening. Each awaiter sees exactly one
//! outcome: the bundle or its own timeout.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use ircdm_crypto::Bundle;

use crate::keys::PeerId;

#[derive(Default)]
pub(crate) struct Waiters {
    slots: Mutex<HashMap<PeerId, watch::Sender<Option<Bundle>>>>,
}

/// A registered interest in one peer's key.
pub(crate) struct Subscription {
    peer: PeerId,
    rx: watch::Receiver<Option<Bundle>>,
}

impl Waiters {
    pub(crate) fn subscribe(&self, peer: &PeerId) -> Subscription {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = slots
            .entry(peer.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        debug!(peer = %peer, "registered key waiter");
        Subscription {
            peer: peer.clone(),
            rx,
        }
    }

    /// Hand `bundle` to everyone waiting on `peer`.
    pub(crate) fn resolve(&self, peer: &PeerId, bundle: &Bundle) {
        let sender = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
        if let Some(sender) = sender {
            sender.send_replace(Some(bundle.clone()));
            debug!(peer = %peer, "resolved key waiter");
        }
    }

    /// Wait up to `timeout` for the subscription to resolve.
    pub(crate) async fn wait(&self, mut sub: Subscription, timeout: Duration) -> Option<Bundle> {
        let outcome = tokio::time::timeout(timeout, sub.rx.wait_for(Option::is_some))
            .await
            .ok()
            .and_then(|r| r.ok().and_then(|b| b.clone()));
        self.release(sub);
        outcome
    }

    /// Drop a subscription, removing the registration if nobody else is
    /// listening.
    pub(crate) fn release(&self, sub: Subscription) {
        let Subscription { peer, rx } = sub;
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        drop(rx);
        if slots.get(&peer).is_some_and(|s| s.receiver_count() == 0) {
            slots.remove(&peer);
            debug!(peer = %peer, "removed idle key waiter");
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
