//! Observer hooks for trust-state changes.
//!
//! Observers are registered when the exchange is built and called
//! synchronously, in registration order, after the triggering operation has
//! released every internal lock. An observer may therefore call back into the
//! exchange (directly from a spawned task, or by queuing work) without
//! deadlocking; a spawned follow-up for the same peer runs after the current
//! operation has finished.

use std::sync::{Arc, Mutex, PoisonError};

use crate::types::{BundleStored, PendingKeyRequest};

pub trait ExchangeObserver: Send + Sync {
    /// A bundle was written to the ledger.
    fn on_bundle_stored(&self, _event: &BundleStored) {}

    /// A key now waits for the user to accept or reject it.
    fn on_key_request(&self, _request: &PendingKeyRequest) {}
}

/// Everything a [`CollectingObserver`] has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Stored(BundleStored),
    KeyRequest(PendingKeyRequest),
}

/// Records events in arrival order.
#[derive(Debug, Default, Clone)]
pub struct CollectingObserver {
    events: Arc<Mutex<Vec<ObservedEvent>>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stored(&self) -> Vec<BundleStored> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::Stored(s) => Some(s),
                ObservedEvent::KeyRequest(_) => None,
            })
            .collect()
    }

    pub fn key_requests(&self) -> Vec<PendingKeyRequest> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::KeyRequest(r) => Some(r),
                ObservedEvent::Stored(_) => None,
            })
            .collect()
    }

    fn push(&self, event: ObservedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl ExchangeObserver for CollectingObserver {
    fn on_bundle_stored(&self, event: &BundleStored) {
        self.push(ObservedEvent::Stored(event.clone()));
    }

    fn on_key_request(&self, request: &PendingKeyRequest) {
        self.push(ObservedEvent::KeyRequest(request.clone()));
    }
}

/// Fan-out to registered observers.
#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn ExchangeObserver>>);

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn ExchangeObserver>) {
        self.0.push(observer);
    }

    pub(crate) fn bundle_stored(&self, event: &BundleStored) {
        for observer in &self.0 {
            observer.on_bundle_stored(event);
        }
    }

    pub(crate) fn key_request(&self, request: &PendingKeyRequest) {
        for observer in &self.0 {
            observer.on_key_request(request);
        }
    }
}
