//! Key exchange protocol.
//!
//! Per-peer states:
//!
//! ```text
//! NoKey --new--> Trusted --same--> Trusted (lastSeen refreshed)
//!                Trusted --changed--> PendingReview --accept--> Trusted(new)
//!                                                   --reject--> Trusted(old)
//! ```
//!
//! Inbound handlers (`handle_*`) take raw attacker-controlled JSON. Parse and
//! verification failures are logged and reported as "invalid", never raised.
//! A changed key always ends up pending for a human; nothing here
//! auto-replaces a stored key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ircdm_crypto::{Bundle, BundlePayload, ExternalPayload, FingerprintPayload};

use crate::bundles::{parse_bundle, BundleEngine};
use crate::cipher::MessageCipher;
use crate::config::ExchangeConfig;
use crate::errors::CoreError;
use crate::events::ExchangeObserver;
use crate::identity::IdentityStore;
use crate::keys::{fold_nick, PeerId};
use crate::ledger::{PeerGuard, TrustLedger};
use crate::secrets::SecretStore;
use crate::types::{
    AcceptanceOutcome, BundleStored, ImportOutcome, KeyStatus, PendingKeyRequest, PendingReason,
};
use crate::waiters::Waiters;

/// Resolves key waiters from ledger stores. Registered ahead of user
/// observers.
struct WaiterHook(Arc<Waiters>);

impl ExchangeObserver for WaiterHook {
    fn on_bundle_stored(&self, event: &BundleStored) {
        self.0.resolve(&event.peer, &event.bundle);
    }
}

/// Builder for [`KeyExchange`].
pub struct KeyExchangeBuilder<S: SecretStore + ?Sized> {
    store: Arc<S>,
    config: ExchangeConfig,
    observers: Vec<Arc<dyn ExchangeObserver>>,
}

impl<S: SecretStore + ?Sized> KeyExchangeBuilder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: ExchangeConfig::default(),
            observers: Vec::new(),
        }
    }

    pub fn config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    /// Observers are called in the order they are added.
    pub fn observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> KeyExchange<S> {
        let waiters = Arc::new(Waiters::default());
        let identity = Arc::new(IdentityStore::new(self.store.clone()));

        let mut ledger =
            TrustLedger::new(self.store).with_observer(Arc::new(WaiterHook(waiters.clone())));
        for observer in self.observers {
            ledger = ledger.with_observer(observer);
        }

        KeyExchange {
            bundles: BundleEngine::new(identity),
            ledger: Arc::new(ledger),
            pending: RwLock::new(HashMap::new()),
            waiters,
            config: self.config,
        }
    }
}

pub struct KeyExchange<S: SecretStore + ?Sized> {
    bundles: BundleEngine<S>,
    ledger: Arc<TrustLedger<S>>,
    pending: RwLock<HashMap<PeerId, PendingKeyRequest>>,
    waiters: Arc<Waiters>,
    config: ExchangeConfig,
}

impl<S: SecretStore + ?Sized> KeyExchange<S> {
    pub fn builder(store: Arc<S>) -> KeyExchangeBuilder<S> {
        KeyExchangeBuilder::new(store)
    }

    pub fn ledger(&self) -> &Arc<TrustLedger<S>> {
        &self.ledger
    }

    pub fn bundles(&self) -> &BundleEngine<S> {
        &self.bundles
    }

    pub fn identity(&self) -> &Arc<IdentityStore<S>> {
        self.bundles.identity_store()
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Message cipher bound to this exchange's identity and ledger.
    pub fn cipher(&self) -> MessageCipher<S> {
        MessageCipher::new(self.identity().clone(), self.ledger.clone())
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Unsolicited bundle from `peer`.
    ///
    /// New or same keys are stored (and wake any waiter); a changed key
    /// becomes a pending request with reason `legacy`.
    pub async fn handle_incoming_bundle(
        &self,
        peer: &PeerId,
        raw: &str,
    ) -> Result<AcceptanceOutcome, CoreError> {
        let Some(bundle) = parse_inbound(peer, raw, "bundle") else {
            return Ok(AcceptanceOutcome::Invalid);
        };
        self.store_or_queue(peer, bundle, PendingReason::Legacy).await
    }

    /// Explicit key offer from `peer`. Always queued for review, with reason
    /// `offer` (or `change` when it differs from the stored key). Returns
    /// whether the offer parsed and verified.
    pub async fn handle_key_offer(&self, peer: &PeerId, raw: &str) -> Result<bool, CoreError> {
        let Some(bundle) = parse_inbound(peer, raw, "offer") else {
            return Ok(false);
        };

        let guard = self.ledger.lock_peer(peer).await;
        let request = self.queue_locked(&guard, bundle, None).await?;
        drop(guard);

        self.ledger.observers().key_request(&request);
        Ok(true)
    }

    /// `peer` accepted our offer and sent their bundle back.
    pub async fn handle_key_acceptance(
        &self,
        peer: &PeerId,
        raw: &str,
    ) -> Result<AcceptanceOutcome, CoreError> {
        let Some(bundle) = parse_inbound(peer, raw, "acceptance") else {
            return Ok(AcceptanceOutcome::Invalid);
        };
        self.store_or_queue(peer, bundle, PendingReason::Change).await
    }

    async fn store_or_queue(
        &self,
        peer: &PeerId,
        bundle: Bundle,
        changed_reason: PendingReason,
    ) -> Result<AcceptanceOutcome, CoreError> {
        let guard = self.ledger.lock_peer(peer).await;
        let comparison = self.ledger.compare_bundle(peer, &bundle).await?;

        if comparison.status == KeyStatus::Changed {
            let request = self.queue_locked(&guard, bundle, Some(changed_reason)).await?;
            drop(guard);
            warn!(
                peer = %peer,
                old = %request.existing_fingerprint.map(|f| f.short()).unwrap_or_default(),
                new = %request.new_fingerprint.short(),
                "peer key changed; awaiting user decision"
            );
            self.ledger.observers().key_request(&request);
            return Ok(AcceptanceOutcome::Pending);
        }

        let stored = self.ledger.store_locked(&guard, &bundle, false).await?;
        drop(guard);
        self.ledger.observers().bundle_stored(&stored);
        Ok(AcceptanceOutcome::Stored)
    }

    /// Record a pending request, replacing any earlier one for the peer.
    /// `reason` overrides the offer/change classification.
    async fn queue_locked(
        &self,
        guard: &PeerGuard,
        bundle: Bundle,
        reason: Option<PendingReason>,
    ) -> Result<PendingKeyRequest, CoreError> {
        let peer = guard.peer();
        let comparison = self.ledger.compare_bundle(peer, &bundle).await?;
        let reason = reason.unwrap_or(match comparison.status {
            KeyStatus::Changed => PendingReason::Change,
            KeyStatus::New | KeyStatus::Same => PendingReason::Offer,
        });

        let request = PendingKeyRequest {
            peer: peer.clone(),
            bundle,
            timestamp: Utc::now(),
            reason,
            existing_fingerprint: comparison.existing_fingerprint,
            new_fingerprint: comparison.new_fingerprint,
        };

        let replaced = self
            .pending
            .write()
            .await
            .insert(peer.clone(), request.clone());
        if replaced.is_some() {
            debug!(peer = %peer, "pending key request superseded");
        }
        info!(peer = %peer, reason = reason.as_str(), "key request pending");
        Ok(request)
    }

    // -------------------------------------------------------------------------
    // User decisions
    // -------------------------------------------------------------------------

    /// Accept the pending key for `peer` and return our own bundle to send
    /// back.
    ///
    /// A pending key that differs from the stored one needs
    /// `allow_replace = true`; otherwise this fails with
    /// [`CoreError::KeyChanged`] and both the stored key and the pending
    /// request stay as they were.
    pub async fn accept_key_offer(
        &self,
        peer: &PeerId,
        allow_replace: bool,
    ) -> Result<Bundle, CoreError> {
        let guard = self.ledger.lock_peer(peer).await;
        let request = self
            .pending
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| CoreError::NoPendingOffer(peer.clone()))?;

        let stored = self
            .ledger
            .store_locked(&guard, &request.bundle, allow_replace)
            .await?;
        self.pending.write().await.remove(peer);
        drop(guard);

        info!(peer = %peer, fingerprint = %stored.fingerprint.short(), "accepted key offer");
        self.ledger.observers().bundle_stored(&stored);
        self.bundles.export_bundle().await
    }

    /// Discard the pending key for `peer`. Idempotent; returns whether a
    /// request was pending.
    pub async fn reject_key_offer(&self, peer: &PeerId) -> bool {
        let removed = self.pending.write().await.remove(peer).is_some();
        if removed {
            info!(peer = %peer, "rejected key offer");
        }
        removed
    }

    pub async fn pending_request(&self, peer: &PeerId) -> Option<PendingKeyRequest> {
        self.pending.read().await.get(peer).cloned()
    }

    /// All pending requests, oldest first.
    pub async fn pending_requests(&self) -> Vec<PendingKeyRequest> {
        let mut requests: Vec<_> = self.pending.read().await.values().cloned().collect();
        requests.sort_by_key(|r| r.timestamp);
        requests
    }

    // -------------------------------------------------------------------------
    // Waiting
    // -------------------------------------------------------------------------

    /// Resolve with the trusted bundle for `peer`, waiting up to `timeout`
    /// (default from [`ExchangeConfig`]) for one to be stored.
    pub async fn await_bundle_for_nick(
        &self,
        peer: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<Bundle, CoreError> {
        // subscribe before checking so a store in between is not missed
        let sub = self.waiters.subscribe(peer);
        match self.ledger.get_bundle_for_network(peer).await {
            Ok(Some(bundle)) => {
                self.waiters.release(sub);
                return Ok(bundle);
            }
            Ok(None) => {}
            Err(e) => {
                self.waiters.release(sub);
                return Err(e);
            }
        }

        let waited = timeout.unwrap_or(self.config.await_timeout);
        match self.waiters.wait(sub, waited).await {
            Some(bundle) => Ok(bundle),
            None => {
                debug!(peer = %peer, ?waited, "timed out waiting for key");
                Err(CoreError::Timeout {
                    peer: peer.clone(),
                    waited,
                })
            }
        }
    }

    // -------------------------------------------------------------------------
    // Out-of-band payloads
    // -------------------------------------------------------------------------

    pub async fn export_bundle_payload(&self, own_nick: &str) -> Result<BundlePayload, CoreError> {
        Ok(BundlePayload::new(own_nick, self.bundles.export_bundle().await?))
    }

    pub async fn export_fingerprint_payload(
        &self,
        own_nick: &str,
    ) -> Result<FingerprintPayload, CoreError> {
        Ok(FingerprintPayload::new(
            own_nick,
            self.bundles.own_fingerprint().await?,
        ))
    }

    /// Import a QR/NFC/file payload that claims to come from `peer`.
    ///
    /// A bundle payload is queued for review unless it matches the stored
    /// key. A fingerprint payload is compared against the stored key; the
    /// caller decides whether to mark the peer verified.
    pub async fn import_external_payload(
        &self,
        peer: &PeerId,
        raw: &str,
    ) -> Result<ImportOutcome, CoreError> {
        let payload = ExternalPayload::parse(raw)?;
        if fold_nick(payload.nick()) != peer.nick() {
            return Err(CoreError::InvalidPayload(format!(
                "payload is for {:?}, not {:?}",
                payload.nick(),
                peer.nick()
            )));
        }

        match payload {
            ExternalPayload::Bundle(p) => {
                p.verify()?;

                let guard = self.ledger.lock_peer(peer).await;
                let comparison = self.ledger.compare_bundle(peer, &p.bundle).await?;
                if comparison.status == KeyStatus::Same {
                    return Ok(ImportOutcome::AlreadyTrusted(comparison.new_fingerprint));
                }
                let request = self.queue_locked(&guard, p.bundle, None).await?;
                drop(guard);

                self.ledger.observers().key_request(&request);
                Ok(ImportOutcome::BundleReceived(request))
            }
            ExternalPayload::Fingerprint(p) => {
                let stored = self
                    .ledger
                    .get_bundle_for_network(peer)
                    .await?
                    .map(|b| b.fingerprint());
                let matches = stored == Some(p.fingerprint);
                info!(peer = %peer, matches, "compared out-of-band fingerprint");
                Ok(ImportOutcome::FingerprintCompared {
                    matches,
                    expected: p.fingerprint,
                    stored,
                })
            }
        }
    }

    /// See [`TrustLedger::migrate_old_keys_to_network`].
    pub async fn migrate_old_keys_to_network(&self, network: &str) -> Result<usize, CoreError> {
        self.ledger.migrate_old_keys_to_network(network).await
    }
}

fn parse_inbound(peer: &PeerId, raw: &str, what: &str) -> Option<Bundle> {
    match parse_bundle(raw) {
        Ok(bundle) => Some(bundle),
        Err(e) => {
            warn!(peer = %peer, error = %e, "discarding invalid {what}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingObserver;
    use crate::secrets::InMemorySecretStore;
    use ircdm_crypto::{sign_bundle, Identity};

    fn exchange() -> (KeyExchange<InMemorySecretStore>, CollectingObserver) {
        let collector = CollectingObserver::new();
        let exchange = KeyExchange::builder(InMemorySecretStore::new_shared())
            .observer(Arc::new(collector.clone()))
            .build();
        (exchange, collector)
    }

    fn bob() -> PeerId {
        PeerId::new("Libera", "bob")
    }

    fn bundle_json() -> (Bundle, String) {
        let bundle = sign_bundle(&Identity::generate().unwrap());
        let json = bundle.to_json();
        (bundle, json)
    }

    #[tokio::test]
    async fn test_incoming_new_bundle_is_stored() {
        let (exchange, collector) = exchange();
        let (bundle, json) = bundle_json();

        let outcome = exchange.handle_incoming_bundle(&bob(), &json).await.unwrap();
        assert_eq!(outcome, AcceptanceOutcome::Stored);
        assert_eq!(
            exchange.ledger().get_bundle_for_network(&bob()).await.unwrap(),
            Some(bundle)
        );
        assert_eq!(collector.stored().len(), 1);
    }

    #[tokio::test]
    async fn test_incoming_garbage_is_ignored() {
        let (exchange, collector) = exchange();
        let outcome = exchange
            .handle_incoming_bundle(&bob(), "{\"version\":1,\"idPub\":\"AAAA\"}")
            .await
            .unwrap();
        assert_eq!(outcome, AcceptanceOutcome::Invalid);
        assert!(collector.events().is_empty());
    }

    #[tokio::test]
    async fn test_incoming_changed_bundle_goes_pending() {
        let (exchange, collector) = exchange();
        let (old, old_json) = bundle_json();
        let (new, new_json) = bundle_json();
        exchange.handle_incoming_bundle(&bob(), &old_json).await.unwrap();

        let outcome = exchange.handle_incoming_bundle(&bob(), &new_json).await.unwrap();
        assert_eq!(outcome, AcceptanceOutcome::Pending);

        let pending = exchange.pending_request(&bob()).await.unwrap();
        assert_eq!(pending.reason, PendingReason::Legacy);
        assert_eq!(pending.existing_fingerprint, Some(old.fingerprint()));
        assert_eq!(pending.new_fingerprint, new.fingerprint());
        assert_eq!(collector.key_requests().len(), 1);
        assert_eq!(
            exchange.ledger().get_bundle_for_network(&bob()).await.unwrap(),
            Some(old)
        );
    }

    #[tokio::test]
    async fn test_offer_for_unknown_peer() {
        let (exchange, collector) = exchange();
        let (_, json) = bundle_json();

        assert!(exchange.handle_key_offer(&bob(), &json).await.unwrap());
        let pending = exchange.pending_request(&bob()).await.unwrap();
        assert_eq!(pending.reason, PendingReason::Offer);
        assert_eq!(pending.existing_fingerprint, None);
        assert!(exchange.ledger().get_bundle_for_network(&bob()).await.unwrap().is_none());
        assert_eq!(collector.key_requests().len(), 1);

        assert!(!exchange.handle_key_offer(&bob(), "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_offer_for_changed_key_has_change_reason() {
        let (exchange, _) = exchange();
        let (_, old_json) = bundle_json();
        let (_, new_json) = bundle_json();
        exchange.handle_incoming_bundle(&bob(), &old_json).await.unwrap();

        exchange.handle_key_offer(&bob(), &new_json).await.unwrap();
        assert_eq!(
            exchange.pending_request(&bob()).await.unwrap().reason,
            PendingReason::Change
        );
    }

    #[tokio::test]
    async fn test_second_offer_replaces_first() {
        let (exchange, _) = exchange();
        let (_, first) = bundle_json();
        let (second_bundle, second) = bundle_json();

        exchange.handle_key_offer(&bob(), &first).await.unwrap();
        exchange.handle_key_offer(&bob(), &second).await.unwrap();

        assert_eq!(exchange.pending_requests().await.len(), 1);
        assert_eq!(
            exchange.pending_request(&bob()).await.unwrap().bundle,
            second_bundle
        );
    }

    #[tokio::test]
    async fn test_accept_stores_and_returns_own_bundle() {
        let (exchange, _) = exchange();
        let (bundle, json) = bundle_json();
        exchange.handle_key_offer(&bob(), &json).await.unwrap();

        let ours = exchange.accept_key_offer(&bob(), false).await.unwrap();
        assert_eq!(ours, exchange.bundles().export_bundle().await.unwrap());
        assert_eq!(
            exchange.ledger().get_bundle_for_network(&bob()).await.unwrap(),
            Some(bundle)
        );
        assert!(exchange.pending_request(&bob()).await.is_none());
    }

    #[tokio::test]
    async fn test_accept_without_pending() {
        let (exchange, _) = exchange();
        let err = exchange.accept_key_offer(&bob(), true).await.unwrap_err();
        assert!(matches!(err, CoreError::NoPendingOffer(_)));
    }

    #[tokio::test]
    async fn test_reject_is_idempotent() {
        let (exchange, _) = exchange();
        let (_, json) = bundle_json();
        exchange.handle_key_offer(&bob(), &json).await.unwrap();

        assert!(exchange.reject_key_offer(&bob()).await);
        assert!(!exchange.reject_key_offer(&bob()).await);
        assert!(exchange.ledger().get_bundle_for_network(&bob()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_acceptance_outcomes() {
        let (exchange, _) = exchange();
        let (_, first) = bundle_json();
        let (_, second) = bundle_json();

        assert_eq!(
            exchange.handle_key_acceptance(&bob(), &first).await.unwrap(),
            AcceptanceOutcome::Stored
        );
        assert_eq!(
            exchange.handle_key_acceptance(&bob(), &first).await.unwrap(),
            AcceptanceOutcome::Stored
        );
        assert_eq!(
            exchange.handle_key_acceptance(&bob(), &second).await.unwrap(),
            AcceptanceOutcome::Pending
        );
        assert_eq!(
            exchange.pending_request(&bob()).await.unwrap().reason,
            PendingReason::Change
        );
        assert_eq!(
            exchange.handle_key_acceptance(&bob(), "[]").await.unwrap(),
            AcceptanceOutcome::Invalid
        );
    }

    #[tokio::test]
    async fn test_await_returns_existing_bundle() {
        let (exchange, _) = exchange();
        let (bundle, json) = bundle_json();
        exchange.handle_incoming_bundle(&bob(), &json).await.unwrap();

        let got = exchange
            .await_bundle_for_nick(&bob(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(got, bundle);
    }

    #[tokio::test]
    async fn test_await_times_out() {
        let (exchange, _) = exchange();
        let err = exchange
            .await_bundle_for_nick(&bob(), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_payload_nick_mismatch_rejected() {
        let (exchange, _) = exchange();
        let bundle = sign_bundle(&Identity::generate().unwrap());
        let payload: ExternalPayload = BundlePayload::new("mallory", bundle).into();

        let err = exchange
            .import_external_payload(&bob(), &payload.to_json())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_payload_bundle_goes_pending_then_already_trusted() {
        let (exchange, _) = exchange();
        let bundle = sign_bundle(&Identity::generate().unwrap());
        let raw = ExternalPayload::from(BundlePayload::new("Bob", bundle.clone())).to_json();

        let outcome = exchange.import_external_payload(&bob(), &raw).await.unwrap();
        assert!(matches!(
            outcome,
            ImportOutcome::BundleReceived(ref r) if r.reason == PendingReason::Offer
        ));

        exchange.accept_key_offer(&bob(), false).await.unwrap();
        let outcome = exchange.import_external_payload(&bob(), &raw).await.unwrap();
        assert_eq!(outcome, ImportOutcome::AlreadyTrusted(bundle.fingerprint()));
    }

    #[tokio::test]
    async fn test_fingerprint_payload_without_stored_key() {
        let (exchange, _) = exchange();
        let fp = sign_bundle(&Identity::generate().unwrap()).fingerprint();
        let raw = ExternalPayload::from(FingerprintPayload::new("bob", fp)).to_json();

        let outcome = exchange.import_external_payload(&bob(), &raw).await.unwrap();
        assert_eq!(
            outcome,
            ImportOutcome::FingerprintCompared {
                matches: false,
                expected: fp,
                stored: None
            }
        );
    }

    #[tokio::test]
    async fn test_export_payloads_describe_own_identity() {
        let (exchange, _) = exchange();
        let bundle_payload = exchange.export_bundle_payload("alice").await.unwrap();
        let fp_payload = exchange.export_fingerprint_payload("alice").await.unwrap();

        assert!(bundle_payload.verify().is_ok());
        assert_eq!(bundle_payload.fingerprint, fp_payload.fingerprint);
        assert_eq!(fp_payload.nick, "alice");
    }
}
