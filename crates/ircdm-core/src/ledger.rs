//! Trust ledger: per-(network, nick) bundles and trust records.
//!
//! Every bundle write goes through [`TrustLedger::store_bundle`] (or the
//! crate-internal locked variant the exchange uses), which re-verifies the
//! bundle and refuses to overwrite a different key unless the caller passes
//! `allow_replace = true` on behalf of a human decision.
//!
//! Operations on one peer are serialized by a per-peer async lock, so a
//! compare followed by a store cannot interleave with another compare/store
//! for the same peer. Observers run after that lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use ircdm_crypto::{verify_bundle, Bundle, Fingerprint};

use crate::errors::{CoreError, StoreError};
use crate::events::{ExchangeObserver, Observers};
use crate::keys::{
    bundle_key, fold_nick, legacy_bundle_key, legacy_trust_key, parse_key, trust_key, PeerId,
    StoredKey,
};
use crate::secrets::{get_json, set_json, SecretStore};
use crate::types::{BundleStored, Comparison, KeyStatus, PeerSummary, TrustRecord, VerificationStatus};

type LockMap = Arc<StdMutex<HashMap<PeerId, Arc<Mutex<()>>>>>;

/// Held while operating on one peer. Dropping the last guard for a peer
/// removes its lock from the map.
pub(crate) struct PeerGuard {
    peer: PeerId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl PeerGuard {
    pub(crate) fn peer(&self) -> &PeerId {
        &self.peer
    }
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // clones are only taken under the map lock, so a count of one means
        // nobody holds or waits on this peer
        if locks.get(&self.peer).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.peer);
        }
    }
}

#[derive(Default)]
struct PeerLocks {
    locks: LockMap,
}

impl PeerLocks {
    async fn lock(&self, peer: &PeerId) -> PeerGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(peer.clone()).or_default().clone()
        };
        PeerGuard {
            peer: peer.clone(),
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct TrustLedger<S: SecretStore + ?Sized> {
    store: Arc<S>,
    locks: PeerLocks,
    observers: Observers,
}

impl<S: SecretStore + ?Sized> TrustLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: PeerLocks::default(),
            observers: Observers::default(),
        }
    }

    /// Register an observer for bundle-stored events. Observers registered
    /// here are also the ones a [`KeyExchange`](crate::exchange::KeyExchange)
    /// built on this ledger notifies.
    pub fn with_observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub(crate) fn observers(&self) -> &Observers {
        &self.observers
    }

    pub(crate) async fn lock_peer(&self, peer: &PeerId) -> PeerGuard {
        self.locks.lock(peer).await
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Classify `candidate` against the bundle stored for `peer`.
    pub async fn compare_bundle(
        &self,
        peer: &PeerId,
        candidate: &Bundle,
    ) -> Result<Comparison, CoreError> {
        let existing = self.get_bundle_for_network(peer).await?.map(|b| b.fingerprint());
        Ok(classify(existing, candidate.fingerprint()))
    }

    /// Bundle stored for `peer` under the network-scoped scheme.
    pub async fn get_bundle_for_network(&self, peer: &PeerId) -> Result<Option<Bundle>, CoreError> {
        self.read_bundle(&bundle_key(peer)).await
    }

    /// Bundle stored under the legacy, network-less scheme.
    pub async fn get_legacy_bundle(&self, nick: &str) -> Result<Option<Bundle>, CoreError> {
        self.read_bundle(&legacy_bundle_key(nick)).await
    }

    pub async fn get_trust_record(&self, peer: &PeerId) -> Result<Option<TrustRecord>, CoreError> {
        Ok(get_json(&*self.store, &trust_key(peer)).await?)
    }

    pub async fn get_legacy_trust_record(&self, nick: &str) -> Result<Option<TrustRecord>, CoreError> {
        Ok(get_json(&*self.store, &legacy_trust_key(nick)).await?)
    }

    /// Fingerprint and verified flag from the trust record, or from a bare
    /// stored bundle (`verified = false`) when no record exists.
    pub async fn get_verification_status(
        &self,
        peer: &PeerId,
    ) -> Result<Option<VerificationStatus>, CoreError> {
        if let Some(record) = self.get_trust_record(peer).await? {
            return Ok(Some(VerificationStatus {
                fingerprint: record.fingerprint,
                verified: record.verified,
            }));
        }
        Ok(self
            .get_bundle_for_network(peer)
            .await?
            .map(|bundle| VerificationStatus {
                fingerprint: bundle.fingerprint(),
                verified: false,
            }))
    }

    async fn read_bundle(&self, key: &str) -> Result<Option<Bundle>, CoreError> {
        let Some(bundle) = get_json::<S, Bundle>(&*self.store, key).await? else {
            return Ok(None);
        };
        verify_bundle(&bundle)
            .map_err(|e| StoreError::DataCorruption(format!("{key}: stored bundle invalid: {e}")))?;
        Ok(Some(bundle))
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Persist `bundle` for `peer` and create or refresh its trust record.
    ///
    /// Fails with [`CoreError::KeyChanged`] when a different key is stored and
    /// `allow_replace` is false; the stored key is left untouched.
    pub async fn store_bundle(
        &self,
        peer: &PeerId,
        bundle: &Bundle,
        allow_replace: bool,
    ) -> Result<BundleStored, CoreError> {
        let guard = self.lock_peer(peer).await;
        let stored = self.store_locked(&guard, bundle, allow_replace).await?;
        drop(guard);

        self.observers.bundle_stored(&stored);
        Ok(stored)
    }

    /// [`store_bundle`](Self::store_bundle) for a caller already holding the
    /// peer lock. Does not notify observers.
    pub(crate) async fn store_locked(
        &self,
        guard: &PeerGuard,
        bundle: &Bundle,
        allow_replace: bool,
    ) -> Result<BundleStored, CoreError> {
        let peer = guard.peer();
        verify_bundle(bundle)?;

        let comparison = self.compare_bundle(peer, bundle).await?;
        if comparison.status == KeyStatus::Changed && !allow_replace {
            return Err(CoreError::KeyChanged {
                peer: peer.clone(),
                existing: comparison.existing_fingerprint.unwrap_or(comparison.new_fingerprint),
                new: comparison.new_fingerprint,
            });
        }

        let now = Utc::now();
        let record = match self.get_trust_record(peer).await? {
            Some(existing) if existing.fingerprint == comparison.new_fingerprint => TrustRecord {
                last_seen: now,
                ..existing
            },
            _ => TrustRecord {
                fingerprint: comparison.new_fingerprint,
                verified: false,
                first_seen: now,
                last_seen: now,
            },
        };

        let key = bundle_key(peer);
        let previous = self.store.get_secret(&key).await?;
        set_json(&*self.store, &key, bundle).await?;
        if let Err(e) = set_json(&*self.store, &trust_key(peer), &record).await {
            warn!(peer = %peer, error = %e, "trust record write failed; restoring previous bundle");
            let restored = match previous {
                Some(raw) => self.store.set_secret(&key, &raw).await,
                None => self.store.remove_secret(&key).await,
            };
            if let Err(restore) = restored {
                warn!(peer = %peer, error = %restore, "could not restore previous bundle");
            }
            return Err(e.into());
        }

        match comparison.status {
            KeyStatus::New => info!(peer = %peer, fingerprint = %record.fingerprint.short(), "stored new key"),
            KeyStatus::Same => debug!(peer = %peer, "refreshed known key"),
            KeyStatus::Changed => info!(
                peer = %peer,
                old = %comparison.existing_fingerprint.map(|f| f.short()).unwrap_or_default(),
                new = %record.fingerprint.short(),
                "replaced changed key"
            ),
        }

        Ok(BundleStored {
            peer: peer.clone(),
            bundle: bundle.clone(),
            fingerprint: record.fingerprint,
            status: comparison.status,
        })
    }

    /// Set the user-verified flag. Returns `false` (and changes nothing)
    /// when no trust record exists.
    pub async fn set_verified(&self, peer: &PeerId, verified: bool) -> Result<bool, CoreError> {
        let _guard = self.lock_peer(peer).await;
        let Some(mut record) = self.get_trust_record(peer).await? else {
            debug!(peer = %peer, "set_verified without trust record");
            return Ok(false);
        };
        record.verified = verified;
        record.last_seen = Utc::now();
        set_json(&*self.store, &trust_key(peer), &record).await?;
        info!(peer = %peer, verified, "updated verification");
        Ok(true)
    }

    /// Remove the bundle and trust record for `peer`. Returns whether a
    /// bundle existed.
    pub async fn delete_peer(&self, peer: &PeerId) -> Result<bool, CoreError> {
        let _guard = self.lock_peer(peer).await;
        let existed = self.store.get_secret(&bundle_key(peer)).await?.is_some();
        self.store.remove_secret(&bundle_key(peer)).await?;
        self.store.remove_secret(&trust_key(peer)).await?;
        if existed {
            info!(peer = %peer, "deleted peer key");
        }
        Ok(existed)
    }

    /// Move a peer's bundle and trust record from one network to another.
    ///
    /// Refuses to overwrite a different key already stored at the
    /// destination ([`CoreError::KeyChanged`]).
    pub async fn move_peer(
        &self,
        from_network: &str,
        to_network: &str,
        nick: &str,
    ) -> Result<(), CoreError> {
        let from = PeerId::new(from_network, nick);
        let to = PeerId::new(to_network, nick);
        if from == to {
            return Ok(());
        }

        // fixed lock order across both peers
        let (first, second) = if from < to { (&from, &to) } else { (&to, &from) };
        let _g1 = self.lock_peer(first).await;
        let _g2 = self.lock_peer(second).await;

        let bundle = self
            .get_bundle_for_network(&from)
            .await?
            .ok_or_else(|| CoreError::UnknownPeer(from.clone()))?;
        let moved_fp = bundle.fingerprint();

        if let Some(existing) = self.get_bundle_for_network(&to).await? {
            if existing.fingerprint() != moved_fp {
                return Err(CoreError::KeyChanged {
                    peer: to,
                    existing: existing.fingerprint(),
                    new: moved_fp,
                });
            }
        }

        let now = Utc::now();
        let record = self.get_trust_record(&from).await?.unwrap_or(TrustRecord {
            fingerprint: moved_fp,
            verified: false,
            first_seen: now,
            last_seen: now,
        });

        set_json(&*self.store, &bundle_key(&to), &bundle).await?;
        set_json(&*self.store, &trust_key(&to), &record).await?;
        self.store.remove_secret(&bundle_key(&from)).await?;
        self.store.remove_secret(&trust_key(&from)).await?;

        info!(from = %from, to = %to, "moved peer key");
        Ok(())
    }

    /// Copy every legacy bundle (and trust record) into the network-scoped
    /// scheme for `network`. Legacy entries are left in place. Peers that
    /// already have a key on `network` are skipped.
    pub async fn migrate_old_keys_to_network(&self, network: &str) -> Result<usize, CoreError> {
        let mut migrated = Vec::new();

        for nick in self.list_legacy_nicks().await? {
            let peer = PeerId::new(network, &nick);
            let guard = self.lock_peer(&peer).await;

            let bundle = match self.get_legacy_bundle(&nick).await {
                Ok(Some(bundle)) => bundle,
                Ok(None) => continue,
                Err(e) if is_corrupt(&e) => {
                    warn!(nick = %nick, error = %e, "skipping corrupt legacy key");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let fingerprint = bundle.fingerprint();

            let existing = match self.get_bundle_for_network(&peer).await {
                Ok(existing) => existing,
                Err(e) if is_corrupt(&e) => {
                    warn!(peer = %peer, error = %e, "network key unreadable; not migrated");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(existing) = existing {
                if existing.fingerprint() != fingerprint {
                    warn!(peer = %peer, "legacy key differs from network key; not migrated");
                }
                continue;
            }

            let now = Utc::now();
            let legacy_record = match self.get_legacy_trust_record(&nick).await {
                Ok(record) => record,
                Err(e) if is_corrupt(&e) => {
                    warn!(nick = %nick, error = %e, "ignoring corrupt legacy trust record");
                    None
                }
                Err(e) => return Err(e),
            };
            let record = match legacy_record {
                Some(record) if record.fingerprint == fingerprint => record,
                _ => TrustRecord {
                    fingerprint,
                    verified: false,
                    first_seen: now,
                    last_seen: now,
                },
            };

            set_json(&*self.store, &bundle_key(&peer), &bundle).await?;
            set_json(&*self.store, &trust_key(&peer), &record).await?;
            drop(guard);

            migrated.push(BundleStored {
                peer,
                bundle,
                fingerprint,
                status: KeyStatus::New,
            });
        }

        info!(network, count = migrated.len(), "migrated legacy keys");
        for event in &migrated {
            self.observers.bundle_stored(event);
        }
        Ok(migrated.len())
    }

    // -------------------------------------------------------------------------
    // Listing
    // -------------------------------------------------------------------------

    /// Peers with a bundle on `network`, sorted by nick.
    pub async fn list_peers(&self, network: &str) -> Result<Vec<PeerSummary>, CoreError> {
        let network = network.trim();
        let mut peers = Vec::new();

        for key in self.store.list_secret_keys().await? {
            let Some(StoredKey::Bundle(peer)) = parse_key(&key) else {
                continue;
            };
            if peer.network() != network {
                continue;
            }
            // tolerate entries removed or half-written while listing
            let bundle = match self.get_bundle_for_network(&peer).await {
                Ok(Some(bundle)) => bundle,
                Ok(None) => continue,
                Err(e) if is_corrupt(&e) => {
                    warn!(peer = %peer, error = %e, "skipping corrupt key");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let record = match self.get_trust_record(&peer).await {
                Ok(record) => record,
                Err(e) if is_corrupt(&e) => {
                    warn!(peer = %peer, error = %e, "ignoring corrupt trust record");
                    None
                }
                Err(e) => return Err(e),
            };
            let fingerprint = bundle.fingerprint();
            let verified = record
                .as_ref()
                .is_some_and(|r| r.fingerprint == fingerprint && r.verified);

            peers.push(PeerSummary {
                nick: peer.nick().to_string(),
                fingerprint,
                verified,
                first_seen: record.as_ref().map(|r| r.first_seen),
                last_seen: record.as_ref().map(|r| r.last_seen),
            });
        }

        peers.sort_by(|a, b| a.nick.cmp(&b.nick));
        Ok(peers)
    }

    /// Networks with at least one stored bundle, sorted.
    pub async fn list_networks(&self) -> Result<Vec<String>, CoreError> {
        let mut networks: Vec<String> = self
            .store
            .list_secret_keys()
            .await?
            .iter()
            .filter_map(|key| match parse_key(key) {
                Some(StoredKey::Bundle(peer)) => Some(peer.network().to_string()),
                _ => None,
            })
            .collect();
        networks.sort();
        networks.dedup();
        Ok(networks)
    }

    /// Nicks with a bundle under the legacy scheme, folded and sorted.
    pub async fn list_legacy_nicks(&self) -> Result<Vec<String>, CoreError> {
        let mut nicks: Vec<String> = self
            .store
            .list_secret_keys()
            .await?
            .iter()
            .filter_map(|key| match parse_key(key) {
                Some(StoredKey::LegacyBundle(nick)) => Some(fold_nick(&nick)),
                _ => None,
            })
            .collect();
        nicks.sort();
        nicks.dedup();
        Ok(nicks)
    }
}

fn is_corrupt(err: &CoreError) -> bool {
    matches!(err, CoreError::Storage(StoreError::DataCorruption(_)))
}

fn classify(existing: Option<Fingerprint>, new_fingerprint: Fingerprint) -> Comparison {
    let status = match existing {
        None => KeyStatus::New,
        Some(fp) if fp == new_fingerprint => KeyStatus::Same,
        Some(_) => KeyStatus::Changed,
    };
    Comparison {
        status,
        existing_fingerprint: existing,
        new_fingerprint,
    }
}
