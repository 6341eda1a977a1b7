//! Test harness for ircdm core.
//!
//! Simulated installations (each with its own in-memory secret store) and a
//! helper that runs the in-band offer/accept handshake between two of them.

use std::sync::Arc;

use ircdm_crypto::{sign_bundle, Bundle, Identity};

use crate::config::ExchangeConfig;
use crate::errors::CoreError;
use crate::events::CollectingObserver;
use crate::exchange::KeyExchange;
use crate::keys::PeerId;
use crate::secrets::InMemorySecretStore;
use crate::types::AcceptanceOutcome;

/// One simulated IRC client with its own storage.
pub struct Installation {
    pub nick: String,
    pub network: String,
    pub store: Arc<InMemorySecretStore>,
    pub exchange: KeyExchange<InMemorySecretStore>,
    pub events: CollectingObserver,
}

impl Installation {
    pub fn new(network: &str, nick: &str) -> Self {
        Self::with_config(network, nick, ExchangeConfig::default())
    }

    pub fn with_config(network: &str, nick: &str, config: ExchangeConfig) -> Self {
        let store = InMemorySecretStore::new_shared();
        let events = CollectingObserver::new();
        let exchange = KeyExchange::builder(store.clone())
            .config(config)
            .observer(Arc::new(events.clone()))
            .build();
        Self {
            nick: nick.to_string(),
            network: network.to_string(),
            store,
            exchange,
            events,
        }
    }

    /// How this installation addresses `other`.
    pub fn peer(&self, other: &Installation) -> PeerId {
        PeerId::new(&self.network, &other.nick)
    }

    pub async fn bundle(&self) -> Result<Bundle, CoreError> {
        self.exchange.bundles().export_bundle().await
    }

    pub async fn bundle_json(&self) -> Result<String, CoreError> {
        Ok(self.bundle().await?.to_json())
    }
}

/// A valid bundle from a throwaway identity.
pub fn fresh_bundle() -> Result<Bundle, CoreError> {
    Ok(sign_bundle(&Identity::generate()?))
}

/// `offerer` sends its bundle as an offer, `responder` accepts it and
/// replies with its own bundle, `offerer` stores that reply.
pub async fn run_key_exchange(
    offerer: &Installation,
    responder: &Installation,
) -> Result<AcceptanceOutcome, CoreError> {
    let offer = offerer.bundle_json().await?;
    let from_offerer = responder.peer(offerer);
    if !responder.exchange.handle_key_offer(&from_offerer, &offer).await? {
        return Ok(AcceptanceOutcome::Invalid);
    }

    let reply = responder
        .exchange
        .accept_key_offer(&from_offerer, false)
        .await?;

    offerer
        .exchange
        .handle_key_acceptance(&offerer.peer(responder), &reply.to_json())
        .await
}
