//! Loads offers by replaying their stream, saves their pending events
use crate::error::EventStoreError;
use crate::offer::Offer;
use crate::store::EventStore;
use crate::types::OfferKey;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct OfferRepository {
    store: Arc<dyn EventStore>,
}

impl OfferRepository {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Replay the offer's stream. A version 0 result means the offer does not
    /// exist; telling the caller so is left to them.
    pub fn load(&self, key: &OfferKey) -> Result<Offer, EventStoreError> {
        let events = self.store.load(&key.stream_key())?;

        Ok(Offer::from_events(key.clone(), &events))
    }

    /// Append the offer's pending events, conditioned on the version it was
    /// loaded at. On success the offer is marked as committed.
    pub fn save(&self, offer: &mut Offer) -> Result<(), EventStoreError> {
        if offer.changes().is_empty() {
            return Ok(());
        }

        let version = self
            .store
            .append(&offer.key().stream_key(), offer.version(), offer.changes())?;
        debug!(offer = %offer.key(), version, "saved offer");
        offer.mark_as_committed();

        Ok(())
    }

    pub fn offer_keys(&self) -> Result<Vec<OfferKey>, EventStoreError> {
        Ok(self
            .store
            .stream_keys()?
            .into_iter()
            .filter_map(|stream| stream.strip_prefix("offer:").map(OfferKey::new))
            .collect())
    }

    pub(crate) fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }
}
