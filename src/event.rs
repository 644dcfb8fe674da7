//! Domain events recorded against an offer's stream
use crate::error::EventStoreError;
use crate::item::OfferItem;
use crate::types::{GroupKey, OfferItemKey, OfferKey, TimeStamp, UserKey};
use chrono::Utc;

/// One fact in an offer's history. `sequence` is 1-based and dense within a
/// stream; `recorded_at` is the only clock the fold ever looks at.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct RecordedEvent {
    #[n(0)]
    pub offer_key: OfferKey,
    #[n(1)]
    pub sequence: u64,
    #[n(2)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(3)]
    pub event: OfferEvent,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum OfferEvent {
    #[n(0)]
    OfferCreated {
        #[n(0)]
        group_key: GroupKey,
        #[n(1)]
        created_by: UserKey,
        #[n(2)]
        message: String,
        #[n(3)]
        items: Vec<OfferItem>,
        #[n(4)]
        expiration_time: Option<TimeStamp<Utc>>,
    },
    #[n(1)]
    OfferItemGiverAccepted {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(2)]
    OfferItemReceiverAccepted {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(3)]
    OfferAccepted,
    #[n(4)]
    OfferDeclined {
        #[n(0)]
        by: UserKey,
    },
    #[n(5)]
    OfferCanceled {
        #[n(0)]
        by: UserKey,
    },
    #[n(6)]
    OfferExpired,
    #[n(7)]
    ResourceGiven {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(8)]
    ResourceReceived {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(9)]
    ResourceBorrowed {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(10)]
    ResourceLent {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(11)]
    BorrowerReturnedResource {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(12)]
    LenderReceivedBackResource {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(13)]
    ServiceGiven {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(14)]
    ServiceReceived {
        #[n(0)]
        by: UserKey,
        #[n(1)]
        item_key: OfferItemKey,
    },
    #[n(15)]
    OfferCompleted,
}

impl OfferEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OfferEvent::OfferCreated { .. } => "offer_created",
            OfferEvent::OfferItemGiverAccepted { .. } => "offer_item_giver_accepted",
            OfferEvent::OfferItemReceiverAccepted { .. } => "offer_item_receiver_accepted",
            OfferEvent::OfferAccepted => "offer_accepted",
            OfferEvent::OfferDeclined { .. } => "offer_declined",
            OfferEvent::OfferCanceled { .. } => "offer_canceled",
            OfferEvent::OfferExpired => "offer_expired",
            OfferEvent::ResourceGiven { .. } => "resource_given",
            OfferEvent::ResourceReceived { .. } => "resource_received",
            OfferEvent::ResourceBorrowed { .. } => "resource_borrowed",
            OfferEvent::ResourceLent { .. } => "resource_lent",
            OfferEvent::BorrowerReturnedResource { .. } => "borrower_returned_resource",
            OfferEvent::LenderReceivedBackResource { .. } => "lender_received_back_resource",
            OfferEvent::ServiceGiven { .. } => "service_given",
            OfferEvent::ServiceReceived { .. } => "service_received",
            OfferEvent::OfferCompleted => "offer_completed",
        }
    }
}

impl RecordedEvent {
    pub fn new(
        offer_key: OfferKey,
        sequence: u64,
        recorded_at: TimeStamp<Utc>,
        event: OfferEvent,
    ) -> Self {
        Self {
            offer_key,
            sequence,
            recorded_at,
            event,
        }
    }
    /// Encode to CBOR, returning the sha256 digest of the encoding alongside it.
    pub fn build(&self) -> Result<(String, Vec<u8>), EventStoreError> {
        let cbor = minicbor::to_vec(self).map_err(|e| EventStoreError::Encode(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_identical_events() {
        let event = RecordedEvent::new(
            "offer-1".into(),
            3,
            TimeStamp::new_with(2024, 6, 1, 12, 0, 0).expect("valid date"),
            OfferEvent::ServiceGiven {
                by: "alice".into(),
                item_key: "item-1".into(),
            },
        );

        let (hash_a, cbor) = event.build().unwrap();
        let (hash_b, _) = event.clone().build().unwrap();
        assert_eq!(hash_a, hash_b);

        let decoded: RecordedEvent = minicbor::decode(&cbor).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.event.name(), "service_given");
    }
}
