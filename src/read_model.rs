//! Secondary indexes over offers, projected from saved aggregates
use crate::item::OfferItemKind;
use crate::offer::{Offer, OfferStatus};
use crate::types::{GroupKey, OfferItemKey, OfferKey, ResourceKey, Target, TimeSpan, TimeStamp, UserKey};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};

/// One settled item of a completed offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub offer_key: OfferKey,
    pub item_key: OfferItemKey,
    pub group_key: GroupKey,
    pub author: UserKey,
    pub kind: OfferItemKind,
    pub from: Option<Target>,
    pub to: Target,
    pub resource_key: Option<ResourceKey>,
    pub time_value: Option<TimeSpan>,
    pub completed_at: TimeStamp<Utc>,
}

impl HistoryEntry {
    /// Whether the user is named by the entry, or authored its offer.
    pub fn involves(&self, user: &UserKey) -> bool {
        &self.author == user
            || self.to.user_key() == Some(user)
            || self.from.as_ref().and_then(Target::user_key) == Some(user)
    }

    /// Entries for every item of a completed offer, empty otherwise.
    pub fn from_offer(offer: &Offer) -> Vec<HistoryEntry> {
        let (Some(details), Some(completed_at)) = (offer.details(), offer.completed_at()) else {
            return vec![];
        };
        offer
            .items()
            .iter()
            .map(|item| HistoryEntry {
                offer_key: offer.key().clone(),
                item_key: item.key().clone(),
                group_key: details.group_key.clone(),
                author: details.created_by.clone(),
                kind: item.kind(),
                from: item.from().cloned(),
                to: item.to().clone(),
                resource_key: item.resource_key().cloned(),
                time_value: item.time_value(),
                completed_at: completed_at.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct OfferIndex {
    item_offers: HashMap<OfferItemKey, OfferKey>,
    user_offers: HashMap<UserKey, BTreeSet<OfferKey>>,
    group_offers: HashMap<GroupKey, BTreeSet<OfferKey>>,
    completed_offers: HashMap<GroupKey, BTreeSet<OfferKey>>,
}

impl OfferIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the offer's current state into the indexes. Projecting the same
    /// offer again is harmless.
    pub fn project(&mut self, offer: &Offer) {
        let Some(details) = offer.details() else {
            return;
        };
        let key = offer.key();

        for item in offer.items() {
            self.item_offers.insert(item.key().clone(), key.clone());
        }

        let users = std::iter::once(details.created_by.clone()).chain(offer.items().get_user_keys());
        for user in users {
            self.user_offers.entry(user).or_default().insert(key.clone());
        }

        let groups = std::iter::once(details.group_key.clone()).chain(offer.items().get_group_keys());
        for group in groups {
            self.group_offers.entry(group).or_default().insert(key.clone());
        }

        if offer.status() == OfferStatus::Completed {
            self.completed_offers
                .entry(details.group_key.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    pub fn offer_for_item(&self, item: &OfferItemKey) -> Option<&OfferKey> {
        self.item_offers.get(item)
    }

    /// Offers the user authored or is named in directly.
    pub fn offers_for_user(&self, user: &UserKey) -> BTreeSet<OfferKey> {
        self.user_offers.get(user).cloned().unwrap_or_default()
    }

    pub fn offers_for_group(&self, group: &GroupKey) -> BTreeSet<OfferKey> {
        self.group_offers.get(group).cloned().unwrap_or_default()
    }

    pub fn completed_offers(&self, group: &GroupKey) -> BTreeSet<OfferKey> {
        self.completed_offers.get(group).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.group_offers.values().flatten().collect::<BTreeSet<_>>().len()
    }

    pub fn is_empty(&self) -> bool {
        self.group_offers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::OfferItem;

    fn offer() -> Offer {
        let mut offer = Offer::new("offer-1".into());
        offer
            .submit(
                "ann".into(),
                "club".into(),
                String::new(),
                vec![OfferItem::credit_transfer(
                    "credits".into(),
                    "offer-1".into(),
                    Target::group("juniors"),
                    Target::user("ben"),
                    TimeSpan::hours(2),
                    TimeStamp::new(),
                )],
                None,
            )
            .unwrap();
        offer
    }

    #[test]
    fn projection_indexes_people_groups_and_items() {
        let mut index = OfferIndex::new();
        let offer = offer();
        index.project(&offer);
        index.project(&offer);

        let key = OfferKey::new("offer-1");
        assert_eq!(index.offer_for_item(&"credits".into()), Some(&key));
        assert!(index.offers_for_user(&"ann".into()).contains(&key));
        assert!(index.offers_for_user(&"ben".into()).contains(&key));
        assert!(index.offers_for_group(&"club".into()).contains(&key));
        assert!(index.offers_for_group(&"juniors".into()).contains(&key));
        assert!(index.completed_offers(&"club".into()).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn completed_offers_produce_history() {
        let mut offer = offer();
        assert!(HistoryEntry::from_offer(&offer).is_empty());

        offer.accept_as_giver(&"cat".into(), &"credits".into()).unwrap();
        offer.accept_as_receiver(&"ben".into(), &"credits".into()).unwrap();
        assert_eq!(offer.status(), OfferStatus::Completed);

        let mut index = OfferIndex::new();
        index.project(&offer);
        assert_eq!(index.completed_offers(&"club".into()).len(), 1);

        let history = HistoryEntry::from_offer(&offer);
        assert_eq!(history.len(), 1);
        assert!(history[0].involves(&"ann".into()));
        assert!(history[0].involves(&"ben".into()));
        assert!(!history[0].involves(&"cat".into()));
        assert_eq!(history[0].time_value, Some(TimeSpan::hours(2)));
    }
}
