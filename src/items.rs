//! The ordered set of items belonging to one offer
use crate::item::OfferItem;
use crate::types::{GroupKey, OfferItemKey, ResourceKey, Target, UserKey};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferItems {
    items: Vec<OfferItem>,
}

impl OfferItems {
    pub fn new(items: Vec<OfferItem>) -> Self {
        Self { items }
    }
    pub fn append(&mut self, item: OfferItem) {
        self.items.push(item);
    }
    pub fn iter(&self) -> impl Iterator<Item = &OfferItem> {
        self.items.iter()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn get(&self, key: &OfferItemKey) -> Option<&OfferItem> {
        self.items.iter().find(|item| item.key() == key)
    }
    pub(crate) fn get_mut(&mut self, key: &OfferItemKey) -> Option<&mut OfferItem> {
        self.items.iter_mut().find(|item| item.key() == key)
    }
    pub fn keys(&self) -> Vec<OfferItemKey> {
        self.items.iter().map(|item| item.key().clone()).collect()
    }

    /// True iff every item has been accepted by both its giver and receiver.
    pub fn all_parties_accepted(&self) -> bool {
        self.items.iter().all(OfferItem::is_accepted)
    }

    /// True iff every item that needs a post-acceptance confirmation has it.
    /// Credit transfers are skipped: they settle at acceptance.
    pub fn all_user_actions_completed(&self) -> bool {
        self.items
            .iter()
            .filter(|item| !item.is_credit_transfer())
            .all(OfferItem::is_completed)
    }

    pub fn get_offer_items_received_by_user(&self, user_key: &UserKey) -> Vec<&OfferItem> {
        self.items
            .iter()
            .filter(|item| item.to().user_key() == Some(user_key))
            .collect()
    }

    pub fn get_resource_keys(&self) -> BTreeSet<ResourceKey> {
        self.items
            .iter()
            .filter_map(|item| item.resource_key().cloned())
            .collect()
    }

    /// Users named directly by any item, as receiver or as credit giver.
    pub fn get_user_keys(&self) -> BTreeSet<UserKey> {
        self.targets()
            .filter_map(|target| target.user_key().cloned())
            .collect()
    }

    /// Groups named directly by any item, as receiver or as credit giver.
    pub fn get_group_keys(&self) -> BTreeSet<GroupKey> {
        self.targets()
            .filter_map(|target| target.group_key().cloned())
            .collect()
    }

    fn targets(&self) -> impl Iterator<Item = &Target> {
        self.items
            .iter()
            .flat_map(|item| std::iter::once(item.to()).chain(item.from()))
    }
}

impl FromIterator<OfferItem> for OfferItems {
    fn from_iter<I: IntoIterator<Item = OfferItem>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a OfferItems {
    type Item = &'a OfferItem;
    type IntoIter = std::slice::Iter<'a, OfferItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
