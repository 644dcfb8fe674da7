//! Who may act on which side of which item.
//!
//! Approvers are never stored. They are resolved from current membership each
//! time they are needed, so a user who leaves a group loses future approval
//! rights while acceptances they already recorded stay on the items.
use crate::error::LookupError;
use crate::item::{ApprovalSide, OfferItem};
use crate::items::OfferItems;
use crate::lookup::{MembershipLookup, ResourceLookup, ResourceLookupResult};
use crate::types::{GroupKey, OfferItemKey, OfferKey, ResourceKey, Target, UserKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Who stands behind the giving side of transfer, service and borrow items,
/// which name no explicit giver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImplicitGiver {
    /// Approved members of the group the offer was made in.
    #[default]
    GroupMembers,
    /// Holders of an ownership claim on the referenced resource.
    ResourceOwner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferApprovers {
    pub offer_key: OfferKey,
    pub offer_items_users_can_give: BTreeMap<UserKey, BTreeSet<OfferItemKey>>,
    pub offer_items_users_can_receive: BTreeMap<UserKey, BTreeSet<OfferItemKey>>,
    pub users_able_to_give_item: BTreeMap<OfferItemKey, BTreeSet<UserKey>>,
    pub users_able_to_receive_item: BTreeMap<OfferItemKey, BTreeSet<UserKey>>,
}

impl OfferApprovers {
    pub fn new(offer_key: OfferKey) -> Self {
        Self {
            offer_key,
            offer_items_users_can_give: BTreeMap::new(),
            offer_items_users_can_receive: BTreeMap::new(),
            users_able_to_give_item: BTreeMap::new(),
            users_able_to_receive_item: BTreeMap::new(),
        }
    }

    fn insert(&mut self, item: &OfferItemKey, side: ApprovalSide, users: BTreeSet<UserKey>) {
        let (by_user, by_item) = match side {
            ApprovalSide::Giver => (
                &mut self.offer_items_users_can_give,
                &mut self.users_able_to_give_item,
            ),
            ApprovalSide::Receiver => (
                &mut self.offer_items_users_can_receive,
                &mut self.users_able_to_receive_item,
            ),
        };
        for user in &users {
            by_user.entry(user.clone()).or_default().insert(item.clone());
        }
        by_item.entry(item.clone()).or_default().extend(users);
    }

    pub fn approvers(&self, item: &OfferItemKey, side: ApprovalSide) -> BTreeSet<UserKey> {
        let by_item = match side {
            ApprovalSide::Giver => &self.users_able_to_give_item,
            ApprovalSide::Receiver => &self.users_able_to_receive_item,
        };
        by_item.get(item).cloned().unwrap_or_default()
    }

    /// Items the user may act on from the given side.
    pub fn items_for(&self, user: &UserKey, side: ApprovalSide) -> BTreeSet<OfferItemKey> {
        let by_user = match side {
            ApprovalSide::Giver => &self.offer_items_users_can_give,
            ApprovalSide::Receiver => &self.offer_items_users_can_receive,
        };
        by_user.get(user).cloned().unwrap_or_default()
    }

    pub fn can_act(&self, user: &UserKey, item: &OfferItemKey, side: ApprovalSide) -> bool {
        let by_item = match side {
            ApprovalSide::Giver => &self.users_able_to_give_item,
            ApprovalSide::Receiver => &self.users_able_to_receive_item,
        };
        by_item.get(item).is_some_and(|users| users.contains(user))
    }

    pub fn can_give(&self, user: &UserKey, item: &OfferItemKey) -> bool {
        self.can_act(user, item, ApprovalSide::Giver)
    }

    pub fn can_receive(&self, user: &UserKey, item: &OfferItemKey) -> bool {
        self.can_act(user, item, ApprovalSide::Receiver)
    }

    pub fn is_user_an_approver(&self, user: &UserKey) -> bool {
        self.offer_items_users_can_give.contains_key(user)
            || self.offer_items_users_can_receive.contains_key(user)
    }

    pub fn all_user_keys(&self) -> BTreeSet<UserKey> {
        self.offer_items_users_can_give
            .keys()
            .chain(self.offer_items_users_can_receive.keys())
            .cloned()
            .collect()
    }

    /// Item sides nobody is able to approve.
    pub fn unapprovable_items<'a>(
        &self,
        items: impl IntoIterator<Item = &'a OfferItem>,
    ) -> Vec<(OfferItemKey, ApprovalSide)> {
        let mut missing = vec![];
        for item in items {
            for side in [ApprovalSide::Giver, ApprovalSide::Receiver] {
                if self.approvers(item.key(), side).is_empty() {
                    missing.push((item.key().clone(), side));
                }
            }
        }
        missing
    }
}

/// Expands targets into users. Group expansions are cached for the lifetime of
/// the resolver, which is meant to be a single request.
pub struct ApproversResolver<'a> {
    memberships: &'a dyn MembershipLookup,
    resources: &'a dyn ResourceLookup,
    policy: ImplicitGiver,
    groups: HashMap<GroupKey, BTreeSet<UserKey>>,
}

impl<'a> ApproversResolver<'a> {
    pub fn new(
        memberships: &'a dyn MembershipLookup,
        resources: &'a dyn ResourceLookup,
        policy: ImplicitGiver,
    ) -> Self {
        Self {
            memberships,
            resources,
            policy,
            groups: HashMap::new(),
        }
    }

    /// A user target is that user; a group target is its approved members.
    pub fn expand(&mut self, target: &Target) -> Result<BTreeSet<UserKey>, LookupError> {
        match target {
            Target::User(user) => Ok(BTreeSet::from([user.clone()])),
            Target::Group(group) => self.approved_members(group),
        }
    }

    fn approved_members(&mut self, group: &GroupKey) -> Result<BTreeSet<UserKey>, LookupError> {
        if let Some(members) = self.groups.get(group) {
            return Ok(members.clone());
        }
        let members = self.memberships.get_approved_members(group)?;
        self.groups.insert(group.clone(), members.clone());

        Ok(members)
    }

    pub fn resolve(
        &mut self,
        offer_key: &OfferKey,
        group_key: &GroupKey,
        items: &OfferItems,
    ) -> Result<OfferApprovers, LookupError> {
        let claims = match self.policy {
            ImplicitGiver::ResourceOwner => {
                let keys: BTreeSet<ResourceKey> = items.get_resource_keys();
                self.resources.get_by_keys(&keys)?
            }
            ImplicitGiver::GroupMembers => ResourceLookupResult::default(),
        };

        let mut approvers = OfferApprovers::new(offer_key.clone());
        for item in items {
            let receivers = self.expand(item.to())?;
            let givers = self.givers(item, group_key, &claims)?;

            approvers.insert(item.key(), ApprovalSide::Receiver, receivers);
            approvers.insert(item.key(), ApprovalSide::Giver, givers);
        }

        Ok(approvers)
    }

    fn givers(
        &mut self,
        item: &OfferItem,
        group_key: &GroupKey,
        claims: &ResourceLookupResult,
    ) -> Result<BTreeSet<UserKey>, LookupError> {
        match item {
            OfferItem::CreditTransfer(credit) => self.expand(&credit.from),
            OfferItem::ResourceTransfer(_)
            | OfferItem::ProvideService(_)
            | OfferItem::BorrowResource(_) => match (self.policy, item.resource_key()) {
                (ImplicitGiver::ResourceOwner, Some(resource)) => {
                    let mut users = BTreeSet::new();
                    for owner in claims.owners(resource) {
                        users.extend(self.expand(owner)?);
                    }
                    Ok(users)
                }
                _ => self.approved_members(group_key),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::lookup::{ClaimKind, ResourceKind};
    use crate::types::{TimeSpan, TimeStamp};

    fn directory() -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.add_approved_member("ann", "garden");
        directory.add_approved_member("ben", "garden");
        // invited, never confirmed by the group
        directory.add_membership("cat", "garden", true, false);
        directory.add_resource("spade", ResourceKind::Object, "Spade");
        directory.add_claim("spade", Target::user("ann"), ClaimKind::Owner);
        directory
    }

    fn items() -> OfferItems {
        let at = TimeStamp::new();
        OfferItems::new(vec![
            OfferItem::credit_transfer(
                "credits".into(),
                "offer".into(),
                Target::group("garden"),
                Target::user("dan"),
                TimeSpan::hours(1),
                at.clone(),
            ),
            OfferItem::resource_transfer(
                "spade-to-dan".into(),
                "offer".into(),
                "spade".into(),
                Target::user("dan"),
                at,
            ),
        ])
    }

    #[test]
    fn group_targets_expand_to_approved_members_only() {
        let directory = directory();
        let mut resolver = ApproversResolver::new(&directory, &directory, ImplicitGiver::GroupMembers);
        let approvers = resolver
            .resolve(&"offer".into(), &"garden".into(), &items())
            .unwrap();

        let givers = approvers.approvers(&"credits".into(), ApprovalSide::Giver);
        assert_eq!(givers, BTreeSet::from(["ann".into(), "ben".into()]));
        assert!(!approvers.is_user_an_approver(&"cat".into()));
        assert!(approvers.can_receive(&"dan".into(), &"credits".into()));
        assert!(!approvers.can_give(&"dan".into(), &"credits".into()));
        assert_eq!(
            approvers.items_for(&"dan".into(), ApprovalSide::Receiver),
            BTreeSet::from(["credits".into(), "spade-to-dan".into()])
        );
        assert!(approvers.unapprovable_items(&items()).is_empty());
    }

    #[test]
    fn resource_owner_policy_uses_ownership_claims() {
        let directory = directory();
        let mut resolver =
            ApproversResolver::new(&directory, &directory, ImplicitGiver::ResourceOwner);
        let approvers = resolver
            .resolve(&"offer".into(), &"garden".into(), &items())
            .unwrap();

        assert_eq!(
            approvers.approvers(&"spade-to-dan".into(), ApprovalSide::Giver),
            BTreeSet::from(["ann".into()])
        );
        assert_eq!(
            approvers.all_user_keys(),
            BTreeSet::from(["ann".into(), "ben".into(), "dan".into()])
        );
    }

    #[test]
    fn empty_group_leaves_side_unapprovable() {
        let directory = directory();
        let items = OfferItems::new(vec![OfferItem::credit_transfer(
            "credits".into(),
            "offer".into(),
            Target::group("ghost-town"),
            Target::user("dan"),
            TimeSpan::hours(1),
            TimeStamp::new(),
        )]);
        let mut resolver = ApproversResolver::new(&directory, &directory, ImplicitGiver::GroupMembers);
        let approvers = resolver
            .resolve(&"offer".into(), &"garden".into(), &items)
            .unwrap();

        assert_eq!(
            approvers.unapprovable_items(&items),
            vec![(OfferItemKey::new("credits"), ApprovalSide::Giver)]
        );
    }

    #[test]
    fn membership_changes_apply_to_the_next_resolution() {
        let directory = directory();
        let resolve = |directory: &InMemoryDirectory| {
            ApproversResolver::new(directory, directory, ImplicitGiver::GroupMembers)
                .resolve(&"offer".into(), &"garden".into(), &items())
                .unwrap()
        };
        assert!(resolve(&directory).can_give(&"ben".into(), &"credits".into()));

        directory.remove_membership("ben", "garden");
        assert!(!resolve(&directory).can_give(&"ben".into(), &"credits".into()));
    }
}
