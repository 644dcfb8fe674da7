//! Interfaces of the collaborators the engine consumes: resources, group
//! memberships, users and message delivery.
use crate::error::LookupError;
use crate::item::OfferItemKind;
use crate::types::{GroupKey, OfferItemKey, OfferKey, ResourceKey, Target, UserKey};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Object,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub key: ResourceKey,
    pub kind: ResourceKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    Owner,
    Viewer,
}

/// A relation between a resource and a party holding it or able to see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub resource_key: ResourceKey,
    pub target: Target,
    pub kind: ClaimKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLookupResult {
    pub resources: Vec<Resource>,
    pub claims: Vec<Claim>,
}

impl ResourceLookupResult {
    pub fn get_resource(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.key == key)
    }

    pub fn has_claim(&self, key: &ResourceKey, target: &Target, kind: ClaimKind) -> bool {
        self.claims
            .iter()
            .any(|c| &c.resource_key == key && &c.target == target && c.kind == kind)
    }

    pub fn is_shared_with_group(&self, key: &ResourceKey, group: &GroupKey) -> bool {
        self.has_claim(key, &Target::Group(group.clone()), ClaimKind::Viewer)
    }

    pub fn owners(&self, key: &ResourceKey) -> Vec<&Target> {
        self.claims
            .iter()
            .filter(|c| &c.resource_key == key && c.kind == ClaimKind::Owner)
            .map(|c| &c.target)
            .collect()
    }
}

pub trait ResourceLookup: Send + Sync {
    fn get_by_keys(&self, keys: &BTreeSet<ResourceKey>) -> Result<ResourceLookupResult, LookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub user_key: UserKey,
    pub group_key: GroupKey,
    pub user_confirmed: bool,
    pub group_confirmed: bool,
}

impl Membership {
    /// Only memberships confirmed by both the user and the group are approved.
    pub fn is_approved(&self) -> bool {
        self.user_confirmed && self.group_confirmed
    }
}

pub trait MembershipLookup: Send + Sync {
    fn get_memberships(&self, group: &GroupKey) -> Result<Vec<Membership>, LookupError>;

    fn get_user_memberships(&self, user: &UserKey) -> Result<Vec<Membership>, LookupError>;

    fn get_approved_members(&self, group: &GroupKey) -> Result<BTreeSet<UserKey>, LookupError> {
        Ok(self
            .get_memberships(group)?
            .into_iter()
            .filter(Membership::is_approved)
            .map(|m| m.user_key)
            .collect())
    }

    fn get_approved_groups(&self, user: &UserKey) -> Result<BTreeSet<GroupKey>, LookupError> {
        Ok(self
            .get_user_memberships(user)?
            .into_iter()
            .filter(Membership::is_approved)
            .map(|m| m.group_key)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub key: UserKey,
    pub username: String,
}

pub trait UserLookup: Send + Sync {
    fn get_by_keys(&self, keys: &BTreeSet<UserKey>) -> Result<Vec<User>, LookupError>;
}

/// One line of an offer summary, as shown to participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSummary {
    pub item_key: OfferItemKey,
    pub kind: OfferItemKind,
    pub to: Target,
    pub resource_key: Option<ResourceKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    OfferSubmitted {
        offer_key: OfferKey,
        group_key: GroupKey,
        author: UserKey,
        message: String,
        participants: Vec<User>,
        items: Vec<ItemSummary>,
    },
    OfferAccepted { offer_key: OfferKey },
    OfferDeclined { offer_key: OfferKey, by: UserKey },
    OfferCanceled { offer_key: OfferKey, by: UserKey },
    OfferExpired { offer_key: OfferKey },
    OfferCompleted { offer_key: OfferKey },
}

impl MessageBody {
    pub fn offer_key(&self) -> &OfferKey {
        match self {
            MessageBody::OfferSubmitted { offer_key, .. }
            | MessageBody::OfferAccepted { offer_key }
            | MessageBody::OfferDeclined { offer_key, .. }
            | MessageBody::OfferCanceled { offer_key, .. }
            | MessageBody::OfferExpired { offer_key }
            | MessageBody::OfferCompleted { offer_key } => offer_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    pub recipients: BTreeSet<UserKey>,
    pub body: MessageBody,
}

pub trait Notifier: Send + Sync {
    fn send_conversation_message(&self, message: ConversationMessage) -> Result<(), LookupError>;
}
