//! In-process implementations of the collaborator interfaces, for embedding
//! the engine without external services and for tests.
use crate::error::LookupError;
use crate::lookup::{
    Claim, ClaimKind, ConversationMessage, Membership, MembershipLookup, Notifier, Resource,
    ResourceKind, ResourceLookup, ResourceLookupResult, User, UserLookup,
};
use crate::types::{GroupKey, ResourceKey, Target, UserKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError, RwLock};

#[derive(Default)]
struct Directory {
    resources: BTreeMap<ResourceKey, Resource>,
    claims: Vec<Claim>,
    memberships: Vec<Membership>,
    users: BTreeMap<UserKey, User>,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    inner: RwLock<Directory>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Directory> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Directory> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, key: impl Into<UserKey>, username: impl Into<String>) {
        let key = key.into();
        self.write().users.insert(
            key.clone(),
            User {
                key,
                username: username.into(),
            },
        );
    }

    pub fn add_resource(&self, key: impl Into<ResourceKey>, kind: ResourceKind, name: impl Into<String>) {
        let key = key.into();
        self.write().resources.insert(
            key.clone(),
            Resource {
                key,
                kind,
                name: name.into(),
            },
        );
    }

    pub fn add_claim(&self, resource: impl Into<ResourceKey>, target: Target, kind: ClaimKind) {
        self.write().claims.push(Claim {
            resource_key: resource.into(),
            target,
            kind,
        });
    }

    /// Record a membership. Replaces any existing one for the same pair.
    pub fn add_membership(
        &self,
        user: impl Into<UserKey>,
        group: impl Into<GroupKey>,
        user_confirmed: bool,
        group_confirmed: bool,
    ) {
        let membership = Membership {
            user_key: user.into(),
            group_key: group.into(),
            user_confirmed,
            group_confirmed,
        };
        let mut directory = self.write();
        directory
            .memberships
            .retain(|m| !(m.user_key == membership.user_key && m.group_key == membership.group_key));
        directory.memberships.push(membership);
    }

    pub fn add_approved_member(&self, user: impl Into<UserKey>, group: impl Into<GroupKey>) {
        self.add_membership(user, group, true, true);
    }

    pub fn remove_membership(&self, user: impl Into<UserKey>, group: impl Into<GroupKey>) {
        let (user, group) = (user.into(), group.into());
        self.write()
            .memberships
            .retain(|m| !(m.user_key == user && m.group_key == group));
    }
}

impl ResourceLookup for InMemoryDirectory {
    fn get_by_keys(&self, keys: &BTreeSet<ResourceKey>) -> Result<ResourceLookupResult, LookupError> {
        let directory = self.read();

        Ok(ResourceLookupResult {
            resources: keys
                .iter()
                .filter_map(|key| directory.resources.get(key).cloned())
                .collect(),
            claims: directory
                .claims
                .iter()
                .filter(|claim| keys.contains(&claim.resource_key))
                .cloned()
                .collect(),
        })
    }
}

impl MembershipLookup for InMemoryDirectory {
    fn get_memberships(&self, group: &GroupKey) -> Result<Vec<Membership>, LookupError> {
        Ok(self
            .read()
            .memberships
            .iter()
            .filter(|m| &m.group_key == group)
            .cloned()
            .collect())
    }

    fn get_user_memberships(&self, user: &UserKey) -> Result<Vec<Membership>, LookupError> {
        Ok(self
            .read()
            .memberships
            .iter()
            .filter(|m| &m.user_key == user)
            .cloned()
            .collect())
    }
}

impl UserLookup for InMemoryDirectory {
    fn get_by_keys(&self, keys: &BTreeSet<UserKey>) -> Result<Vec<User>, LookupError> {
        let directory = self.read();

        Ok(keys
            .iter()
            .filter_map(|key| directory.users.get(key).cloned())
            .collect())
    }
}

/// Keeps every message it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<ConversationMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send_conversation_message(&self, message: ConversationMessage) -> Result<(), LookupError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_members_need_both_confirmations() {
        let directory = InMemoryDirectory::new();
        directory.add_approved_member("ann", "garden");
        directory.add_membership("ben", "garden", false, true);
        directory.add_membership("cat", "garden", true, false);

        assert_eq!(
            directory.get_approved_members(&"garden".into()).unwrap(),
            BTreeSet::from([UserKey::new("ann")])
        );
        assert_eq!(directory.get_memberships(&"garden".into()).unwrap().len(), 3);

        directory.add_approved_member("cat", "garden");
        assert_eq!(directory.get_approved_members(&"garden".into()).unwrap().len(), 2);
        assert_eq!(
            directory.get_approved_groups(&"cat".into()).unwrap(),
            BTreeSet::from([GroupKey::new("garden")])
        );
    }

    #[test]
    fn resource_lookup_returns_only_requested_keys() {
        let directory = InMemoryDirectory::new();
        directory.add_resource("saw", ResourceKind::Object, "Saw");
        directory.add_resource("lesson", ResourceKind::Service, "Guitar lesson");
        directory.add_claim("saw", Target::group("garden"), ClaimKind::Viewer);
        directory.add_claim("lesson", Target::group("garden"), ClaimKind::Viewer);

        let result =
            ResourceLookup::get_by_keys(&directory, &BTreeSet::from([ResourceKey::new("saw")]))
                .unwrap();
        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.claims.len(), 1);
        assert!(result.get_resource(&"lesson".into()).is_none());
    }
}
