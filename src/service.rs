//! Service layer API for offer negotiation
//!
//! The service is the only way to create offers. Every write loads the
//! aggregate, authorizes the caller against freshly resolved approvers, runs
//! the aggregate command and saves, retrying from the load when another writer
//! got there first.
use crate::approvers::{ApproversResolver, OfferApprovers};
use crate::config::NegotiationConfig;
use crate::directory::{InMemoryDirectory, RecordingNotifier};
use crate::error::{EventStoreError, NegotiationError, OfferError};
use crate::event::OfferEvent;
use crate::item::{ApprovalSide, OfferItem};
use crate::items::OfferItems;
use crate::lookup::{
    ConversationMessage, ItemSummary, MembershipLookup, MessageBody, Notifier, ResourceLookup,
    UserLookup,
};
use crate::offer::{Confirmation, Offer, OfferStatus};
use crate::read_model::{HistoryEntry, OfferIndex};
use crate::repository::OfferRepository;
use crate::store::EventStore;
use crate::types::{
    GroupKey, OfferItemKey, OfferKey, ResourceKey, Target, TimeSpan, TimeStamp, UserKey,
};
use crate::validation;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// One leg of a candidate offer, before it has a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferItemInput {
    CreditTransfer {
        from: Target,
        to: Target,
        amount: TimeSpan,
    },
    ResourceTransfer {
        resource_key: ResourceKey,
        to: Target,
    },
    ProvideService {
        resource_key: ResourceKey,
        to: Target,
        duration: TimeSpan,
    },
    BorrowResource {
        resource_key: ResourceKey,
        to: Target,
        duration: TimeSpan,
    },
}

impl OfferItemInput {
    fn into_item(self, key: OfferItemKey, offer_key: OfferKey, at: TimeStamp<Utc>) -> OfferItem {
        match self {
            OfferItemInput::CreditTransfer { from, to, amount } => {
                OfferItem::credit_transfer(key, offer_key, from, to, amount, at)
            }
            OfferItemInput::ResourceTransfer { resource_key, to } => {
                OfferItem::resource_transfer(key, offer_key, resource_key, to, at)
            }
            OfferItemInput::ProvideService {
                resource_key,
                to,
                duration,
            } => OfferItem::provide_service(key, offer_key, resource_key, to, duration, at),
            OfferItemInput::BorrowResource {
                resource_key,
                to,
                duration,
            } => OfferItem::borrow_resource(key, offer_key, resource_key, to, duration, at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOffer {
    pub group_key: GroupKey,
    pub message: String,
    pub expiration_time: Option<TimeStamp<Utc>>,
    pub items: Vec<OfferItemInput>,
}

impl CandidateOffer {
    pub fn new(group_key: impl Into<GroupKey>) -> Self {
        Self {
            group_key: group_key.into(),
            message: String::new(),
            expiration_time: None,
            items: vec![],
        }
    }
    pub fn set_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
    pub fn set_expiration_time(mut self, expiration_time: TimeStamp<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }
    pub fn add_item(mut self, item: OfferItemInput) -> Self {
        self.items.push(item);
        self
    }
    pub fn transfer_credits(self, from: Target, to: Target, amount: TimeSpan) -> Self {
        self.add_item(OfferItemInput::CreditTransfer { from, to, amount })
    }
    pub fn transfer_resource(self, resource_key: impl Into<ResourceKey>, to: Target) -> Self {
        self.add_item(OfferItemInput::ResourceTransfer {
            resource_key: resource_key.into(),
            to,
        })
    }
    pub fn provide_service(
        self,
        resource_key: impl Into<ResourceKey>,
        to: Target,
        duration: TimeSpan,
    ) -> Self {
        self.add_item(OfferItemInput::ProvideService {
            resource_key: resource_key.into(),
            to,
            duration,
        })
    }
    pub fn borrow_resource(
        self,
        resource_key: impl Into<ResourceKey>,
        to: Target,
        duration: TimeSpan,
    ) -> Self {
        self.add_item(OfferItemInput::BorrowResource {
            resource_key: resource_key.into(),
            to,
            duration,
        })
    }
}

/// The external systems the service depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub resources: Arc<dyn ResourceLookup>,
    pub memberships: Arc<dyn MembershipLookup>,
    pub users: Arc<dyn UserLookup>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Wire every lookup to one in-memory directory.
    pub fn in_memory(directory: Arc<InMemoryDirectory>, notifier: Arc<RecordingNotifier>) -> Self {
        Self {
            resources: directory.clone(),
            memberships: directory.clone(),
            users: directory,
            notifier,
        }
    }
}

pub struct NegotiationService {
    repository: OfferRepository,
    collaborators: Collaborators,
    config: NegotiationConfig,
    index: RwLock<OfferIndex>,
}

impl NegotiationService {
    /// Build the service and project every stored offer into the read side.
    pub fn new(
        store: Arc<dyn EventStore>,
        collaborators: Collaborators,
        config: NegotiationConfig,
    ) -> Result<Self, NegotiationError> {
        let repository = OfferRepository::new(store);

        let mut index = OfferIndex::new();
        for key in repository.offer_keys()? {
            index.project(&repository.load(&key)?);
        }
        debug!(offers = index.len(), "rebuilt offer index");

        Ok(Self {
            repository,
            collaborators,
            config,
            index: RwLock::new(index),
        })
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        self.repository.store()
    }

    //  Commands

    /// Validate a candidate offer, persist it as Pending and tell the approvers.
    pub fn submit_offer(
        &self,
        created_by: &UserKey,
        candidate: CandidateOffer,
    ) -> Result<Offer, NegotiationError> {
        let offer_key = OfferKey::generate()?;
        let now = TimeStamp::new();
        let group_key = candidate.group_key;

        let mut items = Vec::with_capacity(candidate.items.len());
        for input in candidate.items {
            items.push(input.into_item(OfferItemKey::generate()?, offer_key.clone(), now.clone()));
        }

        debug!(offer = %offer_key, "making sure the offer has items");
        validation::assert_offer_is_not_empty(&items)?;
        validation::assert_item_keys_are_unique(&items)?;

        debug!(offer = %offer_key, "making sure resources are transferred only once");
        validation::assert_resources_are_transferred_only_once(&items)?;

        debug!(offer = %offer_key, "making sure time values are not negative");
        validation::assert_time_values_are_not_negative(&items)?;

        debug!(offer = %offer_key, "retrieving resources in offer");
        let offer_items: OfferItems = items.iter().cloned().collect();
        let resources = self
            .collaborators
            .resources
            .get_by_keys(&offer_items.get_resource_keys())?;

        debug!(offer = %offer_key, group = %group_key, "checking resources are viewable by the group");
        validation::assert_resources_are_viewable_by_group(&resources, &group_key, &items)?;

        debug!(offer = %offer_key, "checking no resource goes to its current owner");
        validation::assert_resources_are_not_transferred_to_their_owner(&resources, &items)?;

        debug!(offer = %offer_key, "checking resource kinds match item kinds");
        validation::assert_resource_kinds_match_items(&resources, &items)?;

        debug!(offer = %offer_key, "checking credits are not sent to their source");
        validation::assert_credits_are_not_transferred_to_self(&items)?;

        debug!(offer = %offer_key, "checking every item can be approved");
        let approvers = self
            .resolver()
            .resolve(&offer_key, &group_key, &offer_items)?;
        validation::assert_every_side_has_an_approver(&approvers, &items)?;

        let expiration_time = candidate.expiration_time.or_else(|| {
            self.config
                .default_offer_ttl
                .and_then(|ttl| now.checked_add(ttl))
        });

        let mut offer = Offer::new(offer_key);
        offer.submit(
            created_by.clone(),
            group_key,
            candidate.message,
            items,
            expiration_time,
        )?;
        self.repository.save(&mut offer)?;
        self.index_mut().project(&offer);

        info!(offer = %offer.key(), user = %created_by, items = offer.items().len(), "offer submitted");
        self.notify_submitted(&offer, &approvers);

        Ok(offer)
    }

    pub fn accept_offer_item(
        &self,
        by: &UserKey,
        item_key: &OfferItemKey,
        side: ApprovalSide,
    ) -> Result<Offer, NegotiationError> {
        let offer_key = self.offer_key_for_item(item_key)?;

        self.mutate(&offer_key, |offer, approvers| {
            if !approvers.can_act(by, item_key, side) {
                return Err(NegotiationError::unauthorized(
                    by,
                    format!("accept item {item_key} as {side}"),
                ));
            }
            offer.accept(by, item_key, side)?;
            Ok(())
        })
    }

    /// Accept every still open item side the user is an approver for.
    pub fn accept_offer(&self, by: &UserKey, offer_key: &OfferKey) -> Result<Offer, NegotiationError> {
        self.mutate(offer_key, |offer, approvers| {
            if !approvers.is_user_an_approver(by) {
                return Err(NegotiationError::unauthorized(by, format!("accept offer {offer_key}")));
            }
            if offer.status() != OfferStatus::Pending {
                return Err(OfferError::InvalidStatus {
                    expected: OfferStatus::Pending,
                    actual: offer.status(),
                }
                .into());
            }

            let mut open = vec![];
            for item in offer.items() {
                for side in [ApprovalSide::Giver, ApprovalSide::Receiver] {
                    if !item.base().is_accepted_by(side) && approvers.can_act(by, item.key(), side) {
                        open.push((item.key().clone(), side));
                    }
                }
            }
            for (item_key, side) in open {
                offer.accept(by, &item_key, side)?;
            }
            Ok(())
        })
    }

    pub fn decline_offer(&self, by: &UserKey, offer_key: &OfferKey) -> Result<Offer, NegotiationError> {
        self.mutate(offer_key, |offer, approvers| {
            if !approvers.is_user_an_approver(by) {
                return Err(NegotiationError::unauthorized(by, format!("decline offer {offer_key}")));
            }
            offer.decline(by)?;
            Ok(())
        })
    }

    /// Withdraw a pending offer. Only its author may.
    pub fn cancel_offer(&self, by: &UserKey, offer_key: &OfferKey) -> Result<Offer, NegotiationError> {
        self.mutate(offer_key, |offer, _| {
            if offer.created_by() != Some(by) {
                return Err(NegotiationError::unauthorized(by, format!("cancel offer {offer_key}")));
            }
            offer.cancel(by)?;
            Ok(())
        })
    }

    pub fn expire_offer(
        &self,
        offer_key: &OfferKey,
        now: &TimeStamp<Utc>,
    ) -> Result<Offer, NegotiationError> {
        self.mutate(offer_key, |offer, _| Ok(offer.expire(now)?))
    }

    /// Record a fulfillment confirmation on behalf of the confirming side.
    pub fn confirm_item(
        &self,
        by: &UserKey,
        item_key: &OfferItemKey,
        confirmation: Confirmation,
    ) -> Result<Offer, NegotiationError> {
        let offer_key = self.offer_key_for_item(item_key)?;

        self.mutate(&offer_key, |offer, approvers| {
            if !approvers.can_act(by, item_key, confirmation.side()) {
                return Err(NegotiationError::unauthorized(
                    by,
                    format!("confirm {confirmation} on item {item_key}"),
                ));
            }
            offer.confirm(by, item_key, confirmation)?;
            Ok(())
        })
    }

    //  Queries

    pub fn get_offer(&self, offer_key: &OfferKey) -> Result<Offer, NegotiationError> {
        let offer = self.repository.load(offer_key)?;
        if offer.version() == 0 {
            return Err(NegotiationError::NotFound(offer_key.clone()));
        }
        Ok(offer)
    }

    pub fn get_offer_items_for_offer(&self, offer_key: &OfferKey) -> Result<OfferItems, NegotiationError> {
        Ok(self.get_offer(offer_key)?.items().clone())
    }

    pub fn get_offer_item(&self, item_key: &OfferItemKey) -> Result<OfferItem, NegotiationError> {
        let offer = self.get_offer(&self.offer_key_for_item(item_key)?)?;
        offer
            .items()
            .get(item_key)
            .cloned()
            .ok_or_else(|| NegotiationError::ItemNotFound(item_key.clone()))
    }

    pub fn find_approvers_for_offer(&self, offer_key: &OfferKey) -> Result<OfferApprovers, NegotiationError> {
        let offer = self.get_offer(offer_key)?;
        self.resolve_approvers(&mut self.resolver(), &offer)
    }

    pub fn find_approvers_for_offers(
        &self,
        offer_keys: &[OfferKey],
    ) -> Result<Vec<OfferApprovers>, NegotiationError> {
        let mut resolver = self.resolver();
        offer_keys
            .iter()
            .map(|key| {
                let offer = self.get_offer(key)?;
                self.resolve_approvers(&mut resolver, &offer)
            })
            .collect()
    }

    /// Offers the user authored or is named in, plus offers touching any group
    /// the user is an approved member of.
    pub fn get_offers_for_user(&self, user: &UserKey) -> Result<Vec<Offer>, NegotiationError> {
        let groups = self.collaborators.memberships.get_approved_groups(user)?;

        let keys: BTreeSet<OfferKey> = {
            let index = self.index();
            let mut keys = index.offers_for_user(user);
            for group in &groups {
                keys.extend(index.offers_for_group(group));
            }
            keys
        };

        keys.iter().map(|key| self.get_offer(key)).collect()
    }

    /// Settled items of the group's completed offers, optionally narrowed to
    /// those involving any of `users`.
    pub fn get_trading_history(
        &self,
        group: &GroupKey,
        users: Option<&BTreeSet<UserKey>>,
    ) -> Result<Vec<HistoryEntry>, NegotiationError> {
        let keys = self.index().completed_offers(group);

        let mut history = vec![];
        for key in &keys {
            let offer = self.get_offer(key)?;
            history.extend(
                HistoryEntry::from_offer(&offer)
                    .into_iter()
                    .filter(|entry| users.is_none_or(|users| users.iter().any(|u| entry.involves(u)))),
            );
        }
        history.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));

        Ok(history)
    }

    //  Infra

    /// Load, authorize and apply `command`, then save. A version conflict
    /// restarts from the load, with approvers resolved afresh, up to the
    /// configured number of attempts.
    fn mutate<F>(&self, offer_key: &OfferKey, mut command: F) -> Result<Offer, NegotiationError>
    where
        F: FnMut(&mut Offer, &OfferApprovers) -> Result<(), NegotiationError>,
    {
        let attempts = self.config.max_save_attempts;

        for attempt in 1..=attempts {
            let mut offer = self.get_offer(offer_key)?;
            let approvers = self.resolve_approvers(&mut self.resolver(), &offer)?;

            command(&mut offer, &approvers)?;
            let raised: Vec<OfferEvent> = offer.changes().iter().map(|e| e.event.clone()).collect();

            match self.repository.save(&mut offer) {
                Ok(()) => {
                    if !raised.is_empty() {
                        self.index_mut().project(&offer);
                        self.notify_transitions(&offer, &approvers, &raised);
                    }
                    return Ok(offer);
                }
                Err(EventStoreError::Conflict { current, .. }) => {
                    warn!(offer = %offer_key, attempt, current, "offer changed while saving, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(NegotiationError::Conflict {
            offer: offer_key.clone(),
            attempts,
        })
    }

    fn resolver(&self) -> ApproversResolver<'_> {
        ApproversResolver::new(
            self.collaborators.memberships.as_ref(),
            self.collaborators.resources.as_ref(),
            self.config.implicit_giver,
        )
    }

    fn resolve_approvers(
        &self,
        resolver: &mut ApproversResolver<'_>,
        offer: &Offer,
    ) -> Result<OfferApprovers, NegotiationError> {
        let group_key = offer
            .group_key()
            .ok_or_else(|| NegotiationError::NotFound(offer.key().clone()))?;

        Ok(resolver.resolve(offer.key(), group_key, offer.items())?)
    }

    fn offer_key_for_item(&self, item_key: &OfferItemKey) -> Result<OfferKey, NegotiationError> {
        self.index()
            .offer_for_item(item_key)
            .cloned()
            .ok_or_else(|| NegotiationError::ItemNotFound(item_key.clone()))
    }

    fn index(&self) -> RwLockReadGuard<'_, OfferIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_mut(&self) -> RwLockWriteGuard<'_, OfferIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn recipients(offer: &Offer, approvers: &OfferApprovers) -> BTreeSet<UserKey> {
        let mut recipients = approvers.all_user_keys();
        recipients.extend(offer.created_by().cloned());
        recipients
    }

    fn notify_submitted(&self, offer: &Offer, approvers: &OfferApprovers) {
        let Some(details) = offer.details() else {
            return;
        };
        let recipients = Self::recipients(offer, approvers);

        let participants = match self.collaborators.users.get_by_keys(&recipients) {
            Ok(users) => users,
            Err(e) => {
                warn!(offer = %offer.key(), error = %e, "could not look up offer participants");
                vec![]
            }
        };
        let items = offer
            .items()
            .iter()
            .map(|item| ItemSummary {
                item_key: item.key().clone(),
                kind: item.kind(),
                to: item.to().clone(),
                resource_key: item.resource_key().cloned(),
            })
            .collect();

        self.send(
            recipients,
            MessageBody::OfferSubmitted {
                offer_key: offer.key().clone(),
                group_key: details.group_key.clone(),
                author: details.created_by.clone(),
                message: details.message.clone(),
                participants,
                items,
            },
        );
    }

    fn notify_transitions(&self, offer: &Offer, approvers: &OfferApprovers, raised: &[OfferEvent]) {
        let offer_key = offer.key().clone();

        for event in raised {
            let body = match event {
                OfferEvent::OfferAccepted => MessageBody::OfferAccepted {
                    offer_key: offer_key.clone(),
                },
                OfferEvent::OfferDeclined { by } => MessageBody::OfferDeclined {
                    offer_key: offer_key.clone(),
                    by: by.clone(),
                },
                OfferEvent::OfferCanceled { by } => MessageBody::OfferCanceled {
                    offer_key: offer_key.clone(),
                    by: by.clone(),
                },
                OfferEvent::OfferExpired => MessageBody::OfferExpired {
                    offer_key: offer_key.clone(),
                },
                OfferEvent::OfferCompleted => {
                    info!(offer = %offer_key, "offer completed");
                    MessageBody::OfferCompleted {
                        offer_key: offer_key.clone(),
                    }
                }
                _ => continue,
            };
            self.send(Self::recipients(offer, approvers), body);
        }
    }

    fn send(&self, recipients: BTreeSet<UserKey>, body: MessageBody) {
        let offer_key = body.offer_key().clone();
        let message = ConversationMessage { recipients, body };

        if let Err(e) = self.collaborators.notifier.send_conversation_message(message) {
            error!(offer = %offer_key, error = %e, "failed to send offer notification");
        }
    }
}
