//! The event-sourced offer aggregate.
//!
//! All state is the left fold of the offer's [`RecordedEvent`]s. Commands
//! validate against the folded state, then raise events which are applied
//! immediately and buffered until the repository commits them. Commands never
//! check who is calling; authorization belongs to the caller, which resolves
//! [`crate::approvers::OfferApprovers`] before invoking them.
use crate::error::OfferError;
use crate::event::{OfferEvent, RecordedEvent};
use crate::item::{ApprovalSide, OfferItem, OfferItemKind};
use crate::items::OfferItems;
use crate::types::{GroupKey, OfferItemKey, OfferKey, TimeStamp, UserKey};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum OfferStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Declined,
    #[n(3)]
    Canceled,
    #[n(4)]
    Expired,
    #[n(5)]
    Completed,
}

impl OfferStatus {
    pub fn can_transition_to(self, next: OfferStatus) -> bool {
        use OfferStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Declined)
                | (Pending, Expired)
                | (Pending, Canceled)
                | (Accepted, Completed)
        )
    }
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OfferStatus::Declined
                | OfferStatus::Canceled
                | OfferStatus::Expired
                | OfferStatus::Completed
        )
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Declined => "declined",
            OfferStatus::Canceled => "canceled",
            OfferStatus::Expired => "expired",
            OfferStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Post-acceptance fulfillment confirmations. Each one belongs to exactly one
/// item kind and one side of the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confirmation {
    ResourceGiven,
    ResourceReceived,
    /// The borrower took the resource.
    ResourceBorrowed,
    /// The lender handed the resource over.
    ResourceLent,
    BorrowerReturnedResource,
    LenderReceivedBackResource,
    ServiceGiven,
    ServiceReceived,
}

impl Confirmation {
    pub fn side(self) -> ApprovalSide {
        match self {
            Confirmation::ResourceGiven
            | Confirmation::ResourceLent
            | Confirmation::LenderReceivedBackResource
            | Confirmation::ServiceGiven => ApprovalSide::Giver,
            Confirmation::ResourceReceived
            | Confirmation::ResourceBorrowed
            | Confirmation::BorrowerReturnedResource
            | Confirmation::ServiceReceived => ApprovalSide::Receiver,
        }
    }

    pub fn item_kind(self) -> OfferItemKind {
        match self {
            Confirmation::ResourceGiven | Confirmation::ResourceReceived => {
                OfferItemKind::ResourceTransfer
            }
            Confirmation::ResourceBorrowed
            | Confirmation::ResourceLent
            | Confirmation::BorrowerReturnedResource
            | Confirmation::LenderReceivedBackResource => OfferItemKind::BorrowResource,
            Confirmation::ServiceGiven | Confirmation::ServiceReceived => {
                OfferItemKind::ProvideService
            }
        }
    }

    fn is_confirmed(self, item: &OfferItem) -> bool {
        match (self, item) {
            (Confirmation::ResourceGiven, OfferItem::ResourceTransfer(i)) => i.item_given,
            (Confirmation::ResourceReceived, OfferItem::ResourceTransfer(i)) => i.item_received,
            (Confirmation::ResourceBorrowed, OfferItem::BorrowResource(i)) => i.item_taken,
            (Confirmation::ResourceLent, OfferItem::BorrowResource(i)) => i.item_given,
            (Confirmation::BorrowerReturnedResource, OfferItem::BorrowResource(i)) => {
                i.item_returned_back
            }
            (Confirmation::LenderReceivedBackResource, OfferItem::BorrowResource(i)) => {
                i.item_received_back
            }
            (Confirmation::ServiceGiven, OfferItem::ProvideService(i)) => {
                i.service_given_confirmation
            }
            (Confirmation::ServiceReceived, OfferItem::ProvideService(i)) => {
                i.service_received_confirmation
            }
            _ => false,
        }
    }

    fn into_event(self, by: UserKey, item_key: OfferItemKey) -> OfferEvent {
        match self {
            Confirmation::ResourceGiven => OfferEvent::ResourceGiven { by, item_key },
            Confirmation::ResourceReceived => OfferEvent::ResourceReceived { by, item_key },
            Confirmation::ResourceBorrowed => OfferEvent::ResourceBorrowed { by, item_key },
            Confirmation::ResourceLent => OfferEvent::ResourceLent { by, item_key },
            Confirmation::BorrowerReturnedResource => {
                OfferEvent::BorrowerReturnedResource { by, item_key }
            }
            Confirmation::LenderReceivedBackResource => {
                OfferEvent::LenderReceivedBackResource { by, item_key }
            }
            Confirmation::ServiceGiven => OfferEvent::ServiceGiven { by, item_key },
            Confirmation::ServiceReceived => OfferEvent::ServiceReceived { by, item_key },
        }
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Fields fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferDetails {
    pub group_key: GroupKey,
    pub created_by: UserKey,
    pub message: String,
    pub created_at: TimeStamp<Utc>,
    pub expiration_time: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    key: OfferKey,
    version: u64,
    changes: Vec<RecordedEvent>,
    details: Option<OfferDetails>,
    status: OfferStatus,
    items: OfferItems,
    completed_at: Option<TimeStamp<Utc>>,
    declined_by: Option<UserKey>,
}

impl Offer {
    pub fn new(key: OfferKey) -> Self {
        Self {
            key,
            version: 0,
            changes: vec![],
            details: None,
            status: OfferStatus::Pending,
            items: OfferItems::default(),
            completed_at: None,
            declined_by: None,
        }
    }

    /// Replay a stream into a fresh aggregate. An empty stream yields version 0.
    pub fn from_events<'a>(
        key: OfferKey,
        events: impl IntoIterator<Item = &'a RecordedEvent>,
    ) -> Self {
        let mut offer = Self::new(key);
        for event in events {
            offer.apply(event);
            offer.version += 1;
        }
        offer
    }

    //  Commands

    pub fn submit(
        &mut self,
        created_by: UserKey,
        group_key: GroupKey,
        message: String,
        items: Vec<OfferItem>,
        expiration_time: Option<TimeStamp<Utc>>,
    ) -> Result<(), OfferError> {
        self.assert_new()?;

        if items.is_empty() {
            return Err(OfferError::NoItems);
        }

        let mut seen = HashSet::new();
        let mut owned = Vec::with_capacity(items.len());
        for mut item in items {
            if !seen.insert(item.key().clone()) {
                return Err(OfferError::DuplicateItem(item.key().clone()));
            }
            item.base_mut().offer_key = self.key.clone();
            owned.push(item);
        }

        self.raise(OfferEvent::OfferCreated {
            group_key,
            created_by,
            message,
            items: owned,
            expiration_time,
        });

        Ok(())
    }

    pub fn accept_as_giver(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.accept(by, item_key, ApprovalSide::Giver)
    }

    pub fn accept_as_receiver(
        &mut self,
        by: &UserKey,
        item_key: &OfferItemKey,
    ) -> Result<(), OfferError> {
        self.accept(by, item_key, ApprovalSide::Receiver)
    }

    /// Record one side's acceptance of an item. Accepting an already accepted
    /// side is an error: authorization should have stopped the second call.
    pub fn accept(
        &mut self,
        by: &UserKey,
        item_key: &OfferItemKey,
        side: ApprovalSide,
    ) -> Result<(), OfferError> {
        self.assert_not_new()?;
        self.assert_status(OfferStatus::Pending)?;

        let item = self.assert_item_exists(item_key)?;
        if item.base().is_accepted_by(side) {
            return Err(OfferError::AlreadyAccepted {
                item: item_key.clone(),
                side,
            });
        }

        let by = by.clone();
        let item_key = item_key.clone();
        self.raise(match side {
            ApprovalSide::Giver => OfferEvent::OfferItemGiverAccepted { by, item_key },
            ApprovalSide::Receiver => OfferEvent::OfferItemReceiverAccepted { by, item_key },
        });

        self.check_offer_accepted();
        self.check_offer_completed();

        Ok(())
    }

    pub fn decline(&mut self, by: &UserKey) -> Result<(), OfferError> {
        self.assert_not_new()?;
        self.assert_transition(OfferStatus::Declined)?;

        self.raise(OfferEvent::OfferDeclined { by: by.clone() });

        Ok(())
    }

    pub fn cancel(&mut self, by: &UserKey) -> Result<(), OfferError> {
        self.assert_not_new()?;
        self.assert_transition(OfferStatus::Canceled)?;

        self.raise(OfferEvent::OfferCanceled { by: by.clone() });

        Ok(())
    }

    /// Expire the offer if its expiration time is at or before `now`.
    pub fn expire(&mut self, now: &TimeStamp<Utc>) -> Result<(), OfferError> {
        self.assert_not_new()?;
        self.assert_transition(OfferStatus::Expired)?;

        match self.expiration_time() {
            Some(expires_at) if now >= expires_at => {
                self.raise(OfferEvent::OfferExpired);
                Ok(())
            }
            _ => Err(OfferError::NotExpired),
        }
    }

    /// Record a fulfillment confirmation. Repeating one that is already true
    /// is a no-op, so flaky client retries cannot corrupt completion.
    pub fn confirm(
        &mut self,
        by: &UserKey,
        item_key: &OfferItemKey,
        confirmation: Confirmation,
    ) -> Result<(), OfferError> {
        self.assert_not_new()?;

        let item = self.assert_item_exists(item_key)?;
        if item.kind() != confirmation.item_kind() {
            return Err(OfferError::WrongItemKind {
                item: item_key.clone(),
                expected: confirmation.item_kind(),
            });
        }
        if confirmation.is_confirmed(item) {
            return Ok(());
        }
        if let OfferItem::BorrowResource(borrow) = item {
            match confirmation {
                Confirmation::BorrowerReturnedResource if !borrow.item_taken => {
                    return Err(OfferError::NotYetBorrowed(item_key.clone()));
                }
                Confirmation::LenderReceivedBackResource if !borrow.item_given => {
                    return Err(OfferError::NotYetLent(item_key.clone()));
                }
                _ => {}
            }
        }

        self.assert_status(OfferStatus::Accepted)?;

        self.raise(confirmation.into_event(by.clone(), item_key.clone()));
        self.check_offer_completed();

        Ok(())
    }

    pub fn notify_resource_given(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::ResourceGiven)
    }
    pub fn notify_resource_received(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::ResourceReceived)
    }
    pub fn notify_resource_borrowed(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::ResourceBorrowed)
    }
    pub fn notify_resource_lent(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::ResourceLent)
    }
    pub fn notify_borrower_returned_resource(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::BorrowerReturnedResource)
    }
    pub fn notify_lender_received_back_resource(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::LenderReceivedBackResource)
    }
    pub fn notify_service_given(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::ServiceGiven)
    }
    pub fn notify_service_received(&mut self, by: &UserKey, item_key: &OfferItemKey) -> Result<(), OfferError> {
        self.confirm(by, item_key, Confirmation::ServiceReceived)
    }

    //  Queries

    pub fn key(&self) -> &OfferKey {
        &self.key
    }
    /// Number of committed events folded into this aggregate.
    pub fn version(&self) -> u64 {
        self.version
    }
    pub fn is_new(&self) -> bool {
        self.details.is_none()
    }
    pub fn details(&self) -> Option<&OfferDetails> {
        self.details.as_ref()
    }
    pub fn group_key(&self) -> Option<&GroupKey> {
        self.details.as_ref().map(|d| &d.group_key)
    }
    pub fn created_by(&self) -> Option<&UserKey> {
        self.details.as_ref().map(|d| &d.created_by)
    }
    pub fn expiration_time(&self) -> Option<&TimeStamp<Utc>> {
        self.details.as_ref().and_then(|d| d.expiration_time.as_ref())
    }
    pub fn status(&self) -> OfferStatus {
        self.status
    }
    pub fn items(&self) -> &OfferItems {
        &self.items
    }
    pub fn completed_at(&self) -> Option<&TimeStamp<Utc>> {
        self.completed_at.as_ref()
    }
    pub fn declined_by(&self) -> Option<&UserKey> {
        self.declined_by.as_ref()
    }
    /// Events raised since load that the repository has not yet committed.
    pub fn changes(&self) -> &[RecordedEvent] {
        &self.changes
    }

    pub fn mark_as_committed(&mut self) {
        self.version += self.changes.len() as u64;
        self.changes.clear();
    }

    //  Infra

    fn check_offer_accepted(&mut self) {
        if self.status == OfferStatus::Pending && self.items.all_parties_accepted() {
            self.raise(OfferEvent::OfferAccepted);
        }
    }

    fn check_offer_completed(&mut self) {
        if self.status == OfferStatus::Accepted
            && self.items.all_parties_accepted()
            && self.items.all_user_actions_completed()
        {
            self.raise(OfferEvent::OfferCompleted);
        }
    }

    fn assert_new(&self) -> Result<(), OfferError> {
        match self.is_new() {
            true => Ok(()),
            false => Err(OfferError::AlreadySubmitted),
        }
    }

    fn assert_not_new(&self) -> Result<(), OfferError> {
        match self.is_new() {
            true => Err(OfferError::NotSubmitted),
            false => Ok(()),
        }
    }

    fn assert_status(&self, expected: OfferStatus) -> Result<(), OfferError> {
        if self.status != expected {
            return Err(OfferError::InvalidStatus {
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    fn assert_transition(&self, to: OfferStatus) -> Result<(), OfferError> {
        if !self.status.can_transition_to(to) {
            return Err(OfferError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn assert_item_exists(&self, item_key: &OfferItemKey) -> Result<&OfferItem, OfferError> {
        self.items
            .get(item_key)
            .ok_or_else(|| OfferError::ItemNotFound(item_key.clone()))
    }

    fn raise(&mut self, event: OfferEvent) {
        let sequence = self.version + self.changes.len() as u64 + 1;
        let recorded = RecordedEvent::new(self.key.clone(), sequence, TimeStamp::new(), event);
        self.apply(&recorded);
        self.changes.push(recorded);
    }

    fn apply(&mut self, recorded: &RecordedEvent) {
        let at = recorded.recorded_at.clone();

        match &recorded.event {
            OfferEvent::OfferCreated {
                group_key,
                created_by,
                message,
                items,
                expiration_time,
            } => {
                self.details = Some(OfferDetails {
                    group_key: group_key.clone(),
                    created_by: created_by.clone(),
                    message: message.clone(),
                    created_at: at,
                    expiration_time: expiration_time.clone(),
                });
                self.status = OfferStatus::Pending;
                self.items = items.iter().cloned().collect();
            }
            OfferEvent::OfferItemGiverAccepted { item_key, .. } => {
                if let Some(item) = self.items.get_mut(item_key) {
                    item.mark_accepted(ApprovalSide::Giver, at);
                }
            }
            OfferEvent::OfferItemReceiverAccepted { item_key, .. } => {
                if let Some(item) = self.items.get_mut(item_key) {
                    item.mark_accepted(ApprovalSide::Receiver, at);
                }
            }
            OfferEvent::OfferAccepted => self.status = OfferStatus::Accepted,
            OfferEvent::OfferDeclined { by } => {
                self.status = OfferStatus::Declined;
                self.declined_by = Some(by.clone());
            }
            OfferEvent::OfferCanceled { .. } => self.status = OfferStatus::Canceled,
            OfferEvent::OfferExpired => self.status = OfferStatus::Expired,
            OfferEvent::OfferCompleted => {
                self.status = OfferStatus::Completed;
                self.completed_at = Some(at);
            }
            OfferEvent::ResourceGiven { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::ResourceTransfer(i) = item {
                        i.item_given = true;
                    }
                });
            }
            OfferEvent::ResourceReceived { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::ResourceTransfer(i) = item {
                        i.item_received = true;
                    }
                });
            }
            OfferEvent::ResourceBorrowed { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::BorrowResource(i) = item {
                        i.item_taken = true;
                    }
                });
            }
            OfferEvent::ResourceLent { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::BorrowResource(i) = item {
                        i.item_given = true;
                    }
                });
            }
            OfferEvent::BorrowerReturnedResource { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::BorrowResource(i) = item {
                        i.item_returned_back = true;
                    }
                });
            }
            OfferEvent::LenderReceivedBackResource { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::BorrowResource(i) = item {
                        i.item_received_back = true;
                    }
                });
            }
            OfferEvent::ServiceGiven { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::ProvideService(i) = item {
                        i.service_given_confirmation = true;
                    }
                });
            }
            OfferEvent::ServiceReceived { item_key, .. } => {
                self.update_item(item_key, at, |item| {
                    if let OfferItem::ProvideService(i) = item {
                        i.service_received_confirmation = true;
                    }
                });
            }
        }
    }

    fn update_item(
        &mut self,
        item_key: &OfferItemKey,
        at: TimeStamp<Utc>,
        update: impl FnOnce(&mut OfferItem),
    ) {
        if let Some(item) = self.items.get_mut(item_key) {
            update(item);
            item.base_mut().updated_at = at;
        }
    }
}
