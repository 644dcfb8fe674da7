//! Offer items: the four kinds of exchange leg an offer is made of
use crate::types::{OfferItemKey, OfferKey, ResourceKey, Target, TimeSpan, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum OfferItemKind {
    #[n(0)]
    CreditTransfer,
    #[n(1)]
    ResourceTransfer,
    #[n(2)]
    ProvideService,
    #[n(3)]
    BorrowResource,
}

impl fmt::Display for OfferItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OfferItemKind::CreditTransfer => "transfer_credits",
            OfferItemKind::ResourceTransfer => "transfer_resource",
            OfferItemKind::ProvideService => "provide_service",
            OfferItemKind::BorrowResource => "borrow_resource",
        };
        f.write_str(name)
    }
}

/// The two sides of every item. Each side accepts independently and each side
/// confirms its own half of the fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalSide {
    Giver,
    Receiver,
}

impl fmt::Display for ApprovalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalSide::Giver => f.write_str("giver"),
            ApprovalSide::Receiver => f.write_str("receiver"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OfferItemBase {
    #[n(0)]
    pub key: OfferItemKey,
    #[n(1)]
    pub offer_key: OfferKey,
    #[n(2)]
    pub to: Target,
    #[n(3)]
    pub giver_accepted: bool,
    #[n(4)]
    pub receiver_accepted: bool,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub updated_at: TimeStamp<Utc>,
}

impl OfferItemBase {
    pub fn new(key: OfferItemKey, offer_key: OfferKey, to: Target, at: TimeStamp<Utc>) -> Self {
        Self {
            key,
            offer_key,
            to,
            giver_accepted: false,
            receiver_accepted: false,
            created_at: at.clone(),
            updated_at: at,
        }
    }
    pub fn is_accepted(&self) -> bool {
        self.giver_accepted && self.receiver_accepted
    }
    pub fn is_accepted_by(&self, side: ApprovalSide) -> bool {
        match side {
            ApprovalSide::Giver => self.giver_accepted,
            ApprovalSide::Receiver => self.receiver_accepted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CreditTransferItem {
    #[n(0)]
    pub base: OfferItemBase,
    #[n(1)]
    pub from: Target,
    #[n(2)]
    pub amount: TimeSpan,
    // settles the moment both sides accept
    #[n(3)]
    pub credits_transferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ResourceTransferItem {
    #[n(0)]
    pub base: OfferItemBase,
    #[n(1)]
    pub resource_key: ResourceKey,
    #[n(2)]
    pub item_given: bool,
    #[n(3)]
    pub item_received: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ProvideServiceItem {
    #[n(0)]
    pub base: OfferItemBase,
    #[n(1)]
    pub resource_key: ResourceKey,
    #[n(2)]
    pub duration: TimeSpan,
    #[n(3)]
    pub service_given_confirmation: bool,
    #[n(4)]
    pub service_received_confirmation: bool,
}

/// A resource lent to the `to` party and returned afterwards. The borrower
/// confirms taking and returning it, the lender confirms handing it over and
/// getting it back.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BorrowResourceItem {
    #[n(0)]
    pub base: OfferItemBase,
    #[n(1)]
    pub resource_key: ResourceKey,
    #[n(2)]
    pub duration: TimeSpan,
    #[n(3)]
    pub item_taken: bool,
    #[n(4)]
    pub item_given: bool,
    #[n(5)]
    pub item_returned_back: bool,
    #[n(6)]
    pub item_received_back: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum OfferItem {
    #[n(0)]
    CreditTransfer(#[n(0)] CreditTransferItem),
    #[n(1)]
    ResourceTransfer(#[n(0)] ResourceTransferItem),
    #[n(2)]
    ProvideService(#[n(0)] ProvideServiceItem),
    #[n(3)]
    BorrowResource(#[n(0)] BorrowResourceItem),
}

impl OfferItem {
    pub fn credit_transfer(
        key: OfferItemKey,
        offer_key: OfferKey,
        from: Target,
        to: Target,
        amount: TimeSpan,
        at: TimeStamp<Utc>,
    ) -> Self {
        OfferItem::CreditTransfer(CreditTransferItem {
            base: OfferItemBase::new(key, offer_key, to, at),
            from,
            amount,
            credits_transferred: false,
        })
    }
    pub fn resource_transfer(
        key: OfferItemKey,
        offer_key: OfferKey,
        resource_key: ResourceKey,
        to: Target,
        at: TimeStamp<Utc>,
    ) -> Self {
        OfferItem::ResourceTransfer(ResourceTransferItem {
            base: OfferItemBase::new(key, offer_key, to, at),
            resource_key,
            item_given: false,
            item_received: false,
        })
    }
    pub fn provide_service(
        key: OfferItemKey,
        offer_key: OfferKey,
        resource_key: ResourceKey,
        to: Target,
        duration: TimeSpan,
        at: TimeStamp<Utc>,
    ) -> Self {
        OfferItem::ProvideService(ProvideServiceItem {
            base: OfferItemBase::new(key, offer_key, to, at),
            resource_key,
            duration,
            service_given_confirmation: false,
            service_received_confirmation: false,
        })
    }
    pub fn borrow_resource(
        key: OfferItemKey,
        offer_key: OfferKey,
        resource_key: ResourceKey,
        to: Target,
        duration: TimeSpan,
        at: TimeStamp<Utc>,
    ) -> Self {
        OfferItem::BorrowResource(BorrowResourceItem {
            base: OfferItemBase::new(key, offer_key, to, at),
            resource_key,
            duration,
            item_taken: false,
            item_given: false,
            item_returned_back: false,
            item_received_back: false,
        })
    }

    pub fn base(&self) -> &OfferItemBase {
        match self {
            OfferItem::CreditTransfer(item) => &item.base,
            OfferItem::ResourceTransfer(item) => &item.base,
            OfferItem::ProvideService(item) => &item.base,
            OfferItem::BorrowResource(item) => &item.base,
        }
    }
    pub fn base_mut(&mut self) -> &mut OfferItemBase {
        match self {
            OfferItem::CreditTransfer(item) => &mut item.base,
            OfferItem::ResourceTransfer(item) => &mut item.base,
            OfferItem::ProvideService(item) => &mut item.base,
            OfferItem::BorrowResource(item) => &mut item.base,
        }
    }
    pub fn key(&self) -> &OfferItemKey {
        &self.base().key
    }
    pub fn offer_key(&self) -> &OfferKey {
        &self.base().offer_key
    }
    pub fn to(&self) -> &Target {
        &self.base().to
    }
    /// The explicit giving party. Only credit transfers name one; for the other
    /// kinds the giver is implied by the offer context.
    pub fn from(&self) -> Option<&Target> {
        match self {
            OfferItem::CreditTransfer(item) => Some(&item.from),
            OfferItem::ResourceTransfer(_)
            | OfferItem::ProvideService(_)
            | OfferItem::BorrowResource(_) => None,
        }
    }
    pub fn kind(&self) -> OfferItemKind {
        match self {
            OfferItem::CreditTransfer(_) => OfferItemKind::CreditTransfer,
            OfferItem::ResourceTransfer(_) => OfferItemKind::ResourceTransfer,
            OfferItem::ProvideService(_) => OfferItemKind::ProvideService,
            OfferItem::BorrowResource(_) => OfferItemKind::BorrowResource,
        }
    }
    pub fn resource_key(&self) -> Option<&ResourceKey> {
        match self {
            OfferItem::CreditTransfer(_) => None,
            OfferItem::ResourceTransfer(item) => Some(&item.resource_key),
            OfferItem::ProvideService(item) => Some(&item.resource_key),
            OfferItem::BorrowResource(item) => Some(&item.resource_key),
        }
    }
    /// Credit amount or service/borrow duration, whichever the kind carries.
    pub fn time_value(&self) -> Option<TimeSpan> {
        match self {
            OfferItem::CreditTransfer(item) => Some(item.amount),
            OfferItem::ResourceTransfer(_) => None,
            OfferItem::ProvideService(item) => Some(item.duration),
            OfferItem::BorrowResource(item) => Some(item.duration),
        }
    }
    pub fn is_credit_transfer(&self) -> bool {
        matches!(self, OfferItem::CreditTransfer(_))
    }
    pub fn is_resource_transfer(&self) -> bool {
        matches!(self, OfferItem::ResourceTransfer(_))
    }
    pub fn is_accepted(&self) -> bool {
        self.base().is_accepted()
    }

    /// Whether the real-world exchange behind this item has been confirmed.
    pub fn is_completed(&self) -> bool {
        match self {
            OfferItem::CreditTransfer(item) => item.credits_transferred,
            OfferItem::ResourceTransfer(item) => item.item_given && item.item_received,
            OfferItem::ProvideService(item) => {
                item.service_given_confirmation && item.service_received_confirmation
            }
            OfferItem::BorrowResource(item) => {
                item.item_taken
                    && item.item_given
                    && item.item_returned_back
                    && item.item_received_back
            }
        }
    }

    // Credit transfers settle atomically on acceptance.
    pub(crate) fn mark_accepted(&mut self, side: ApprovalSide, at: TimeStamp<Utc>) {
        let base = self.base_mut();
        match side {
            ApprovalSide::Giver => base.giver_accepted = true,
            ApprovalSide::Receiver => base.receiver_accepted = true,
        }
        base.updated_at = at;

        if let OfferItem::CreditTransfer(item) = self {
            if item.base.is_accepted() {
                item.credits_transferred = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> TimeStamp<Utc> {
        TimeStamp::new_with(2024, 6, 1, 12, 0, 0).expect("valid date")
    }

    fn borrow() -> OfferItem {
        OfferItem::borrow_resource(
            "item-1".into(),
            "offer-1".into(),
            "bike".into(),
            Target::user("borrower"),
            TimeSpan::hours(24),
            at(),
        )
    }

    #[test]
    fn acceptance_needs_both_sides() {
        let mut item = borrow();
        assert!(!item.is_accepted());

        item.mark_accepted(ApprovalSide::Giver, at());
        assert!(!item.is_accepted());

        item.mark_accepted(ApprovalSide::Receiver, at());
        assert!(item.is_accepted());
        // acceptance alone does not fulfil a borrow
        assert!(!item.is_completed());
    }

    #[test]
    fn credit_transfer_settles_on_acceptance() {
        let mut item = OfferItem::credit_transfer(
            "item-1".into(),
            "offer-1".into(),
            Target::user("x"),
            Target::group("g"),
            TimeSpan::hours(2),
            at(),
        );
        item.mark_accepted(ApprovalSide::Receiver, at());
        assert!(!item.is_completed());

        item.mark_accepted(ApprovalSide::Giver, at());
        assert!(item.is_completed());
    }

    #[test]
    fn borrow_completion_needs_all_four_legs() {
        let mut item = borrow();
        let OfferItem::BorrowResource(borrow) = &mut item else {
            unreachable!()
        };
        borrow.item_taken = true;
        borrow.item_given = true;
        borrow.item_returned_back = true;
        assert!(!item.is_completed());

        if let OfferItem::BorrowResource(borrow) = &mut item {
            borrow.item_received_back = true;
        }
        assert!(item.is_completed());
    }

    #[test]
    fn only_credit_transfers_name_a_giver() {
        assert!(borrow().from().is_none());
        assert_eq!(borrow().resource_key(), Some(&ResourceKey::new("bike")));
        assert_eq!(borrow().kind().to_string(), "borrow_resource");
    }
}
