//! Admission rules for candidate offers.
//!
//! The service runs these in a fixed order and stops at the first failure:
//! structure, single transfer per resource, non-negative time values, group
//! visibility, no transfer to the current owner, resource kind per item kind,
//! no credit self-transfer, and finally an approver for every item side.
use crate::approvers::OfferApprovers;
use crate::error::ValidationError;
use crate::item::OfferItem;
use crate::lookup::{ClaimKind, ResourceKind, ResourceLookupResult};
use crate::types::{GroupKey, ResourceKey};
use std::collections::HashSet;

pub fn assert_offer_is_not_empty(items: &[OfferItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyOffer);
    }
    Ok(())
}

pub fn assert_item_keys_are_unique(items: &[OfferItem]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.key()) {
            return Err(ValidationError::DuplicateItemKey(item.key().clone()));
        }
    }
    Ok(())
}

/// Ownership of a resource can only move once per offer.
pub fn assert_resources_are_transferred_only_once(items: &[OfferItem]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for item in items {
        if let OfferItem::ResourceTransfer(transfer) = item {
            if !seen.insert(&transfer.resource_key) {
                return Err(ValidationError::ResourceTransferredMoreThanOnce(
                    transfer.resource_key.clone(),
                ));
            }
        }
    }
    Ok(())
}

pub fn assert_time_values_are_not_negative(items: &[OfferItem]) -> Result<(), ValidationError> {
    for item in items {
        if item.time_value().is_some_and(|span| span.is_negative()) {
            return Err(ValidationError::NegativeDuration(item.key().clone()));
        }
    }
    Ok(())
}

/// Every referenced resource must exist and carry a viewer claim for the group.
pub fn assert_resources_are_viewable_by_group(
    resources: &ResourceLookupResult,
    group: &GroupKey,
    items: &[OfferItem],
) -> Result<(), ValidationError> {
    for key in resource_keys(items) {
        if resources.get_resource(key).is_none() {
            return Err(ValidationError::ResourceNotFound(key.clone()));
        }
        if !resources.is_shared_with_group(key, group) {
            return Err(ValidationError::ResourceNotSharedWithGroup {
                resource: key.clone(),
                group: group.clone(),
            });
        }
    }
    Ok(())
}

pub fn assert_resources_are_not_transferred_to_their_owner(
    resources: &ResourceLookupResult,
    items: &[OfferItem],
) -> Result<(), ValidationError> {
    for item in items {
        if let OfferItem::ResourceTransfer(transfer) = item {
            if resources.has_claim(&transfer.resource_key, &transfer.base.to, ClaimKind::Owner) {
                return Err(ValidationError::CannotTransferResourceToItsOwner(
                    transfer.resource_key.clone(),
                ));
            }
        }
    }
    Ok(())
}

/// Transfers and borrows move objects, service provisions need a service.
pub fn assert_resource_kinds_match_items(
    resources: &ResourceLookupResult,
    items: &[OfferItem],
) -> Result<(), ValidationError> {
    for item in items {
        let kind_of = |key: &ResourceKey| resources.get_resource(key).map(|r| r.kind);

        match item {
            OfferItem::CreditTransfer(_) => {}
            OfferItem::ResourceTransfer(transfer) => {
                if kind_of(&transfer.resource_key) != Some(ResourceKind::Object) {
                    return Err(ValidationError::ResourceTransferMustReferToObject(
                        transfer.resource_key.clone(),
                    ));
                }
            }
            OfferItem::ProvideService(service) => {
                if kind_of(&service.resource_key) != Some(ResourceKind::Service) {
                    return Err(ValidationError::ProvideServiceMustReferToService(
                        service.resource_key.clone(),
                    ));
                }
            }
            OfferItem::BorrowResource(borrow) => {
                if kind_of(&borrow.resource_key) != Some(ResourceKind::Object) {
                    return Err(ValidationError::BorrowMustReferToObject(
                        borrow.resource_key.clone(),
                    ));
                }
            }
        }
    }
    Ok(())
}

pub fn assert_credits_are_not_transferred_to_self(items: &[OfferItem]) -> Result<(), ValidationError> {
    for item in items {
        if let OfferItem::CreditTransfer(credit) = item {
            if credit.from == credit.base.to {
                return Err(ValidationError::CreditTransferToSelf(item.key().clone()));
            }
        }
    }
    Ok(())
}

pub fn assert_every_side_has_an_approver(
    approvers: &OfferApprovers,
    items: &[OfferItem],
) -> Result<(), ValidationError> {
    match approvers.unapprovable_items(items).into_iter().next() {
        Some((item, side)) => Err(ValidationError::NoApprovers { item, side }),
        None => Ok(()),
    }
}

fn resource_keys(items: &[OfferItem]) -> impl Iterator<Item = &ResourceKey> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(OfferItem::resource_key)
        .filter(move |key| seen.insert(*key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{Claim, Resource};
    use crate::types::{Target, TimeSpan, TimeStamp};

    fn transfer(key: &str, resource: &str, to: &str) -> OfferItem {
        OfferItem::resource_transfer(
            key.into(),
            "offer".into(),
            resource.into(),
            Target::user(to),
            TimeStamp::new(),
        )
    }

    fn lookup() -> ResourceLookupResult {
        ResourceLookupResult {
            resources: vec![
                Resource {
                    key: "bike".into(),
                    kind: ResourceKind::Object,
                    name: "Bike".into(),
                },
                Resource {
                    key: "yoga".into(),
                    kind: ResourceKind::Service,
                    name: "Yoga class".into(),
                },
            ],
            claims: vec![
                Claim {
                    resource_key: "bike".into(),
                    target: Target::group("club"),
                    kind: ClaimKind::Viewer,
                },
                Claim {
                    resource_key: "bike".into(),
                    target: Target::user("ann"),
                    kind: ClaimKind::Owner,
                },
                Claim {
                    resource_key: "yoga".into(),
                    target: Target::group("club"),
                    kind: ClaimKind::Viewer,
                },
            ],
        }
    }

    #[test]
    fn duplicate_transfer_is_rejected() {
        let items = [transfer("a", "bike", "ben"), transfer("b", "bike", "cat")];
        assert_eq!(
            assert_resources_are_transferred_only_once(&items),
            Err(ValidationError::ResourceTransferredMoreThanOnce("bike".into()))
        );
    }

    #[test]
    fn borrowing_the_same_resource_twice_is_not_a_double_transfer() {
        let borrow = |key: &str| {
            OfferItem::borrow_resource(
                key.into(),
                "offer".into(),
                "bike".into(),
                Target::user("ben"),
                TimeSpan::hours(1),
                TimeStamp::new(),
            )
        };
        assert!(assert_resources_are_transferred_only_once(&[borrow("a"), borrow("b")]).is_ok());
    }

    #[test]
    fn unshared_and_unknown_resources_are_rejected() {
        let items = [transfer("a", "bike", "ben")];
        assert!(assert_resources_are_viewable_by_group(&lookup(), &"club".into(), &items).is_ok());
        assert_eq!(
            assert_resources_are_viewable_by_group(&lookup(), &"other".into(), &items),
            Err(ValidationError::ResourceNotSharedWithGroup {
                resource: "bike".into(),
                group: "other".into()
            })
        );

        let items = [transfer("a", "boat", "ben")];
        assert_eq!(
            assert_resources_are_viewable_by_group(&lookup(), &"club".into(), &items),
            Err(ValidationError::ResourceNotFound("boat".into()))
        );
    }

    #[test]
    fn transfer_to_current_owner_is_rejected() {
        let items = [transfer("a", "bike", "ann")];
        assert_eq!(
            assert_resources_are_not_transferred_to_their_owner(&lookup(), &items),
            Err(ValidationError::CannotTransferResourceToItsOwner("bike".into()))
        );
    }

    #[test]
    fn kinds_must_match() {
        let wrong_service = OfferItem::provide_service(
            "a".into(),
            "offer".into(),
            "bike".into(),
            Target::user("ben"),
            TimeSpan::hours(1),
            TimeStamp::new(),
        );
        assert_eq!(
            assert_resource_kinds_match_items(&lookup(), &[wrong_service]),
            Err(ValidationError::ProvideServiceMustReferToService("bike".into()))
        );
        assert_eq!(
            assert_resource_kinds_match_items(&lookup(), &[transfer("a", "yoga", "ben")]),
            Err(ValidationError::ResourceTransferMustReferToObject("yoga".into()))
        );
    }

    #[test]
    fn credits_to_self_are_rejected() {
        let credit = OfferItem::credit_transfer(
            "a".into(),
            "offer".into(),
            Target::user("ann"),
            Target::user("ann"),
            TimeSpan::hours(1),
            TimeStamp::new(),
        );
        assert_eq!(
            assert_credits_are_not_transferred_to_self(&[credit]),
            Err(ValidationError::CreditTransferToSelf("a".into()))
        );
    }
}
