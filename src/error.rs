use crate::item::{ApprovalSide, OfferItemKind};
use crate::offer::OfferStatus;
use crate::types::{GroupKey, OfferItemKey, OfferKey, ResourceKey, UserKey};

/// Admission failures for a candidate offer. Never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Offer must contain at least one item")]
    EmptyOffer,
    #[error("Offer item {0} appears more than once")]
    DuplicateItemKey(OfferItemKey),
    #[error("Resource {0} is transferred more than once in the same offer")]
    ResourceTransferredMoreThanOnce(ResourceKey),
    #[error("Offer item {0} has a negative duration or amount")]
    NegativeDuration(OfferItemKey),
    #[error("Resource {0} could not be found")]
    ResourceNotFound(ResourceKey),
    #[error("Resource {resource} is not shared with group {group}")]
    ResourceNotSharedWithGroup { resource: ResourceKey, group: GroupKey },
    #[error("Resource {0} cannot be transferred to its current owner")]
    CannotTransferResourceToItsOwner(ResourceKey),
    #[error("Resource transfer items must refer to object resources, {0} is not one")]
    ResourceTransferMustReferToObject(ResourceKey),
    #[error("Service provision items must refer to service resources, {0} is not one")]
    ProvideServiceMustReferToService(ResourceKey),
    #[error("Borrow items must refer to object resources, {0} is not one")]
    BorrowMustReferToObject(ResourceKey),
    #[error("Offer item {0} transfers credits to the party they come from")]
    CreditTransferToSelf(OfferItemKey),
    #[error("Nobody is able to approve the {side} side of offer item {item}")]
    NoApprovers { item: OfferItemKey, side: ApprovalSide },
}

/// State errors raised by the offer aggregate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OfferError {
    #[error("Offer has already been submitted")]
    AlreadySubmitted,
    #[error("Offer has not yet been submitted")]
    NotSubmitted,
    #[error("Offer status must be '{expected}' but is '{actual}'")]
    InvalidStatus {
        expected: OfferStatus,
        actual: OfferStatus,
    },
    #[error("Offer cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: OfferStatus, to: OfferStatus },
    #[error("Offer must contain at least one item")]
    NoItems,
    #[error("Offer item {0} appears more than once")]
    DuplicateItem(OfferItemKey),
    #[error("Offer item {0} is not part of the offer")]
    ItemNotFound(OfferItemKey),
    #[error("Offer item {item} is not of kind '{expected}'")]
    WrongItemKind {
        item: OfferItemKey,
        expected: OfferItemKind,
    },
    #[error("Offer item {item} has already been accepted by the {side}")]
    AlreadyAccepted {
        item: OfferItemKey,
        side: ApprovalSide,
    },
    #[error("Offer item {0} has not been borrowed yet")]
    NotYetBorrowed(OfferItemKey),
    #[error("Offer item {0} has not been lent yet")]
    NotYetLent(OfferItemKey),
    #[error("Offer has no expiration time, or it has not passed")]
    NotExpired,
}

#[derive(thiserror::Error, Debug)]
pub enum EventStoreError {
    #[error("Stream {stream} is at version {current}, expected {expected}")]
    Conflict {
        stream: String,
        expected: u64,
        current: u64,
    },
    #[error("Event {sequence} in stream {stream} failed its digest check")]
    Corrupted { stream: String, sequence: u64 },
    #[error("Failed to encode event: {0}")]
    Encode(String),
    #[error("Failed to decode event: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
}

/// Failure reported by one of the external collaborators.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(thiserror::Error, Debug)]
pub enum NegotiationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("User {user} is not allowed to {action}")]
    Unauthorized { user: UserKey, action: String },
    #[error(transparent)]
    State(#[from] OfferError),
    #[error("Offer {offer} kept changing underneath us, gave up after {attempts} attempts")]
    Conflict { offer: OfferKey, attempts: u32 },
    #[error("Offer {0} not found")]
    NotFound(OfferKey),
    #[error("Offer item {0} not found")]
    ItemNotFound(OfferItemKey),
    #[error(transparent)]
    Store(#[from] EventStoreError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl NegotiationError {
    pub(crate) fn unauthorized(user: &UserKey, action: impl Into<String>) -> Self {
        NegotiationError::Unauthorized {
            user: user.clone(),
            action: action.into(),
        }
    }

    /// Only version conflicts are worth retrying; everything else needs the
    /// caller to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NegotiationError::Conflict { .. }
                | NegotiationError::Store(EventStoreError::Conflict { .. })
        )
    }
}
