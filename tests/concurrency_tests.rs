//! Optimistic concurrency on offer streams
//!
//! Two writers that loaded the same version race on save: one wins, the other
//! gets a version conflict and has to reload. The service hides that race from
//! callers by retrying.

use std::sync::Arc;
use std::thread;
use offer_negotiation::{
    config::NegotiationConfig,
    directory::{InMemoryDirectory, RecordingNotifier},
    error::EventStoreError,
    event::{OfferEvent, RecordedEvent},
    item::{ApprovalSide, OfferItem},
    offer::{Offer, OfferStatus},
    repository::OfferRepository,
    service::{CandidateOffer, Collaborators, NegotiationService},
    store::{EventStore, MemoryEventStore, SledEventStore},
    types::{Target, TimeSpan, TimeStamp, UserKey},
};
use tempfile::tempdir;

fn submitted(repository: &OfferRepository) -> anyhow::Result<Offer> {
    let at = TimeStamp::new();
    let mut offer = Offer::new("offer-1".into());
    offer.submit(
        "ann".into(),
        "garden".into(),
        String::new(),
        vec![
            OfferItem::credit_transfer(
                "first".into(),
                "offer-1".into(),
                Target::user("ann"),
                Target::user("ben"),
                TimeSpan::hours(1),
                at.clone(),
            ),
            OfferItem::credit_transfer(
                "second".into(),
                "offer-1".into(),
                Target::user("ben"),
                Target::user("ann"),
                TimeSpan::hours(1),
                at,
            ),
        ],
        None,
    )?;
    repository.save(&mut offer)?;
    Ok(offer)
}

fn stale_writer_reloads_and_both_updates_land(repository: OfferRepository) -> anyhow::Result<()> {
    submitted(&repository)?;

    let mut first = repository.load(&"offer-1".into())?;
    let mut second = repository.load(&"offer-1".into())?;
    assert_eq!(first.version(), second.version());

    first.accept_as_giver(&"ann".into(), &"first".into())?;
    second.accept_as_giver(&"ben".into(), &"second".into())?;

    repository.save(&mut first)?;
    let conflict = repository.save(&mut second);
    assert!(matches!(conflict, Err(EventStoreError::Conflict { .. })));

    let mut second = repository.load(&"offer-1".into())?;
    second.accept_as_giver(&"ben".into(), &"second".into())?;
    repository.save(&mut second)?;

    let last = repository.load(&"offer-1".into())?;
    assert_eq!(last.version(), 3);
    for key in ["first", "second"] {
        let item = last.items().get(&key.into()).expect("item");
        assert!(item.base().giver_accepted);
    }

    Ok(())
}

#[test]
fn memory_store_detects_stale_writer() -> anyhow::Result<()> {
    stale_writer_reloads_and_both_updates_land(OfferRepository::new(Arc::new(MemoryEventStore::new())))
}

#[test]
fn sled_store_detects_stale_writer() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("test_stale_writer.db"))?);
    stale_writer_reloads_and_both_updates_land(OfferRepository::new(Arc::new(SledEventStore::new(db)?)))
}

#[test]
fn only_one_racing_append_wins() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("test_racing_append.db"))?);
    let store: Arc<dyn EventStore> = Arc::new(SledEventStore::new(db)?);

    let outcomes: Vec<Result<u64, EventStoreError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                scope.spawn(move || {
                    let event = RecordedEvent::new(
                        "offer-1".into(),
                        1,
                        TimeStamp::new(),
                        OfferEvent::OfferDeclined {
                            by: UserKey::new(format!("user-{n}")),
                        },
                    );
                    store.append("offer:offer-1", 0, &[event])
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("append thread panicked"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, EventStoreError::Conflict { .. })));
    assert_eq!(store.load("offer:offer-1")?.len(), 1);

    Ok(())
}

#[test]
fn service_retries_through_concurrent_acceptances() -> anyhow::Result<()> {
    let directory = Arc::new(InMemoryDirectory::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let service = NegotiationService::new(
        Arc::new(MemoryEventStore::new()),
        Collaborators::in_memory(directory, notifier),
        NegotiationConfig::default().set_max_save_attempts(100),
    )?;

    // every user pays the next one, so each accepts two distinct item sides
    let users: Vec<UserKey> = (0..6).map(|n| UserKey::new(format!("user-{n}"))).collect();
    let mut candidate = CandidateOffer::new("circle");
    for (n, user) in users.iter().enumerate() {
        let next = &users[(n + 1) % users.len()];
        candidate = candidate.transfer_credits(
            Target::User(user.clone()),
            Target::User(next.clone()),
            TimeSpan::minutes(30),
        );
    }
    let offer = service.submit_offer(&users[0], candidate)?;

    let failures = thread::scope(|scope| {
        let handles: Vec<_> = users
            .iter()
            .map(|user| {
                let (service, key) = (&service, offer.key());
                scope.spawn(move || service.accept_offer(user, key).map(|_| ()))
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| handle.join().expect("accept thread panicked").err())
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
    });
    assert!(failures.is_empty(), "{failures:?}");

    let offer = service.get_offer(offer.key())?;
    assert!(offer.items().all_parties_accepted());
    // credit only offers settle the moment they are accepted
    assert_eq!(offer.status(), OfferStatus::Completed);
    for user in &users {
        let approvers = service.find_approvers_for_offer(offer.key())?;
        assert_eq!(approvers.items_for(user, ApprovalSide::Giver).len(), 1);
    }

    Ok(())
}
