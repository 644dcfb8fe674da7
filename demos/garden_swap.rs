// A ladder for an hour and a half of time credits, negotiated and settled in
// a throwaway sled database. Run with RUST_LOG=debug to watch each step.

use offer_negotiation::{
    config::{EventStoreConfig, NegotiationConfig},
    directory::{InMemoryDirectory, RecordingNotifier},
    lookup::{ClaimKind, ResourceKind},
    offer::Confirmation,
    service::{CandidateOffer, Collaborators, NegotiationService},
    store::SledEventStore,
    types::{Target, TimeSpan, UserKey},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_user("ann", "Ann");
    directory.add_user("ben", "Ben");
    directory.add_approved_member("ann", "garden");
    directory.add_approved_member("ben", "garden");
    directory.add_resource("ladder", ResourceKind::Object, "Aluminium ladder");
    directory.add_claim("ladder", Target::user("ann"), ClaimKind::Owner);
    directory.add_claim("ladder", Target::group("garden"), ClaimKind::Viewer);

    let notifier = Arc::new(RecordingNotifier::new());
    let store = SledEventStore::open(&EventStoreConfig::new().set_temporary(true))?;
    let service = NegotiationService::new(
        Arc::new(store),
        Collaborators::in_memory(directory, notifier.clone()),
        NegotiationConfig::default().set_default_offer_ttl(TimeSpan::hours(72)),
    )?;

    let (ann, ben) = (UserKey::new("ann"), UserKey::new("ben"));
    let offer = service.submit_offer(
        &ann,
        CandidateOffer::new("garden")
            .set_message("ladder for the weekend, 90 minutes?")
            .transfer_resource("ladder", Target::user("ben"))
            .transfer_credits(Target::user("ben"), Target::user("ann"), TimeSpan::minutes(90)),
    )?;
    println!("submitted {} ({})", offer.key(), offer.status());

    service.accept_offer(&ann, offer.key())?;
    let offer = service.accept_offer(&ben, offer.key())?;
    println!("accepted by both sides ({})", offer.status());

    let ladder = offer
        .items()
        .iter()
        .find(|item| item.is_resource_transfer())
        .map(|item| item.key().clone())
        .ok_or_else(|| anyhow::anyhow!("offer lost its ladder"))?;
    service.confirm_item(&ann, &ladder, Confirmation::ResourceGiven)?;
    let offer = service.confirm_item(&ben, &ladder, Confirmation::ResourceReceived)?;
    println!("settled ({})", offer.status());

    for entry in service.get_trading_history(&"garden".into(), None)? {
        println!("{:?} to {} at {:?}", entry.kind, entry.to, entry.completed_at);
    }
    println!("{} notifications sent", notifier.messages().len());

    Ok(())
}
