mod actor_repo;
mod announce_ledger;
mod interaction_repo;
mod outbox_repo;

pub(crate) use actor_repo::ActorRepo;
pub(crate) use announce_ledger::AnnounceLedger;
pub(crate) use interaction_repo::InteractionRepo;
pub use interaction_repo::{InteractionKind, InteractionRecord};
pub(crate) use outbox_repo::OutboxRepo;
pub use outbox_repo::{DeliveryStatus, OutboxItem, Visibility};

use uuid::Uuid;

pub(crate) fn uuidgen() -> Uuid {
    Uuid::now_v7()
}

/// Compact item slug used in outbox IRIs.
pub(crate) fn base62_uuid(id: Uuid) -> String {
    base62::encode(id.as_u128())
}

pub(crate) fn parse_base62_uuid(slug: &str) -> Option<Uuid> {
    base62::decode(slug).ok().map(Uuid::from_u128)
}
