mod object_serde;
mod repo;

pub(crate) mod delivery;
pub(crate) mod followers;
pub(crate) mod inbox;
pub(crate) mod mailman;
pub(crate) mod model;
pub(crate) mod outbox;
pub(crate) mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use delivery::{
    DeliveryScheduler, DeliveryWorker, DeliveryWorkerInit, DeliveryWorkerMsg, Job, JobToken,
    Scheduler,
};
pub use followers::FollowerRegistry;
pub use inbox::{Inbox, LogNotifier, Notification, Notifier};
pub use mailman::{Fetcher, Mailman, RemoteObject};
pub use model::{Activity, ActorKind, FollowingState, LocalActor, Object, RemoteActor, BLOG_ACTOR_ID};
pub use outbox::Outbox;
pub use registry::{ActorRegistry, ResolvedActor};
pub use repo::{DeliveryStatus, InteractionKind, InteractionRecord, OutboxItem, Visibility};
