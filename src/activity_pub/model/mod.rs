mod activity;
mod actor;
mod context;
mod object;
pub(crate) mod vocab;

pub use activity::Activity;
pub use actor::{ActorKind, BLOG_ACTOR_ID, FollowingState, LocalActor, RemoteActor};
pub use object::Object;
