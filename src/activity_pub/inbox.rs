//! Inbound server-to-server protocol handlers.
//!
//! One handler per activity type. Handlers are deliberately forgiving:
//! malformed or unresolvable input is logged and dropped, never retried.
//! Only store failures and a fail-closed Move surface to the caller.

use std::time::Duration;

use fjall::Keyspace;
use jiff::Timestamp;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::delivery::{Job, Scheduler};
use super::followers::FollowerRegistry;
use super::mailman::Fetcher;
use super::model::{vocab, Activity, Object};
use super::outbox::Outbox;
use super::repo::{
    AnnounceLedger, InteractionKind, InteractionRecord, InteractionRepo, OutboxItem, Visibility,
};

/// Announce-of-Announce is unwrapped at most this many times.
const MAX_ANNOUNCE_DEPTH: u8 = 1;

/// Engine-level events for the embedding application. Delivery is
/// synchronous and must not block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewFollower { local_id: u64, actor_iri: String },
    FollowAccepted { local_id: u64, actor_iri: String },
    FollowRejected { local_id: u64, actor_iri: String },
    ActorMoved { from_iri: String, to_iri: String },
}

pub trait Notifier: Clone + Send + Sync + 'static {
    fn notify(&self, event: Notification);
}

/// Default notifier, reports through the log only.
#[derive(Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Notification) {
        info!(target: "apub", ?event, "notification");
    }
}

#[derive(Clone)]
pub struct Inbox<F, S, N> {
    config: Config,
    followers: FollowerRegistry<F>,
    outbox: Outbox<S>,
    interactions: InteractionRepo,
    announces: AnnounceLedger,
    fetcher: F,
    notifier: N,
}

impl<F: Fetcher, S: Scheduler, N: Notifier> Inbox<F, S, N> {
    pub fn new(
        config: Config,
        keyspace: &Keyspace,
        followers: FollowerRegistry<F>,
        outbox: Outbox<S>,
        fetcher: F,
        notifier: N,
    ) -> Result<Inbox<F, S, N>> {
        Ok(Inbox {
            config,
            followers,
            outbox,
            interactions: InteractionRepo::new(keyspace)?,
            announces: AnnounceLedger::new(keyspace)?,
            fetcher,
            notifier,
        })
    }

    pub(crate) fn interactions(&self) -> &InteractionRepo {
        &self.interactions
    }

    /// Entry point for the content collaborator: persist a remote reply to
    /// a local object, HTML-sanitized. Delete/Undo/purge operate on these
    /// records later.
    pub fn record_reply(
        &self,
        object: &Object,
        actor_iri: &str,
        local_object_iri: &str,
    ) -> Result<()> {
        self.interactions
            .record_reply(object, actor_iri, local_object_iri, Timestamp::now().as_second())
    }

    /// Entry point for a delivered activity. The payload must satisfy the
    /// inbound contract (id, type, actor, object); everything after that is
    /// per-type policy.
    pub async fn receive(&self, payload: Value, local_id: u64) -> Result<()> {
        let activity = Activity::try_from(payload)?;
        self.dispatch(activity, local_id, 0).await
    }

    async fn dispatch(&self, activity: Activity, local_id: u64, depth: u8) -> Result<()> {
        debug!(
            target: "apub",
            ty = activity.kind(), id = activity.id().unwrap_or_default(),
            "inbound activity"
        );
        match activity.kind().to_ascii_lowercase().as_str() {
            "follow" => self.handle_follow(activity).await,
            "accept" => self.handle_accept(activity),
            "reject" => self.handle_reject(activity),
            "undo" => self.handle_undo(activity),
            "delete" => self.handle_delete(activity).await,
            "move" => self.handle_move(activity).await,
            "update" => self.handle_update(activity).await,
            "announce" => self.handle_announce(activity, local_id, depth).await,
            other => {
                debug!(target: "apub", ty = other, "unhandled activity type");
                Ok(())
            }
        }
    }

    /// Follower registration is automatic; the Accept echo is queued as a
    /// private item addressed only to the requester.
    async fn handle_follow(&self, activity: Activity) -> Result<()> {
        let Some(target) = activity.object_iri().and_then(|iri| self.local_id_of(iri)) else {
            debug!(target: "apub", "follow of a non-local object, dropping");
            return Ok(());
        };
        let Some(actor_iri) = activity.actor_iri().map(str::to_owned) else {
            return Ok(());
        };
        match self.followers.add_follower(target, &actor_iri).await {
            Ok(_) => {}
            Err(Error::InvalidFollower { iri, reason }) => {
                // No usable inbox means nobody to echo the Accept to
                warn!(target: "apub", iri, reason, "dropping invalid follower");
                return Ok(());
            }
            Err(error) => return Err(error),
        }
        self.notifier.notify(Notification::NewFollower {
            local_id: target,
            actor_iri: actor_iri.clone(),
        });

        let mut accept = Object::new("Accept");
        accept.set("actor", self.local_iri(target))?;
        accept.set("object", minimal_echo(&activity))?;
        accept.add("to", actor_iri)?;
        self.outbox
            .add(target, Activity::from_object(accept)?, Visibility::Private)?;
        Ok(())
    }

    /// The Accept's object names our own outbound Follow by the id we
    /// minted for it. Anything else is a stray and ignored.
    fn handle_accept(&self, activity: Activity) -> Result<()> {
        let Some((item, remote_iri)) = self.referenced_follow(&activity)? else {
            return Ok(());
        };
        if self.followers.accept_following(item.local_id, &remote_iri)? {
            self.notifier.notify(Notification::FollowAccepted {
                local_id: item.local_id,
                actor_iri: remote_iri,
            });
        }
        Ok(())
    }

    /// Reject clears the pending edge and voids the in-flight Follow, so
    /// retrying requires a fresh Follow.
    fn handle_reject(&self, activity: Activity) -> Result<()> {
        let Some((item, remote_iri)) = self.referenced_follow(&activity)? else {
            return Ok(());
        };
        self.followers.clear_following(item.local_id, &remote_iri)?;
        self.outbox.supersede_matching(&remote_iri, "Follow")?;
        self.notifier.notify(Notification::FollowRejected {
            local_id: item.local_id,
            actor_iri: remote_iri,
        });
        Ok(())
    }

    /// Undo of Follow retracts the follower edge; undo of Like/Announce
    /// removes the recorded interaction.
    fn handle_undo(&self, activity: Activity) -> Result<()> {
        let Some(inner) = activity.embedded_object() else {
            // a bare iri can only reference an interaction we recorded
            if let Some(iri) = activity.object_iri() {
                self.interactions.remove(iri)?;
            }
            return Ok(());
        };
        match inner.kind() {
            Some("Follow") => {
                let Some(target) = inner.get_node_iri("object").and_then(|o| self.local_id_of(o))
                else {
                    return Ok(());
                };
                let Some(follower) = activity.actor_iri() else {
                    return Ok(());
                };
                self.followers.remove_follower(target, follower)?;
                Ok(())
            }
            Some("Like") | Some("Announce") => {
                if let Some(id) = inner.id() {
                    self.interactions.remove(id)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Deletes are honored only when the target independently verifies as
    /// gone. A live re-fetch means the Delete was spoofed.
    async fn handle_delete(&self, activity: Activity) -> Result<()> {
        let Some(actor_iri) = activity.actor_iri().map(str::to_owned) else {
            return Ok(());
        };
        let embedded = activity.embedded_object();
        let target_iri = match activity.object_iri() {
            Some(iri) => iri.to_owned(),
            None => return Ok(()),
        };
        let actor_delete = match &embedded {
            Some(object) => object.kind().is_some_and(vocab::is_actor_type),
            // bare-string object, self-reference means the actor itself
            None => actor_iri == target_iri,
        };
        if actor_delete && actor_iri != target_iri {
            debug!(target: "apub", actor = actor_iri, "delete of a foreign actor, dropping");
            return Ok(());
        }

        match self.verify_tombstone(&target_iri).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    target: "apub",
                    iri = target_iri,
                    "{}",
                    Error::TombstoneMismatch(target_iri.clone())
                );
                return Ok(());
            }
            Err(error) => {
                // transport trouble proves nothing, keep the record
                debug!(target: "apub", iri = target_iri, %error, "tombstone check failed");
                return Ok(());
            }
        }

        if actor_delete {
            self.followers.purge_actor(&target_iri)?;
            self.outbox.scheduler().schedule(
                Job::PurgeActor {
                    iri: target_iri.clone(),
                },
                Duration::ZERO,
            );
            info!(target: "apub", iri = target_iri, "removed deleted actor");
        } else {
            self.interactions.remove(&target_iri)?;
        }
        Ok(())
    }

    /// Migration is fail-closed: both ends must resolve and the target must
    /// carry the reverse `alsoKnownAs` proof, or nothing moves.
    async fn handle_move(&self, activity: Activity) -> Result<()> {
        let Some(origin_iri) = activity.actor_iri().map(str::to_owned) else {
            return Ok(());
        };
        let Some(target_iri) = activity.object_iri().map(str::to_owned) else {
            return Ok(());
        };
        let Some(origin) = self.followers.registry().cached(&origin_iri)? else {
            debug!(target: "apub", iri = origin_iri, "move from an unknown actor, dropping");
            return Ok(());
        };
        // Nothing persists until the reverse proof checks out
        let fetched = self.followers.registry().fetch_remote(&target_iri).await?;
        if !fetched.also_known_as.iter().any(|iri| *iri == origin_iri) {
            return Err(Error::Validation(format!(
                "{target_iri} does not acknowledge {origin_iri} in alsoKnownAs"
            )));
        }
        let target = self.followers.registry().cache_profile(fetched)?;
        if origin.moved_to.as_deref() != Some(target_iri.as_str()) {
            debug!(target: "apub", iri = origin_iri, "movedTo does not corroborate the move");
        }
        self.followers.migrate(&origin, target)?;
        self.notifier.notify(Notification::ActorMoved {
            from_iri: origin_iri,
            to_iri: target_iri,
        });
        Ok(())
    }

    /// Stale profile data is preferred to losing the record, so a failed
    /// re-fetch is a no-op.
    async fn handle_update(&self, activity: Activity) -> Result<()> {
        let Some(actor_iri) = activity.actor_iri() else {
            return Ok(());
        };
        match self.followers.registry().refresh(actor_iri).await {
            Ok(_) => Ok(()),
            Err(Error::RemoteFetch { iri, reason }) => {
                debug!(target: "apub", iri, reason, "profile refresh failed, keeping cache");
                Ok(())
            }
            Err(Error::Validation(reason)) => {
                debug!(target: "apub", reason, "unusable profile document, keeping cache");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// A plain Announce of a local object records one repost, idempotent by
    /// the announcing activity's id. An Announce wrapping another activity
    /// is unwrapped once, deduplicated by the inner id.
    async fn handle_announce(&self, activity: Activity, local_id: u64, depth: u8) -> Result<()> {
        if let Some(inner) = activity.embedded_object() {
            if inner.is_activity() {
                if depth >= MAX_ANNOUNCE_DEPTH {
                    debug!(target: "apub", "announce nesting limit reached, dropping");
                    return Ok(());
                }
                let Some(inner_id) = inner.id().map(str::to_owned) else {
                    return Ok(());
                };
                if !self
                    .announces
                    .check_and_record(&inner_id, Timestamp::now().as_second())?
                {
                    debug!(target: "apub", id = inner_id, "inner activity already processed");
                    return Ok(());
                }
                let inner = Activity::from_object(inner)?;
                return Box::pin(self.dispatch(inner, local_id, depth + 1)).await;
            }
        }

        let Some(announce_id) = activity.id().map(str::to_owned) else {
            return Ok(());
        };
        let Some(object_iri) = activity.object_iri() else {
            return Ok(());
        };
        if !self.is_local_iri(object_iri) {
            debug!(target: "apub", iri = object_iri, "announce of a foreign object, dropping");
            return Ok(());
        }
        if self.interactions.find_one(&announce_id)?.is_some() {
            return Ok(());
        }
        let Some(actor_iri) = activity.actor_iri() else {
            return Ok(());
        };
        self.interactions.insert(&InteractionRecord {
            iri: announce_id,
            kind: InteractionKind::Repost,
            actor_iri: actor_iri.to_owned(),
            local_object_iri: object_iri.to_owned(),
            content: String::new(),
            published: Timestamp::now().as_second(),
        })?;
        Ok(())
    }

    /// Resolve an Accept/Reject back to the outbound Follow item it
    /// answers. Returns the item and the remote actor the Follow addressed.
    fn referenced_follow(&self, activity: &Activity) -> Result<Option<(OutboxItem, String)>> {
        let Some(reference) = activity.embedded_object() else {
            return Ok(None);
        };
        let Some(item_id) = reference.id().and_then(|iri| self.outbox.parse_item_iri(iri)) else {
            debug!(target: "apub", "answer does not reference an outbox item");
            return Ok(None);
        };
        let Some(item) = self.outbox.find_one(item_id)? else {
            return Ok(None);
        };
        if item.activity_type != "Follow" {
            debug!(target: "apub", item = %item.uuid(), "answer references a non-Follow item");
            return Ok(None);
        }
        let Some(remote_iri) = reference.get_node_iri("object").map(str::to_owned) else {
            return Ok(None);
        };
        Ok(Some((item, remote_iri)))
    }

    async fn verify_tombstone(&self, iri: &str) -> Result<bool> {
        Ok(self.fetcher.get_remote_object(iri).await?.is_tombstone())
    }

    fn is_local_iri(&self, iri: &str) -> bool {
        iri.starts_with(&self.config.federation.base_url)
    }

    fn local_iri(&self, local_id: u64) -> String {
        format!("{}/users/{}", self.config.federation.base_url, local_id)
    }

    /// Parse `{base_url}/users/{id}` back to a configured local id.
    fn local_id_of(&self, iri: &str) -> Option<u64> {
        let rest = iri.strip_prefix(&self.config.federation.base_url)?;
        let id: u64 = rest.strip_prefix("/users/")?.parse().ok()?;
        if id == 0 && self.config.federation.dual_mode && self.config.blog.is_some() {
            return Some(id);
        }
        self.config.users.iter().find(|user| user.id == id).map(|user| user.id)
    }
}

/// The id/type/actor/object echo embedded in an Accept.
fn minimal_echo(activity: &Activity) -> Value {
    let mut echo = serde_json::Map::new();
    for key in ["id", "type", "actor", "object"] {
        if let Some(value) = activity.as_object().get(key).ok().flatten() {
            echo.insert(key.to_owned(), value.clone());
        }
    }
    Value::Object(echo)
}
