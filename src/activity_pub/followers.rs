//! Follower and following edges, plus the fan-out inbox cache.
//!
//! Edges live on the cached [`RemoteActor`] records. The inbox cache is a
//! derived view per local actor, invalidated whenever an edge changes and
//! rebuilt lazily on the next dispatch.

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::delivery::Scheduler;
use super::mailman::Fetcher;
use super::model::{Activity, FollowingState, Object, RemoteActor};
use super::object_serde::{decode_record, encode_record};
use super::outbox::Outbox;
use super::registry::ActorRegistry;
use super::repo::Visibility;

#[derive(Clone)]
pub struct FollowerRegistry<F> {
    registry: ActorRegistry<F>,
    inbox_cache: PartitionHandle,
}

impl<F: Fetcher> FollowerRegistry<F> {
    pub fn new(keyspace: &Keyspace, registry: ActorRegistry<F>) -> Result<FollowerRegistry<F>> {
        let inbox_cache =
            keyspace.open_partition("inbox_cache", PartitionCreateOptions::default())?;
        Ok(FollowerRegistry {
            registry,
            inbox_cache,
        })
    }

    pub(crate) fn registry(&self) -> &ActorRegistry<F> {
        &self.registry
    }

    /// Record `remote_iri` as a follower of the local actor. Resolves the
    /// remote actor first so a follower without a reachable inbox is
    /// rejected outright. Returns false when the edge already existed.
    pub async fn add_follower(&self, local_id: u64, remote_iri: &str) -> Result<bool> {
        let mut actor = self
            .registry
            .resolve(remote_iri)
            .await
            .map_err(|e| Error::invalid_follower(remote_iri, e.to_string()))?;
        let added = actor.add_follower(local_id);
        if added {
            self.registry.upsert(&actor)?;
            self.invalidate(local_id)?;
            info!(target: "apub", iri = remote_iri, local_id, "new follower");
        }
        Ok(added)
    }

    /// Drop the follower edge if present. Never fetches.
    pub fn remove_follower(&self, local_id: u64, remote_iri: &str) -> Result<bool> {
        let Some(mut actor) = self.registry.cached(remote_iri)? else {
            return Ok(false);
        };
        let removed = actor.remove_follower(local_id);
        if removed {
            self.registry.upsert(&actor)?;
            self.invalidate(local_id)?;
        }
        Ok(removed)
    }

    pub fn followers_of(&self, local_id: u64) -> Result<Vec<RemoteActor>> {
        let mut followers: Vec<RemoteActor> = self
            .registry
            .repo()
            .all()?
            .into_iter()
            .filter(|actor| actor.followers.contains(&local_id))
            .collect();
        followers.sort_by(|a, b| a.iri.cmp(&b.iri));
        Ok(followers)
    }

    /// Deduplicated effective inboxes of all followers of `local_id`,
    /// served from the cache when warm.
    pub fn follower_inboxes(&self, local_id: u64) -> Result<Vec<String>> {
        if let Some(bytes) = self.inbox_cache.get(local_id.to_be_bytes())? {
            return decode_record(&bytes);
        }
        let mut inboxes: Vec<String> = self
            .followers_of(local_id)?
            .iter()
            .map(|actor| actor.effective_inbox().to_string())
            .collect();
        inboxes.sort();
        inboxes.dedup();
        self.inbox_cache
            .insert(local_id.to_be_bytes(), encode_record(&inboxes)?)?;
        debug!(target: "apub", local_id, count = inboxes.len(), "rebuilt inbox cache");
        Ok(inboxes)
    }

    /// Mark an outbound follow as requested. No-op unless currently absent.
    pub async fn request_following(&self, local_id: u64, remote_iri: &str) -> Result<bool> {
        let mut actor = self.registry.resolve(remote_iri).await?;
        let changed = actor.following_state(local_id) == FollowingState::Absent;
        if changed {
            actor.set_following_pending(local_id);
            self.registry.upsert(&actor)?;
        }
        Ok(changed)
    }

    /// Promote a pending follow to accepted. Returns false when no request
    /// was pending, which callers treat as a stray Accept.
    pub fn accept_following(&self, local_id: u64, remote_iri: &str) -> Result<bool> {
        let Some(mut actor) = self.registry.cached(remote_iri)? else {
            return Ok(false);
        };
        let changed = actor.set_following_accepted(local_id);
        if changed {
            self.registry.upsert(&actor)?;
        }
        Ok(changed)
    }

    /// Drop the outbound follow edge whatever its state. Used for Reject
    /// and for local unfollow.
    pub fn clear_following(&self, local_id: u64, remote_iri: &str) -> Result<bool> {
        let Some(mut actor) = self.registry.cached(remote_iri)? else {
            return Ok(false);
        };
        let changed = actor.following_state(local_id) != FollowingState::Absent;
        if changed {
            actor.clear_following(local_id);
            self.registry.upsert(&actor)?;
        }
        Ok(changed)
    }

    /// Start following a remote actor: pending edge plus a queued private
    /// Follow addressed to them. Idempotent while a request is outstanding.
    pub async fn follow<S: Scheduler>(
        &self,
        local_id: u64,
        remote_iri: &str,
        outbox: &Outbox<S>,
    ) -> Result<()> {
        if !self.request_following(local_id, remote_iri).await? {
            return Ok(());
        }
        let mut object = Object::new("Follow");
        let actor_iri = format!(
            "{}/users/{}",
            self.registry.config().federation.base_url,
            local_id
        );
        object.set("actor", actor_iri)?;
        object.set("object", remote_iri)?;
        object.set("to", remote_iri)?;
        outbox.add(local_id, Activity::from_object(object)?, Visibility::Private)?;
        Ok(())
    }

    /// Stop following: edges cleared whatever their state, and any Follow
    /// still sitting in the outbox is voided before it goes out.
    pub fn unfollow<S: Scheduler>(
        &self,
        local_id: u64,
        remote_iri: &str,
        outbox: &Outbox<S>,
    ) -> Result<()> {
        self.clear_following(local_id, remote_iri)?;
        outbox.supersede_matching(remote_iri, "Follow")?;
        Ok(())
    }

    pub fn following_state(&self, local_id: u64, remote_iri: &str) -> Result<FollowingState> {
        Ok(self
            .registry
            .cached(remote_iri)?
            .map(|actor| actor.following_state(local_id))
            .unwrap_or(FollowingState::Absent))
    }

    pub fn following_of(&self, local_id: u64) -> Result<Vec<RemoteActor>> {
        let mut following: Vec<RemoteActor> = self
            .registry
            .repo()
            .all()?
            .into_iter()
            .filter(|actor| actor.following_state(local_id) != FollowingState::Absent)
            .collect();
        following.sort_by(|a, b| a.iri.cmp(&b.iri));
        Ok(following)
    }

    /// Migrate every edge from `origin` onto `target` and drop the origin
    /// record. Both follower and following edges move.
    pub fn migrate(&self, origin: &RemoteActor, mut target: RemoteActor) -> Result<()> {
        for &local_id in &origin.followers {
            target.add_follower(local_id);
            self.invalidate(local_id)?;
        }
        for &local_id in &origin.following_pending {
            target.set_following_pending(local_id);
        }
        for &local_id in &origin.following_accepted {
            target.set_following_pending(local_id);
            target.set_following_accepted(local_id);
        }
        self.registry.upsert(&target)?;
        self.registry.remove(&origin.iri)?;
        info!(target: "apub", from = origin.iri, to = target.iri, "migrated actor edges");
        Ok(())
    }

    /// Remove a remote actor and every cache entry its edges touched.
    pub fn purge_actor(&self, iri: &str) -> Result<()> {
        if let Some(actor) = self.registry.cached(iri)? {
            for &local_id in &actor.followers {
                self.invalidate(local_id)?;
            }
            self.registry.remove(iri)?;
        }
        Ok(())
    }

    fn invalidate(&self, local_id: u64) -> Result<()> {
        self.inbox_cache.remove(local_id.to_be_bytes())?;
        Ok(())
    }
}
