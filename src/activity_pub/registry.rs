//! Actor resolution: local actor documents and the cached remote actor
//! directory.

use fjall::Keyspace;
use jiff::Timestamp;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::mailman::{Fetcher, RemoteObject};
use super::model::{ActorKind, LocalActor, RemoteActor, BLOG_ACTOR_ID};
use super::repo::ActorRepo;

/// Outcome of identifier resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedActor {
    Local(LocalActor),
    Remote(RemoteActor),
}

#[derive(Clone)]
pub struct ActorRegistry<F> {
    config: Config,
    actors: ActorRepo,
    fetcher: F,
}

impl<F: Fetcher> ActorRegistry<F> {
    pub fn new(config: Config, keyspace: &Keyspace, fetcher: F) -> Result<ActorRegistry<F>> {
        Ok(ActorRegistry {
            config,
            actors: ActorRepo::new(keyspace)?,
            fetcher,
        })
    }

    pub(crate) fn repo(&self) -> &ActorRepo {
        &self.actors
    }

    /// Look up a configured local actor by numeric id. Id 0 is the blog
    /// actor when dual mode is enabled.
    pub fn local(&self, id: u64) -> Result<LocalActor> {
        if id == BLOG_ACTOR_ID {
            let blog = self
                .config
                .blog
                .as_ref()
                .filter(|_| self.config.federation.dual_mode)
                .ok_or_else(|| Error::NotFound("blog actor is not configured".to_string()))?;
            return Ok(LocalActor::from_blog(blog));
        }
        self.config
            .users
            .iter()
            .find(|user| user.id == id)
            .map(LocalActor::from_user)
            .ok_or_else(|| Error::NotFound(format!("no local actor with id {id}")))
    }

    pub fn local_document(&self, id: u64) -> Result<Value> {
        Ok(self.local(id)?.to_record(&self.config))
    }

    /// All local actors that publish under this engine. In dual mode the
    /// blog actor comes first.
    pub fn local_actors(&self) -> Vec<LocalActor> {
        let mut actors = Vec::new();
        if self.config.federation.dual_mode {
            if let Some(blog) = &self.config.blog {
                actors.push(LocalActor::from_blog(blog));
            }
        }
        actors.extend(self.config.users.iter().map(LocalActor::from_user));
        actors
    }

    pub fn is_local_iri(&self, iri: &str) -> bool {
        iri.starts_with(&self.config.federation.base_url)
    }

    pub fn cached(&self, iri: &str) -> Result<Option<RemoteActor>> {
        self.actors.find_one(iri)
    }

    /// Dispatch on identifier shape: a decimal local id, a URI (local
    /// prefix or cached remote), or an `acct:user@host` / `user@host`
    /// handle. Never fetches; an unknown remote identifier is `NotFound`.
    pub fn resolve_identifier(&self, identifier: &str) -> Result<ResolvedActor> {
        if let Ok(id) = identifier.parse::<u64>() {
            return Ok(ResolvedActor::Local(self.local(id)?));
        }
        if identifier.contains("://") {
            if let Some(rest) = identifier.strip_prefix(&self.config.federation.base_url) {
                if let Some(id) = rest.strip_prefix("/users/").and_then(|s| s.parse().ok()) {
                    return Ok(ResolvedActor::Local(self.local(id)?));
                }
            }
            return match self.actors.find_one(identifier)? {
                Some(actor) => Ok(ResolvedActor::Remote(actor)),
                None => Err(Error::NotFound(format!("no actor at {identifier}"))),
            };
        }
        let handle = identifier.strip_prefix("acct:").unwrap_or(identifier);
        let Some((username, host)) = handle.split_once('@') else {
            return Err(Error::NotFound(format!("unrecognized identifier {identifier}")));
        };
        if host == self.config.host() {
            return self
                .local_actors()
                .into_iter()
                .find(|actor| actor.username == username)
                .map(ResolvedActor::Local)
                .ok_or_else(|| Error::NotFound(format!("no local actor named {username}")));
        }
        match self.actors.find_by_handle(username, host)? {
            Some(actor) => Ok(ResolvedActor::Remote(actor)),
            None => Err(Error::NotFound(format!("no cached actor for {handle}"))),
        }
    }

    /// Return the cached remote actor, fetching and caching it on a miss.
    pub async fn resolve(&self, iri: &str) -> Result<RemoteActor> {
        if let Some(actor) = self.actors.find_one(iri)? {
            return Ok(actor);
        }
        self.fetch_and_cache(iri).await
    }

    /// Re-fetch a remote actor's profile, keeping local edge state. A fetch
    /// failure leaves the cached record untouched.
    pub async fn refresh(&self, iri: &str) -> Result<RemoteActor> {
        let fetched = self.fetch_remote(iri).await?;
        self.cache_profile(fetched)
    }

    /// Merge an already-fetched profile into the cache, keeping local edge
    /// state. Lets a caller validate the document before anything persists.
    pub(crate) fn cache_profile(&self, fetched: RemoteActor) -> Result<RemoteActor> {
        let updated = match self.actors.find_one(&fetched.iri)? {
            Some(mut existing) => {
                existing.apply_profile(fetched);
                existing
            }
            None => fetched,
        };
        self.actors.insert(&updated)?;
        Ok(updated)
    }

    pub fn remove(&self, iri: &str) -> Result<()> {
        self.actors.remove(iri)
    }

    /// Remote actors whose delivery error count crossed the configured
    /// threshold, candidates for administrative pruning.
    pub fn faulty(&self) -> Result<Vec<RemoteActor>> {
        self.actors
            .find_faulty(self.config.federation.faulty_threshold)
    }

    pub(crate) fn upsert(&self, actor: &RemoteActor) -> Result<()> {
        self.actors.insert(actor)
    }

    async fn fetch_and_cache(&self, iri: &str) -> Result<RemoteActor> {
        let actor = self.fetch_remote(iri).await?;
        self.actors.insert(&actor)?;
        info!(target: "apub", iri, "cached remote actor");
        Ok(actor)
    }

    pub(crate) async fn fetch_remote(&self, iri: &str) -> Result<RemoteActor> {
        match self.fetcher.get_remote_object(iri).await? {
            RemoteObject::Found(value) => {
                RemoteActor::from_payload(&value, Timestamp::now().as_second())
            }
            RemoteObject::Gone => {
                warn!(target: "apub", iri, "remote actor is gone");
                Err(Error::remote_fetch(iri, "remote actor is gone"))
            }
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}
