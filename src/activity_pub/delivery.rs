//! Deferred fan-out: the scheduler port and the ractor worker that drains
//! outbox items batch by batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fjall::Keyspace;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::Value;
use tokio::task::{block_in_place, JoinHandle};
use uuid::Uuid;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;

use super::followers::FollowerRegistry;
use super::mailman::{Fetcher, Mailman};
use super::model::{vocab, ActorKind, BLOG_ACTOR_ID};
use super::repo::{uuidgen, DeliveryStatus, InteractionRepo, OutboxItem, OutboxRepo, Visibility};

/// Unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Dispatch {
        item_id: Uuid,
        batch_size: u32,
        offset: u32,
    },
    PurgeActor {
        iri: String,
    },
}

/// Handle for a scheduled job, used to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobToken(pub(crate) Uuid);

impl JobToken {
    pub(crate) fn as_bytes(&self) -> [u8; 16] {
        self.0.into_bytes()
    }

    pub(crate) fn from_bytes(bytes: [u8; 16]) -> JobToken {
        JobToken(Uuid::from_bytes(bytes))
    }
}

/// Timer port. Production backs this with [`DeliveryScheduler`]; tests
/// record the calls instead.
pub trait Scheduler: Clone + Send + Sync + 'static {
    fn schedule(&self, job: Job, delay: Duration) -> JobToken;
    fn cancel(&self, token: &JobToken);
}

pub enum DeliveryWorkerMsg {
    Run(Job),
}

/// Feeds jobs to a [`DeliveryWorker`] after a delay. Cancelling aborts the
/// sleeping task, so a superseded item never reaches the worker.
#[derive(Clone)]
pub struct DeliveryScheduler {
    worker: ActorRef<DeliveryWorkerMsg>,
    timers: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl DeliveryScheduler {
    pub fn new(worker: ActorRef<DeliveryWorkerMsg>) -> DeliveryScheduler {
        DeliveryScheduler {
            worker,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Scheduler for DeliveryScheduler {
    fn schedule(&self, job: Job, delay: Duration) -> JobToken {
        let token = JobToken(uuidgen());
        let worker = self.worker.clone();
        let timers = self.timers.clone();
        // The task's own removal blocks on this lock, so even a zero-delay
        // job cannot fire before its handle is in the map
        let mut slots = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&token.0);
            if let Err(error) = worker.cast(DeliveryWorkerMsg::Run(job)) {
                warn!(target: "apub", %error, "delivery worker is gone");
            }
        });
        slots.insert(token.0, handle);
        token
    }

    fn cancel(&self, token: &JobToken) {
        if let Some(handle) = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&token.0)
        {
            handle.abort();
        }
    }
}

pub struct DeliveryWorker<F> {
    _fetcher: std::marker::PhantomData<F>,
}

impl<F> Default for DeliveryWorker<F> {
    fn default() -> Self {
        DeliveryWorker {
            _fetcher: std::marker::PhantomData,
        }
    }
}

pub struct DeliveryWorkerInit<F> {
    pub config: Config,
    pub keyspace: Keyspace,
    pub followers: FollowerRegistry<F>,
}

pub struct DeliveryWorkerState<F> {
    config: Config,
    outbox: OutboxRepo,
    followers: FollowerRegistry<F>,
    interactions: InteractionRepo,
    mailman: Mailman,
}

impl<F: Fetcher> Actor for DeliveryWorker<F> {
    type Msg = DeliveryWorkerMsg;
    type State = DeliveryWorkerState<F>;
    type Arguments = DeliveryWorkerInit<F>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let DeliveryWorkerInit {
            config,
            keyspace,
            followers,
        } = args;
        block_in_place(|| {
            let outbox = OutboxRepo::new(&keyspace)?;
            let interactions = InteractionRepo::new(&keyspace)?;
            Ok(DeliveryWorkerState {
                config,
                outbox,
                followers,
                interactions,
                mailman: Mailman::new(),
            })
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DeliveryWorkerMsg::Run(job) => match state.run(job).await {
                Ok(Some(next)) => {
                    if let Err(error) = myself.cast(DeliveryWorkerMsg::Run(next)) {
                        warn!(target: "apub", %error, "could not chain the next batch");
                    }
                }
                Ok(None) => {}
                Err(error) => warn!(target: "apub", %error, "delivery job failed"),
            },
        }
        Ok(())
    }
}

impl<F: Fetcher> DeliveryWorkerState<F> {
    /// Execute one job. A dispatch that has addresses left returns the
    /// follow-up batch for the caller to requeue.
    async fn run(&mut self, job: Job) -> Result<Option<Job>> {
        match job {
            Job::Dispatch {
                item_id,
                batch_size,
                offset,
            } => self.dispatch(item_id, batch_size, offset).await,
            Job::PurgeActor { iri } => {
                block_in_place(|| self.purge_actor(&iri))?;
                Ok(None)
            }
        }
    }

    async fn dispatch(
        &mut self,
        item_id: Uuid,
        batch_size: u32,
        offset: u32,
    ) -> Result<Option<Job>> {
        let Some(mut item) = block_in_place(|| self.outbox.find_one(item_id))? else {
            debug!(target: "apub", %item_id, "dispatch for unknown item");
            return Ok(None);
        };
        // A superseded item was already cancelled and republished elsewhere
        if item.status != DeliveryStatus::Pending {
            debug!(target: "apub", %item_id, "item no longer pending, dropping dispatch");
            return Ok(None);
        }

        let inboxes = block_in_place(|| self.recipient_inboxes(&item))?;
        let payload = deliverable_payload(&item)?;
        let start = offset as usize;
        let end = inboxes.len().min(start + batch_size as usize);
        for inbox in &inboxes[start.min(inboxes.len())..end] {
            if let Err(error) = self.mailman.post(inbox, &payload).await {
                warn!(target: "apub", inbox, %error, "delivery failed");
                block_in_place(|| {
                    self.followers
                        .registry()
                        .repo()
                        .log_delivery_failure(inbox, &error.to_string())
                })?;
            }
        }

        if end < inboxes.len() {
            item.offset = end as u32;
            block_in_place(|| self.outbox.put(&item))?;
            return Ok(Some(Job::Dispatch {
                item_id,
                batch_size,
                offset: end as u32,
            }));
        }
        item.status = DeliveryStatus::Published;
        item.dispatch_token = None;
        block_in_place(|| self.outbox.put(&item))?;
        info!(target: "apub", %item_id, recipients = inboxes.len(), "item published");
        Ok(None)
    }

    /// Full recipient inbox list for an item, sorted and deduplicated so
    /// batch offsets stay stable across resumes.
    fn recipient_inboxes(&self, item: &OutboxItem) -> Result<Vec<String>> {
        let mut inboxes = Vec::new();
        if item.visibility != Visibility::Private {
            inboxes.extend(self.followers.follower_inboxes(item.local_id)?);
            // Blog followers carry Announce copies of user posts, so edits
            // and deletes of those posts must reach them too.
            if self.config.federation.dual_mode
                && item.actor_kind == ActorKind::Person
                && matches!(item.activity_type.as_str(), "Update" | "Delete")
            {
                inboxes.extend(self.followers.follower_inboxes(BLOG_ACTOR_ID)?);
            }
        }
        inboxes.extend(self.explicit_inboxes(item)?);
        inboxes.sort();
        inboxes.dedup();
        Ok(inboxes)
    }

    /// Inboxes of actors explicitly addressed in to/cc/bto/bcc. Only
    /// already-cached actors are considered; delivery never fetches.
    fn explicit_inboxes(&self, item: &OutboxItem) -> Result<Vec<String>> {
        let payload = item.payload();
        let mut inboxes = Vec::new();
        for field in ["to", "bto", "cc", "bcc"] {
            let Some(values) = payload.get(field) else {
                continue;
            };
            let iris = match values {
                Value::String(iri) => vec![iri.as_str()],
                Value::Array(array) => array.iter().filter_map(Value::as_str).collect(),
                _ => vec![],
            };
            for iri in iris {
                if vocab::is_public_iri(iri)
                    || iri.ends_with("/followers")
                    || self.followers.registry().is_local_iri(iri)
                {
                    continue;
                }
                match self.followers.registry().cached(iri)? {
                    Some(actor) => inboxes.push(actor.effective_inbox().to_string()),
                    None => debug!(target: "apub", iri, "addressed actor not cached, skipping"),
                }
            }
        }
        Ok(inboxes)
    }

    fn purge_actor(&self, iri: &str) -> Result<()> {
        let removed = self.interactions.purge_actor(iri)?;
        self.followers.purge_actor(iri)?;
        info!(target: "apub", iri, interactions = removed, "purged deleted actor");
        Ok(())
    }
}

/// The wire payload for an item, with recipient-private fields removed.
fn deliverable_payload(item: &OutboxItem) -> Result<Value> {
    let mut payload = item.payload();
    if let Some(map) = payload.as_object_mut() {
        map.remove("bto");
        map.remove("bcc");
    }
    Ok(payload)
}
