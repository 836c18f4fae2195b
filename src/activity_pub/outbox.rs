//! The durable outgoing queue: item addressing, visibility, supersession
//! and the operator-facing undo/reschedule operations.

use std::time::Duration;

use fjall::Keyspace;
use jiff::Timestamp;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

use super::delivery::{Job, JobToken, Scheduler};
use super::model::{vocab, Activity, ActorKind, Object, BLOG_ACTOR_ID};
use super::object_serde::NodeValue;
use super::repo::{
    base62_uuid, parse_base62_uuid, uuidgen, DeliveryStatus, OutboxItem, OutboxRepo, Visibility,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct Outbox<S> {
    config: Config,
    repo: OutboxRepo,
    scheduler: S,
}

impl<S: Scheduler> Outbox<S> {
    pub fn new(config: Config, keyspace: &Keyspace, scheduler: S) -> Result<Outbox<S>> {
        Ok(Outbox {
            config,
            repo: OutboxRepo::new(keyspace)?,
            scheduler,
        })
    }

    pub(crate) fn repo(&self) -> &OutboxRepo {
        &self.repo
    }

    /// Permanent address of an outbox item, also used as the backfilled
    /// activity id.
    pub fn item_iri(&self, local_id: u64, id: Uuid) -> String {
        format!(
            "{}/users/{}/outbox/{}",
            self.config.federation.base_url,
            local_id,
            base62_uuid(id)
        )
    }

    /// Recover an item id from an activity id minted by [`Outbox::item_iri`].
    pub fn parse_item_iri(&self, iri: &str) -> Option<Uuid> {
        if !iri.starts_with(&self.config.federation.base_url) {
            return None;
        }
        parse_base62_uuid(iri.rsplit('/').next()?)
    }

    pub fn find_one(&self, id: Uuid) -> Result<Option<OutboxItem>> {
        self.repo.find_one(id)
    }

    /// Queue an activity for fan-out. Persists the item, backfills a
    /// missing activity id from the item's permanent address, arms the
    /// dispatch timer and then supersedes older pending work on the same
    /// object. Local visibility publishes immediately without delivery.
    pub fn add(
        &self,
        local_id: u64,
        mut activity: Activity,
        visibility: Visibility,
    ) -> Result<OutboxItem> {
        let id = uuidgen();
        let iri = self.item_iri(local_id, id);
        activity.ensure_id(&iri);
        self.address(&mut activity, local_id, visibility)?;

        let object_id = activity
            .object_id()
            .ok_or_else(|| Error::Validation("activity has no canonical object".into()))?;
        let actor_kind = if local_id == BLOG_ACTOR_ID {
            ActorKind::Blog
        } else {
            ActorKind::Person
        };
        let mut item = OutboxItem {
            id: id.into_bytes(),
            local_id,
            status: DeliveryStatus::Pending,
            visibility,
            object_id,
            activity_type: activity.kind().to_owned(),
            actor_kind,
            title: activity.title(),
            offset: 0,
            published: Timestamp::now().as_second(),
            payload: NodeValue::from(activity.to_payload()),
            dispatch_token: None,
        };

        if visibility == Visibility::Local {
            item.status = DeliveryStatus::Published;
            self.repo.put(&item)?;
            return Ok(item);
        }

        // Pending must be durable before anything is superseded by it
        self.repo.put(&item)?;
        let token = self.scheduler.schedule(
            Job::Dispatch {
                item_id: id,
                batch_size: self.config.federation.batch_size,
                offset: 0,
            },
            Duration::from_millis(self.config.federation.dispatch_delay_ms),
        );
        item.dispatch_token = Some(token.as_bytes());
        self.repo.put(&item)?;
        info!(
            target: "apub",
            item = %id, ty = item.activity_type, title = item.title,
            "queued outbox item"
        );

        self.supersede(&item)?;
        Ok(item)
    }

    /// Last-writer-wins per `(object_id, activity_type)`. A Delete voids
    /// pending work of any type on its object. Announce re-shares are
    /// independent and stay out of supersession entirely.
    fn supersede(&self, newest: &OutboxItem) -> Result<()> {
        if newest.activity_type == "Announce" {
            return Ok(());
        }
        for other in self.repo.pending_for_object(&newest.object_id)? {
            if other.id == newest.id || other.activity_type == "Announce" {
                continue;
            }
            if newest.activity_type == "Delete" || other.activity_type == newest.activity_type {
                self.finalize_superseded(other)?;
            }
        }
        Ok(())
    }

    /// Cancel every pending item matching the key. Used to void an
    /// in-flight outbound Follow on reject/unfollow.
    pub fn supersede_matching(&self, object_id: &str, activity_type: &str) -> Result<u32> {
        let mut count = 0;
        for item in self.repo.pending_for_object(object_id)? {
            if item.activity_type == activity_type {
                self.finalize_superseded(item)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn finalize_superseded(&self, mut item: OutboxItem) -> Result<()> {
        // Cancel before finalizing, so a concurrent timer cannot fire on a
        // record we are about to close out
        if let Some(token) = item.dispatch_token.take() {
            self.scheduler.cancel(&JobToken::from_bytes(token));
        }
        item.status = DeliveryStatus::Published;
        item.offset = 0;
        self.repo.put(&item)?;
        debug!(target: "apub", item = %item.uuid(), "superseded, never delivered");
        Ok(())
    }

    /// Queue the inverse of a published item: Delete for Create, Remove for
    /// Add, an Undo wrapper otherwise. The original item is not touched.
    pub fn undo(&self, item: &OutboxItem) -> Result<OutboxItem> {
        let payload = item.payload();
        let activity = Activity::from_object(Object::from_record(payload)?)?;
        let inverse = activity.inverse()?;
        self.add(item.local_id, inverse, item.visibility)
    }

    /// Operator retry: back to pending, delivery restarted from the first
    /// address.
    pub fn reschedule(&self, id: Uuid) -> Result<OutboxItem> {
        let mut item = self
            .repo
            .find_one(id)?
            .ok_or_else(|| Error::NotFound(format!("no outbox item {id}")))?;
        // A still-armed dispatch must not survive as a second chain
        if let Some(token) = item.dispatch_token.take() {
            self.scheduler.cancel(&JobToken::from_bytes(token));
        }
        item.status = DeliveryStatus::Pending;
        item.offset = 0;
        item.published = Timestamp::now().as_second();
        self.repo.put(&item)?;
        let token = self.scheduler.schedule(
            Job::Dispatch {
                item_id: id,
                batch_size: self.config.federation.batch_size,
                offset: 0,
            },
            Duration::from_millis(self.config.federation.dispatch_delay_ms),
        );
        item.dispatch_token = Some(token.as_bytes());
        self.repo.put(&item)?;
        Ok(item)
    }

    pub(crate) fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Visibility decides the public addressing; explicit recipients set by
    /// the caller are kept in all modes.
    fn address(
        &self,
        activity: &mut Activity,
        local_id: u64,
        visibility: Visibility,
    ) -> Result<()> {
        let followers = format!(
            "{}/users/{}/followers",
            self.config.federation.base_url, local_id
        );
        let object = activity.as_object_mut();
        match visibility {
            Visibility::Public => {
                object.add("to", vocab::PUBLIC_IRI)?;
                object.add("cc", followers)?;
            }
            Visibility::QuietPublic => {
                object.add("to", followers)?;
                object.add("cc", vocab::PUBLIC_IRI)?;
            }
            Visibility::Private | Visibility::Local => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::activity_pub::testing::{test_config, RecordingScheduler};

    use super::*;

    fn outbox() -> (tempfile::TempDir, Outbox<RecordingScheduler>, RecordingScheduler) {
        let tmp_dir = tempfile::tempdir().unwrap();
        let keyspace = fjall::Config::new(tmp_dir.path()).temporary(true).open().unwrap();
        let scheduler = RecordingScheduler::default();
        let outbox = Outbox::new(test_config(), &keyspace, scheduler.clone()).unwrap();
        (tmp_dir, outbox, scheduler)
    }

    fn create_post(object_id: &str) -> Activity {
        Activity::try_from(json!({
            "id": format!("{object_id}/activity"),
            "type": "Create",
            "actor": "https://blog.example/users/5",
            "object": {"id": object_id, "type": "Note", "content": "hello"},
        }))
        .unwrap()
    }

    #[test]
    fn newer_item_supersedes_older_same_key() {
        let (_tmp, outbox, scheduler) = outbox();
        let first = outbox
            .add(5, create_post("https://blog.example/posts/42"), Visibility::Public)
            .unwrap();
        let second = outbox
            .add(5, create_post("https://blog.example/posts/42"), Visibility::Public)
            .unwrap();

        let first = outbox.find_one(first.uuid()).unwrap().unwrap();
        let second = outbox.find_one(second.uuid()).unwrap().unwrap();
        assert_eq!(first.status, DeliveryStatus::Published);
        assert_eq!(first.offset, 0);
        assert!(first.dispatch_token.is_none());
        assert_eq!(second.status, DeliveryStatus::Pending);
        assert_eq!(scheduler.cancelled(), 1);
    }

    #[test]
    fn pending_is_unique_per_object_and_type() {
        let (_tmp, outbox, _scheduler) = outbox();
        for _ in 0..3 {
            outbox
                .add(5, create_post("https://blog.example/posts/7"), Visibility::Public)
                .unwrap();
        }
        let pending = outbox
            .repo()
            .pending_for_object("https://blog.example/posts/7")
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn delete_supersedes_across_types() {
        let (_tmp, outbox, _scheduler) = outbox();
        let create = outbox
            .add(5, create_post("https://blog.example/posts/9"), Visibility::Public)
            .unwrap();
        let delete = Activity::try_from(json!({
            "id": "https://blog.example/act/del",
            "type": "Delete",
            "actor": "https://blog.example/users/5",
            "object": "https://blog.example/posts/9",
        }))
        .unwrap();
        outbox.add(5, delete, Visibility::Public).unwrap();
        let create = outbox.find_one(create.uuid()).unwrap().unwrap();
        assert_eq!(create.status, DeliveryStatus::Published);
    }

    #[test]
    fn announce_is_exempt_from_supersession() {
        let (_tmp, outbox, _scheduler) = outbox();
        let announce = |n: u32| {
            Activity::try_from(json!({
                "id": format!("https://blog.example/act/announce/{n}"),
                "type": "Announce",
                "actor": "https://blog.example/users/0",
                "object": "https://blog.example/posts/42",
            }))
            .unwrap()
        };
        outbox.add(0, announce(1), Visibility::Public).unwrap();
        outbox.add(0, announce(2), Visibility::Public).unwrap();
        let pending = outbox
            .repo()
            .pending_for_object("https://blog.example/posts/42")
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn missing_activity_id_is_backfilled_from_item_iri() {
        let (_tmp, outbox, _scheduler) = outbox();
        let mut object = Object::new("Follow");
        object.set("actor", "https://blog.example/users/5").unwrap();
        object.set("object", "https://remote.example/users/a").unwrap();
        let activity = Activity::from_object(object).unwrap();

        let item = outbox.add(5, activity, Visibility::Private).unwrap();
        let payload = item.payload();
        let id = payload["id"].as_str().unwrap();
        assert_eq!(id, outbox.item_iri(5, item.uuid()));
        assert_eq!(outbox.parse_item_iri(id), Some(item.uuid()));
    }

    #[test]
    fn local_items_publish_without_scheduling() {
        let (_tmp, outbox, scheduler) = outbox();
        let item = outbox
            .add(5, create_post("https://blog.example/posts/80"), Visibility::Local)
            .unwrap();
        assert_eq!(item.status, DeliveryStatus::Published);
        assert!(scheduler.scheduled().is_empty());
    }

    #[test]
    fn public_addressing_is_applied() {
        let (_tmp, outbox, _scheduler) = outbox();
        let item = outbox
            .add(5, create_post("https://blog.example/posts/81"), Visibility::Public)
            .unwrap();
        let payload = item.payload();
        assert_eq!(payload["to"], json!([vocab::PUBLIC_IRI]));
        assert_eq!(
            payload["cc"],
            json!(["https://blog.example/users/5/followers"])
        );
    }

    #[test]
    fn undo_of_create_queues_a_delete() {
        let (_tmp, outbox, _scheduler) = outbox();
        let item = outbox
            .add(5, create_post("https://blog.example/posts/82"), Visibility::Public)
            .unwrap();
        let undo = outbox.undo(&item).unwrap();
        assert_eq!(undo.activity_type, "Delete");
        assert_eq!(undo.object_id, "https://blog.example/posts/82");
        // the delete supersedes the original pending create
        let item = outbox.find_one(item.uuid()).unwrap().unwrap();
        assert_eq!(item.status, DeliveryStatus::Published);
    }

    #[test]
    fn reschedule_cancels_a_still_armed_dispatch() {
        let (_tmp, outbox, scheduler) = outbox();
        let item = outbox
            .add(5, create_post("https://blog.example/posts/84"), Visibility::Public)
            .unwrap();
        assert_eq!(scheduler.cancelled(), 0);

        let item = outbox.reschedule(item.uuid()).unwrap();
        assert_eq!(scheduler.cancelled(), 1, "the armed timer must not survive");
        assert_eq!(scheduler.scheduled().len(), 2);
        assert!(item.dispatch_token.is_some());
    }

    #[test]
    fn reschedule_restarts_from_offset_zero() {
        let (_tmp, outbox, scheduler) = outbox();
        let mut item = outbox
            .add(5, create_post("https://blog.example/posts/83"), Visibility::Public)
            .unwrap();
        item.status = DeliveryStatus::Published;
        item.offset = 17;
        outbox.repo().put(&item).unwrap();

        let item = outbox.reschedule(item.uuid()).unwrap();
        assert_eq!(item.status, DeliveryStatus::Pending);
        assert_eq!(item.offset, 0);
        assert_eq!(scheduler.scheduled().len(), 2);
    }
}
