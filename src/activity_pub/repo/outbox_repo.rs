use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode, UserKey};
use minicbor::{Decode, Encode};
use serde_json::Value;
use uuid::Uuid;

use crate::activity_pub::model::ActorKind;
use crate::activity_pub::object_serde::{NodeValue, decode_record, encode_record};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum DeliveryStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum Visibility {
    #[n(0)]
    Public,
    /// Addressed to followers, public only in cc.
    #[n(1)]
    QuietPublic,
    /// Delivered only to the explicit recipients.
    #[n(2)]
    Private,
    /// Never federated.
    #[n(3)]
    Local,
}

/// A queued outgoing activity owned by a local actor. Append-only history;
/// only status, offset, id backfill and the dispatch token mutate in place.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct OutboxItem {
    #[n(0)]
    pub id: [u8; 16],
    #[n(1)]
    pub local_id: u64,
    #[n(2)]
    pub status: DeliveryStatus,
    #[n(3)]
    pub visibility: Visibility,
    /// Canonical object id used for supersession matching.
    #[n(4)]
    pub object_id: String,
    #[n(5)]
    pub activity_type: String,
    #[n(6)]
    pub actor_kind: ActorKind,
    #[n(7)]
    pub title: String,
    /// Delivery progress, counted in inbox addresses.
    #[n(8)]
    pub offset: u32,
    #[n(9)]
    pub published: i64,
    #[n(10)]
    pub(crate) payload: NodeValue,
    /// Scheduler handle for the armed dispatch, used for cancellation.
    #[n(11)]
    pub dispatch_token: Option<[u8; 16]>,
}

impl OutboxItem {
    pub fn uuid(&self) -> Uuid {
        Uuid::from_bytes(self.id)
    }

    /// Wire payload of this item as plain JSON.
    pub fn payload(&self) -> Value {
        Value::from(self.payload.clone())
    }
}

/// Outbox items keyed by uuid-v7, with a secondary index over still-pending
/// items keyed by canonical object id.
#[derive(Clone)]
pub(crate) struct OutboxRepo {
    keyspace: Keyspace,
    items: PartitionHandle,
    pending_index: PartitionHandle,
}

impl OutboxRepo {
    pub(crate) fn new(keyspace: &Keyspace) -> Result<OutboxRepo> {
        let options = PartitionCreateOptions::default();
        let items = keyspace.open_partition("outbox_items", options.clone())?;
        let pending_index = keyspace.open_partition("outbox_pending", options)?;
        Ok(OutboxRepo {
            keyspace: keyspace.clone(),
            items,
            pending_index,
        })
    }

    /// Insert or overwrite an item, keeping the pending index in step within
    /// one atomic batch.
    pub(crate) fn put(&self, item: &OutboxItem) -> Result<()> {
        let bytes = encode_record(item)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.items, item.id, bytes);
        let index_key = pending_key(&item.object_id, item.id);
        match item.status {
            DeliveryStatus::Pending => batch.insert(&self.pending_index, index_key, item.id),
            DeliveryStatus::Published => batch.remove(&self.pending_index, index_key),
        }
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    pub(crate) fn find_one(&self, id: Uuid) -> Result<Option<OutboxItem>> {
        if let Some(bytes) = self.items.get(id.as_bytes())? {
            return Ok(Some(decode_record(&bytes)?));
        }
        Ok(None)
    }

    /// All pending items for one canonical object id.
    pub(crate) fn pending_for_object(&self, object_id: &str) -> Result<Vec<OutboxItem>> {
        let mut prefix = object_id.as_bytes().to_vec();
        prefix.push(b'\n');
        let mut result = vec![];
        for pair in self.pending_index.prefix(prefix) {
            let (_, item_id) = pair?;
            if let Some(bytes) = self.items.get(&item_id)? {
                let item: OutboxItem = decode_record(&bytes)?;
                if item.status == DeliveryStatus::Pending {
                    result.push(item);
                }
            }
        }
        Ok(result)
    }
}

fn pending_key(object_id: &str, item_id: [u8; 16]) -> UserKey {
    let mut key = vec![];
    key.extend_from_slice(object_id.as_bytes());
    key.push(b'\n');
    key.extend_from_slice(&item_id);
    key.into()
}
