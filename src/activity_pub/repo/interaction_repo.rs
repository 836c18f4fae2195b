use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use minicbor::{Decode, Encode};
use serde_json::Value;
use tracing::debug;

use crate::activity_pub::model::Object;
use crate::activity_pub::object_serde::{decode_record, encode_record};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum InteractionKind {
    #[n(0)]
    Reply,
    #[n(1)]
    Repost,
}

/// A remote interaction with a local object: a reply or a repost. These are
/// the records cascading actor deletion and inbound Delete operate on.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct InteractionRecord {
    /// Id of the remote object (reply) or announcing activity (repost).
    #[n(0)]
    pub iri: String,
    #[n(1)]
    pub kind: InteractionKind,
    #[n(2)]
    pub actor_iri: String,
    #[n(3)]
    pub local_object_iri: String,
    /// Sanitized HTML; empty for reposts.
    #[n(4)]
    pub content: String,
    #[n(5)]
    pub published: i64,
}

#[derive(Clone)]
pub(crate) struct InteractionRepo {
    interactions: PartitionHandle,
}

impl InteractionRepo {
    pub(crate) fn new(keyspace: &Keyspace) -> Result<InteractionRepo> {
        let interactions =
            keyspace.open_partition("interactions", PartitionCreateOptions::default())?;
        Ok(InteractionRepo { interactions })
    }

    pub(crate) fn insert(&self, record: &InteractionRecord) -> Result<()> {
        let bytes = encode_record(record)?;
        self.interactions.insert(&record.iri, bytes)?;
        Ok(())
    }

    pub(crate) fn find_one(&self, iri: &str) -> Result<Option<InteractionRecord>> {
        if let Some(bytes) = self.interactions.get(iri)? {
            return Ok(Some(decode_record(&bytes)?));
        }
        Ok(None)
    }

    pub(crate) fn remove(&self, iri: &str) -> Result<()> {
        self.interactions.remove(iri)?;
        Ok(())
    }

    pub(crate) fn all(&self) -> Result<Vec<InteractionRecord>> {
        let mut result = vec![];
        for bytes in self.interactions.values() {
            result.push(decode_record(&bytes?)?);
        }
        Ok(result)
    }

    /// Cascading deletion of everything attributed to one remote actor.
    pub(crate) fn purge_actor(&self, actor_iri: &str) -> Result<u64> {
        let mut purged = 0;
        for record in self.all()? {
            if record.actor_iri == actor_iri {
                self.remove(&record.iri)?;
                purged += 1;
            }
        }
        debug!(target: "apub", actor_iri, purged, "purged interactions");
        Ok(purged)
    }

    /// Record a reply to a local object on behalf of the content layer. The
    /// HTML body is sanitized before it is persisted.
    pub(crate) fn record_reply(
        &self,
        object: &Object,
        actor_iri: &str,
        local_object_iri: &str,
        now: i64,
    ) -> Result<()> {
        let iri = object
            .id()
            .ok_or_else(|| Error::Validation("reply must have an id".into()))?;
        let content = object
            .get("content")?
            .and_then(Value::as_str)
            .map(|html| ammonia::clean(html))
            .unwrap_or_default();
        self.insert(&InteractionRecord {
            iri: iri.to_owned(),
            kind: InteractionKind::Reply,
            actor_iri: actor_iri.to_owned(),
            local_object_iri: local_object_iri.to_owned(),
            content,
            published: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use crate::activity_pub::model::Object;
    use crate::error::Result;

    use super::{InteractionKind, InteractionRecord, InteractionRepo};

    #[test]
    fn reply_content_is_sanitized() -> Result<()> {
        let tmp_dir = tempdir().unwrap();
        let keyspace = fjall::Config::new(tmp_dir.path()).temporary(true).open()?;
        let repo = InteractionRepo::new(&keyspace)?;
        let reply = Object::from_record(json!({
            "id": "https://remote.example/notes/9",
            "type": "Note",
            "content": "<p>nice post</p><script>alert(1)</script>",
        }))?;
        repo.record_reply(
            &reply,
            "https://remote.example/users/a",
            "https://blog.example/posts/42",
            7,
        )?;
        let stored = repo.find_one("https://remote.example/notes/9")?.unwrap();
        assert!(stored.content.contains("nice post"));
        assert!(!stored.content.contains("script"));
        assert_eq!(stored.kind, InteractionKind::Reply);
        Ok(())
    }

    #[test]
    fn purge_removes_only_one_actors_records() -> Result<()> {
        let tmp_dir = tempdir().unwrap();
        let keyspace = fjall::Config::new(tmp_dir.path()).temporary(true).open()?;
        let repo = InteractionRepo::new(&keyspace)?;
        for (iri, actor) in [
            ("https://remote.example/notes/1", "https://remote.example/users/a"),
            ("https://remote.example/notes/2", "https://remote.example/users/a"),
            ("https://other.example/notes/3", "https://other.example/users/b"),
        ] {
            repo.insert(&InteractionRecord {
                iri: iri.to_owned(),
                kind: InteractionKind::Reply,
                actor_iri: actor.to_owned(),
                local_object_iri: "https://blog.example/posts/42".to_owned(),
                content: String::new(),
                published: 0,
            })?;
        }
        assert_eq!(repo.purge_actor("https://remote.example/users/a")?, 2);
        assert_eq!(repo.all()?.len(), 1);
        Ok(())
    }
}
