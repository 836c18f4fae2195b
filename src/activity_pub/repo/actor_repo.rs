use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::debug;

use crate::activity_pub::model::RemoteActor;
use crate::activity_pub::object_serde::{decode_record, encode_record};
use crate::error::Result;

/// Remote actor records, keyed by actor IRI.
#[derive(Clone)]
pub(crate) struct ActorRepo {
    actors: PartitionHandle,
}

impl ActorRepo {
    pub(crate) fn new(keyspace: &Keyspace) -> Result<ActorRepo> {
        let actors =
            keyspace.open_partition("remote_actors", PartitionCreateOptions::default())?;
        Ok(ActorRepo { actors })
    }

    pub(crate) fn insert(&self, actor: &RemoteActor) -> Result<()> {
        let bytes = encode_record(actor)?;
        self.actors.insert(&actor.iri, bytes)?;
        Ok(())
    }

    pub(crate) fn find_one(&self, iri: &str) -> Result<Option<RemoteActor>> {
        if let Some(bytes) = self.actors.get(iri)? {
            return Ok(Some(decode_record(&bytes)?));
        }
        Ok(None)
    }

    pub(crate) fn remove(&self, iri: &str) -> Result<()> {
        self.actors.remove(iri)?;
        Ok(())
    }

    pub(crate) fn all(&self) -> Result<Vec<RemoteActor>> {
        let mut result = vec![];
        for bytes in self.actors.values() {
            result.push(decode_record(&bytes?)?);
        }
        Ok(result)
    }

    pub(crate) fn find_by_handle(
        &self,
        username: &str,
        host: &str,
    ) -> Result<Option<RemoteActor>> {
        for actor in self.all()? {
            let host_matches = actor
                .iri
                .split_once("://")
                .map(|(_, rest)| rest.split('/').next() == Some(host))
                .unwrap_or(false);
            if host_matches && actor.preferred_username.as_deref() == Some(username) {
                return Ok(Some(actor));
            }
        }
        Ok(None)
    }

    /// Attribute a failed delivery to every cached actor reachable through
    /// the inbox address. A shared inbox charges the whole server's actors.
    pub(crate) fn log_delivery_failure(&self, inbox: &str, message: &str) -> Result<()> {
        for mut actor in self.all()? {
            if actor.effective_inbox() == inbox {
                debug!(target: "apub", iri = %actor.iri, inbox, "recording delivery failure");
                actor.record_error(message.to_owned());
                self.insert(&actor)?;
            }
        }
        Ok(())
    }

    /// Candidates for administrative pruning.
    pub(crate) fn find_faulty(&self, threshold: u64) -> Result<Vec<RemoteActor>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|actor| actor.error_count >= threshold)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use crate::activity_pub::model::RemoteActor;
    use crate::error::Result;

    use super::ActorRepo;

    #[test]
    fn insert_then_find() -> Result<()> {
        let tmp_dir = tempdir().unwrap();
        let keyspace = fjall::Config::new(tmp_dir.path()).temporary(true).open()?;
        let repo = ActorRepo::new(&keyspace)?;
        let actor = RemoteActor::from_payload(
            &json!({
                "id": "https://remote.example/users/a",
                "type": "Person",
                "preferredUsername": "ayumi",
                "name": "あゆみ",
                "inbox": "https://remote.example/users/a/inbox",
            }),
            1,
        )?;
        repo.insert(&actor)?;
        assert_eq!(repo.find_one("https://remote.example/users/a")?, Some(actor));
        assert_eq!(repo.find_one("https://remote.example/users/b")?, None);
        Ok(())
    }

    #[test]
    fn handle_lookup_and_faulty_query() -> Result<()> {
        let tmp_dir = tempdir().unwrap();
        let keyspace = fjall::Config::new(tmp_dir.path()).temporary(true).open()?;
        let repo = ActorRepo::new(&keyspace)?;
        let actor = RemoteActor::from_payload(
            &json!({
                "id": "https://remote.example/users/a",
                "type": "Person",
                "preferredUsername": "ayumi",
                "inbox": "https://remote.example/users/a/inbox",
            }),
            1,
        )?;
        repo.insert(&actor)?;

        let found = repo.find_by_handle("ayumi", "remote.example")?;
        assert_eq!(found.as_ref().map(|a| a.iri.as_str()),
            Some("https://remote.example/users/a"));
        assert!(repo.find_by_handle("ayumi", "other.example")?.is_none());

        for _ in 0..5 {
            repo.log_delivery_failure("https://remote.example/users/a/inbox", "504")?;
        }
        assert_eq!(repo.find_faulty(5)?.len(), 1);
        assert!(repo.find_faulty(6)?.is_empty());
        Ok(())
    }
}
