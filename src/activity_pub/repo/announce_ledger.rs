use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::error::Result;

/// Persistent ledger of already-processed Announce payloads, keyed by the
/// embedded activity id. Repeated delivery of a seen id is a no-op even
/// across restarts.
#[derive(Clone)]
pub(crate) struct AnnounceLedger {
    seen: PartitionHandle,
}

impl AnnounceLedger {
    pub(crate) fn new(keyspace: &Keyspace) -> Result<AnnounceLedger> {
        let seen = keyspace.open_partition("announce_seen", PartitionCreateOptions::default())?;
        Ok(AnnounceLedger { seen })
    }

    /// Returns true exactly once per id.
    pub(crate) fn check_and_record(&self, iri: &str, now: i64) -> Result<bool> {
        if self.seen.get(iri)?.is_some() {
            return Ok(false);
        }
        self.seen.insert(iri, now.to_le_bytes())?;
        Ok(true)
    }
}
