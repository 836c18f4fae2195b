//! The declared ActivityStreams vocabulary.
//!
//! Property access on [`super::Object`] is closed over [`DECLARED_PROPS`];
//! everything else rides along in the extension map. The interning table in
//! [`symbol_table`] covers these terms plus the handful of keywords that
//! show up in nearly every federated document.

use std::sync::OnceLock;

use bimap::BiMap;

pub(crate) const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub(crate) const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";
pub(crate) const PUBLIC_IRI: &str = "https://www.w3.org/ns/activitystreams#Public";
pub(crate) const PUBLIC_ALIASES: [&str; 3] = [PUBLIC_IRI, "as:Public", "Public"];

/// Properties from [AS2 vocabulary] that the engine understands.
///
/// [AS2 vocabulary]: https://www.w3.org/TR/activitystreams-vocabulary/
pub(crate) const DECLARED_PROPS: [&str; 35] = [
    "id",
    "type",
    "actor",
    "attachment",
    "attributedTo",
    "audience",
    "bcc",
    "bto",
    "cc",
    "content",
    "context",
    "duration",
    "endTime",
    "generator",
    "icon",
    "image",
    "inReplyTo",
    "instrument",
    "location",
    "mediaType",
    "name",
    "object",
    "origin",
    "preview",
    "published",
    "replies",
    "result",
    "source",
    "startTime",
    "summary",
    "tag",
    "target",
    "to",
    "updated",
    "url",
];

pub(crate) const ACTIVITY_TYPES: [&str; 28] = [
    "Accept",
    "Add",
    "Announce",
    "Arrive",
    "Block",
    "Create",
    "Delete",
    "Dislike",
    "Flag",
    "Follow",
    "Ignore",
    "Invite",
    "Join",
    "Leave",
    "Like",
    "Listen",
    "Move",
    "Offer",
    "Question",
    "Read",
    "Reject",
    "Remove",
    "TentativeAccept",
    "TentativeReject",
    "Travel",
    "Undo",
    "Update",
    "View",
];

pub(crate) const ACTOR_TYPES: [&str; 5] = [
    "Application",
    "Group",
    "Organization",
    "Person",
    "Service",
];

/// Frequent terms outside the closed schema, interned for storage only.
const COMMON_TERMS: [&str; 31] = [
    "@context",
    "@id",
    "@language",
    "@type",
    AS_CONTEXT,
    SECURITY_CONTEXT,
    PUBLIC_IRI,
    "Collection",
    "CollectionPage",
    "Document",
    "Hashtag",
    "Image",
    "Mention",
    "Note",
    "OrderedCollection",
    "OrderedCollectionPage",
    "Tombstone",
    "alsoKnownAs",
    "endpoints",
    "first",
    "followers",
    "following",
    "formerType",
    "href",
    "inbox",
    "manuallyApprovesFollowers",
    "movedTo",
    "outbox",
    "preferredUsername",
    "sensitive",
    "sharedInbox",
];

pub(crate) fn is_declared(key: &str) -> bool {
    DECLARED_PROPS.contains(&key)
}

pub(crate) fn is_activity_type(kind: &str) -> bool {
    ACTIVITY_TYPES.contains(&kind)
}

pub(crate) fn is_actor_type(kind: &str) -> bool {
    ACTOR_TYPES.contains(&kind)
}

pub(crate) fn is_public_iri(iri: &str) -> bool {
    PUBLIC_ALIASES.contains(&iri)
}

/// Table mapping interned terms to stable ids. The id assignment is
/// append-only; reordering any of the arrays above would corrupt stored
/// records.
pub(crate) fn symbol_table() -> &'static BiMap<&'static str, u32> {
    static TABLE: OnceLock<BiMap<&'static str, u32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = BiMap::new();
        let terms = DECLARED_PROPS
            .iter()
            .chain(ACTIVITY_TYPES.iter())
            .chain(ACTOR_TYPES.iter())
            .chain(COMMON_TERMS.iter());
        for (id, term) in terms.enumerate() {
            table.insert(*term, id as u32);
        }
        table
    })
}
