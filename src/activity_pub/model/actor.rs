//! Federated identities: config-derived local actors and cached remote
//! actor records.

use minicbor::{Decode, Encode};
use serde_json::{Value, json};

use crate::config::{BlogConfig, Config, UserConfig};
use crate::error::{Error, Result};

use super::object::node_iri;
use super::vocab::is_actor_type;

/// Local id reserved for the aggregate blog actor in dual-actor mode.
pub const BLOG_ACTOR_ID: u64 = 0;

/// How many delivery errors a remote actor record remembers.
const ERROR_LOG_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum ActorKind {
    #[n(0)]
    Person,
    #[n(1)]
    Blog,
}

/// A local identity, derived on demand from host configuration. Never
/// persisted as a federation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalActor {
    pub id: u64,
    pub username: String,
    pub name: String,
    pub summary: Option<String>,
    pub icon: Option<String>,
    pub kind: ActorKind,
}

impl LocalActor {
    pub fn from_user(user: &UserConfig) -> LocalActor {
        LocalActor {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            summary: user.summary.clone(),
            icon: user.icon.clone(),
            kind: ActorKind::Person,
        }
    }

    pub fn from_blog(blog: &BlogConfig) -> LocalActor {
        LocalActor {
            id: BLOG_ACTOR_ID,
            username: blog.username.clone(),
            name: blog.name.clone(),
            summary: blog.summary.clone(),
            icon: blog.icon.clone(),
            kind: ActorKind::Blog,
        }
    }

    pub fn iri(&self, config: &Config) -> String {
        format!("{}/users/{}", config.federation.base_url, self.id)
    }

    pub fn followers_iri(&self, config: &Config) -> String {
        format!("{}/followers", self.iri(config))
    }

    /// The actor document served to remote peers.
    pub fn to_record(&self, config: &Config) -> Value {
        let iri = self.iri(config);
        let ty = match self.kind {
            ActorKind::Person => "Person",
            ActorKind::Blog => "Group",
        };
        let mut record = json!({
            "type": ty,
            "id": iri,
            "preferredUsername": self.username,
            "name": self.name,
            "inbox": format!("{iri}/inbox"),
            "outbox": format!("{iri}/outbox"),
            "followers": format!("{iri}/followers"),
            "following": format!("{iri}/following"),
        });
        let map = record.as_object_mut().expect("record is an object");
        if let Some(summary) = &self.summary {
            map.insert("summary".to_owned(), json!(summary));
        }
        if let Some(icon) = &self.icon {
            map.insert(
                "icon".to_owned(),
                json!({"type": "Image", "url": icon}),
            );
        }
        record
    }
}

/// Tri-state following relationship between a local actor and a remote one.
/// Pending and accepted are mutually exclusive per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowingState {
    Absent,
    Pending,
    Accepted,
}

/// Persisted remote actor, keyed by IRI. Carries the relationship edge sets
/// and a denormalized inbox for fast fan-out.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct RemoteActor {
    #[n(0)]
    pub iri: String,
    #[n(1)]
    pub kind: String,
    #[n(2)]
    pub preferred_username: Option<String>,
    #[n(3)]
    pub name: Option<String>,
    #[n(4)]
    pub summary: Option<String>,
    #[n(5)]
    pub icon: Option<String>,
    #[n(6)]
    pub inbox: String,
    #[n(7)]
    pub shared_inbox: Option<String>,
    #[n(8)]
    pub public_key_pem: Option<String>,
    #[n(9)]
    pub also_known_as: Vec<String>,
    #[n(10)]
    pub moved_to: Option<String>,
    #[n(11)]
    pub created_at: i64,
    #[n(12)]
    pub updated_at: i64,
    /// Local ids this remote actor follows.
    #[n(13)]
    pub followers: Vec<u64>,
    /// Local ids with an unanswered outbound Follow to this actor.
    #[n(14)]
    pub following_pending: Vec<u64>,
    /// Local ids whose outbound Follow this actor accepted.
    #[n(15)]
    pub following_accepted: Vec<u64>,
    #[n(16)]
    pub error_count: u64,
    #[n(17)]
    pub errors: Vec<String>,
}

impl RemoteActor {
    /// Validate a fetched actor document. Requires a stable `id` and at
    /// least one deliverable inbox; a shared inbox is preferred for fan-out.
    pub fn from_payload(payload: &Value, now: i64) -> Result<RemoteActor> {
        let iri = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("actor must have a stable id".into()))?;
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("Person");
        if payload.get("type").is_some() && !is_actor_type(kind) {
            return Err(Error::Validation(format!("{kind} is not an actor type")));
        }
        let inbox = payload.get("inbox").and_then(Value::as_str);
        let shared_inbox = payload
            .get("endpoints")
            .and_then(|endpoints| endpoints.get("sharedInbox"))
            .and_then(Value::as_str);
        let Some(inbox) = inbox.or(shared_inbox) else {
            return Err(Error::Validation(format!("actor {iri} has no inbox")));
        };
        Ok(RemoteActor {
            iri: iri.to_owned(),
            kind: kind.to_owned(),
            preferred_username: str_prop(payload, "preferredUsername"),
            name: str_prop(payload, "name"),
            summary: str_prop(payload, "summary"),
            icon: payload.get("icon").and_then(node_iri_or_url).map(str::to_owned),
            inbox: inbox.to_owned(),
            shared_inbox: shared_inbox.map(str::to_owned),
            public_key_pem: payload
                .get("publicKey")
                .and_then(|key| key.get("publicKeyPem"))
                .and_then(Value::as_str)
                .map(str::to_owned),
            also_known_as: str_array_prop(payload, "alsoKnownAs"),
            moved_to: payload.get("movedTo").and_then(node_iri).map(str::to_owned),
            created_at: now,
            updated_at: now,
            followers: vec![],
            following_pending: vec![],
            following_accepted: vec![],
            error_count: 0,
            errors: vec![],
        })
    }

    /// Shared inbox when the remote server has one, else the personal one.
    pub fn effective_inbox(&self) -> &str {
        self.shared_inbox.as_deref().unwrap_or(&self.inbox)
    }

    /// Overwrite profile fields from a re-fetched document, preserving the
    /// creation timestamp, relationship edges and error log.
    pub fn apply_profile(&mut self, fresh: RemoteActor) {
        self.kind = fresh.kind;
        self.preferred_username = fresh.preferred_username;
        self.name = fresh.name;
        self.summary = fresh.summary;
        self.icon = fresh.icon;
        self.inbox = fresh.inbox;
        self.shared_inbox = fresh.shared_inbox;
        self.public_key_pem = fresh.public_key_pem;
        self.also_known_as = fresh.also_known_as;
        self.moved_to = fresh.moved_to;
        self.updated_at = fresh.updated_at;
    }

    pub fn following_state(&self, local_id: u64) -> FollowingState {
        if self.following_accepted.contains(&local_id) {
            FollowingState::Accepted
        } else if self.following_pending.contains(&local_id) {
            FollowingState::Pending
        } else {
            FollowingState::Absent
        }
    }

    /// Pending is only entered from absent; the call is idempotent in every
    /// other state.
    pub fn set_following_pending(&mut self, local_id: u64) {
        if self.following_state(local_id) == FollowingState::Absent {
            self.following_pending.push(local_id);
        }
    }

    /// Accepted requires pending. Returns whether the transition happened.
    pub fn set_following_accepted(&mut self, local_id: u64) -> bool {
        if self.following_state(local_id) != FollowingState::Pending {
            return false;
        }
        self.following_pending.retain(|id| *id != local_id);
        self.following_accepted.push(local_id);
        true
    }

    /// Back to absent, no prior state asserted.
    pub fn clear_following(&mut self, local_id: u64) {
        self.following_pending.retain(|id| *id != local_id);
        self.following_accepted.retain(|id| *id != local_id);
    }

    pub fn add_follower(&mut self, local_id: u64) -> bool {
        if self.followers.contains(&local_id) {
            return false;
        }
        self.followers.push(local_id);
        true
    }

    pub fn remove_follower(&mut self, local_id: u64) -> bool {
        let before = self.followers.len();
        self.followers.retain(|id| *id != local_id);
        self.followers.len() != before
    }

    pub fn record_error(&mut self, message: String) {
        self.error_count += 1;
        self.errors.push(message);
        if self.errors.len() > ERROR_LOG_CAP {
            self.errors.remove(0);
        }
    }
}

fn str_prop(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn str_array_prop(payload: &Value, key: &str) -> Vec<String> {
    match payload.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(array)) => array
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => vec![],
    }
}

/// Icons show up as bare IRIs, Image objects with `url`, or arrays.
fn node_iri_or_url(value: &Value) -> Option<&str> {
    if let Some(url) = value.get("url").and_then(Value::as_str) {
        return Some(url);
    }
    node_iri(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::UserConfig;
    use crate::error::Error;

    use super::{Config, FollowingState, LocalActor, RemoteActor};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.federation.base_url = "https://blog.example".to_owned();
        config
    }

    #[test]
    fn local_actor_record_carries_collection_iris() {
        let user = UserConfig {
            id: 5,
            username: "alice".to_owned(),
            name: "Alice".to_owned(),
            summary: None,
            icon: None,
        };
        let actor = LocalActor::from_user(&user);
        let config = test_config();
        let record = actor.to_record(&config);
        assert_eq!(record["id"], "https://blog.example/users/5");
        assert_eq!(record["inbox"], "https://blog.example/users/5/inbox");
        assert_eq!(
            record["followers"],
            "https://blog.example/users/5/followers"
        );
        assert_eq!(record["type"], "Person");
    }

    #[test]
    fn payload_without_inbox_is_rejected() {
        let result = RemoteActor::from_payload(
            &json!({"id": "https://remote.example/users/a", "type": "Person"}),
            0,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn shared_inbox_is_preferred() {
        let actor = RemoteActor::from_payload(
            &json!({
                "id": "https://remote.example/users/a",
                "type": "Person",
                "inbox": "https://remote.example/users/a/inbox",
                "endpoints": {"sharedInbox": "https://remote.example/inbox"},
            }),
            0,
        )
        .unwrap();
        assert_eq!(actor.effective_inbox(), "https://remote.example/inbox");
    }

    #[test]
    fn pending_and_accepted_are_mutually_exclusive() {
        let mut actor = RemoteActor::from_payload(
            &json!({
                "id": "https://remote.example/users/a",
                "inbox": "https://remote.example/users/a/inbox",
            }),
            0,
        )
        .unwrap();
        assert_eq!(actor.following_state(5), FollowingState::Absent);
        // accept without pending is refused
        assert!(!actor.set_following_accepted(5));
        actor.set_following_pending(5);
        actor.set_following_pending(5);
        assert_eq!(actor.following_pending, vec![5]);
        assert!(actor.set_following_accepted(5));
        assert_eq!(actor.following_state(5), FollowingState::Accepted);
        assert!(actor.following_pending.is_empty());
        actor.clear_following(5);
        assert_eq!(actor.following_state(5), FollowingState::Absent);
    }

    #[test]
    fn profile_refresh_preserves_edges_and_creation_time() {
        let payload = json!({
            "id": "https://remote.example/users/a",
            "type": "Person",
            "inbox": "https://remote.example/users/a/inbox",
        });
        let mut actor = RemoteActor::from_payload(&payload, 100).unwrap();
        actor.add_follower(5);
        actor.record_error("timeout".to_owned());

        let fresh = RemoteActor::from_payload(
            &json!({
                "id": "https://remote.example/users/a",
                "type": "Person",
                "name": "Renamed",
                "inbox": "https://remote.example/users/a/inbox",
            }),
            200,
        )
        .unwrap();
        actor.apply_profile(fresh);
        assert_eq!(actor.name.as_deref(), Some("Renamed"));
        assert_eq!(actor.created_at, 100);
        assert_eq!(actor.updated_at, 200);
        assert_eq!(actor.followers, vec![5]);
        assert_eq!(actor.error_count, 1);
    }
}
