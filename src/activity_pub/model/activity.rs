//! Activity view over [`Object`] with the protocol's derived attributes.

use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};

use super::object::{Object, node_iri};
use super::vocab;

const TITLE_GRAPHEMES: usize = 60;

/// A typed action with an actor and an object. The `object` field may hold
/// an embedded object map, a bare IRI string, or another activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity(Object);

impl TryFrom<Value> for Activity {
    type Error = Error;

    /// Inbound contract: any accepted payload carries `id`, `type`, `actor`
    /// and `object`.
    fn try_from(value: Value) -> Result<Activity> {
        let object = Object::from_record(value)?;
        if object.id().is_none() {
            return Err(Error::Validation("activity must have an id".into()));
        }
        if object.kind().is_none() {
            return Err(Error::Validation("activity must have a type".into()));
        }
        if object.get_node_iri("actor").is_none() {
            return Err(Error::Validation("activity must have an actor".into()));
        }
        if object.get("object")?.is_none() {
            return Err(Error::Validation("activity must have an object".into()));
        }
        Ok(Activity(object))
    }
}

impl From<Activity> for Object {
    fn from(value: Activity) -> Self {
        value.0
    }
}

impl Activity {
    /// Programmatic construction; outbound activities may still lack an id
    /// here, it is backfilled from the outbox item's permanent address.
    pub fn from_object(object: Object) -> Result<Activity> {
        match object.kind() {
            Some(kind) if vocab::is_activity_type(kind) => Ok(Activity(object)),
            Some(kind) => Err(Error::Validation(format!("{kind} is not an activity type"))),
            None => Err(Error::Validation("activity must have a type".into())),
        }
    }

    pub fn as_object(&self) -> &Object {
        &self.0
    }

    pub fn as_object_mut(&mut self) -> &mut Object {
        &mut self.0
    }

    pub fn kind(&self) -> &str {
        self.0.kind().unwrap_or_default()
    }

    pub fn id(&self) -> Option<&str> {
        self.0.id()
    }

    pub fn actor_iri(&self) -> Option<&str> {
        self.0.get_node_iri("actor")
    }

    pub fn object_value(&self) -> Option<&Value> {
        self.0.get("object").ok().flatten()
    }

    pub fn object_iri(&self) -> Option<&str> {
        self.0.get_node_iri("object")
    }

    /// The embedded object, if `object` holds a map.
    pub fn embedded_object(&self) -> Option<Object> {
        match self.object_value() {
            Some(value @ Value::Object(_)) => Object::from_record(value.clone()).ok(),
            _ => None,
        }
    }

    /// Backfill a missing id in place. Returns whether anything changed.
    pub fn ensure_id(&mut self, iri: &str) -> bool {
        if self.0.id().is_some() {
            return false;
        }
        // "id" is declared, this cannot fail
        let _ = self.0.set("id", iri);
        true
    }

    /// Canonical object id used for supersession matching: the id of the
    /// activity's object, recursing through nested activities that carry no
    /// id of their own, falling back to the activity's own id, then its
    /// actor.
    pub fn object_id(&self) -> Option<String> {
        if let Some(value) = self.object_value() {
            if let Some(id) = canonical_object_id(value) {
                return Some(id.to_owned());
            }
        }
        self.id().or_else(|| self.actor_iri()).map(str::to_owned)
    }

    /// The outbound inverse used by undo: a deletion voids a creation, a
    /// removal voids an addition, everything else is wrapped in Undo.
    pub fn inverse(&self) -> Result<Activity> {
        let actor = self
            .actor_iri()
            .ok_or_else(|| Error::Validation("activity must have an actor".into()))?
            .to_owned();
        let mut inverse = match self.kind() {
            "Create" => {
                let mut object = Object::new("Delete");
                object.set("object", self.object_id())?;
                object
            }
            "Add" => {
                let mut object = Object::new("Remove");
                object.set("object", self.object_value().cloned())?;
                if let Some(target) = self.0.get("target")? {
                    let target = target.clone();
                    object.set("target", target)?;
                }
                object
            }
            _ => {
                let mut object = Object::new("Undo");
                object.set("object", self.0.to_record(false))?;
                object
            }
        };
        inverse.set("actor", actor)?;
        for addressing in ["to", "cc"] {
            if let Some(value) = self.0.get(addressing)? {
                let value = value.clone();
                inverse.set(addressing, value)?;
            }
        }
        Activity::from_object(inverse)
    }

    /// Human readable title for the queued item, taken from the embedded
    /// object's name, summary or content with markup stripped.
    pub fn title(&self) -> String {
        let text = self
            .embedded_object()
            .and_then(|object| {
                ["name", "summary", "content"]
                    .iter()
                    .find_map(|key| object.get_str(key).map(str::to_owned))
            })
            .map(|html| ammonia::Builder::empty().clean(&html).to_string());
        match text {
            Some(text) if !text.trim().is_empty() => truncate(text.trim()),
            _ => format!("{} {}", self.kind(), self.object_id().unwrap_or_default()),
        }
    }

    /// JSON-LD rendering delivered to inboxes and persisted on the item.
    pub fn to_payload(&self) -> Value {
        self.0.to_record(true)
    }
}

fn canonical_object_id(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => {
            if let Some(id) = map.get("id").and_then(Value::as_str) {
                return Some(id);
            }
            // nested activity without an id of its own
            let ty = map.get("type").and_then(Value::as_str)?;
            if vocab::is_activity_type(ty) {
                return canonical_object_id(map.get("object")?);
            }
            None
        }
        other => node_iri(other),
    }
}

fn truncate(text: &str) -> String {
    let mut graphemes = text.graphemes(true);
    let title: String = graphemes.by_ref().take(TITLE_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        format!("{title}…")
    } else {
        title
    }
}
