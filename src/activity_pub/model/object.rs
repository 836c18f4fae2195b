//! Closed-schema presentation of the Activity Streams core data model.
//!
//! An [`Object`] is a property bag over the declared vocabulary in
//! [`super::vocab`]. Unlike a raw JSON map, reading or writing an undeclared
//! key fails with [`Error::UnknownField`]. Unknown vocabulary arriving in
//! inbound payloads is kept in a separate extension map so it survives a
//! round trip, but it is never reachable through `get`/`set`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::context::context_for;
use super::vocab;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Object {
    props: BTreeMap<String, Value>,
    extension: BTreeMap<String, Value>,
}

impl Object {
    pub fn new(kind: &str) -> Object {
        let mut props = BTreeMap::new();
        props.insert("type".to_owned(), Value::String(kind.to_owned()));
        Object {
            props,
            extension: BTreeMap::new(),
        }
    }

    /// Read a declared field. `Ok(None)` means the field is declared but
    /// absent; an undeclared key is an error.
    pub fn get(&self, key: &str) -> Result<Option<&Value>> {
        if !vocab::is_declared(key) {
            return Err(Error::UnknownField(key.to_owned()));
        }
        Ok(self.props.get(key))
    }

    /// Write a declared field. Null and empty values clear the field, so a
    /// stored object never carries dead weight into serialization.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        if !vocab::is_declared(key) {
            return Err(Error::UnknownField(key.to_owned()));
        }
        let value = prune(value.into());
        match value {
            Some(value) => self.props.insert(key.to_owned(), value),
            None => self.props.remove(key),
        };
        Ok(())
    }

    /// Append to a multi-valued field. A scalar already present is coerced
    /// to a singleton collection first; duplicates by value equality are
    /// dropped.
    pub fn add(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        if !vocab::is_declared(key) {
            return Err(Error::UnknownField(key.to_owned()));
        }
        let Some(value) = prune(value.into()) else {
            return Ok(());
        };
        let mut items = match self.props.remove(key) {
            None => vec![],
            Some(Value::Array(items)) => items,
            Some(scalar) => vec![scalar],
        };
        if !items.contains(&value) {
            items.push(value);
        }
        self.props.insert(key.to_owned(), Value::Array(items));
        Ok(())
    }

    /// First string of the `type` field.
    pub fn kind(&self) -> Option<&str> {
        match self.props.get("type") {
            Some(Value::String(ty)) => Some(ty),
            Some(Value::Array(types)) => types.iter().find_map(Value::as_str),
            _ => None,
        }
    }

    pub fn type_is(&self, ty: &str) -> bool {
        match self.props.get("type") {
            Some(Value::String(object_type)) => object_type == ty,
            Some(Value::Array(types)) => types.iter().any(|v| v.as_str() == Some(ty)),
            _ => false,
        }
    }

    pub fn is_activity(&self) -> bool {
        self.kind().is_some_and(vocab::is_activity_type)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str)
    }

    /// A node reference can be a bare IRI, an embedded object (use its id),
    /// or an array of either (use the first IRI).
    pub fn get_node_iri(&self, key: &str) -> Option<&str> {
        node_iri(self.props.get(key)?)
    }

    pub fn get_str_array(&self, key: &str) -> Option<Vec<&str>> {
        match self.props.get(key)? {
            Value::String(s) => Some(vec![s]),
            Value::Array(array) => Some(array.iter().filter_map(Value::as_str).collect()),
            _ => None,
        }
    }

    /// Flatten into a plain JSON map, prepending the type's JSON-LD context
    /// when requested. The context is always regenerated, never stored.
    pub fn to_record(&self, include_context: bool) -> Value {
        let mut map = Map::new();
        if include_context {
            map.insert("@context".to_owned(), context_for(self.kind()));
        }
        for (key, value) in &self.props {
            map.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.extension {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Inverse of [`Object::to_record`]. Lossy only with respect to the
    /// context. Undeclared keys land in the extension map.
    pub fn from_record(value: Value) -> Result<Object> {
        let Value::Object(map) = value else {
            return Err(Error::Validation("record must be a JSON object".into()));
        };
        let mut object = Object::default();
        for (key, value) in map {
            if key == "@context" {
                continue;
            }
            let Some(value) = prune(value) else {
                continue;
            };
            if vocab::is_declared(&key) {
                object.props.insert(key, value);
            } else {
                object.extension.insert(key, value);
            }
        }
        Ok(object)
    }
}

pub(crate) fn node_iri(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        Value::Array(array) => array.iter().find_map(Value::as_str),
        _ => None,
    }
}

/// Drop null and empty values, recursively inside maps and arrays.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(prune).collect();
            if items.is_empty() {
                None
            } else {
                Some(Value::Array(items))
            }
        }
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| Some((k, prune(v)?)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::Error;

    use super::Object;

    #[test]
    fn undeclared_key_is_a_typed_failure() {
        let mut note = Object::new("Note");
        assert!(matches!(note.get("likes"), Err(Error::UnknownField(_))));
        assert!(matches!(
            note.set("inbox", "https://example.com/inbox"),
            Err(Error::UnknownField(_))
        ));
        assert!(matches!(
            note.add("votersCount", 3),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn add_coerces_and_deduplicates() {
        let mut note = Object::new("Note");
        note.set("to", "https://example.org/~john/").unwrap();
        note.add("to", "https://example.org/~erik/").unwrap();
        note.add("to", "https://example.org/~john/").unwrap();
        assert_eq!(
            note.get("to").unwrap(),
            Some(&json!([
                "https://example.org/~john/",
                "https://example.org/~erik/"
            ]))
        );
    }

    #[test]
    fn serialization_drops_null_and_empty_fields() {
        let mut note = Object::new("Note");
        note.set("content", "<p>hello</p>").unwrap();
        note.set("summary", serde_json::Value::Null).unwrap();
        note.set("tag", json!([])).unwrap();
        assert_eq!(
            note.to_record(false),
            json!({"type": "Note", "content": "<p>hello</p>"})
        );
    }

    #[test]
    fn record_round_trip_reproduces_declared_fields() {
        let record = json!({
            "id": "https://example.com/notes/72",
            "type": "Note",
            "content": "<p>hello world</p>",
            "published": "2024-11-04T05:12:16Z",
            "attributedTo": "https://example.com/users/86",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "cc": ["https://example.com/users/86/followers"],
            // not part of the declared schema, must survive in the
            // extension map without becoming reachable
            "sensitive": false,
            "conversation": "tag:example.com,2024:objectId=1",
        });
        let object = Object::from_record(record.clone()).unwrap();
        assert!(matches!(
            object.get("sensitive"),
            Err(Error::UnknownField(_))
        ));
        assert_eq!(object.to_record(false), record);
        assert_eq!(
            Object::from_record(object.to_record(false)).unwrap(),
            object
        );
    }

    #[test]
    fn context_is_regenerated_not_round_tripped() {
        let object = Object::from_record(json!({
            "@context": ["https://www.w3.org/ns/activitystreams", {"@language": "ja"}],
            "type": "Note",
            "content": "こんにちは",
        }))
        .unwrap();
        let record = object.to_record(true);
        let context = record.get("@context").unwrap();
        assert_eq!(context, &super::context_for(Some("Note")));
        assert_eq!(
            context[0],
            serde_json::Value::String("https://www.w3.org/ns/activitystreams".to_owned())
        );
    }

    #[test]
    fn node_iri_shapes() {
        let mut follow = Object::new("Follow");
        follow.set("object", "https://example.com/users/5").unwrap();
        assert_eq!(
            follow.get_node_iri("object"),
            Some("https://example.com/users/5")
        );
        follow
            .set(
                "object",
                json!({"id": "https://example.com/users/6", "type": "Person"}),
            )
            .unwrap();
        assert_eq!(
            follow.get_node_iri("object"),
            Some("https://example.com/users/6")
        );
    }
}
