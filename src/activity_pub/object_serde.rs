//! Storage codec for federation records.
//!
//! Every stored value is CBOR behind a small versioned header. JSON payloads
//! are stored as [`NodeValue`] trees with common vocabulary terms interned
//! through the symbol table, which keeps activity payloads compact without
//! losing unknown vocabulary.

use minicbor::{Decode, Encode};
use serde_json::{Number, Value};

use crate::error::{Error, Result};

use super::model::vocab::symbol_table;

/// Nesting deeper than this is dropped on conversion.
const MAX_DEPTH: u8 = 128;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Encode, Decode)]
pub(crate) struct Header {
    #[n(0)]
    version: u32,
}

impl Header {
    const V_1: Header = Header { version: 1 };
}

pub(crate) fn encode_record<T: Encode<()>>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = vec![];
    minicbor::encode(Header::V_1, &mut bytes).map_err(|e| Error::Encoding(e.to_string()))?;
    minicbor::encode(value, &mut bytes).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode_record<T: for<'b> Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    let mut decoder = minicbor::Decoder::new(bytes);
    let header: Header = decoder.decode()?;
    if header != Header::V_1 {
        tracing::error!(target: "store", ?header, "unexpected record version");
    }
    Ok(decoder.decode()?)
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub(crate) enum Symbol {
    #[n(0)]
    Id(#[n(0)] u32),
    #[n(1)]
    Text(#[n(0)] String),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub(crate) enum NodeValue {
    #[n(0)]
    Null,
    #[n(1)]
    Bool(#[n(0)] bool),
    #[n(2)]
    Number(#[n(0)] f64),
    #[n(3)]
    Symbol(#[n(0)] Symbol),
    #[n(4)]
    Array(#[n(0)] Vec<NodeValue>),
    #[n(5)]
    Object(#[n(0)] Vec<(Symbol, NodeValue)>),
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        match symbol_table().get_by_left(value.as_str()) {
            Some(id) => Symbol::Id(*id),
            None => Symbol::Text(value),
        }
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        match value {
            Symbol::Id(id) => match symbol_table().get_by_right(&id) {
                Some(text) => (*text).to_owned(),
                None => "__unknown__".to_owned(),
            },
            Symbol::Text(text) => text,
        }
    }
}

impl NodeValue {
    fn from_serde_json(value: Value, depth: u8) -> Self {
        if depth == MAX_DEPTH {
            return NodeValue::Null;
        }
        match value {
            Value::Null => NodeValue::Null,
            Value::Bool(v) => NodeValue::Bool(v),
            Value::Number(n) => NodeValue::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => NodeValue::Symbol(s.into()),
            Value::Array(items) => NodeValue::Array(
                items
                    .into_iter()
                    .map(|v| NodeValue::from_serde_json(v, depth + 1))
                    .collect(),
            ),
            Value::Object(map) => NodeValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k.into(), NodeValue::from_serde_json(v, depth + 1)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for NodeValue {
    fn from(value: Value) -> Self {
        Self::from_serde_json(value, 0)
    }
}

impl From<NodeValue> for Value {
    fn from(value: NodeValue) -> Self {
        match value {
            NodeValue::Null => Value::Null,
            NodeValue::Bool(v) => Value::Bool(v),
            NodeValue::Number(n) => match Number::from_f64(n) {
                Some(n) => Value::Number(n),
                None => Value::Null,
            },
            NodeValue::Symbol(s) => Value::String(s.into()),
            NodeValue::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            NodeValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
        }
    }
}
