//! Channel key derivation.
//!
//! A channel is a topic name plus an optional parameter object, e.g.
//! `odds` + `{"sport":"nba"}`. Keys are built from a canonical serialization so
//! that the same parameters in any key order map to the same subscription.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// Channel parameters as received on the wire.
pub type Params = Map<String, Value>;

/// Deterministic identity of a `(channel, params)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(channel: &str, params: &Params) -> Self {
        let mut key = String::with_capacity(channel.len() + 16);
        key.push_str(channel);
        key.push(':');
        write_canonical(&mut key, &Value::Object(params.clone()));
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize `value` with object keys sorted at every depth.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(out, v);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
