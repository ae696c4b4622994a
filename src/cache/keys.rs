//! Canonical cache keys.
//!
//! Query parameter objects are rebuilt on every call, often with fields in a
//! different order. `encode` maps structurally equal values onto the same
//! string so they land in the same cache slot.

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cache key could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Encode a JSON value into its canonical string form.
///
/// Arrays keep their order; object members are sorted by key.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Serialize `key` and encode it canonically.
pub fn encode_key<K: Serialize + ?Sized>(key: &K) -> Result<String, KeyError> {
    let value = serde_json::to_value(key)?;
    Ok(encode(&value))
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_quoted(text, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(members) => {
            let mut sorted: Vec<(&String, &Value)> = members.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (index, (name, member)) in sorted.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_quoted(name, out);
                out.push(':');
                write_value(member, out);
            }
            out.push('}');
        }
    }
}

fn write_quoted(text: &str, out: &mut String) {
    // Serializing a &str to JSON cannot fail.
    match serde_json::to_string(text) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(text);
            out.push('"');
        }
    }
}

/// Serializes an unordered collection (such as a `HashSet`) with its elements
/// sorted by their canonical encoding.
///
/// ```
/// use std::collections::HashSet;
/// use nebula_client::cache::{Unordered, encode_key};
///
/// let a: HashSet<_> = ["rust", "cache"].into_iter().collect();
/// let b: HashSet<_> = ["cache", "rust"].into_iter().collect();
/// assert_eq!(
///     encode_key(&Unordered(&a)).unwrap(),
///     encode_key(&Unordered(&b)).unwrap(),
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Unordered<C>(pub C);

impl<C> Serialize for Unordered<C>
where
    C: IntoIterator + Copy,
    C::Item: Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut items = Vec::new();
        for item in self.0 {
            let value = serde_json::to_value(&item).map_err(serde::ser::Error::custom)?;
            items.push((encode(&value), value));
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        serializer.collect_seq(items.into_iter().map(|(_, value)| value))
    }
}
