// Copyright (c) 2025 - Cowboy AI, Inc.
//! Attribute Values and Output References
//!
//! Declared configuration is a tree of [`AttributeValue`]s. Data
//! dependencies are expressed only through [`OutputRef`]s inside that tree,
//! so edges in the graph are derived from what a node reads, never declared
//! by hand.
//!
//! # Resolution
//!
//! ```text
//! AttributeValue ──resolve(outputs)──> serde_json::Value
//!      Ref(addr.attr)   ──lookup──>    "arn:aws:..."
//!      Concat[a, b]     ──join──>      "ab"
//!      Json(v)          ──encode──>    "{\"k\":...}"
//!      Sensitive(s)     ──mode──>      plaintext | "sha256:..."
//! ```

use ring::digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::node::NodeAddress;

/// Reference to an output attribute of another node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub address: NodeAddress,
    pub attribute: String,
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.attribute)
    }
}

/// Credential material placed once at provisioning time
///
/// The plaintext never serialises; a persisted value carries only its
/// SHA-256 fingerprint, and equality compares fingerprints.
#[derive(Clone, Serialize, Deserialize)]
pub struct SensitiveValue {
    fingerprint: String,
    #[serde(skip)]
    plaintext: Option<String>,
}

impl SensitiveValue {
    pub fn new(plaintext: impl Into<String>) -> Self {
        let plaintext = plaintext.into();
        Self {
            fingerprint: fingerprint(&plaintext),
            plaintext: Some(plaintext),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Plaintext, if this value was declared in the current run
    pub fn expose(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }
}

impl PartialEq for SensitiveValue {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for SensitiveValue {}

impl fmt::Debug for SensitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveValue({})", self.fingerprint)
    }
}

/// `sha256:<hex>` fingerprint of a sensitive string
pub fn fingerprint(plaintext: &str) -> String {
    let hash = digest::digest(&digest::SHA256, plaintext.as_bytes());
    let hex: String = hash.as_ref().iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}

/// Declared attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
    /// Output attribute of another node
    Ref(OutputRef),
    /// String interpolation of the resolved parts
    Concat(Vec<AttributeValue>),
    /// Inner value encoded as a JSON document string
    Json(Box<AttributeValue>),
    Sensitive(SensitiveValue),
}

/// How sensitive values are rendered during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Plaintext for provider calls
    Plaintext,
    /// Fingerprints for anything persisted or displayed
    Redacted,
}

/// Resolution failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Reference {0} has no known value")]
    Unresolved(OutputRef),

    #[error("Cannot interpolate non-scalar value into string: {0}")]
    NotInterpolable(String),

    #[error("Sensitive value has no plaintext in this run (fingerprint {0})")]
    SensitiveUnavailable(String),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, AttributeValue)>,
        K: Into<String>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn concat(parts: impl IntoIterator<Item = AttributeValue>) -> Self {
        Self::Concat(parts.into_iter().collect())
    }

    pub fn json(inner: AttributeValue) -> Self {
        Self::Json(Box::new(inner))
    }

    pub fn sensitive(plaintext: impl Into<String>) -> Self {
        Self::Sensitive(SensitiveValue::new(plaintext))
    }

    /// Convert a literal JSON value into an attribute tree
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .unwrap_or_else(|| Self::String(n.to_string())),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// All output references anywhere in this value
    pub fn references(&self) -> BTreeSet<&OutputRef> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut BTreeSet<&'a OutputRef>) {
        match self {
            Self::Ref(r) => {
                refs.insert(r);
            }
            Self::List(items) | Self::Concat(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.collect_references(refs);
                }
            }
            Self::Json(inner) => inner.collect_references(refs),
            Self::Null
            | Self::Bool(_)
            | Self::Number(_)
            | Self::String(_)
            | Self::Sensitive(_) => {}
        }
    }

    /// Whether any sensitive value appears in this tree
    pub fn contains_sensitive(&self) -> bool {
        match self {
            Self::Sensitive(_) => true,
            Self::List(items) | Self::Concat(items) => items.iter().any(Self::contains_sensitive),
            Self::Map(map) => map.values().any(Self::contains_sensitive),
            Self::Json(inner) => inner.contains_sensitive(),
            _ => false,
        }
    }

    /// Resolve into a concrete JSON value
    ///
    /// `lookup` returns the known value of a producer's output attribute.
    pub fn resolve<F>(&self, lookup: &F, mode: ResolveMode) -> Result<Value, ResolveError>
    where
        F: Fn(&OutputRef) -> Option<Value>,
    {
        match self {
            Self::Null => Ok(Value::Null),
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Number(n) => Ok(Value::from(*n)),
            Self::String(s) => Ok(Value::String(s.clone())),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup, mode))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map {
                    object.insert(key.clone(), value.resolve(lookup, mode)?);
                }
                Ok(Value::Object(object))
            }
            Self::Ref(r) => lookup(r).ok_or_else(|| ResolveError::Unresolved(r.clone())),
            Self::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match part.resolve(lookup, mode)? {
                        Value::String(s) => joined.push_str(&s),
                        Value::Number(n) => joined.push_str(&n.to_string()),
                        Value::Bool(b) => joined.push_str(&b.to_string()),
                        other => return Err(ResolveError::NotInterpolable(other.to_string())),
                    }
                }
                Ok(Value::String(joined))
            }
            Self::Json(inner) => {
                let document = inner.resolve(lookup, mode)?;
                Ok(Value::String(document.to_string()))
            }
            Self::Sensitive(secret) => match mode {
                ResolveMode::Redacted => Ok(Value::String(secret.fingerprint().to_string())),
                ResolveMode::Plaintext => secret
                    .expose()
                    .map(|p| Value::String(p.to_string()))
                    .ok_or_else(|| ResolveError::SensitiveUnavailable(secret.fingerprint().to_string())),
            },
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<OutputRef> for AttributeValue {
    fn from(value: OutputRef) -> Self {
        Self::Ref(value)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}
