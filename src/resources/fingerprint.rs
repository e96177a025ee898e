//! Content fingerprints for change detection.
//!
//! A fingerprint is the SHA-256 of a canonical JSON rendering of a value.
//! Canonicalisation sorts object keys and drops server-populated bookkeeping
//! fields. Lists under set-like keys (volumes, mounts, ports, pull secrets) are
//! ordered by name; every other list keeps its order, since container, init
//! container and env ordering changes what the pod does.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::controller::error::Result;

/// Annotation holding the fingerprint a child object was written with.
pub const SPEC_HASH_ANNOTATION: &str = "cnpg.io/specHash";

/// Keys the API server fills in; they never describe intent.
const VOLATILE_KEYS: [&str; 6] = [
    "creationTimestamp",
    "resourceVersion",
    "uid",
    "generation",
    "managedFields",
    "selfLink",
];

/// Keys whose lists are sets keyed by `name`.
const NAME_KEYED_SETS: [&str; 4] = ["volumes", "volumeMounts", "ports", "imagePullSecrets"];

/// Lowercase hex SHA-256 digest of a canonicalised value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpecFingerprint(String);

impl SpecFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the fingerprint a stored object was written with, if any.
    pub fn from_metadata(meta: &ObjectMeta) -> Option<Self> {
        meta.annotations
            .as_ref()
            .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
            .filter(|v| !v.is_empty())
            .map(|v| SpecFingerprint(v.clone()))
    }

    /// Stamp this fingerprint onto an object's annotations.
    pub fn stamp(&self, meta: &mut ObjectMeta) {
        meta.annotations
            .get_or_insert_with(Default::default)
            .insert(SPEC_HASH_ANNOTATION.to_string(), self.0.clone());
    }
}

impl fmt::Display for SpecFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint any serializable value.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<SpecFingerprint> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let encoded = serde_json::to_vec(&canonical)?;
    Ok(SpecFingerprint(format!("{:x}", Sha256::digest(&encoded))))
}

/// Normalise a JSON value so that semantically equal inputs compare equal.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            // Sort explicitly: Map keeps insertion order under `preserve_order`.
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| {
                    let v = match canonicalize(v) {
                        Value::Array(items) if NAME_KEYED_SETS.contains(&k.as_str()) => {
                            Value::Array(sort_by_name(items))
                        }
                        v => v,
                    };
                    (k, v)
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn sort_by_name(mut items: Vec<Value>) -> Vec<Value> {
    if items.iter().all(|v| name_of(v).is_some()) {
        items.sort_by(|a, b| name_of(a).cmp(&name_of(b)));
    }
    items
}

fn name_of(value: &Value) -> Option<&str> {
    value.as_object()?.get("name")?.as_str()
}
