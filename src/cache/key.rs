//! Cache key generation.
//!
//! Keys are SHA-256 digests of canonical JSON: object keys are sorted at every
//! depth, so parameter sets that differ only in key order share a key. Each
//! cache domain digests under its own namespace.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const REGULATION_SEARCH: &str = "regulation_search";
pub const API_RESPONSE: &str = "api_response";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub namespace: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into(), namespace: None }
    }
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = Some(ns.into()); self }
    pub fn as_str(&self) -> &str { &self.hash }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.hash) }
}

impl From<&str> for CacheKey { fn from(s: &str) -> Self { Self::new(s) } }
impl From<String> for CacheKey { fn from(s: String) -> Self { Self::new(s) } }

/// Regulatory search parameters. Matching is case-insensitive and ignores
/// activity order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulationQuery {
    pub country: String,
    pub industry: String,
    pub activities: Vec<String>,
}

impl RegulationQuery {
    pub fn new<I, S>(country: impl Into<String>, industry: impl Into<String>, activities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            country: country.into(),
            industry: industry.into(),
            activities: activities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn canonical_params(&self) -> Value {
        let mut activities: Vec<String> = self.activities.iter().map(|a| a.to_lowercase()).collect();
        activities.sort();
        json!({
            "country": self.country.to_lowercase(),
            "industry": self.industry.to_lowercase(),
            "activities": activities,
        })
    }

    /// Metadata stored alongside the durable record (original casing).
    pub fn metadata(&self) -> Value {
        json!({
            "country": self.country,
            "industry": self.industry,
            "activities": self.activities,
        })
    }
}

/// Recursively rebuild `value` with object keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> = map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

/// Digest of a generative request, used as the fingerprint for
/// [`CacheKeyGenerator::api_response`].
pub fn prompt_fingerprint(prompt: &str, temperature: Option<f64>, max_tokens: Option<u32>) -> String {
    let mut parts: BTreeMap<&str, String> = BTreeMap::new();
    parts.insert("prompt", prompt.to_string());
    if let Some(t) = temperature { parts.insert("temperature", format!("{:.2}", t)); }
    if let Some(m) = max_tokens { parts.insert("max_tokens", m.to_string()); }
    let canonical = serde_json::to_string(&parts).unwrap_or_default();
    sha256_hex(&canonical)
}

#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self { Self { salt: None } }
    /// Salt mixed into every digest; changing it invalidates all existing keys.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self { self.salt = Some(salt.into()); self }

    pub fn generate(&self, namespace: &str, params: &Value) -> CacheKey {
        let mut envelope = json!({ "type": namespace, "params": params });
        if let Some(ref s) = self.salt { envelope["salt"] = Value::String(s.clone()); }
        let canonical = serde_json::to_string(&canonicalize(&envelope)).unwrap_or_default();
        CacheKey::new(sha256_hex(&canonical)).with_namespace(namespace)
    }

    pub fn regulation_search(&self, query: &RegulationQuery) -> CacheKey {
        self.generate(REGULATION_SEARCH, &query.canonical_params())
    }

    pub fn api_response(&self, operation: &str, fingerprint: &str) -> CacheKey {
        self.generate(API_RESPONSE, &json!({ "operation": operation, "fingerprint": fingerprint }))
    }
}
