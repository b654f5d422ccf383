//! Cache Key Module
//!
//! Deterministic key derivation from a base name and a parameter object.

use std::fmt;

use serde_json::{Map, Value};

/// Parameters merged into a cache key and handed to the fetcher.
pub type Params = Map<String, Value>;

/// Separator between the base name and each `name:value` pair.
pub const KEY_SEPARATOR: &str = "_";

// == Cache Key ==
/// A cache key: the base name plus canonicalized parameters.
///
/// Two keys built from the same base and deep-equal params compare equal no
/// matter the insertion order of the params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    base: String,
    full: String,
}

impl CacheKey {
    /// Builds the key for `base` with `params`.
    ///
    /// Empty params yield the bare base name. Otherwise pairs are sorted by
    /// name and rendered as `name:value`, strings unquoted and everything else
    /// as compact JSON.
    pub fn new(base: impl Into<String>, params: &Params) -> Self {
        let base = base.into();
        if params.is_empty() {
            return Self {
                full: base.clone(),
                base,
            };
        }

        let mut pairs: Vec<(&String, &Value)> = params.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let rendered: Vec<String> = pairs
            .into_iter()
            .map(|(name, value)| format!("{}:{}", name, render_value(value)))
            .collect();

        Self {
            full: format!("{}{}{}", base, KEY_SEPARATOR, rendered.join(KEY_SEPARATOR)),
            base,
        }
    }

    /// Key with no parameters.
    pub fn plain(base: impl Into<String>) -> Self {
        Self::new(base, &Params::new())
    }

    /// Derived key for one page of a paginated list (`<key>_page_<n>`).
    pub fn page(&self, page: u32) -> Self {
        Self {
            base: self.base.clone(),
            full: format!("{}{}page{}{}", self.full, KEY_SEPARATOR, KEY_SEPARATOR, page),
        }
    }

    /// The base name, used for TTL policy lookup.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The full key string as stored.
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
