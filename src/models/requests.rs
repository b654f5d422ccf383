//! Request DTOs for the debug panel API
//!
//! Defines the structure of incoming query strings.

use serde::Deserialize;

/// Maximum accepted length of a key prefix filter
pub const MAX_PREFIX_LENGTH: usize = 256;

/// Query string for the entries listing (GET /entries)
///
/// # Fields
/// - `prefix`: Only list keys starting with this prefix
/// - `expired`: When set, only list entries whose freshness matches `!expired`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntriesQuery {
    /// Key prefix filter
    #[serde(default)]
    pub prefix: Option<String>,
    /// Expired-only (`true`) or fresh-only (`false`) filter
    #[serde(default)]
    pub expired: Option<bool>,
}

impl EntriesQuery {
    /// Validates the query
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        match &self.prefix {
            Some(prefix) if prefix.len() > MAX_PREFIX_LENGTH => Some(format!(
                "Prefix exceeds maximum length of {} characters",
                MAX_PREFIX_LENGTH
            )),
            _ => None,
        }
    }

    /// Whether an entry with this key and freshness passes the filters
    pub fn matches(&self, key: &str, fresh: bool) -> bool {
        let prefix_ok = self
            .prefix
            .as_deref()
            .map(|p| key.starts_with(p))
            .unwrap_or(true);
        let expiry_ok = self.expired.map(|expired| expired != fresh).unwrap_or(true);
        prefix_ok && expiry_ok
    }
}
