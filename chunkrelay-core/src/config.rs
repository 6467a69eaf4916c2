//! # Configuration
//!
//! A flat string key/value store, layered by the binary: defaults first, then
//! environment variables carrying a prefix.
//!
//! ```rust
//! use chunkrelay_core::RelayConfig;
//!
//! let mut config = RelayConfig::new();
//! config.set("upload.block_digits", "8");
//!
//! let snapshot = config.snapshot();
//! assert_eq!(snapshot.get_u32("upload.block_digits"), Some(8));
//! ```
//!
//! Environment keys are normalized by stripping the prefix, lowercasing and
//! turning `__` into `.`:
//!
//! ```bash
//! export CHUNKRELAY__BLOB__BUCKET=uploaded   # -> blob.bucket
//! ```

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct RelayConfig {
    values: HashMap<String, String>,
}

impl RelayConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Set a key only when it has no value yet.
    pub fn set_default<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Overlay every `vars` entry whose key starts with `prefix`.
    ///
    /// `CHUNKRELAY__PIPELINE__NAME` with prefix `CHUNKRELAY__` lands on
    /// `pipeline.name`.
    pub fn merge_env<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.values.insert(normalized, value);
            }
        }
    }

    /// Overlay the process environment.
    pub fn load_env(&mut self, prefix: &str) {
        self.merge_env(prefix, std::env::vars());
    }

    pub fn snapshot(&self) -> RelayConfigSnapshot {
        RelayConfigSnapshot::new(self.values.clone())
    }
}

/// Read-only view handed to components at construction time.
#[derive(Debug, Clone, Default)]
pub struct RelayConfigSnapshot {
    map: HashMap<String, String>,
}

impl RelayConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    /// Like `get_string`, but a missing key is an error naming the key.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.get_string(key)
            .ok_or_else(|| anyhow::anyhow!("missing configuration value '{key}'"))
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse::<u32>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }
}
