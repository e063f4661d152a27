//! Load configuration merging

use tracing::trace;

use crate::config::LoadConfig;

/// Table configuration over endpoint defaults, key by key; the table wins
///
/// Neither argument is modified; the result is a fresh map.
pub fn merge_config(table: &LoadConfig, defaults: &LoadConfig) -> LoadConfig {
    let mut effective = table.clone();
    for (key, default) in defaults {
        match effective.get(key) {
            Some(value) => {
                trace!(key = %key, value = %value, default = %default, "Table config overrides default");
            },
            None => {
                trace!(key = %key, value = %default, "Using endpoint default");
                effective.insert(key.clone(), default.clone());
            },
        }
    }
    effective
}

/// Caller overrides on top of an effective configuration; the caller wins
pub fn apply_overrides(effective: &LoadConfig, overrides: &LoadConfig) -> LoadConfig {
    merge_config(overrides, effective)
}
