//! Cache key derivation for probe results.
//!
//! A key combines the probe parameters (target URL, method, accepted status
//! pattern) with the endpoint's connection fields. Display and bookkeeping
//! fields are left out, so renaming an endpoint keeps its cached result.

use std::fmt::Write;

use serde_json::Value;

use relaycheck_core::{Endpoint, ProbeSettings};

const KEY_PREFIX: &str = "availability";

/// Fields that never influence reachability: `name`, `collectionName`,
/// `subName`, `id` (any case) and anything starting with `_`.
fn is_volatile(key: &str) -> bool {
    key.starts_with('_')
        || ["name", "collectionname", "subname", "id"]
            .iter()
            .any(|volatile| key.eq_ignore_ascii_case(volatile))
}

/// Build the cache key for `endpoint`, or `None` when caching is disabled.
pub fn build_cache_key(
    enabled: bool,
    settings: &ProbeSettings,
    endpoint: &Endpoint,
) -> Option<String> {
    if !enabled {
        return None;
    }

    let mut fields: Vec<(&String, &Value)> = endpoint
        .fields()
        .iter()
        .filter(|(key, _)| !is_volatile(key))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let mut key = format!(
        "{KEY_PREFIX}:{}:{}:{}:{{",
        settings.url,
        settings.method.as_str(),
        settings.status.as_str()
    );
    for (i, (name, value)) in fields.into_iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        write_canonical_str(&mut key, name);
        key.push(':');
        write_canonical(&mut key, value);
    }
    key.push('}');
    Some(key)
}

/// JSON with object keys sorted at every depth, independent of how the
/// map was built.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_str(out, name);
                out.push(':');
                write_canonical(out, value);
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
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_canonical_str(out: &mut String, s: &str) {
    let _ = write!(out, "{}", Value::String(s.to_string()));
}
