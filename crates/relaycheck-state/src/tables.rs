//! redb table definitions for the probe-result cache.

use redb::TableDefinition;

/// Probe results keyed by the probe cache key; values are JSON-serialized
/// `StoredEntry` records.
pub const PROBE_RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("probe_results");
