//! redb table definitions for the TideGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Target configs keyed by `{namespace}/{kind}/{name}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Decision events keyed by `{target_id}:{timestamp:020}`.
pub const DECISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("decisions");

/// Standalone workload state keyed by target id.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Shape shared by every table: string keys, JSON values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
