//! Result summaries and update counters.

use std::collections::HashMap;

use crate::bolt::packstream::PackValue;

/// Counters reported by the server for a completed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Nodes created.
    pub nodes_created: i64,
    /// Nodes deleted.
    pub nodes_deleted: i64,
    /// Relationships created.
    pub relationships_created: i64,
    /// Relationships deleted.
    pub relationships_deleted: i64,
    /// Properties set.
    pub properties_set: i64,
    /// Labels added.
    pub labels_added: i64,
    /// Labels removed.
    pub labels_removed: i64,
    /// Indexes added.
    pub indexes_added: i64,
    /// Indexes removed.
    pub indexes_removed: i64,
    /// Constraints added.
    pub constraints_added: i64,
    /// Constraints removed.
    pub constraints_removed: i64,
}

impl Counters {
    /// Parse the `stats` metadata map.
    pub fn from_stats(stats: &HashMap<String, PackValue>) -> Self {
        let get = |key: &str| stats.get(key).and_then(|v| v.as_int()).unwrap_or(0);
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
        }
    }

    /// Whether the query changed any data.
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
    }

    /// Whether the query changed the schema.
    pub fn contains_system_updates(&self) -> bool {
        self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }
}

/// Terminal metadata of a fully consumed (or discarded) result.
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// Update counters.
    pub counters: Counters,
    /// Bookmark issued when the stream ended, if any.
    pub bookmark: Option<String>,
    /// Database the result came from.
    pub database: Option<String>,
    /// Milliseconds until the first record was available.
    pub t_first: Option<i64>,
    /// Milliseconds until the last record was consumed.
    pub t_last: Option<i64>,
    /// Agent string of the serving server.
    pub server_agent: Option<String>,
}
