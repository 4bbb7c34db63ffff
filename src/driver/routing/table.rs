//! Cluster routing tables.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::bolt::packstream::PackValue;

use super::super::driver::ServerAddress;
use super::super::error::{DriverError, DriverResult};

/// Role a cluster member advertises for a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// Serves routing table requests.
    Route,
    /// Serves read transactions.
    Read,
    /// Serves write transactions (the leader).
    Write,
}

impl ServerRole {
    /// Parse the wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROUTE" => Some(Self::Route),
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            _ => None,
        }
    }

    /// Wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

/// Server addresses for one database, grouped by role, with an expiry.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Database this table routes for; empty for the default database.
    pub database: String,
    /// Members serving ROUTE.
    pub routers: Vec<ServerAddress>,
    /// Members serving READ.
    pub readers: Vec<ServerAddress>,
    /// Members serving WRITE.
    pub writers: Vec<ServerAddress>,
    /// Time to live, as advertised by the server.
    pub ttl: Duration,
    /// When the table was fetched.
    pub fetched_at: Instant,
}

impl RoutingTable {
    /// Empty table for `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            ttl: Duration::ZERO,
            fetched_at: Instant::now(),
        }
    }

    /// A table is stale once its TTL elapsed or it lost every router.
    /// Stale tables must be refreshed before the next routing decision.
    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl || self.routers.is_empty()
    }

    /// Addresses serving `role`.
    pub fn servers_for(&self, role: ServerRole) -> &[ServerAddress] {
        match role {
            ServerRole::Route => &self.routers,
            ServerRole::Read => &self.readers,
            ServerRole::Write => &self.writers,
        }
    }

    /// Drop `address` from every role list.
    pub fn remove_server(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// Parse the routing table map of a ROUTE SUCCESS.
    pub(crate) fn from_wire(
        map: &HashMap<String, PackValue>,
        requested_database: Option<&str>,
    ) -> DriverResult<Self> {
        let ttl_seconds = map
            .get("ttl")
            .and_then(|v| v.as_int())
            .ok_or_else(|| DriverError::protocol("routing table without ttl"))?;
        let servers = map
            .get("servers")
            .and_then(|v| v.as_list())
            .ok_or_else(|| DriverError::protocol("routing table without servers"))?;

        let database = map
            .get("db")
            .and_then(|v| v.as_str())
            .or(requested_database)
            .unwrap_or_default()
            .to_string();

        let mut table = RoutingTable::new(database);
        table.ttl = Duration::from_secs(ttl_seconds.max(0) as u64);

        for entry in servers {
            let entry = entry
                .as_map()
                .ok_or_else(|| DriverError::protocol("routing table server entry is not a map"))?;
            let role = entry
                .get("role")
                .and_then(|v| v.as_str())
                .and_then(ServerRole::parse);
            let addresses: Vec<ServerAddress> = entry
                .get("addresses")
                .and_then(|v| v.as_list())
                .map(|list| {
                    list.iter()
                        .filter_map(|a| a.as_str())
                        .filter_map(ServerAddress::parse)
                        .collect()
                })
                .unwrap_or_default();
            match role {
                Some(ServerRole::Route) => table.routers.extend(addresses),
                Some(ServerRole::Read) => table.readers.extend(addresses),
                Some(ServerRole::Write) => table.writers.extend(addresses),
                None => {}
            }
        }

        Ok(table)
    }

    /// Parse the single row returned by the legacy routing procedure.
    pub(crate) fn from_procedure(
        keys: &[String],
        rows: Vec<Vec<PackValue>>,
        requested_database: Option<&str>,
    ) -> DriverResult<Self> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::protocol("routing procedure returned no rows"))?;

        let mut map = HashMap::new();
        for (key, value) in keys.iter().zip(row) {
            map.insert(key.clone(), value);
        }
        Self::from_wire(&map, requested_database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_table(ttl: i64) -> HashMap<String, PackValue> {
        let entry = |role: &str, addrs: &[&str]| {
            let mut m = HashMap::new();
            m.insert("role".to_string(), PackValue::String(role.to_string()));
            m.insert(
                "addresses".to_string(),
                PackValue::List(
                    addrs
                        .iter()
                        .map(|a| PackValue::String(a.to_string()))
                        .collect(),
                ),
            );
            PackValue::Map(m)
        };

        let mut map = HashMap::new();
        map.insert("ttl".to_string(), PackValue::Integer(ttl));
        map.insert(
            "servers".to_string(),
            PackValue::List(vec![
                entry("ROUTE", &["core1:7687", "core2:7687"]),
                entry("WRITE", &["core1:7687"]),
                entry("READ", &["core2:7687", "core3:7687"]),
            ]),
        );
        map
    }

    #[test]
    fn parses_wire_table() {
        let table = RoutingTable::from_wire(&wire_table(300), Some("movies")).unwrap();
        assert_eq!(table.database, "movies");
        assert_eq!(table.routers.len(), 2);
        assert_eq!(table.writers, vec![ServerAddress::new("core1", 7687)]);
        assert_eq!(table.readers.len(), 2);
        assert_eq!(table.ttl, Duration::from_secs(300));
        assert!(!table.is_stale());
    }

    #[test]
    fn zero_ttl_is_immediately_stale() {
        let table = RoutingTable::from_wire(&wire_table(0), None).unwrap();
        assert!(table.is_stale());
    }

    #[test]
    fn table_without_routers_is_stale() {
        let mut table = RoutingTable::from_wire(&wire_table(300), None).unwrap();
        table.routers.clear();
        assert!(table.is_stale());
    }

    #[test]
    fn remove_server_strips_every_role() {
        let mut table = RoutingTable::from_wire(&wire_table(300), None).unwrap();
        let core1 = ServerAddress::new("core1", 7687);
        table.remove_server(&core1);
        assert!(!table.routers.contains(&core1));
        assert!(table.writers.is_empty());
        assert_eq!(table.readers.len(), 2);
    }

    #[test]
    fn servers_for_role() {
        let table = RoutingTable::from_wire(&wire_table(300), None).unwrap();
        assert_eq!(table.servers_for(ServerRole::Write).len(), 1);
        assert_eq!(table.servers_for(ServerRole::Read).len(), 2);
        assert_eq!(table.servers_for(ServerRole::Route).len(), 2);
    }

    #[test]
    fn missing_ttl_is_a_protocol_error() {
        let mut map = wire_table(300);
        map.remove("ttl");
        assert!(RoutingTable::from_wire(&map, None).is_err());
    }

    #[test]
    fn procedure_row_parses() {
        let wire = wire_table(120);
        let keys = vec!["ttl".to_string(), "servers".to_string()];
        let row = vec![
            wire.get("ttl").cloned().unwrap(),
            wire.get("servers").cloned().unwrap(),
        ];
        let table = RoutingTable::from_procedure(&keys, vec![row], Some("movies")).unwrap();
        assert_eq!(table.database, "movies");
        assert_eq!(table.ttl, Duration::from_secs(120));
        assert_eq!(table.writers.len(), 1);
    }

    #[test]
    fn empty_procedure_result_is_an_error() {
        assert!(RoutingTable::from_procedure(&[], vec![], None).is_err());
    }

    #[test]
    fn role_parsing() {
        assert_eq!(ServerRole::parse("ROUTE"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("READ"), Some(ServerRole::Read));
        assert_eq!(ServerRole::parse("WRITE"), Some(ServerRole::Write));
        assert_eq!(ServerRole::parse("LEADER"), None);
        assert_eq!(ServerRole::Write.as_str(), "WRITE");
    }
}
