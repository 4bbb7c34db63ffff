//! Connection URI parsing.
//!
//! `<scheme>://[user[:password]@]host[:port][/?database=name&key=value]`
//!
//! The scheme fixes two things at once and both are immutable after
//! parsing: the driver family (direct `bolt*`, routed `neo4j*`, or the
//! HTTP collaborator transport) and the TLS policy (`+s` verified,
//! `+ssc` self-signed accepted). The `database` query key selects the
//! default database; every other key is kept verbatim as routing
//! context.

use std::collections::HashMap;
use std::fmt;

use super::error::{DriverError, DriverResult};

/// Default port for the Bolt protocol.
pub const DEFAULT_BOLT_PORT: u16 = 7687;
/// Default port for the HTTP transport.
pub const DEFAULT_HTTP_PORT: u16 = 7474;
/// Default port for the HTTPS transport.
pub const DEFAULT_HTTPS_PORT: u16 = 7473;

/// Recognized URI schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Direct Bolt, plaintext.
    Bolt,
    /// Direct Bolt over verified TLS.
    BoltTls,
    /// Direct Bolt over TLS, self-signed certificates accepted.
    BoltSelfSigned,
    /// Routed Bolt, plaintext.
    Neo4j,
    /// Routed Bolt over verified TLS.
    Neo4jTls,
    /// Routed Bolt over TLS, self-signed certificates accepted.
    Neo4jSelfSigned,
    /// HTTP transport (collaborator driver).
    Http,
    /// HTTPS transport (collaborator driver).
    Https,
}

/// TLS behaviour fixed by the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Plaintext.
    #[default]
    None,
    /// TLS with certificate verification.
    Verified,
    /// TLS accepting self-signed certificates.
    SelfSigned,
}

impl Scheme {
    /// Parse a scheme token.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bolt" => Some(Scheme::Bolt),
            "bolt+s" => Some(Scheme::BoltTls),
            "bolt+ssc" => Some(Scheme::BoltSelfSigned),
            "neo4j" => Some(Scheme::Neo4j),
            "neo4j+s" => Some(Scheme::Neo4jTls),
            "neo4j+ssc" => Some(Scheme::Neo4jSelfSigned),
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }

    /// Canonical text form.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Bolt => "bolt",
            Scheme::BoltTls => "bolt+s",
            Scheme::BoltSelfSigned => "bolt+ssc",
            Scheme::Neo4j => "neo4j",
            Scheme::Neo4jTls => "neo4j+s",
            Scheme::Neo4jSelfSigned => "neo4j+ssc",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// TLS policy this scheme commits to.
    pub fn tls_policy(self) -> TlsPolicy {
        match self {
            Scheme::Bolt | Scheme::Neo4j | Scheme::Http => TlsPolicy::None,
            Scheme::BoltTls | Scheme::Neo4jTls | Scheme::Https => TlsPolicy::Verified,
            Scheme::BoltSelfSigned | Scheme::Neo4jSelfSigned => TlsPolicy::SelfSigned,
        }
    }

    /// Whether the scheme selects the routing driver family.
    pub fn is_routed(self) -> bool {
        matches!(
            self,
            Scheme::Neo4j | Scheme::Neo4jTls | Scheme::Neo4jSelfSigned
        )
    }

    /// Whether the scheme selects the HTTP collaborator transport.
    pub fn is_http(self) -> bool {
        matches!(self, Scheme::Http | Scheme::Https)
    }

    /// Port used when the URI does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => DEFAULT_HTTP_PORT,
            Scheme::Https => DEFAULT_HTTPS_PORT,
            _ => DEFAULT_BOLT_PORT,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully parsed connection URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    /// Scheme; fixes driver family and TLS policy.
    pub scheme: Scheme,
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User from the user-info part, if any.
    pub username: Option<String>,
    /// Password from the user-info part, if any.
    pub password: Option<String>,
    /// Default database from the `database` query key.
    pub database: Option<String>,
    /// Remaining query keys, passed through as routing context.
    pub routing_context: HashMap<String, String>,
}

impl ConnectionUri {
    /// Parse a connection URI.
    pub fn parse(uri: &str) -> DriverResult<Self> {
        let (scheme_str, rest) = uri
            .split_once("://")
            .ok_or_else(|| DriverError::config(format!("URI '{}' has no scheme", uri)))?;

        let scheme = Scheme::parse(scheme_str).ok_or_else(|| {
            DriverError::config(format!("unsupported URI scheme '{}'", scheme_str))
        })?;

        // Split off query and path before looking at the authority.
        let (authority_and_path, query) = match rest.split_once('?') {
            Some((a, q)) => (a, Some(q)),
            None => (rest, None),
        };
        let authority = authority_and_path
            .split_once('/')
            .map(|(a, _)| a)
            .unwrap_or(authority_and_path);

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pwd)) => (Some(user.to_string()), Some(pwd.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => {
                let port: u16 = p.parse().map_err(|_| {
                    DriverError::config(format!("invalid port '{}' in URI", p))
                })?;
                (h.to_string(), port)
            }
            None => (hostport.to_string(), scheme.default_port()),
        };

        if host.is_empty() {
            return Err(DriverError::config("URI has an empty host"));
        }

        let mut database = None;
        let mut routing_context = HashMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                if key == "database" {
                    database = Some(value.to_string());
                } else {
                    routing_context.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            scheme,
            host,
            port,
            username,
            password,
            database,
            routing_context,
        })
    }

    /// TLS policy fixed by the scheme.
    pub fn tls_policy(&self) -> TlsPolicy {
        self.scheme.tls_policy()
    }

    /// `host:port` form used for socket connects and pool keys.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bolt() {
        let uri = ConnectionUri::parse("bolt://localhost:7687").unwrap();
        assert_eq!(uri.scheme, Scheme::Bolt);
        assert_eq!(uri.host, "localhost");
        assert_eq!(uri.port, 7687);
        assert_eq!(uri.tls_policy(), TlsPolicy::None);
        assert!(!uri.scheme.is_routed());
        assert!(uri.username.is_none());
        assert!(uri.database.is_none());
    }

    #[test]
    fn default_ports() {
        assert_eq!(ConnectionUri::parse("bolt://db").unwrap().port, 7687);
        assert_eq!(ConnectionUri::parse("neo4j://db").unwrap().port, 7687);
        assert_eq!(ConnectionUri::parse("http://db").unwrap().port, 7474);
        assert_eq!(ConnectionUri::parse("https://db").unwrap().port, 7473);
    }

    #[test]
    fn tls_policy_tracks_scheme() {
        assert_eq!(
            ConnectionUri::parse("bolt+s://db").unwrap().tls_policy(),
            TlsPolicy::Verified
        );
        assert_eq!(
            ConnectionUri::parse("bolt+ssc://db").unwrap().tls_policy(),
            TlsPolicy::SelfSigned
        );
        assert_eq!(
            ConnectionUri::parse("neo4j+s://db").unwrap().tls_policy(),
            TlsPolicy::Verified
        );
        assert_eq!(
            ConnectionUri::parse("neo4j+ssc://db").unwrap().tls_policy(),
            TlsPolicy::SelfSigned
        );
    }

    #[test]
    fn routed_schemes() {
        assert!(ConnectionUri::parse("neo4j://db").unwrap().scheme.is_routed());
        assert!(ConnectionUri::parse("neo4j+s://db").unwrap().scheme.is_routed());
        assert!(!ConnectionUri::parse("bolt://db").unwrap().scheme.is_routed());
        assert!(ConnectionUri::parse("http://db").unwrap().scheme.is_http());
    }

    #[test]
    fn userinfo() {
        let uri = ConnectionUri::parse("bolt://alice:s3cret@db:7688").unwrap();
        assert_eq!(uri.username.as_deref(), Some("alice"));
        assert_eq!(uri.password.as_deref(), Some("s3cret"));
        assert_eq!(uri.host, "db");
        assert_eq!(uri.port, 7688);

        let uri = ConnectionUri::parse("bolt://alice@db").unwrap();
        assert_eq!(uri.username.as_deref(), Some("alice"));
        assert!(uri.password.is_none());
    }

    #[test]
    fn database_and_routing_context() {
        let uri =
            ConnectionUri::parse("neo4j://db:7687/?database=movies&policy=eu&region=west")
                .unwrap();
        assert_eq!(uri.database.as_deref(), Some("movies"));
        assert_eq!(uri.routing_context.get("policy").map(String::as_str), Some("eu"));
        assert_eq!(uri.routing_context.get("region").map(String::as_str), Some("west"));
        assert!(!uri.routing_context.contains_key("database"));
    }

    #[test]
    fn query_without_slash() {
        let uri = ConnectionUri::parse("neo4j://db?database=movies").unwrap();
        assert_eq!(uri.database.as_deref(), Some("movies"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ConnectionUri::parse("localhost:7687").is_err());
        assert!(ConnectionUri::parse("ftp://db:7687").is_err());
        assert!(ConnectionUri::parse("bolt://db:notaport").is_err());
        assert!(ConnectionUri::parse("bolt://").is_err());
    }

    #[test]
    fn authority_form() {
        let uri = ConnectionUri::parse("bolt://db:9999").unwrap();
        assert_eq!(uri.authority(), "db:9999");
        assert_eq!(uri.to_string(), "bolt://db:9999");
    }
}
