//! Driver construction and configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bolt::packstream::PackValue;

use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PoolConfig, PoolMetrics};
use super::retry::RetryPolicy;
use super::routing::{RoutingCache, RoutingDriver};
use super::session::{ConnectionProvider, Session, SessionConfig};
use super::uri::ConnectionUri;
use super::value::Value;

/// Credentials sent with HELLO.
#[derive(Clone)]
pub enum AuthToken {
    /// No authentication.
    None,
    /// Username and password.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
        /// Authentication realm.
        realm: Option<String>,
    },
    /// Bearer token, e.g. from an SSO provider.
    Bearer {
        /// The token.
        token: String,
    },
    /// Kerberos ticket, base64 encoded.
    Kerberos {
        /// The ticket.
        ticket: String,
    },
    /// Custom scheme for server-side auth plugins.
    Custom {
        /// Scheme name the server knows.
        scheme: String,
        /// Principal.
        principal: String,
        /// Credentials.
        credentials: String,
        /// Realm.
        realm: Option<String>,
        /// Extra scheme-specific parameters.
        parameters: HashMap<String, Value>,
    },
}

impl AuthToken {
    /// No authentication.
    pub fn none() -> Self {
        Self::None
    }

    /// Basic username/password auth.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Basic auth within a realm.
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer token auth.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Kerberos auth from a base64 ticket.
    pub fn kerberos(ticket: impl Into<String>) -> Self {
        Self::Kerberos {
            ticket: ticket.into(),
        }
    }

    /// Scheme name as sent on the wire.
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// Flatten into the HELLO extras entries.
    pub(crate) fn to_wire(&self) -> HashMap<String, PackValue> {
        let mut map = HashMap::new();
        map.insert(
            "scheme".to_string(),
            PackValue::String(self.scheme().to_string()),
        );
        match self {
            Self::None => {}
            Self::Basic {
                username,
                password,
                realm,
            } => {
                map.insert(
                    "principal".to_string(),
                    PackValue::String(username.clone()),
                );
                map.insert(
                    "credentials".to_string(),
                    PackValue::String(password.clone()),
                );
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), PackValue::String(realm.clone()));
                }
            }
            Self::Bearer { token } => {
                map.insert("credentials".to_string(), PackValue::String(token.clone()));
            }
            Self::Kerberos { ticket } => {
                map.insert(
                    "principal".to_string(),
                    PackValue::String(String::new()),
                );
                map.insert(
                    "credentials".to_string(),
                    PackValue::String(ticket.clone()),
                );
            }
            Self::Custom {
                principal,
                credentials,
                realm,
                parameters,
                ..
            } => {
                map.insert(
                    "principal".to_string(),
                    PackValue::String(principal.clone()),
                );
                map.insert(
                    "credentials".to_string(),
                    PackValue::String(credentials.clone()),
                );
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), PackValue::String(realm.clone()));
                }
                if !parameters.is_empty() {
                    let wire: HashMap<String, PackValue> = parameters
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone().into()))
                        .collect();
                    map.insert("parameters".to_string(), PackValue::Map(wire));
                }
            }
        }
        map
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials stay out of logs.
        match self {
            Self::None => f.write_str("AuthToken::None"),
            Self::Basic { username, .. } => {
                write!(f, "AuthToken::Basic {{ username: {:?} }}", username)
            }
            Self::Bearer { .. } => f.write_str("AuthToken::Bearer"),
            Self::Kerberos { .. } => f.write_str("AuthToken::Kerberos"),
            Self::Custom { scheme, principal, .. } => write!(
                f,
                "AuthToken::Custom {{ scheme: {:?}, principal: {:?} }}",
                scheme, principal
            ),
        }
    }
}

/// A `host:port` pair identifying one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl ServerAddress {
    /// New address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host[:port]` string; the port defaults to 7687.
    pub fn parse(s: &str) -> Option<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().ok()?;
                if host.is_empty() {
                    return None;
                }
                Some(Self::new(host, port))
            }
            None => {
                if s.is_empty() {
                    None
                } else {
                    Some(Self::new(s, super::uri::DEFAULT_BOLT_PORT))
                }
            }
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a driver needs to know, fixed at construction.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Parsed connection URI; fixes driver family and TLS policy.
    pub uri: ConnectionUri,
    /// Credentials for HELLO.
    pub auth: AuthToken,
    /// Client identification sent to the server.
    pub user_agent: String,
    /// Per-authority bound on checked-out connections.
    pub max_pool_size: usize,
    /// How long an acquire may wait for a pool permit.
    pub acquisition_timeout: Duration,
    /// TCP connect plus handshake deadline.
    pub connect_timeout: Duration,
    /// Idle age beyond which a pooled connection is probed with RESET.
    pub liveness_check_timeout: Duration,
    /// Pooled connections older than this are retired.
    pub max_connection_lifetime: Duration,
    /// Default records per PULL (-1 for everything at once).
    pub fetch_size: i64,
    /// Backoff policy for managed transactions.
    pub retry: RetryPolicy,
    /// Injected routing table cache; `None` uses a process-local one.
    pub routing_cache: Option<Arc<dyn RoutingCache>>,
}

impl DriverConfig {
    /// Configuration from a URI and credentials.
    ///
    /// URI user-info is used as basic auth when no explicit token is
    /// given.
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let uri = ConnectionUri::parse(uri)?;
        let auth = match (&auth, &uri.username) {
            (AuthToken::None, Some(username)) => AuthToken::basic(
                username.clone(),
                uri.password.clone().unwrap_or_default(),
            ),
            _ => auth,
        };
        Ok(Self {
            uri,
            auth,
            user_agent: default_user_agent(),
            max_pool_size: 100,
            acquisition_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            liveness_check_timeout: Duration::from_secs(30),
            max_connection_lifetime: Duration::from_secs(3600),
            fetch_size: 1000,
            retry: RetryPolicy::default(),
            routing_cache: None,
        })
    }

    /// Start building a configuration.
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        Ok(DriverConfigBuilder {
            config: Self::new(uri, auth)?,
        })
    }

    /// Address of the URI authority.
    pub(crate) fn address(&self) -> ServerAddress {
        ServerAddress::new(self.uri.host.clone(), self.uri.port)
    }

    /// Pool settings derived from this configuration.
    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.max_pool_size,
            acquisition_timeout: self.acquisition_timeout,
            connect_timeout: self.connect_timeout,
            liveness_check_timeout: self.liveness_check_timeout,
            max_lifetime: self.max_connection_lifetime,
        }
    }

    /// Routing context for HELLO and ROUTE: the URI's pass-through
    /// query keys plus the original authority.
    pub(crate) fn routing_context_wire(&self) -> HashMap<String, PackValue> {
        let mut context: HashMap<String, PackValue> = self
            .uri
            .routing_context
            .iter()
            .map(|(k, v)| (k.clone(), PackValue::String(v.clone())))
            .collect();
        context.insert(
            "address".to_string(),
            PackValue::String(self.uri.authority()),
        );
        context
    }
}

fn default_user_agent() -> String {
    format!("bifrost-driver/{}", env!("CARGO_PKG_VERSION"))
}

/// Builder for [`DriverConfig`].
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// Client identification string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Per-authority pool bound.
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.config.max_pool_size = size;
        self
    }

    /// Pool permit wait deadline.
    pub fn with_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquisition_timeout = timeout;
        self
    }

    /// TCP connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Idle age that triggers a RESET probe before reuse.
    pub fn with_liveness_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.liveness_check_timeout = timeout;
        self
    }

    /// Maximum age of a pooled connection.
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    /// Default records per PULL.
    pub fn with_fetch_size(mut self, fetch_size: i64) -> Self {
        self.config.fetch_size = fetch_size;
        self
    }

    /// Managed-transaction retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Inject a routing table cache.
    pub fn with_routing_cache(mut self, cache: Arc<dyn RoutingCache>) -> Self {
        self.config.routing_cache = Some(cache);
        self
    }

    /// Finish.
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

enum DriverInner {
    Direct(Arc<ConnectionPool>),
    Routed(Arc<RoutingDriver>),
}

/// Entry point: owns the pools and creates sessions.
///
/// The URI scheme picks the family: `bolt*` talks to exactly one
/// server, `neo4j*` discovers the cluster and routes by access mode.
/// The driver is cheap to share; clone the `Arc` it usually lives in.
pub struct Driver {
    config: Arc<DriverConfig>,
    inner: DriverInner,
}

impl Driver {
    /// Driver for `uri` with `auth`.
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        Self::with_config(DriverConfig::new(uri, auth)?)
    }

    /// Driver from a prepared configuration.
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        if config.uri.scheme.is_http() {
            return Err(DriverError::config(
                "http/https URIs are served by the HTTP transport driver, not the Bolt core",
            ));
        }

        let config = Arc::new(config);
        let inner = if config.uri.scheme.is_routed() {
            DriverInner::Routed(RoutingDriver::new(config.clone()))
        } else {
            DriverInner::Direct(ConnectionPool::new(
                config.address(),
                config.uri.tls_policy(),
                config.auth.clone(),
                config.user_agent.clone(),
                None,
                config.pool_config(),
            ))
        };

        Ok(Self { config, inner })
    }

    /// Open a session.
    pub fn session(&self, config: SessionConfig) -> Session {
        let provider = match &self.inner {
            DriverInner::Direct(pool) => ConnectionProvider::Direct(pool.clone()),
            DriverInner::Routed(routing) => ConnectionProvider::Routed(routing.clone()),
        };
        Session::new(provider, self.config.clone(), config)
    }

    /// Open a session with default settings.
    pub fn default_session(&self) -> Session {
        self.session(SessionConfig::default())
    }

    /// Check that at least one server answers.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        match &self.inner {
            DriverInner::Direct(pool) => pool.verify_connectivity().await,
            DriverInner::Routed(routing) => routing.verify_connectivity().await,
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) -> DriverResult<()> {
        match &self.inner {
            DriverInner::Direct(pool) => pool.close().await,
            DriverInner::Routed(routing) => routing.close().await,
        }
        Ok(())
    }

    /// Pool counters, aggregated across authorities for routed drivers.
    pub fn metrics(&self) -> PoolMetrics {
        match &self.inner {
            DriverInner::Direct(pool) => pool.metrics(),
            DriverInner::Routed(routing) => routing.metrics(),
        }
    }

    /// The configuration this driver was built with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("uri", &self.config.uri.to_string())
            .field(
                "family",
                &match &self.inner {
                    DriverInner::Direct(_) => "direct",
                    DriverInner::Routed(_) => "routed",
                },
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::uri::{Scheme, TlsPolicy};

    #[test]
    fn auth_token_schemes() {
        assert_eq!(AuthToken::none().scheme(), "none");
        assert_eq!(AuthToken::basic("u", "p").scheme(), "basic");
        assert_eq!(AuthToken::bearer("t").scheme(), "bearer");
        assert_eq!(AuthToken::kerberos("dGlja2V0").scheme(), "kerberos");
    }

    #[test]
    fn basic_auth_wire_form() {
        let wire = AuthToken::basic_with_realm("neo4j", "secret", "native").to_wire();
        assert_eq!(wire.get("scheme").and_then(|v| v.as_str()), Some("basic"));
        assert_eq!(wire.get("principal").and_then(|v| v.as_str()), Some("neo4j"));
        assert_eq!(
            wire.get("credentials").and_then(|v| v.as_str()),
            Some("secret")
        );
        assert_eq!(wire.get("realm").and_then(|v| v.as_str()), Some("native"));
    }

    #[test]
    fn bearer_auth_wire_form() {
        let wire = AuthToken::bearer("jwt-token").to_wire();
        assert_eq!(wire.get("scheme").and_then(|v| v.as_str()), Some("bearer"));
        assert_eq!(
            wire.get("credentials").and_then(|v| v.as_str()),
            Some("jwt-token")
        );
        assert!(!wire.contains_key("principal"));
    }

    #[test]
    fn auth_debug_hides_credentials() {
        let debug = format!("{:?}", AuthToken::basic("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn server_address_parsing() {
        assert_eq!(
            ServerAddress::parse("core1:7688"),
            Some(ServerAddress::new("core1", 7688))
        );
        assert_eq!(
            ServerAddress::parse("core1"),
            Some(ServerAddress::new("core1", 7687))
        );
        assert_eq!(ServerAddress::parse(""), None);
        assert_eq!(ServerAddress::parse(":7687"), None);
        assert_eq!(ServerAddress::parse("core1:xyz"), None);
    }

    #[test]
    fn config_defaults() {
        let config = DriverConfig::new("bolt://localhost:7687", AuthToken::none()).unwrap();
        assert_eq!(config.max_pool_size, 100);
        assert_eq!(config.fetch_size, 1000);
        assert_eq!(config.acquisition_timeout, Duration::from_secs(60));
        assert!(config.user_agent.starts_with("bifrost-driver/"));
        assert_eq!(config.uri.scheme, Scheme::Bolt);
    }

    #[test]
    fn config_adopts_userinfo_auth() {
        let config = DriverConfig::new("bolt://alice:pw@db:7687", AuthToken::none()).unwrap();
        match &config.auth {
            AuthToken::Basic { username, password, .. } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "pw");
            }
            other => panic!("expected basic auth, got {:?}", other),
        }

        // An explicit token wins over user-info.
        let config =
            DriverConfig::new("bolt://alice:pw@db:7687", AuthToken::bearer("t")).unwrap();
        assert_eq!(config.auth.scheme(), "bearer");
    }

    #[test]
    fn config_builder() {
        let config = DriverConfig::builder("bolt://db:7687", AuthToken::none())
            .unwrap()
            .with_max_pool_size(10)
            .with_fetch_size(250)
            .with_connect_timeout(Duration::from_secs(5))
            .with_user_agent("app/1.0")
            .build();
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.fetch_size, 250);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "app/1.0");

        let pool = config.pool_config();
        assert_eq!(pool.max_size, 10);
        assert_eq!(pool.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn routing_context_carries_address_and_query_keys() {
        let config =
            DriverConfig::new("neo4j://db:7687/?policy=eu&database=movies", AuthToken::none())
                .unwrap();
        let context = config.routing_context_wire();
        assert_eq!(context.get("policy").and_then(|v| v.as_str()), Some("eu"));
        assert_eq!(
            context.get("address").and_then(|v| v.as_str()),
            Some("db:7687")
        );
        assert!(!context.contains_key("database"));
        assert_eq!(config.uri.database.as_deref(), Some("movies"));
    }

    #[test]
    fn driver_families() {
        let direct = Driver::new("bolt://localhost:7687", AuthToken::none()).unwrap();
        assert!(format!("{:?}", direct).contains("direct"));

        let routed = Driver::new("neo4j://localhost:7687", AuthToken::none()).unwrap();
        assert!(format!("{:?}", routed).contains("routed"));
    }

    #[test]
    fn http_schemes_are_refused() {
        let err = Driver::new("http://localhost:7474", AuthToken::none()).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        let err = Driver::new("https://localhost:7473", AuthToken::none()).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn tls_policy_reaches_the_config() {
        let config = DriverConfig::new("bolt+ssc://db", AuthToken::none()).unwrap();
        assert_eq!(config.uri.tls_policy(), TlsPolicy::SelfSigned);
    }
}
