//! Fluent configuration of a [`Session`].
//!
//! Every option has a default, so only the contact points are required:
//!
//! ```
//! # use cassia::client::session_builder::SessionBuilder;
//! # use cassia::client::Compression;
//! # use cassia::statement::Consistency;
//! # async fn connect() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//!
//! let session = SessionBuilder::new()
//!     .known_nodes(["10.0.0.1:9042", "10.0.0.2:9042"])
//!     .user("app", "secret")
//!     .use_keyspace("orders", false)
//!     .compression(Some(Compression::Lz4))
//!     .default_consistency(Consistency::LocalOne)
//!     .request_timeout(Some(Duration::from_secs(5)))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! A builder can be cloned and built many times, each build opening an
//! independent session.

use super::session::{Session, SessionConfig};
use super::{Compression, PoolSize};
use crate::authentication::{AuthenticatorProvider, PlainTextAuthenticator};
use crate::errors::NewSessionError;
use crate::policies::load_balancing::LoadBalancingPolicy;
use crate::policies::retry::RetryPolicy;
use crate::statement::{Consistency, SerialConsistency};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// Below this, periodic traffic is likely to cost more than it detects.
const LOW_INTERVAL: Duration = Duration::from_secs(1);

/// Collects a [`SessionConfig`] and opens a [`Session`] from it.
#[derive(Clone)]
pub struct SessionBuilder {
    /// The configuration the session is built with.
    pub config: SessionConfig,
}

impl SessionBuilder {
    /// A builder holding the default [`SessionConfig`] and no contact points.
    pub fn new() -> Self {
        SessionBuilder {
            config: SessionConfig::new(),
        }
    }

    /// Adds a contact point given as `host:port` or `host`, resolved when
    /// the session is built. The port defaults to 9042.
    pub fn known_node(mut self, hostname: impl AsRef<str>) -> Self {
        self.config.add_known_node(hostname);
        self
    }

    /// Adds a contact point with a known address.
    pub fn known_node_addr(mut self, node_addr: SocketAddr) -> Self {
        self.config.add_known_node_addr(node_addr);
        self
    }

    /// [`known_node`](Self::known_node) for every hostname, in order.
    pub fn known_nodes(mut self, hostnames: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.config.add_known_nodes(hostnames);
        self
    }

    /// [`known_node_addr`](Self::known_node_addr) for every address, in order.
    pub fn known_nodes_addr(
        mut self,
        node_addrs: impl IntoIterator<Item = impl std::borrow::Borrow<SocketAddr>>,
    ) -> Self {
        self.config.add_known_nodes_addr(node_addrs);
        self
    }

    /// Answers `PasswordAuthenticator` challenges with these credentials.
    /// Replaces any authenticator set before.
    pub fn user(mut self, username: impl Into<String>, passwd: impl Into<String>) -> Self {
        self.config.authenticator = Some(Arc::new(PlainTextAuthenticator::new(
            username.into(),
            passwd.into(),
        )));
        self
    }

    /// Authenticates connections with a custom SASL mechanism.
    ///
    /// ```
    /// # use cassia::client::session_builder::SessionBuilder;
    /// use std::sync::Arc;
    /// use async_trait::async_trait;
    /// use cassia::authentication::{AuthError, AuthenticatorProvider, AuthenticatorSession};
    ///
    /// /// Sends a static token and accepts whatever the server answers.
    /// struct TokenAuth(Vec<u8>);
    ///
    /// struct Accepting;
    ///
    /// #[async_trait]
    /// impl AuthenticatorSession for Accepting {
    ///     async fn evaluate_challenge(
    ///         &mut self,
    ///         _challenge: Option<&[u8]>,
    ///     ) -> Result<Option<Vec<u8>>, AuthError> {
    ///         Err("unexpected challenge".to_owned())
    ///     }
    ///
    ///     async fn success(&mut self, _token: Option<&[u8]>) -> Result<(), AuthError> {
    ///         Ok(())
    ///     }
    /// }
    ///
    /// #[async_trait]
    /// impl AuthenticatorProvider for TokenAuth {
    ///     async fn start_authentication_session(
    ///         &self,
    ///         _authenticator_name: &str,
    ///     ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError> {
    ///         Ok((Some(self.0.clone()), Box::new(Accepting)))
    ///     }
    /// }
    ///
    /// let builder = SessionBuilder::new()
    ///     .known_node("10.0.0.1")
    ///     .authenticator_provider(Arc::new(TokenAuth(b"\0app\0secret".to_vec())));
    /// ```
    pub fn authenticator_provider(
        mut self,
        authenticator_provider: Arc<dyn AuthenticatorProvider>,
    ) -> Self {
        self.config.authenticator = Some(authenticator_provider);
        self
    }

    /// Requests frame body compression. Nodes that do not offer the
    /// algorithm get uncompressed connections instead. Off by default.
    pub fn compression(mut self, compression: Option<Compression>) -> Self {
        self.config.compression = compression;
        self
    }

    /// Sets `TCP_NODELAY` on every connection. On by default.
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    /// Enables TCP keepalives on idle sockets. Independent of the
    /// OPTIONS heartbeat set by [`keepalive_interval`](Self::keepalive_interval).
    pub fn tcp_keepalive_interval(mut self, interval: Duration) -> Self {
        if interval <= LOW_INTERVAL {
            tracing::warn!(?interval, "TCP keepalive interval is very low");
        }
        self.config.tcp_keepalive_interval = Some(interval);
        self
    }

    /// Keyspace every connection switches to before serving requests.
    /// [`Session::use_keyspace`] changes it later.
    pub fn use_keyspace(mut self, keyspace_name: impl Into<String>, case_sensitive: bool) -> Self {
        self.config.used_keyspace = Some(keyspace_name.into());
        self.config.keyspace_case_sensitive = case_sensitive;
        self
    }

    /// Bounds the TCP connect together with the handshake of a connection.
    /// 5 seconds by default.
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Bounds every attempt of a request, 30 seconds by default. Statements
    /// with a timeout of their own ignore it.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Number of connections kept open to each node, 2 by default.
    pub fn pool_size(mut self, size: PoolSize) -> Self {
        self.config.connection_pool_size = size;
        self
    }

    /// Period of the OPTIONS heartbeat on idle connections, 30 seconds by
    /// default.
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        if let Some(interval) = interval.filter(|interval| *interval <= LOW_INTERVAL) {
            tracing::warn!(?interval, "keepalive interval is very low");
        }
        self.config.keepalive_interval = interval;
        self
    }

    /// How long a heartbeat may stay unanswered before its connection is
    /// considered broken, 30 seconds by default.
    pub fn keepalive_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout.filter(|timeout| *timeout <= LOW_INTERVAL) {
            tracing::warn!(
                ?timeout,
                "keepalive timeout is very low, healthy connections may be closed"
            );
        }
        self.config.keepalive_timeout = timeout;
        self
    }

    /// Chooses the nodes requests are sent to. Token-aware round robin over
    /// all nodes by default.
    ///
    /// ```
    /// # use cassia::client::session_builder::SessionBuilder;
    /// use std::sync::Arc;
    /// use cassia::policies::load_balancing::{DcAwareRoundRobinPolicy, TokenAwarePolicy};
    ///
    /// // Replicas in "eu" first, other datacenters only when none is up.
    /// let builder = SessionBuilder::new()
    ///     .known_node("10.0.0.1")
    ///     .load_balancing(Arc::new(TokenAwarePolicy::new(
    ///         DcAwareRoundRobinPolicy::new(Some("eu".to_owned()), true),
    ///     )));
    /// ```
    pub fn load_balancing(mut self, policy: Arc<dyn LoadBalancingPolicy>) -> Self {
        self.config.load_balancing_policy = policy;
        self
    }

    /// Decides whether failed attempts are retried. By default a request is
    /// retried at most once, see
    /// [`DefaultRetryPolicy`](crate::policies::retry::DefaultRetryPolicy).
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Consistency of statements that leave it unset, `LocalQuorum` by default.
    pub fn default_consistency(mut self, consistency: Consistency) -> Self {
        self.config.default_consistency = consistency;
        self
    }

    /// Serial consistency of statements that leave it unset, `LocalSerial`
    /// by default.
    pub fn default_serial_consistency(
        mut self,
        serial_consistency: Option<SerialConsistency>,
    ) -> Self {
        self.config.default_serial_consistency = serial_consistency;
        self
    }

    /// Period of the full topology and schema refresh, 60 seconds by default.
    pub fn cluster_metadata_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.cluster_metadata_refresh_interval = interval;
        self
    }

    /// Whether the control connection subscribes to topology, status and
    /// schema events. On by default. Without events, metadata changes are
    /// only seen on the periodic refresh and on [`Session::refresh_metadata`].
    pub fn register_for_events(mut self, register: bool) -> Self {
        self.config.register_for_events = register;
        self
    }

    /// Connects to the contact points and opens the session.
    ///
    /// Fails if no contact point is given, none resolves, or none accepts
    /// a control connection.
    pub async fn build(&self) -> Result<Session, NewSessionError> {
        Session::connect(self.config.clone()).await
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        SessionBuilder::new()
    }
}
