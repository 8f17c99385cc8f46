use itertools::Itertools;
use thiserror::Error;
use tokio::net::{lookup_host, ToSocketAddrs};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{ConnectionError, QueryError};
use crate::network::{Connection, NodeConnectionPool, PoolConfig, VerifiedKeyspaceName};
use crate::routing::Token;

use std::time::Duration;
use std::{
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::Arc,
};

/// Port used for known nodes given without one, and for peers.
pub(crate) const DEFAULT_PORT: u16 = 9042;

/// Liveness of a node, as seen by its connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// At least one connection to the node is open.
    Up,
    /// The last attempts to connect failed; the pool keeps retrying with a backoff.
    Down,
    /// No connection attempt finished yet.
    Unknown,
}

/// Node represents a cluster node along with its data and connections
///
/// Nodes are rebuilt on every metadata refresh. A node whose address did not change
/// keeps the connection pool of its previous incarnation.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier of the node.
    pub host_id: Uuid,
    /// Address of the node, which is used to connect to it.
    pub address: SocketAddr,
    /// Datacenter of the node, if known.
    pub datacenter: Option<String>,
    /// Rack of the node, if known.
    pub rack: Option<String>,
    /// Tokens owned by the node on the ring.
    pub tokens: Vec<Token>,

    pool: Option<NodeConnectionPool>,

    // Nodes built in unit tests have no pool, their status is fixed instead.
    #[cfg(test)]
    test_status: NodeStatus,
}

/// A way that Nodes are often passed and accessed in the driver's code.
pub type NodeRef<'a> = &'a Arc<Node>;

/// Information about a node read from the system tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Peer {
    pub(crate) host_id: Uuid,
    pub(crate) address: SocketAddr,
    pub(crate) datacenter: Option<String>,
    pub(crate) rack: Option<String>,
    pub(crate) tokens: Vec<Token>,
}

impl Node {
    /// Creates a new node which starts connecting in the background.
    pub(crate) fn new(
        peer: Peer,
        pool_config: &PoolConfig,
        keyspace_name: Option<VerifiedKeyspaceName>,
    ) -> Self {
        let pool = NodeConnectionPool::new(peer.address, pool_config, keyspace_name);
        Self::with_pool(peer, Some(pool))
    }

    /// Recreates a node with fresh metadata, preserving the pool of `node`.
    pub(crate) fn inherit_with_peer(node: &Node, peer: Peer) -> Self {
        debug_assert_eq!(node.address, peer.address);
        Self::with_pool(peer, node.pool.clone())
    }

    fn with_pool(peer: Peer, pool: Option<NodeConnectionPool>) -> Self {
        Node {
            host_id: peer.host_id,
            address: peer.address,
            datacenter: peer.datacenter,
            rack: peer.rack,
            tokens: peer.tokens,
            pool,
            #[cfg(test)]
            test_status: NodeStatus::Unknown,
        }
    }

    /// Current status of the node.
    pub fn status(&self) -> NodeStatus {
        match &self.pool {
            Some(pool) => pool.status(),
            #[cfg(test)]
            None => self.test_status,
            #[cfg(not(test))]
            None => NodeStatus::Unknown,
        }
    }

    /// Returns true if the driver has any open connections in the pool for this
    /// node.
    pub fn is_up(&self) -> bool {
        self.status() == NodeStatus::Up
    }

    /// The least busy connection to the node.
    pub(crate) fn connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        self.get_pool()?.connection()
    }

    pub(crate) async fn use_keyspace(
        &self,
        keyspace_name: VerifiedKeyspaceName,
    ) -> Result<(), QueryError> {
        if let Some(pool) = &self.pool {
            pool.use_keyspace(keyspace_name).await?;
        }
        Ok(())
    }

    pub(crate) fn get_working_connections(&self) -> Result<Vec<Arc<Connection>>, ConnectionError> {
        self.get_pool()?.get_working_connections()
    }

    pub(crate) async fn wait_until_pool_initialized(&self) {
        if let Some(pool) = &self.pool {
            pool.wait_until_initialized().await;
        }
    }

    pub(crate) fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close();
        }
    }

    fn get_pool(&self) -> Result<&NodeConnectionPool, ConnectionError> {
        self.pool
            .as_ref()
            .ok_or(ConnectionError::NoWorkingConnection { last_error: None })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.host_id == other.host_id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host_id.hash(state);
    }
}

/// Describes a database server known on `Session` startup.
///
/// The name derives from SessionBuilder's `known_node()` family of methods.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[non_exhaustive]
pub enum KnownNode {
    /// A node identified by its hostname, optionally followed by `:port`.
    Hostname(String),
    /// A node identified by its IP address + a port.
    Address(SocketAddr),
}

#[derive(Error, Debug)]
pub(crate) enum DnsLookupError {
    #[error("Failed to perform DNS lookup within {0}ms")]
    Timeout(u128),
    #[error("Empty address list returned by DNS for {0}")]
    EmptyAddressListForHost(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Performs a DNS lookup with provided optional timeout.
async fn lookup_host_with_timeout(
    host: impl ToSocketAddrs,
    hostname_resolution_timeout: Option<Duration>,
) -> Result<impl Iterator<Item = SocketAddr>, DnsLookupError> {
    if let Some(timeout) = hostname_resolution_timeout {
        match tokio::time::timeout(timeout, lookup_host(host)).await {
            Ok(res) => res.map_err(Into::into),
            // Elapsed error from tokio library does not provide any context.
            Err(_) => Err(DnsLookupError::Timeout(timeout.as_millis())),
        }
    } else {
        lookup_host(host).await.map_err(Into::into)
    }
}

// Resolves a hostname, with or without a port. IPv4 addresses are preferred.
pub(crate) async fn resolve_hostname(
    hostname: &str,
    hostname_resolution_timeout: Option<Duration>,
) -> Result<SocketAddr, DnsLookupError> {
    // `lookup_host` wants "host:port". When that fails, retry with the default
    // port, unless the first attempt timed out.
    let addrs = match lookup_host_with_timeout(hostname, hostname_resolution_timeout).await {
        Ok(addrs) => itertools::Either::Left(addrs),
        Err(DnsLookupError::Timeout(t)) => return Err(DnsLookupError::Timeout(t)),
        // Use a default port in case of error, but propagate the original error on failure
        Err(e) => {
            let addrs =
                lookup_host_with_timeout((hostname, DEFAULT_PORT), hostname_resolution_timeout)
                    .await
                    .or(Err(e))?;
            itertools::Either::Right(addrs)
        }
    };

    addrs
        .find_or_last(|addr| matches!(addr, SocketAddr::V4(_)))
        .ok_or_else(|| DnsLookupError::EmptyAddressListForHost(hostname.to_owned()))
}

/// Resolves the given [`KnownNode`]s into addresses.
///
/// Returns the addresses and the list of all hostnames which had to be resolved.
/// Hostnames which failed to resolve are logged and skipped.
pub(crate) async fn resolve_contact_points(
    known_nodes: &[KnownNode],
    hostname_resolution_timeout: Option<Duration>,
) -> (Vec<SocketAddr>, Vec<String>) {
    let mut initial_peers: Vec<SocketAddr> = Vec::with_capacity(known_nodes.len());

    let mut to_resolve: Vec<&String> = Vec::new();
    let mut hostnames: Vec<String> = Vec::new();

    for node in known_nodes.iter() {
        match node {
            KnownNode::Hostname(hostname) => {
                to_resolve.push(hostname);
                hostnames.push(hostname.clone());
            }
            KnownNode::Address(address) => initial_peers.push(*address),
        };
    }
    let resolve_futures = to_resolve.into_iter().map(|hostname| async move {
        match resolve_hostname(hostname, hostname_resolution_timeout).await {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Hostname resolution failed for {}: {}", hostname, &e);
                None
            }
        }
    });
    let resolved: Vec<_> = futures::future::join_all(resolve_futures).await;
    initial_peers.extend(resolved.into_iter().flatten());

    (initial_peers, hostnames)
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Node {
        pub(crate) fn new_for_test(
            id: u16,
            datacenter: Option<&str>,
            rack: Option<&str>,
            tokens: &[i64],
            status: NodeStatus,
        ) -> Self {
            Self {
                host_id: Uuid::from_u128(id as u128),
                address: SocketAddr::from(([127, 0, 0, id as u8], DEFAULT_PORT)),
                datacenter: datacenter.map(ToOwned::to_owned),
                rack: rack.map(ToOwned::to_owned),
                tokens: tokens.iter().copied().map(Token::new).collect(),
                pool: None,
                test_status: status,
            }
        }
    }

    #[tokio::test]
    async fn contact_points_are_resolved() {
        let known = [
            KnownNode::Address(SocketAddr::from(([10, 0, 0, 1], 9042))),
            KnownNode::Hostname("127.0.0.1".to_owned()),
            KnownNode::Hostname("127.0.0.2:19042".to_owned()),
        ];
        let (resolved, hostnames) = resolve_contact_points(&known, None).await;
        assert_eq!(
            resolved,
            vec![
                SocketAddr::from(([10, 0, 0, 1], 9042)),
                SocketAddr::from(([127, 0, 0, 1], 9042)),
                SocketAddr::from(([127, 0, 0, 2], 19042)),
            ]
        );
        assert_eq!(hostnames, vec!["127.0.0.1", "127.0.0.2:19042"]);
    }

    #[test]
    fn node_without_pool_has_no_connections() {
        let node = Node::new_for_test(1, Some("dc1"), None, &[0], NodeStatus::Down);
        assert!(!node.is_up());
        assert!(matches!(
            node.connection(),
            Err(ConnectionError::NoWorkingConnection { .. })
        ));
    }
}
