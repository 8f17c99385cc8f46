use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cassia_cql::frame::response::event::Event;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::engine::{Engine, NodeInfo};
use crate::errors::MockError;
use crate::node::MockNode;
use crate::DEFAULT_PORT;

const EVENT_BUFFER: usize = 1024;

/// State all nodes of a cluster share: the data, the layout and the event bus.
pub(crate) struct ClusterShared {
    pub(crate) engine: Engine,
    pub(crate) nodes: Vec<NodeInfo>,
    pub(crate) credentials: Option<(String, String)>,
    events: broadcast::Sender<Event>,
}

impl ClusterShared {
    /// Sends `event` to every connection registered for its type.
    pub(crate) fn publish(&self, event: Event) {
        debug!("Publishing {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

/// Returns the next free loopback address, so that concurrently running
/// clusters never share one.
pub fn get_exclusive_local_address() -> IpAddr {
    // A big enough number reduces possibility of clashes with user-taken addresses.
    static ADDRESS_LOWER_THREE_OCTETS: AtomicU32 = AtomicU32::new(4242);
    let next_addr = ADDRESS_LOWER_THREE_OCTETS.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;
    let [_, b, c, d] = next_addr.to_be_bytes();
    IpAddr::V4(Ipv4Addr::new(127, b, c, d))
}

/// Configures a [`MockCluster`].
#[derive(Debug, Clone)]
pub struct MockClusterBuilder {
    datacenters: Vec<usize>,
    credentials: Option<(String, String)>,
    tokens_per_node: usize,
}

impl Default for MockClusterBuilder {
    fn default() -> Self {
        Self {
            datacenters: vec![1],
            credentials: None,
            tokens_per_node: 1,
        }
    }
}

impl MockClusterBuilder {
    /// A cluster of `count` nodes in datacenter `dc1`.
    pub fn nodes(self, count: usize) -> Self {
        self.datacenters(&[count])
    }

    /// Nodes spread over datacenters `dc1`, `dc2`, ..., with the given number of nodes each.
    pub fn datacenters(mut self, node_counts: &[usize]) -> Self {
        self.datacenters = node_counts.to_vec();
        self
    }

    /// Requires password authentication with the given credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn tokens_per_node(mut self, tokens: usize) -> Self {
        self.tokens_per_node = tokens.max(1);
        self
    }

    /// Starts all the nodes.
    pub async fn build(self) -> Result<MockCluster, MockError> {
        let total: usize = self.datacenters.iter().sum();
        if total == 0 {
            return Err(MockError::NoNodes);
        }

        let mut tokens = vec![Vec::with_capacity(self.tokens_per_node); total];
        for (i, token) in evenly_spaced_tokens(total * self.tokens_per_node)
            .into_iter()
            .enumerate()
        {
            tokens[i % total].push(token);
        }

        let mut infos = Vec::with_capacity(total);
        for (dc, count) in self.datacenters.iter().enumerate() {
            for _ in 0..*count {
                let index = infos.len();
                infos.push(NodeInfo {
                    host_id: Uuid::new_v4(),
                    address: get_exclusive_local_address(),
                    datacenter: format!("dc{}", dc + 1),
                    rack: "rack1".to_owned(),
                    tokens: std::mem::take(&mut tokens[index]),
                });
            }
        }

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shared = Arc::new(ClusterShared {
            engine: Engine::default(),
            nodes: infos,
            credentials: self.credentials,
            events,
        });

        let nodes: Vec<MockNode> = shared
            .nodes
            .iter()
            .enumerate()
            .map(|(index, info)| {
                MockNode::new(index, SocketAddr::new(info.address, DEFAULT_PORT), shared.clone())
            })
            .collect();
        for node in &nodes {
            node.start().await?;
        }

        Ok(MockCluster { nodes })
    }
}

/// `count` tokens dividing the Murmur3 token range into equal parts.
fn evenly_spaced_tokens(count: usize) -> Vec<i64> {
    let range = 1_i128 << 64;
    let count = count as i128;
    (0..count)
        .map(|i| (i64::MIN as i128 + i * range / count) as i64)
        .collect()
}

/// A set of fake nodes sharing one schema and data set.
///
/// ```no_run
/// # async fn example() -> Result<(), cassia_mock::MockError> {
/// let cluster = cassia_mock::MockCluster::builder().nodes(3).build().await?;
/// let contact_point = cluster.node(0).address();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MockCluster {
    nodes: Vec<MockNode>,
}

impl MockCluster {
    pub fn builder() -> MockClusterBuilder {
        MockClusterBuilder::default()
    }

    /// # Panics
    ///
    /// Panics if there is no node with the given index.
    pub fn node(&self, index: usize) -> &MockNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[MockNode] {
        &self.nodes
    }

    /// Addresses of all nodes, in order.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.nodes.iter().map(MockNode::address).collect()
    }

    /// Stops every node.
    pub async fn stop(&self) {
        for node in &self.nodes {
            node.stop().await;
        }
    }
}
