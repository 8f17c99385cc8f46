use crate::network::{PoolConfig, VerifiedKeyspaceName};
use crate::routing::Token;

use itertools::Itertools;
use std::cmp;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use super::metadata::{Keyspace, Metadata, Strategy};
use super::node::{Node, NodeRef};

/// Represents the state of the cluster: known nodes, the token ring and keyspaces.
///
/// It is immutable after creation, and is replaced atomically upon a metadata refresh.
/// Can be accessed through [Session::get_cluster_state()](crate::client::session::Session::get_cluster_state).
#[derive(Clone)]
pub struct ClusterState {
    /// All nodes known to be part of the cluster, accessible by their host ID.
    pub(crate) known_peers: HashMap<Uuid, Arc<Node>>,

    /// Contains the same set of nodes as `known_peers`, in a stable order.
    pub(crate) all_nodes: Vec<Arc<Node>>,

    /// All keyspaces in the cluster, accessible by their name.
    pub(crate) keyspaces: HashMap<String, Keyspace>,

    /// Global ring, sorted by token.
    ring: Vec<(Token, Arc<Node>)>,

    /// Rings of single datacenters, used for NetworkTopologyStrategy.
    datacenters: HashMap<String, DatacenterRing>,

    /// Datacenter of the first contact point, if it is known.
    contact_point_datacenter: Option<String>,
}

#[derive(Clone)]
struct DatacenterRing {
    ring: Vec<(Token, Arc<Node>)>,
    unique_nodes: usize,
    rack_count: usize,
}

/// Enables printing [ClusterState] struct in a neat way, skipping the clutter involved by
/// the ring being large.
pub(crate) struct ClusterStateNeatDebug<'a>(pub(crate) &'a Arc<ClusterState>);
impl std::fmt::Debug for ClusterStateNeatDebug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cluster_state = &self.0;

        let ring_printer = {
            struct RingSizePrinter(usize);
            impl std::fmt::Debug for RingSizePrinter {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "<size={}>", self.0)
                }
            }
            RingSizePrinter(cluster_state.ring.len())
        };

        f.debug_struct("ClusterState")
            .field(
                "nodes",
                &cluster_state
                    .all_nodes
                    .iter()
                    .map(|n| (n.address, n.datacenter.as_deref(), n.status()))
                    .collect::<Vec<_>>(),
            )
            .field("ring", &ring_printer)
            .field("keyspaces", &cluster_state.keyspaces.keys())
            .finish_non_exhaustive()
    }
}

// Iterates over the ring clockwise, starting at the first entry whose token is >= `token`.
fn ring_range(ring: &[(Token, Arc<Node>)], token: Token) -> impl Iterator<Item = &Arc<Node>> {
    let start = ring.partition_point(|(t, _)| *t < token);
    ring[start..]
        .iter()
        .chain(ring[..start].iter())
        .map(|(_, node)| node)
}

impl ClusterState {
    pub(crate) async fn wait_until_all_pools_are_initialized(&self) {
        for node in self.all_nodes.iter() {
            node.wait_until_pool_initialized().await;
        }
    }

    /// Creates new ClusterState using information about topology held in `metadata`.
    /// Uses provided `known_peers` hashmap to recycle nodes if possible.
    pub(crate) fn new(
        metadata: Metadata,
        pool_config: &PoolConfig,
        known_peers: &HashMap<Uuid, Arc<Node>>,
        used_keyspace: &Option<VerifiedKeyspaceName>,
        contact_point: Option<SocketAddr>,
    ) -> Self {
        let mut new_known_peers: HashMap<Uuid, Arc<Node>> =
            HashMap::with_capacity(metadata.peers.len());
        let mut all_nodes = Vec::with_capacity(metadata.peers.len());

        for peer in metadata.peers {
            // Reuse the pool if the node is still reachable at the same address.
            let node: Arc<Node> = match known_peers.get(&peer.host_id) {
                Some(node) if node.address == peer.address => {
                    if node.datacenter == peer.datacenter
                        && node.rack == peer.rack
                        && node.tokens == peer.tokens
                    {
                        Arc::clone(node)
                    } else {
                        Arc::new(Node::inherit_with_peer(node, peer))
                    }
                }
                _ => Arc::new(Node::new(peer, pool_config, used_keyspace.clone())),
            };

            new_known_peers.insert(node.host_id, Arc::clone(&node));
            all_nodes.push(node);
        }

        // Nodes gone from the topology stop their pools.
        for (host_id, old_node) in known_peers {
            let still_used = new_known_peers
                .get(host_id)
                .is_some_and(|new_node| new_node.address == old_node.address);
            if !still_used {
                old_node.close();
            }
        }

        let contact_point_datacenter = contact_point.and_then(|addr| {
            all_nodes
                .iter()
                .find(|n| n.address == addr)
                .and_then(|n| n.datacenter.clone())
        });

        Self::from_nodes(all_nodes, metadata.keyspaces, contact_point_datacenter)
    }

    fn from_nodes(
        all_nodes: Vec<Arc<Node>>,
        keyspaces: HashMap<String, Keyspace>,
        contact_point_datacenter: Option<String>,
    ) -> Self {
        let ring: Vec<(Token, Arc<Node>)> = all_nodes
            .iter()
            .flat_map(|node| node.tokens.iter().map(move |t| (*t, Arc::clone(node))))
            .sorted_by_key(|(t, _)| *t)
            .collect();

        let mut datacenter_rings: HashMap<&str, Vec<(Token, Arc<Node>)>> = HashMap::new();
        for (token, node) in ring.iter() {
            if let Some(datacenter_name) = node.datacenter.as_deref() {
                datacenter_rings
                    .entry(datacenter_name)
                    .or_default()
                    .push((*token, Arc::clone(node)));
            }
        }
        let datacenters = datacenter_rings
            .into_iter()
            .map(|(name, ring)| {
                let unique_nodes = ring.iter().map(|(_, n)| n.host_id).unique().count();
                // When counting racks consider None as a separate rack
                let rack_count = ring.iter().map(|(_, n)| n.rack.as_ref()).unique().count();
                (
                    name.to_owned(),
                    DatacenterRing {
                        ring,
                        unique_nodes,
                        rack_count,
                    },
                )
            })
            .collect();

        let known_peers = all_nodes
            .iter()
            .map(|node| (node.host_id, Arc::clone(node)))
            .collect();

        ClusterState {
            known_peers,
            all_nodes,
            keyspaces,
            ring,
            datacenters,
            contact_point_datacenter,
        }
    }

    /// Returns a list of all nodes known by the driver.
    pub fn get_nodes_info(&self) -> &[Arc<Node>] {
        &self.all_nodes
    }

    /// Access keyspace details collected by the driver.
    pub fn get_keyspace(&self, keyspace: impl AsRef<str>) -> Option<&Keyspace> {
        self.keyspaces.get(keyspace.as_ref())
    }

    /// Access keyspaces details collected by the driver.
    pub fn get_keyspaces(&self) -> &HashMap<String, Keyspace> {
        &self.keyspaces
    }

    /// Datacenter of the node the driver first connected to.
    pub fn contact_point_datacenter(&self) -> Option<&str> {
        self.contact_point_datacenter.as_deref()
    }

    /// The node owning `token`: the first one whose token is `>=` it, wrapping around.
    pub fn primary_replica(&self, token: Token) -> Option<NodeRef<'_>> {
        ring_range(&self.ring, token).next()
    }

    /// Returns the nodes holding a replica of `token` in `keyspace`, primary owner first.
    ///
    /// An unknown keyspace is treated as replicated to the primary owner only.
    pub fn get_token_endpoints(&self, keyspace: &str, token: Token) -> Vec<Arc<Node>> {
        let strategy = self.keyspaces.get(keyspace).map(|ks| &ks.strategy);
        match strategy {
            Some(Strategy::SimpleStrategy { replication_factor }) => {
                self.simple_strategy_replicas(token, *replication_factor)
            }
            Some(Strategy::NetworkTopologyStrategy {
                datacenter_repfactors,
            }) => self.nts_replicas(token, datacenter_repfactors),
            Some(Strategy::LocalStrategy) | Some(Strategy::Other { .. }) | None => {
                self.primary_replica(token).cloned().into_iter().collect()
            }
        }
    }

    fn simple_strategy_replicas(&self, token: Token, replication_factor: usize) -> Vec<Arc<Node>> {
        let unique_nodes = self.ring.iter().map(|(_, n)| n.host_id).unique().count();
        let num_to_take = cmp::min(replication_factor, unique_nodes);

        ring_range(&self.ring, token)
            .unique_by(|n| n.host_id)
            .take(num_to_take)
            .cloned()
            .collect()
    }

    fn nts_replicas(&self, token: Token, repfactors: &HashMap<String, usize>) -> Vec<Arc<Node>> {
        let mut replicas: Vec<Arc<Node>> = Vec::new();

        // Deterministic order: the primary owner's datacenter first, then by name.
        let primary_dc = self.primary_replica(token).and_then(|n| n.datacenter.as_deref());
        let dc_names = repfactors
            .keys()
            .map(String::as_str)
            .sorted_by_key(|dc| (Some(*dc) != primary_dc, *dc));

        for dc_name in dc_names {
            let Some(dc) = self.datacenters.get(dc_name) else {
                continue;
            };
            let replication_factor = repfactors.get(dc_name).copied().unwrap_or(0);
            replicas.extend(nts_replicas_in_datacenter(dc, token, replication_factor));
        }

        replicas
    }
}

// Walks the datacenter ring picking nodes from racks not used yet. Nodes from used
// racks are accepted only when there are fewer racks than replicas to place.
fn nts_replicas_in_datacenter(
    dc: &DatacenterRing,
    token: Token,
    replication_factor: usize,
) -> Vec<Arc<Node>> {
    let mut replicas_left_to_find = cmp::min(replication_factor, dc.unique_nodes);
    let mut acceptable_repeats = replication_factor.saturating_sub(dc.rack_count);
    let mut used_racks: BTreeSet<Option<&str>> = BTreeSet::new();
    let mut replicas = Vec::with_capacity(replicas_left_to_find);

    // Skipped nodes get another chance once every rack is used.
    let mut skipped: Vec<&Arc<Node>> = Vec::new();

    for next_node in ring_range(&dc.ring, token).unique_by(|n| n.host_id) {
        if replicas_left_to_find == 0 {
            break;
        }
        let cur_rack: Option<&str> = next_node.rack.as_deref();
        if !used_racks.contains(&cur_rack) {
            used_racks.insert(cur_rack);
            replicas_left_to_find -= 1;
            replicas.push(Arc::clone(next_node));
        } else if acceptable_repeats > 0 {
            acceptable_repeats -= 1;
            replicas_left_to_find -= 1;
            replicas.push(Arc::clone(next_node));
        } else {
            skipped.push(next_node);
        }
    }

    replicas.extend(
        skipped
            .into_iter()
            .take(replicas_left_to_find)
            .map(Arc::clone),
    );
    replicas
}
