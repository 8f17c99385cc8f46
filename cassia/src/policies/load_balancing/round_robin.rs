use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{rotated_usable_first, LoadBalancingPolicy, Plan, RoutingInfo};
use crate::cluster::{ClusterState, Node};

/// A Round-robin load balancing policy.
///
/// Every plan starts one node further than the previous one. Nodes seen as down
/// are tried last.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    index: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_offset(&self) -> usize {
        self.index.fetch_add(1, Ordering::Relaxed)
    }

    fn rotated_cluster(cluster: &ClusterState, offset: usize) -> Plan<'_> {
        let nodes = rotated_usable_first(cluster.get_nodes_info().iter().collect(), offset);
        trace!(offset, nodes = nodes.len(), "RoundRobin plan");
        Box::new(nodes.into_iter().cloned())
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn plan<'a>(&'a self, _routing_info: &RoutingInfo, cluster: &'a ClusterState) -> Plan<'a> {
        Self::rotated_cluster(cluster, self.next_offset())
    }

    fn plan_around<'a>(
        &'a self,
        _routing_info: &RoutingInfo,
        cluster: &'a ClusterState,
        nodes: Vec<Arc<Node>>,
    ) -> (Vec<Arc<Node>>, Plan<'a>) {
        let offset = self.next_offset();
        (
            rotated_usable_first(nodes, offset),
            Self::rotated_cluster(cluster, offset),
        )
    }

    fn name(&self) -> String {
        "RoundRobinPolicy".to_string()
    }
}
