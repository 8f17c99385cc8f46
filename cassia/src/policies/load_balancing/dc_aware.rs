use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{rotated_usable_first, LoadBalancingPolicy, Plan, RoutingInfo};
use crate::cluster::{ClusterState, Node};

/// A data center aware Round-robin load balancing policy.
///
/// Nodes of the local datacenter are rotated first. Nodes of other datacenters are
/// rotated after them if `include_remote` is set, and never contacted otherwise.
///
/// Without an explicitly configured local datacenter, the datacenter of the first
/// contact point is used. If that is unknown too, all nodes are considered local.
#[derive(Debug)]
pub struct DcAwareRoundRobinPolicy {
    index: AtomicUsize,
    local_dc: Option<String>,
    include_remote: bool,
}

impl DcAwareRoundRobinPolicy {
    pub fn new(local_dc: Option<String>, include_remote: bool) -> Self {
        Self {
            index: AtomicUsize::new(0),
            local_dc,
            include_remote,
        }
    }

    fn local_dc<'a>(&'a self, cluster: &'a ClusterState) -> Option<&'a str> {
        self.local_dc
            .as_deref()
            .or_else(|| cluster.contact_point_datacenter())
    }

    fn next_offset(&self) -> usize {
        self.index.fetch_add(1, Ordering::Relaxed)
    }

    fn order<T: AsRef<Node>>(&self, cluster: &ClusterState, nodes: Vec<T>, offset: usize) -> Vec<T> {
        let Some(local_dc) = self.local_dc(cluster) else {
            return rotated_usable_first(nodes, offset);
        };

        let (local, remote): (Vec<T>, Vec<T>) = nodes
            .into_iter()
            .partition(|n| n.as_ref().datacenter.as_deref() == Some(local_dc));

        let mut ordered = rotated_usable_first(local, offset);
        if self.include_remote {
            ordered.extend(rotated_usable_first(remote, offset));
        }
        ordered
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobinPolicy {
    fn plan<'a>(&'a self, _routing_info: &RoutingInfo, cluster: &'a ClusterState) -> Plan<'a> {
        let nodes = self.order(
            cluster,
            cluster.get_nodes_info().iter().collect(),
            self.next_offset(),
        );
        trace!(
            local_dc = self.local_dc(cluster),
            nodes = nodes.len(),
            "DcAwareRoundRobin plan"
        );
        Box::new(nodes.into_iter().cloned())
    }

    fn plan_around<'a>(
        &'a self,
        _routing_info: &RoutingInfo,
        cluster: &'a ClusterState,
        nodes: Vec<Arc<Node>>,
    ) -> (Vec<Arc<Node>>, Plan<'a>) {
        let offset = self.next_offset();
        let ordered = self.order(cluster, nodes, offset);
        let plan = self.order(cluster, cluster.get_nodes_info().iter().collect(), offset);
        (ordered, Box::new(plan.into_iter().cloned()))
    }

    fn preferred_datacenter<'a>(&'a self, cluster: &'a ClusterState) -> Option<&'a str> {
        self.local_dc(cluster)
    }

    fn name(&self) -> String {
        "DcAwareRoundRobinPolicy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::state_tests::mock_cluster_state;
    use crate::cluster::NodeStatus;
    use crate::policies::load_balancing::tests::ids;

    // dc1: 1, 2, 3, 6; dc2: 4, 5

    #[test]
    fn local_nodes_only() {
        let cluster = mock_cluster_state(&[]);
        let policy = DcAwareRoundRobinPolicy::new(Some("dc1".to_owned()), false);
        let info = RoutingInfo::default();

        assert_eq!(ids(policy.plan(&info, &cluster)), vec![1, 2, 3, 6]);
        assert_eq!(ids(policy.plan(&info, &cluster)), vec![2, 3, 6, 1]);
    }

    #[test]
    fn remote_nodes_follow_local_ones() {
        let cluster = mock_cluster_state(&[(2, NodeStatus::Down)]);
        let policy = DcAwareRoundRobinPolicy::new(Some("dc2".to_owned()), true);
        let info = RoutingInfo::default();

        assert_eq!(ids(policy.plan(&info, &cluster)), vec![4, 5, 1, 3, 6, 2]);
        assert_eq!(ids(policy.plan(&info, &cluster)), vec![5, 4, 3, 6, 1, 2]);
    }

    #[test]
    fn contact_point_datacenter_is_the_default() {
        let cluster = mock_cluster_state(&[]);
        let policy = DcAwareRoundRobinPolicy::new(None, false);
        let info = RoutingInfo::default();

        // The contact point of the mocked cluster is in dc1.
        assert_eq!(ids(policy.plan(&info, &cluster)), vec![1, 2, 3, 6]);
    }
}
