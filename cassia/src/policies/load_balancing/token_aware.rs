use std::sync::Arc;

use tracing::trace;

use super::{is_usable, LoadBalancingPolicy, Plan, RoutingInfo};
use crate::cluster::{ClusterState, Node};

/// A wrapper load balancing policy that adds token awareness to a child policy.
///
/// When the request carries a token and a keyspace, the replicas owning the token
/// are tried first. The primary owner leads when it is up and in the child's
/// preferred datacenter (if any). The other replicas follow in the order the child
/// gives them, those that are up before those that are down. The rest of the
/// child's plan comes last.
#[derive(Debug)]
pub struct TokenAwarePolicy<P> {
    child_policy: P,
}

impl<P: LoadBalancingPolicy> TokenAwarePolicy<P> {
    pub fn new(child_policy: P) -> Self {
        Self { child_policy }
    }

    fn replicas(routing_info: &RoutingInfo, cluster: &ClusterState) -> Vec<Arc<Node>> {
        let (Some(token), Some(keyspace)) = (routing_info.token, routing_info.keyspace) else {
            return Vec::new();
        };

        let replicas = cluster.get_token_endpoints(keyspace, token);
        trace!(
            token = token.value(),
            keyspace,
            replicas = ?replicas.iter().map(|n| n.address).collect::<Vec<_>>(),
            "TokenAware replicas"
        );
        replicas
    }
}

impl<P: LoadBalancingPolicy> LoadBalancingPolicy for TokenAwarePolicy<P> {
    fn plan<'a>(&'a self, routing_info: &RoutingInfo, cluster: &'a ClusterState) -> Plan<'a> {
        let mut replicas = Self::replicas(routing_info, cluster);
        if replicas.is_empty() {
            return self.child_policy.plan(routing_info, cluster);
        }

        // The primary is set aside, so that the child rotates only the other
        // replicas and each of them comes second equally often.
        let preferred_dc = self.child_policy.preferred_datacenter(cluster);
        let leads = is_usable(&replicas[0])
            && (preferred_dc.is_none() || replicas[0].datacenter.as_deref() == preferred_dc);
        let primary = leads.then(|| replicas.remove(0));

        let (ordered, child_plan) = self
            .child_policy
            .plan_around(routing_info, cluster, replicas);

        // Stable: keeps the child's order within both groups.
        let (usable, down): (Vec<_>, Vec<_>) = ordered.into_iter().partition(|n| is_usable(n));
        let replicas: Vec<Arc<Node>> = primary.into_iter().chain(usable).chain(down).collect();

        let fallback = child_plan.filter({
            let replicas = replicas.clone();
            move |node| !replicas.iter().any(|r| r.host_id == node.host_id)
        });

        Box::new(replicas.into_iter().chain(fallback))
    }

    fn plan_around<'a>(
        &'a self,
        routing_info: &RoutingInfo,
        cluster: &'a ClusterState,
        nodes: Vec<Arc<Node>>,
    ) -> (Vec<Arc<Node>>, Plan<'a>) {
        self.child_policy.plan_around(routing_info, cluster, nodes)
    }

    fn preferred_datacenter<'a>(&'a self, cluster: &'a ClusterState) -> Option<&'a str> {
        self.child_policy.preferred_datacenter(cluster)
    }

    fn name(&self) -> String {
        format!("TokenAwarePolicy{{child_policy: {}}}", self.child_policy.name())
    }
}
