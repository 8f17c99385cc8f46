//! Load balancing configurations\
//! `Session` can use any load balancing policy which implements the `LoadBalancingPolicy` trait

use crate::cluster::{ClusterState, Node, NodeStatus};
use crate::frame::types::{Consistency, SerialConsistency};
use crate::routing::Token;

use std::sync::Arc;

mod dc_aware;
mod round_robin;
mod token_aware;
pub use dc_aware::DcAwareRoundRobinPolicy;
pub use round_robin::RoundRobinPolicy;
pub use token_aware::TokenAwarePolicy;

/// Represents info about statement that can be used by load balancing policies.
#[derive(Default, Clone, Debug)]
pub struct RoutingInfo<'a> {
    /// Requested consistency information allows to route requests to the appropriate
    /// datacenters. E.g. requests with a LOCAL_ONE consistency should be routed to the same
    /// datacenter.
    pub consistency: Consistency,
    pub serial_consistency: Option<SerialConsistency>,

    /// Information that are the basis of token-aware routing:
    /// the token of the partition key and the keyspace the statement works on.
    pub token: Option<Token>,
    pub keyspace: Option<&'a str>,
}

/// The list of nodes to try for a request, best first.
///
/// It is consumed lazily: the session stops pulling nodes as soon as one of them
/// answers successfully.
pub type Plan<'a> = Box<dyn Iterator<Item = Arc<Node>> + Send + 'a>;

/// Policy that decides which nodes to contact for each request.
///
/// When a request is prepared to be sent, a `LoadBalancingPolicy` implementation
/// constructs a load balancing plan. That plan is a list of nodes to which
/// the driver will try to send the request. The first elements of the plan are the
/// nodes which are the best to contact.
pub trait LoadBalancingPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the nodes to contact for a given request.
    fn plan<'a>(&'a self, routing_info: &RoutingInfo, cluster: &'a ClusterState) -> Plan<'a>;

    /// Orders a subset of the cluster's nodes the way [`plan`](Self::plan) would,
    /// dropping the ones the policy never contacts, and returns them with a
    /// plan. Both come from the same rotation, which advances once per call.
    ///
    /// Used by wrapping policies, which pick the first candidates themselves.
    fn plan_around<'a>(
        &'a self,
        routing_info: &RoutingInfo,
        cluster: &'a ClusterState,
        nodes: Vec<Arc<Node>>,
    ) -> (Vec<Arc<Node>>, Plan<'a>);

    /// Datacenter whose nodes the policy tries before any other, if there is one.
    fn preferred_datacenter<'a>(&'a self, _cluster: &'a ClusterState) -> Option<&'a str> {
        None
    }

    /// Returns the name of load balancing policy.
    fn name(&self) -> String;
}

impl<P: LoadBalancingPolicy + ?Sized> LoadBalancingPolicy for Arc<P> {
    fn plan<'a>(&'a self, routing_info: &RoutingInfo, cluster: &'a ClusterState) -> Plan<'a> {
        (**self).plan(routing_info, cluster)
    }

    fn plan_around<'a>(
        &'a self,
        routing_info: &RoutingInfo,
        cluster: &'a ClusterState,
        nodes: Vec<Arc<Node>>,
    ) -> (Vec<Arc<Node>>, Plan<'a>) {
        (**self).plan_around(routing_info, cluster, nodes)
    }

    fn preferred_datacenter<'a>(&'a self, cluster: &'a ClusterState) -> Option<&'a str> {
        (**self).preferred_datacenter(cluster)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

fn is_usable(node: &Node) -> bool {
    node.status() != NodeStatus::Down
}

/// Rotates `nodes` left by `offset`, usable nodes first and nodes seen as down last.
///
/// Both groups are rotated separately, so that every usable node is first equally often.
fn rotated_usable_first<T: AsRef<Node>>(nodes: Vec<T>, offset: usize) -> Vec<T> {
    let (mut usable, mut down): (Vec<T>, Vec<T>) =
        nodes.into_iter().partition(|n| is_usable(n.as_ref()));
    rotate(&mut usable, offset);
    rotate(&mut down, offset);
    usable.append(&mut down);
    usable
}

fn rotate<T>(nodes: &mut [T], offset: usize) {
    if !nodes.is_empty() {
        let mid = offset % nodes.len();
        nodes.rotate_left(mid);
    }
}
