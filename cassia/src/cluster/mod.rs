//! This module holds entities that represent the cluster as a whole,
//! nodes in the cluster (together with a pool of connections),
//! and the cluster's state.
//!
//! This includes:
//! - node's representation ([Node]),
//! - topology and schema metadata ([Keyspace], [Strategy]) and its fetching
//!   over a control connection,
//! - [ClusterState], which is a snapshot of the cluster's state.
//!   - [ClusterState] is replaced atomically upon a metadata refresh,
//!     preventing any issues arising from mutability, including races.

mod worker;
pub(crate) use worker::{use_keyspace_result, Cluster, ClusterNeatDebug};

mod state;
pub use state::ClusterState;
#[cfg(test)]
pub(crate) use state::tests as state_tests;

pub(crate) mod node;
pub use node::{KnownNode, Node, NodeRef, NodeStatus};

mod metadata;
pub use metadata::{Keyspace, Strategy};

mod metadata_reader;
