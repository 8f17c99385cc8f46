//! Fake CQL nodes running inside the test process.
//!
//! A [`MockCluster`] starts a number of nodes, each listening on its own loopback
//! address at the standard CQL port, sharing one in-memory schema and data set.
//! Nodes speak protocol v4 well enough for the driver to connect, discover the
//! topology, and run schema statements, queries, prepared statements and batches.
//! [`RequestRule`]s make a node delay, drop or fail chosen requests.

mod actions;
mod cluster;
mod engine;
mod errors;
mod frame;
mod node;

/// Port every node listens on.
pub const DEFAULT_PORT: u16 = 9042;

pub use actions::{example_db_errors, Condition, Reaction, RequestRule};
pub use cluster::{get_exclusive_local_address, MockCluster, MockClusterBuilder};
pub use errors::MockError;
pub use frame::{RequestFrame, RequestOpcode, ResponseFrame, ResponseOpcode};
pub use node::MockNode;

#[cfg(test)]
pub(crate) fn setup_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let testing_layer = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_filter(tracing_subscriber::EnvFilter::from_default_env());
    let noop_layer = tracing_subscriber::fmt::layer().with_writer(std::io::sink);
    let _ = tracing_subscriber::registry()
        .with(testing_layer)
        .with(noop_layer)
        .try_init();
}
