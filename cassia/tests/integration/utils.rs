use std::sync::atomic::{AtomicUsize, Ordering};

use cassia::{Session, SessionBuilder};
use cassia_mock::{MockCluster, MockNode, RequestOpcode};

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

static UNIQUE_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn unique_keyspace_name() -> String {
    let cnt = UNIQUE_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_rust_{}", cnt)
}

pub(crate) async fn mock_cluster(nodes: usize) -> MockCluster {
    MockCluster::builder().nodes(nodes).build().await.unwrap()
}

pub(crate) fn session_builder(cluster: &MockCluster) -> SessionBuilder {
    SessionBuilder::new().known_node_addr(cluster.node(0).address())
}

pub(crate) async fn create_new_session(cluster: &MockCluster) -> Session {
    session_builder(cluster).build().await.unwrap()
}

/// Creates a keyspace replicated once, so that every partition has a single replica,
/// and waits until the session sees it.
pub(crate) async fn create_keyspace(session: &Session) -> String {
    let ks = unique_keyspace_name();
    session
        .execute(format!(
            "CREATE KEYSPACE {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
            ks
        ))
        .await
        .unwrap();
    session.refresh_metadata().await.unwrap();
    ks
}

/// Number of QUERY and PREPARE requests received by `node` whose text contains `pattern`.
pub(crate) fn count_statements(node: &MockNode, opcode: RequestOpcode, pattern: &str) -> usize {
    node.requests()
        .iter()
        .filter(|frame| frame.opcode == opcode)
        .filter(|frame| {
            frame
                .body
                .windows(pattern.len())
                .any(|window| window == pattern.as_bytes())
        })
        .count()
}

pub(crate) fn count_in_cluster(cluster: &MockCluster, opcode: RequestOpcode, pattern: &str) -> usize {
    cluster
        .nodes()
        .iter()
        .map(|node| count_statements(node, opcode, pattern))
        .sum()
}

pub(crate) fn count_opcode(node: &MockNode, opcode: RequestOpcode) -> usize {
    node.requests()
        .iter()
        .filter(|frame| frame.opcode == opcode)
        .count()
}
