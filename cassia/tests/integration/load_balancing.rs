use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cassia::policies::load_balancing::{DcAwareRoundRobinPolicy, RoundRobinPolicy};
use cassia::routing::Token;
use cassia::statement::Statement;
use cassia_mock::{MockCluster, RequestOpcode};

use crate::utils::{
    count_statements, create_keyspace, create_new_session, mock_cluster, session_builder,
    setup_tracing,
};

#[tokio::test]
#[ntest::timeout(20000)]
async fn round_robin_spreads_requests_evenly() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = session_builder(&cluster)
        .load_balancing(Arc::new(RoundRobinPolicy::new()))
        .build()
        .await
        .unwrap();

    let text = "SELECT release_version FROM system.local WHERE key = 'local'";
    let mut coordinators: HashMap<_, usize> = HashMap::new();
    for _ in 0..9 {
        let result = session.execute(text).await.unwrap();
        *coordinators
            .entry(result.request_coordinator().unwrap())
            .or_default() += 1;
    }

    assert_eq!(coordinators.len(), 3);
    for node in cluster.nodes() {
        assert_eq!(coordinators[&node.address()], 3);
        assert_eq!(count_statements(node, RequestOpcode::Query, text), 3);
    }
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn token_aware_routes_to_the_replica() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!("CREATE TABLE {}.t (k int PRIMARY KEY, v int)", ks))
        .await
        .unwrap();

    let prepared = session
        .prepare(format!("INSERT INTO {}.t (k, v) VALUES (?, ?)", ks))
        .await
        .unwrap();
    assert!(prepared.is_token_aware());

    for k in 0..20 {
        let bound = prepared.bind((k, k)).unwrap();
        let token: Token = bound.token().unwrap();
        let state = session.get_cluster_state();
        let replicas = state.get_token_endpoints(&ks, token);
        assert_eq!(replicas.len(), 1);

        let result = session.execute(&bound).await.unwrap();
        assert_eq!(result.request_coordinator(), Some(replicas[0].address));
    }
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn dc_aware_stays_in_the_local_datacenter() {
    setup_tracing();
    let cluster = MockCluster::builder()
        .datacenters(&[2, 2])
        .build()
        .await
        .unwrap();
    let session = session_builder(&cluster)
        .load_balancing(Arc::new(DcAwareRoundRobinPolicy::new(
            Some("dc2".to_owned()),
            false,
        )))
        .build()
        .await
        .unwrap();

    let dc2: Vec<_> = cluster
        .nodes()
        .iter()
        .filter(|node| node.datacenter() == "dc2")
        .map(|node| node.address())
        .collect();
    assert_eq!(dc2.len(), 2);

    for _ in 0..8 {
        let result = session.execute("SELECT * FROM system.local").await.unwrap();
        assert!(dc2.contains(&result.request_coordinator().unwrap()));
    }
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn stopped_node_is_skipped() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;
    let stopped = cluster.node(2).address();
    cluster.node(2).stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut statement = Statement::new("SELECT * FROM system.local");
    statement.set_is_idempotent(true);
    for _ in 0..6 {
        let result = session.execute(&statement).await.unwrap();
        assert_ne!(result.request_coordinator(), Some(stopped));
    }
}
