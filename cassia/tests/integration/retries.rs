use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use cassia::errors::{DbError, QueryError};
use cassia::policies::load_balancing::RoundRobinPolicy;
use cassia::policies::retry::FallthroughRetryPolicy;
use cassia::statement::Statement;
use cassia_mock::{example_db_errors, Condition, MockCluster, Reaction, RequestOpcode, RequestRule};

use crate::utils::{count_in_cluster, mock_cluster, session_builder, setup_tracing};

const TEXT: &str = "SELECT host_id FROM system.local";

fn swallow_on_all_nodes(cluster: &MockCluster) {
    for node in cluster.nodes() {
        node.set_rules(vec![RequestRule(
            Condition::RequestOpcode(RequestOpcode::Query).and(Condition::query_contains(TEXT)),
            Reaction::NoResponse,
        )]);
    }
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn non_idempotent_timeout_is_not_retried() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = session_builder(&cluster)
        .request_timeout(Some(Duration::from_millis(300)))
        .build()
        .await
        .unwrap();
    swallow_on_all_nodes(&cluster);

    let mut statement = Statement::new(TEXT);
    statement.set_is_idempotent(false);
    assert_matches!(
        session.execute(&statement).await,
        Err(QueryError::RequestTimeout(_))
    );
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Query, TEXT), 1);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn idempotent_timeout_is_retried_once() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = session_builder(&cluster)
        .request_timeout(Some(Duration::from_millis(300)))
        .build()
        .await
        .unwrap();
    swallow_on_all_nodes(&cluster);

    let mut statement = Statement::new(TEXT);
    statement.set_is_idempotent(true);
    // The first node times out, the retry on the second one too, and the
    // third is never tried.
    assert_matches!(
        session.execute(&statement).await,
        Err(QueryError::RequestTimeout(_))
    );
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Query, TEXT), 2);

    for node in cluster.nodes() {
        node.clear_rules();
    }
    session.execute(&statement).await.unwrap();
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn statement_timeout_overrides_the_session_one() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = session_builder(&cluster)
        .request_timeout(None)
        .build()
        .await
        .unwrap();
    cluster.node(0).set_rules(vec![RequestRule(
        Condition::query_contains(TEXT),
        Reaction::Delay(Duration::from_millis(500)),
    )]);

    let mut statement = Statement::new(TEXT);
    statement.set_request_timeout(Some(Duration::from_millis(100)));
    assert_matches!(
        session.execute(&statement).await,
        Err(QueryError::RequestTimeout(_))
    );

    statement.set_request_timeout(Some(Duration::from_secs(5)));
    session.execute(&statement).await.unwrap();
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn overloaded_node_is_retried_on_the_next_one() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = session_builder(&cluster)
        .load_balancing(Arc::new(RoundRobinPolicy::new()))
        .build()
        .await
        .unwrap();
    let overloaded = cluster.node(0);
    overloaded.set_rules(vec![RequestRule(
        Condition::query_contains(TEXT),
        Reaction::Error(example_db_errors::overloaded()),
    )]);

    let mut statement = Statement::new(TEXT);
    statement.set_is_idempotent(true);
    for _ in 0..4 {
        let result = session.execute(&statement).await.unwrap();
        assert_eq!(result.request_coordinator(), Some(cluster.node(1).address()));
    }

    // Without idempotency the error is returned as is.
    statement.set_is_idempotent(false);
    let mut errors = 0;
    for _ in 0..4 {
        if let Err(err) = session.execute(&statement).await {
            assert_matches!(err, QueryError::DbError(DbError::Overloaded, _));
            errors += 1;
        }
    }
    assert_eq!(errors, 2);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn fallthrough_never_retries() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = session_builder(&cluster)
        .retry_policy(Arc::new(FallthroughRetryPolicy::new()))
        .build()
        .await
        .unwrap();
    for node in cluster.nodes() {
        node.set_rules(vec![RequestRule(
            Condition::query_contains(TEXT),
            Reaction::Error(example_db_errors::unavailable()),
        )]);
    }

    let mut statement = Statement::new(TEXT);
    statement.set_is_idempotent(true);
    assert_matches!(
        session.execute(&statement).await,
        Err(QueryError::DbError(DbError::Unavailable { .. }, _))
    );
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Query, TEXT), 1);
}
