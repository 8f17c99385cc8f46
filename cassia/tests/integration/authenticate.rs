use cassia_mock::MockCluster;

use crate::utils::{session_builder, setup_tracing};

async fn cluster_with_credentials() -> MockCluster {
    MockCluster::builder()
        .nodes(2)
        .credentials("cassandra", "cassandra")
        .build()
        .await
        .unwrap()
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn authenticate_superuser() {
    setup_tracing();
    let cluster = cluster_with_credentials().await;

    let session = session_builder(&cluster)
        .user("cassandra", "cassandra")
        .build()
        .await
        .unwrap();
    let result = session
        .execute_unpaged("SELECT data_center FROM system.local")
        .await
        .unwrap();
    assert_eq!(result.rows_num(), 1);
    assert_eq!(session.get_cluster_state().get_nodes_info().len(), 2);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn wrong_or_missing_credentials() {
    setup_tracing();
    let cluster = cluster_with_credentials().await;

    let wrong_password = session_builder(&cluster)
        .user("cassandra", "not the password")
        .build()
        .await;
    assert!(wrong_password.is_err());

    let no_credentials = session_builder(&cluster).build().await;
    assert!(no_credentials.is_err());
}
