use assert_matches::assert_matches;
use cassia::errors::{InvalidState, NewSessionError, QueryError};
use cassia::response::query_result::Row;
use cassia::SessionBuilder;
use futures::TryStreamExt;

use crate::utils::{create_keyspace, create_new_session, mock_cluster, setup_tracing};

#[tokio::test]
#[ntest::timeout(20000)]
async fn discovers_all_nodes_from_one_contact_point() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;

    let state = session.get_cluster_state();
    let mut discovered: Vec<_> = state.get_nodes_info().iter().map(|n| n.address).collect();
    discovered.sort();
    let mut expected = cluster.addresses();
    expected.sort();
    assert_eq!(discovered, expected);
    assert_eq!(state.contact_point_datacenter(), Some("dc1"));
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn no_known_nodes() {
    setup_tracing();
    let err = SessionBuilder::new().build().await.unwrap_err();
    assert_matches!(err, NewSessionError::EmptyKnownNodesList);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn jones_round_trip() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!(
            "CREATE TABLE {}.users (lastname text PRIMARY KEY, age int, city text, email text, firstname text)",
            ks
        ))
        .await
        .unwrap();

    session
        .execute(format!(
            "INSERT INTO {}.users (lastname, age, city, email, firstname) VALUES ('Jones', 35, 'Austin', 'bob@example.com', 'Bob')",
            ks
        ))
        .await
        .unwrap();

    let select = format!("SELECT firstname, age FROM {}.users WHERE lastname = 'Jones'", ks);
    let rows: Vec<Row> = session
        .execute(select.as_str())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get_int("age").unwrap(), 35);
    assert_eq!(row.get_string("firstname").unwrap(), "Bob");

    session
        .execute(format!("UPDATE {}.users SET age = 36 WHERE lastname = 'Jones'", ks))
        .await
        .unwrap();
    let result = session.execute_unpaged(select.as_str()).await.unwrap();
    assert_eq!(result.rows_num(), 1);
    assert_eq!(result.first_row().unwrap().get_int("age").unwrap(), 36);

    session
        .execute(format!("DELETE FROM {}.users WHERE lastname = 'Jones'", ks))
        .await
        .unwrap();
    let mut rows = session.execute(select.as_str()).await.unwrap();
    assert!(rows.is_fully_fetched());
    assert!(rows.try_next().await.unwrap().is_none());
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn use_keyspace() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!("CREATE TABLE {}.tab (a text PRIMARY KEY)", ks))
        .await
        .unwrap();
    session
        .execute(format!("INSERT INTO {}.tab (a) VALUES ('test1')", ks))
        .await
        .unwrap();

    session.use_keyspace(ks.to_uppercase(), false).await.unwrap();
    assert_eq!(session.get_keyspace().as_deref(), Some(&ks));

    // Every connection of every node uses the keyspace now.
    for _ in 0..6 {
        let result = session.execute_unpaged("SELECT a FROM tab").await.unwrap();
        assert_eq!(result.first_row().unwrap().get_string("a").unwrap(), "test1");
    }

    assert_matches!(
        session.use_keyspace("", false).await,
        Err(QueryError::BadQuery(_))
    );
    assert_matches!(
        session.use_keyspace("not-a-keyspace", false).await,
        Err(QueryError::BadQuery(_))
    );
    assert_eq!(session.get_keyspace().as_deref(), Some(&ks));

    // Unknown keyspaces are rejected by the database.
    assert_matches!(
        session.use_keyspace("does_not_exist", false).await,
        Err(QueryError::DbError(..))
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn use_statement_switches_the_session_keyspace() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;

    session.execute(format!("USE {}", ks)).await.unwrap();
    assert_eq!(session.get_keyspace().as_deref(), Some(&ks));
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn keyspace_given_to_the_builder() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;

    let other = crate::utils::session_builder(&cluster)
        .use_keyspace(&ks, true)
        .build()
        .await
        .unwrap();
    assert_eq!(other.get_keyspace().as_deref(), Some(&ks));

    let err = crate::utils::session_builder(&cluster)
        .use_keyspace("missing_keyspace", false)
        .build()
        .await
        .unwrap_err();
    assert_matches!(err, NewSessionError::UseKeyspace(_));
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn close_is_idempotent_and_final() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    session.execute("SELECT * FROM system.local").await.unwrap();

    assert!(!session.is_closed());
    session.close();
    session.close();
    assert!(session.is_closed());

    assert_matches!(
        session.execute("SELECT * FROM system.local").await,
        Err(QueryError::InvalidState(InvalidState::SessionClosed))
    );
    assert_matches!(
        session.prepare("SELECT * FROM system.local").await,
        Err(QueryError::InvalidState(InvalidState::SessionClosed))
    );
    assert_matches!(
        session.execute_iter("SELECT * FROM system.local").await,
        Err(QueryError::InvalidState(InvalidState::SessionClosed))
    );
    assert_matches!(
        session.use_keyspace("system", false).await,
        Err(QueryError::InvalidState(InvalidState::SessionClosed))
    );
}
