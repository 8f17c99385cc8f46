use assert_matches::assert_matches;
use cassia::errors::{BadQuery, DbError, QueryError};
use cassia::query_builder::{eq, update};
use cassia::statement::{Batch, BatchType, Statement};
use cassia::response::query_result::Row;
use cassia::Session;
use futures::TryStreamExt;

use crate::utils::{create_keyspace, create_new_session, mock_cluster, setup_tracing};

async fn prepare_table(session: &Session) -> String {
    let ks = create_keyspace(session).await;
    session
        .execute(format!("CREATE TABLE {}.t (k int PRIMARY KEY, v text)", ks))
        .await
        .unwrap();
    ks
}

async fn values(session: &Session, ks: &str) -> Vec<(i32, String)> {
    let rows: Vec<Row> = session
        .execute(format!("SELECT k, v FROM {}.t", ks))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let mut values: Vec<_> = rows
        .iter()
        .map(|row| (row.get_int("k").unwrap(), row.get_string("v").unwrap()))
        .collect();
    values.sort();
    values
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn mixed_batch_is_applied() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let prepared = session
        .prepare(format!("INSERT INTO {}.t (k, v) VALUES (?, ?)", ks))
        .await
        .unwrap();

    let mut batch = Batch::new(BatchType::Logged);
    batch.append_statement(prepared.bind((1, "bound")).unwrap());
    batch.append_statement(format!("INSERT INTO {}.t (k, v) VALUES (2, 'simple')", ks).as_str());
    batch.append_statement(
        Statement::new(format!("INSERT INTO {}.t (k, v) VALUES (?, ?)", ks)).with_values((3, "values")),
    );
    batch.append_statement(
        update(&ks, "t")
            .set("v", "built")
            .where_(eq("k", 2))
            .build(),
    );

    let result = session.execute_batch(&batch).await.unwrap();
    assert!(!result.is_rows());
    assert!(result.request_coordinator().is_some());

    assert_eq!(
        values(&session, &ks).await,
        vec![
            (1, "bound".to_owned()),
            (2, "built".to_owned()),
            (3, "values".to_owned())
        ]
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn failing_batch_changes_nothing() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let mut batch = Batch::new(BatchType::Unlogged);
    batch.append_statement(format!("INSERT INTO {}.t (k, v) VALUES (1, 'a')", ks).as_str());
    batch.append_statement(format!("INSERT INTO {}.missing (k, v) VALUES (2, 'b')", ks).as_str());
    assert_matches!(
        session.execute_batch(&batch).await,
        Err(QueryError::DbError(DbError::Invalid, _))
    );
    assert!(values(&session, &ks).await.is_empty());
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn invalid_batches() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let empty = Batch::new(BatchType::Logged);
    assert_matches!(
        session.execute_batch(&empty).await,
        Err(QueryError::BadQuery(BadQuery::EmptyBatch))
    );

    let mut with_select = Batch::new(BatchType::Logged);
    with_select.append_statement(format!("SELECT * FROM {}.t", ks).as_str());
    assert_matches!(
        session.execute_batch(&with_select).await,
        Err(QueryError::DbError(DbError::Invalid, _))
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn batch_across_keyspaces() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let first = prepare_table(&session).await;
    let second = prepare_table(&session).await;

    let mut batch = Batch::new(BatchType::Logged);
    for ks in [&first, &second] {
        batch.append_statement(format!("INSERT INTO {}.t (k, v) VALUES (1, '{}')", ks, ks).as_str());
    }
    session.execute_batch(&batch).await.unwrap();

    assert_eq!(values(&session, &first).await, vec![(1, first.clone())]);
    assert_eq!(values(&session, &second).await, vec![(1, second.clone())]);
}
