use std::ops::ControlFlow;

use assert_matches::assert_matches;
use cassia::errors::{BadQuery, QueryError};
use cassia::response::PagingState;
use cassia::statement::Statement;
use cassia::Session;
use cassia_mock::RequestOpcode;
use futures::{StreamExt, TryStreamExt};

use crate::utils::{
    count_in_cluster, create_keyspace, create_new_session, mock_cluster, setup_tracing,
};

const ROWS: i32 = 10;

async fn prepare_table(session: &Session) -> String {
    let ks = create_keyspace(session).await;
    session
        .execute(format!(
            "CREATE TABLE {}.t (a int, b int, c text, PRIMARY KEY (a, b))",
            ks
        ))
        .await
        .unwrap();

    let insert = session
        .prepare(format!("INSERT INTO {}.t (a, b, c) VALUES (?, ?, 'abc')", ks))
        .await
        .unwrap();
    // Inserted out of order, read back by clustering key.
    for b in (0..ROWS).rev() {
        session.execute(insert.bind((7, b)).unwrap()).await.unwrap();
    }
    ks
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn pager_concatenates_pages() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let text = format!("SELECT a, b, c FROM {}.t WHERE a = 7", ks);
    let statement = Statement::new(text.as_str()).with_page_size(3);
    let pager = session.execute(statement).await.unwrap();
    let rows: Vec<_> = pager.try_collect().await.unwrap();

    let bs: Vec<i32> = rows.iter().map(|row| row.get_int("b").unwrap()).collect();
    assert_eq!(bs, (0..ROWS).collect::<Vec<_>>());
    assert!(rows.iter().all(|row| row.get_string("c").unwrap() == "abc"));

    // 3 + 3 + 3 + 1
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Query, &text), 4);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn execute_pages_by_the_statement_page_size() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let text = format!("SELECT a, b FROM {}.t", ks);
    let mut rows = session
        .execute(Statement::new(text.as_str()).with_page_size(2))
        .await
        .unwrap();
    // Nothing beyond the first page was asked for yet.
    assert_eq!(rows.available_without_fetching(), 2);
    assert!(!rows.is_fully_fetched());
    assert!(rows.request_coordinator().is_some());

    let mut bs = Vec::new();
    while let Some(row) = rows.try_next().await.unwrap() {
        bs.push(row.get_int("b").unwrap());
    }
    assert_eq!(bs, (0..ROWS).collect::<Vec<_>>());
    assert!(rows.is_fully_fetched());
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Query, &text), 5);

    // The unpaged variant ignores the page size.
    let result = session
        .execute_unpaged(Statement::new(text.as_str()).with_page_size(2))
        .await
        .unwrap();
    assert_eq!(result.rows_num(), ROWS as usize);
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Query, &text), 6);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn pager_fetches_on_demand() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let prepared = session
        .prepare(
            Statement::new(format!("SELECT b FROM {}.t WHERE a = ?", ks)).with_page_size(4),
        )
        .await
        .unwrap();
    let mut pager = session
        .execute_iter(prepared.bind((7,)).unwrap())
        .await
        .unwrap();

    // The first page is there as soon as the pager is.
    assert_eq!(pager.available_without_fetching(), 4);
    assert!(!pager.is_fully_fetched());

    let first = pager.next().await.unwrap().unwrap();
    assert_eq!(first.get_int("b").unwrap(), 0);

    let rest: Vec<_> = pager.try_collect().await.unwrap();
    assert_eq!(rest.len(), ROWS as usize - 1);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn single_page_loop() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let statement = Statement::new(format!("SELECT b FROM {}.t WHERE a = 7", ks)).with_page_size(6);
    let mut paging_state = PagingState::start();
    let mut pages = Vec::new();
    loop {
        let (result, paging_state_response) = session
            .execute_single_page(&statement, paging_state)
            .await
            .unwrap();
        pages.push(result.rows_num());
        match paging_state_response.into_paging_control_flow() {
            ControlFlow::Break(()) => break,
            ControlFlow::Continue(new_paging_state) => paging_state = new_paging_state,
        }
    }
    assert_eq!(pages, vec![6, 4]);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn empty_result_and_bad_page_size() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = prepare_table(&session).await;

    let pager = session
        .execute(format!("SELECT b FROM {}.t WHERE a = 8", ks))
        .await
        .unwrap();
    assert_eq!(pager.count().await, 0);

    let statement = Statement::new(format!("SELECT b FROM {}.t", ks)).with_page_size(0);
    assert_matches!(
        session.execute(statement).await,
        Err(QueryError::BadQuery(BadQuery::InvalidPageSize(0)))
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn first_page_error_fails_the_call() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;

    assert_matches!(
        session.execute_iter("SELECT * FROM missing_ks.missing_table").await,
        Err(QueryError::DbError(..))
    );
}
