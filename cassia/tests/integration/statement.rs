use assert_matches::assert_matches;
use cassia::errors::{BindError, DbError, QueryError};
use cassia::statement::Statement;
use cassia::value::{CqlValue, Unset};
use cassia_mock::RequestOpcode;
use futures::TryStreamExt;

use crate::utils::{
    count_in_cluster, create_keyspace, create_new_session, mock_cluster, setup_tracing,
};

#[tokio::test]
#[ntest::timeout(20000)]
async fn prepare_bind_and_execute() {
    setup_tracing();
    let cluster = mock_cluster(3).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!(
            "CREATE TABLE {}.users (lastname text PRIMARY KEY, age int, city text)",
            ks
        ))
        .await
        .unwrap();

    let insert = session
        .prepare(format!(
            "INSERT INTO {}.users (lastname, age, city) VALUES (?, ?, ?)",
            ks
        ))
        .await
        .unwrap();
    let names: Vec<&str> = insert
        .get_variable_col_specs()
        .iter()
        .map(|spec| spec.name.as_str())
        .collect();
    assert_eq!(names, ["lastname", "age", "city"]);
    assert!(insert.is_token_aware());
    assert_eq!(insert.get_keyspace_name(), Some(ks.as_str()));

    session
        .execute(insert.bind(("Jones", 35, "Austin")).unwrap())
        .await
        .unwrap();
    session
        .execute(insert.bind(("Smith", 40, None::<&str>)).unwrap())
        .await
        .unwrap();

    let select = session
        .prepare(format!("SELECT age, city FROM {}.users WHERE lastname = ?", ks))
        .await
        .unwrap();
    let result = session.execute_unpaged(select.bind(("Jones",)).unwrap()).await.unwrap();
    let row = result.first_row().unwrap();
    assert_eq!(row.get_int("age").unwrap(), 35);
    assert_eq!(row.get_string("city").unwrap(), "Austin");

    let result = session.execute_unpaged(select.bind(("Smith",)).unwrap()).await.unwrap();
    assert!(result.first_row().unwrap().is_null("city").unwrap());

    // Unset leaves the column as it was.
    session
        .execute(insert.bind(("Jones", 36, Unset)).unwrap())
        .await
        .unwrap();
    let result = session.execute_unpaged(select.bind(("Jones",)).unwrap()).await.unwrap();
    let row = result.first_row().unwrap();
    assert_eq!(row.get_int("age").unwrap(), 36);
    assert_eq!(row.get_string("city").unwrap(), "Austin");
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn bind_errors() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!("CREATE TABLE {}.t (a int PRIMARY KEY, b text)", ks))
        .await
        .unwrap();
    let prepared = session
        .prepare(format!("INSERT INTO {}.t (a, b) VALUES (?, ?)", ks))
        .await
        .unwrap();

    assert_matches!(
        prepared.bind((1,)),
        Err(BindError::WrongValuesCount {
            expected: 2,
            actual: 1
        })
    );
    assert_matches!(prepared.bind(("one", "two")), Err(BindError::TypeMismatch(_)));
    assert_matches!(prepared.bind((1, "two")), Ok(_));
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn prepared_statements_are_cached_by_text() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;

    let text = "SELECT host_id FROM system.local";
    let first = session.prepare(text).await.unwrap();
    let prepares = count_in_cluster(&cluster, RequestOpcode::Prepare, text);
    assert!(prepares >= 1);

    let second = session
        .prepare(Statement::new(text).with_page_size(10))
        .await
        .unwrap();
    assert_eq!(first.get_id(), second.get_id());
    assert_eq!(second.get_page_size(), 10);
    assert_eq!(count_in_cluster(&cluster, RequestOpcode::Prepare, text), prepares);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn statement_is_reprepared_when_the_node_forgot_it() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!("CREATE TABLE {}.t (a int PRIMARY KEY, b int)", ks))
        .await
        .unwrap();

    let text = format!("INSERT INTO {}.t (a, b) VALUES (?, ?)", ks);
    let prepared = session.prepare(text.as_str()).await.unwrap();
    let prepares_before = count_in_cluster(&cluster, RequestOpcode::Prepare, &text);

    for node in cluster.nodes() {
        node.forget_prepared_statements();
    }
    session
        .execute(prepared.bind((1, 2)).unwrap())
        .await
        .unwrap();

    assert_eq!(
        count_in_cluster(&cluster, RequestOpcode::Prepare, &text),
        prepares_before + 1
    );
    let mut rows = session
        .execute(format!("SELECT b FROM {}.t WHERE a = 1", ks))
        .await
        .unwrap();
    let row = rows.try_next().await.unwrap().unwrap();
    assert_eq!(row.get_int("b").unwrap(), 2);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn server_errors_are_returned() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;

    assert_matches!(
        session.execute("SELEC * FROM system.local").await,
        Err(QueryError::DbError(DbError::SyntaxError, _))
    );
    assert_matches!(
        session.prepare("SELECT * FROM nowhere.nothing WHERE a = ?").await,
        Err(QueryError::DbError(DbError::Invalid, _))
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn simple_statement_with_values() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!("CREATE TABLE {}.t (a int PRIMARY KEY, b list<text>)", ks))
        .await
        .unwrap();

    session
        .execute(
            Statement::new(format!("INSERT INTO {}.t (a, b) VALUES (?, ?)", ks)).with_values((
                5,
                CqlValue::List(vec![
                    CqlValue::Text("x".to_owned()),
                    CqlValue::Text("y".to_owned()),
                ]),
            )),
        )
        .await
        .unwrap();

    let mut rows = session
        .execute(format!("SELECT b FROM {}.t WHERE a = 5", ks))
        .await
        .unwrap();
    let b: Vec<String> = rows.try_next().await.unwrap().unwrap().get("b").unwrap();
    assert_eq!(b, ["x", "y"]);
}
