use cassia::query_builder::{
    bind_marker, delete, eq, gte, in_, insert_into, select, select_all, update, Order,
};
use futures::TryStreamExt;

use crate::utils::{create_keyspace, create_new_session, mock_cluster, setup_tracing};

#[tokio::test]
#[ntest::timeout(20000)]
async fn built_statements_round_trip() {
    setup_tracing();
    let cluster = mock_cluster(2).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!(
            "CREATE TABLE {}.users (lastname text, seq int, age int, PRIMARY KEY (lastname, seq))",
            ks
        ))
        .await
        .unwrap();

    for seq in 0..5 {
        let insert = insert_into(&ks, "users")
            .value("lastname", "Jones")
            .value("seq", seq)
            .value("age", 30 + seq)
            .build();
        assert_eq!(insert.bind_marker_count(), 0);
        session.execute(insert).await.unwrap();
    }

    let query = select(["seq", "age"])
        .from(&ks, "users")
        .where_(eq("lastname", "Jones"))
        .and(gte("seq", 2))
        .order_by("seq", Order::Desc)
        .limit(2)
        .build();
    let result = session.execute_unpaged(query).await.unwrap();
    let seqs: Vec<i32> = result.rows().iter().map(|r| r.get_int("seq").unwrap()).collect();
    assert_eq!(seqs, [4, 3]);

    session
        .execute(
            update(&ks, "users")
                .set("age", 99)
                .where_(eq("lastname", "Jones"))
                .and(eq("seq", 0))
                .build(),
        )
        .await
        .unwrap();
    session
        .execute(
            delete()
                .from(&ks, "users")
                .where_(eq("lastname", "Jones"))
                .and(in_("seq", [1, 2]))
                .build(),
        )
        .await
        .unwrap();

    let rows: Vec<(i32, i32)> = session
        .execute(
            select_all()
                .from(&ks, "users")
                .where_(eq("lastname", "Jones"))
                .build(),
        )
        .await
        .unwrap()
        .map_ok(|r| (r.get_int("seq").unwrap(), r.get_int("age").unwrap()))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows, [(0, 99), (3, 33), (4, 34)]);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn built_statement_with_markers_is_prepared() {
    setup_tracing();
    let cluster = mock_cluster(1).await;
    let session = create_new_session(&cluster).await;
    let ks = create_keyspace(&session).await;
    session
        .execute(format!("CREATE TABLE {}.t (k int PRIMARY KEY, v int)", ks))
        .await
        .unwrap();

    let insert = insert_into(&ks, "t")
        .value("k", bind_marker())
        .value("v", bind_marker())
        .build();
    assert_eq!(insert.bind_marker_count(), 2);
    let prepared = session.prepare(insert.text()).await.unwrap();
    session.execute(prepared.bind((1, 10)).unwrap()).await.unwrap();

    let mut rows = session
        .execute(select(["v"]).from(&ks, "t").where_(eq("k", 1)).build())
        .await
        .unwrap();
    let row = rows.try_next().await.unwrap().unwrap();
    assert_eq!(row.get_int("v").unwrap(), 10);
}
