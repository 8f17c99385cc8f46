use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use cassia_cql::frame::request::{query, SerializableRequest};
use cassia_cql::frame::value::{SerializedValues, ValueList};
use cassia_cql::frame::{Compression, SerializedRequest};

fn make_query(contents: &str, values: impl ValueList) -> query::Query {
    query::Query {
        contents: contents.to_owned(),
        parameters: query::QueryParameters {
            consistency: cassia_cql::Consistency::LocalQuorum,
            values: SerializedValues::from_bound_values(&values.bound_values()).unwrap(),
            ..Default::default()
        },
    }
}

fn serialized_request_make_bench(c: &mut Criterion) {
    let queries = [
        make_query("INSERT INTO ks.table_name (foo) VALUES (?)", (1234,)),
        make_query(
            "INSERT INTO ks.table_name (foo, bar, baz) VALUES (?, ?, ?)",
            (1234, "a value", "i am storing a string"),
        ),
        make_query(
            "INSERT INTO longer_keyspace.a_big_table_name (foo, bar, baz, boop, blah) VALUES (?, ?, ?, ?, 1000)",
            (
                1234,
                "a value",
                "i am storing a string",
                "dc0c8cd7-d954-47c1-8722-a857941c43fb",
            ),
        ),
    ];

    for compression in [None, Some(Compression::Lz4), Some(Compression::Snappy)] {
        let name = compression.map_or("none", |c| c.as_str());
        let mut group = c.benchmark_group(format!("SerializedRequest.{}", name));
        for query in &queries {
            let query_size = query.to_bytes().unwrap().len();
            group.bench_with_input(
                BenchmarkId::new("SerializedRequest::make", query_size),
                query,
                |b, query| {
                    b.iter(|| {
                        let _ = criterion::black_box(SerializedRequest::make(
                            query,
                            compression,
                            false,
                        ));
                    })
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, serialized_request_make_bench);
criterion_main!(benches);
