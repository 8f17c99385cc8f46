use criterion::{criterion_group, criterion_main, Criterion};

use bytes::BytesMut;
use cassia::query_builder::{eq, gte, insert_into, select, Order};
use cassia::routing::partitioner::{calculate_token, Murmur3Partitioner};
use cassia_cql::frame::types;

fn types_benchmark(c: &mut Criterion) {
    let mut buf = BytesMut::with_capacity(64);
    c.bench_function("short", |b| {
        b.iter(|| {
            buf.clear();
            types::write_short(u16::MAX, &mut buf);
            types::read_short(&mut &buf[..]).unwrap();
        })
    });
    c.bench_function("int", |b| {
        b.iter(|| {
            buf.clear();
            types::write_int(-1, &mut buf);
            types::read_int(&mut &buf[..]).unwrap();
        })
    });
    c.bench_function("long", |b| {
        b.iter(|| {
            buf.clear();
            types::write_long(-1, &mut buf);
            types::read_long(&mut &buf[..]).unwrap();
        })
    });
    c.bench_function("string", |b| {
        b.iter(|| {
            buf.clear();
            types::write_string("hello, world", &mut buf).unwrap();
            types::read_string(&mut &buf[..]).unwrap();
        })
    });
}

fn calculate_token_bench(c: &mut Criterion) {
    let simple_pk: Vec<Vec<u8>> = vec![b"I'm prepared!!!".to_vec()];
    let simple_pk_long_column: Vec<Vec<u8>> = vec![".".repeat(2000).into_bytes()];
    let complex_pk: Vec<Vec<u8>> = vec![
        17_i32.to_be_bytes().to_vec(),
        16_i32.to_be_bytes().to_vec(),
        b"I'm prepared!!!".to_vec(),
    ];
    let complex_pk_long_column: Vec<Vec<u8>> = vec![
        17_i32.to_be_bytes().to_vec(),
        16_i32.to_be_bytes().to_vec(),
        ".".repeat(2000).into_bytes(),
    ];

    for (name, pk) in [
        ("simple pk", &simple_pk),
        ("simple pk long column", &simple_pk_long_column),
        ("complex pk", &complex_pk),
        ("complex pk long column", &complex_pk_long_column),
    ] {
        c.bench_function(&format!("calculate_token {}", name), |b| {
            b.iter(|| calculate_token(pk.iter().map(Vec::as_slice)).unwrap())
        });
    }

    let key = ".".repeat(2000).into_bytes();
    c.bench_function("murmur3 hash 2000 bytes", |b| {
        b.iter(|| Murmur3Partitioner::hash(criterion::black_box(&key)))
    });
}

fn query_builder_bench(c: &mut Criterion) {
    c.bench_function("build insert", |b| {
        b.iter(|| {
            insert_into("ks", "users")
                .value("lastname", "Jones")
                .value("age", 35)
                .value("city", "Austin")
                .using_ttl(3600)
                .build()
        })
    });
    c.bench_function("build select", |b| {
        b.iter(|| {
            select(["lastname", "age"])
                .from("ks", "users")
                .where_(eq("lastname", "Jones"))
                .and(gte("age", 30))
                .order_by("age", Order::Desc)
                .limit(10)
                .build()
        })
    });
}

criterion_group!(
    benches,
    types_benchmark,
    calculate_token_bench,
    query_builder_bench
);
criterion_main!(benches);
