//! # Relay Routing Benchmarks
//!
//! Per-message costs on the hot path:
//!
//! | Stage | Work per message |
//! |-------|------------------|
//! | Topic algebra | parse, union, render |
//! | Exchange matching | one `#`-wildcard binding against one key |
//! | Result routing | scope transition and key selection |
//! | Codec | JSON encode and decode of an envelope |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_bus::topic_matches;
use relay_invoker::{route_output, Emitted, Identity, Output};
use relay_types::{decode, encode, Envelope, PubTopic, Scope, ScopeChain, SubTopic, Topic, REPLY_TO};
use serde_json::json;

fn bench_topic_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic-algebra");

    group.bench_function("parse_and_render_pub", |b| {
        b.iter(|| PubTopic::parse(black_box("orders.eu.priority.b1")).render())
    });
    group.bench_function("parse_and_render_sub", |b| {
        b.iter(|| SubTopic::parse(black_box("orders.eu")).render())
    });

    let left = Topic::parse("orders.eu.priority");
    let right = Topic::parse("gateway.3f2a9c.eu");
    group.bench_function("union", |b| b.iter(|| black_box(&left).union(black_box(&right))));
    group.bench_function("overlaps", |b| {
        b.iter(|| black_box(&left).overlaps(black_box(&right)))
    });

    group.finish();
}

fn bench_topic_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange-matching");

    for keys in [1usize, 4, 16] {
        let topic: Vec<String> = (0..keys).map(|i| format!("k{i:02}")).collect();
        let routing_key = PubTopic::parse(topic.join(".").as_str()).render();
        let binding = SubTopic::parse(topic[keys / 2].as_str()).render();

        group.bench_with_input(BenchmarkId::new("match", keys), &keys, |b, _| {
            b.iter(|| topic_matches(black_box(&binding), black_box(&routing_key)))
        });
        group.bench_with_input(BenchmarkId::new("miss", keys), &keys, |b, _| {
            b.iter(|| topic_matches(black_box("#.absent.#"), black_box(&routing_key)))
        });
    }

    group.finish();
}

fn bench_route_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("result-routing");
    let identity = Identity::new("product", "p1", Some("product"));

    let unscoped = Emitted {
        output: Output::data(json!(20.0)),
        scope: None,
        pubtopic: Some("out".into()),
        opened_scope: false,
    };
    group.bench_function("pubtopic_only", |b| {
        b.iter(|| route_output(black_box(&identity), black_box(&unscoped)))
    });

    let reply = Emitted {
        output: Output::data(json!(20.0)),
        scope: Some(
            ScopeChain::root(Scope::with_id("root").with_field(REPLY_TO, "gw.3f2a9c"))
                .child(Scope::with_id("req").with_field(REPLY_TO, "p1")),
        ),
        pubtopic: Some("out".into()),
        opened_scope: false,
    };
    group.bench_function("reply_with_scope_exit", |b| {
        b.iter(|| route_output(black_box(&identity), black_box(&reply)))
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for fields in [4usize, 64, 512] {
        let data: serde_json::Map<String, serde_json::Value> = (0..fields)
            .map(|i| (format!("field_{i}"), json!(i)))
            .collect();
        let mut envelope = Envelope::new(data).with_scope(Some(ScopeChain::root(
            Scope::with_id("root").with_field(REPLY_TO, "gw.3f2a9c"),
        )));
        envelope.stamp();
        let body = encode(&envelope).unwrap();

        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", fields), &envelope, |b, env| {
            b.iter(|| encode(black_box(env)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode", fields), &body, |b, body| {
            b.iter(|| decode(black_box(body)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_topic_algebra,
    bench_topic_matching,
    bench_route_output,
    bench_codec
);
criterion_main!(benches);
