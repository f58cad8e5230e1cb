use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use viaduct::binder::NameList;
use viaduct::context::Context;
use viaduct::req::HttpRequest;
use viaduct::types::HttpMethods;

/// A context with a handful of middleware-contributed keys already merged
/// in, the shape a handler several middleware deep would see.
fn build_context() -> Context {
    let mut ctx = Context::build(HttpRequest::for_test(
        HttpMethods::GET,
        "/users/42",
        "active=true",
    ));
    ctx.params.insert("id".to_string(), "42".to_string());
    let mut patch = serde_json::Map::new();
    patch.insert("step1".to_string(), serde_json::json!(true));
    patch.insert("step2".to_string(), serde_json::json!(true));
    patch.insert("tenant".to_string(), serde_json::json!("acme"));
    ctx.merge_patch(patch);
    ctx.mirror_after_route_match(HttpMethods::GET);
    ctx
}

fn bench_name_list_validation(c: &mut Criterion) {
    c.bench_function("binder/validate_names", |b| {
        b.iter(|| black_box(NameList::new(black_box(&["id", "tenant", "step1", "step2"]))))
    });
}

fn bench_resolve_single_name(c: &mut Criterion) {
    let ctx = build_context();
    c.bench_function("binder/resolve_one", |b| {
        b.iter(|| black_box(ctx.resolve(black_box("id"))))
    });
}

fn bench_resolve_all_names(c: &mut Criterion) {
    let ctx = build_context();
    let names = NameList::new(&["id", "tenant", "step1", "step2", "active"]).unwrap();
    c.bench_function("binder/resolve_all", |b| {
        b.iter(|| black_box(names.resolve_all(black_box(&ctx))))
    });
}

criterion_group!(
    benches,
    bench_name_list_validation,
    bench_resolve_single_name,
    bench_resolve_all_names
);
criterion_main!(benches);
