use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use viaduct::path::PathMatcher;
use viaduct::types::HttpMethods;

/// Builds a matcher with a mix of literal and parameterized routes, the
/// shape a medium-sized API tends to register.
fn build_matcher() -> PathMatcher<u32> {
    let mut matcher = PathMatcher::new();
    matcher.register(HttpMethods::GET, "/", 0).unwrap();
    matcher.register(HttpMethods::GET, "/ping", 1).unwrap();
    matcher.register(HttpMethods::GET, "/users", 2).unwrap();
    matcher.register(HttpMethods::GET, "/users/:id", 3).unwrap();
    matcher
        .register(HttpMethods::GET, "/users/:id/posts", 4)
        .unwrap();
    matcher
        .register(HttpMethods::GET, "/users/:id/posts/:postId", 5)
        .unwrap();
    matcher
        .register(HttpMethods::POST, "/users/:id", 6)
        .unwrap();
    matcher
        .register(HttpMethods::DELETE, "/users/:id", 7)
        .unwrap();
    matcher
}

fn bench_literal_match(c: &mut Criterion) {
    let matcher = build_matcher();
    c.bench_function("path_matcher/literal", |b| {
        b.iter(|| black_box(matcher.find(&HttpMethods::GET, black_box("/users"))))
    });
}

fn bench_param_match(c: &mut Criterion) {
    let matcher = build_matcher();
    c.bench_function("path_matcher/one_param", |b| {
        b.iter(|| black_box(matcher.find(&HttpMethods::GET, black_box("/users/42"))))
    });
}

fn bench_nested_param_match(c: &mut Criterion) {
    let matcher = build_matcher();
    c.bench_function("path_matcher/two_params", |b| {
        b.iter(|| {
            black_box(matcher.find(&HttpMethods::GET, black_box("/users/42/posts/7")))
        })
    });
}

fn bench_no_match(c: &mut Criterion) {
    let matcher = build_matcher();
    c.bench_function("path_matcher/no_match", |b| {
        b.iter(|| black_box(matcher.find(&HttpMethods::GET, black_box("/nope/at/all"))))
    });
}

criterion_group!(
    benches,
    bench_literal_match,
    bench_param_match,
    bench_nested_param_match,
    bench_no_match
);
criterion_main!(benches);
