//! Benchmarks for the match decision procedure.
//!
//! Measures one query against an index populated the way a realistic
//! gfwlist-sized load populates it: mostly domain anchors, a spread of
//! keyed-bucket keyword rules, and a small linear tail.

use criterion::{black_box, BenchmarkId, Criterion, Throughput};

use apf_core::RuleIndex;

fn build_index() -> RuleIndex {
    let mut index = RuleIndex::new();
    for i in 0..5000 {
        index.add(&format!("||domain{i}.example.com"));
    }
    for i in 0..500 {
        index.add(&format!("banner{i:04}.gif"));
    }
    for i in 0..50 {
        index.add(&format!("|https://site{i}.example.net"));
    }
    index.add("@@||allowed.example.com");
    index
}

fn bench_match_url(c: &mut Criterion) {
    let index = build_index();

    let mut group = c.benchmark_group("match_url");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("match_url", "domain_hit"), |b| {
        b.iter(|| index.match_url(black_box("http://www.domain42.example.com/x"), None, false))
    });

    group.bench_function(BenchmarkId::new("match_url", "exception_hit"), |b| {
        b.iter(|| index.match_url(black_box("http://allowed.example.com/x"), None, false))
    });

    group.bench_function(BenchmarkId::new("match_url", "keyed_hit"), |b| {
        b.iter(|| index.match_url(black_box("http://cdn.test/ads/banner0042.gif"), None, false))
    });

    group.bench_function(BenchmarkId::new("match_url", "miss"), |b| {
        b.iter(|| index.match_url(black_box("http://www.unlisted.example.io/"), None, false))
    });

    group.bench_function(BenchmarkId::new("match_url", "domain_only_miss"), |b| {
        b.iter(|| index.match_url(black_box("www.unlisted.example.io:443"), None, true))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_match_url(&mut criterion);
    criterion.final_summary();
}
