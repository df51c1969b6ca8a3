use criterion::{criterion_group, criterion_main, Criterion};
use shardplan_core::config::{Algebra, CompilerConfig};
use shardplan_hc::{cell_partition, search_dim_sizes, ReverseIndex};
use shardplan_planner::{compile_query, parse_plan, FakeCatalog};

/// R0(x0, x1) ⋈ R1(x1, x2) ⋈ ... ⋈ R{n-1}(x{n-1}, x0)
fn cycle(n: usize) -> ReverseIndex {
    let conditions = (0..n)
        .map(|d| vec![(d, 1), ((d + 1) % n, 0)])
        .collect::<Vec<_>>();
    ReverseIndex::build(&vec![2; n], &conditions).unwrap()
}

fn bench_dimension_search(c: &mut Criterion) {
    let triangle = cycle(3);
    c.bench_function("hc_search_triangle_64", |b| {
        b.iter(|| search_dim_sizes(64, 3, &[1000, 5000, 200], &triangle, 1_000_000).unwrap())
    });

    let five = cycle(5);
    c.bench_function("hc_search_cycle5_128", |b| {
        b.iter(|| search_dim_sizes(128, 5, &[1000; 5], &five, 1_000_000).unwrap())
    });
}

fn bench_cell_partition(c: &mut Criterion) {
    c.bench_function("hc_cell_partition_4x4x4", |b| {
        b.iter(|| cell_partition(&[4, 4, 4], &[0, 2]).unwrap())
    });
}

const TRIANGLE: &str = r#"
query: "Q(x, y, z) :- R(x, y), S(y, z), T(z, x)"
plan:
  op: store
  relation: Q
  input:
    op: join
    condition: "$4 = $3 AND $5 = $0"
    left:
      op: join
      condition: "$1 = $2"
      left:  { op: scan, relation: R, schema: [ {name: x, type: long}, {name: y, type: long} ] }
      right: { op: scan, relation: S, schema: [ {name: y2, type: long}, {name: z, type: long} ] }
    right: { op: scan, relation: T, schema: [ {name: z2, type: long}, {name: x2, type: long} ] }
"#;

fn bench_compile_triangle(c: &mut Criterion) {
    let catalog = FakeCatalog::new(64);
    let config = CompilerConfig {
        algebra: Algebra::HyperCube,
        ..CompilerConfig::default()
    };
    c.bench_function("compile_triangle_hypercube", |b| {
        b.iter(|| {
            let mut parsed = parse_plan(TRIANGLE).unwrap();
            let root = parsed.root().unwrap();
            compile_query(&parsed.query, &mut parsed.arena, root, &catalog, &config).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_dimension_search,
    bench_cell_partition,
    bench_compile_triangle
);
criterion_main!(benches);
