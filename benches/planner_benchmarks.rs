//! Planner performance benchmarks: build, optimize, and register phases.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use quarry::ast::{BinaryOp, Expr, ForSource, Query, SortElement, Statement};
use quarry::{Catalog, Collection, Index, IndexKind, Planner, QueryContext};

fn bench_catalog(collections: usize) -> Catalog {
    let mut catalog = Catalog::new();
    for i in 0..collections {
        catalog.add_collection(
            Collection::new(format!("c{i}"), 1000 * (i + 1))
                .with_index(
                    Index::new(
                        format!("c{i}/id"),
                        IndexKind::Hash,
                        vec!["id".to_string()],
                        false,
                        false,
                    )
                    .with_selectivity(0.01),
                )
                .with_index(Index::new(
                    format!("c{i}/ts"),
                    IndexKind::Skiplist,
                    vec!["ts".to_string()],
                    false,
                    false,
                )),
        );
    }
    catalog
}

/// FOR loops over `depth` collections with a filter and sort on the
/// innermost variable.
fn nested_query(depth: usize, ctx: &mut QueryContext) -> Query {
    let mut statements = Vec::new();
    let mut vars = Vec::new();
    for i in 0..depth {
        let v = ctx.variables.create(format!("v{i}"));
        vars.push(v);
        statements.push(Statement::For {
            variable: v,
            source: ForSource::Collection(format!("c{i}")),
        });
    }
    let inner = *vars.last().unwrap();
    statements.push(Statement::Filter {
        condition: Expr::binary(BinaryOp::Eq, Expr::attribute(inner, "id"), Expr::int(7)),
    });
    statements.push(Statement::Sort {
        elements: vec![SortElement {
            expression: Expr::attribute(inner, "ts"),
            ascending: true,
        }],
    });
    statements.push(Statement::Return {
        expression: Expr::reference(inner),
    });
    Query::new(statements)
}

fn bench_full_planning(c: &mut Criterion) {
    // Surface planner log events when benchmarks run with RUST_LOG set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut group = c.benchmark_group("plan_nested_loops");
    for depth in [1usize, 2, 3] {
        let catalog = bench_catalog(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let planner = Planner::default();
            b.iter(|| {
                let mut ctx = QueryContext::new();
                let query = nested_query(depth, &mut ctx);
                planner.plan(&query, &catalog, &mut ctx).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_serialization_round_trip(c: &mut Criterion) {
    let catalog = bench_catalog(2);
    let planner = Planner::default();
    let mut ctx = QueryContext::new();
    let query = nested_query(2, &mut ctx);
    let plan = planner.plan(&query, &catalog, &mut ctx).unwrap();

    c.bench_function("serialize_round_trip", |b| {
        b.iter(|| {
            let document = quarry::plan::serialize::to_json(&plan, &ctx.variables).unwrap();
            let mut registry = quarry::VariableRegistry::new();
            quarry::plan::serialize::from_json(&document, &catalog, &mut registry).unwrap()
        });
    });
}

criterion_group!(benches, bench_full_planning, bench_serialization_round_trip);
criterion_main!(benches);
