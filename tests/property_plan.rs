//! Property-based planner tests (proptest).
//!
//! Generates small query shapes and checks the planner's quantified
//! invariants on every chosen plan: variable contracts, cost monotonicity,
//! register coverage, clear-set soundness, and determinism.

use proptest::prelude::*;

use quarry::ast::{BinaryOp, Expr, ForSource, Query, SortElement, Statement};
use quarry::{Catalog, Collection, Index, IndexKind, Planner, QueryContext};

#[derive(Debug, Clone)]
struct QueryShape {
    count: usize,
    with_index: bool,
    filter_value: Option<i64>,
    sort: bool,
    limit: Option<(u16, u16)>,
}

fn shapes() -> impl Strategy<Value = QueryShape> {
    (
        1usize..2000,
        any::<bool>(),
        proptest::option::of(-100i64..100),
        any::<bool>(),
        proptest::option::of((0u16..50, 1u16..50)),
    )
        .prop_map(|(count, with_index, filter_value, sort, limit)| QueryShape {
            count,
            with_index,
            filter_value,
            sort,
            limit,
        })
}

fn build_catalog(shape: &QueryShape) -> Catalog {
    let mut collection = Collection::new("docs", shape.count);
    if shape.with_index {
        collection = collection
            .with_index(
                Index::new(
                    "docs/id",
                    IndexKind::Hash,
                    vec!["id".to_string()],
                    false,
                    false,
                )
                .with_selectivity(0.01),
            )
            .with_index(Index::new(
                "docs/ts",
                IndexKind::Skiplist,
                vec!["ts".to_string()],
                false,
                false,
            ));
    }
    let mut catalog = Catalog::new();
    catalog.add_collection(collection);
    catalog
}

fn build_query(shape: &QueryShape, ctx: &mut QueryContext) -> Query {
    let d = ctx.variables.create("d");
    let mut statements = vec![Statement::For {
        variable: d,
        source: ForSource::Collection("docs".to_string()),
    }];
    if let Some(value) = shape.filter_value {
        statements.push(Statement::Filter {
            condition: Expr::binary(
                BinaryOp::Eq,
                Expr::attribute(d, "id"),
                Expr::int(value),
            ),
        });
    }
    if shape.sort {
        statements.push(Statement::Sort {
            elements: vec![SortElement {
                expression: Expr::attribute(d, "ts"),
                ascending: true,
            }],
        });
    }
    if let Some((offset, count)) = shape.limit {
        statements.push(Statement::Limit {
            offset: Expr::int(offset as i64),
            count: Expr::int(count as i64),
            full_count: false,
        });
    }
    statements.push(Statement::Return {
        expression: Expr::reference(d),
    });
    Query::new(statements)
}

fn plan_shape(shape: &QueryShape) -> (quarry::ExecutionPlan, QueryContext) {
    let catalog = build_catalog(shape);
    let planner = Planner::default();
    let mut ctx = QueryContext::new();
    let query = build_query(shape, &mut ctx);
    let plan = planner.plan(&query, &catalog, &mut ctx).unwrap();
    (plan, ctx)
}

proptest! {
    #[test]
    fn used_variables_are_always_valid(shape in shapes()) {
        let (plan, _ctx) = plan_shape(&shape);
        for id in plan.reachable_ids() {
            let used = plan.variables_used_here(id);
            prop_assert!(
                used.is_subset(&plan.node(id).vars_valid),
                "node {} uses variables outside its valid set", id
            );
        }
    }

    #[test]
    fn no_node_uses_its_own_output_later(shape in shapes()) {
        let (plan, _ctx) = plan_shape(&shape);
        for id in plan.reachable_ids() {
            let node = plan.node(id);
            for var in node.kind.variables_set_here() {
                prop_assert!(!node.vars_used_later.contains(&var));
            }
        }
    }

    #[test]
    fn cost_never_decreases_downstream(shape in shapes()) {
        let (plan, _ctx) = plan_shape(&shape);
        for id in plan.reachable_ids() {
            let node = plan.node(id);
            let cost = node.estimated_cost.expect("chosen plan is fully costed");
            prop_assert!(cost > 0.0);
            for dep in &node.dependencies {
                let dep_cost = plan.node(*dep).estimated_cost.unwrap();
                prop_assert!(cost >= dep_cost);
            }
        }
    }

    #[test]
    fn registers_cover_all_valid_variables(shape in shapes()) {
        let (plan, _ctx) = plan_shape(&shape);
        let registers = plan.registers.as_ref().expect("chosen plan has registers");
        for id in plan.reachable_ids() {
            let node = plan.node(id);
            for var in &node.vars_valid {
                let location = registers.location(*var);
                prop_assert!(location.is_some(), "variable {var} has no register");
                prop_assert!(location.unwrap().depth <= node.depth);
            }
        }
    }

    #[test]
    fn clear_sets_only_release_inputs(shape in shapes()) {
        let (plan, _ctx) = plan_shape(&shape);
        let registers = plan.registers.as_ref().unwrap();
        for id in plan.reachable_ids() {
            let node = plan.node(id);
            let used_registers: std::collections::BTreeSet<u32> = plan
                .variables_used_here(id)
                .iter()
                .filter_map(|v| registers.location(*v).map(|l| l.register))
                .collect();
            prop_assert!(
                node.regs_to_clear.is_subset(&used_registers),
                "node {} clears registers it does not read", id
            );
            if matches!(node.kind, quarry::NodeKind::Return { .. }) {
                prop_assert!(node.regs_to_clear.is_empty());
            }
        }
    }

    #[test]
    fn planning_is_a_pure_function(shape in shapes()) {
        let run = || {
            let (plan, ctx) = plan_shape(&shape);
            quarry::plan::serialize::to_json(&plan, &ctx.variables).unwrap()
        };
        prop_assert_eq!(run(), run());
    }
}
