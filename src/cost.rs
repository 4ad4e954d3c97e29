//! Cost and cardinality estimation
//!
//! Walks a plan in execution order and computes `(nr_items, cost)` per
//! node: the number of rows the node is expected to emit and the cumulative
//! cost of producing them. Results are memoized in the node caches and
//! dropped on any graph mutation.
//!
//! The constants in the formulas are calibration parameters, not contracts;
//! they are collected in [`CostConstants`] so deployments can retune them.
//! Plan choice between near-equal alternatives may shift when they change.

use crate::catalog::{Catalog, IndexKind};
use crate::error::{PlannerError, PlannerResult};
use crate::plan::ranges::RangeSet;
use crate::plan::{ExecutionPlan, NodeId, NodeKind};
use crate::usage;
use crate::ast::Expr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tunable constants of the cost model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConstants {
    /// Extra per-row cost of a random-order collection scan
    pub random_order_penalty: f64,
    /// Expected reduction per equality-bound attribute on a non-unique index
    pub equality_reduction: f64,
    /// Reduction when both endpoints of a range are bounded
    pub range_both_bounds_divisor: f64,
    /// Reduction when only one endpoint is bounded
    pub range_single_bound_divisor: f64,
    /// Damping per additional bound expression on one attribute
    pub extra_bound_factor: f64,
    /// Base of the tiebreak favoring indexes that match more attributes
    pub hash_tiebreak_base: f64,
    /// Tiebreak decrement per matched attribute
    pub hash_tiebreak_step: f64,
    /// Assumed length of arrays whose size cannot be derived
    pub default_list_length: usize,
    /// Fallback reduction for edge/fulltext/geo lookups without a
    /// selectivity estimate
    pub index_fallback_divisor: f64,
    /// Cost of a NoResults node; non-zero so empty plans still order
    pub no_results_cost: f64,
    /// Input size up to which Sort is costed linearly
    pub sort_linear_threshold: usize,
}

impl Default for CostConstants {
    fn default() -> Self {
        CostConstants {
            random_order_penalty: 1.005,
            equality_reduction: 100.0,
            range_both_bounds_divisor: 10.0,
            range_single_bound_divisor: 2.0,
            extra_bound_factor: 0.95,
            hash_tiebreak_base: 0.999_999_5,
            hash_tiebreak_step: 0.01,
            default_list_length: 100,
            index_fallback_divisor: 100.0,
            no_results_cost: 0.5,
            sort_linear_threshold: 3,
        }
    }
}

/// Estimate of one node's output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub nr_items: usize,
    pub cost: f64,
}

/// Estimate every node of the plan and return the root estimate. Estimates
/// already cached on nodes are reused.
pub fn estimate_plan(
    plan: &mut ExecutionPlan,
    catalog: &Catalog,
    constants: &CostConstants,
) -> PlannerResult<CostEstimate> {
    if !plan.usage_valid {
        usage::analyze(plan)?;
    }
    let root = plan.root();
    let order = plan.dependency_first_order(root);
    let mut memo: BTreeMap<NodeId, CostEstimate> = BTreeMap::new();
    for id in &order {
        let node = plan.node(*id);
        if let (Some(cost), Some(nr_items)) = (node.estimated_cost, node.estimated_nr_items) {
            memo.insert(*id, CostEstimate { nr_items, cost });
            continue;
        }
        let estimate = estimate_node(plan, catalog, constants, *id, &memo)?;
        memo.insert(*id, estimate);
        let node = plan.node_mut(*id);
        node.estimated_cost = Some(estimate.cost);
        node.estimated_nr_items = Some(estimate.nr_items);
    }
    memo.get(&root)
        .copied()
        .ok_or_else(|| PlannerError::internal("root was not estimated"))
}

fn estimate_node(
    plan: &ExecutionPlan,
    catalog: &Catalog,
    constants: &CostConstants,
    id: NodeId,
    memo: &BTreeMap<NodeId, CostEstimate>,
) -> PlannerResult<CostEstimate> {
    let node = plan.node(id);
    let mut in_items = 0usize;
    let mut dep_cost = 0.0f64;
    for dep in &node.dependencies {
        let dep_estimate = memo
            .get(dep)
            .ok_or_else(|| PlannerError::internal("dependency estimated after its consumer"))?;
        in_items += dep_estimate.nr_items;
        dep_cost += dep_estimate.cost;
    }

    let (out_items, local_cost, clamp) = match &node.kind {
        NodeKind::Singleton => (1.0, 1.0, true),
        NodeKind::EnumerateCollection {
            collection, random, ..
        } => {
            let count = catalog.require(collection)?.count();
            let out = in_items as f64 * count as f64;
            let penalty = if *random {
                constants.random_order_penalty
            } else {
                1.0
            };
            (out, out * penalty, true)
        }
        NodeKind::EnumerateList { in_var, .. } => {
            let length = list_length(plan, constants, *in_var, memo);
            let out = in_items as f64 * length as f64;
            (out, out, true)
        }
        NodeKind::IndexRange {
            collection,
            index_id,
            ranges,
            ..
        } => {
            let out = index_items(catalog, constants, collection, index_id, ranges, in_items)?;
            (out, out, true)
        }
        NodeKind::Filter { .. } => {
            // Pessimistic: a filter never reduces the estimate
            (in_items as f64, in_items as f64, true)
        }
        NodeKind::Calculation { .. } => (in_items as f64, in_items as f64, true),
        NodeKind::Subquery { subquery_root, .. } => {
            let sub_items = memo
                .get(subquery_root)
                .map(|e| e.nr_items)
                .ok_or_else(|| PlannerError::internal("subquery estimated after its parent"))?;
            // The nested plan is re-evaluated for every input row
            (
                in_items as f64,
                in_items as f64 * sub_items.max(1) as f64,
                true,
            )
        }
        NodeKind::Sort { .. } => {
            let local = if in_items > constants.sort_linear_threshold {
                in_items as f64 * (in_items as f64).log2()
            } else {
                in_items as f64
            };
            (in_items as f64, local, true)
        }
        NodeKind::Collect {
            group_pairs,
            count_only,
            ..
        } => {
            let out = if *count_only && group_pairs.is_empty() {
                1.0
            } else {
                // Conservative: grouping may not reduce at all
                in_items as f64
            };
            (out, in_items as f64, true)
        }
        NodeKind::Limit { offset, limit, .. } => {
            let out = (*limit).min(in_items.saturating_sub(*offset)) as f64;
            (out, out, true)
        }
        NodeKind::Return { .. } => (in_items as f64, in_items as f64, true),
        NodeKind::Insert { .. }
        | NodeKind::Remove { .. }
        | NodeKind::Update { .. }
        | NodeKind::Replace { .. } => (0.0, in_items as f64, false),
        NodeKind::NoResults => (0.0, constants.no_results_cost, false),
        NodeKind::Remote | NodeKind::Distribute { .. } | NodeKind::Gather { .. } => {
            (in_items as f64, in_items as f64, true)
        }
        NodeKind::Scatter { collection } => {
            let shards = catalog.require(collection)?.shard_ids().len().max(1);
            (in_items as f64, in_items as f64 * shards as f64, true)
        }
    };

    // Keep estimates on non-terminal paths at one row or more, so log() is
    // well-defined and relative preferences stay meaningful
    let nr_items = if clamp {
        (out_items.round() as usize).max(1)
    } else {
        out_items.round() as usize
    };
    let cost = (dep_cost + local_cost).max(f64::MIN_POSITIVE);
    Ok(CostEstimate { nr_items, cost })
}

/// Expected length of the array behind an EnumerateList input, derived by
/// looking through the variable's setter.
fn list_length(
    plan: &ExecutionPlan,
    constants: &CostConstants,
    in_var: crate::variable::VariableId,
    memo: &BTreeMap<NodeId, CostEstimate>,
) -> usize {
    let Some(setter) = plan.var_set_by.get(&in_var) else {
        return constants.default_list_length;
    };
    match plan.get_node(*setter).map(|n| &n.kind) {
        Some(NodeKind::Calculation { expression, .. }) => match expression {
            Expr::Array(items) => items.len(),
            Expr::Range { low, high } => {
                let bounds = low
                    .eval_constant()
                    .and_then(|l| l.as_i64())
                    .zip(high.eval_constant().and_then(|h| h.as_i64()));
                match bounds {
                    Some((low, high)) => high.abs_diff(low) as usize + 1,
                    None => constants.default_list_length,
                }
            }
            _ => constants.default_list_length,
        },
        Some(NodeKind::Subquery { subquery_root, .. }) => memo
            .get(subquery_root)
            .map(|e| e.nr_items)
            .unwrap_or(constants.default_list_length),
        _ => constants.default_list_length,
    }
}

fn index_items(
    catalog: &Catalog,
    constants: &CostConstants,
    collection: &str,
    index_id: &str,
    ranges: &RangeSet,
    in_items: usize,
) -> PlannerResult<f64> {
    let coll = catalog.require(collection)?;
    let index = catalog.require_index(collection, index_id)?;
    let count = coll.count() as f64;
    let in_items = in_items as f64;
    let nr_ranges = ranges.len().max(1) as f64;

    let all_equalities = !ranges.is_empty()
        && ranges
            .iter()
            .all(|conjunct| !conjunct.is_empty() && conjunct.iter().all(|info| info.is_equality()));
    let fully_specified = all_equalities
        && ranges.iter().all(|conjunct| {
            index
                .fields
                .iter()
                .all(|field| conjunct.iter().any(|info| &info.attribute == field))
        });

    let items = match index.kind {
        IndexKind::Primary => in_items * nr_ranges,
        IndexKind::Edge => match index.selectivity_estimate() {
            Some(s) => in_items * nr_ranges * (1.0 / s),
            None => in_items * nr_ranges * count / constants.index_fallback_divisor,
        },
        IndexKind::Hash => {
            if index.unique && fully_specified {
                in_items * nr_ranges
            } else if let (Some(s), true) = (index.selectivity_estimate(), all_equalities) {
                in_items * nr_ranges * s * count
            } else {
                let mut total = 0.0;
                for conjunct in ranges {
                    let matched = conjunct.iter().filter(|info| info.is_equality()).count();
                    let mut value = count;
                    for _ in 0..matched {
                        value /= constants.equality_reduction;
                    }
                    // Slight preference for indexes matching more attributes
                    value *=
                        constants.hash_tiebreak_base - constants.hash_tiebreak_step * matched as f64;
                    total += value;
                }
                in_items * total
            }
        }
        IndexKind::Skiplist => {
            if index.unique && fully_specified {
                in_items * nr_ranges
            } else if let (Some(s), true) = (index.selectivity_estimate(), all_equalities) {
                in_items * nr_ranges * s * count
            } else {
                let mut total = 0.0;
                for conjunct in ranges {
                    let mut value = count;
                    for info in conjunct {
                        if info.is_equality() {
                            value /= constants.equality_reduction;
                        } else if info.has_low() && info.has_high() {
                            value /= constants.range_both_bounds_divisor;
                        } else if info.bound_count() > 0 {
                            value /= constants.range_single_bound_divisor;
                        }
                        let extra = info.lows.len().saturating_sub(1)
                            + info.highs.len().saturating_sub(1);
                        for _ in 0..extra {
                            value *= constants.extra_bound_factor;
                        }
                    }
                    total += value;
                }
                in_items * total
            }
        }
        IndexKind::Fulltext | IndexKind::Geo => {
            in_items * count / constants.index_fallback_divisor
        }
    };
    Ok(items)
}
