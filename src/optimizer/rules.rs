//! Optimizer rule set
//!
//! Each rule is a pure-by-contract transformation over one plan: it either
//! leaves the plan unchanged, rewrites it in place, or forks additional
//! candidate plans. A rule that cannot apply safely reports
//! [`RuleOutcome::Unchanged`]; it never fails the driver.
//!
//! Rules run in level order (see [`default_rules`]); the dead-calculation
//! sweep is registered twice so calculations orphaned by the index rules
//! are cleaned up in a late pass.

use crate::ast::Expr;
use crate::catalog::{Catalog, Index, IndexKind};
use crate::cost::CostConstants;
use crate::error::PlannerResult;
use crate::plan::ranges::{self, RangeSet};
use crate::plan::{ExecutionPlan, NodeId, NodeKind, SortEntry};
use crate::usage;
use crate::variable::VariableId;
use std::collections::BTreeSet;

/// What a rule did to the plan it was given.
#[derive(Debug)]
pub enum RuleOutcome {
    Unchanged,
    Modified,
    /// The given plan is kept and these additional candidates join the
    /// frontier
    Forked(Vec<ExecutionPlan>),
}

/// Read-only context shared by all rules.
pub struct RuleContext<'a> {
    pub catalog: &'a Catalog,
    pub constants: &'a CostConstants,
}

pub type RuleFn = fn(&mut ExecutionPlan, &RuleContext) -> PlannerResult<RuleOutcome>;

/// One rule registration: name, pass level, default toggle, function.
#[derive(Clone, Copy)]
pub struct RuleDef {
    pub name: &'static str,
    pub level: u32,
    pub default_on: bool,
    pub apply: RuleFn,
}

impl std::fmt::Debug for RuleDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDef")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("default_on", &self.default_on)
            .finish()
    }
}

/// The built-in rule table, ordered by level. The table is passed into the
/// optimizer explicitly so tests can run with reduced sets.
pub fn default_rules() -> Vec<RuleDef> {
    vec![
        RuleDef {
            name: "remove-redundant-sorts",
            level: 10,
            default_on: true,
            apply: remove_redundant_sorts,
        },
        RuleDef {
            name: "remove-unnecessary-filters",
            level: 20,
            default_on: true,
            apply: remove_unnecessary_filters,
        },
        RuleDef {
            name: "move-calculations-up",
            level: 30,
            default_on: true,
            apply: move_calculations_up,
        },
        RuleDef {
            name: "move-filters-up",
            level: 35,
            default_on: true,
            apply: move_filters_up,
        },
        RuleDef {
            name: "remove-unnecessary-calculations",
            level: 40,
            default_on: true,
            apply: remove_unnecessary_calculations,
        },
        RuleDef {
            name: "interchange-adjacent-enumerations",
            level: 50,
            default_on: true,
            apply: interchange_adjacent_enumerations,
        },
        RuleDef {
            name: "use-index-range",
            level: 60,
            default_on: true,
            apply: use_index_range,
        },
        RuleDef {
            name: "push-limit-below-sort",
            level: 65,
            default_on: true,
            apply: push_limit_below_sort,
        },
        RuleDef {
            name: "use-index-for-sort",
            level: 70,
            default_on: true,
            apply: use_index_for_sort,
        },
        RuleDef {
            name: "remove-unnecessary-calculations-2",
            level: 80,
            default_on: true,
            apply: remove_unnecessary_calculations,
        },
    ]
}

fn ensure_usage(plan: &mut ExecutionPlan) -> PlannerResult<()> {
    if !plan.usage_valid {
        usage::analyze(plan)?;
    }
    Ok(())
}

/// Expression of the Calculation producing `var`, if that is its setter.
fn calculation_expression(plan: &ExecutionPlan, var: VariableId) -> Option<&Expr> {
    let setter = plan.var_set_by.get(&var)?;
    match &plan.get_node(*setter)?.kind {
        NodeKind::Calculation { expression, .. } => Some(expression),
        _ => None,
    }
}

// ----------------------------------------------------------------------
// remove-redundant-sorts
// ----------------------------------------------------------------------

/// Drop sort elements whose key is constant; elide sorts that lose all
/// elements, and sorts that are re-sorted wholesale by a later sort with
/// only calculations and filters in between.
fn remove_redundant_sorts(
    plan: &mut ExecutionPlan,
    _ctx: &RuleContext,
) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let Some(action) = find_redundant_sort(plan) else {
            break;
        };
        match action {
            SortAction::Remove(id) => plan.unlink_node(id, false)?,
            SortAction::Shrink(id, elements) => {
                let node = plan.node_mut(id);
                if let NodeKind::Sort {
                    elements: current, ..
                } = &mut node.kind
                {
                    *current = elements;
                }
                plan.invalidate_analysis();
            }
        }
        modified = true;
    }
    Ok(outcome(modified))
}

enum SortAction {
    Remove(NodeId),
    Shrink(NodeId, Vec<SortEntry>),
}

fn find_redundant_sort(plan: &ExecutionPlan) -> Option<SortAction> {
    for id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Sort { .. })) {
        if plan.try_root() == Some(id) {
            continue;
        }
        let NodeKind::Sort { elements, .. } = &plan.node(id).kind else {
            continue;
        };
        let keep: Vec<SortEntry> = elements
            .iter()
            .filter(|entry| {
                calculation_expression(plan, entry.variable)
                    .map(|expr| !expr.is_constant())
                    .unwrap_or(true)
            })
            .copied()
            .collect();
        if keep.is_empty() {
            return Some(SortAction::Remove(id));
        }
        if keep.len() < elements.len() {
            return Some(SortAction::Shrink(id, keep));
        }
        // A later sort over the full output makes this one irrelevant when
        // nothing in between depends on row order
        let mut current = id;
        loop {
            let parents = &plan.node(current).parents;
            let [parent] = parents.as_slice() else { break };
            match &plan.node(*parent).kind {
                NodeKind::Calculation { .. } | NodeKind::Filter { .. } => current = *parent,
                NodeKind::Sort { .. } => return Some(SortAction::Remove(id)),
                _ => break,
            }
        }
    }
    None
}

// ----------------------------------------------------------------------
// remove-unnecessary-filters
// ----------------------------------------------------------------------

/// Remove filters with a constant-true condition; a constant-false filter
/// is replaced by NoResults.
fn remove_unnecessary_filters(
    plan: &mut ExecutionPlan,
    _ctx: &RuleContext,
) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let mut action = None;
        for id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Filter { .. })) {
            if plan.try_root() == Some(id) {
                continue;
            }
            let NodeKind::Filter { in_var } = plan.node(id).kind else {
                continue;
            };
            let Some(expr) = calculation_expression(plan, in_var) else {
                continue;
            };
            let Some(value) = expr.eval_constant() else {
                continue;
            };
            action = Some((id, value.is_true()));
            break;
        }
        let Some((id, truthy)) = action else { break };
        if truthy {
            plan.unlink_node(id, false)?;
        } else {
            let empty = plan.add_node(NodeKind::NoResults);
            plan.replace_node(id, empty)?;
        }
        modified = true;
    }
    Ok(outcome(modified))
}

// ----------------------------------------------------------------------
// move-calculations-up / move-filters-up
// ----------------------------------------------------------------------

/// Hoist non-throwing calculations toward the row producers, out of loops
/// whose variables they do not need. A calculation is never moved across a
/// node that can throw (error ordering) or across a Limit (wasted work).
fn move_calculations_up(plan: &mut ExecutionPlan, _ctx: &RuleContext) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let mut action = None;
        for id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Calculation { .. })) {
            if plan.try_root() == Some(id) {
                continue;
            }
            let needed = plan.variables_used_here(id);
            if plan.node_may_throw(id) {
                continue;
            }
            let Some(dep) = plan.node(id).single_dependency() else {
                continue;
            };
            // Never leapfrog another calculation; peers hoist one by one,
            // which keeps the sweep terminating
            if matches!(plan.node(dep).kind, NodeKind::Calculation { .. }) {
                continue;
            }
            if movable_past(plan, dep, &needed) {
                action = Some((id, dep));
                break;
            }
        }
        let Some((id, dep)) = action else { break };
        plan.detach_node(id);
        plan.insert_dependency(dep, id)?;
        modified = true;
    }
    Ok(outcome(modified))
}

/// Hoist filters toward the producers of their condition variable.
/// Filters stop at anything that changes row multiplicity semantics
/// (Limit, Collect) and at throwing nodes, where earlier pruning would
/// suppress errors.
fn move_filters_up(plan: &mut ExecutionPlan, _ctx: &RuleContext) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let mut action = None;
        for id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Filter { .. })) {
            if plan.try_root() == Some(id) {
                continue;
            }
            let needed = plan.variables_used_here(id);
            let Some(dep) = plan.node(id).single_dependency() else {
                continue;
            };
            if matches!(plan.node(dep).kind, NodeKind::Filter { .. }) {
                continue;
            }
            if movable_past(plan, dep, &needed) {
                action = Some((id, dep));
                break;
            }
        }
        let Some((id, dep)) = action else { break };
        plan.detach_node(id);
        plan.insert_dependency(dep, id)?;
        modified = true;
    }
    Ok(outcome(modified))
}

fn movable_past(plan: &ExecutionPlan, dep: NodeId, needed: &BTreeSet<VariableId>) -> bool {
    let node = plan.node(dep);
    // Limit and Collect change row multiplicity or scope; nothing crosses
    // them
    if matches!(
        node.kind,
        NodeKind::Singleton
            | NodeKind::Limit { .. }
            | NodeKind::Collect { .. }
            | NodeKind::NoResults
    ) {
        return false;
    }
    if node.single_dependency().is_none() {
        return false;
    }
    if plan.node_may_throw(dep) {
        return false;
    }
    node.kind
        .variables_set_here()
        .iter()
        .all(|v| !needed.contains(v))
}

// ----------------------------------------------------------------------
// remove-unnecessary-calculations
// ----------------------------------------------------------------------

/// Unlink calculations whose output no reachable node consumes, provided
/// evaluating them could not have thrown.
fn remove_unnecessary_calculations(
    plan: &mut ExecutionPlan,
    _ctx: &RuleContext,
) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let mut victim = None;
        for id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Calculation { .. })) {
            if plan.try_root() == Some(id) {
                continue;
            }
            let NodeKind::Calculation {
                expression,
                out_var,
                ..
            } = &plan.node(id).kind
            else {
                continue;
            };
            if expression.may_throw() {
                continue;
            }
            let out_var = *out_var;
            let used_somewhere = plan
                .reachable_ids()
                .into_iter()
                .filter(|other| *other != id)
                .any(|other| plan.variables_used_here(other).contains(&out_var));
            if !used_somewhere {
                victim = Some(id);
                break;
            }
        }
        let Some(id) = victim else { break };
        plan.unlink_node(id, false)?;
        modified = true;
    }
    Ok(outcome(modified))
}

// ----------------------------------------------------------------------
// interchange-adjacent-enumerations
// ----------------------------------------------------------------------

/// Longest chain length the permutation fork considers; factorial growth
/// is cut off beyond this.
const MAX_INTERCHANGE_CHAIN: usize = 4;

/// Fork one candidate plan per non-identity permutation of each run of
/// adjacent, mutually independent enumerations. This is the rule that
/// grows the frontier, giving the cost model real alternatives to rank.
fn interchange_adjacent_enumerations(
    plan: &mut ExecutionPlan,
    _ctx: &RuleContext,
) -> PlannerResult<RuleOutcome> {
    ensure_usage(plan)?;
    let chains = enumeration_chains(plan);
    let mut forks = Vec::new();
    for chain in chains {
        let len = chain.len().min(MAX_INTERCHANGE_CHAIN);
        if len < 2 {
            continue;
        }
        let chain = &chain[..len];
        let mut permutation: Vec<usize> = (0..len).collect();
        while next_permutation(&mut permutation) {
            let mut fork = plan.clone_plan();
            reorder_chain(&mut fork, chain, &permutation)?;
            forks.push(fork);
        }
    }
    if forks.is_empty() {
        Ok(RuleOutcome::Unchanged)
    } else {
        Ok(RuleOutcome::Forked(forks))
    }
}

fn is_enumeration(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::EnumerateCollection { .. } | NodeKind::EnumerateList { .. }
    )
}

/// Maximal runs of directly adjacent enumerations, downstream node first,
/// cut where one enumeration consumes another's output.
fn enumeration_chains(plan: &ExecutionPlan) -> Vec<Vec<NodeId>> {
    let mut chains = Vec::new();
    for id in plan.collect_nodes(|n| is_enumeration(&n.kind)) {
        // Only start a chain at its downstream end
        let starts_chain = match plan.node(id).parents.as_slice() {
            [parent] => !is_enumeration(&plan.node(*parent).kind),
            _ => true,
        };
        if !starts_chain {
            continue;
        }
        let mut chain = vec![id];
        let mut produced: BTreeSet<VariableId> =
            plan.node(id).kind.variables_set_here().into_iter().collect();
        let mut used: BTreeSet<VariableId> = plan.variables_used_here(id);
        let mut current = id;
        while let Some(dep) = plan.node(current).single_dependency() {
            if !is_enumeration(&plan.node(dep).kind) {
                break;
            }
            let dep_sets: BTreeSet<VariableId> = plan
                .node(dep)
                .kind
                .variables_set_here()
                .into_iter()
                .collect();
            let dep_uses = plan.variables_used_here(dep);
            // Any producer/consumer relation inside the run ends it
            if used.intersection(&dep_sets).next().is_some()
                || produced.intersection(&dep_uses).next().is_some()
            {
                break;
            }
            chain.push(dep);
            produced.extend(dep_sets);
            used.extend(dep_uses);
            current = dep;
        }
        if chain.len() >= 2 {
            chains.push(chain);
        }
    }
    chains
}

/// Lexicographic next permutation; false once the sequence wraps around.
fn next_permutation(perm: &mut [usize]) -> bool {
    let len = perm.len();
    if len < 2 {
        return false;
    }
    let mut i = len - 1;
    while i > 0 && perm[i - 1] >= perm[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = len - 1;
    while perm[j] <= perm[i - 1] {
        j -= 1;
    }
    perm.swap(i - 1, j);
    perm[i..].reverse();
    true
}

fn reorder_chain(
    plan: &mut ExecutionPlan,
    chain: &[NodeId],
    permutation: &[usize],
) -> PlannerResult<()> {
    let above = match plan.node(chain[0]).parents.as_slice() {
        [parent] => *parent,
        _ => return Ok(()),
    };
    if plan.node(above).dependencies.len() != 1 {
        return Ok(());
    }
    for id in chain {
        plan.detach_node(*id);
    }
    // Re-insert upstream-most first so each insert lands directly below
    // `above`, pushing the previously inserted nodes further down
    for position in permutation.iter().rev() {
        plan.insert_dependency(above, chain[*position])?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// use-index-range
// ----------------------------------------------------------------------

/// Replace an EnumerateCollection + Filter pair with an IndexRange lookup
/// when the whole filter condition normalizes into ranges over one index.
fn use_index_range(plan: &mut ExecutionPlan, ctx: &RuleContext) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let Some((filter_id, enum_id, index_id, collection, out_var, ranges)) =
            find_index_opportunity(plan, ctx.catalog)
        else {
            break;
        };
        let index_node = plan.add_node(NodeKind::IndexRange {
            collection,
            index_id,
            out_var,
            ranges,
            reverse: false,
        });
        plan.replace_node(enum_id, index_node)?;
        plan.unlink_node(filter_id, false)?;
        modified = true;
    }
    Ok(outcome(modified))
}

type IndexOpportunity = (NodeId, NodeId, String, String, VariableId, RangeSet);

fn find_index_opportunity(plan: &ExecutionPlan, catalog: &Catalog) -> Option<IndexOpportunity> {
    for filter_id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Filter { .. })) {
        let NodeKind::Filter { in_var } = plan.node(filter_id).kind else {
            continue;
        };
        let Some(condition) = calculation_expression(plan, in_var) else {
            continue;
        };
        let mut condition_vars = BTreeSet::new();
        condition.free_variables(&mut condition_vars);
        for var in condition_vars {
            let Some(setter) = plan.var_set_by.get(&var) else {
                continue;
            };
            let enum_id = *setter;
            let NodeKind::EnumerateCollection {
                collection,
                out_var,
                ..
            } = &plan.node(enum_id).kind
            else {
                continue;
            };
            let Some(ranges) = ranges::ranges_from_condition(condition, var) else {
                continue;
            };
            // Dynamic bounds must be computable before the enumeration runs
            let mut bound_vars = BTreeSet::new();
            ranges::range_set_variables(&ranges, &mut bound_vars);
            let enum_node = plan.node(enum_id);
            if !bound_vars
                .iter()
                .all(|v| *v != *out_var && enum_node.vars_valid.contains(v))
            {
                continue;
            }
            let collection_meta = catalog.get(collection)?;
            let mut candidates: Vec<(&Index, RangeSet)> = Vec::new();
            for index in collection_meta.indexes() {
                if let Some(projected) = match_ranges_to_index(index, &ranges) {
                    candidates.push((index, projected));
                }
            }
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by_key(|(index, _)| index_preference(index));
            let (index, projected) = candidates.remove(0);
            return Some((
                filter_id,
                enum_id,
                index.id.clone(),
                collection.clone(),
                *out_var,
                projected,
            ));
        }
    }
    None
}

/// Lower ranks win: unique full matches, then hash, skiplist, edge,
/// primary-by-key; index id breaks remaining ties deterministically.
fn index_preference(index: &Index) -> (u8, std::cmp::Reverse<usize>, String) {
    let class = match index.kind {
        IndexKind::Primary => 1,
        IndexKind::Hash if index.unique => 0,
        IndexKind::Hash => 2,
        IndexKind::Skiplist if index.unique => 2,
        IndexKind::Skiplist => 3,
        IndexKind::Edge => 4,
        IndexKind::Fulltext | IndexKind::Geo => 5,
    };
    (
        class,
        std::cmp::Reverse(index.fields.len()),
        index.id.clone(),
    )
}

/// Check that every disjunct of `ranges` is answerable by `index` alone,
/// so the originating filter can be dropped. Returns the ranges to store
/// on the IndexRange node.
fn match_ranges_to_index(index: &Index, ranges: &RangeSet) -> Option<RangeSet> {
    match index.kind {
        IndexKind::Primary => {
            for conjunct in ranges {
                let [info] = conjunct.as_slice() else {
                    return None;
                };
                if info.attribute != "_key" || !info.is_equality() {
                    return None;
                }
            }
            Some(ranges.clone())
        }
        IndexKind::Edge => {
            for conjunct in ranges {
                let [info] = conjunct.as_slice() else {
                    return None;
                };
                if !info.is_equality() || !index.fields.contains(&info.attribute) {
                    return None;
                }
            }
            Some(ranges.clone())
        }
        IndexKind::Hash => {
            // Hash lookups need every field bound by equality, and nothing
            // beyond the indexed fields
            for conjunct in ranges {
                if conjunct.len() != index.fields.len() {
                    return None;
                }
                for field in &index.fields {
                    let found = conjunct
                        .iter()
                        .find(|info| &info.attribute == field && info.is_equality());
                    found?;
                }
            }
            Some(ranges.clone())
        }
        IndexKind::Skiplist => {
            // Equality prefix plus at most one trailing range, nothing else
            for conjunct in ranges {
                let mut remaining: Vec<&str> =
                    conjunct.iter().map(|info| info.attribute.as_str()).collect();
                let mut fields = index.fields.iter();
                let mut trailing_range_used = false;
                while !remaining.is_empty() {
                    let field = fields.next()?;
                    let position = remaining.iter().position(|attr| attr == field)?;
                    let info = conjunct
                        .iter()
                        .find(|info| &info.attribute == field)
                        .expect("attribute present");
                    if !info.is_equality() {
                        if trailing_range_used {
                            return None;
                        }
                        trailing_range_used = true;
                    } else if trailing_range_used {
                        // Equalities must precede the range field
                        return None;
                    }
                    remaining.remove(position);
                }
            }
            Some(ranges.clone())
        }
        IndexKind::Fulltext | IndexKind::Geo => None,
    }
}

// ----------------------------------------------------------------------
// push-limit-below-sort / use-index-for-sort
// ----------------------------------------------------------------------

/// First non-pass-through node below `from`: skips Calculation, Filter,
/// and Limit nodes along the single-dependency chain.
fn producer_below(plan: &ExecutionPlan, from: NodeId) -> Option<NodeId> {
    let mut current = plan.node(from).single_dependency()?;
    loop {
        match &plan.node(current).kind {
            NodeKind::Calculation { .. } | NodeKind::Filter { .. } | NodeKind::Limit { .. } => {
                current = plan.node(current).single_dependency()?;
            }
            _ => return Some(current),
        }
    }
}

/// Attributes a sort orders by, when every sort key is an attribute of
/// `target_var` and all directions agree. Returns the dotted paths and
/// whether the shared direction is descending.
fn sort_attributes(
    plan: &ExecutionPlan,
    elements: &[SortEntry],
    target_var: VariableId,
) -> Option<(Vec<String>, bool)> {
    let mut attributes = Vec::with_capacity(elements.len());
    let mut descending = None;
    for entry in elements {
        let expr = calculation_expression(plan, entry.variable)?;
        let (var, path) = expr.attribute_path()?;
        if var != target_var {
            return None;
        }
        match descending {
            None => descending = Some(!entry.ascending),
            Some(d) if d == !entry.ascending => {}
            _ => return None,
        }
        attributes.push(path.join("."));
    }
    Some((attributes, descending.unwrap_or(false)))
}

/// Whether an existing IndexRange emits rows ordered by `attributes`
/// (after skipping leading fields pinned by equalities).
fn index_range_covers_order(index: &Index, ranges: &RangeSet, attributes: &[String]) -> bool {
    if !index.kind.is_sorted() || ranges.len() != 1 {
        return false;
    }
    let conjunct = &ranges[0];
    let mut fields = index.fields.iter().peekable();
    // Equality-pinned prefix contributes no ordering freedom
    while let Some(field) = fields.peek() {
        let pinned = conjunct
            .iter()
            .any(|info| &&info.attribute == field && info.is_equality());
        if pinned {
            fields.next();
        } else {
            break;
        }
    }
    for attribute in attributes {
        match fields.next() {
            Some(field) if field == attribute => {}
            _ => return false,
        }
    }
    true
}

/// Swap a Limit below a Sort whose input is already index-ordered; the
/// executor then only sorts the rows that survive the limit.
fn push_limit_below_sort(plan: &mut ExecutionPlan, ctx: &RuleContext) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let mut action = None;
        for limit_id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Limit { .. })) {
            let Some(sort_id) = plan.node(limit_id).single_dependency() else {
                continue;
            };
            let NodeKind::Sort { elements, .. } = &plan.node(sort_id).kind else {
                continue;
            };
            // The sort-key calculations usually sit between the Sort and
            // the index scan; walk through them
            let Some(range_id) = producer_below(plan, sort_id) else {
                continue;
            };
            let NodeKind::IndexRange {
                collection,
                index_id,
                out_var,
                ranges,
                reverse,
            } = &plan.node(range_id).kind
            else {
                continue;
            };
            let Some((attributes, descending)) = sort_attributes(plan, elements, *out_var) else {
                continue;
            };
            if descending != *reverse {
                continue;
            }
            let Ok(index) = ctx.catalog.require_index(collection, index_id) else {
                continue;
            };
            if index_range_covers_order(index, ranges, &attributes) {
                action = Some((limit_id, sort_id));
                break;
            }
        }
        let Some((limit_id, sort_id)) = action else { break };
        plan.detach_node(limit_id);
        plan.insert_dependency(sort_id, limit_id)?;
        modified = true;
    }
    Ok(outcome(modified))
}

/// Remove a Sort whose order an index already provides, converting a full
/// collection scan into an ordered index scan when needed.
fn use_index_for_sort(plan: &mut ExecutionPlan, ctx: &RuleContext) -> PlannerResult<RuleOutcome> {
    let mut modified = false;
    loop {
        ensure_usage(plan)?;
        let Some(action) = find_sortable_index(plan, ctx.catalog) else {
            break;
        };
        match action {
            SortIndexAction::ReplaceScan {
                sort_id,
                enum_id,
                collection,
                index_id,
                out_var,
                reverse,
            } => {
                let index_node = plan.add_node(NodeKind::IndexRange {
                    collection,
                    index_id,
                    out_var,
                    ranges: vec![vec![]],
                    reverse,
                });
                plan.replace_node(enum_id, index_node)?;
                plan.unlink_node(sort_id, false)?;
            }
            SortIndexAction::DropSort { sort_id, range_id, reverse } => {
                if let NodeKind::IndexRange {
                    reverse: current, ..
                } = &mut plan.node_mut(range_id).kind
                {
                    *current = reverse;
                }
                plan.unlink_node(sort_id, false)?;
            }
        }
        modified = true;
    }
    Ok(outcome(modified))
}

enum SortIndexAction {
    ReplaceScan {
        sort_id: NodeId,
        enum_id: NodeId,
        collection: String,
        index_id: String,
        out_var: VariableId,
        reverse: bool,
    },
    DropSort {
        sort_id: NodeId,
        range_id: NodeId,
        reverse: bool,
    },
}

fn find_sortable_index(plan: &ExecutionPlan, catalog: &Catalog) -> Option<SortIndexAction> {
    for sort_id in plan.collect_nodes(|n| matches!(n.kind, NodeKind::Sort { .. })) {
        if plan.try_root() == Some(sort_id) {
            continue;
        }
        let NodeKind::Sort { elements, .. } = &plan.node(sort_id).kind else {
            continue;
        };
        // Walk down to the row producer the sort keys come from
        let Some(current) = producer_below(plan, sort_id) else {
            continue;
        };
        match &plan.node(current).kind {
            NodeKind::EnumerateCollection {
                collection,
                out_var,
                ..
            } => {
                let (attributes, descending) = match sort_attributes(plan, elements, *out_var) {
                    Some(found) => found,
                    None => continue,
                };
                let collection_meta = catalog.get(collection)?;
                let mut candidates: Vec<&Index> = collection_meta
                    .indexes()
                    .iter()
                    .filter(|index| {
                        index.kind.is_sorted()
                            && index.fields.len() >= attributes.len()
                            && index.fields[..attributes.len()] == attributes[..]
                    })
                    .collect();
                candidates.sort_by_key(|index| index.id.clone());
                let Some(index) = candidates.first() else {
                    continue;
                };
                return Some(SortIndexAction::ReplaceScan {
                    sort_id,
                    enum_id: current,
                    collection: collection.clone(),
                    index_id: index.id.clone(),
                    out_var: *out_var,
                    reverse: descending,
                });
            }
            NodeKind::IndexRange {
                collection,
                index_id,
                out_var,
                ranges,
                ..
            } => {
                let (attributes, descending) = match sort_attributes(plan, elements, *out_var) {
                    Some(found) => found,
                    None => continue,
                };
                let Ok(index) = catalog.require_index(collection, index_id) else {
                    continue;
                };
                if index_range_covers_order(index, ranges, &attributes) {
                    return Some(SortIndexAction::DropSort {
                        sort_id,
                        range_id: current,
                        reverse: descending,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

fn outcome(modified: bool) -> RuleOutcome {
    if modified {
        RuleOutcome::Modified
    } else {
        RuleOutcome::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_permutation_cycles_lexicographically() {
        let mut perm = vec![0, 1, 2];
        let mut seen = vec![perm.clone()];
        while next_permutation(&mut perm) {
            seen.push(perm.clone());
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last().unwrap(), &vec![2, 1, 0]);
    }

    #[test]
    fn rule_table_is_level_sorted() {
        let rules = default_rules();
        for pair in rules.windows(2) {
            assert!(pair[0].level <= pair[1].level);
        }
    }

    #[test]
    fn skiplist_match_rejects_equality_after_range() {
        let index = Index::new(
            "i",
            IndexKind::Skiplist,
            vec!["a".to_string(), "b".to_string()],
            false,
            false,
        );
        // a range on the first field followed by an equality on the second
        // cannot be answered by one skiplist scan
        let mut bad = crate::plan::ranges::RangeInfo::new("a");
        bad.lows
            .push(crate::plan::ranges::RangeBound::inclusive(Expr::int(1)));
        let ranges = vec![vec![
            bad,
            crate::plan::ranges::RangeInfo::equality("b", Expr::int(2)),
        ]];
        assert!(match_ranges_to_index(&index, &ranges).is_none());
    }

    #[test]
    fn hash_match_requires_all_fields() {
        let index = Index::new(
            "i",
            IndexKind::Hash,
            vec!["a".to_string(), "b".to_string()],
            false,
            false,
        );
        let partial = vec![vec![crate::plan::ranges::RangeInfo::equality(
            "a",
            Expr::int(1),
        )]];
        assert!(match_ranges_to_index(&index, &partial).is_none());
        let full = vec![vec![
            crate::plan::ranges::RangeInfo::equality("a", Expr::int(1)),
            crate::plan::ranges::RangeInfo::equality("b", Expr::int(2)),
        ]];
        assert!(match_ranges_to_index(&index, &full).is_some());
    }
}
