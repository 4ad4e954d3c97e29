//! Plan node taxonomy
//!
//! Every operator of an execution plan is a [`PlanNode`]: shared graph and
//! cache fields plus a [`NodeKind`] sum type carrying the per-variant data.
//! Polymorphic behavior (variable contracts, cost, serialization) is a
//! match over the kind.

use crate::ast::{Expr, ModificationOptions};
use crate::plan::ranges::{self, RangeSet};
use crate::variable::VariableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Plan-scoped node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One element of a Sort or merge-sorting Gather.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SortEntry {
    pub variable: VariableId,
    pub ascending: bool,
}

/// Operator variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Produces exactly one empty row; the leaf of every plan
    Singleton,
    /// Full scan over a collection
    EnumerateCollection {
        collection: String,
        out_var: VariableId,
        random: bool,
    },
    /// Iteration over an array-valued variable
    EnumerateList {
        in_var: VariableId,
        out_var: VariableId,
    },
    /// Bounded index lookup
    IndexRange {
        collection: String,
        index_id: String,
        out_var: VariableId,
        ranges: RangeSet,
        reverse: bool,
    },
    /// Drops rows whose condition variable is falsy
    Filter { in_var: VariableId },
    /// Evaluates one expression per row into a variable
    Calculation {
        expression: Expr,
        out_var: VariableId,
        condition_var: Option<VariableId>,
    },
    /// Evaluates a nested plan per row, collecting its results into an array
    Subquery {
        subquery_root: NodeId,
        out_var: VariableId,
    },
    Sort {
        elements: Vec<SortEntry>,
        stable: bool,
    },
    /// Group-by
    Collect {
        group_pairs: Vec<(VariableId, VariableId)>,
        expression_var: Option<VariableId>,
        out_var: Option<VariableId>,
        keep_vars: Vec<VariableId>,
        count_only: bool,
    },
    Limit {
        offset: usize,
        limit: usize,
        full_count: bool,
    },
    Return { in_var: VariableId },
    Insert {
        collection: String,
        options: ModificationOptions,
        in_var: VariableId,
        out_var: Option<VariableId>,
    },
    Remove {
        collection: String,
        options: ModificationOptions,
        in_var: VariableId,
        out_var: Option<VariableId>,
    },
    Update {
        collection: String,
        options: ModificationOptions,
        in_doc_var: VariableId,
        in_key_var: Option<VariableId>,
        out_var: Option<VariableId>,
    },
    Replace {
        collection: String,
        options: ModificationOptions,
        in_doc_var: VariableId,
        in_key_var: Option<VariableId>,
        out_var: Option<VariableId>,
    },
    /// Produces no rows at all; replaces provably empty subtrees
    NoResults,
    /// Cluster placement variants; created when a coordinator splits a plan
    Remote,
    Scatter { collection: String },
    Distribute { collection: String },
    Gather { elements: Vec<SortEntry> },
}

impl NodeKind {
    /// Serialized type tag; also used in log events.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Singleton => "SingletonNode",
            NodeKind::EnumerateCollection { .. } => "EnumerateCollectionNode",
            NodeKind::EnumerateList { .. } => "EnumerateListNode",
            NodeKind::IndexRange { .. } => "IndexRangeNode",
            NodeKind::Filter { .. } => "FilterNode",
            NodeKind::Calculation { .. } => "CalculationNode",
            NodeKind::Subquery { .. } => "SubqueryNode",
            NodeKind::Sort { .. } => "SortNode",
            NodeKind::Collect { .. } => "CollectNode",
            NodeKind::Limit { .. } => "LimitNode",
            NodeKind::Return { .. } => "ReturnNode",
            NodeKind::Insert { .. } => "InsertNode",
            NodeKind::Remove { .. } => "RemoveNode",
            NodeKind::Update { .. } => "UpdateNode",
            NodeKind::Replace { .. } => "ReplaceNode",
            NodeKind::NoResults => "NoResultsNode",
            NodeKind::Remote => "RemoteNode",
            NodeKind::Scatter { .. } => "ScatterNode",
            NodeKind::Distribute { .. } => "DistributeNode",
            NodeKind::Gather { .. } => "GatherNode",
        }
    }

    /// Variables this node introduces.
    pub fn variables_set_here(&self) -> Vec<VariableId> {
        match self {
            NodeKind::EnumerateCollection { out_var, .. }
            | NodeKind::EnumerateList { out_var, .. }
            | NodeKind::IndexRange { out_var, .. }
            | NodeKind::Calculation { out_var, .. }
            | NodeKind::Subquery { out_var, .. } => vec![*out_var],
            NodeKind::Collect {
                group_pairs,
                out_var,
                ..
            } => {
                let mut vars: Vec<VariableId> = group_pairs.iter().map(|(out, _)| *out).collect();
                vars.extend(out_var.iter().copied());
                vars
            }
            NodeKind::Insert { out_var, .. }
            | NodeKind::Remove { out_var, .. }
            | NodeKind::Update { out_var, .. }
            | NodeKind::Replace { out_var, .. } => out_var.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Variables this node reads. Subquery nodes are resolved by the owning
    /// plan (their usage is the free variables of the nested plan), so this
    /// returns the local contract only.
    pub fn local_variables_used_here(&self) -> BTreeSet<VariableId> {
        let mut vars = BTreeSet::new();
        match self {
            NodeKind::EnumerateList { in_var, .. }
            | NodeKind::Filter { in_var }
            | NodeKind::Return { in_var }
            | NodeKind::Insert { in_var, .. }
            | NodeKind::Remove { in_var, .. } => {
                vars.insert(*in_var);
            }
            NodeKind::IndexRange { ranges, .. } => {
                ranges::range_set_variables(ranges, &mut vars);
            }
            NodeKind::Calculation {
                expression,
                condition_var,
                ..
            } => {
                expression.free_variables(&mut vars);
                vars.extend(condition_var.iter().copied());
            }
            NodeKind::Sort { elements, .. } | NodeKind::Gather { elements } => {
                vars.extend(elements.iter().map(|e| e.variable));
            }
            NodeKind::Collect {
                group_pairs,
                expression_var,
                keep_vars,
                ..
            } => {
                vars.extend(group_pairs.iter().map(|(_, input)| *input));
                vars.extend(expression_var.iter().copied());
                vars.extend(keep_vars.iter().copied());
            }
            NodeKind::Update {
                in_doc_var,
                in_key_var,
                ..
            }
            | NodeKind::Replace {
                in_doc_var,
                in_key_var,
                ..
            } => {
                vars.insert(*in_doc_var);
                vars.extend(in_key_var.iter().copied());
            }
            _ => {}
        }
        vars
    }

    /// Whether this node opens a new register frame (introduces rows at a
    /// new depth).
    pub fn increases_depth(&self) -> bool {
        matches!(
            self,
            NodeKind::EnumerateCollection { .. }
                | NodeKind::EnumerateList { .. }
                | NodeKind::IndexRange { .. }
                | NodeKind::Collect { .. }
        )
    }

    pub fn is_modification(&self) -> bool {
        matches!(
            self,
            NodeKind::Insert { .. }
                | NodeKind::Remove { .. }
                | NodeKind::Update { .. }
                | NodeKind::Replace { .. }
        )
    }

    /// Whether executing this node can raise a runtime error. Used by the
    /// move rules: nothing may be hoisted across a throwing node, or moved
    /// if it throws itself.
    pub fn local_may_throw(&self) -> bool {
        match self {
            NodeKind::Calculation { expression, .. } => expression.may_throw(),
            kind if kind.is_modification() => true,
            _ => false,
        }
    }
}

/// One operator in a plan: graph links, caches, and the variant data.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub id: NodeId,
    /// Upstream producers, in input order
    pub dependencies: Vec<NodeId>,
    /// Downstream consumers (back-references, non-owning)
    pub parents: Vec<NodeId>,
    pub kind: NodeKind,
    // Caches, invalidated on any graph mutation
    pub estimated_cost: Option<f64>,
    pub estimated_nr_items: Option<usize>,
    pub vars_valid: BTreeSet<VariableId>,
    pub vars_used_later: BTreeSet<VariableId>,
    /// Registers to drop after this node's last use of them
    pub regs_to_clear: BTreeSet<u32>,
    /// Register frame depth, assigned by the register planner
    pub depth: u32,
}

impl PlanNode {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        PlanNode {
            id,
            dependencies: Vec::new(),
            parents: Vec::new(),
            kind,
            estimated_cost: None,
            estimated_nr_items: None,
            vars_valid: BTreeSet::new(),
            vars_used_later: BTreeSet::new(),
            regs_to_clear: BTreeSet::new(),
            depth: 0,
        }
    }

    /// The sole dependency, for the many node types that take exactly one
    /// input.
    pub fn single_dependency(&self) -> Option<NodeId> {
        match self.dependencies.as_slice() {
            [dep] => Some(*dep),
            _ => None,
        }
    }

    pub fn invalidate_cost(&mut self) {
        self.estimated_cost = None;
        self.estimated_nr_items = None;
    }

    pub fn invalidate_usage(&mut self) {
        self.vars_valid.clear();
        self.vars_used_later.clear();
        self.regs_to_clear.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: u64) -> VariableId {
        VariableId(id)
    }

    #[test]
    fn singleton_sets_and_uses_nothing() {
        let kind = NodeKind::Singleton;
        assert!(kind.variables_set_here().is_empty());
        assert!(kind.local_variables_used_here().is_empty());
    }

    #[test]
    fn collect_contract_covers_groups_and_keeps() {
        let kind = NodeKind::Collect {
            group_pairs: vec![(v(10), v(1))],
            expression_var: Some(v(2)),
            out_var: Some(v(11)),
            keep_vars: vec![v(3)],
            count_only: false,
        };
        let set: BTreeSet<_> = kind.variables_set_here().into_iter().collect();
        assert_eq!(set, BTreeSet::from([v(10), v(11)]));
        let used = kind.local_variables_used_here();
        assert_eq!(used, BTreeSet::from([v(1), v(2), v(3)]));
    }

    #[test]
    fn update_uses_doc_and_key() {
        let kind = NodeKind::Update {
            collection: "users".to_string(),
            options: ModificationOptions::default(),
            in_doc_var: v(1),
            in_key_var: Some(v(2)),
            out_var: None,
        };
        assert_eq!(
            kind.local_variables_used_here(),
            BTreeSet::from([v(1), v(2)])
        );
        assert!(kind.variables_set_here().is_empty());
    }

    #[test]
    fn depth_increases_only_at_row_producers() {
        assert!(NodeKind::EnumerateCollection {
            collection: "c".to_string(),
            out_var: v(1),
            random: false,
        }
        .increases_depth());
        assert!(!NodeKind::Filter { in_var: v(1) }.increases_depth());
        assert!(!NodeKind::Singleton.increases_depth());
    }
}
