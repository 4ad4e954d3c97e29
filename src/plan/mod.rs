//! # Execution plan graph
//!
//! An [`ExecutionPlan`] owns every operator node of one candidate plan in
//! an id-indexed arena. Dependency and parent links are [`NodeId`]s, never
//! pointers, so rewiring and deep cloning are cheap and cannot dangle.
//! Subquery nodes reference the root of a nested DAG that lives in the same
//! arena.
//!
//! ```text
//! AST -> [PlanBuilder] -> ExecutionPlan -> [Optimizer] -> ExecutionPlan*
//!                                              |
//!                                         [RegisterPlanner]
//! ```

use crate::ast::Expr;
use crate::catalog::CollectionAccess;
use crate::error::{PlannerError, PlannerResult};
use crate::registers::RegisterPlan;
use crate::variable::{VariableId, VariableRegistry};
use std::collections::{BTreeMap, BTreeSet};

pub mod builder;
pub mod node;
pub mod ranges;
pub mod serialize;

pub use node::{NodeId, NodeKind, PlanNode, SortEntry};

/// A candidate execution plan: a DAG of operator nodes with exactly one
/// root (usually a Return, a modification, or NoResults).
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    nodes: BTreeMap<NodeId, PlanNode>,
    root: Option<NodeId>,
    next_node_id: u64,
    /// Collections touched by the query and how
    pub collections: BTreeMap<String, CollectionAccess>,
    /// Names of optimizer rules applied to this plan, in application order
    pub applied_rules: Vec<String>,
    /// Whether the usage analysis caches on the nodes are current
    pub usage_valid: bool,
    /// Producer node of each variable, filled by the usage analysis
    pub var_set_by: BTreeMap<VariableId, NodeId>,
    /// Register assignment, present after register planning
    pub registers: Option<RegisterPlan>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        ExecutionPlan::default()
    }

    // ------------------------------------------------------------------
    // Node table
    // ------------------------------------------------------------------

    /// Register a new node with the plan, which takes ownership and assigns
    /// a plan-unique id.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.insert(id, PlanNode::new(id, kind));
        id
    }

    /// Re-register a node under a fixed id, used by deserialization.
    pub(crate) fn add_node_with_id(&mut self, id: NodeId, kind: NodeKind) -> PlannerResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(PlannerError::internal(format!(
                "duplicate node id {id} in plan"
            )));
        }
        self.next_node_id = self.next_node_id.max(id.0 + 1);
        self.nodes.insert(id, PlanNode::new(id, kind));
        Ok(())
    }

    pub fn get_node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(&id)
    }

    /// Borrow a node that is known to be registered. Every id handed out by
    /// this plan stays valid until the node is unlinked, so a miss is an
    /// internal invariant violation.
    pub fn node(&self, id: NodeId) -> &PlanNode {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("node {id} not registered with plan"))
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("node {id} not registered with plan"))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of registered nodes, including nodes inside subqueries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_root(&mut self, id: NodeId) {
        debug_assert!(self.nodes.contains_key(&id));
        self.root = Some(id);
    }

    pub fn try_root(&self) -> Option<NodeId> {
        self.root
    }

    /// The root node id. Plans produced by the builder always have one.
    pub fn root(&self) -> NodeId {
        self.root.expect("plan has no root")
    }

    pub fn root_estimate(&self) -> (Option<usize>, Option<f64>) {
        let node = self.node(self.root());
        (node.estimated_nr_items, node.estimated_cost)
    }

    pub fn note_collection_access(&mut self, name: &str, access: CollectionAccess) {
        let entry = self
            .collections
            .entry(name.to_string())
            .or_insert(CollectionAccess::Read);
        if access == CollectionAccess::Write {
            *entry = CollectionAccess::Write;
        }
    }

    // ------------------------------------------------------------------
    // Graph mutation
    // ------------------------------------------------------------------

    /// Make `dependency` an input of `node`.
    pub fn add_dependency(&mut self, node: NodeId, dependency: NodeId) {
        self.node_mut(node).dependencies.push(dependency);
        self.node_mut(dependency).parents.push(node);
        self.invalidate_analysis();
    }

    /// Remove `id` from the graph, rewiring each parent's dependency list
    /// to point directly at the node's inputs, and drop it from the table.
    /// Unlinking the root requires `allow_root` and a single dependency,
    /// which becomes the new root.
    pub fn unlink_node(&mut self, id: NodeId, allow_root: bool) -> PlannerResult<()> {
        if self.root == Some(id) {
            if !allow_root {
                return Err(PlannerError::internal("cannot unlink root node"));
            }
            let new_root = self.node(id).single_dependency().ok_or_else(|| {
                PlannerError::internal("cannot unlink a root without exactly one dependency")
            })?;
            self.detach_node(id);
            self.root = Some(new_root);
        } else {
            self.detach_node(id);
        }
        self.nodes.remove(&id);
        Ok(())
    }

    /// Remove `id` from the graph but keep it registered so it can be
    /// re-inserted elsewhere (used by the move rules).
    pub fn detach_node(&mut self, id: NodeId) {
        let (dependencies, parents) = {
            let node = self.node(id);
            (node.dependencies.clone(), node.parents.clone())
        };
        for parent in &parents {
            let deps = &mut self.node_mut(*parent).dependencies;
            if let Some(pos) = deps.iter().position(|d| *d == id) {
                deps.splice(pos..=pos, dependencies.iter().copied());
            }
        }
        for dependency in &dependencies {
            let node_parents = &mut self.node_mut(*dependency).parents;
            node_parents.retain(|p| *p != id);
            for parent in &parents {
                if !node_parents.contains(parent) {
                    node_parents.push(*parent);
                }
            }
        }
        let node = self.node_mut(id);
        node.dependencies.clear();
        node.parents.clear();
        self.invalidate_analysis();
    }

    /// Swap `old` for `new` in the graph. `new` must be freshly registered,
    /// without dependencies or parents; it inherits both from `old`, which
    /// is dropped. The root cannot be replaced this way.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> PlannerResult<()> {
        if old == new {
            return Err(PlannerError::internal("cannot replace a node with itself"));
        }
        if self.root == Some(old) {
            return Err(PlannerError::internal("cannot replace root node"));
        }
        {
            let new_node = self
                .nodes
                .get(&new)
                .ok_or_else(|| PlannerError::internal("replacement node not registered"))?;
            if !new_node.dependencies.is_empty() || !new_node.parents.is_empty() {
                return Err(PlannerError::internal(
                    "replacement node must be freshly registered and unlinked",
                ));
            }
        }
        let (dependencies, parents) = {
            let node = self.node(old);
            (node.dependencies.clone(), node.parents.clone())
        };
        for dependency in &dependencies {
            for p in self.node_mut(*dependency).parents.iter_mut() {
                if *p == old {
                    *p = new;
                }
            }
        }
        for parent in &parents {
            for d in self.node_mut(*parent).dependencies.iter_mut() {
                if *d == old {
                    *d = new;
                }
            }
        }
        // A subquery node may point at the replaced node as its nested root
        for node in self.nodes.values_mut() {
            if let NodeKind::Subquery { subquery_root, .. } = &mut node.kind {
                if *subquery_root == old {
                    *subquery_root = new;
                }
            }
        }
        {
            let new_node = self.node_mut(new);
            new_node.dependencies = dependencies;
            new_node.parents = parents;
        }
        self.nodes.remove(&old);
        self.invalidate_analysis();
        Ok(())
    }

    /// Insert `new` between `old` and its single dependency: `new` becomes
    /// the sole input of `old` and takes the previous input as its own.
    pub fn insert_dependency(&mut self, old: NodeId, new: NodeId) -> PlannerResult<()> {
        let previous = self.node(old).single_dependency().ok_or_else(|| {
            PlannerError::internal("insert_dependency requires exactly one dependency")
        })?;
        {
            let new_node = self
                .nodes
                .get(&new)
                .ok_or_else(|| PlannerError::internal("inserted node not registered"))?;
            if !new_node.dependencies.is_empty() || !new_node.parents.is_empty() {
                return Err(PlannerError::internal(
                    "inserted node must be freshly registered and unlinked",
                ));
            }
        }
        for p in self.node_mut(previous).parents.iter_mut() {
            if *p == old {
                *p = new;
            }
        }
        {
            let new_node = self.node_mut(new);
            new_node.dependencies = vec![previous];
            new_node.parents = vec![old];
        }
        self.node_mut(old).dependencies = vec![new];
        self.invalidate_analysis();
        Ok(())
    }

    /// Drop all analysis caches after a graph mutation.
    pub fn invalidate_analysis(&mut self) {
        self.usage_valid = false;
        self.var_set_by.clear();
        self.registers = None;
        for node in self.nodes.values_mut() {
            node.invalidate_cost();
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Nodes of the subtree rooted at `from` in dependency-first
    /// (execution) order: inputs before consumers, nested subquery plans
    /// before their Subquery node.
    pub fn dependency_first_order(&self, from: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        self.visit_dependency_first(from, &mut seen, &mut order);
        order
    }

    fn visit_dependency_first(
        &self,
        id: NodeId,
        seen: &mut BTreeSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        for dep in self.node(id).dependencies.clone() {
            self.visit_dependency_first(dep, seen, order);
        }
        if let NodeKind::Subquery { subquery_root, .. } = self.node(id).kind {
            self.visit_dependency_first(subquery_root, seen, order);
        }
        order.push(id);
    }

    /// Execution order of one chain: dependency-first, without descending
    /// into nested subquery plans. Used by the register planner and the
    /// serializer, which both treat subqueries as nested units.
    pub fn execution_order(&self, from: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(from, false)];
        let mut seen = BTreeSet::new();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.push((id, true));
            for dep in self.node(id).dependencies.iter().rev() {
                stack.push((*dep, false));
            }
        }
        order
    }

    /// Ids of all nodes reachable from the root (including nested subquery
    /// plans), ascending. Detached nodes are excluded.
    pub fn reachable_ids(&self) -> Vec<NodeId> {
        match self.root {
            Some(root) => {
                let mut ids = self.dependency_first_order(root);
                ids.sort();
                ids
            }
            None => Vec::new(),
        }
    }

    /// Reachable nodes matching a predicate, in ascending id order.
    pub fn collect_nodes(&self, mut predicate: impl FnMut(&PlanNode) -> bool) -> Vec<NodeId> {
        self.reachable_ids()
            .into_iter()
            .filter(|id| predicate(self.node(*id)))
            .collect()
    }

    /// The node ids forming the nested plan of a subquery node.
    pub fn subquery_ids(&self, subquery_root: NodeId) -> Vec<NodeId> {
        self.dependency_first_order(subquery_root)
    }

    // ------------------------------------------------------------------
    // Variable contracts
    // ------------------------------------------------------------------

    /// Variables read by a node. For Subquery nodes this is the free
    /// variables of the nested plan: everything used inside that is not
    /// produced inside.
    pub fn variables_used_here(&self, id: NodeId) -> BTreeSet<VariableId> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Subquery { subquery_root, .. } => {
                let mut used = BTreeSet::new();
                let mut set = BTreeSet::new();
                for sub_id in self.subquery_ids(*subquery_root) {
                    used.extend(self.local_used(sub_id));
                    set.extend(self.node(sub_id).kind.variables_set_here());
                }
                used.difference(&set).copied().collect()
            }
            _ => node.kind.local_variables_used_here(),
        }
    }

    fn local_used(&self, id: NodeId) -> BTreeSet<VariableId> {
        match &self.node(id).kind {
            NodeKind::Subquery { .. } => self.variables_used_here(id),
            kind => kind.local_variables_used_here(),
        }
    }

    /// Whether executing the subtree rooted at `id` can raise a runtime
    /// error (a Subquery throws when anything inside it does).
    pub fn node_may_throw(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::Subquery { subquery_root, .. } => self
                .subquery_ids(*subquery_root)
                .iter()
                .any(|sub_id| self.node_may_throw(*sub_id)),
            kind => kind.local_may_throw(),
        }
    }

    // ------------------------------------------------------------------
    // Cloning
    // ------------------------------------------------------------------

    /// Deep clone that shares variable identities; used when forking plans
    /// inside the optimizer.
    pub fn clone_plan(&self) -> ExecutionPlan {
        self.clone()
    }

    /// Deep clone with parallel variable identities: every variable
    /// produced inside the plan is re-allocated and all references are
    /// rewritten. Variables only consumed (bind parameters resolved by the
    /// caller) keep their identity.
    pub fn clone_with_new_variables(&self, registry: &mut VariableRegistry) -> ExecutionPlan {
        let mut mapping: BTreeMap<VariableId, VariableId> = BTreeMap::new();
        for node in self.nodes.values() {
            for var in node.kind.variables_set_here() {
                mapping.entry(var).or_insert_with(|| {
                    let known = registry.get(var).map(|k| (k.name.clone(), k.user_defined));
                    match known {
                        Some((name, true)) => registry.create(name),
                        _ => registry.create_temporary(),
                    }
                });
            }
        }
        let mut plan = self.clone();
        plan.var_set_by.clear();
        plan.usage_valid = false;
        plan.registers = None;
        for node in plan.nodes.values_mut() {
            remap_node_variables(&mut node.kind, &mapping);
            node.invalidate_usage();
            node.invalidate_cost();
        }
        plan
    }

    /// Structural sanity checks used by tests and debug assertions.
    pub fn check_invariants(&self) -> PlannerResult<()> {
        let root = self
            .root
            .ok_or_else(|| PlannerError::internal("plan has no root"))?;
        if !self.nodes.contains_key(&root) {
            return Err(PlannerError::internal("root is not registered"));
        }
        for (id, node) in &self.nodes {
            if node.id != *id {
                return Err(PlannerError::internal("node id does not match table key"));
            }
            for dep in &node.dependencies {
                let dep_node = self
                    .nodes
                    .get(dep)
                    .ok_or_else(|| PlannerError::internal("dependency not registered"))?;
                if !dep_node.parents.contains(id) {
                    return Err(PlannerError::internal(format!(
                        "node {dep} is missing parent back-reference to {id}"
                    )));
                }
            }
            for parent in &node.parents {
                let parent_node = self
                    .nodes
                    .get(parent)
                    .ok_or_else(|| PlannerError::internal("parent not registered"))?;
                if !parent_node.dependencies.contains(id) {
                    return Err(PlannerError::internal(format!(
                        "parent {parent} does not list {id} as dependency"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn remap_variable(var: &mut VariableId, mapping: &BTreeMap<VariableId, VariableId>) {
    if let Some(new) = mapping.get(var) {
        *var = *new;
    }
}

fn remap_optional(var: &mut Option<VariableId>, mapping: &BTreeMap<VariableId, VariableId>) {
    if let Some(v) = var {
        remap_variable(v, mapping);
    }
}

fn remap_expr(expr: &mut Expr, mapping: &BTreeMap<VariableId, VariableId>) {
    match expr {
        Expr::Constant(_) => {}
        Expr::Reference(v) => remap_variable(v, mapping),
        Expr::Attribute { object, .. } => remap_expr(object, mapping),
        Expr::Array(items) => items.iter_mut().for_each(|e| remap_expr(e, mapping)),
        Expr::Object(pairs) => pairs.iter_mut().for_each(|(_, e)| remap_expr(e, mapping)),
        Expr::Range { low, high } => {
            remap_expr(low, mapping);
            remap_expr(high, mapping);
        }
        Expr::Unary { operand, .. } => remap_expr(operand, mapping),
        Expr::Binary { lhs, rhs, .. } => {
            remap_expr(lhs, mapping);
            remap_expr(rhs, mapping);
        }
        Expr::FunctionCall { args, .. } => args.iter_mut().for_each(|e| remap_expr(e, mapping)),
        // Plan nodes never hold subquery expressions; the builder lowers
        // them to Subquery nodes
        Expr::Subquery(_) => {}
    }
}

fn remap_node_variables(kind: &mut NodeKind, mapping: &BTreeMap<VariableId, VariableId>) {
    match kind {
        NodeKind::Singleton | NodeKind::NoResults | NodeKind::Remote => {}
        NodeKind::EnumerateCollection { out_var, .. } => remap_variable(out_var, mapping),
        NodeKind::EnumerateList { in_var, out_var } => {
            remap_variable(in_var, mapping);
            remap_variable(out_var, mapping);
        }
        NodeKind::IndexRange {
            out_var, ranges, ..
        } => {
            remap_variable(out_var, mapping);
            for conjunct in ranges {
                for info in conjunct {
                    for bound in info.lows.iter_mut().chain(info.highs.iter_mut()) {
                        remap_expr(&mut bound.value, mapping);
                    }
                }
            }
        }
        NodeKind::Filter { in_var } | NodeKind::Return { in_var } => {
            remap_variable(in_var, mapping)
        }
        NodeKind::Calculation {
            expression,
            out_var,
            condition_var,
        } => {
            remap_expr(expression, mapping);
            remap_variable(out_var, mapping);
            remap_optional(condition_var, mapping);
        }
        NodeKind::Subquery { out_var, .. } => remap_variable(out_var, mapping),
        NodeKind::Sort { elements, .. } | NodeKind::Gather { elements } => {
            for element in elements {
                remap_variable(&mut element.variable, mapping);
            }
        }
        NodeKind::Collect {
            group_pairs,
            expression_var,
            out_var,
            keep_vars,
            ..
        } => {
            for (out, input) in group_pairs {
                remap_variable(out, mapping);
                remap_variable(input, mapping);
            }
            remap_optional(expression_var, mapping);
            remap_optional(out_var, mapping);
            keep_vars
                .iter_mut()
                .for_each(|v| remap_variable(v, mapping));
        }
        NodeKind::Limit { .. } | NodeKind::Scatter { .. } | NodeKind::Distribute { .. } => {}
        NodeKind::Insert {
            in_var, out_var, ..
        }
        | NodeKind::Remove {
            in_var, out_var, ..
        } => {
            remap_variable(in_var, mapping);
            remap_optional(out_var, mapping);
        }
        NodeKind::Update {
            in_doc_var,
            in_key_var,
            out_var,
            ..
        }
        | NodeKind::Replace {
            in_doc_var,
            in_key_var,
            out_var,
            ..
        } => {
            remap_variable(in_doc_var, mapping);
            remap_optional(in_key_var, mapping);
            remap_optional(out_var, mapping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: u64) -> VariableId {
        VariableId(id)
    }

    fn chain(plan: &mut ExecutionPlan, kinds: Vec<NodeKind>) -> Vec<NodeId> {
        let ids: Vec<NodeId> = kinds.into_iter().map(|k| plan.add_node(k)).collect();
        for pair in ids.windows(2) {
            plan.add_dependency(pair[1], pair[0]);
        }
        plan.set_root(*ids.last().unwrap());
        ids
    }

    #[test]
    fn unlink_rewires_parents_to_inputs() {
        let mut plan = ExecutionPlan::new();
        let ids = chain(
            &mut plan,
            vec![
                NodeKind::Singleton,
                NodeKind::Filter { in_var: v(1) },
                NodeKind::Return { in_var: v(1) },
            ],
        );
        plan.unlink_node(ids[1], false).unwrap();
        assert_eq!(plan.node(ids[2]).dependencies, vec![ids[0]]);
        assert_eq!(plan.node(ids[0]).parents, vec![ids[2]]);
        assert!(!plan.contains(ids[1]));
        plan.check_invariants().unwrap();
    }

    #[test]
    fn unlink_root_needs_permission() {
        let mut plan = ExecutionPlan::new();
        let ids = chain(
            &mut plan,
            vec![NodeKind::Singleton, NodeKind::Return { in_var: v(1) }],
        );
        assert!(plan.unlink_node(ids[1], false).is_err());
        plan.unlink_node(ids[1], true).unwrap();
        assert_eq!(plan.root(), ids[0]);
    }

    #[test]
    fn replace_inherits_links() {
        let mut plan = ExecutionPlan::new();
        let ids = chain(
            &mut plan,
            vec![
                NodeKind::Singleton,
                NodeKind::EnumerateCollection {
                    collection: "c".to_string(),
                    out_var: v(1),
                    random: false,
                },
                NodeKind::Return { in_var: v(1) },
            ],
        );
        let replacement = plan.add_node(NodeKind::NoResults);
        plan.replace_node(ids[1], replacement).unwrap();
        assert_eq!(plan.node(replacement).dependencies, vec![ids[0]]);
        assert_eq!(plan.node(replacement).parents, vec![ids[2]]);
        assert!(!plan.contains(ids[1]));
        plan.check_invariants().unwrap();
    }

    #[test]
    fn replace_rejects_linked_replacement() {
        let mut plan = ExecutionPlan::new();
        let ids = chain(
            &mut plan,
            vec![
                NodeKind::Singleton,
                NodeKind::Filter { in_var: v(1) },
                NodeKind::Return { in_var: v(1) },
            ],
        );
        // ids[0] already has links, so it cannot stand in as a replacement
        assert!(plan.replace_node(ids[1], ids[0]).is_err());
    }

    #[test]
    fn insert_dependency_splices_between() {
        let mut plan = ExecutionPlan::new();
        let ids = chain(
            &mut plan,
            vec![NodeKind::Singleton, NodeKind::Return { in_var: v(1) }],
        );
        let inserted = plan.add_node(NodeKind::Limit {
            offset: 0,
            limit: 10,
            full_count: false,
        });
        plan.insert_dependency(ids[1], inserted).unwrap();
        assert_eq!(plan.node(ids[1]).dependencies, vec![inserted]);
        assert_eq!(plan.node(inserted).dependencies, vec![ids[0]]);
        plan.check_invariants().unwrap();
    }

    #[test]
    fn detached_nodes_are_not_reachable() {
        let mut plan = ExecutionPlan::new();
        let ids = chain(
            &mut plan,
            vec![
                NodeKind::Singleton,
                NodeKind::Filter { in_var: v(1) },
                NodeKind::Return { in_var: v(1) },
            ],
        );
        plan.detach_node(ids[1]);
        assert!(plan.contains(ids[1]));
        assert!(!plan.reachable_ids().contains(&ids[1]));
    }

    #[test]
    fn clone_with_new_variables_remaps_produced_vars() {
        let mut registry = VariableRegistry::new();
        let out = registry.create("doc");
        let mut plan = ExecutionPlan::new();
        chain(
            &mut plan,
            vec![
                NodeKind::Singleton,
                NodeKind::EnumerateCollection {
                    collection: "c".to_string(),
                    out_var: out,
                    random: false,
                },
                NodeKind::Return { in_var: out },
            ],
        );
        let cloned = plan.clone_with_new_variables(&mut registry);
        let enum_id = cloned.collect_nodes(|n| {
            matches!(n.kind, NodeKind::EnumerateCollection { .. })
        })[0];
        let NodeKind::EnumerateCollection { out_var, .. } = cloned.node(enum_id).kind.clone()
        else {
            unreachable!()
        };
        assert_ne!(out_var, out, "produced variable must be re-allocated");
        let ret_id = cloned.collect_nodes(|n| matches!(n.kind, NodeKind::Return { .. }))[0];
        let NodeKind::Return { in_var } = &cloned.node(ret_id).kind else {
            unreachable!()
        };
        assert_eq!(*in_var, out_var, "references must follow the remapping");
    }
}
