//! Variable usage analysis
//!
//! Two-pass walk over a plan. Going down from the root, every node learns
//! which variables are still needed by the nodes downstream of it
//! (`vars_used_later`); coming back up, every node learns which variables
//! its transitive inputs produce (`vars_valid`) and the plan records each
//! variable's producer (`var_set_by`).
//!
//! A node's own outputs are excluded from its `vars_used_later`, so the
//! register planner can treat that set as "registers that must survive this
//! node".
//!
//! Subqueries are walked with a fresh downward state and a validity seed
//! taken from the enclosing node's inputs; only variables referenced but
//! not defined inside the subquery count as used by the Subquery node
//! itself.

use crate::error::PlannerResult;
use crate::plan::{ExecutionPlan, NodeId, NodeKind};
use crate::variable::VariableId;
use std::collections::{BTreeMap, BTreeSet};

/// Recompute `vars_valid`, `vars_used_later`, and `var_set_by` for every
/// reachable node.
pub fn analyze(plan: &mut ExecutionPlan) -> PlannerResult<()> {
    let root = plan.root();
    plan.var_set_by.clear();
    let mut walker = Walker {
        valid_by_node: BTreeMap::new(),
    };
    let mut used_later = BTreeSet::new();
    walker.visit(plan, root, &mut used_later, &BTreeSet::new())?;
    plan.usage_valid = true;
    Ok(())
}

struct Walker {
    /// Valid sets of already-visited nodes, for diamond-shaped graphs
    valid_by_node: BTreeMap<NodeId, BTreeSet<VariableId>>,
}

impl Walker {
    fn visit(
        &mut self,
        plan: &mut ExecutionPlan,
        id: NodeId,
        used_later: &mut BTreeSet<VariableId>,
        valid_seed: &BTreeSet<VariableId>,
    ) -> PlannerResult<BTreeSet<VariableId>> {
        if let Some(valid) = self.valid_by_node.get(&id) {
            return Ok(valid.clone());
        }

        let used_here = plan.variables_used_here(id);
        let set_here: BTreeSet<VariableId> =
            plan.node(id).kind.variables_set_here().into_iter().collect();

        {
            let node = plan.node_mut(id);
            node.invalidate_usage();
            node.vars_used_later = used_later.difference(&set_here).copied().collect();
        }
        used_later.extend(used_here.iter().copied());

        let dependencies = plan.node(id).dependencies.clone();
        let mut valid = BTreeSet::new();
        if dependencies.is_empty() {
            valid.extend(valid_seed.iter().copied());
        }
        for dep in dependencies {
            let dep_valid = self.visit(plan, dep, used_later, valid_seed)?;
            valid.extend(dep_valid);
        }

        // Nested plans see the enclosing node's inputs but keep their own
        // downward state
        if let NodeKind::Subquery { subquery_root, .. } = plan.node(id).kind {
            let seed = valid.clone();
            let mut sub_used_later = BTreeSet::new();
            self.visit(plan, subquery_root, &mut sub_used_later, &seed)?;
        }

        for var in &set_here {
            plan.var_set_by.insert(*var, id);
        }
        valid.extend(set_here);

        plan.node_mut(id).vars_valid = valid.clone();
        self.valid_by_node.insert(id, valid.clone());
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::plan::NodeKind;
    use crate::variable::VariableId;

    fn v(id: u64) -> VariableId {
        VariableId(id)
    }

    fn chain(kinds: Vec<NodeKind>) -> (ExecutionPlan, Vec<NodeId>) {
        let mut plan = ExecutionPlan::new();
        let ids: Vec<NodeId> = kinds.into_iter().map(|k| plan.add_node(k)).collect();
        for pair in ids.windows(2) {
            plan.add_dependency(pair[1], pair[0]);
        }
        plan.set_root(*ids.last().unwrap());
        (plan, ids)
    }

    #[test]
    fn used_is_subset_of_valid() {
        let (mut plan, ids) = chain(vec![
            NodeKind::Singleton,
            NodeKind::EnumerateCollection {
                collection: "c".to_string(),
                out_var: v(1),
                random: false,
            },
            NodeKind::Calculation {
                expression: Expr::attribute(v(1), "x"),
                out_var: v(2),
                condition_var: None,
            },
            NodeKind::Filter { in_var: v(2) },
            NodeKind::Return { in_var: v(1) },
        ]);
        analyze(&mut plan).unwrap();
        for id in ids {
            let used = plan.variables_used_here(id);
            let node = plan.node(id);
            assert!(
                used.is_subset(&node.vars_valid),
                "node {} uses a variable that is not valid there",
                node.id
            );
        }
    }

    #[test]
    fn own_output_is_not_used_later() {
        let (mut plan, ids) = chain(vec![
            NodeKind::Singleton,
            NodeKind::Calculation {
                expression: Expr::int(1),
                out_var: v(1),
                condition_var: None,
            },
            NodeKind::Return { in_var: v(1) },
        ]);
        analyze(&mut plan).unwrap();
        let calc = plan.node(ids[1]);
        assert!(!calc.vars_used_later.contains(&v(1)));
    }

    #[test]
    fn dead_variable_is_absent_from_used_later() {
        let (mut plan, ids) = chain(vec![
            NodeKind::Singleton,
            NodeKind::EnumerateCollection {
                collection: "c".to_string(),
                out_var: v(1),
                random: false,
            },
            NodeKind::Calculation {
                expression: Expr::attribute(v(1), "x"),
                out_var: v(2),
                condition_var: None,
            },
            NodeKind::Return { in_var: v(1) },
        ]);
        analyze(&mut plan).unwrap();
        // At the calculation, only v1 is needed downstream; v2 never is
        let calc = plan.node(ids[2]);
        assert!(calc.vars_used_later.contains(&v(1)));
        assert!(!calc.vars_used_later.contains(&v(2)));
        assert_eq!(plan.var_set_by.get(&v(2)), Some(&ids[2]));
    }

    #[test]
    fn subquery_sees_outer_valid_and_reports_free_vars() {
        let mut plan = ExecutionPlan::new();
        let outer_singleton = plan.add_node(NodeKind::Singleton);
        let outer_enum = plan.add_node(NodeKind::EnumerateCollection {
            collection: "c1".to_string(),
            out_var: v(1),
            random: false,
        });
        plan.add_dependency(outer_enum, outer_singleton);

        // Nested plan: correlated on v1
        let sub_singleton = plan.add_node(NodeKind::Singleton);
        let sub_enum = plan.add_node(NodeKind::EnumerateCollection {
            collection: "c2".to_string(),
            out_var: v(2),
            random: false,
        });
        plan.add_dependency(sub_enum, sub_singleton);
        let sub_calc = plan.add_node(NodeKind::Calculation {
            expression: Expr::binary(
                crate::ast::BinaryOp::Eq,
                Expr::attribute(v(2), "ref"),
                Expr::reference(v(1)),
            ),
            out_var: v(3),
            condition_var: None,
        });
        plan.add_dependency(sub_calc, sub_enum);
        let sub_filter = plan.add_node(NodeKind::Filter { in_var: v(3) });
        plan.add_dependency(sub_filter, sub_calc);
        let sub_return = plan.add_node(NodeKind::Return { in_var: v(2) });
        plan.add_dependency(sub_return, sub_filter);

        let subquery = plan.add_node(NodeKind::Subquery {
            subquery_root: sub_return,
            out_var: v(4),
        });
        plan.add_dependency(subquery, outer_enum);
        let root = plan.add_node(NodeKind::Return { in_var: v(4) });
        plan.add_dependency(root, subquery);
        plan.set_root(root);

        analyze(&mut plan).unwrap();

        // The subquery's only free variable is the outer loop variable
        assert_eq!(
            plan.variables_used_here(subquery),
            BTreeSet::from([v(1)])
        );
        // Inner nodes consider outer variables valid
        assert!(plan.node(sub_calc).vars_valid.contains(&v(1)));
        // Inner bindings do not leak into the outer node's valid set via
        // the subquery's parent
        assert!(!plan.node(root).vars_valid.contains(&v(2)));
        assert!(plan.node(root).vars_valid.contains(&v(4)));
    }
}
