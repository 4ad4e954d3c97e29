//! Register planning
//!
//! Assigns every produced variable a slot in a depth-stratified register
//! frame so the executor can materialize rows in columnar frames without
//! re-resolving variable identities. A new depth is opened by every node
//! that introduces rows (EnumerateCollection, EnumerateList, IndexRange,
//! Collect); Calculation and Subquery outputs live in the frame that is
//! current when they run.
//!
//! Subqueries are planned recursively, seeded with the enclosing frame
//! state, so the nested plan's outermost row is a continuation of the
//! outer row.

use crate::error::PlannerResult;
use crate::plan::{ExecutionPlan, NodeId, NodeKind};
use crate::usage;
use crate::variable::VariableId;
use std::collections::{BTreeMap, BTreeSet};

/// Where a variable lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLocation {
    pub depth: u32,
    pub register: u32,
}

/// Plan-wide register assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterPlan {
    /// Location of every produced variable, subquery variables included
    pub var_info: BTreeMap<VariableId, VarLocation>,
    /// Total registers alive per depth (maximum over all frames)
    pub nr_regs: Vec<u32>,
    /// Registers introduced at each depth
    pub nr_regs_here: Vec<u32>,
    pub total_nr_regs: u32,
}

impl RegisterPlan {
    pub fn location(&self, variable: VariableId) -> Option<VarLocation> {
        self.var_info.get(&variable).copied()
    }

    fn merge_frame(&mut self, state: &FrameState) {
        for (i, value) in state.nr_regs.iter().enumerate() {
            if i < self.nr_regs.len() {
                self.nr_regs[i] = self.nr_regs[i].max(*value);
            } else {
                self.nr_regs.push(*value);
            }
        }
        for (i, value) in state.nr_regs_here.iter().enumerate() {
            if i < self.nr_regs_here.len() {
                self.nr_regs_here[i] = self.nr_regs_here[i].max(*value);
            } else {
                self.nr_regs_here.push(*value);
            }
        }
        self.total_nr_regs = self.total_nr_regs.max(state.total);
    }
}

struct FrameState {
    depth: usize,
    nr_regs: Vec<u32>,
    nr_regs_here: Vec<u32>,
    total: u32,
    /// Variables assigned during this walk; a nested walk never clears
    /// registers owned by its enclosing rows
    assigned: BTreeSet<VariableId>,
}

impl FrameState {
    fn initial() -> Self {
        FrameState {
            depth: 0,
            nr_regs: vec![0],
            nr_regs_here: vec![0],
            total: 0,
            assigned: BTreeSet::new(),
        }
    }

    fn continuation(&self) -> Self {
        FrameState {
            depth: self.depth,
            nr_regs: self.nr_regs.clone(),
            nr_regs_here: self.nr_regs_here.clone(),
            total: self.total,
            assigned: BTreeSet::new(),
        }
    }
}

/// Assign registers for the whole plan and compute each node's clear set.
pub fn plan_registers(plan: &mut ExecutionPlan) -> PlannerResult<()> {
    if !plan.usage_valid {
        usage::analyze(plan)?;
    }
    let root = plan.root();
    let mut registers = RegisterPlan::default();
    let mut state = FrameState::initial();
    walk_chain(plan, root, &mut state, &mut registers)?;
    registers.merge_frame(&state);
    plan.registers = Some(registers);
    Ok(())
}

fn walk_chain(
    plan: &mut ExecutionPlan,
    from: NodeId,
    state: &mut FrameState,
    registers: &mut RegisterPlan,
) -> PlannerResult<()> {
    for id in plan.execution_order(from) {
        if plan.node(id).kind.increases_depth() {
            state.depth += 1;
            let carried = *state.nr_regs.last().unwrap_or(&0);
            state.nr_regs.push(carried);
            state.nr_regs_here.push(0);
        }

        if let NodeKind::Subquery { subquery_root, .. } = plan.node(id).kind {
            let mut sub_state = state.continuation();
            walk_chain(plan, subquery_root, &mut sub_state, registers)?;
            registers.merge_frame(&sub_state);
        }

        for variable in plan.node(id).kind.variables_set_here() {
            state.nr_regs_here[state.depth] += 1;
            state.nr_regs[state.depth] += 1;
            registers.var_info.insert(
                variable,
                VarLocation {
                    depth: state.depth as u32,
                    register: state.total,
                },
            );
            state.total += 1;
            state.assigned.insert(variable);
        }
        plan.node_mut(id).depth = state.depth as u32;

        // Registers whose variable sees its last use at this node; Return
        // keeps its single projected column
        let clears: BTreeSet<u32> = if matches!(plan.node(id).kind, NodeKind::Return { .. }) {
            BTreeSet::new()
        } else {
            let used_here = plan.variables_used_here(id);
            let node = plan.node(id);
            used_here
                .iter()
                .filter(|v| !node.vars_used_later.contains(v) && state.assigned.contains(v))
                .filter_map(|v| registers.var_info.get(v).map(|loc| loc.register))
                .collect()
        };
        plan.node_mut(id).regs_to_clear = clears;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::plan::NodeKind;

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
    fn enumeration_opens_a_new_depth() {
        let (mut plan, ids) = chain(vec![
            NodeKind::Singleton,
            NodeKind::EnumerateCollection {
                collection: "c".to_string(),
                out_var: v(1),
                random: false,
            },
            NodeKind::Return { in_var: v(1) },
        ]);
        plan_registers(&mut plan).unwrap();
        assert_eq!(plan.node(ids[0]).depth, 0);
        assert_eq!(plan.node(ids[1]).depth, 1);
        assert_eq!(plan.node(ids[2]).depth, 1);
        let registers = plan.registers.as_ref().unwrap();
        assert_eq!(
            registers.location(v(1)),
            Some(VarLocation {
                depth: 1,
                register: 0
            })
        );
        assert_eq!(registers.total_nr_regs, 1);
    }

    #[test]
    fn calculation_output_stays_in_current_frame() {
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
            NodeKind::Return { in_var: v(2) },
        ]);
        plan_registers(&mut plan).unwrap();
        let registers = plan.registers.as_ref().unwrap();
        assert_eq!(registers.location(v(2)).unwrap().depth, 1);
        assert_eq!(registers.location(v(2)).unwrap().register, 1);
        assert_eq!(plan.node(ids[2]).depth, 1);
        assert_eq!(registers.nr_regs_here, vec![0, 2]);
    }

    #[test]
    fn clear_set_holds_last_uses_and_return_never_clears() {
        let (mut plan, ids) = chain(vec![
            NodeKind::Singleton,
            NodeKind::EnumerateCollection {
                collection: "c".to_string(),
                out_var: v(1),
                random: false,
            },
            NodeKind::Calculation {
                expression: Expr::attribute(v(1), "flag"),
                out_var: v(2),
                condition_var: None,
            },
            NodeKind::Filter { in_var: v(2) },
            NodeKind::Return { in_var: v(1) },
        ]);
        plan_registers(&mut plan).unwrap();
        let registers = plan.registers.clone().unwrap();
        let filter_reg = registers.location(v(2)).unwrap().register;
        // The filter is the last user of its condition variable
        assert_eq!(plan.node(ids[3]).regs_to_clear, BTreeSet::from([filter_reg]));
        // The calculation still needs v1 downstream, so it clears nothing
        assert!(plan.node(ids[2]).regs_to_clear.is_empty());
        assert!(plan.node(ids[4]).regs_to_clear.is_empty());
    }

    #[test]
    fn subquery_frames_continue_the_outer_frame() {
        let mut plan = ExecutionPlan::new();
        let s0 = plan.add_node(NodeKind::Singleton);
        let outer = plan.add_node(NodeKind::EnumerateCollection {
            collection: "c1".to_string(),
            out_var: v(1),
            random: false,
        });
        plan.add_dependency(outer, s0);

        let sub_s = plan.add_node(NodeKind::Singleton);
        let sub_enum = plan.add_node(NodeKind::EnumerateCollection {
            collection: "c2".to_string(),
            out_var: v(2),
            random: false,
        });
        plan.add_dependency(sub_enum, sub_s);
        let sub_return = plan.add_node(NodeKind::Return { in_var: v(2) });
        plan.add_dependency(sub_return, sub_enum);

        let subquery = plan.add_node(NodeKind::Subquery {
            subquery_root: sub_return,
            out_var: v(3),
        });
        plan.add_dependency(subquery, outer);
        let root = plan.add_node(NodeKind::Return { in_var: v(3) });
        plan.add_dependency(root, subquery);
        plan.set_root(root);

        plan_registers(&mut plan).unwrap();
        let registers = plan.registers.as_ref().unwrap();

        // Nested enumeration sits one depth above the outer one
        assert_eq!(registers.location(v(1)).unwrap().depth, 1);
        assert_eq!(registers.location(v(2)).unwrap().depth, 2);
        // The subquery result is a register in the outer frame
        assert_eq!(registers.location(v(3)).unwrap().depth, 1);
        assert_eq!(plan.node(subquery).depth, 1);
        // Every valid variable at the root is locatable
        for var in &plan.node(root).vars_valid {
            assert!(registers.location(*var).is_some());
        }
    }
}
