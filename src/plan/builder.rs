//! AST → initial plan lowering
//!
//! Builds the unoptimized execution plan: one linear chain of operators per
//! query body, with a Calculation node in front of every operator that
//! consumes a non-trivial expression. Scope is validated while lowering, so
//! undefined variable references surface here, before any optimization
//! runs.

use crate::ast::{CollectModifier, Expr, ForSource, Query, Statement};
use crate::catalog::{Catalog, CollectionAccess};
use crate::error::{PlannerError, PlannerResult};
use crate::plan::node::{NodeId, NodeKind, SortEntry};
use crate::plan::ExecutionPlan;
use crate::variable::{VariableId, VariableRegistry};
use std::collections::BTreeSet;

/// Lower a query body into its initial execution plan.
pub fn build_plan(
    query: &Query,
    catalog: &Catalog,
    registry: &mut VariableRegistry,
) -> PlannerResult<ExecutionPlan> {
    let mut builder = PlanBuilder {
        catalog,
        registry,
        plan: ExecutionPlan::new(),
    };
    let start = builder.plan.add_node(NodeKind::Singleton);
    let mut scope = BTreeSet::new();
    let root = builder.lower_body(&query.statements, &mut scope, start)?;
    builder.plan.set_root(root);
    Ok(builder.plan)
}

struct PlanBuilder<'a> {
    catalog: &'a Catalog,
    registry: &'a mut VariableRegistry,
    plan: ExecutionPlan,
}

impl PlanBuilder<'_> {
    fn lower_body(
        &mut self,
        statements: &[Statement],
        scope: &mut BTreeSet<VariableId>,
        start: NodeId,
    ) -> PlannerResult<NodeId> {
        let mut last = start;
        for statement in statements {
            last = self.lower_statement(statement, scope, last)?;
        }
        Ok(last)
    }

    fn lower_statement(
        &mut self,
        statement: &Statement,
        scope: &mut BTreeSet<VariableId>,
        last: NodeId,
    ) -> PlannerResult<NodeId> {
        match statement {
            Statement::For { variable, source } => {
                self.check_declared(*variable)?;
                let node = match source {
                    ForSource::Collection(name) => {
                        self.catalog.require(name)?;
                        self.plan
                            .note_collection_access(name, CollectionAccess::Read);
                        self.append(
                            NodeKind::EnumerateCollection {
                                collection: name.clone(),
                                out_var: *variable,
                                random: false,
                            },
                            last,
                        )
                    }
                    ForSource::Expression(expr) => {
                        let (in_var, before) = self.expression_variable(expr, scope, last)?;
                        self.append(
                            NodeKind::EnumerateList {
                                in_var,
                                out_var: *variable,
                            },
                            before,
                        )
                    }
                };
                scope.insert(*variable);
                Ok(node)
            }
            Statement::Filter { condition } => {
                let (in_var, before) = self.expression_variable(condition, scope, last)?;
                Ok(self.append(NodeKind::Filter { in_var }, before))
            }
            Statement::Let { variable, value } => {
                self.check_declared(*variable)?;
                let node = match value {
                    Expr::Subquery(query) => self.lower_subquery(query, *variable, scope, last)?,
                    expr => {
                        self.check_scope(expr, scope)?;
                        self.append(
                            NodeKind::Calculation {
                                expression: expr.clone(),
                                out_var: *variable,
                                condition_var: None,
                            },
                            last,
                        )
                    }
                };
                scope.insert(*variable);
                Ok(node)
            }
            Statement::Collect { groups, modifier } => {
                let mut before = last;
                let mut group_pairs = Vec::with_capacity(groups.len());
                for (out, expr) in groups {
                    self.check_declared(*out)?;
                    let (in_var, next) = self.expression_variable(expr, scope, before)?;
                    before = next;
                    group_pairs.push((*out, in_var));
                }
                let (expression_var, out_var, keep_vars, count_only) = match modifier {
                    CollectModifier::None => (None, None, Vec::new(), false),
                    CollectModifier::Into {
                        variable,
                        expression,
                        keep,
                    } => {
                        self.check_declared(*variable)?;
                        for var in keep {
                            if !scope.contains(var) {
                                return Err(self.unknown_variable(*var));
                            }
                        }
                        let expression_var = match expression {
                            Some(expr) => {
                                let (var, next) = self.expression_variable(expr, scope, before)?;
                                before = next;
                                Some(var)
                            }
                            None => None,
                        };
                        (expression_var, Some(*variable), keep.clone(), false)
                    }
                    CollectModifier::WithCount { variable } => {
                        self.check_declared(*variable)?;
                        (None, Some(*variable), Vec::new(), true)
                    }
                };
                let node = self.append(
                    NodeKind::Collect {
                        group_pairs: group_pairs.clone(),
                        expression_var,
                        out_var,
                        keep_vars,
                        count_only,
                    },
                    before,
                );
                // COLLECT starts a new scope: only group outputs and the
                // INTO/COUNT variable are visible downstream
                scope.clear();
                scope.extend(group_pairs.iter().map(|(out, _)| *out));
                scope.extend(out_var);
                Ok(node)
            }
            Statement::Sort { elements } => {
                if elements.is_empty() {
                    return Ok(last);
                }
                let mut before = last;
                let mut entries = Vec::with_capacity(elements.len());
                for element in elements {
                    let (variable, next) =
                        self.expression_variable(&element.expression, scope, before)?;
                    before = next;
                    entries.push(SortEntry {
                        variable,
                        ascending: element.ascending,
                    });
                }
                Ok(self.append(
                    NodeKind::Sort {
                        elements: entries,
                        stable: false,
                    },
                    before,
                ))
            }
            Statement::Limit {
                offset,
                count,
                full_count,
            } => {
                let offset = self.limit_value(offset, "offset")?;
                let limit = self.limit_value(count, "count")?;
                Ok(self.append(
                    NodeKind::Limit {
                        offset,
                        limit,
                        full_count: *full_count,
                    },
                    last,
                ))
            }
            Statement::Return { expression } => {
                let (in_var, before) = self.expression_variable(expression, scope, last)?;
                Ok(self.append(NodeKind::Return { in_var }, before))
            }
            Statement::Insert {
                document,
                collection,
                options,
            } => {
                self.catalog.require(collection)?;
                self.plan
                    .note_collection_access(collection, CollectionAccess::Write);
                let (in_var, before) = self.expression_variable(document, scope, last)?;
                Ok(self.append(
                    NodeKind::Insert {
                        collection: collection.clone(),
                        options: *options,
                        in_var,
                        out_var: None,
                    },
                    before,
                ))
            }
            Statement::Remove {
                key,
                collection,
                options,
            } => {
                self.catalog.require(collection)?;
                self.plan
                    .note_collection_access(collection, CollectionAccess::Write);
                let (in_var, before) = self.expression_variable(key, scope, last)?;
                Ok(self.append(
                    NodeKind::Remove {
                        collection: collection.clone(),
                        options: *options,
                        in_var,
                        out_var: None,
                    },
                    before,
                ))
            }
            Statement::Update {
                key,
                document,
                collection,
                options,
            }
            | Statement::Replace {
                key,
                document,
                collection,
                options,
            } => {
                self.catalog.require(collection)?;
                self.plan
                    .note_collection_access(collection, CollectionAccess::Write);
                let mut before = last;
                let in_key_var = match key {
                    Some(expr) => {
                        let (var, next) = self.expression_variable(expr, scope, before)?;
                        before = next;
                        Some(var)
                    }
                    None => None,
                };
                let (in_doc_var, before) = self.expression_variable(document, scope, before)?;
                let kind = match statement {
                    Statement::Update { .. } => NodeKind::Update {
                        collection: collection.clone(),
                        options: *options,
                        in_doc_var,
                        in_key_var,
                        out_var: None,
                    },
                    _ => NodeKind::Replace {
                        collection: collection.clone(),
                        options: *options,
                        in_doc_var,
                        in_key_var,
                        out_var: None,
                    },
                };
                Ok(self.append(kind, before))
            }
        }
    }

    fn lower_subquery(
        &mut self,
        query: &Query,
        out_var: VariableId,
        scope: &BTreeSet<VariableId>,
        last: NodeId,
    ) -> PlannerResult<NodeId> {
        match query.statements.last() {
            Some(Statement::Return { .. }) => {}
            Some(s) if matches!(
                s,
                Statement::Insert { .. }
                    | Statement::Update { .. }
                    | Statement::Replace { .. }
                    | Statement::Remove { .. }
            ) => {}
            _ => {
                return Err(PlannerError::bad_parameter(
                    "subquery must end with RETURN or a modification",
                ))
            }
        }
        let sub_start = self.plan.add_node(NodeKind::Singleton);
        let mut sub_scope = scope.clone();
        let sub_root = self.lower_body(&query.statements, &mut sub_scope, sub_start)?;
        Ok(self.append(
            NodeKind::Subquery {
                subquery_root: sub_root,
                out_var,
            },
            last,
        ))
    }

    /// Resolve an expression to a variable holding its value: plain
    /// references pass through, anything else gets a Calculation node on a
    /// planner temporary.
    fn expression_variable(
        &mut self,
        expr: &Expr,
        scope: &BTreeSet<VariableId>,
        last: NodeId,
    ) -> PlannerResult<(VariableId, NodeId)> {
        self.check_scope(expr, scope)?;
        if let Expr::Reference(var) = expr {
            return Ok((*var, last));
        }
        if matches!(expr, Expr::Subquery(_)) {
            return Err(PlannerError::bad_parameter(
                "subquery expressions are only supported as the value of LET",
            ));
        }
        let out_var = self.registry.create_temporary();
        let node = self.append(
            NodeKind::Calculation {
                expression: expr.clone(),
                out_var,
                condition_var: None,
            },
            last,
        );
        Ok((out_var, node))
    }

    fn limit_value(&self, expr: &Expr, what: &str) -> PlannerResult<usize> {
        let value = expr
            .eval_constant()
            .ok_or_else(|| PlannerError::NumberOutOfRange {
                message: format!("LIMIT {what} must be a numeric constant"),
            })?;
        let number = value.as_i64().ok_or_else(|| PlannerError::NumberOutOfRange {
            message: format!("LIMIT {what} must be an integer"),
        })?;
        usize::try_from(number).map_err(|_| PlannerError::NumberOutOfRange {
            message: format!("LIMIT {what} must not be negative"),
        })
    }

    fn append(&mut self, kind: NodeKind, dependency: NodeId) -> NodeId {
        let id = self.plan.add_node(kind);
        self.plan.add_dependency(id, dependency);
        id
    }

    fn check_scope(&self, expr: &Expr, scope: &BTreeSet<VariableId>) -> PlannerResult<()> {
        let mut used = BTreeSet::new();
        expr.free_variables(&mut used);
        for var in used {
            if !scope.contains(&var) {
                return Err(self.unknown_variable(var));
            }
        }
        Ok(())
    }

    fn check_declared(&self, variable: VariableId) -> PlannerResult<()> {
        if self.registry.get(variable).is_none() {
            return Err(PlannerError::bad_parameter(format!(
                "variable #{variable} is not registered"
            )));
        }
        Ok(())
    }

    fn unknown_variable(&self, variable: VariableId) -> PlannerError {
        match self.registry.get(variable) {
            Some(known) => PlannerError::bad_parameter(format!(
                "unknown variable '{}' referenced before declaration",
                known.name
            )),
            None => PlannerError::bad_parameter(format!("unknown variable #{variable}")),
        }
    }
}
