//! # QQL AST - Abstract Syntax Tree Types
//!
//! The bound abstract syntax tree handed to the planner by the parser and
//! binder. Statements (`FOR`, `FILTER`, `LET`, `COLLECT`, `SORT`, `LIMIT`,
//! `RETURN` and the modification operations) form the query body;
//! expressions are a separate tree of values, references, attribute
//! accesses, and operators. All variable references are already resolved to
//! [`VariableId`]s.
//!
//! Besides the types themselves, this module carries the analyses the
//! planner needs from expressions: free-variable collection, constant
//! detection and folding, may-throw classification, and the extraction of
//! attribute comparisons used for index matching.

use crate::variable::VariableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Values and expressions
// ============================================================================

/// A literal value appearing in the query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl AstValue {
    /// Truthiness: `null`, `false`, `0`, `0.0` and `""` are falsy,
    /// everything else is truthy.
    pub fn is_true(&self) -> bool {
        match self {
            AstValue::Null => false,
            AstValue::Bool(b) => *b,
            AstValue::Int(i) => *i != 0,
            AstValue::Double(d) => *d != 0.0,
            AstValue::String(s) => !s.is_empty(),
        }
    }

    /// Numeric view, when the value is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AstValue::Int(i) => Some(*i as f64),
            AstValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AstValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Unary expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value
    Constant(AstValue),
    /// Reference to a bound variable
    Reference(VariableId),
    /// Attribute access, `object.name`
    Attribute { object: Box<Expr>, name: String },
    /// Array constructor
    Array(Vec<Expr>),
    /// Object constructor
    Object(Vec<(String, Expr)>),
    /// Numeric range, `low..high` (inclusive on both ends)
    Range { low: Box<Expr>, high: Box<Expr> },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Call to a query function
    FunctionCall { name: String, args: Vec<Expr> },
    /// A nested query; only legal as the value of a `LET`
    Subquery(Box<Query>),
}

impl Expr {
    pub fn constant(value: AstValue) -> Expr {
        Expr::Constant(value)
    }

    pub fn int(value: i64) -> Expr {
        Expr::Constant(AstValue::Int(value))
    }

    pub fn reference(variable: VariableId) -> Expr {
        Expr::Reference(variable)
    }

    /// `variable.name` attribute access.
    pub fn attribute(variable: VariableId, name: impl Into<String>) -> Expr {
        Expr::Attribute {
            object: Box::new(Expr::Reference(variable)),
            name: name.into(),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Collect every variable referenced by this expression. Subquery
    /// expressions contribute their free variables only (bindings created
    /// inside the subquery are excluded).
    pub fn free_variables(&self, out: &mut BTreeSet<VariableId>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Reference(v) => {
                out.insert(*v);
            }
            Expr::Attribute { object, .. } => object.free_variables(out),
            Expr::Array(items) => {
                for item in items {
                    item.free_variables(out);
                }
            }
            Expr::Object(pairs) => {
                for (_, value) in pairs {
                    value.free_variables(out);
                }
            }
            Expr::Range { low, high } => {
                low.free_variables(out);
                high.free_variables(out);
            }
            Expr::Unary { operand, .. } => operand.free_variables(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.free_variables(out);
                rhs.free_variables(out);
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.free_variables(out);
                }
            }
            Expr::Subquery(query) => {
                let mut used = BTreeSet::new();
                let mut bound = BTreeSet::new();
                query.collect_variable_usage(&mut used, &mut bound);
                out.extend(used.difference(&bound));
            }
        }
    }

    /// Whether the expression can be evaluated without any row context.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Constant(_) => true,
            Expr::Reference(_) | Expr::Subquery(_) | Expr::FunctionCall { .. } => false,
            Expr::Attribute { object, .. } => object.is_constant(),
            Expr::Array(items) => items.iter().all(Expr::is_constant),
            Expr::Object(pairs) => pairs.iter().all(|(_, v)| v.is_constant()),
            Expr::Range { low, high } => low.is_constant() && high.is_constant(),
            Expr::Unary { operand, .. } => operand.is_constant(),
            Expr::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
        }
    }

    /// Fold a constant scalar expression to its value. Returns `None` for
    /// non-constant expressions and for constructs the planner does not
    /// fold (arrays, objects, ranges, attribute access on constants).
    pub fn eval_constant(&self) -> Option<AstValue> {
        match self {
            Expr::Constant(value) => Some(value.clone()),
            Expr::Unary { op, operand } => {
                let value = operand.eval_constant()?;
                match op {
                    UnaryOp::Not => Some(AstValue::Bool(!value.is_true())),
                    UnaryOp::Neg => match value {
                        AstValue::Int(i) => Some(AstValue::Int(i.checked_neg()?)),
                        AstValue::Double(d) => Some(AstValue::Double(-d)),
                        _ => None,
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = lhs.eval_constant()?;
                match op {
                    // Short-circuit forms fold from the left side alone
                    BinaryOp::And if !left.is_true() => Some(AstValue::Bool(false)),
                    BinaryOp::Or if left.is_true() => Some(AstValue::Bool(true)),
                    BinaryOp::And | BinaryOp::Or => {
                        Some(AstValue::Bool(rhs.eval_constant()?.is_true()))
                    }
                    BinaryOp::Eq => Some(AstValue::Bool(left == rhs.eval_constant()?)),
                    BinaryOp::Ne => Some(AstValue::Bool(left != rhs.eval_constant()?)),
                    BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                        let l = left.as_f64()?;
                        let r = rhs.eval_constant()?.as_f64()?;
                        let result = match op {
                            BinaryOp::Lt => l < r,
                            BinaryOp::Le => l <= r,
                            BinaryOp::Gt => l > r,
                            _ => l >= r,
                        };
                        Some(AstValue::Bool(result))
                    }
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                        let right = rhs.eval_constant()?;
                        match (left, right) {
                            (AstValue::Int(l), AstValue::Int(r)) => {
                                let folded = match op {
                                    BinaryOp::Add => l.checked_add(r)?,
                                    BinaryOp::Sub => l.checked_sub(r)?,
                                    _ => l.checked_mul(r)?,
                                };
                                Some(AstValue::Int(folded))
                            }
                            (l, r) => {
                                let l = l.as_f64()?;
                                let r = r.as_f64()?;
                                let folded = match op {
                                    BinaryOp::Add => l + r,
                                    BinaryOp::Sub => l - r,
                                    _ => l * r,
                                };
                                Some(AstValue::Double(folded))
                            }
                        }
                    }
                    // Division can throw; leave it to the executor
                    BinaryOp::Div | BinaryOp::Mod | BinaryOp::In => None,
                }
            }
            _ => None,
        }
    }

    /// Whether evaluating the expression can raise a runtime error.
    /// Division and modulo can hit a zero divisor; function calls are
    /// opaque and assumed throwing.
    pub fn may_throw(&self) -> bool {
        match self {
            Expr::Constant(_) | Expr::Reference(_) => false,
            Expr::Attribute { object, .. } => object.may_throw(),
            Expr::Array(items) => items.iter().any(Expr::may_throw),
            Expr::Object(pairs) => pairs.iter().any(|(_, v)| v.may_throw()),
            Expr::Range { low, high } => low.may_throw() || high.may_throw(),
            Expr::Unary { operand, .. } => operand.may_throw(),
            Expr::Binary { op, lhs, rhs } => {
                matches!(op, BinaryOp::Div | BinaryOp::Mod) || lhs.may_throw() || rhs.may_throw()
            }
            Expr::FunctionCall { .. } => true,
            Expr::Subquery(query) => query.statements.iter().any(Statement::may_throw),
        }
    }

    /// When the expression is a (possibly nested) attribute access rooted at
    /// a variable reference, return the variable and the dotted path.
    pub fn attribute_path(&self) -> Option<(VariableId, Vec<String>)> {
        match self {
            Expr::Attribute { object, name } => match object.as_ref() {
                Expr::Reference(v) => Some((*v, vec![name.clone()])),
                _ => {
                    let (v, mut path) = object.attribute_path()?;
                    path.push(name.clone());
                    Some((v, path))
                }
            },
            _ => None,
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Options carried by the modification operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModificationOptions {
    pub wait_for_sync: bool,
    pub ignore_errors: bool,
    pub keep_null: bool,
    pub merge_objects: bool,
}

impl Default for ModificationOptions {
    fn default() -> Self {
        ModificationOptions {
            wait_for_sync: false,
            ignore_errors: false,
            keep_null: true,
            merge_objects: true,
        }
    }
}

/// Row source of a `FOR` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForSource {
    /// Enumerate the documents of a named collection
    Collection(String),
    /// Enumerate the elements of an array-valued expression
    Expression(Expr),
}

/// One element of a `SORT` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortElement {
    pub expression: Expr,
    pub ascending: bool,
}

/// The grouping modifier of a `COLLECT` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectModifier {
    /// Plain grouping
    None,
    /// `INTO groups [= expression] [KEEP vars]`
    Into {
        variable: VariableId,
        expression: Option<Expr>,
        keep: Vec<VariableId>,
    },
    /// `WITH COUNT INTO counter`
    WithCount { variable: VariableId },
}

/// One statement of a query body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    For {
        variable: VariableId,
        source: ForSource,
    },
    Filter {
        condition: Expr,
    },
    Let {
        variable: VariableId,
        value: Expr,
    },
    Collect {
        groups: Vec<(VariableId, Expr)>,
        modifier: CollectModifier,
    },
    Sort {
        elements: Vec<SortElement>,
    },
    Limit {
        offset: Expr,
        count: Expr,
        full_count: bool,
    },
    Return {
        expression: Expr,
    },
    Insert {
        document: Expr,
        collection: String,
        options: ModificationOptions,
    },
    Update {
        key: Option<Expr>,
        document: Expr,
        collection: String,
        options: ModificationOptions,
    },
    Replace {
        key: Option<Expr>,
        document: Expr,
        collection: String,
        options: ModificationOptions,
    },
    Remove {
        key: Expr,
        collection: String,
        options: ModificationOptions,
    },
}

impl Statement {
    /// Variables this statement binds into scope.
    pub fn bound_variables(&self, out: &mut BTreeSet<VariableId>) {
        match self {
            Statement::For { variable, .. } | Statement::Let { variable, .. } => {
                out.insert(*variable);
            }
            Statement::Collect { groups, modifier } => {
                for (variable, _) in groups {
                    out.insert(*variable);
                }
                match modifier {
                    CollectModifier::Into { variable, .. }
                    | CollectModifier::WithCount { variable } => {
                        out.insert(*variable);
                    }
                    CollectModifier::None => {}
                }
            }
            _ => {}
        }
    }

    /// Variables this statement reads.
    pub fn used_variables(&self, out: &mut BTreeSet<VariableId>) {
        match self {
            Statement::For { source, .. } => {
                if let ForSource::Expression(expr) = source {
                    expr.free_variables(out);
                }
            }
            Statement::Filter { condition } => condition.free_variables(out),
            Statement::Let { value, .. } => value.free_variables(out),
            Statement::Collect { groups, modifier } => {
                for (_, expr) in groups {
                    expr.free_variables(out);
                }
                if let CollectModifier::Into {
                    expression, keep, ..
                } = modifier
                {
                    if let Some(expr) = expression {
                        expr.free_variables(out);
                    }
                    out.extend(keep.iter().copied());
                }
            }
            Statement::Sort { elements } => {
                for element in elements {
                    element.expression.free_variables(out);
                }
            }
            Statement::Limit { offset, count, .. } => {
                offset.free_variables(out);
                count.free_variables(out);
            }
            Statement::Return { expression } => expression.free_variables(out),
            Statement::Insert { document, .. } => document.free_variables(out),
            Statement::Update { key, document, .. }
            | Statement::Replace { key, document, .. } => {
                if let Some(key) = key {
                    key.free_variables(out);
                }
                document.free_variables(out);
            }
            Statement::Remove { key, .. } => key.free_variables(out),
        }
    }

    fn may_throw(&self) -> bool {
        let mut throws = false;
        self.for_each_expression(&mut |expr| throws = throws || expr.may_throw());
        throws
            || matches!(
                self,
                Statement::Insert { .. }
                    | Statement::Update { .. }
                    | Statement::Replace { .. }
                    | Statement::Remove { .. }
            )
    }

    fn for_each_expression(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Statement::For { source, .. } => {
                if let ForSource::Expression(expr) = source {
                    f(expr);
                }
            }
            Statement::Filter { condition } => f(condition),
            Statement::Let { value, .. } => f(value),
            Statement::Collect { groups, modifier } => {
                for (_, expr) in groups {
                    f(expr);
                }
                if let CollectModifier::Into {
                    expression: Some(expr),
                    ..
                } = modifier
                {
                    f(expr);
                }
            }
            Statement::Sort { elements } => {
                for element in elements {
                    f(&element.expression);
                }
            }
            Statement::Limit { offset, count, .. } => {
                f(offset);
                f(count);
            }
            Statement::Return { expression } => f(expression),
            Statement::Insert { document, .. } => f(document),
            Statement::Update { key, document, .. }
            | Statement::Replace { key, document, .. } => {
                if let Some(key) = key {
                    f(key);
                }
                f(document);
            }
            Statement::Remove { key, .. } => f(key),
        }
    }
}

/// A complete query body: the statement list of one (sub)query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub statements: Vec<Statement>,
}

impl Query {
    pub fn new(statements: Vec<Statement>) -> Self {
        Query { statements }
    }

    /// Union of variables used and variables bound, across all statements
    /// including nested subqueries.
    pub fn collect_variable_usage(
        &self,
        used: &mut BTreeSet<VariableId>,
        bound: &mut BTreeSet<VariableId>,
    ) {
        for statement in &self.statements {
            statement.used_variables(used);
            statement.bound_variables(bound);
        }
    }
}
