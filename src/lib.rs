//! # Quarry Query Planner
//!
//! Query planning and optimization core for QQL, a JSON-document-oriented
//! declarative query language (`FOR` / `FILTER` / `LET` / `COLLECT` /
//! `SORT` / `LIMIT` / `RETURN` plus modification operations and
//! subqueries). Given a bound AST and collection/index metadata, the
//! planner produces candidate execution plans, optimizes them with
//! cost-estimating rules, and register-plans the winner for a downstream
//! executor.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Bound AST (parser/binder, external)
//!     ↓
//! [Plan Builder]        → initial ExecutionPlan
//!     ↓
//! [Usage Analyzer]      → varsValid / varsUsedLater / varSetBy
//!     ↓
//! [Optimizer]           → frontier of candidate plans, rule by rule
//!     ↓
//! [Cost Estimator]      → per-node (nrItems, cost), cheapest plan wins
//!     ↓
//! [Register Planner]    → depth-stratified register frames + clear sets
//!     ↓
//! Serializable plan document (executor, external)
//! ```
//!
//! Planning one query is single-threaded and deterministic: identical
//! inputs always select structurally identical plans. Concurrent queries
//! each own a [`QueryContext`]; nothing is shared.
//!
//! ## Usage
//!
//! ```rust
//! use quarry::{ast, Catalog, Collection, Planner, QueryContext};
//!
//! let mut catalog = Catalog::new();
//! catalog.add_collection(Collection::new("users", 1000));
//!
//! let mut ctx = QueryContext::new();
//! let u = ctx.variables.create("u");
//! let query = ast::Query::new(vec![
//!     ast::Statement::For {
//!         variable: u,
//!         source: ast::ForSource::Collection("users".to_string()),
//!     },
//!     ast::Statement::Return {
//!         expression: ast::Expr::reference(u),
//!     },
//! ]);
//!
//! let planner = Planner::default();
//! let plan = planner.plan(&query, &catalog, &mut ctx).unwrap();
//! assert!(plan.root_estimate().1.is_some());
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Bound AST types + expression analyses |
//! | `variable` | Variable identities and registry |
//! | `catalog` | Collection/index metadata interface |
//! | `plan` | Plan graph, node taxonomy, builder, serialization |
//! | `usage` | Variable liveness analysis |
//! | `cost` | Cardinality and cost estimation |
//! | `optimizer` | Rule table and multi-plan driver |
//! | `registers` | Register frame assignment |
//! | `config` | Configuration loading |

pub mod ast;
pub mod catalog;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod optimizer;
pub mod plan;
pub mod registers;
pub mod usage;
pub mod variable;

pub use crate::catalog::{Catalog, Collection, CollectionAccess, Index, IndexKind};
pub use crate::config::PlannerConfig;
pub use crate::context::{CancellationHandle, QueryContext};
pub use crate::cost::{CostConstants, CostEstimate};
pub use crate::error::{PlannerError, PlannerResult};
pub use crate::optimizer::{default_rules, Optimizer, OptimizerOptions, RuleDef, RuleOutcome};
pub use crate::plan::{ExecutionPlan, NodeId, NodeKind, PlanNode, SortEntry};
pub use crate::registers::{RegisterPlan, VarLocation};
pub use crate::variable::{Variable, VariableId, VariableRegistry};

use crate::ast::Query;
use tracing::debug;

/// The front door of the crate: builds, optimizes, and register-plans
/// queries according to one configuration.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Planner { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan a query end to end: the returned plan is the cheapest
    /// candidate, fully costed and register-planned.
    pub fn plan(
        &self,
        query: &Query,
        catalog: &Catalog,
        ctx: &mut QueryContext,
    ) -> PlannerResult<ExecutionPlan> {
        let mut candidates = self.plan_candidates(query, catalog, ctx)?;
        let mut best = candidates.remove(0);
        registers::plan_registers(&mut best)?;
        let (items, cost) = best.root_estimate();
        debug!(
            cost,
            items,
            alternatives = candidates.len(),
            "query_planned"
        );
        Ok(best)
    }

    /// All surviving candidate plans, cheapest first, costed but not
    /// register-planned.
    pub fn plan_candidates(
        &self,
        query: &Query,
        catalog: &Catalog,
        ctx: &mut QueryContext,
    ) -> PlannerResult<Vec<ExecutionPlan>> {
        let initial = plan::builder::build_plan(query, catalog, &mut ctx.variables)?;
        let optimizer = Optimizer::with_default_rules(self.config.optimizer.clone());
        let candidates = optimizer.optimize(initial, catalog, &self.config.cost, ctx)?;
        if candidates.is_empty() {
            return Err(PlannerError::internal("optimizer returned no plans"));
        }
        Ok(candidates)
    }

    /// Plan and serialize in one step: the JSON explain document of the
    /// chosen plan.
    pub fn explain(
        &self,
        query: &Query,
        catalog: &Catalog,
        ctx: &mut QueryContext,
    ) -> PlannerResult<serde_json::Value> {
        let plan = self.plan(query, catalog, ctx)?;
        plan::serialize::to_json(&plan, &ctx.variables)
    }
}
