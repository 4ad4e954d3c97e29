//! # Plan Optimizer
//!
//! Rule-driven optimization over a frontier of candidate plans:
//!
//! ```text
//! initial plan -> [rules, by level] -> candidate plans -> cost sort -> best
//! ```
//!
//! Rules are registered as `(name, level, function)` in an explicit table
//! (see [`rules::default_rules`]); the optimizer owns no global state. Each
//! candidate carries the highest rule level already applied to it, so a
//! plan forked mid-pass re-enters the pipeline at the forking rule's level.
//! The frontier is capped: when forks would push past
//! `max_number_of_plans`, the excess is dropped, and after every pass the
//! frontier is pruned to the cheapest plans. The final ordering is a stable
//! cost sort, so identical inputs always select identical plans.

pub mod rules;

pub use rules::{default_rules, RuleContext, RuleDef, RuleFn, RuleOutcome};

use crate::catalog::Catalog;
use crate::context::QueryContext;
use crate::cost::{self, CostConstants};
use crate::error::PlannerResult;
use crate::plan::ExecutionPlan;
use crate::usage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Hard upper bound on the plan frontier, regardless of configuration.
pub const MAX_PLANS_HARD_CAP: usize = 1000;

fn default_max_plans() -> usize {
    128
}

/// User-facing optimizer options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Upper bound on the number of candidate plans kept at once
    pub max_number_of_plans: usize,
    /// Rule toggles: `+name` / `-name`, with the pseudo-rule `all`
    pub rules: Vec<String>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            max_number_of_plans: default_max_plans(),
            rules: Vec::new(),
        }
    }
}

/// The optimizer driver.
pub struct Optimizer {
    rules: Vec<RuleDef>,
    options: OptimizerOptions,
}

struct Candidate {
    plan: ExecutionPlan,
    /// Highest rule level already applied
    level: u32,
    /// Creation order, the deterministic tie-breaker
    seq: u64,
}

impl Optimizer {
    /// Build an optimizer over an explicit rule table. The table is sorted
    /// by level, keeping registration order within a level.
    pub fn new(mut rules: Vec<RuleDef>, mut options: OptimizerOptions) -> Self {
        rules.sort_by_key(|r| r.level);
        options.max_number_of_plans = options.max_number_of_plans.clamp(1, MAX_PLANS_HARD_CAP);
        Optimizer { rules, options }
    }

    pub fn with_default_rules(options: OptimizerOptions) -> Self {
        Optimizer::new(default_rules(), options)
    }

    /// Resolve the `+`/`-`/`all` toggle list against the table defaults.
    fn enabled_rules(&self) -> Vec<RuleDef> {
        let mut enabled: Vec<bool> = self.rules.iter().map(|r| r.default_on).collect();
        for token in &self.options.rules {
            let (on, name) = match token.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, token.strip_prefix('+').unwrap_or(token)),
            };
            if name == "all" {
                enabled.iter_mut().for_each(|e| *e = on);
                continue;
            }
            let mut known = false;
            for (i, rule) in self.rules.iter().enumerate() {
                if rule.name == name {
                    enabled[i] = on;
                    known = true;
                }
            }
            if !known {
                debug!(rule = name, "unknown_rule_toggle_ignored");
            }
        }
        self.rules
            .iter()
            .zip(enabled)
            .filter_map(|(rule, on)| on.then_some(*rule))
            .collect()
    }

    /// Run all enabled rules over the plan and return every surviving
    /// candidate, cheapest first. The caller picks `plans[0]`.
    pub fn optimize(
        &self,
        plan: ExecutionPlan,
        catalog: &Catalog,
        constants: &CostConstants,
        query: &QueryContext,
    ) -> PlannerResult<Vec<ExecutionPlan>> {
        let rules = self.enabled_rules();
        let rule_ctx = RuleContext {
            catalog,
            constants,
        };
        let max_plans = self.options.max_number_of_plans;

        let mut seq: u64 = 1;
        let mut current: VecDeque<Candidate> = VecDeque::from([Candidate {
            plan,
            level: 0,
            seq: 0,
        }]);
        let mut finished: Vec<Candidate> = Vec::new();

        while !current.is_empty() {
            let mut next: VecDeque<Candidate> = VecDeque::new();
            while let Some(mut candidate) = current.pop_front() {
                query.check_cancelled()?;
                let entry_level = candidate.level;
                for rule in rules.iter().filter(|r| r.level > entry_level) {
                    query.check_cancelled()?;
                    let outcome = (rule.apply)(&mut candidate.plan, &rule_ctx)?;
                    candidate.level = rule.level;
                    match outcome {
                        RuleOutcome::Unchanged => {}
                        RuleOutcome::Modified => {
                            candidate.plan.applied_rules.push(rule.name.to_string());
                            debug!(rule = rule.name, plan = candidate.seq, "rule_applied");
                        }
                        RuleOutcome::Forked(forks) => {
                            let mut accepted = 0usize;
                            let mut dropped = 0usize;
                            for mut fork in forks {
                                let alive =
                                    current.len() + next.len() + finished.len() + 1 + accepted;
                                if alive >= max_plans {
                                    dropped += 1;
                                    continue;
                                }
                                fork.applied_rules.push(rule.name.to_string());
                                next.push_back(Candidate {
                                    plan: fork,
                                    level: rule.level,
                                    seq,
                                });
                                seq += 1;
                                accepted += 1;
                            }
                            if accepted > 0 || dropped > 0 {
                                debug!(
                                    rule = rule.name,
                                    accepted, dropped, "plans_forked"
                                );
                            }
                        }
                    }
                }
                finished.push(candidate);
            }

            // Prune the pass frontier down to the cheapest plans
            if next.len() + finished.len() > max_plans {
                let keep = max_plans.saturating_sub(finished.len()).max(1);
                let mut costed: Vec<(f64, Candidate)> = Vec::with_capacity(next.len());
                for mut candidate in next {
                    query.check_cancelled()?;
                    let estimate =
                        cost::estimate_plan(&mut candidate.plan, catalog, constants)?;
                    costed.push((estimate.cost, candidate));
                }
                costed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.seq.cmp(&b.1.seq)));
                let dropped = costed.len().saturating_sub(keep);
                if dropped > 0 {
                    debug!(dropped, keep, "plans_pruned");
                }
                costed.truncate(keep);
                current = costed.into_iter().map(|(_, c)| c).collect();
            } else {
                current = next;
            }
        }

        // Final ordering: re-analyze and re-cost every survivor, then sort
        // ascending by cost with creation order as the tie-breaker
        let mut costed: Vec<(f64, Candidate)> = Vec::with_capacity(finished.len());
        for mut candidate in finished {
            query.check_cancelled()?;
            usage::analyze(&mut candidate.plan)?;
            let estimate = cost::estimate_plan(&mut candidate.plan, catalog, constants)?;
            costed.push((estimate.cost, candidate));
        }
        costed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.seq.cmp(&b.1.seq)));
        if let Some((best_cost, best)) = costed.first() {
            debug!(
                cost = *best_cost,
                candidates = costed.len(),
                rules = ?best.plan.applied_rules,
                "plan_selected"
            );
        }
        Ok(costed.into_iter().map(|(_, c)| c.plan).collect())
    }
}
