//! Index range model
//!
//! A [`RangeInfo`] is a bounded predicate on one attribute for one index
//! lookup; a conjunct is a list of `RangeInfo`s over distinct attributes;
//! a range set is a disjunction of conjuncts. The whole structure is a DNF
//! normalized against one index.
//!
//! Ranges are extracted from filter conditions by
//! [`ranges_from_condition`]; extraction is all-or-nothing so a filter can
//! only be dropped when the index lookup covers it completely.

use crate::ast::{BinaryOp, Expr};
use crate::variable::VariableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One endpoint of a range predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    pub value: Expr,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn inclusive(value: Expr) -> Self {
        RangeBound {
            value,
            inclusive: true,
        }
    }

    pub fn exclusive(value: Expr) -> Self {
        RangeBound {
            value,
            inclusive: false,
        }
    }
}

/// Bounds on one attribute for one index lookup. Multiple bounds on the
/// same side arise from conjunctions like `x.a > 1 && x.a > @p`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeInfo {
    pub attribute: String,
    pub lows: Vec<RangeBound>,
    pub highs: Vec<RangeBound>,
}

impl RangeInfo {
    pub fn new(attribute: impl Into<String>) -> Self {
        RangeInfo {
            attribute: attribute.into(),
            lows: Vec::new(),
            highs: Vec::new(),
        }
    }

    /// An equality predicate: both endpoints inclusive on the same value.
    pub fn equality(attribute: impl Into<String>, value: Expr) -> Self {
        RangeInfo {
            attribute: attribute.into(),
            lows: vec![RangeBound::inclusive(value.clone())],
            highs: vec![RangeBound::inclusive(value)],
        }
    }

    pub fn is_equality(&self) -> bool {
        self.lows.len() == 1
            && self.highs.len() == 1
            && self.lows[0].inclusive
            && self.highs[0].inclusive
            && self.lows[0].value == self.highs[0].value
    }

    /// Total number of bound expressions on this attribute.
    pub fn bound_count(&self) -> usize {
        self.lows.len() + self.highs.len()
    }

    pub fn has_low(&self) -> bool {
        !self.lows.is_empty()
    }

    pub fn has_high(&self) -> bool {
        !self.highs.is_empty()
    }

    /// Variables referenced by dynamic bounds.
    pub fn free_variables(&self, out: &mut BTreeSet<VariableId>) {
        for bound in self.lows.iter().chain(self.highs.iter()) {
            bound.value.free_variables(out);
        }
    }

    fn merge(&mut self, other: RangeInfo) {
        self.lows.extend(other.lows);
        self.highs.extend(other.highs);
    }
}

/// A disjunction of per-attribute conjunctions, normalized against one
/// index.
pub type RangeSet = Vec<Vec<RangeInfo>>;

/// Variables referenced by any dynamic bound in the set.
pub fn range_set_variables(ranges: &RangeSet, out: &mut BTreeSet<VariableId>) {
    for conjunct in ranges {
        for info in conjunct {
            info.free_variables(out);
        }
    }
}

/// Attributes bound by equality in every disjunct of the set.
pub fn equality_attributes(ranges: &RangeSet) -> Vec<String> {
    let mut common: Option<BTreeSet<String>> = None;
    for conjunct in ranges {
        let eq: BTreeSet<String> = conjunct
            .iter()
            .filter(|info| info.is_equality())
            .map(|info| info.attribute.clone())
            .collect();
        common = Some(match common {
            None => eq,
            Some(prev) => prev.intersection(&eq).cloned().collect(),
        });
    }
    common.unwrap_or_default().into_iter().collect()
}

/// Convert a filter condition into a DNF range set over attributes of
/// `variable`. Returns `None` when any part of the condition cannot be
/// expressed as an attribute range; extraction is all-or-nothing.
///
/// A bound expression may reference other variables (a dynamic bound) but
/// never `variable` itself.
pub fn ranges_from_condition(condition: &Expr, variable: VariableId) -> Option<RangeSet> {
    match condition {
        Expr::Binary {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } => {
            let mut ranges = ranges_from_condition(lhs, variable)?;
            ranges.extend(ranges_from_condition(rhs, variable)?);
            Some(ranges)
        }
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => {
            let left = ranges_from_condition(lhs, variable)?;
            let right = ranges_from_condition(rhs, variable)?;
            // Cross-product of the two disjunctions, merging same-attribute
            // bounds within each combined conjunct
            let mut ranges = Vec::with_capacity(left.len() * right.len());
            for l in &left {
                for r in &right {
                    let mut conjunct = l.clone();
                    for info in r.clone() {
                        match conjunct
                            .iter_mut()
                            .find(|existing| existing.attribute == info.attribute)
                        {
                            Some(existing) => existing.merge(info),
                            None => conjunct.push(info),
                        }
                    }
                    ranges.push(conjunct);
                }
            }
            Some(ranges)
        }
        Expr::Binary {
            op: BinaryOp::In,
            lhs,
            rhs,
        } => {
            let attribute = attribute_of(lhs, variable)?;
            let Expr::Array(items) = rhs.as_ref() else {
                return None;
            };
            if items.is_empty() {
                return None;
            }
            // IN over an array literal is a disjunction of equalities
            let mut ranges = Vec::with_capacity(items.len());
            for item in items {
                if references(item, variable) {
                    return None;
                }
                ranges.push(vec![RangeInfo::equality(attribute.clone(), item.clone())]);
            }
            Some(ranges)
        }
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            comparison_range(*op, lhs, rhs, variable).map(|info| vec![vec![info]])
        }
        _ => None,
    }
}

fn comparison_range(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    variable: VariableId,
) -> Option<RangeInfo> {
    // Orient the comparison as `attribute op bound`
    let (attribute, bound, op) = if let Some(attribute) = attribute_of(lhs, variable) {
        (attribute, rhs, op)
    } else {
        let attribute = attribute_of(rhs, variable)?;
        let flipped = match op {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        };
        (attribute, lhs, flipped)
    };
    if references(bound, variable) {
        return None;
    }
    let mut info = RangeInfo::new(attribute);
    match op {
        BinaryOp::Eq => return Some(RangeInfo::equality(info.attribute, bound.clone())),
        BinaryOp::Lt => info.highs.push(RangeBound::exclusive(bound.clone())),
        BinaryOp::Le => info.highs.push(RangeBound::inclusive(bound.clone())),
        BinaryOp::Gt => info.lows.push(RangeBound::exclusive(bound.clone())),
        BinaryOp::Ge => info.lows.push(RangeBound::inclusive(bound.clone())),
        // != has no useful range form
        _ => return None,
    }
    Some(info)
}

fn attribute_of(expr: &Expr, variable: VariableId) -> Option<String> {
    let (var, path) = expr.attribute_path()?;
    if var == variable {
        Some(path.join("."))
    } else {
        None
    }
}

fn references(expr: &Expr, variable: VariableId) -> bool {
    let mut vars = BTreeSet::new();
    expr.free_variables(&mut vars);
    vars.contains(&variable)
}
