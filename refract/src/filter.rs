//! Predicates and the filter pusher.
//!
//! A [`Predicate`] names columns of a single entity; it does not know which
//! alias it will be bound to. [`push_filters`] walks a [`JoinPlan`] and binds
//! each step's predicate to that step's alias, validating every column.

use crate::entity_metadata::{EntityMetadata, SchemaRegistry};
use crate::join_plan::JoinPlan;
use crate::key_types::RefractKey;
use crate::types::{RefractError, RefractResult};
use sea_orm::sea_query::{Alias, Condition, Expr, SimpleExpr};
use sea_orm::Value;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
}

/// Tagged filter expression over one entity's columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Equals(String, Value),
    In(String, Vec<Value>),
    Compare(String, CompareOp, Value),
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(column.into(), value.into())
    }

    pub fn is_in<V, I>(column: impl Into<String>, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare(column.into(), CompareOp::NotEquals, value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare(column.into(), CompareOp::Gt, value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare(column.into(), CompareOp::Gte, value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare(column.into(), CompareOp::Lt, value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare(column.into(), CompareOp::Lte, value.into())
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Compare(column.into(), CompareOp::Like, Value::from(pattern.into()))
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    /// Conjunction of several equalities, the `{username: 'leia', id: 1}` form.
    pub fn all<I>(predicates: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        Self::And(predicates.into_iter().collect())
    }

    pub fn any<I>(predicates: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        Self::Or(predicates.into_iter().collect())
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// AND two predicates, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = Vec::new();
        for p in [self, other] {
            match p {
                Self::And(inner) => parts.extend(inner),
                p => parts.push(p),
            }
        }
        Self::And(parts)
    }

    /// Every column this predicate mentions.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Equals(c, _) | Self::In(c, _) | Self::Compare(c, _, _) | Self::IsNull(c) => {
                out.push(c)
            }
            Self::And(ps) | Self::Or(ps) => ps.iter().for_each(|p| p.collect_columns(out)),
            Self::Not(p) => p.collect_columns(out),
        }
    }

    /// Equalities that must all hold: top-level `Equals` terms, looking
    /// through `And` but never through `Or`/`Not`.
    pub fn required_equalities(&self) -> Vec<(&str, &Value)> {
        match self {
            Self::Equals(c, v) => vec![(c.as_str(), v)],
            Self::And(ps) => ps.iter().flat_map(|p| p.required_equalities()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn validate(&self, entity: &EntityMetadata) -> RefractResult<()> {
        for column in self.columns() {
            entity.require_attribute(column)?;
        }
        Ok(())
    }

    /// Render as a sea-query condition with columns qualified by `alias`.
    pub fn to_condition(&self, alias: &str) -> Condition {
        let col = |c: &str| Expr::col((Alias::new(alias), Alias::new(c)));
        let leaf = |expr: SimpleExpr| Condition::all().add(expr);
        match self {
            Self::And(ps) => ps
                .iter()
                .fold(Condition::all(), |acc, p| acc.add(p.to_condition(alias))),
            Self::Or(ps) => ps
                .iter()
                .fold(Condition::any(), |acc, p| acc.add(p.to_condition(alias))),
            Self::Not(p) => p.to_condition(alias).not(),
            Self::Equals(c, v) => leaf(col(c).eq(v.clone())),
            Self::In(c, vs) => leaf(col(c).is_in(vs.iter().cloned())),
            Self::IsNull(c) => leaf(col(c).is_null()),
            Self::Compare(c, op, v) => leaf(match op {
                CompareOp::NotEquals => col(c).ne(v.clone()),
                CompareOp::Gt => col(c).gt(v.clone()),
                CompareOp::Gte => col(c).gte(v.clone()),
                CompareOp::Lt => col(c).lt(v.clone()),
                CompareOp::Lte => col(c).lte(v.clone()),
                CompareOp::Like => match v {
                    Value::String(Some(s)) => col(c).like(s.as_str()),
                    other => col(c).eq(other.clone()),
                },
            }),
        }
    }
}

/// AND-merge two predicates headed for the same alias. Contradictory
/// equalities on one column cannot both hold and are rejected.
pub fn merge_at_alias(
    alias: &str,
    existing: Option<Predicate>,
    incoming: Option<Predicate>,
) -> RefractResult<Option<Predicate>> {
    match (existing, incoming) {
        (None, p) | (p, None) => Ok(p),
        (Some(a), Some(b)) => {
            for (col_a, val_a) in a.required_equalities() {
                for (col_b, val_b) in b.required_equalities() {
                    if col_a == col_b && !same_value(val_a, val_b) {
                        return Err(RefractError::ConflictingAliasPredicate {
                            alias: alias.to_string(),
                            column: col_a.to_string(),
                            detail: format!("{:?} vs {:?}", val_a, val_b),
                        });
                    }
                }
            }
            if a == b {
                return Ok(Some(a));
            }
            Ok(Some(a.and(b)))
        }
    }
}

/// Equal as keys when both sides are key-like, so `Int(1)` matches
/// `BigInt(1)`.
fn same_value(a: &Value, b: &Value) -> bool {
    match (RefractKey::from_db_value(a), RefractKey::from_db_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// A predicate bound to the alias of one plan step.
#[derive(Clone, Debug)]
pub struct BoundPredicate {
    pub step: usize,
    pub alias: String,
    pub predicate: Predicate,
}

impl BoundPredicate {
    pub fn to_condition(&self) -> Condition {
        self.predicate.to_condition(&self.alias)
    }
}

/// Output of the filter pusher: every filter of a query, alias-annotated.
#[derive(Clone, Debug, Default)]
pub struct PredicateTree {
    /// Filter on the root alias (the query's own `where`).
    pub root: Option<BoundPredicate>,
    /// Filters attached to included steps, in plan order.
    pub nested: Vec<BoundPredicate>,
}

impl PredicateTree {
    pub fn for_step(&self, step: usize) -> Option<&BoundPredicate> {
        self.nested.iter().find(|b| b.step == step)
    }

    /// Conjunction of the root filter and the filters of `steps`.
    pub fn combined<'a, I>(&self, steps: I) -> Condition
    where
        I: IntoIterator<Item = &'a usize>,
    {
        let mut cond = Condition::all();
        if let Some(root) = &self.root {
            cond = cond.add(root.to_condition());
        }
        for step in steps {
            if let Some(bound) = self.for_step(*step) {
                cond = cond.add(bound.to_condition());
            }
        }
        cond
    }
}

/// Bind the root `where` and every step predicate of `plan` to their aliases.
pub fn push_filters(
    registry: &SchemaRegistry,
    plan: &JoinPlan,
    root_filter: Option<&Predicate>,
) -> RefractResult<PredicateTree> {
    let root_step = plan.root();
    let root = match root_filter {
        Some(predicate) => {
            predicate.validate(registry.entity_by_id(root_step.entity))?;
            Some(BoundPredicate {
                step: 0,
                alias: root_step.alias.clone(),
                predicate: predicate.clone(),
            })
        }
        None => None,
    };

    let mut nested = Vec::new();
    for step in plan.steps().iter().skip(1) {
        if let Some(predicate) = &step.predicate {
            predicate.validate(registry.entity_by_id(step.entity))?;
            nested.push(BoundPredicate {
                step: step.index,
                alias: step.alias.clone(),
                predicate: predicate.clone(),
            });
        }
    }
    log::debug!(
        "filter: {} root filter(s), {} nested filter(s)",
        usize::from(root.is_some()),
        nested.len()
    );
    Ok(PredicateTree { root, nested })
}
