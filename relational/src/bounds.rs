// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Lower and upper bounds on the value of every relation of a problem.

use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

use crate::{
    syntax::{ExprBinOp, ExprUOp, Expression, Formula, Relation},
    universe::{TupleSet, Universe},
};

/// The bounds of a single relation. The lower bound is always a subset of
/// the upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationBounds {
    /// Tuples the relation must contain
    pub lower: TupleSet,
    /// Tuples the relation may contain
    pub upper: TupleSet,
}

impl RelationBounds {
    /// Whether the relation is fully determined by its bounds.
    pub fn is_exact(&self) -> bool {
        self.lower == self.upper
    }
}

/// An error in constructing bounds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundsError {
    /// A tuple set of the wrong arity was given for a relation
    #[error("relation {relation} has arity {expected} but was bounded by tuples of arity {found}")]
    ArityMismatch {
        /// The relation being bounded
        relation: String,
        /// Its arity
        expected: usize,
        /// The arity of the tuples given
        found: usize,
    },
    /// The lower bound is not contained in the upper bound
    #[error("lower bound of relation {0} is not contained in its upper bound")]
    LowerNotInUpper(String),
    /// A tuple mentions an atom outside the universe
    #[error("bound of relation {0} mentions atoms outside the universe")]
    OutOfUniverse(String),
    /// A symbolic bound mentions something that has no bound itself
    #[error("symbolic bound of relation {0} cannot be approximated: {1}")]
    Symbolic(String, String),
}

/// Bounds for a set of relations over a universe.
#[derive(Debug, Clone)]
pub struct Bounds {
    universe: Arc<Universe>,
    relations: BTreeMap<Relation, RelationBounds>,
    symbolic: BTreeMap<Relation, Expression>,
}

impl Bounds {
    /// Empty bounds over a universe.
    pub fn new(universe: Arc<Universe>) -> Self {
        Self {
            universe,
            relations: BTreeMap::new(),
            symbolic: BTreeMap::new(),
        }
    }

    /// The universe of the bounds.
    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    /// Bound `relation` between `lower` and `upper`, replacing any previous
    /// bound.
    pub fn bound(
        &mut self,
        relation: &Relation,
        lower: TupleSet,
        upper: TupleSet,
    ) -> Result<(), BoundsError> {
        for ts in [&lower, &upper] {
            if ts.arity() != relation.arity {
                return Err(BoundsError::ArityMismatch {
                    relation: relation.name.clone(),
                    expected: relation.arity,
                    found: ts.arity(),
                });
            }
            if !ts.within(self.universe.size()) {
                return Err(BoundsError::OutOfUniverse(relation.name.clone()));
            }
        }
        if !lower.is_subset(&upper) {
            return Err(BoundsError::LowerNotInUpper(relation.name.clone()));
        }
        self.relations
            .insert(relation.clone(), RelationBounds { lower, upper });
        Ok(())
    }

    /// Bound `relation` to exactly `tuples`.
    pub fn bound_exactly(&mut self, relation: &Relation, tuples: TupleSet) -> Result<(), BoundsError> {
        self.bound(relation, tuples.clone(), tuples)
    }

    /// Bound `relation` from above by the value of an expression over other
    /// relations. The concrete upper bound is an over-approximation of the
    /// expression computed from the other relations' upper bounds, and
    /// [`Bounds::resolve`] returns the constraint that makes it precise.
    pub fn bound_within(&mut self, relation: &Relation, expr: Expression) -> Result<(), BoundsError> {
        let upper = self
            .upper_approximation(&expr)
            .map_err(|e| BoundsError::Symbolic(relation.name.clone(), e))?;
        self.bound(relation, TupleSet::empty(relation.arity), upper)?;
        self.symbolic.insert(relation.clone(), expr);
        Ok(())
    }

    /// The bounds of a relation, if it is bounded.
    pub fn get(&self, relation: &Relation) -> Option<&RelationBounds> {
        self.relations.get(relation)
    }

    /// The lower bound of a relation.
    pub fn lower(&self, relation: &Relation) -> Option<&TupleSet> {
        self.relations.get(relation).map(|b| &b.lower)
    }

    /// The upper bound of a relation.
    pub fn upper(&self, relation: &Relation) -> Option<&TupleSet> {
        self.relations.get(relation).map(|b| &b.upper)
    }

    /// The expression a relation was bounded within, if any.
    pub fn symbolic(&self, relation: &Relation) -> Option<&Expression> {
        self.symbolic.get(relation)
    }

    /// Whether the relation is bounded.
    pub fn contains(&self, relation: &Relation) -> bool {
        self.relations.contains_key(relation)
    }

    /// Every bounded relation, in order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.keys()
    }

    /// Every bounded relation with its bounds, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&Relation, &RelationBounds)> {
        self.relations.iter()
    }

    /// The static (non-mutable) relations.
    pub fn static_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.keys().filter(|r| !r.mutable)
    }

    /// The mutable relations.
    pub fn mutable_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.keys().filter(|r| r.mutable)
    }

    /// The implicit constraints imposed by symbolic bounds. Mutable
    /// relations are constrained in every state.
    pub fn resolve(&self) -> Formula {
        Formula::and(self.symbolic.iter().map(|(r, e)| {
            let f = Formula::subset(r, e.clone());
            if r.mutable || e.is_temporal() {
                Formula::always(f)
            } else {
                f
            }
        }))
    }

    /// Remove the bounds of relations that do not satisfy `keep`.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(&Relation) -> bool,
    {
        self.relations.retain(|r, _| keep(r));
        self.symbolic.retain(|r, _| keep(r));
    }

    /// Over-approximate the value of an expression from the upper bounds of
    /// the relations it mentions.
    pub fn upper_approximation(&self, expr: &Expression) -> Result<TupleSet, String> {
        Ok(match expr {
            Expression::Relation(r) => self
                .upper(r)
                .cloned()
                .ok_or_else(|| format!("unbounded relation {}", r.name))?,
            Expression::Var(v) => return Err(format!("free variable {}", v.name)),
            Expression::Constant(ts) => ts.clone(),
            Expression::Univ => self.universe.all(1),
            Expression::Iden => self.universe.iden(),
            Expression::None(arity) => TupleSet::empty(*arity),
            Expression::UnaryOp(op, e) => {
                let e = self.upper_approximation(e)?;
                match op {
                    ExprUOp::Prime => e,
                    ExprUOp::Transpose => e.transpose(),
                    ExprUOp::Closure => e.closure(),
                    ExprUOp::ReflexiveClosure => e.closure().union(&self.universe.iden()),
                }
            }
            Expression::BinOp(op, lhs, rhs) => {
                let lhs = self.upper_approximation(lhs)?;
                let rhs = self.upper_approximation(rhs)?;
                match op {
                    ExprBinOp::Union | ExprBinOp::Override => lhs.union(&rhs),
                    ExprBinOp::Intersection => lhs.intersection(&rhs),
                    // the subtracted part may be smaller than its upper bound
                    ExprBinOp::Difference => lhs,
                    ExprBinOp::Join => lhs.join(&rhs),
                    ExprBinOp::Product => lhs.product(&rhs),
                }
            }
            Expression::Ite(_, then, else_) => self
                .upper_approximation(then)?
                .union(&self.upper_approximation(else_)?),
        })
    }
}
