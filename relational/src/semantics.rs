// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Evaluate formulas and expressions directly on instances and lasso traces.

use itertools::Itertools;
use std::ops::Range;
use thiserror::Error;

use crate::{
    instance::{Instance, TemporalInstance},
    syntax::*,
    universe::TupleSet,
};

/// An assignment maps quantified variables to their values.
pub type Assignment = im::HashMap<Variable, TupleSet>;

/// The largest domain over which a higher-order quantifier is evaluated by
/// enumerating subsets.
const MAX_SUBSET_DOMAIN: usize = 16;

/// An error during evaluation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A relation has no value in the instance
    #[error("relation {0} has no value")]
    MissingRelation(String),
    /// A variable is not bound by any quantifier
    #[error("unbound variable {0}")]
    UnboundVariable(String),
    /// Quantification over traces of values is not evaluated directly
    #[error("cannot evaluate quantification over the mutable variable {0}")]
    MutableVariable(String),
    /// The domain of a higher-order quantifier is too large to enumerate
    #[error("domain of {0} has {1} tuples, too many to enumerate its subsets")]
    DomainTooLarge(String, usize),
}

type Result<T> = std::result::Result<T, EvalError>;

/// Evaluates formulas at positions of the infinite trace a lasso encodes.
struct Evaluator<'a> {
    trace: &'a TemporalInstance,
    /// Past operators of the evaluated formula are periodic from here on.
    horizon: usize,
}

impl<'a> Evaluator<'a> {
    fn new(trace: &'a TemporalInstance, formula: &Formula) -> Self {
        let horizon = trace.prefix_length() + formula.past_depth() * trace.period();
        Self { trace, horizon }
    }

    /// Every future position that has to be inspected from `pos`: truth
    /// values repeat with the trace period after the horizon.
    fn future(&self, pos: usize) -> Range<usize> {
        pos..pos.max(self.horizon) + self.trace.period()
    }

    fn formula(&self, f: &Formula, pos: usize, asgn: &Assignment) -> Result<bool> {
        Ok(match f {
            Formula::Literal(b) => *b,
            Formula::UnaryOp(op, t) => match op {
                UOp::Not => !self.formula(t, pos, asgn)?,
                UOp::After => self.formula(t, pos + 1, asgn)?,
                UOp::Before => pos > 0 && self.formula(t, pos - 1, asgn)?,
                UOp::Always => {
                    for k in self.future(pos) {
                        if !self.formula(t, k, asgn)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                UOp::Eventually => {
                    for k in self.future(pos) {
                        if self.formula(t, k, asgn)? {
                            return Ok(true);
                        }
                    }
                    false
                }
                UOp::Historically => {
                    for k in 0..=pos {
                        if !self.formula(t, k, asgn)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                UOp::Once => {
                    for k in 0..=pos {
                        if self.formula(t, k, asgn)? {
                            return Ok(true);
                        }
                    }
                    false
                }
            },
            Formula::BinOp(op, lhs, rhs) => match op {
                BinOp::Implies => !self.formula(lhs, pos, asgn)? || self.formula(rhs, pos, asgn)?,
                BinOp::Iff => self.formula(lhs, pos, asgn)? == self.formula(rhs, pos, asgn)?,
                BinOp::Until => {
                    for k in self.future(pos) {
                        if self.formula(rhs, k, asgn)? {
                            return Ok(true);
                        }
                        if !self.formula(lhs, k, asgn)? {
                            return Ok(false);
                        }
                    }
                    false
                }
                BinOp::Releases => {
                    for k in self.future(pos) {
                        if !self.formula(rhs, k, asgn)? {
                            return Ok(false);
                        }
                        if self.formula(lhs, k, asgn)? {
                            return Ok(true);
                        }
                    }
                    true
                }
                BinOp::Since => {
                    for k in (0..=pos).rev() {
                        if self.formula(rhs, k, asgn)? {
                            return Ok(true);
                        }
                        if !self.formula(lhs, k, asgn)? {
                            return Ok(false);
                        }
                    }
                    false
                }
                BinOp::Triggered => {
                    for k in (0..=pos).rev() {
                        if !self.formula(rhs, k, asgn)? {
                            return Ok(false);
                        }
                        if self.formula(lhs, k, asgn)? {
                            return Ok(true);
                        }
                    }
                    true
                }
            },
            Formula::NAryOp(NOp::And, ts) => {
                for t in ts {
                    if !self.formula(t, pos, asgn)? {
                        return Ok(false);
                    }
                }
                true
            }
            Formula::NAryOp(NOp::Or, ts) => {
                for t in ts {
                    if self.formula(t, pos, asgn)? {
                        return Ok(true);
                    }
                }
                false
            }
            Formula::Compare(op, lhs, rhs) => {
                let lhs = self.expression(lhs, pos, asgn)?;
                let rhs = self.expression(rhs, pos, asgn)?;
                match op {
                    CompareOp::Subset => lhs.is_subset(&rhs),
                    CompareOp::Equals => lhs == rhs,
                }
            }
            Formula::Multiplicity(m, e) => {
                let n = self.expression(e, pos, asgn)?.len();
                match m {
                    Multiplicity::No => n == 0,
                    Multiplicity::Lone => n <= 1,
                    Multiplicity::One => n == 1,
                    Multiplicity::Some => n >= 1,
                    Multiplicity::Set => true,
                }
            }
            Formula::Quantified {
                quantifier,
                decls,
                body,
            } => self.quantified(*quantifier, decls, body, pos, asgn)?,
        })
    }

    fn quantified(
        &self,
        quantifier: Quantifier,
        decls: &[Decl],
        body: &Formula,
        pos: usize,
        asgn: &Assignment,
    ) -> Result<bool> {
        let Some((decl, rest)) = decls.split_first() else {
            return self.formula(body, pos, asgn);
        };
        if decl.var.mutable {
            return Err(EvalError::MutableVariable(decl.var.name.clone()));
        }
        let domain = self.expression(&decl.expr, pos, asgn)?;
        let values: Vec<TupleSet> = match decl.mult {
            Multiplicity::One => domain.iter().map(|t| TupleSet::singleton(t.clone())).collect(),
            mult => {
                if domain.len() > MAX_SUBSET_DOMAIN {
                    return Err(EvalError::DomainTooLarge(decl.var.name.clone(), domain.len()));
                }
                domain
                    .iter()
                    .powerset()
                    .filter(|s| match mult {
                        Multiplicity::No => s.is_empty(),
                        Multiplicity::Lone => s.len() <= 1,
                        Multiplicity::Some => !s.is_empty(),
                        _ => true,
                    })
                    .map(|s| TupleSet::from_tuples(domain.arity(), s.into_iter().cloned()))
                    .collect()
            }
        };
        for value in values {
            let holds = self.quantified(
                quantifier,
                rest,
                body,
                pos,
                &asgn.update(decl.var.clone(), value),
            )?;
            match quantifier {
                Quantifier::Forall if !holds => return Ok(false),
                Quantifier::Exists if holds => return Ok(true),
                _ => (),
            }
        }
        Ok(quantifier == Quantifier::Forall)
    }

    fn expression(&self, e: &Expression, pos: usize, asgn: &Assignment) -> Result<TupleSet> {
        let universe = self.trace.universe();
        Ok(match e {
            Expression::Relation(r) => self
                .trace
                .state(pos)
                .tuples(r)
                .cloned()
                .ok_or_else(|| EvalError::MissingRelation(r.name.clone()))?,
            Expression::Var(v) => asgn
                .get(v)
                .cloned()
                .ok_or_else(|| EvalError::UnboundVariable(v.name.clone()))?,
            Expression::Constant(ts) => ts.clone(),
            Expression::Univ => universe.all(1),
            Expression::Iden => universe.iden(),
            Expression::None(arity) => TupleSet::empty(*arity),
            Expression::UnaryOp(op, e) => match op {
                ExprUOp::Prime => self.expression(e, pos + 1, asgn)?,
                ExprUOp::Transpose => self.expression(e, pos, asgn)?.transpose(),
                ExprUOp::Closure => self.expression(e, pos, asgn)?.closure(),
                ExprUOp::ReflexiveClosure => self
                    .expression(e, pos, asgn)?
                    .closure()
                    .union(&universe.iden()),
            },
            Expression::BinOp(op, lhs, rhs) => {
                let lhs = self.expression(lhs, pos, asgn)?;
                let rhs = self.expression(rhs, pos, asgn)?;
                match op {
                    ExprBinOp::Union => lhs.union(&rhs),
                    ExprBinOp::Intersection => lhs.intersection(&rhs),
                    ExprBinOp::Difference => lhs.difference(&rhs),
                    ExprBinOp::Override => lhs.override_with(&rhs),
                    ExprBinOp::Join => lhs.join(&rhs),
                    ExprBinOp::Product => lhs.product(&rhs),
                }
            }
            Expression::Ite(cond, then, else_) => {
                if self.formula(cond, pos, asgn)? {
                    self.expression(then, pos, asgn)?
                } else {
                    self.expression(else_, pos, asgn)?
                }
            }
        })
    }
}

impl TemporalInstance {
    /// Whether the formula holds at the start of the trace.
    pub fn evaluate(&self, formula: &Formula) -> Result<bool> {
        Evaluator::new(self, formula).formula(formula, 0, &Assignment::new())
    }

    /// Whether the formula holds at position `pos` of the trace, under an
    /// assignment to its free variables.
    pub fn evaluate_at(&self, formula: &Formula, pos: usize, asgn: &Assignment) -> Result<bool> {
        Evaluator::new(self, formula).formula(formula, pos, asgn)
    }

    /// The value of an expression at position `pos` of the trace.
    pub fn evaluate_expression(
        &self,
        expr: &Expression,
        pos: usize,
        asgn: &Assignment,
    ) -> Result<TupleSet> {
        Evaluator::new(self, &Formula::true_()).expression(expr, pos, asgn)
    }
}

impl Instance {
    /// Whether the formula holds in the trace that repeats this instance
    /// forever.
    pub fn evaluate(&self, formula: &Formula) -> Result<bool> {
        TemporalInstance::constant(self.clone()).evaluate(formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::Universe;
    use std::sync::Arc;

    fn unary(values: &[usize]) -> TupleSet {
        TupleSet::from_tuples(1, values.iter().map(|&a| vec![a]))
    }

    fn trace(p: &[&[usize]], loop_state: usize) -> (TemporalInstance, Relation) {
        let u = Arc::new(Universe::new(["A0", "A1", "A2"]));
        let rel = Relation::variable("p", 1);
        let states = p
            .iter()
            .map(|v| {
                let mut i = Instance::new(u.clone());
                i.add(rel.clone(), unary(v));
                i
            })
            .collect();
        (TemporalInstance::new(states, loop_state).unwrap(), rel)
    }

    #[test]
    fn test_future_operators() {
        // p: {} {0} {0,1} {1} looping to 2
        let (t, p) = trace(&[&[], &[0], &[0, 1], &[1]], 2);
        assert_eq!(t.evaluate(&Formula::eventually(Formula::some(&p))), Ok(true));
        assert_eq!(t.evaluate(&Formula::always(Formula::some(&p))), Ok(false));
        assert_eq!(
            t.evaluate(&Formula::after(Formula::always(Formula::some(&p)))),
            Ok(true)
        );
        assert_eq!(
            t.evaluate(&Formula::until(Formula::no(&p), Formula::some(&p))),
            Ok(true)
        );
        let a1 = Expression::Constant(unary(&[1]));
        // always eventually A1 in p, since the loop visits {0,1} and {1}
        assert_eq!(
            t.evaluate(&Formula::always(Formula::eventually(Formula::subset(
                a1.clone(),
                &p
            )))),
            Ok(true)
        );
        assert_eq!(
            t.evaluate(&Formula::eventually(Formula::always(Formula::subset(a1, &p)))),
            Ok(true)
        );
    }

    #[test]
    fn test_past_operators() {
        let (t, p) = trace(&[&[], &[0], &[0, 1], &[1]], 2);
        let a0 = Expression::Constant(unary(&[0]));
        // eventually (p has A0 before, and not now)
        let f = Formula::eventually(Formula::and([
            Formula::before(Formula::subset(a0.clone(), &p)),
            Formula::not(Formula::subset(a0.clone(), &p)),
        ]));
        assert_eq!(t.evaluate(&f), Ok(true));
        assert_eq!(
            t.evaluate(&Formula::always(Formula::once(Formula::no(&p)))),
            Ok(true)
        );
        assert_eq!(
            t.evaluate(&Formula::always(Formula::historically(Formula::no(&p)))),
            Ok(false)
        );
        assert_eq!(
            t.evaluate(&Formula::always(Formula::since(
                Formula::some(&p),
                Formula::no(&p)
            ))),
            Ok(true)
        );
        assert_eq!(
            t.evaluate(&Formula::eventually(Formula::triggered(
                Formula::false_(),
                Formula::some(&p)
            ))),
            Ok(false)
        );
    }

    #[test]
    fn test_prime_and_quantifiers() {
        let (t, p) = trace(&[&[0], &[0, 1]], 1);
        assert_eq!(
            t.evaluate(&Formula::subset(&p, Expression::prime(&p))),
            Ok(true)
        );
        let x = Variable::new("x", 1);
        let all_in_next = Formula::forall(
            [Decl::one(x.clone(), Expression::from(&p))],
            Formula::subset(&x, Expression::prime(&p)),
        );
        assert_eq!(t.evaluate(&Formula::always(all_in_next)), Ok(true));
        let big = Variable::new("X", 1);
        let ho = Formula::exists(
            [Decl::new(big.clone(), Multiplicity::Set, Expression::Univ)],
            Formula::forall(
                [Decl::one(x.clone(), Expression::Univ)],
                Formula::subset(&x, &big),
            ),
        );
        assert_eq!(t.evaluate(&ho), Ok(true));
        let unbound = Formula::some(&x);
        assert_eq!(
            t.evaluate(&unbound),
            Err(EvalError::UnboundVariable("x".to_string()))
        );
    }
}
