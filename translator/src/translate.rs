// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Translate a non-temporal, first-order relational formula and its bounds
//! into a SAT problem, and interpret satisfying assignments back as
//! instances.

use fxhash::FxHashMap;
use std::{cell::RefCell, collections::BTreeMap};
use thiserror::Error;

use relational::{
    bounds::Bounds,
    instance::Instance,
    syntax::*,
    universe::{Tuple, TupleSet},
};

use crate::{
    circuit::{Bool, Tseytin},
    matrix::Matrix,
    sat::{Interrupt, SatError, SatFactory, SatSolver},
};

/// An error while translating a formula
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// The formula mentions a relation without bounds
    #[error("relation {0} has no bounds")]
    Unbounded(String),
    /// A variable is used outside the scope of its quantifier
    #[error("unbound variable {0}")]
    UnboundVariable(String),
    /// Quantification over sets (or traces) of tuples
    #[error("the declaration of {0} is higher-order and cannot be translated directly")]
    HigherOrder(String),
    /// A temporal operator reached the translator without expansion
    #[error("temporal formula cannot be translated directly: {0}")]
    Temporal(String),
    /// Operands of incompatible arities
    #[error("arity mismatch in {0}")]
    Arity(String),
    /// The SAT solver failed
    #[error(transparent)]
    Sat(#[from] SatError),
}

type Result<T> = std::result::Result<T, TranslationError>;

/// Values of the quantified variables in scope: each is a single tuple,
/// represented as a constant matrix.
type Env = im::HashMap<Variable, Matrix>;

/// Circuits of closed formulas already translated, so that repeated
/// subformulas share their gates.
type Memo = RefCell<FxHashMap<Formula, Bool>>;

/// Sizes of a translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationStats {
    /// Variables standing for a relation tuple
    pub primary_variables: usize,
    /// All variables, including gate outputs
    pub variables: usize,
    /// Clauses sent to the solver
    pub clauses: usize,
    /// Number of calls to the SAT solver
    pub sat_calls: usize,
}

/// A formula translated into a SAT solver, together with the mapping from
/// relation tuples to primary variables.
pub struct Translation {
    bounds: Bounds,
    primaries: BTreeMap<Relation, BTreeMap<Tuple, i32>>,
    num_primary: i32,
    prover: bool,
    solver: Box<dyn SatSolver>,
    tseytin: Tseytin,
    memo: Memo,
    /// Translated conjuncts, with their activation literal in prover mode
    roots: Vec<(Formula, Option<i32>)>,
    /// Conjuncts that are false under the bounds alone
    false_roots: Vec<Formula>,
    /// Something asserted so far is false under the bounds alone
    contradiction: bool,
    /// Some non-constant circuit has been asserted
    constrained: bool,
    sat_calls: usize,
}

/// Translate `formula` under `bounds` with a solver from `factory`.
pub fn translate(
    formula: &Formula,
    bounds: &Bounds,
    factory: &SatFactory,
    interrupt: &Interrupt,
) -> Result<Translation> {
    let mut translation = Translation::new(bounds.clone(), factory, interrupt);
    translation.extend(formula)?;
    let stats = translation.statistics();
    log::debug!(
        "translated {} conjuncts: {} primary variables, {} variables, {} clauses{}",
        translation.roots.len() + translation.false_roots.len(),
        stats.primary_variables,
        stats.variables,
        stats.clauses,
        if translation.is_trivial() { " (trivial)" } else { "" },
    );
    Ok(translation)
}

impl Translation {
    /// An empty translation: every relation is free within its bounds.
    pub fn new(bounds: Bounds, factory: &SatFactory, interrupt: &Interrupt) -> Self {
        let mut primaries = BTreeMap::new();
        let mut next = 1;
        for (r, b) in bounds.iter() {
            let vars: BTreeMap<Tuple, i32> = b
                .upper
                .difference(&b.lower)
                .iter()
                .map(|t| {
                    next += 1;
                    (t.clone(), next - 1)
                })
                .collect();
            primaries.insert(r.clone(), vars);
        }
        let num_primary = next - 1;
        Self {
            bounds,
            primaries,
            num_primary,
            prover: factory.prover(),
            solver: factory.create(interrupt),
            tseytin: Tseytin::new(num_primary),
            memo: Memo::default(),
            roots: vec![],
            false_roots: vec![],
            contradiction: false,
            constrained: false,
            sat_calls: 0,
        }
    }

    /// The bounds this translation was built from.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The circuit deciding whether `tuple` is in `relation`: a constant
    /// for tuples fixed by the bounds, a primary variable otherwise.
    pub fn variable(&self, relation: &Relation, tuple: &[usize]) -> Bool {
        if let Some(v) = self.primaries.get(relation).and_then(|vars| vars.get(tuple)) {
            return Bool::var(*v);
        }
        let in_lower = self
            .bounds
            .lower(relation)
            .map_or(false, |ts| ts.contains(tuple));
        Bool::Const(in_lower)
    }

    /// The primary variables of a relation, by tuple.
    pub fn primary_variables(&self, relation: &Relation) -> impl Iterator<Item = (&Tuple, i32)> {
        self.primaries
            .get(relation)
            .into_iter()
            .flat_map(|vars| vars.iter().map(|(t, v)| (t, *v)))
    }

    /// Conjoin `formula` to the translated problem. Each top-level conjunct
    /// becomes a separate root.
    pub fn extend(&mut self, formula: &Formula) -> Result<()> {
        for conjunct in formula.conjuncts() {
            self.assert_labeled(&conjunct, conjunct.clone())?;
        }
        Ok(())
    }

    /// Conjoin `formula` as a single root that is reported as `label` in
    /// unsatisfiable cores.
    pub fn assert_labeled(&mut self, formula: &Formula, label: Formula) -> Result<()> {
        let circuits = Circuits::new(&self.bounds, &self.primaries, &self.memo);
        let b = circuits.formula(formula, &Env::new())?;
        match b.constant() {
            Some(true) => self.roots.push((label, None)),
            Some(false) => {
                self.contradiction = true;
                self.false_roots.push(label);
            }
            None if self.prover => {
                self.constrained = true;
                let activation = self.tseytin.fresh();
                let lit = self.tseytin.literal(&b, self.solver.as_mut());
                self.solver.add_clause(&[-activation, lit]);
                self.roots.push((label, Some(activation)));
            }
            None => {
                self.constrained = true;
                self.tseytin.assert(&b, self.solver.as_mut());
                self.roots.push((label, None));
            }
        }
        Ok(())
    }

    /// Conjoin `formula` without recording it as a root, so it never shows
    /// up in a core.
    pub fn assert_formula(&mut self, formula: &Formula) -> Result<()> {
        let circuits = Circuits::new(&self.bounds, &self.primaries, &self.memo);
        let b = circuits.formula(formula, &Env::new())?;
        self.assert_bool(&b);
        Ok(())
    }

    /// Constrain a circuit over the primary variables to hold, without
    /// recording it as a conjunct of the problem. Used for blocking.
    pub fn assert_bool(&mut self, b: &Bool) {
        match b.constant() {
            Some(true) => (),
            Some(false) => self.contradiction = true,
            None => {
                self.constrained = true;
                self.tseytin.assert(b, self.solver.as_mut());
            }
        }
    }

    /// Whether the problem is decided by the bounds alone: either some
    /// constraint is false under the bounds, or nothing left to solve.
    pub fn is_trivial(&self) -> bool {
        self.contradiction || !self.constrained
    }

    /// Whether the problem is satisfiable. Trivial problems are decided
    /// without calling the solver.
    pub fn solve(&mut self) -> Result<bool> {
        if self.contradiction {
            return Ok(false);
        }
        if !self.constrained {
            return Ok(true);
        }
        let assumptions: Vec<i32> = self.roots.iter().filter_map(|(_, a)| *a).collect();
        self.sat_calls += 1;
        Ok(self.solver.solve(&assumptions)?)
    }

    /// The instance of the last satisfying assignment: every relation holds
    /// its lower bound plus the tuples whose primary variable is true.
    pub fn instance(&self) -> Instance {
        let mut instance = Instance::new(self.bounds.universe().clone());
        for (r, b) in self.bounds.iter() {
            let mut tuples = b.lower.clone();
            if self.constrained {
                for (t, v) in self.primary_variables(r) {
                    if self.solver.value(v) {
                        tuples.insert(t.clone());
                    }
                }
            }
            instance.add(r.clone(), tuples);
        }
        instance
    }

    /// After an unsatisfiable result, the conjuncts responsible for it, if
    /// known. Cores are available for conjuncts false under the bounds and
    /// from a proof-logging solver.
    pub fn core(&self) -> Option<Vec<Formula>> {
        if !self.false_roots.is_empty() {
            return Some(self.false_roots.clone());
        }
        if !self.prover || self.contradiction {
            return None;
        }
        Some(
            self.roots
                .iter()
                .filter(|(_, a)| a.map_or(false, |a| self.solver.failed(a)))
                .map(|(f, _)| f.clone())
                .collect(),
        )
    }

    /// Sizes of the translation so far.
    pub fn statistics(&self) -> TranslationStats {
        TranslationStats {
            primary_variables: self.num_primary as usize,
            variables: self.tseytin.num_variables() as usize,
            clauses: self.solver.num_clauses(),
            sat_calls: self.sat_calls,
        }
    }
}

/// Builds the circuits of formulas and the matrices of expressions.
struct Circuits<'a> {
    bounds: &'a Bounds,
    primaries: &'a BTreeMap<Relation, BTreeMap<Tuple, i32>>,
    memo: &'a Memo,
}

impl<'a> Circuits<'a> {
    fn new(
        bounds: &'a Bounds,
        primaries: &'a BTreeMap<Relation, BTreeMap<Tuple, i32>>,
        memo: &'a Memo,
    ) -> Self {
        Self {
            bounds,
            primaries,
            memo,
        }
    }

    fn relation(&self, r: &Relation) -> Result<Matrix> {
        let b = self
            .bounds
            .get(r)
            .ok_or_else(|| TranslationError::Unbounded(r.name.clone()))?;
        let mut m = Matrix::constant(&b.lower);
        if let Some(vars) = self.primaries.get(r) {
            for (t, v) in vars {
                m.insert(t.clone(), Bool::var(*v));
            }
        }
        Ok(m)
    }

    fn expression(&self, e: &Expression, env: &Env) -> Result<Matrix> {
        let universe = self.bounds.universe();
        Ok(match e {
            Expression::Relation(r) => self.relation(r)?,
            Expression::Var(v) => env
                .get(v)
                .cloned()
                .ok_or_else(|| TranslationError::UnboundVariable(v.name.clone()))?,
            Expression::Constant(ts) => Matrix::constant(ts),
            Expression::Univ => Matrix::constant(&universe.all(1)),
            Expression::Iden => Matrix::constant(&universe.iden()),
            Expression::None(arity) => Matrix::empty(*arity),
            Expression::UnaryOp(ExprUOp::Prime, _) => {
                return Err(TranslationError::Temporal(relational::printer::expression(e)))
            }
            Expression::UnaryOp(op, arg) => {
                let m = self.expression(arg, env)?;
                if m.arity() != 2 {
                    return Err(TranslationError::Arity(relational::printer::expression(e)));
                }
                match op {
                    ExprUOp::Transpose => m.transpose(),
                    ExprUOp::Closure => m.closure(universe.size()),
                    _ => m
                        .closure(universe.size())
                        .union(&Matrix::constant(&universe.iden())),
                }
            }
            Expression::BinOp(op, lhs, rhs) => {
                let l = self.expression(lhs, env)?;
                let r = self.expression(rhs, env)?;
                let compatible = match op {
                    ExprBinOp::Join => l.arity() + r.arity() > 2,
                    ExprBinOp::Product => true,
                    _ => l.arity() == r.arity(),
                };
                if !compatible {
                    return Err(TranslationError::Arity(relational::printer::expression(e)));
                }
                match op {
                    ExprBinOp::Union => l.union(&r),
                    ExprBinOp::Intersection => l.intersection(&r),
                    ExprBinOp::Difference => l.difference(&r),
                    ExprBinOp::Override => l.override_with(&r),
                    ExprBinOp::Join => l.join(&r),
                    ExprBinOp::Product => l.product(&r),
                }
            }
            Expression::Ite(cond, then, else_) => {
                let c = self.formula(cond, env)?;
                let t = self.expression(then, env)?;
                let f = self.expression(else_, env)?;
                if t.arity() != f.arity() {
                    return Err(TranslationError::Arity(relational::printer::expression(e)));
                }
                Matrix::ite(&c, &t, &f)
            }
        })
    }

    fn formula(&self, f: &Formula, env: &Env) -> Result<Bool> {
        // unrolled temporal operators repeat the same closed subformulas
        let shared = env.is_empty()
            && matches!(
                f,
                Formula::NAryOp(_, _)
                    | Formula::Quantified { .. }
                    | Formula::Compare(_, _, _)
                    | Formula::Multiplicity(_, _)
            );
        if shared {
            if let Some(b) = self.memo.borrow().get(f) {
                return Ok(b.clone());
            }
        }
        let b = self.circuit(f, env)?;
        if shared {
            self.memo.borrow_mut().insert(f.clone(), b.clone());
        }
        Ok(b)
    }

    fn circuit(&self, f: &Formula, env: &Env) -> Result<Bool> {
        let temporal = || TranslationError::Temporal(relational::printer::formula(f));
        Ok(match f {
            Formula::Literal(b) => Bool::Const(*b),
            Formula::UnaryOp(UOp::Not, arg) => self.formula(arg, env)?.not(),
            Formula::UnaryOp(_, _) => return Err(temporal()),
            Formula::BinOp(op, lhs, rhs) => {
                if op.is_temporal() {
                    return Err(temporal());
                }
                let l = self.formula(lhs, env)?;
                let r = self.formula(rhs, env)?;
                match op {
                    BinOp::Implies => Bool::implies(&l, &r),
                    _ => Bool::iff(&l, &r),
                }
            }
            Formula::NAryOp(op, args) => {
                let args = args
                    .iter()
                    .map(|a| self.formula(a, env))
                    .collect::<Result<Vec<_>>>()?;
                match op {
                    NOp::And => Bool::and(args),
                    NOp::Or => Bool::or(args),
                }
            }
            Formula::Compare(op, lhs, rhs) => {
                let l = self.expression(lhs, env)?;
                let r = self.expression(rhs, env)?;
                if l.arity() != r.arity() {
                    return Err(TranslationError::Arity(relational::printer::formula(f)));
                }
                match op {
                    CompareOp::Subset => l.subset(&r),
                    CompareOp::Equals => l.equals(&r),
                }
            }
            Formula::Multiplicity(mult, e) => {
                let m = self.expression(e, env)?;
                match mult {
                    Multiplicity::No => m.no(),
                    Multiplicity::Lone => m.lone(),
                    Multiplicity::One => m.one(),
                    Multiplicity::Some => m.some(),
                    Multiplicity::Set => Bool::Const(true),
                }
            }
            Formula::Quantified {
                quantifier,
                decls,
                body,
            } => self.quantified(*quantifier, decls, body, env)?,
        })
    }

    /// Expand a quantifier over the tuples its first declaration may range
    /// over; later declarations are expanded recursively.
    fn quantified(
        &self,
        quantifier: Quantifier,
        decls: &[Decl],
        body: &Formula,
        env: &Env,
    ) -> Result<Bool> {
        let Some((decl, rest)) = decls.split_first() else {
            return self.formula(body, env);
        };
        if decl.is_higher_order() {
            return Err(TranslationError::HigherOrder(decl.var.name.clone()));
        }
        let domain = self.expression(&decl.expr, env)?;
        let mut instances = vec![];
        for (t, member) in domain.iter() {
            let value = Matrix::constant(&TupleSet::singleton(t.clone()));
            let env = env.update(decl.var.clone(), value);
            let b = self.quantified(quantifier, rest, body, &env)?;
            instances.push(match quantifier {
                Quantifier::Forall => Bool::implies(member, &b),
                Quantifier::Exists => Bool::and([member.clone(), b]),
            });
        }
        Ok(match quantifier {
            Quantifier::Forall => Bool::and(instances),
            Quantifier::Exists => Bool::or(instances),
        })
    }
}
