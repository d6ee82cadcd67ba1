// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Expansion of temporal problems onto a lasso of fixed length.
//!
//! A trace of length `L` has states `0..L` and loops back from state `L-1`
//! to one of the states `0..L`. Every mutable relation `r` gets a static
//! copy `r@i` per state, time atoms `$T0 ... $T{L-1}` are appended to the
//! universe, and the unary relation `$loop` holds exactly the time atom of
//! the loop state. A temporal formula becomes, for each admissible loop
//! state `l`, the implication `{$Tl} in $loop => f@0` where `f@0` is the
//! formula unrolled from position 0 of the lasso that loops to `l`.
//!
//! Positions past the prefix are folded back into a window of the infinite
//! trace: with past depth `d` and period `p = L - l`, truth values of every
//! subformula repeat with period `p` from position `L + d*p` on.

use std::{cell::RefCell, ops::Range};

use fxhash::FxHashMap;
use relational::{
    bounds::{Bounds, BoundsError},
    instance::{Instance, InstanceError, TemporalInstance},
    syntax::*,
    universe::TupleSet,
};

/// Values of free variables, one per state of the expanded trace.
pub type Bindings = im::HashMap<Variable, Vec<TupleSet>>;

/// Bounds of a problem expanded to a fixed trace length.
#[derive(Debug, Clone)]
pub struct ExpandedBounds {
    bounds: Bounds,
    original: Bounds,
    length: usize,
    past_depth: usize,
    loop_relation: Relation,
    loops: Vec<usize>,
    first_time_atom: usize,
}

/// Expand `bounds` to traces of `length` states. With a `candidate`, every
/// relation the candidate has a value for is bound exactly to that value in
/// each state, and only loop states that encode the candidate's trace are
/// admissible.
pub fn expand_bounds(
    bounds: &Bounds,
    length: usize,
    past_depth: usize,
    candidate: Option<&TemporalInstance>,
) -> Result<ExpandedBounds, BoundsError> {
    let first_time_atom = bounds.universe().size();
    let universe = bounds
        .universe()
        .extend((0..length).map(|i| format!("$T{i}")));
    let mut expanded = Bounds::new(universe.into());

    let fixed = |r: &Relation, state: usize| -> Option<TupleSet> {
        candidate.and_then(|c| c.state(state).tuples(r).cloned())
    };
    for (r, b) in bounds.iter() {
        let states = if r.mutable { 0..length } else { 0..1 };
        for i in states {
            let copy = if r.mutable {
                state_relation(r, i)
            } else {
                r.clone()
            };
            match fixed(r, i) {
                Some(value) => expanded.bound_exactly(&copy, value)?,
                None => expanded.bound(&copy, b.lower.clone(), b.upper.clone())?,
            }
        }
    }

    let loops = match candidate {
        Some(c) => c.loops_at(length),
        None => (0..length).collect(),
    };
    let loop_relation = Relation::unary("$loop");
    let loop_atoms = TupleSet::from_tuples(1, loops.iter().map(|l| vec![first_time_atom + l]));
    if loops.len() == 1 {
        expanded.bound_exactly(&loop_relation, loop_atoms)?;
    } else {
        expanded.bound(&loop_relation, TupleSet::empty(1), loop_atoms)?;
    }

    Ok(ExpandedBounds {
        bounds: expanded,
        original: bounds.clone(),
        length,
        past_depth,
        loop_relation,
        loops,
        first_time_atom,
    })
}

fn state_relation(r: &Relation, state: usize) -> Relation {
    Relation::new(&format!("{}@{state}", r.name), r.arity, false)
}

impl ExpandedBounds {
    /// The expanded bounds, over the universe extended with time atoms.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The bounds that were expanded.
    pub fn original(&self) -> &Bounds {
        &self.original
    }

    /// The number of states.
    pub fn length(&self) -> usize {
        self.length
    }

    /// The past depth the bounds were expanded for.
    pub fn past_depth(&self) -> usize {
        self.past_depth
    }

    /// The admissible loop states.
    pub fn loops(&self) -> &[usize] {
        &self.loops
    }

    /// The relation holding the time atom of the loop state.
    pub fn loop_relation(&self) -> &Relation {
        &self.loop_relation
    }

    /// The time atom of a state.
    pub fn time_atom(&self, state: usize) -> usize {
        self.first_time_atom + state
    }

    /// The relation standing for `r` in a state; static relations stand for
    /// themselves.
    pub fn state_relation(&self, r: &Relation, state: usize) -> Relation {
        if r.mutable {
            state_relation(r, state)
        } else {
            r.clone()
        }
    }

    /// `{$Tl} in $loop`
    pub fn loop_formula(&self, loop_state: usize) -> Formula {
        Formula::subset(
            TupleSet::singleton(vec![self.time_atom(loop_state)]),
            &self.loop_relation,
        )
    }

    /// The trace loops back to exactly one state.
    pub fn loop_constraint(&self) -> Formula {
        Formula::one(&self.loop_relation)
    }

    /// Read a trace of the original relations off an instance of the
    /// expanded bounds.
    pub fn interpret(&self, instance: &Instance) -> Result<TemporalInstance, InstanceError> {
        let universe = self.original.universe();
        let states = (0..self.length)
            .map(|i| {
                let mut state = Instance::new(universe.clone());
                for r in self.original.relations() {
                    let copy = self.state_relation(r, i);
                    if let Some(ts) = instance.tuples(&copy) {
                        state.add(r.clone(), ts.clone());
                    }
                }
                state
            })
            .collect();
        // an out-of-range loop state makes the constructor fail
        let loop_state = (0..self.length)
            .find(|&l| instance.contains(&self.loop_relation, &[self.time_atom(l)]))
            .unwrap_or(self.length);
        TemporalInstance::new(states, loop_state)
    }
}

/// Expand a temporal formula over every admissible loop state.
pub fn expand_formula(formula: &Formula, expanded: &ExpandedBounds, past_depth: usize) -> Formula {
    expand_with(formula, expanded, past_depth, &Bindings::new(), expanded.loops())
}

/// Expand a temporal formula whose free variables have per-state values,
/// for the given loop states only.
pub fn expand_with(
    formula: &Formula,
    expanded: &ExpandedBounds,
    past_depth: usize,
    bindings: &Bindings,
    loops: &[usize],
) -> Formula {
    Formula::and(loops.iter().map(|&l| {
        let lasso = Lasso::new(expanded, bindings.clone(), l, past_depth);
        Formula::implies(expanded.loop_formula(l), lasso.formula(formula, 0))
    }))
}

/// Unrolls formulas on a lasso with a fixed loop state.
#[derive(Clone)]
struct Lasso<'a> {
    expanded: &'a ExpandedBounds,
    bindings: Bindings,
    loop_state: usize,
    horizon: usize,
    /// Temporal subformulas already unrolled, by address and position
    memo: RefCell<FxHashMap<(*const Formula, usize), Formula>>,
}

impl<'a> Lasso<'a> {
    fn new(
        expanded: &'a ExpandedBounds,
        bindings: Bindings,
        loop_state: usize,
        past_depth: usize,
    ) -> Self {
        let period = expanded.length - loop_state;
        Self {
            expanded,
            bindings,
            loop_state,
            horizon: expanded.length + past_depth.max(1) * period,
            memo: RefCell::default(),
        }
    }

    fn period(&self) -> usize {
        self.expanded.length - self.loop_state
    }

    /// The state at a position of the infinite trace.
    fn state(&self, pos: usize) -> usize {
        if pos < self.expanded.length {
            pos
        } else {
            self.loop_state + (pos - self.loop_state) % self.period()
        }
    }

    /// A position with the same truth values as `pos`, below the horizon
    /// plus one period.
    fn normalize(&self, pos: usize) -> usize {
        if pos < self.horizon {
            pos
        } else {
            self.horizon + (pos - self.horizon) % self.period()
        }
    }

    /// The positions to inspect for future operators at `pos`.
    fn future(&self, pos: usize) -> impl Iterator<Item = usize> + '_ {
        let range: Range<usize> = pos..pos.max(self.horizon) + self.period();
        range.map(|k| self.normalize(k))
    }

    fn without(&self, decls: &[Decl]) -> Self {
        let mut inner = self.clone();
        for d in decls {
            inner.bindings.remove(&d.var);
        }
        inner.memo = RefCell::default();
        inner
    }

    fn expression(&self, e: &Expression, pos: usize) -> Expression {
        let universe = self.expanded.original.universe();
        match e {
            Expression::Relation(r) => {
                Expression::Relation(self.expanded.state_relation(r, self.state(pos)))
            }
            Expression::Var(v) => match self.bindings.get(v).and_then(|vs| vs.get(self.state(pos))) {
                Some(value) => Expression::Constant(value.clone()),
                None => e.clone(),
            },
            Expression::Univ => Expression::Constant(universe.all(1)),
            Expression::Iden => Expression::Constant(universe.iden()),
            Expression::Constant(_) | Expression::None(_) => e.clone(),
            Expression::UnaryOp(ExprUOp::Prime, arg) => self.expression(arg, pos + 1),
            Expression::UnaryOp(op, arg) => Expression::unary(*op, self.expression(arg, pos)),
            Expression::BinOp(op, lhs, rhs) => {
                Expression::binary(*op, self.expression(lhs, pos), self.expression(rhs, pos))
            }
            Expression::Ite(cond, then, else_) => Expression::ite(
                self.formula(cond, pos),
                self.expression(then, pos),
                self.expression(else_, pos),
            ),
        }
    }

    fn formula(&self, f: &Formula, pos: usize) -> Formula {
        let temporal = match f {
            Formula::UnaryOp(op, _) => op.is_temporal(),
            Formula::BinOp(op, _, _) => op.is_temporal(),
            _ => false,
        };
        if !temporal {
            return self.unroll(f, pos);
        }
        let key = (f as *const Formula, pos);
        if let Some(unrolled) = self.memo.borrow().get(&key) {
            return unrolled.clone();
        }
        let unrolled = self.unroll(f, pos);
        self.memo.borrow_mut().insert(key, unrolled.clone());
        unrolled
    }

    fn unroll(&self, f: &Formula, pos: usize) -> Formula {
        match f {
            Formula::Literal(_) => f.clone(),
            Formula::UnaryOp(op, t) => match op {
                UOp::Not => Formula::not(self.formula(t, pos)),
                UOp::Always => Formula::and(self.future(pos).map(|k| self.formula(t, k))),
                UOp::Eventually => Formula::or(self.future(pos).map(|k| self.formula(t, k))),
                UOp::After => self.formula(t, self.normalize(pos + 1)),
                UOp::Historically => Formula::and((0..=pos).map(|k| self.formula(t, k))),
                UOp::Once => Formula::or((0..=pos).map(|k| self.formula(t, k))),
                UOp::Before => {
                    if pos == 0 {
                        Formula::false_()
                    } else {
                        self.formula(t, pos - 1)
                    }
                }
            },
            Formula::BinOp(op, lhs, rhs) => match op {
                BinOp::Implies => Formula::implies(self.formula(lhs, pos), self.formula(rhs, pos)),
                BinOp::Iff => Formula::iff(self.formula(lhs, pos), self.formula(rhs, pos)),
                BinOp::Until | BinOp::Releases => {
                    self.future_binary(*op == BinOp::Until, lhs, rhs, self.future(pos))
                }
                BinOp::Since | BinOp::Triggered => {
                    self.future_binary(*op == BinOp::Since, lhs, rhs, (0..=pos).rev())
                }
            },
            Formula::NAryOp(op, ts) => {
                let ts = ts.iter().map(|t| self.formula(t, pos));
                match op {
                    NOp::And => Formula::and(ts),
                    NOp::Or => Formula::or(ts),
                }
            }
            Formula::Compare(op, lhs, rhs) => {
                Formula::Compare(*op, self.expression(lhs, pos), self.expression(rhs, pos))
            }
            Formula::Multiplicity(m, e) => Formula::multiplicity(*m, self.expression(e, pos)),
            Formula::Quantified {
                quantifier,
                decls,
                body,
            } => {
                let inner = self.without(decls);
                let decls: Vec<Decl> = decls
                    .iter()
                    .map(|d| Decl::new(d.var.clone(), d.mult, inner.expression(&d.expr, pos)))
                    .collect();
                Formula::quantify(*quantifier, decls, inner.formula(body, pos))
            }
        }
    }

    /// `lhs until rhs` (or `lhs since rhs` when walking backwards) when
    /// `strong`, otherwise the dual `releases` (or `triggered`): `rhs` at
    /// some position with `lhs` everywhere before it, or `rhs` at every
    /// position unless `lhs` held before it.
    fn future_binary<I>(&self, strong: bool, lhs: &Formula, rhs: &Formula, positions: I) -> Formula
    where
        I: Iterator<Item = usize>,
    {
        let mut before = vec![];
        let mut cases = vec![];
        for k in positions {
            let r = self.formula(rhs, k);
            if strong {
                cases.push(Formula::and(before.iter().cloned().chain([r])));
            } else {
                cases.push(Formula::or(before.iter().cloned().chain([r])));
            }
            before.push(self.formula(lhs, k));
        }
        if strong {
            Formula::or(cases)
        } else {
            Formula::and(cases)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relational::parser::{parse_formula, parse_problem};
    use std::collections::BTreeMap;

    const PROBLEM: &str = "universe A0 A1
        static s: 1 <= {A0, A1}
        var p: 1 <= {A0, A1}
        var q: 1 <= {A0, A1}";

    fn unary(atoms: &[usize]) -> TupleSet {
        TupleSet::from_tuples(1, atoms.iter().map(|&a| vec![a]))
    }

    /// p and q per state, s fixed to {A0}
    fn trace(bounds: &Bounds, states: &[(&[usize], &[usize])], loop_state: usize) -> TemporalInstance {
        let [p, q, s] = ["p", "q", "s"].map(|n| {
            bounds
                .relations()
                .find(|r| r.name == n)
                .cloned()
                .unwrap()
        });
        let states = states
            .iter()
            .map(|(pv, qv)| {
                let mut i = Instance::new(bounds.universe().clone());
                i.add(p.clone(), unary(pv));
                i.add(q.clone(), unary(qv));
                i.add(s.clone(), unary(&[0]));
                i
            })
            .collect();
        TemporalInstance::new(states, loop_state).unwrap()
    }

    /// The instance of the expanded bounds that encodes `trace`.
    fn encode(expanded: &ExpandedBounds, trace: &TemporalInstance) -> Instance {
        let mut instance = Instance::new(expanded.bounds().universe().clone());
        for r in expanded.original().relations() {
            for i in 0..expanded.length() {
                let value = trace.state(i).tuples(r).cloned().unwrap();
                instance.add(expanded.state_relation(r, i), value);
            }
        }
        instance.add(
            expanded.loop_relation().clone(),
            TupleSet::singleton(vec![expanded.time_atom(trace.loop_state())]),
        );
        instance
    }

    fn formula(bounds: &Bounds, text: &str) -> Formula {
        let relations: BTreeMap<String, Relation> =
            bounds.relations().map(|r| (r.name.clone(), r.clone())).collect();
        parse_formula(&relations, Some(bounds.universe().as_ref()), text).unwrap()
    }

    #[test]
    fn test_expansion_agrees_with_evaluation() {
        let bounds = parse_problem(PROBLEM).unwrap().bounds;
        let traces = [
            trace(&bounds, &[(&[], &[0]), (&[0], &[]), (&[1], &[1])], 1),
            trace(&bounds, &[(&[0], &[]), (&[0, 1], &[1])], 0),
            trace(&bounds, &[(&[], &[]), (&[0], &[0]), (&[], &[1]), (&[1], &[])], 2),
        ];
        let formulas = [
            "always (some p => no q)",
            "eventually p = {A0, A1}",
            "always eventually some q",
            "eventually always no p",
            "no p until some q",
            "some q releases lone p",
            "after after (p' in q)",
            "always (some q => once some p)",
            "eventually historically lone p",
            "always (some p => (no q since some p))",
            "eventually (some p && before no p)",
            "always (some q triggered lone p)",
            "always (once (some p && before before no q))",
            "all x: s | eventually x in p",
            "some x: univ | always x !in q",
            "always (if some p then q else none) in q",
            "always eventually always eventually some p",
            "eventually (some q until (always lone p))",
        ];
        for t in &traces {
            let expanded = expand_bounds(&bounds, t.prefix_length(), 3, None).unwrap();
            let instance = encode(&expanded, t);
            for text in formulas {
                let f = formula(&bounds, text);
                let e = expand_formula(&f, &expanded, f.past_depth());
                assert!(!e.is_temporal(), "{text}");
                assert_eq!(
                    instance.evaluate(&e).unwrap(),
                    t.evaluate(&f).unwrap(),
                    "{text} on a trace looping to {}",
                    t.loop_state()
                );
            }
        }
    }

    #[test]
    fn test_interpret() {
        let bounds = parse_problem(PROBLEM).unwrap().bounds;
        let t = trace(&bounds, &[(&[], &[0]), (&[0], &[])], 1);
        let expanded = expand_bounds(&bounds, 2, 1, None).unwrap();
        assert_eq!(expanded.interpret(&encode(&expanded, &t)).unwrap(), t);
        assert_eq!(
            expanded.bounds().universe().atoms(),
            &["A0", "A1", "$T0", "$T1"]
        );
        let names: Vec<String> = expanded
            .bounds()
            .relations()
            .map(|r| r.name.clone())
            .collect();
        insta::assert_display_snapshot!(names.join(" "), @"$loop p@0 p@1 q@0 q@1 s");
    }

    #[test]
    fn test_candidate_bounds() {
        let bounds = parse_problem(PROBLEM).unwrap().bounds;
        // p: {} {A0} {A0} looping to 1, so also to 2
        let t = trace(&bounds, &[(&[], &[]), (&[0], &[]), (&[0], &[])], 1);
        let expanded = expand_bounds(&bounds, 4, 1, Some(&t)).unwrap();
        assert_eq!(expanded.loops(), &[1, 2, 3]);
        let p3 = expanded.state_relation(&Relation::variable("p", 1), 3);
        assert_eq!(expanded.bounds().get(&p3).unwrap().lower, unary(&[0]));
        assert!(expanded.bounds().get(&p3).unwrap().is_exact());

        // a single admissible loop is fixed by the bounds
        let expanded = expand_bounds(&bounds, 2, 1, Some(&t.canonize())).unwrap();
        assert_eq!(expanded.loops(), &[1]);
        assert!(expanded.bounds().get(expanded.loop_relation()).unwrap().is_exact());

        // too short to encode the trace
        let t = trace(&bounds, &[(&[], &[]), (&[0], &[]), (&[1], &[])], 1);
        let expanded = expand_bounds(&bounds, 2, 1, Some(&t)).unwrap();
        assert!(expanded.loops().is_empty());
    }
}
