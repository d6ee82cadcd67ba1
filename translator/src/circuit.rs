// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Boolean circuits with shared gates, and their clausal (Tseytin)
//! encoding.
//!
//! Constants are folded by the constructors, so a circuit is either a
//! constant or mentions no constants at all. Gates are reference counted;
//! a gate reachable from several places is encoded once.

use fxhash::FxHashMap;
use std::rc::Rc;

use crate::sat::SatSolver;

/// A gate with at least two inputs.
#[derive(Debug)]
pub enum Gate {
    /// Conjunction
    And(Vec<Bool>),
    /// Disjunction
    Or(Vec<Bool>),
}

/// A node of a boolean circuit.
#[derive(Debug, Clone)]
pub enum Bool {
    /// A constant
    Const(bool),
    /// A DIMACS literal
    Lit(i32),
    /// The output of a gate
    Gate(Rc<Gate>),
    /// The negated output of a gate
    NotGate(Rc<Gate>),
}

impl From<bool> for Bool {
    fn from(value: bool) -> Self {
        Bool::Const(value)
    }
}

impl Bool {
    /// The positive literal of a variable.
    pub fn var(v: i32) -> Self {
        Bool::Lit(v)
    }

    /// The value of a constant circuit.
    pub fn constant(&self) -> Option<bool> {
        match self {
            Bool::Const(b) => Some(*b),
            _ => None,
        }
    }

    /// Negation; free for every kind of node.
    pub fn not(&self) -> Bool {
        match self {
            Bool::Const(b) => Bool::Const(!b),
            Bool::Lit(l) => Bool::Lit(-l),
            Bool::Gate(g) => Bool::NotGate(g.clone()),
            Bool::NotGate(g) => Bool::Gate(g.clone()),
        }
    }

    fn nary<I>(and: bool, args: I) -> Bool
    where
        I: IntoIterator<Item = Bool>,
    {
        // the absorbing element
        let zero = !and;
        let mut inputs = vec![];
        for arg in args {
            match arg {
                Bool::Const(b) if b == zero => return Bool::Const(zero),
                Bool::Const(_) => (),
                arg => inputs.push(arg),
            }
        }
        match inputs.len() {
            0 => Bool::Const(and),
            1 => inputs.pop().unwrap_or(Bool::Const(and)),
            _ if and => Bool::Gate(Rc::new(Gate::And(inputs))),
            _ => Bool::Gate(Rc::new(Gate::Or(inputs))),
        }
    }

    /// Conjunction
    pub fn and<I: IntoIterator<Item = Bool>>(args: I) -> Bool {
        Self::nary(true, args)
    }

    /// Disjunction
    pub fn or<I: IntoIterator<Item = Bool>>(args: I) -> Bool {
        Self::nary(false, args)
    }

    /// `a => b`
    pub fn implies(a: &Bool, b: &Bool) -> Bool {
        Self::or([a.not(), b.clone()])
    }

    /// `a <=> b`
    pub fn iff(a: &Bool, b: &Bool) -> Bool {
        match (a.constant(), b.constant()) {
            (Some(true), _) => b.clone(),
            (Some(false), _) => b.not(),
            (_, Some(true)) => a.clone(),
            (_, Some(false)) => a.not(),
            _ => Self::and([Self::implies(a, b), Self::implies(b, a)]),
        }
    }

    /// `if c then t else e`
    pub fn ite(c: &Bool, t: &Bool, e: &Bool) -> Bool {
        match c.constant() {
            Some(true) => t.clone(),
            Some(false) => e.clone(),
            None => Self::or([
                Self::and([c.clone(), t.clone()]),
                Self::and([c.not(), e.clone()]),
            ]),
        }
    }
}

/// Clausal encoding of circuits into a solver. Gate outputs get fresh
/// variables numbered after the primary variables; the gate memo lives as
/// long as the encoder, so circuits added later share the encoding of
/// gates encoded earlier.
pub struct Tseytin {
    next_var: i32,
    // holds on to every encoded gate so its address stays unique
    memo: FxHashMap<*const Gate, (Rc<Gate>, i32)>,
}

impl Tseytin {
    /// An encoder whose fresh variables start after `primary` variables.
    pub fn new(primary: i32) -> Self {
        Self {
            next_var: primary + 1,
            memo: FxHashMap::default(),
        }
    }

    /// The largest variable allocated so far.
    pub fn num_variables(&self) -> i32 {
        self.next_var - 1
    }

    /// A fresh variable with no constraints.
    pub fn fresh(&mut self) -> i32 {
        self.next_var += 1;
        self.next_var - 1
    }

    fn gate(&mut self, gate: &Rc<Gate>, solver: &mut dyn SatSolver) -> i32 {
        let key = Rc::as_ptr(gate);
        if let Some((_, v)) = self.memo.get(&key) {
            return *v;
        }
        let (inputs, and) = match gate.as_ref() {
            Gate::And(inputs) => (inputs, true),
            Gate::Or(inputs) => (inputs, false),
        };
        let lits: Vec<i32> = inputs.iter().map(|b| self.literal(b, solver)).collect();
        let v = self.fresh();
        // for Or, the same clauses with every literal negated
        let sign = if and { 1 } else { -1 };
        for &l in &lits {
            solver.add_clause(&[-v * sign, l * sign]);
        }
        let mut clause: Vec<i32> = lits.iter().map(|l| -l * sign).collect();
        clause.push(v * sign);
        solver.add_clause(&clause);
        self.memo.insert(key, (gate.clone(), v));
        v
    }

    /// A literal equivalent to `b`. Constants get a variable fixed by a
    /// unit clause.
    pub fn literal(&mut self, b: &Bool, solver: &mut dyn SatSolver) -> i32 {
        match b {
            Bool::Const(value) => {
                let v = self.fresh();
                solver.add_clause(&[if *value { v } else { -v }]);
                v
            }
            Bool::Lit(l) => *l,
            Bool::Gate(g) => self.gate(g, solver),
            Bool::NotGate(g) => -self.gate(g, solver),
        }
    }

    /// Constrain `b` to hold. Top-level conjunctions become separate
    /// constraints and top-level disjunctions a single clause.
    pub fn assert(&mut self, b: &Bool, solver: &mut dyn SatSolver) {
        match b {
            Bool::Const(true) => (),
            Bool::Const(false) => solver.add_clause(&[]),
            Bool::Lit(l) => solver.add_clause(&[*l]),
            Bool::Gate(g) => match g.as_ref() {
                Gate::And(inputs) => inputs.iter().for_each(|i| self.assert(i, solver)),
                Gate::Or(inputs) => {
                    let clause: Vec<i32> = inputs.iter().map(|i| self.literal(i, solver)).collect();
                    solver.add_clause(&clause);
                }
            },
            Bool::NotGate(g) => match g.as_ref() {
                Gate::Or(inputs) => inputs.iter().for_each(|i| self.assert(&i.not(), solver)),
                Gate::And(inputs) => {
                    let clause: Vec<i32> = inputs
                        .iter()
                        .map(|i| -self.literal(i, solver))
                        .collect();
                    solver.add_clause(&clause);
                }
            },
        }
    }
}
