// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The AST for relational expressions and (temporal) formulas.

use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::universe::TupleSet;

/// A named symbolic set of tuples of fixed arity. Static relations have one
/// value for a whole trace; mutable (variable) relations may change from
/// state to state.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Hash, Serialize)]
pub struct Relation {
    /// The name of the relation
    pub name: String,
    /// The arity of every tuple in the relation
    pub arity: usize,
    /// Whether the relation may change across trace states
    pub mutable: bool,
}

impl Relation {
    /// Create a relation.
    pub fn new(name: &str, arity: usize, mutable: bool) -> Self {
        Self {
            name: name.to_string(),
            arity,
            mutable,
        }
    }

    /// A static unary relation
    pub fn unary(name: &str) -> Self {
        Self::new(name, 1, false)
    }

    /// A static binary relation
    pub fn binary(name: &str) -> Self {
        Self::new(name, 2, false)
    }

    /// A variable (mutable) relation
    pub fn variable(name: &str, arity: usize) -> Self {
        Self::new(name, arity, true)
    }
}

/// A quantified variable.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Hash, Serialize)]
pub struct Variable {
    /// The name of the variable
    pub name: String,
    /// The arity of the values the variable ranges over
    pub arity: usize,
    /// Whether a higher-order variable denotes a whole trace of values
    pub mutable: bool,
}

impl Variable {
    /// A static variable
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name: name.to_string(),
            arity,
            mutable: false,
        }
    }

    /// A variable whose value may change across trace states
    pub fn mutable(name: &str, arity: usize) -> Self {
        Self {
            name: name.to_string(),
            arity,
            mutable: true,
        }
    }
}

/// Multiplicities, used both by declarations and by multiplicity formulas.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum Multiplicity {
    /// Exactly zero
    No,
    /// At most one
    Lone,
    /// Exactly one
    One,
    /// At least one
    Some,
    /// Any number
    Set,
}

/// A variable declaration `var: mult expr`.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Serialize)]
pub struct Decl {
    /// The declared variable
    pub var: Variable,
    /// How many tuples of `expr` the variable denotes
    pub mult: Multiplicity,
    /// The domain of the variable
    pub expr: Expression,
}

impl Decl {
    /// Declare `var: one expr`.
    pub fn one(var: Variable, expr: Expression) -> Self {
        Self {
            var,
            mult: Multiplicity::One,
            expr,
        }
    }

    /// Declare `var: mult expr`.
    pub fn new(var: Variable, mult: Multiplicity, expr: Expression) -> Self {
        Self { var, mult, expr }
    }

    /// Whether the declared variable ranges over sets rather than single
    /// tuples (or over traces of values).
    pub fn is_higher_order(&self) -> bool {
        self.mult != Multiplicity::One || self.var.mutable
    }

    /// The constraint a value `value` has to satisfy to be a legal value of
    /// this declaration: membership in the domain plus the multiplicity.
    /// For mutable variables this holds at every state.
    pub fn constraint(&self, value: &Expression) -> Formula {
        let within = Formula::subset(value.clone(), self.expr.clone());
        let mult = match self.mult {
            Multiplicity::Set => Formula::true_(),
            m => Formula::multiplicity(m, value.clone()),
        };
        let f = Formula::and([within, mult]);
        if self.var.mutable {
            Formula::always(f)
        } else {
            f
        }
    }
}

/// Unary expression operators
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum ExprUOp {
    /// `~e`
    Transpose,
    /// `^e`
    Closure,
    /// `*e`
    ReflexiveClosure,
    /// `e'`, the value in the next state
    Prime,
}

/// Binary expression operators
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum ExprBinOp {
    /// `a + b`
    Union,
    /// `a & b`
    Intersection,
    /// `a - b`
    Difference,
    /// `a ++ b`
    Override,
    /// `a . b`
    Join,
    /// `a -> b`
    Product,
}

/// A relational expression.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Serialize)]
pub enum Expression {
    /// A relation leaf
    Relation(Relation),
    /// A quantified variable leaf
    Var(Variable),
    /// A constant set of tuples
    Constant(TupleSet),
    /// Every atom
    Univ,
    /// The identity relation
    Iden,
    /// The empty relation of the given arity
    None(usize),
    /// A unary operation
    UnaryOp(ExprUOp, Box<Expression>),
    /// A binary operation
    BinOp(ExprBinOp, Box<Expression>, Box<Expression>),
    /// `if cond then a else b`
    Ite(Box<Formula>, Box<Expression>, Box<Expression>),
}

/// Unary formula operators
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum UOp {
    /// Negation
    Not,
    /// Holds now and in every future state
    Always,
    /// Holds now or in some future state
    Eventually,
    /// Holds in the next state
    After,
    /// Held in every state up to now
    Historically,
    /// Held in some state up to now
    Once,
    /// Held in the previous state (false in the first state)
    Before,
}

impl UOp {
    /// Whether this is a past-time operator.
    pub fn is_past(self) -> bool {
        matches!(self, UOp::Historically | UOp::Once | UOp::Before)
    }

    /// Whether this is a temporal operator.
    pub fn is_temporal(self) -> bool {
        self != UOp::Not
    }
}

/// Binary formula operators
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum BinOp {
    /// `a => b`
    Implies,
    /// `a <=> b`
    Iff,
    /// `a until b`
    Until,
    /// `a releases b`: `b` holds up to and including a state where `a`
    /// holds, or forever
    Releases,
    /// `a since b`
    Since,
    /// `a triggered b`, the past dual of `releases`
    Triggered,
}

impl BinOp {
    /// Whether this is a past-time operator.
    pub fn is_past(self) -> bool {
        matches!(self, BinOp::Since | BinOp::Triggered)
    }

    /// Whether this is a temporal operator.
    pub fn is_temporal(self) -> bool {
        !matches!(self, BinOp::Implies | BinOp::Iff)
    }
}

/// N-ary formula operators
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum NOp {
    /// Conjunction
    And,
    /// Disjunction
    Or,
}

/// Comparisons between expressions
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum CompareOp {
    /// `a in b`
    Subset,
    /// `a = b`
    Equals,
}

/// Quantifiers
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize)]
pub enum Quantifier {
    /// `all`
    Forall,
    /// `some`
    Exists,
}

/// A (temporal) relational formula.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Serialize)]
pub enum Formula {
    /// `true` or `false`
    Literal(bool),
    /// A unary operation (negation or a unary temporal operator)
    UnaryOp(UOp, Box<Formula>),
    /// A binary operation
    BinOp(BinOp, Box<Formula>, Box<Formula>),
    /// A conjunction or disjunction
    NAryOp(NOp, Vec<Formula>),
    /// A comparison between expressions
    Compare(CompareOp, Expression, Expression),
    /// A multiplicity constraint `mult expr` (`Set` is always true)
    Multiplicity(Multiplicity, Expression),
    /// A quantified formula
    Quantified {
        /// The quantifier
        quantifier: Quantifier,
        /// Declarations, in scope for later declarations and the body
        decls: Vec<Decl>,
        /// The body of the quantifier
        body: Box<Formula>,
    },
}

impl From<bool> for Formula {
    fn from(value: bool) -> Self {
        Self::Literal(value)
    }
}

impl From<Relation> for Expression {
    fn from(value: Relation) -> Self {
        Self::Relation(value)
    }
}

impl From<&Relation> for Expression {
    fn from(value: &Relation) -> Self {
        Self::Relation(value.clone())
    }
}

impl From<Variable> for Expression {
    fn from(value: Variable) -> Self {
        Self::Var(value)
    }
}

impl From<&Variable> for Expression {
    fn from(value: &Variable) -> Self {
        Self::Var(value.clone())
    }
}

impl From<TupleSet> for Expression {
    fn from(value: TupleSet) -> Self {
        Self::Constant(value)
    }
}

impl Expression {
    /// Smart constructor for a unary operation
    pub fn unary<E: Into<Expression>>(op: ExprUOp, e: E) -> Self {
        Self::UnaryOp(op, Box::new(e.into()))
    }

    /// Smart constructor for a binary operation
    pub fn binary<E1, E2>(op: ExprBinOp, lhs: E1, rhs: E2) -> Self
    where
        E1: Into<Expression>,
        E2: Into<Expression>,
    {
        Self::BinOp(op, Box::new(lhs.into()), Box::new(rhs.into()))
    }

    /// `lhs + rhs`
    pub fn union<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::binary(ExprBinOp::Union, lhs, rhs)
    }

    /// `lhs & rhs`
    pub fn intersection<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::binary(ExprBinOp::Intersection, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn difference<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::binary(ExprBinOp::Difference, lhs, rhs)
    }

    /// `lhs . rhs`
    pub fn join<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::binary(ExprBinOp::Join, lhs, rhs)
    }

    /// `lhs -> rhs`
    pub fn product<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::binary(ExprBinOp::Product, lhs, rhs)
    }

    /// `e'`
    pub fn prime<E: Into<Expression>>(e: E) -> Self {
        Self::unary(ExprUOp::Prime, e)
    }

    /// `^e`
    pub fn closure<E: Into<Expression>>(e: E) -> Self {
        Self::unary(ExprUOp::Closure, e)
    }

    /// `~e`
    pub fn transpose<E: Into<Expression>>(e: E) -> Self {
        Self::unary(ExprUOp::Transpose, e)
    }

    /// `if cond then then_ else else_`
    pub fn ite<F, E1, E2>(cond: F, then: E1, else_: E2) -> Self
    where
        F: Into<Formula>,
        E1: Into<Expression>,
        E2: Into<Expression>,
    {
        Self::Ite(
            Box::new(cond.into()),
            Box::new(then.into()),
            Box::new(else_.into()),
        )
    }

    /// The arity of the tuples this expression denotes.
    pub fn arity(&self) -> usize {
        match self {
            Expression::Relation(r) => r.arity,
            Expression::Var(v) => v.arity,
            Expression::Constant(ts) => ts.arity(),
            Expression::Univ => 1,
            Expression::Iden => 2,
            Expression::None(arity) => *arity,
            Expression::UnaryOp(ExprUOp::Prime, e) => e.arity(),
            Expression::UnaryOp(_, _) => 2,
            Expression::BinOp(ExprBinOp::Join, lhs, rhs) => lhs.arity() + rhs.arity() - 2,
            Expression::BinOp(ExprBinOp::Product, lhs, rhs) => lhs.arity() + rhs.arity(),
            Expression::BinOp(_, lhs, _) => lhs.arity(),
            Expression::Ite(_, then, _) => then.arity(),
        }
    }

    /// Whether the expression mentions a mutable relation, a mutable
    /// variable or a prime.
    pub fn is_temporal(&self) -> bool {
        match self {
            Expression::Relation(r) => r.mutable,
            Expression::Var(v) => v.mutable,
            Expression::Constant(_) | Expression::Univ | Expression::Iden | Expression::None(_) => {
                false
            }
            Expression::UnaryOp(ExprUOp::Prime, _) => true,
            Expression::UnaryOp(_, e) => e.is_temporal(),
            Expression::BinOp(_, lhs, rhs) => lhs.is_temporal() || rhs.is_temporal(),
            Expression::Ite(c, t, e) => c.is_temporal() || t.is_temporal() || e.is_temporal(),
        }
    }

    fn collect_relations(&self, out: &mut BTreeSet<Relation>) {
        match self {
            Expression::Relation(r) => {
                out.insert(r.clone());
            }
            Expression::Var(_)
            | Expression::Constant(_)
            | Expression::Univ
            | Expression::Iden
            | Expression::None(_) => (),
            Expression::UnaryOp(_, e) => e.collect_relations(out),
            Expression::BinOp(_, lhs, rhs) => {
                lhs.collect_relations(out);
                rhs.collect_relations(out);
            }
            Expression::Ite(c, t, e) => {
                c.collect_relations(out);
                t.collect_relations(out);
                e.collect_relations(out);
            }
        }
    }

    /// Apply `f` to every leaf variable, rebuilding the expression.
    pub fn map_vars(&self, f: &dyn Fn(&Variable) -> Option<Expression>) -> Expression {
        match self {
            Expression::Var(v) => f(v).unwrap_or_else(|| self.clone()),
            Expression::Relation(_)
            | Expression::Constant(_)
            | Expression::Univ
            | Expression::Iden
            | Expression::None(_) => self.clone(),
            Expression::UnaryOp(op, e) => Expression::UnaryOp(*op, Box::new(e.map_vars(f))),
            Expression::BinOp(op, lhs, rhs) => Expression::BinOp(
                *op,
                Box::new(lhs.map_vars(f)),
                Box::new(rhs.map_vars(f)),
            ),
            Expression::Ite(c, t, e) => Expression::Ite(
                Box::new(c.map_vars(f)),
                Box::new(t.map_vars(f)),
                Box::new(e.map_vars(f)),
            ),
        }
    }
}

impl Formula {
    /// Smart constructor for Literal(true)
    pub fn true_() -> Self {
        Self::Literal(true)
    }

    /// Smart constructor for Literal(false)
    pub fn false_() -> Self {
        Self::Literal(false)
    }

    //////////////////
    // Unary operations
    //////////////////

    /// Smart constructor for not. Note this does not push negation inwards
    /// (see [`crate::nnf`]), but it does cancel double negation and fold
    /// literals.
    pub fn not<T>(t: T) -> Self
    where
        T: Into<Formula>,
    {
        match t.into() {
            Self::Literal(b) => Self::Literal(!b),
            Self::UnaryOp(UOp::Not, body) => *body,
            t => Self::UnaryOp(UOp::Not, Box::new(t)),
        }
    }

    fn temporal<T: Into<Formula>>(op: UOp, t: T) -> Self {
        Self::UnaryOp(op, Box::new(t.into()))
    }

    /// Smart constructor for always
    pub fn always<T: Into<Formula>>(t: T) -> Self {
        Self::temporal(UOp::Always, t)
    }

    /// Smart constructor for eventually
    pub fn eventually<T: Into<Formula>>(t: T) -> Self {
        Self::temporal(UOp::Eventually, t)
    }

    /// Smart constructor for after
    pub fn after<T: Into<Formula>>(t: T) -> Self {
        Self::temporal(UOp::After, t)
    }

    /// Smart constructor for historically
    pub fn historically<T: Into<Formula>>(t: T) -> Self {
        Self::temporal(UOp::Historically, t)
    }

    /// Smart constructor for once
    pub fn once<T: Into<Formula>>(t: T) -> Self {
        Self::temporal(UOp::Once, t)
    }

    /// Smart constructor for before
    pub fn before<T: Into<Formula>>(t: T) -> Self {
        Self::temporal(UOp::Before, t)
    }

    //////////////////
    // Binary operations
    //////////////////

    /// Smart constructor for a binary operation
    pub fn binary<T1, T2>(op: BinOp, lhs: T1, rhs: T2) -> Self
    where
        T1: Into<Formula>,
        T2: Into<Formula>,
    {
        Self::BinOp(op, Box::new(lhs.into()), Box::new(rhs.into()))
    }

    /// Smart constructor for `lhs => rhs`
    pub fn implies<T1: Into<Formula>, T2: Into<Formula>>(lhs: T1, rhs: T2) -> Self {
        Self::binary(BinOp::Implies, lhs, rhs)
    }

    /// Smart constructor for `lhs <=> rhs`
    pub fn iff<T1: Into<Formula>, T2: Into<Formula>>(lhs: T1, rhs: T2) -> Self {
        Self::binary(BinOp::Iff, lhs, rhs)
    }

    /// Smart constructor for `lhs until rhs`
    pub fn until<T1: Into<Formula>, T2: Into<Formula>>(lhs: T1, rhs: T2) -> Self {
        Self::binary(BinOp::Until, lhs, rhs)
    }

    /// Smart constructor for `lhs releases rhs`
    pub fn releases<T1: Into<Formula>, T2: Into<Formula>>(lhs: T1, rhs: T2) -> Self {
        Self::binary(BinOp::Releases, lhs, rhs)
    }

    /// Smart constructor for `lhs since rhs`
    pub fn since<T1: Into<Formula>, T2: Into<Formula>>(lhs: T1, rhs: T2) -> Self {
        Self::binary(BinOp::Since, lhs, rhs)
    }

    /// Smart constructor for `lhs triggered rhs`
    pub fn triggered<T1: Into<Formula>, T2: Into<Formula>>(lhs: T1, rhs: T2) -> Self {
        Self::binary(BinOp::Triggered, lhs, rhs)
    }

    //////////////////
    // N-ary operations
    //////////////////

    fn nary<I>(op: NOp, ts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Formula>,
    {
        // the absorbing element of the operation
        let zero = op == NOp::Or;
        let mut args = vec![];
        for t in ts {
            match t.into() {
                Self::Literal(b) if b == zero => return Self::Literal(zero),
                Self::Literal(_) => (),
                Self::NAryOp(op2, ts2) if op2 == op => args.extend(ts2),
                t => args.push(t),
            }
        }
        match args.len() {
            0 => Self::Literal(!zero),
            1 => args.pop().unwrap_or(Self::Literal(!zero)),
            _ => Self::NAryOp(op, args),
        }
    }

    /// Smart constructor for conjunction. Flattens nested conjunctions and
    /// folds literals.
    pub fn and<I>(ts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Formula>,
    {
        Self::nary(NOp::And, ts)
    }

    /// Smart constructor for disjunction. Flattens nested disjunctions and
    /// folds literals.
    pub fn or<I>(ts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Formula>,
    {
        Self::nary(NOp::Or, ts)
    }

    //////////////////
    // Leaves
    //////////////////

    /// Smart constructor for `lhs in rhs`
    pub fn subset<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::Compare(CompareOp::Subset, lhs.into(), rhs.into())
    }

    /// Smart constructor for `lhs = rhs`
    pub fn equals<E1: Into<Expression>, E2: Into<Expression>>(lhs: E1, rhs: E2) -> Self {
        Self::Compare(CompareOp::Equals, lhs.into(), rhs.into())
    }

    /// Smart constructor for a multiplicity formula
    pub fn multiplicity<E: Into<Expression>>(mult: Multiplicity, e: E) -> Self {
        match mult {
            Multiplicity::Set => Self::true_(),
            m => Self::Multiplicity(m, e.into()),
        }
    }

    /// `some e`
    pub fn some<E: Into<Expression>>(e: E) -> Self {
        Self::multiplicity(Multiplicity::Some, e)
    }

    /// `no e`
    pub fn no<E: Into<Expression>>(e: E) -> Self {
        Self::multiplicity(Multiplicity::No, e)
    }

    /// `one e`
    pub fn one<E: Into<Expression>>(e: E) -> Self {
        Self::multiplicity(Multiplicity::One, e)
    }

    /// `lone e`
    pub fn lone<E: Into<Expression>>(e: E) -> Self {
        Self::multiplicity(Multiplicity::Lone, e)
    }

    //////////////////
    // Quantifiers
    //////////////////

    /// Smart constructor for a quantified formula; an empty declaration list
    /// yields the body.
    pub fn quantify<I, T>(quantifier: Quantifier, decls: I, body: T) -> Self
    where
        I: IntoIterator<Item = Decl>,
        T: Into<Formula>,
    {
        let decls = decls.into_iter().collect_vec();
        let body = body.into();
        if decls.is_empty() {
            return body;
        }
        Self::Quantified {
            quantifier,
            decls,
            body: Box::new(body),
        }
    }

    /// Smart constructor for a universal quantifier
    pub fn forall<I, T>(decls: I, body: T) -> Self
    where
        I: IntoIterator<Item = Decl>,
        T: Into<Formula>,
    {
        Self::quantify(Quantifier::Forall, decls, body)
    }

    /// Smart constructor for an existential quantifier
    pub fn exists<I, T>(decls: I, body: T) -> Self
    where
        I: IntoIterator<Item = Decl>,
        T: Into<Formula>,
    {
        Self::quantify(Quantifier::Exists, decls, body)
    }

    //////////////////
    // Queries
    //////////////////

    /// The top-level conjuncts of the formula.
    pub fn conjuncts(&self) -> Vec<Formula> {
        match self {
            Formula::NAryOp(NOp::And, ts) => ts.iter().flat_map(|t| t.conjuncts()).collect(),
            Formula::Literal(true) => vec![],
            _ => vec![self.clone()],
        }
    }

    /// Whether the formula uses a temporal operator or mentions anything
    /// that changes across states.
    pub fn is_temporal(&self) -> bool {
        match self {
            Formula::Literal(_) => false,
            Formula::UnaryOp(op, t) => op.is_temporal() || t.is_temporal(),
            Formula::BinOp(op, lhs, rhs) => {
                op.is_temporal() || lhs.is_temporal() || rhs.is_temporal()
            }
            Formula::NAryOp(_, ts) => ts.iter().any(|t| t.is_temporal()),
            Formula::Compare(_, lhs, rhs) => lhs.is_temporal() || rhs.is_temporal(),
            Formula::Multiplicity(_, e) => e.is_temporal(),
            Formula::Quantified { decls, body, .. } => {
                decls
                    .iter()
                    .any(|d| d.var.mutable || d.expr.is_temporal())
                    || body.is_temporal()
            }
        }
    }

    /// Whether any quantifier in the formula declares a higher-order
    /// variable.
    pub fn is_higher_order(&self) -> bool {
        match self {
            Formula::Literal(_) => false,
            Formula::UnaryOp(_, t) => t.is_higher_order(),
            Formula::BinOp(_, lhs, rhs) => lhs.is_higher_order() || rhs.is_higher_order(),
            Formula::NAryOp(_, ts) => ts.iter().any(|t| t.is_higher_order()),
            Formula::Compare(_, lhs, rhs) => {
                expr_is_higher_order(lhs) || expr_is_higher_order(rhs)
            }
            Formula::Multiplicity(_, e) => expr_is_higher_order(e),
            Formula::Quantified { decls, body, .. } => {
                decls.iter().any(|d| d.is_higher_order() || expr_is_higher_order(&d.expr))
                    || body.is_higher_order()
            }
        }
    }

    /// The past depth: the maximum nesting of past-time operators, plus one.
    /// A depth above one means loops have to be unrolled before past
    /// operators can be evaluated on a lasso.
    pub fn past_depth(&self) -> usize {
        fn depth(f: &Formula) -> usize {
            match f {
                Formula::Literal(_) => 0,
                Formula::UnaryOp(op, t) => depth(t) + usize::from(op.is_past()),
                Formula::BinOp(op, lhs, rhs) => {
                    depth(lhs).max(depth(rhs)) + usize::from(op.is_past())
                }
                Formula::NAryOp(_, ts) => ts.iter().map(depth).max().unwrap_or(0),
                Formula::Compare(_, lhs, rhs) => expr_depth(lhs).max(expr_depth(rhs)),
                Formula::Multiplicity(_, e) => expr_depth(e),
                Formula::Quantified { decls, body, .. } => decls
                    .iter()
                    .map(|d| expr_depth(&d.expr))
                    .chain([depth(body)])
                    .max()
                    .unwrap_or(0),
            }
        }
        fn expr_depth(e: &Expression) -> usize {
            match e {
                Expression::UnaryOp(_, e) => expr_depth(e),
                Expression::BinOp(_, lhs, rhs) => expr_depth(lhs).max(expr_depth(rhs)),
                Expression::Ite(c, t, e) => depth(c).max(expr_depth(t)).max(expr_depth(e)),
                _ => 0,
            }
        }
        depth(self) + 1
    }

    /// Every relation mentioned in the formula.
    pub fn relations(&self) -> BTreeSet<Relation> {
        let mut out = BTreeSet::new();
        self.collect_relations(&mut out);
        out
    }

    fn collect_relations(&self, out: &mut BTreeSet<Relation>) {
        match self {
            Formula::Literal(_) => (),
            Formula::UnaryOp(_, t) => t.collect_relations(out),
            Formula::BinOp(_, lhs, rhs) => {
                lhs.collect_relations(out);
                rhs.collect_relations(out);
            }
            Formula::NAryOp(_, ts) => ts.iter().for_each(|t| t.collect_relations(out)),
            Formula::Compare(_, lhs, rhs) => {
                lhs.collect_relations(out);
                rhs.collect_relations(out);
            }
            Formula::Multiplicity(_, e) => e.collect_relations(out),
            Formula::Quantified { decls, body, .. } => {
                for d in decls {
                    d.expr.collect_relations(out);
                }
                body.collect_relations(out);
            }
        }
    }

    /// Apply `f` to every variable leaf, rebuilding the formula. Variables
    /// bound by a quantifier inside the formula are left alone.
    pub fn map_vars(&self, f: &dyn Fn(&Variable) -> Option<Expression>) -> Formula {
        match self {
            Formula::Literal(_) => self.clone(),
            Formula::UnaryOp(op, t) => Formula::UnaryOp(*op, Box::new(t.map_vars(f))),
            Formula::BinOp(op, lhs, rhs) => {
                Formula::BinOp(*op, Box::new(lhs.map_vars(f)), Box::new(rhs.map_vars(f)))
            }
            Formula::NAryOp(op, ts) => {
                Formula::NAryOp(*op, ts.iter().map(|t| t.map_vars(f)).collect())
            }
            Formula::Compare(op, lhs, rhs) => {
                Formula::Compare(*op, lhs.map_vars(f), rhs.map_vars(f))
            }
            Formula::Multiplicity(m, e) => Formula::Multiplicity(*m, e.map_vars(f)),
            Formula::Quantified {
                quantifier,
                decls,
                body,
            } => {
                let mut bound = im::HashSet::new();
                let mut new_decls = vec![];
                for d in decls {
                    let expr = d.expr.map_vars(&|v: &Variable| {
                        if bound.contains(v) {
                            None
                        } else {
                            f(v)
                        }
                    });
                    new_decls.push(Decl::new(d.var.clone(), d.mult, expr));
                    bound.insert(d.var.clone());
                }
                let body = body.map_vars(&|v: &Variable| if bound.contains(v) { None } else { f(v) });
                Formula::Quantified {
                    quantifier: *quantifier,
                    decls: new_decls,
                    body: Box::new(body),
                }
            }
        }
    }

    /// Substitute expressions for free variables.
    pub fn substitute(&self, substitution: &im::HashMap<Variable, Expression>) -> Formula {
        self.map_vars(&|v: &Variable| substitution.get(v).cloned())
    }
}

fn expr_is_higher_order(e: &Expression) -> bool {
    match e {
        Expression::Ite(c, t, e) => {
            c.is_higher_order() || expr_is_higher_order(t) || expr_is_higher_order(e)
        }
        Expression::UnaryOp(_, e) => expr_is_higher_order(e),
        Expression::BinOp(_, lhs, rhs) => expr_is_higher_order(lhs) || expr_is_higher_order(rhs),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smart_constructors_fold() {
        let p = Relation::variable("p", 1);
        assert_eq!(Formula::and([Formula::true_(), Formula::some(&p)]), Formula::some(&p));
        assert_eq!(
            Formula::or([Formula::some(&p), Formula::true_()]),
            Formula::true_()
        );
        assert_eq!(Formula::not(Formula::not(Formula::no(&p))), Formula::no(&p));
        assert_eq!(
            Formula::and([Formula::and([Formula::some(&p), Formula::no(&p)]), Formula::one(&p)])
                .conjuncts()
                .len(),
            3
        );
    }

    #[test]
    fn test_past_depth() {
        let p = Relation::variable("p", 1);
        assert_eq!(Formula::always(Formula::some(&p)).past_depth(), 1);
        assert_eq!(Formula::always(Formula::once(Formula::some(&p))).past_depth(), 2);
        assert_eq!(
            Formula::since(Formula::before(Formula::some(&p)), Formula::no(&p)).past_depth(),
            3
        );
    }

    #[test]
    fn test_higher_order_and_temporal() {
        let a = Relation::unary("A");
        let x = Variable::new("X", 1);
        let ho = Formula::exists(
            [Decl::new(x.clone(), Multiplicity::Set, a.clone().into())],
            Formula::some(&x),
        );
        assert!(ho.is_higher_order());
        assert!(!ho.is_temporal());
        let y = Variable::new("y", 1);
        let fo = Formula::forall([Decl::one(y.clone(), a.into())], Formula::some(&y));
        assert!(!fo.is_higher_order());
    }

    #[test]
    fn test_substitute_respects_binding() {
        let a = Relation::unary("A");
        let x = Variable::new("x", 1);
        let inner = Formula::forall([Decl::one(x.clone(), a.clone().into())], Formula::some(&x));
        let f = Formula::and([Formula::some(&x), inner.clone()]);
        let subst = im::HashMap::from(vec![(x.clone(), Expression::from(&a))]);
        assert_eq!(
            f.substitute(&subst),
            Formula::and([Formula::some(&a), inner])
        );
    }
}
