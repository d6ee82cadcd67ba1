// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parser for formulas, expressions and problem files.
//!
//! A problem file declares a universe, bounded relations and facts:
//!
//! ```text
//! universe A0 A1 A2
//! static next: 2 = {(A0, A1), (A1, A2)}
//! var p: 1 <= {(A0), (A1), (A2)}
//! var q: 1 within p
//! fact some p
//! fact always p' = p.next
//! ```
//!
//! The grammar parses every name as a placeholder variable; a resolution
//! pass then turns names into relations or quantified variables and
//! computes the arity of each variable from its declaration.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use peg::{error::ParseError as PegError, str::LineCol};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

use crate::{
    bounds::{Bounds, BoundsError},
    syntax::*,
    universe::{Tuple, TupleSet, Universe},
};

enum RawBound {
    Exact(Vec<Tuple>),
    Range(Vec<Tuple>, Vec<Tuple>),
    Within(Expression),
}

struct RawRelation {
    name: String,
    arity: usize,
    mutable: bool,
    bound: RawBound,
}

enum Item {
    Relation(RawRelation),
    Fact(Formula),
}

peg::parser! {

grammar parser(universe: &Universe) for str {
    rule ident_start() = ['a'..='z' | 'A'..='Z' | '_' | '$']
    rule ident_char() = ident_start() / ['0'..='9']
    rule keyword() = ("all" / "some" / "no" / "one" / "lone" / "set" / "var" / "static"
        / "in" / "not" / "and" / "or" / "implies" / "iff" / "true" / "false"
        / "univ" / "iden" / "none" / "if" / "then" / "else"
        / "always" / "eventually" / "after" / "historically" / "once" / "before"
        / "until" / "releases" / "since" / "triggered"
        / "universe" / "fact" / "within") !ident_char()
    pub(super) rule ident() -> String
    = s:$(quiet!{!keyword() ident_start() ident_char()*} / expected!("identifier"))
    { s.to_string() }

    rule comment() = "//" [^'\n' | '\r']*
    rule whitespace() = quiet!{ [' ' | '\t' | '\n' | '\r'] / comment() }
    rule word_boundary() = !ident_char()
    rule _ = whitespace()*
    rule __ = word_boundary() _

    rule number() -> usize
    = n:$(['0'..='9']+) {? n.parse().or(Err("number")) }

    rule atom() -> usize
    = "#" n:number() { n }
    / a:ident() {? universe.index_of(&a).ok_or("atom of the universe") }

    rule tuple() -> Tuple
    = "(" _ atoms:(atom() ++ (_ "," _)) _ ")" { atoms }
    / a:atom() { vec![a] }

    rule tuples() -> Vec<Tuple>
    = "{" _ ts:(tuple() ** (_ "," _)) _ "}" { ts }

    rule constant() -> Expression
    = ts:tuples() {?
        match ts.first().map(|t| t.len()) {
            None => Ok(Expression::None(1)),
            Some(arity) if ts.iter().all(|t| t.len() == arity) => {
                Ok(Expression::Constant(TupleSet::from_tuples(arity, ts)))
            }
            Some(_) => Err("tuples of a single arity"),
        }
    }

    pub(super) rule expr() -> Expression = precedence!{
        x:(@) _ "+" !"+" _ y:@ { Expression::union(x, y) }
        x:(@) _ "-" !">" _ y:@ { Expression::difference(x, y) }
        --
        x:(@) _ "++" _ y:@ { Expression::binary(ExprBinOp::Override, x, y) }
        --
        x:(@) _ "&" !"&" _ y:@ { Expression::intersection(x, y) }
        --
        x:(@) _ "->" _ y:@ { Expression::product(x, y) }
        --
        x:(@) _ "." _ y:@ { Expression::join(x, y) }
        --
        "~" _ x:@ { Expression::transpose(x) }
        "^" _ x:@ { Expression::closure(x) }
        "*" _ x:@ { Expression::unary(ExprUOp::ReflexiveClosure, x) }
        --
        x:(@) "'" { Expression::prime(x) }
        --
        "if" __ c:formula() _ "then" __ t:expr() _ "else" __ e:expr() { Expression::ite(c, t, e) }
        "univ" word_boundary() { Expression::Univ }
        "iden" word_boundary() { Expression::Iden }
        "none" word_boundary() { Expression::None(1) }
        c:constant() { c }
        // resolved to a relation or a variable after parsing
        n:ident() { Expression::Var(Variable::new(&n, 0)) }
        "(" _ e:expr() _ ")" { e }
    }

    rule quantifier() -> Quantifier
    = "all" word_boundary() { Quantifier::Forall }
    / "some" word_boundary() { Quantifier::Exists }

    rule mult() -> Multiplicity
    = "no" word_boundary() { Multiplicity::No }
    / "lone" word_boundary() { Multiplicity::Lone }
    / "one" word_boundary() { Multiplicity::One }
    / "some" word_boundary() { Multiplicity::Some }

    rule decl_mult() -> Multiplicity
    = m:mult() { m } / "set" word_boundary() { Multiplicity::Set }

    rule decl() -> Decl
    = mutable:("var" __)? name:ident() _ ":" _ m:(m:decl_mult() _ { m })? e:expr()
    {
        let var = if mutable.is_some() {
            Variable::mutable(&name, 0)
        } else {
            Variable::new(&name, 0)
        };
        Decl::new(var, m.unwrap_or(Multiplicity::One), e)
    }

    rule compare_op() -> (CompareOp, bool)
    = "in" word_boundary() { (CompareOp::Subset, false) }
    / "!in" word_boundary() { (CompareOp::Subset, true) }
    / "not" __ "in" word_boundary() { (CompareOp::Subset, true) }
    / "=" !">" { (CompareOp::Equals, false) }
    / "!=" { (CompareOp::Equals, true) }

    rule formula_atom() -> Formula
    = "true" word_boundary() { Formula::true_() }
    / "false" word_boundary() { Formula::false_() }
    / m:mult() _ e:expr() { Formula::multiplicity(m, e) }
    / l:expr() _ op:compare_op() _ r:expr() {
        let f = Formula::Compare(op.0, l, r);
        if op.1 { Formula::not(f) } else { f }
    }
    / "(" _ f:formula() _ ")" { f }

    pub(super) rule formula() -> Formula = precedence!{
        q:quantifier() __ ds:(decl() ++ (_ "," _)) _ "|" !"|" _ body:@
        { Formula::quantify(q, ds, body) }
        --
        x:(@) _ ("<=>" / "iff" word_boundary()) _ y:@ { Formula::iff(x, y) }
        --
        x:@ _ ("=>" / "implies" word_boundary()) _ y:(@) { Formula::implies(x, y) }
        --
        x:(@) _ ("||" / "or" word_boundary()) _ y:@ { Formula::or([x, y]) }
        --
        x:(@) _ ("&&" / "and" word_boundary()) _ y:@ { Formula::and([x, y]) }
        --
        // right associative, all at the same level
        x:@ _ "until" __ y:(@) { Formula::until(x, y) }
        x:@ _ "releases" __ y:(@) { Formula::releases(x, y) }
        x:@ _ "since" __ y:(@) { Formula::since(x, y) }
        x:@ _ "triggered" __ y:(@) { Formula::triggered(x, y) }
        --
        ("!" / "not" __) _ x:@ { Formula::not(x) }
        "always" __ x:@ { Formula::always(x) }
        "eventually" __ x:@ { Formula::eventually(x) }
        "after" __ x:@ { Formula::after(x) }
        "historically" __ x:@ { Formula::historically(x) }
        "once" __ x:@ { Formula::once(x) }
        "before" __ x:@ { Formula::before(x) }
        --
        f:formula_atom() { f }
    }

    pub(super) rule formula_only() -> Formula = _ f:formula() _ { f }

    pub(super) rule expr_only() -> Expression = _ e:expr() _ { e }

    rule universe_decl() -> Vec<String>
    = "universe" __ atoms:(ident() ++ _) { atoms }

    // only the universe, ignoring the rest of the file
    pub(super) rule universe_header() -> Vec<String>
    = _ atoms:universe_decl() [_]* { atoms }

    rule bound() -> RawBound
    = "=" _ ts:tuples() { RawBound::Exact(ts) }
    / ">=" _ lower:tuples() _ "<=" _ upper:tuples() { RawBound::Range(lower, upper) }
    / "<=" _ upper:tuples() { RawBound::Range(vec![], upper) }
    / "within" __ e:expr() { RawBound::Within(e) }

    rule relation_decl() -> RawRelation
    = mutable:("static" { false } / "var" { true }) __ name:ident() _ ":" _ arity:number() _
      bound:bound()
    { RawRelation { name, arity, mutable, bound } }

    rule item() -> Item
    = r:relation_decl() { Item::Relation(r) }
    / "fact" __ f:formula() { Item::Fact(f) }

    pub(super) rule problem() -> Vec<Item>
    = _ universe_decl() _ items:(item() ** _) _ { items }
}
}

/// An error in parsing or resolving names
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The text does not match the grammar
    #[error("{0}")]
    Syntax(PegError<LineCol>),
    /// A name is neither a declared relation nor a variable in scope
    #[error("unknown relation or variable {0}")]
    Unbound(String),
    /// A relation or atom is declared twice
    #[error("duplicate declaration of {0}")]
    Duplicate(String),
    /// Operands of an operator have incompatible arities
    #[error("arity error in {0}")]
    Arity(String),
    /// The declared bounds are inconsistent
    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

impl From<PegError<LineCol>> for ParseError {
    fn from(e: PegError<LineCol>) -> Self {
        ParseError::Syntax(e)
    }
}

/// A parsed problem: bounds on every declared relation and a list of facts.
#[derive(Debug, Clone)]
pub struct Problem {
    /// Bounds on the declared relations
    pub bounds: Bounds,
    /// Facts, in file order
    pub facts: Vec<Formula>,
}

impl Problem {
    /// The conjunction of all facts.
    pub fn formula(&self) -> Formula {
        Formula::and(self.facts.iter().cloned())
    }
}

type Scope = im::HashMap<String, Variable>;

/// Turns placeholder variables into relations or bound variables.
struct Resolver<'a> {
    relations: &'a BTreeMap<String, Relation>,
}

impl<'a> Resolver<'a> {
    fn expression(&self, e: &Expression, scope: &Scope) -> Result<Expression, ParseError> {
        let resolved = match e {
            Expression::Var(v) => {
                if let Some(bound) = scope.get(&v.name) {
                    Expression::Var(bound.clone())
                } else if let Some(r) = self.relations.get(&v.name) {
                    Expression::Relation(r.clone())
                } else {
                    return Err(ParseError::Unbound(v.name.clone()));
                }
            }
            Expression::Relation(_)
            | Expression::Constant(_)
            | Expression::Univ
            | Expression::Iden
            | Expression::None(_) => e.clone(),
            Expression::UnaryOp(op, arg) => {
                let arg = self.expression(arg, scope)?;
                if *op != ExprUOp::Prime && arg.arity() != 2 {
                    return Err(ParseError::Arity(e.to_string()));
                }
                Expression::unary(*op, arg)
            }
            Expression::BinOp(op, lhs, rhs) => {
                let lhs = self.expression(lhs, scope)?;
                let rhs = self.expression(rhs, scope)?;
                let ok = match op {
                    ExprBinOp::Join => lhs.arity() + rhs.arity() > 2,
                    ExprBinOp::Product => true,
                    _ => lhs.arity() == rhs.arity(),
                };
                if !ok {
                    return Err(ParseError::Arity(e.to_string()));
                }
                Expression::binary(*op, lhs, rhs)
            }
            Expression::Ite(cond, then, else_) => {
                let then = self.expression(then, scope)?;
                let else_ = self.expression(else_, scope)?;
                if then.arity() != else_.arity() {
                    return Err(ParseError::Arity(e.to_string()));
                }
                Expression::ite(self.formula(cond, scope)?, then, else_)
            }
        };
        Ok(resolved)
    }

    fn formula(&self, f: &Formula, scope: &Scope) -> Result<Formula, ParseError> {
        Ok(match f {
            Formula::Literal(_) => f.clone(),
            Formula::UnaryOp(op, t) => Formula::UnaryOp(*op, Box::new(self.formula(t, scope)?)),
            Formula::BinOp(op, lhs, rhs) => {
                Formula::binary(*op, self.formula(lhs, scope)?, self.formula(rhs, scope)?)
            }
            Formula::NAryOp(op, ts) => {
                let ts = ts
                    .iter()
                    .map(|t| self.formula(t, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Formula::NAryOp(*op, ts)
            }
            Formula::Compare(op, lhs, rhs) => {
                let lhs = self.expression(lhs, scope)?;
                let rhs = self.expression(rhs, scope)?;
                if lhs.arity() != rhs.arity() {
                    return Err(ParseError::Arity(f.to_string()));
                }
                Formula::Compare(*op, lhs, rhs)
            }
            Formula::Multiplicity(m, e) => Formula::Multiplicity(*m, self.expression(e, scope)?),
            Formula::Quantified {
                quantifier,
                decls,
                body,
            } => {
                let mut scope = scope.clone();
                let mut resolved = vec![];
                for d in decls {
                    let expr = self.expression(&d.expr, &scope)?;
                    let var = Variable {
                        name: d.var.name.clone(),
                        arity: expr.arity(),
                        mutable: d.var.mutable,
                    };
                    scope.insert(var.name.clone(), var.clone());
                    resolved.push(Decl::new(var, d.mult, expr));
                }
                Formula::quantify(*quantifier, resolved, self.formula(body, &scope)?)
            }
        })
    }
}

fn empty_universe() -> Universe {
    Universe::new(std::iter::empty::<String>())
}

/// Parse a formula over the given relations. Constants may name atoms of
/// `universe`, or refer to atoms by index as `#i`.
pub fn parse_formula(
    relations: &BTreeMap<String, Relation>,
    universe: Option<&Universe>,
    s: &str,
) -> Result<Formula, ParseError> {
    let empty = empty_universe();
    let f = parser::formula_only(s, universe.unwrap_or(&empty))?;
    Resolver { relations }.formula(&f, &Scope::new())
}

/// Parse an expression over the given relations.
pub fn parse_expression(
    relations: &BTreeMap<String, Relation>,
    universe: Option<&Universe>,
    s: &str,
) -> Result<Expression, ParseError> {
    let empty = empty_universe();
    let e = parser::expr_only(s, universe.unwrap_or(&empty))?;
    Resolver { relations }.expression(&e, &Scope::new())
}

fn tuple_set(relation: &Relation, tuples: Vec<Tuple>) -> Result<TupleSet, BoundsError> {
    if let Some(t) = tuples.iter().find(|t| t.len() != relation.arity) {
        return Err(BoundsError::ArityMismatch {
            relation: relation.name.clone(),
            expected: relation.arity,
            found: t.len(),
        });
    }
    Ok(TupleSet::from_tuples(relation.arity, tuples))
}

/// Parse a problem file.
pub fn parse_problem(s: &str) -> Result<Problem, ParseError> {
    let atoms = parser::universe_header(s, &empty_universe())?;
    for (i, a) in atoms.iter().enumerate() {
        if atoms[..i].contains(a) {
            return Err(ParseError::Duplicate(a.clone()));
        }
    }
    let universe = Arc::new(Universe::new(atoms));
    let items = parser::problem(s, &universe)?;

    let mut relations = BTreeMap::new();
    let mut declared = vec![];
    let mut facts = vec![];
    for item in items {
        match item {
            Item::Relation(raw) => {
                let relation = Relation::new(&raw.name, raw.arity, raw.mutable);
                if relations.insert(raw.name.clone(), relation.clone()).is_some() {
                    return Err(ParseError::Duplicate(raw.name));
                }
                declared.push((relation, raw.bound));
            }
            Item::Fact(f) => facts.push(f),
        }
    }

    let resolver = Resolver {
        relations: &relations,
    };
    let mut bounds = Bounds::new(universe);
    let mut symbolic = vec![];
    for (relation, bound) in declared {
        match bound {
            RawBound::Exact(ts) => bounds.bound_exactly(&relation, tuple_set(&relation, ts)?)?,
            RawBound::Range(lower, upper) => {
                let lower = tuple_set(&relation, lower)?;
                let upper = tuple_set(&relation, upper)?;
                bounds.bound(&relation, lower, upper)?
            }
            RawBound::Within(e) => symbolic.push((relation, e)),
        }
    }
    // symbolic bounds are approximated from the bounds declared before them
    for (relation, e) in symbolic {
        let e = resolver.expression(&e, &Scope::new())?;
        if e.arity() != relation.arity {
            return Err(ParseError::Arity(format!("bound of {}", relation.name)));
        }
        bounds.bound_within(&relation, e)?;
    }

    let facts = facts
        .iter()
        .map(|f| resolver.formula(f, &Scope::new()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Problem { bounds, facts })
}

/// Report a parse error as a diagnostic on the file being parsed.
pub fn parse_error_diagnostic<FileId>(file_id: FileId, e: &ParseError) -> Diagnostic<FileId> {
    match e {
        ParseError::Syntax(e) => Diagnostic::error()
            .with_message("could not parse file")
            .with_labels(vec![Label::primary(
                file_id,
                e.location.offset..e.location.offset + 1,
            )
            .with_message(format!("expected {}", e.expected))]),
        e => Diagnostic::error().with_message(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relations() -> BTreeMap<String, Relation> {
        [
            Relation::unary("A"),
            Relation::binary("next"),
            Relation::variable("p", 1),
            Relation::variable("q", 1),
        ]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect()
    }

    fn formula(s: &str) -> Formula {
        parse_formula(&relations(), None, s).expect("test formula should parse")
    }

    #[test]
    fn test_ident() {
        let u = empty_universe();
        assert_eq!(parser::ident("hello", &u), Ok("hello".to_string()));
        assert_eq!(parser::ident("A0", &u), Ok("A0".to_string()));
        assert_eq!(parser::ident("$X", &u), Ok("$X".to_string()));
        assert!(parser::ident("1up", &u).is_err());
        assert!(parser::ident("always", &u).is_err());
    }

    #[test]
    fn test_formula() {
        let p = Relation::variable("p", 1);
        let q = Relation::variable("q", 1);
        assert_eq!(
            formula("some p && no q || one p"),
            Formula::or([
                Formula::and([Formula::some(&p), Formula::no(&q)]),
                Formula::one(&p),
            ])
        );
        assert_eq!(
            formula("always p' in q"),
            Formula::always(Formula::subset(Expression::prime(&p), &q))
        );
        assert_eq!(
            formula("p != q"),
            Formula::not(Formula::equals(&p, &q))
        );
        assert_eq!(formula("(some p) && (no q)"), formula("some p && no q"));
        // always is treated as an atomic keyword
        assert!(parse_formula(&relations(), None, "alwaysp in q").is_err());
    }

    #[test]
    fn test_temporal_precedence() {
        assert_eq!(
            formula("some p until no q since one p"),
            formula("some p until (no q since one p)")
        );
        assert_eq!(
            formula("always some p => eventually no q"),
            formula("(always some p) => (eventually no q)")
        );
        assert_eq!(
            formula("some p => no q => one p"),
            formula("some p => (no q => one p)")
        );
    }

    #[test]
    fn test_quantifiers_resolve_arity() {
        let f = formula("all x: A, y: x.next | some X: set next | x->y in X");
        let Formula::Quantified { decls, body, .. } = &f else {
            panic!("expected a quantifier: {f:?}");
        };
        assert_eq!(decls[0].var, Variable::new("x", 1));
        assert_eq!(decls[1].var, Variable::new("y", 1));
        let Formula::Quantified { decls, .. } = body.as_ref() else {
            panic!("expected a nested quantifier");
        };
        assert_eq!(decls[0].var, Variable::new("X", 2));
        assert_eq!(decls[0].mult, Multiplicity::Set);
    }

    #[test]
    fn test_resolution_errors() {
        assert_eq!(
            parse_formula(&relations(), None, "some r"),
            Err(ParseError::Unbound("r".to_string()))
        );
        assert!(matches!(
            parse_formula(&relations(), None, "next in A"),
            Err(ParseError::Arity(_))
        ));
        assert!(matches!(
            parse_formula(&relations(), None, "some p &&"),
            Err(ParseError::Syntax(_))
        ));
    }

    #[test]
    fn test_constants() {
        let u = Universe::new(["A0", "A1"]);
        let e = parse_expression(&relations(), Some(&u), "{(A0, A1), (A1, A1)} + next").unwrap();
        assert_eq!(
            e,
            Expression::union(
                TupleSet::from_tuples(2, [vec![0, 1], vec![1, 1]]),
                Relation::binary("next")
            )
        );
        assert_eq!(
            parse_expression(&relations(), None, "{#1}").unwrap(),
            Expression::Constant(TupleSet::singleton(vec![1]))
        );
        assert!(parse_expression(&relations(), Some(&u), "{(A0), (A0, A1)}").is_err());
        assert!(parse_expression(&relations(), Some(&u), "{A2}").is_err());
    }

    #[test]
    fn test_problem() {
        let problem = parse_problem(
            r"
// a counter going around a ring
universe A0 A1 A2
static next: 2 = {(A0, A1), (A1, A2), (A2, A0)}
var p: 1 >= {} <= {A0, A1, A2}
var q: 1 within p
fact one p
fact always p' = p.next
",
        )
        .unwrap();
        assert_eq!(problem.facts.len(), 2);
        assert_eq!(problem.bounds.universe().size(), 3);
        let p = Relation::variable("p", 1);
        let q = Relation::variable("q", 1);
        assert_eq!(problem.bounds.upper(&p).map(|ts| ts.len()), Some(3));
        assert_eq!(problem.bounds.upper(&q).map(|ts| ts.len()), Some(3));
        assert_eq!(problem.bounds.resolve(), Formula::always(Formula::subset(&q, &p)));
        assert!(problem.bounds.get(&Relation::binary("next")).unwrap().is_exact());
    }

    #[test]
    fn test_problem_errors() {
        assert_eq!(
            parse_problem("universe A A").unwrap_err(),
            ParseError::Duplicate("A".to_string())
        );
        assert!(matches!(
            parse_problem("universe A B\nstatic r: 2 = {(A)}"),
            Err(ParseError::Bounds(BoundsError::ArityMismatch { .. }))
        ));
        assert!(matches!(
            parse_problem("universe A\nfact some r"),
            Err(ParseError::Unbound(_))
        ));
    }
}
