// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Pretty printing of formulas, expressions and instances, in the same
//! syntax the parser accepts.

use std::fmt;

use crate::{
    instance::{Instance, TemporalInstance},
    parser::Problem,
    syntax::*,
    universe::{TupleSet, Universe},
};

fn precedence(f: &Formula) -> usize {
    match f {
        Formula::Quantified { .. } => 0,
        Formula::BinOp(BinOp::Iff, _, _) => 5,
        Formula::BinOp(BinOp::Implies, _, _) => 10,
        Formula::NAryOp(NOp::Or, ts) if ts.len() > 1 => 20,
        Formula::NAryOp(NOp::And, ts) if ts.len() > 1 => 30,
        Formula::BinOp(_, _, _) => 40,
        // printed as `a !in b` or `a != b`
        Formula::UnaryOp(UOp::Not, t) if matches!(**t, Formula::Compare(..)) => 1000,
        Formula::UnaryOp(_, _) => 50,
        Formula::NAryOp(_, _) | Formula::Literal(_) => 1000,
        Formula::Compare(..) | Formula::Multiplicity(..) => 1000,
    }
}

fn expr_precedence(e: &Expression) -> usize {
    match e {
        Expression::Ite(..) => 0,
        Expression::BinOp(ExprBinOp::Union | ExprBinOp::Difference, _, _) => 10,
        Expression::BinOp(ExprBinOp::Override, _, _) => 20,
        Expression::BinOp(ExprBinOp::Intersection, _, _) => 30,
        Expression::BinOp(ExprBinOp::Product, _, _) => 40,
        Expression::BinOp(ExprBinOp::Join, _, _) => 50,
        Expression::UnaryOp(ExprUOp::Prime, _) => 70,
        Expression::UnaryOp(_, _) => 60,
        Expression::None(arity) if *arity != 1 => 40,
        Expression::Constant(ts) if ts.is_empty() && ts.arity() != 1 => 40,
        _ => 1000,
    }
}

fn parens(add_parens: bool, s: String) -> String {
    if add_parens {
        format!("({s})")
    } else {
        s
    }
}

fn right_associative(op: &BinOp) -> bool {
    !matches!(op, BinOp::Iff)
}

fn left_associative(op: &BinOp) -> bool {
    matches!(op, BinOp::Iff)
}

/// Prints atoms by name when a universe is known and as `#index`
/// otherwise.
#[derive(Clone, Copy)]
struct Printer<'a> {
    universe: Option<&'a Universe>,
}

impl<'a> Printer<'a> {
    fn atom(&self, a: usize) -> String {
        match self.universe {
            Some(u) if a < u.size() => u.atom(a).to_string(),
            _ => format!("#{a}"),
        }
    }

    fn tuple_set(&self, ts: &TupleSet) -> String {
        let tuples = ts
            .iter()
            .map(|t| {
                let atoms = t.iter().map(|&a| self.atom(a)).collect::<Vec<_>>();
                format!("({})", atoms.join(", "))
            })
            .collect::<Vec<_>>();
        format!("{{{}}}", tuples.join(", "))
    }

    fn decl(&self, d: &Decl) -> String {
        let var = if d.var.mutable { "var " } else { "" };
        let mult = match d.mult {
            Multiplicity::One => "",
            Multiplicity::No => "no ",
            Multiplicity::Lone => "lone ",
            Multiplicity::Some => "some ",
            Multiplicity::Set => "set ",
        };
        format!("{var}{}: {mult}{}", d.var.name, self.expression(&d.expr))
    }

    fn expression(&self, e: &Expression) -> String {
        match e {
            Expression::Relation(r) => r.name.clone(),
            Expression::Var(v) => v.name.clone(),
            Expression::Univ => "univ".to_string(),
            Expression::Iden => "iden".to_string(),
            Expression::None(arity) => none(*arity),
            Expression::Constant(ts) if ts.is_empty() => none(ts.arity()),
            Expression::Constant(ts) => self.tuple_set(ts),
            Expression::UnaryOp(op, arg) => {
                let arg = parens(
                    expr_precedence(e) > expr_precedence(arg),
                    self.expression(arg),
                );
                match op {
                    ExprUOp::Transpose => format!("~{arg}"),
                    ExprUOp::Closure => format!("^{arg}"),
                    ExprUOp::ReflexiveClosure => format!("*{arg}"),
                    ExprUOp::Prime => format!("{arg}'"),
                }
            }
            Expression::BinOp(op, lhs, rhs) => {
                // every binary operator parses left-associatively
                let left = parens(
                    expr_precedence(e) > expr_precedence(lhs),
                    self.expression(lhs),
                );
                let right = parens(
                    expr_precedence(e) >= expr_precedence(rhs),
                    self.expression(rhs),
                );
                match op {
                    ExprBinOp::Union => format!("{left} + {right}"),
                    ExprBinOp::Intersection => format!("{left} & {right}"),
                    ExprBinOp::Difference => format!("{left} - {right}"),
                    ExprBinOp::Override => format!("{left} ++ {right}"),
                    ExprBinOp::Join => format!("{left}.{right}"),
                    ExprBinOp::Product => format!("{left}->{right}"),
                }
            }
            Expression::Ite(cond, then, else_) => format!(
                "if {} then {} else {}",
                self.formula(cond),
                parens(expr_precedence(then) == 0, self.expression(then)),
                self.expression(else_)
            ),
        }
    }

    fn formula(&self, f: &Formula) -> String {
        match f {
            Formula::Literal(false) => "false".to_string(),
            Formula::Literal(true) => "true".to_string(),
            Formula::UnaryOp(op, arg) => {
                if let (UOp::Not, Formula::Compare(op, lhs, rhs)) = (op, &**arg) {
                    let op = match op {
                        CompareOp::Subset => "!in",
                        CompareOp::Equals => "!=",
                    };
                    return format!("{} {op} {}", self.expression(lhs), self.expression(rhs));
                }
                let arg = parens(precedence(f) > precedence(arg), self.formula(arg));
                match op {
                    UOp::Not => format!("!{arg}"),
                    UOp::Always => format!("always {arg}"),
                    UOp::Eventually => format!("eventually {arg}"),
                    UOp::After => format!("after {arg}"),
                    UOp::Historically => format!("historically {arg}"),
                    UOp::Once => format!("once {arg}"),
                    UOp::Before => format!("before {arg}"),
                }
            }
            Formula::BinOp(op, arg1, arg2) => {
                let use_left_paren = precedence(f) > precedence(arg1)
                    || (precedence(f) == precedence(arg1) && right_associative(op));
                let use_right_paren = precedence(f) > precedence(arg2)
                    || (precedence(f) == precedence(arg2) && left_associative(op));
                let left = parens(use_left_paren, self.formula(arg1));
                let right = parens(use_right_paren, self.formula(arg2));
                let op = match op {
                    BinOp::Implies => "=>",
                    BinOp::Iff => "<=>",
                    BinOp::Until => "until",
                    BinOp::Releases => "releases",
                    BinOp::Since => "since",
                    BinOp::Triggered => "triggered",
                };
                format!("{left} {op} {right}")
            }
            Formula::NAryOp(op, args) => match (op, args.len()) {
                (NOp::And, 0) => "true".to_string(),
                (NOp::Or, 0) => "false".to_string(),
                (_, 1) => self.formula(&args[0]),
                _ => {
                    let args = args
                        .iter()
                        .map(|arg| parens(precedence(f) >= precedence(arg), self.formula(arg)))
                        .collect::<Vec<_>>();
                    let op = match op {
                        NOp::And => "&&",
                        NOp::Or => "||",
                    };
                    args.join(&format!(" {op} "))
                }
            },
            Formula::Compare(op, lhs, rhs) => {
                let op = match op {
                    CompareOp::Subset => "in",
                    CompareOp::Equals => "=",
                };
                format!("{} {op} {}", self.expression(lhs), self.expression(rhs))
            }
            Formula::Multiplicity(m, e) => {
                let m = match m {
                    Multiplicity::No => "no",
                    Multiplicity::Lone => "lone",
                    Multiplicity::One => "one",
                    Multiplicity::Some => "some",
                    Multiplicity::Set => return "true".to_string(),
                };
                format!("{m} {}", parens(expr_precedence(e) == 0, self.expression(e)))
            }
            Formula::Quantified {
                quantifier,
                decls,
                body,
            } => {
                let quantifier = match quantifier {
                    Quantifier::Forall => "all",
                    Quantifier::Exists => "some",
                };
                let decls = decls.iter().map(|d| self.decl(d)).collect::<Vec<_>>();
                format!("{quantifier} {} | {}", decls.join(", "), self.formula(body))
            }
        }
    }

    fn instance(&self, instance: &Instance, indent: &str) -> String {
        instance
            .iter()
            .map(|(r, ts)| format!("{indent}{} = {}\n", r.name, self.tuple_set(ts)))
            .collect()
    }
}

fn none(arity: usize) -> String {
    if arity == 1 {
        "none".to_string()
    } else {
        vec!["none"; arity.max(1)].join("->")
    }
}

/// Print a formula. Constants are printed with atom indices.
pub fn formula(f: &Formula) -> String {
    Printer { universe: None }.formula(f)
}

/// Print a formula, naming the atoms of constants from `universe`.
pub fn formula_in(universe: &Universe, f: &Formula) -> String {
    Printer {
        universe: Some(universe),
    }
    .formula(f)
}

/// Print an expression. Constants are printed with atom indices.
pub fn expression(e: &Expression) -> String {
    Printer { universe: None }.expression(e)
}

/// Print a set of tuples using the atom names of `universe`.
pub fn tuple_set(universe: &Universe, ts: &TupleSet) -> String {
    Printer {
        universe: Some(universe),
    }
    .tuple_set(ts)
}

/// Print a whole problem: the universe, one declaration per relation and
/// one line per fact.
pub fn problem(p: &Problem) -> String {
    let universe = p.bounds.universe();
    let printer = Printer {
        universe: Some(universe),
    };
    let mut out = format!("universe {}\n", universe.atoms().join(" "));
    // symbolic bounds refer to other relations, so they come last
    let (symbolic, concrete): (Vec<_>, Vec<_>) = p
        .bounds
        .iter()
        .partition(|(r, _)| p.bounds.symbolic(r).is_some());
    for (r, b) in concrete.into_iter().chain(symbolic) {
        let kind = if r.mutable { "var" } else { "static" };
        let bound = if let Some(e) = p.bounds.symbolic(r) {
            format!("within {}", printer.expression(e))
        } else if b.is_exact() {
            format!("= {}", printer.tuple_set(&b.upper))
        } else if b.lower.is_empty() {
            format!("<= {}", printer.tuple_set(&b.upper))
        } else {
            format!(
                ">= {} <= {}",
                printer.tuple_set(&b.lower),
                printer.tuple_set(&b.upper)
            )
        };
        out.push_str(&format!("{kind} {}: {} {bound}\n", r.name, r.arity));
    }
    for f in &p.facts {
        out.push_str(&format!("fact {}\n", printer.formula(f)));
    }
    out
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", formula(self))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", expression(self))
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printer = Printer {
            universe: Some(self.universe()),
        };
        write!(f, "{}", printer.instance(self, ""))
    }
}

impl fmt::Display for TemporalInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printer = Printer {
            universe: Some(self.universe()),
        };
        for (i, state) in self.states().iter().enumerate() {
            let marker = if i == self.loop_state() { " <- loop" } else { "" };
            writeln!(f, "state {i}{marker}")?;
            write!(f, "{}", printer.instance(state, "  "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_formula;
    use std::{collections::BTreeMap, sync::Arc};

    fn relations() -> BTreeMap<String, Relation> {
        [
            Relation::unary("A"),
            Relation::binary("next"),
            Relation::variable("p", 1),
            Relation::variable("q", 1),
            Relation::variable("r", 1),
        ]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect()
    }

    fn parse(s: &str) -> Formula {
        parse_formula(&relations(), None, s).expect("test formula should parse")
    }

    fn reprint(s: &str) -> String {
        formula(&parse(s))
    }

    #[test]
    fn test_printer_basic() {
        let f = parse("some p && no q || one r");
        insta::assert_display_snapshot!(formula(&f), @"some p && no q || one r");
        assert_eq!(parse(&formula(&f)), f);
    }

    #[test]
    fn test_printer_nary() {
        for s in [
            "some p && some q && (some r || no p) && no q",
            "some p || some q || some r && no p",
        ] {
            assert_eq!(reprint(s), s, "{s} did not roundtrip through printer");
        }
    }

    #[test]
    fn test_printer_temporal() {
        insta::assert_display_snapshot!(
            reprint("(always some p) => (eventually no q)"),
            @"always some p => eventually no q");
        insta::assert_display_snapshot!(
            reprint("always (some p => after no q)"),
            @"always (some p => after no q)");
        insta::assert_display_snapshot!(
            reprint("some p until (no q releases one r)"),
            @"some p until no q releases one r");
        insta::assert_display_snapshot!(
            reprint("(some p until no q) since one r"),
            @"(some p until no q) since one r");
        insta::assert_display_snapshot!(
            reprint("!(p' in q)"),
            @"p' !in q");
    }

    #[test]
    fn test_printer_expressions() {
        insta::assert_display_snapshot!(
            reprint("all x: A | x.^next != (x + A).next'"),
            @"all x: A | x.^next != (x + A).next'");
        insta::assert_display_snapshot!(
            reprint("some X: set A, var Y: lone p | X->Y in next - (A->A & next)"),
            @"some X: set A, var Y: lone p | X->Y in next - A->A & next");
        let s = "p = (if some q then q else A - q) + r";
        assert_eq!(parse(&reprint(s)), parse(s));
    }

    #[test]
    fn test_print_trace() {
        let u = Arc::new(Universe::new(["A0", "A1"]));
        let p = Relation::variable("p", 1);
        let states = [vec![], vec![vec![0], vec![1]]]
            .into_iter()
            .map(|ts| {
                let mut i = Instance::new(u.clone());
                i.add(p.clone(), TupleSet::from_tuples(1, ts));
                i
            })
            .collect();
        let trace = TemporalInstance::new(states, 1).unwrap();
        insta::assert_display_snapshot!(trace.to_string().trim_end(), @r###"
        state 0
          p = {}
        state 1 <- loop
          p = {(A0), (A1)}
        "###);
    }

    #[test]
    fn test_print_problem() {
        let text = "universe A0 A1
            static r: 2 >= {(A0, A1)} <= {(A0, A1), (A1, A0)}
            static s: 1 = {A1}
            var p: 1 within s
            fact some p && r.r in iden";
        let p = crate::parser::parse_problem(text).unwrap();
        let printed = problem(&p);
        insta::assert_display_snapshot!(printed.trim_end(), @r###"
        universe A0 A1
        static r: 2 >= {(A0, A1)} <= {(A0, A1), (A1, A0)}
        static s: 1 = {(A1)}
        var p: 1 within s
        fact some p && r.r in iden
        "###);
        let reparsed = crate::parser::parse_problem(&printed).unwrap();
        assert_eq!(reparsed.facts, p.facts);
    }
}
