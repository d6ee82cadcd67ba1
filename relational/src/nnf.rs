// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Negation normal form.
//!
//! Negations are pushed down to comparisons and multiplicity formulas
//! through connectives, quantifiers and the temporal duals. Implications and
//! equivalences are eliminated on the way. `before` is the only temporal
//! operator without a dual in the language, so a negation stays on top of
//! it.

use crate::syntax::*;

/// Convert `formula` (negated if `negated` is true) to negation normal form.
pub fn nnf(formula: &Formula, negated: bool) -> Formula {
    match formula {
        Formula::Literal(b) => Formula::Literal(*b != negated),
        Formula::UnaryOp(op, t) => match op {
            UOp::Not => nnf(t, !negated),
            UOp::After => Formula::after(nnf(t, negated)),
            UOp::Before => {
                let f = Formula::before(nnf(t, false));
                if negated {
                    Formula::not(f)
                } else {
                    f
                }
            }
            UOp::Always | UOp::Eventually | UOp::Historically | UOp::Once => {
                let op = if negated { dual_uop(*op) } else { *op };
                Formula::UnaryOp(op, Box::new(nnf(t, negated)))
            }
        },
        Formula::BinOp(op, lhs, rhs) => match op {
            BinOp::Implies => {
                if negated {
                    Formula::and([nnf(lhs, false), nnf(rhs, true)])
                } else {
                    Formula::or([nnf(lhs, true), nnf(rhs, false)])
                }
            }
            BinOp::Iff => {
                let both = Formula::and([nnf(lhs, false), nnf(rhs, negated)]);
                let neither = Formula::and([nnf(lhs, true), nnf(rhs, !negated)]);
                Formula::or([both, neither])
            }
            BinOp::Until | BinOp::Releases | BinOp::Since | BinOp::Triggered => {
                let op = if negated { dual_binop(*op) } else { *op };
                Formula::binary(op, nnf(lhs, negated), nnf(rhs, negated))
            }
        },
        Formula::NAryOp(op, ts) => {
            let ts = ts.iter().map(|t| nnf(t, negated));
            match (op, negated) {
                (NOp::And, false) | (NOp::Or, true) => Formula::and(ts),
                (NOp::Or, false) | (NOp::And, true) => Formula::or(ts),
            }
        }
        Formula::Compare(op, lhs, rhs) => {
            let f = Formula::Compare(*op, nnf_expression(lhs), nnf_expression(rhs));
            if negated {
                Formula::not(f)
            } else {
                f
            }
        }
        Formula::Multiplicity(m, e) => {
            let e = nnf_expression(e);
            match (m, negated) {
                (_, false) => Formula::multiplicity(*m, e),
                (Multiplicity::No, true) => Formula::some(e),
                (Multiplicity::Some, true) => Formula::no(e),
                (Multiplicity::Set, true) => Formula::false_(),
                (_, true) => Formula::not(Formula::multiplicity(*m, e)),
            }
        }
        Formula::Quantified {
            quantifier,
            decls,
            body,
        } => {
            let quantifier = match (quantifier, negated) {
                (q, false) => *q,
                (Quantifier::Forall, true) => Quantifier::Exists,
                (Quantifier::Exists, true) => Quantifier::Forall,
            };
            let decls = decls
                .iter()
                .map(|d| Decl::new(d.var.clone(), d.mult, nnf_expression(&d.expr)));
            Formula::quantify(quantifier, decls, nnf(body, negated))
        }
    }
}

/// Put the formulas nested in an expression (conditions of `if`) in
/// negation normal form. The condition, the then branch and the else branch
/// are independent subtrees.
pub fn nnf_expression(e: &Expression) -> Expression {
    match e {
        Expression::UnaryOp(op, e) => Expression::UnaryOp(*op, Box::new(nnf_expression(e))),
        Expression::BinOp(op, lhs, rhs) => Expression::BinOp(
            *op,
            Box::new(nnf_expression(lhs)),
            Box::new(nnf_expression(rhs)),
        ),
        Expression::Ite(cond, then, else_) => Expression::Ite(
            Box::new(nnf(cond, false)),
            Box::new(nnf_expression(then)),
            Box::new(nnf_expression(else_)),
        ),
        _ => e.clone(),
    }
}

fn dual_uop(op: UOp) -> UOp {
    match op {
        UOp::Always => UOp::Eventually,
        UOp::Eventually => UOp::Always,
        UOp::Historically => UOp::Once,
        UOp::Once => UOp::Historically,
        op => op,
    }
}

fn dual_binop(op: BinOp) -> BinOp {
    match op {
        BinOp::Until => BinOp::Releases,
        BinOp::Releases => BinOp::Until,
        BinOp::Since => BinOp::Triggered,
        BinOp::Triggered => BinOp::Since,
        op => op,
    }
}

impl Formula {
    /// This formula in negation normal form.
    pub fn nnf(&self) -> Formula {
        nnf(self, false)
    }
}
