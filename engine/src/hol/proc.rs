// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Classification of higher-order formulas.

use fxhash::FxHashMap;

use relational::{
    bounds::{Bounds, BoundsError},
    printer,
    syntax::{Decl, Expression, Formula, NOp, Quantifier, Relation, Variable},
    universe::TupleSet,
};

use crate::error::{HolError, SolveError};

/// Fresh names for skolem relations, scoped to one solve.
#[derive(Debug, Default)]
pub struct Supply {
    used: FxHashMap<String, usize>,
}

impl Supply {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// `$name` the first time, then `$name1`, `$name2`, ...
    pub fn fresh(&mut self, name: &str) -> String {
        let count = self.used.entry(name.to_string()).or_insert(0);
        let fresh = if *count == 0 {
            format!("${name}")
        } else {
            format!("${name}{count}")
        };
        *count += 1;
        fresh
    }
}

/// A top-level universal over higher-order variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universal {
    /// The quantified variables, at least one of them higher-order
    pub decls: Vec<Decl>,
    /// The quantified formula
    pub body: Formula,
}

impl Universal {
    /// `all decls | body`
    pub fn formula(&self) -> Formula {
        Formula::forall(self.decls.clone(), self.body.clone())
    }

    /// Whether some declared variable ranges over traces.
    pub fn is_mutable(&self) -> bool {
        self.decls.iter().any(|d| d.var.mutable)
    }
}

/// How a formula is solved.
#[derive(Debug, Clone)]
pub enum Proc {
    /// Translated directly
    Fol {
        /// A formula with no higher-order quantifier
        formula: Formula,
        /// Bounds including the skolem relations the formula mentions
        bounds: Bounds,
    },
    /// `rest && all universals`, by a candidate/verify loop
    Some4All {
        /// Bounds including the skolem relations of the candidate
        bounds: Bounds,
        /// Checked against each candidate
        universals: Vec<Universal>,
        /// The first-order part
        rest: Formula,
    },
    /// Satisfiable if some alternative is
    Or {
        /// Tried in order
        alternatives: Vec<Proc>,
    },
}

fn merge(lhs: Bounds, rhs: &Bounds) -> Result<Bounds, BoundsError> {
    let mut bounds = lhs;
    for (r, b) in rhs.iter() {
        if !bounds.contains(r) {
            bounds.bound(r, b.lower.clone(), b.upper.clone())?;
        }
    }
    Ok(bounds)
}

impl Proc {
    /// The conjunction of two problems. Disjunctions are distributed over.
    pub fn and(self, other: Proc) -> Result<Proc, SolveError> {
        Ok(match (self, other) {
            (Proc::Or { alternatives }, p) | (p, Proc::Or { alternatives }) => Proc::Or {
                alternatives: alternatives
                    .into_iter()
                    .map(|a| a.and(p.clone()))
                    .collect::<Result<_, _>>()?,
            },
            (Proc::Fol { formula: f1, bounds: b1 }, Proc::Fol { formula: f2, bounds: b2 }) => {
                Proc::Fol {
                    formula: Formula::and([f1, f2]),
                    bounds: merge(b1, &b2)?,
                }
            }
            (
                Proc::Fol { formula, bounds: b1 },
                Proc::Some4All {
                    bounds: b2,
                    universals,
                    rest,
                },
            )
            | (
                Proc::Some4All {
                    bounds: b2,
                    universals,
                    rest,
                },
                Proc::Fol { formula, bounds: b1 },
            ) => Proc::Some4All {
                bounds: merge(b2, &b1)?,
                universals,
                rest: Formula::and([rest, formula]),
            },
            (
                Proc::Some4All {
                    bounds: b1,
                    universals: mut u1,
                    rest: r1,
                },
                Proc::Some4All {
                    bounds: b2,
                    universals: u2,
                    rest: r2,
                },
            ) => {
                u1.extend(u2);
                Proc::Some4All {
                    bounds: merge(b1, &b2)?,
                    universals: u1,
                    rest: Formula::and([r1, r2]),
                }
            }
        })
    }

    /// Collapse a disjunction whose alternatives are all first-order into a
    /// single first-order problem over the skolem relations of every
    /// alternative. Other problems are returned unchanged.
    pub fn flatten(self) -> Result<Proc, SolveError> {
        let Proc::Or { alternatives } = self else {
            return Ok(self);
        };
        let alternatives = alternatives
            .into_iter()
            .map(Proc::flatten)
            .collect::<Result<Vec<_>, _>>()?;
        if !alternatives.iter().all(|a| matches!(a, Proc::Fol { .. })) {
            return Ok(Proc::Or { alternatives });
        }
        let mut formulas = vec![];
        let mut merged: Option<Bounds> = None;
        for a in alternatives {
            if let Proc::Fol { formula, bounds } = a {
                formulas.push(formula);
                merged = Some(match merged {
                    Some(m) => merge(m, &bounds)?,
                    None => bounds,
                });
            }
        }
        match merged {
            Some(bounds) => Ok(Proc::Fol {
                formula: Formula::or(formulas),
                bounds,
            }),
            None => Ok(Proc::Or {
                alternatives: vec![],
            }),
        }
    }

    /// The bounds of a conjunctive problem.
    pub fn bounds(&self) -> Option<&Bounds> {
        match self {
            Proc::Fol { bounds, .. } | Proc::Some4All { bounds, .. } => Some(bounds),
            Proc::Or { .. } => None,
        }
    }
}

/// Replace the variables of `decls` by fresh relations, bounded by the
/// upper approximation of their domains and added to `bounds`. Returns the
/// declaration constraints conjoined with `body`, over the new relations,
/// and the variable each relation stands for.
pub fn skolemize(
    decls: &[Decl],
    body: &Formula,
    bounds: &mut Bounds,
    supply: &mut Supply,
) -> Result<(Formula, Vec<(Variable, Relation)>), SolveError> {
    let mut substitution = im::HashMap::new();
    let mut constraints = vec![];
    let mut skolems = vec![];
    for d in decls {
        let domain = d.expr.map_vars(&|v: &Variable| substitution.get(v).cloned());
        let upper = bounds
            .upper_approximation(&domain)
            .map_err(|e| HolError::Unsupported(format!("{}: {e}", printer::expression(&domain))))?;
        let relation = Relation::new(&supply.fresh(&d.var.name), upper.arity(), d.var.mutable);
        bounds.bound(&relation, TupleSet::empty(upper.arity()), upper)?;
        let value = Expression::Relation(relation.clone());
        constraints.push(Decl::new(d.var.clone(), d.mult, domain).constraint(&value));
        substitution.insert(d.var.clone(), value);
        skolems.push((d.var.clone(), relation));
    }
    constraints.push(body.substitute(&substitution));
    Ok((Formula::and(constraints), skolems))
}

/// Classify a formula in negation normal form.
pub fn to_proc(formula: &Formula, bounds: &Bounds, supply: &mut Supply) -> Result<Proc, SolveError> {
    if !formula.is_higher_order() {
        return Ok(Proc::Fol {
            formula: formula.clone(),
            bounds: bounds.clone(),
        });
    }
    match formula {
        Formula::NAryOp(NOp::And, ts) => {
            let mut proc = Proc::Fol {
                formula: Formula::true_(),
                bounds: bounds.clone(),
            };
            for t in ts {
                let next = to_proc(t, bounds, supply)?;
                proc = proc.and(next)?;
            }
            Ok(proc)
        }
        Formula::NAryOp(NOp::Or, ts) => Ok(Proc::Or {
            alternatives: ts
                .iter()
                .map(|t| to_proc(t, bounds, supply))
                .collect::<Result<_, _>>()?,
        }),
        Formula::Quantified {
            quantifier: Quantifier::Exists,
            decls,
            body,
        } => {
            let mut bounds = bounds.clone();
            let (f, _) = skolemize(decls, body, &mut bounds, supply)?;
            to_proc(&f, &bounds, supply)
        }
        Formula::Quantified {
            quantifier: Quantifier::Forall,
            decls,
            body,
        } if decls.iter().any(|d| d.is_higher_order()) => Ok(Proc::Some4All {
            bounds: bounds.clone(),
            universals: vec![Universal {
                decls: decls.clone(),
                body: body.as_ref().clone(),
            }],
            rest: Formula::true_(),
        }),
        _ => Err(HolError::Unsupported(printer::formula(formula)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relational::parser::parse_problem;

    fn classify(text: &str) -> Result<Proc, SolveError> {
        let problem = parse_problem(text).unwrap();
        to_proc(&problem.formula().nnf(), &problem.bounds, &mut Supply::new())
    }

    #[test]
    fn test_supply() {
        let mut supply = Supply::new();
        assert_eq!(supply.fresh("X"), "$X");
        assert_eq!(supply.fresh("X"), "$X1");
        assert_eq!(supply.fresh("Y"), "$Y");
        assert_eq!(supply.fresh("X"), "$X2");
    }

    #[test]
    fn test_existentials_are_skolemized() {
        let proc = classify(
            "universe A0 A1 A2
            static r: 1 <= {A0, A1}
            fact some X: set r | some X && X in r",
        )
        .unwrap();
        let Proc::Fol { formula, bounds } = proc else {
            panic!("expected a first-order problem");
        };
        let x = bounds.relations().find(|r| r.name == "$X").unwrap().clone();
        assert!(!x.mutable);
        assert_eq!(bounds.upper(&x).unwrap().len(), 2);
        insta::assert_display_snapshot!(formula, @"$X in r && some $X && $X in r");
    }

    #[test]
    fn test_universals() {
        let proc = classify(
            "universe A0 A1
            static r: 1 <= {A0, A1}
            fact some r
            fact some X: set univ | all Y: set univ | Y in X
            fact all Z: set r | no Z || some r",
        )
        .unwrap();
        let Proc::Some4All {
            bounds,
            universals,
            rest,
        } = proc
        else {
            panic!("expected a candidate/verify problem");
        };
        assert_eq!(universals.len(), 2);
        assert!(bounds.relations().any(|r| r.name == "$X"));
        insta::assert_display_snapshot!(rest, @"$X in univ && some r");
        insta::assert_display_snapshot!(universals[0].formula(), @"all Y: set univ | Y in $X");
    }

    #[test]
    fn test_disjunctions() {
        let proc = classify(
            "universe A0 A1
            static r: 1 <= {A0, A1}
            fact some r
            fact (some X: set r | no X) || (all Y: set r | Y in r)",
        )
        .unwrap();
        let Proc::Or { alternatives } = proc else {
            panic!("expected a disjunction");
        };
        assert!(matches!(alternatives[0], Proc::Fol { .. }));
        assert!(matches!(alternatives[1], Proc::Some4All { .. }));
    }

    #[test]
    fn test_flatten() {
        let proc = classify(
            "universe A0 A1
            static r: 1 <= {A0, A1}
            fact (some X: set r | no X) || (some Y: set r | Y = r)",
        )
        .unwrap();
        assert!(matches!(proc, Proc::Or { .. }));
        let Proc::Fol { formula, bounds } = proc.flatten().unwrap() else {
            panic!("expected a first-order problem");
        };
        assert!(matches!(formula, Formula::NAryOp(NOp::Or, _)));
        assert!(bounds.relations().any(|r| r.name == "$X"));
        assert!(bounds.relations().any(|r| r.name == "$Y"));

        // a higher-order alternative stays a split
        let proc = classify(
            "universe A0 A1
            static r: 1 <= {A0, A1}
            fact (some X: set r | no X) || (all Y: set r | Y in r)",
        )
        .unwrap();
        let Proc::Or { alternatives } = proc.flatten().unwrap() else {
            panic!("expected a disjunction");
        };
        assert_eq!(alternatives.len(), 2);
    }

    #[test]
    fn test_unsupported() {
        let e = classify(
            "universe A0 A1
            var p: 1 <= {A0, A1}
            fact always (some X: set univ | X = p)",
        )
        .unwrap_err();
        assert!(matches!(e, SolveError::Hol(HolError::Unsupported(_))));
    }
}
