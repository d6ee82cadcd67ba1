// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! A temporal problem translated at one trace length.

use std::time::Instant;

use relational::{
    bounds::Bounds,
    instance::TemporalInstance,
    syntax::{Formula, Relation},
    universe::{Tuple, TupleSet},
};
use translator::{
    circuit::Bool,
    sat::Interrupt,
    translate::{Translation, TranslationStats},
};

use crate::{
    error::SolveError,
    expand::{expand_bounds, expand_formula, expand_with, Bindings, ExpandedBounds},
    options::{IterationEncoding, Options},
    reporter::Event,
    solution::Statistics,
};

/// Membership of a tuple in an expanded relation, or its negation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// A relation of the expanded problem
    pub relation: Relation,
    /// A tuple in its upper bound
    pub tuple: Tuple,
    /// Whether the tuple is in the relation
    pub positive: bool,
}

impl Literal {
    fn formula(&self) -> Formula {
        let f = Formula::subset(TupleSet::singleton(self.tuple.clone()), &self.relation);
        if self.positive {
            f
        } else {
            Formula::not(f)
        }
    }
}

/// A constraint over expanded relations, used to block seen solutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// At least one of the literals holds; a single literal pins a value
    Clause(Vec<Literal>),
    /// Unsatisfiable at this trace length
    Vacuous,
}

/// A temporal formula expanded and translated at a fixed trace length.
pub struct TemporalTranslation {
    expanded: ExpandedBounds,
    translation: Translation,
    past_depth: usize,
}

impl TemporalTranslation {
    /// Expand `formula` and `bounds` to `length` states and translate them.
    /// Each top-level conjunct of `formula` is a separate root, reported
    /// as itself in cores.
    pub fn new(
        formula: &Formula,
        bounds: &Bounds,
        length: usize,
        candidate: Option<&TemporalInstance>,
        options: &Options,
        interrupt: &Interrupt,
    ) -> Result<Self, SolveError> {
        options.reporter.report(&Event::Translating { length });
        let past_depth = formula.past_depth();
        let expanded = expand_bounds(bounds, length, past_depth, candidate)?;
        let mut translation =
            Translation::new(expanded.bounds().clone(), &options.solver, interrupt);
        translation.assert_formula(&expanded.loop_constraint())?;
        for conjunct in formula.conjuncts() {
            let e = expand_formula(&conjunct, &expanded, past_depth);
            translation.assert_labeled(&e, conjunct)?;
        }
        let stats = translation.statistics();
        log::debug!(
            "translated at length {length}: {} primary variables, {} variables, {} clauses{}",
            stats.primary_variables,
            stats.variables,
            stats.clauses,
            if translation.is_trivial() { " (trivial)" } else { "" },
        );
        Ok(Self {
            expanded,
            translation,
            past_depth,
        })
    }

    /// The trace length.
    pub fn length(&self) -> usize {
        self.expanded.length()
    }

    /// The expanded bounds.
    pub fn expanded(&self) -> &ExpandedBounds {
        &self.expanded
    }

    /// Whether the problem is decided without the SAT solver.
    pub fn is_trivial(&self) -> bool {
        self.translation.is_trivial()
    }

    /// Whether the problem has a solution at this length.
    pub fn solve(&mut self) -> Result<bool, SolveError> {
        Ok(self.translation.solve()?)
    }

    /// The trace of the last solution.
    pub fn instance(&self) -> Result<TemporalInstance, SolveError> {
        Ok(self.expanded.interpret(&self.translation.instance())?)
    }

    /// The core of the last unsatisfiable result, over the original
    /// conjuncts.
    pub fn core(&self) -> Option<Vec<Formula>> {
        self.translation.core()
    }

    /// Size of the current encoding.
    pub fn statistics(&self) -> TranslationStats {
        self.translation.statistics()
    }

    /// The circuit of a tuple of a relation in a state.
    pub fn variable(&self, relation: &Relation, state: usize, tuple: &[usize]) -> Bool {
        let r = self.expanded.state_relation(relation, state);
        self.translation.variable(&r, tuple)
    }

    /// The circuit deciding whether the trace loops back to `state`.
    pub fn loop_variable(&self, state: usize) -> Bool {
        self.translation.variable(
            self.expanded.loop_relation(),
            &[self.expanded.time_atom(state)],
        )
    }

    fn literal(&self, lit: &Literal) -> Bool {
        let b = self.translation.variable(&lit.relation, &lit.tuple);
        if lit.positive {
            b
        } else {
            b.not()
        }
    }

    /// Add a blocking constraint.
    pub fn apply(&mut self, c: &Constraint, encoding: IterationEncoding) -> Result<(), SolveError> {
        match (c, encoding) {
            (Constraint::Vacuous, _) => self.translation.assert_bool(&Bool::Const(false)),
            (Constraint::Clause(lits), IterationEncoding::Sat) => {
                let clause = Bool::or(lits.iter().map(|l| self.literal(l)));
                self.translation.assert_bool(&clause);
            }
            (Constraint::Clause(lits), IterationEncoding::Formula) => {
                let f = Formula::or(lits.iter().map(|l| l.formula()));
                self.translation.assert_formula(&f)?;
            }
        }
        Ok(())
    }

    /// Conjoin a temporal formula over the original relations, which is
    /// not reported in cores.
    pub fn extend(&mut self, formula: &Formula) -> Result<(), SolveError> {
        let past_depth = formula.past_depth().max(self.past_depth);
        let e = expand_formula(formula, &self.expanded, past_depth);
        self.translation.assert_formula(&e)?;
        Ok(())
    }

    /// Conjoin a temporal formula whose free variables have a value in
    /// each state, on lassos looping to `loops` only.
    pub fn extend_with(
        &mut self,
        formula: &Formula,
        bindings: &Bindings,
        loops: &[usize],
    ) -> Result<(), SolveError> {
        let past_depth = formula.past_depth().max(self.past_depth);
        let e = expand_with(formula, &self.expanded, past_depth, bindings, loops);
        self.translation.assert_formula(&e)?;
        Ok(())
    }
}

/// Translate, time the translation, and account for it in `statistics`.
pub(crate) fn timed_translation(
    formula: &Formula,
    bounds: &Bounds,
    length: usize,
    candidate: Option<&TemporalInstance>,
    options: &Options,
    interrupt: &Interrupt,
    statistics: &mut Statistics,
) -> Result<TemporalTranslation, SolveError> {
    let start = Instant::now();
    let t = TemporalTranslation::new(formula, bounds, length, candidate, options, interrupt)?;
    statistics.translation_time += start.elapsed();
    statistics.trace_lengths.push(length);
    Ok(t)
}

/// Solve, time the call, and account for it in `statistics`.
pub(crate) fn timed_solve(
    t: &mut TemporalTranslation,
    options: &Options,
    statistics: &mut Statistics,
) -> Result<bool, SolveError> {
    let before = t.statistics();
    options.reporter.report(&Event::Solving {
        length: t.length(),
        primary_variables: before.primary_variables,
        variables: before.variables,
        clauses: before.clauses,
    });
    let start = Instant::now();
    let result = t.solve();
    statistics.solving_time += start.elapsed();
    let after = t.statistics();
    statistics.sat_calls += after.sat_calls - before.sat_calls;
    statistics.primary_variables = after.primary_variables;
    statistics.variables = after.variables;
    statistics.clauses = after.clauses;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use relational::parser::parse_problem;
    use translator::sat::SatFactory;

    fn translation(text: &str, length: usize, options: &Options) -> TemporalTranslation {
        let problem = parse_problem(text).unwrap();
        TemporalTranslation::new(
            &problem.formula(),
            &problem.bounds,
            length,
            None,
            options,
            &Interrupt::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_solve_and_interpret() {
        let mut t = translation(
            "universe A0 A1
            var p: 1 <= {A0, A1}
            fact no p
            fact after some p
            fact always (some p => after no p)",
            3,
            &Options::default(),
        );
        assert!(t.solve().unwrap());
        let trace = t.instance().unwrap();
        assert_eq!(trace.prefix_length(), 3);
        let p = Relation::variable("p", 1);
        let sizes: Vec<usize> = (0..6).map(|i| trace.state(i).tuples(&p).unwrap().len()).collect();
        assert_eq!(sizes[0], 0);
        assert_ne!(sizes[1], 0);
        for i in 1..6 {
            assert!(sizes[i - 1] == 0 || sizes[i] == 0, "{sizes:?}");
        }
    }

    #[test]
    fn test_nested_operators_are_shared() {
        let variables = |fact: &str| {
            let text = format!(
                "universe A0 A1
                var p: 1 <= {{A0, A1}}
                fact {fact}"
            );
            translation(&text, 8, &Options::default()).statistics().variables
        };
        let single = variables("always eventually some p");
        let nested = variables("always eventually always eventually some p");
        // each operator is unrolled once per position and loop state
        assert!(nested < 5 * single, "{nested} >= 5 * {single}");
    }

    #[test]
    fn test_static_problem_is_trivial() {
        let mut t = translation(
            "universe A0 A1
            static r: 1 = {A0}
            fact some r
            fact r in univ",
            1,
            &Options::default(),
        );
        assert!(t.is_trivial());
        assert!(t.solve().unwrap());
        assert_eq!(t.statistics().sat_calls, 0);
    }

    #[test]
    fn test_core_over_original_conjuncts() {
        let options = Options::default().with_solver(SatFactory::CadicalProver);
        let mut t = translation(
            "universe A0 A1
            var p: 1 <= {A0, A1}
            var q: 1 <= {A0, A1}
            fact eventually some p
            fact always no p
            fact always lone q",
            2,
            &options,
        );
        assert!(!t.solve().unwrap());
        let core: Vec<String> = t
            .core()
            .unwrap()
            .iter()
            .map(relational::printer::formula)
            .collect();
        insta::assert_display_snapshot!(core.join("\n"), @r###"
        eventually some p
        always no p
        "###);
    }

    #[test]
    fn test_blocking_literals() {
        for encoding in [IterationEncoding::Sat, IterationEncoding::Formula] {
            let mut t = translation(
                "universe A0 A1
                static r: 1 <= {A0, A1}
                fact some r",
                1,
                &Options::default(),
            );
            let r = Relation::unary("r");
            // r = {A0} or r = {A1} or r = {A0, A1}
            let mut seen = 0;
            while t.solve().unwrap() {
                seen += 1;
                let trace = t.instance().unwrap();
                let value = trace.state(0).tuples(&r).unwrap().clone();
                let differ = (0..2)
                    .map(|a| Literal {
                        relation: r.clone(),
                        tuple: vec![a],
                        positive: !value.contains(&[a]),
                    })
                    .collect();
                t.apply(&Constraint::Clause(differ), encoding).unwrap();
            }
            assert_eq!(seen, 3);
            t.apply(&Constraint::Vacuous, encoding).unwrap();
            assert!(t.is_trivial());
        }
    }
}
