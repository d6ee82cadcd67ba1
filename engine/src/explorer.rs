// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Enumeration of solutions.
//!
//! Every solution returned is remembered as an [`IterationStep`] and
//! excluded from later calls. A step says which part of the trace has to
//! change (a window of states and a set of relations) and which part has
//! to stay as it was. Steps are replayed whenever the problem is
//! retranslated at a longer trace length.

use std::collections::BTreeSet;

use relational::{
    bounds::Bounds,
    instance::TemporalInstance,
    syntax::{Formula, Relation},
};

use crate::{
    error::{ConfigError, SolveError},
    expand::ExpandedBounds,
    options::{IterationEncoding, Options},
    reporter::Event,
    solution::{Outcome, Solution, Statistics},
    temporal::{timed_solve, timed_translation, Constraint, Literal, TemporalTranslation},
};

/// The part of a trace a step is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Window {
    /// States `start..end`, or every state from `start` on if `end` is
    /// `None`
    States {
        start: usize,
        end: Option<usize>,
    },
    /// The static relations only
    Configuration,
}

/// A seen solution and how later solutions have to differ from it.
#[derive(Debug, Clone)]
pub struct IterationStep {
    solution: TemporalInstance,
    window: Window,
    fix: BTreeSet<Relation>,
    change: BTreeSet<Relation>,
}

impl IterationStep {
    /// Later solutions must agree with `solution` on `fix` and differ from
    /// it on `change` inside `window`.
    pub fn new(
        solution: TemporalInstance,
        window: Window,
        fix: BTreeSet<Relation>,
        change: BTreeSet<Relation>,
    ) -> Result<Self, ConfigError> {
        if let Some(r) = fix.intersection(&change).next() {
            return Err(ConfigError::FixAndChange(r.name.clone()));
        }
        Ok(Self {
            solution,
            window,
            fix,
            change,
        })
    }

    /// Later traces must differ from `solution` on some relation of
    /// `change` at some state, or loop differently.
    pub fn path(solution: TemporalInstance, change: BTreeSet<Relation>) -> Self {
        Self {
            solution,
            window: Window::States {
                start: 0,
                end: None,
            },
            fix: BTreeSet::new(),
            change,
        }
    }

    /// The window of the step.
    pub fn window(&self) -> Window {
        self.window
    }

    /// The constraints of this step on traces of the expanded length.
    pub fn constraints(&self, expanded: &ExpandedBounds) -> Vec<Constraint> {
        let length = expanded.length();
        let loops = self.solution.loops_at(length);
        let mut pins = vec![];
        let mut differ = vec![];
        for (r, b) in expanded.original().iter() {
            let states = if r.mutable { 0..length } else { 0..1 };
            for i in states {
                let Some(value) = self.solution.state(i).tuples(r) else {
                    continue;
                };
                let relation = expanded.state_relation(r, i);
                let literals = b.upper.iter().map(|t| Literal {
                    relation: relation.clone(),
                    tuple: t.clone(),
                    positive: value.contains(t),
                });
                match self.role(r, i) {
                    Role::Pin => pins.extend(literals.map(|l| Constraint::Clause(vec![l]))),
                    Role::Differ => differ.extend(literals.map(|l| Literal {
                        positive: !l.positive,
                        ..l
                    })),
                    Role::Free => (),
                }
            }
        }
        let loop_literal = |l: usize| Literal {
            relation: expanded.loop_relation().clone(),
            tuple: vec![expanded.time_atom(l)],
            positive: true,
        };
        match self.window {
            Window::States { end: None, .. } => {
                // no lasso of this length is the same trace
                if loops.is_empty() {
                    return vec![];
                }
                differ.extend((0..length).filter(|l| !loops.contains(l)).map(loop_literal));
                pins.push(Constraint::Clause(differ));
            }
            Window::States { end: Some(end), .. } => {
                if end > length || loops.is_empty() || differ.is_empty() {
                    return vec![Constraint::Vacuous];
                }
                pins.push(Constraint::Clause(loops.into_iter().map(loop_literal).collect()));
                pins.push(Constraint::Clause(differ));
            }
            Window::Configuration => {
                if differ.is_empty() {
                    return vec![Constraint::Vacuous];
                }
                pins.push(Constraint::Clause(differ));
            }
        }
        pins
    }

    fn role(&self, r: &Relation, state: usize) -> Role {
        match self.window {
            Window::States { start, end } => {
                let inside = state >= start && end.map_or(true, |end| state < end);
                if !r.mutable || inside {
                    if self.change.contains(r) {
                        Role::Differ
                    } else if self.fix.contains(r) || end.is_some() {
                        Role::Pin
                    } else {
                        Role::Free
                    }
                } else {
                    Role::Pin
                }
            }
            Window::Configuration if !r.mutable && self.change.contains(r) => Role::Differ,
            Window::Configuration => Role::Free,
        }
    }
}

enum Role {
    Pin,
    Differ,
    Free,
}

/// Exploration of the solutions of a problem.
pub trait Explorer {
    /// The next solution that differs from every previous one as a trace.
    fn next_p(&mut self) -> Result<Solution, SolveError>;

    /// The next solution that agrees with the last one everywhere except on
    /// `force` (every mutable relation if empty) in states
    /// `state..state + delta`, and differs from it there.
    fn next_s(
        &mut self,
        state: usize,
        delta: usize,
        force: &BTreeSet<Relation>,
    ) -> Result<Solution, SolveError>;

    /// The next solution with a different value of the static relations.
    fn next_c(&mut self) -> Result<Solution, SolveError>;

    /// Whether [`Explorer::next_p`] may still find a solution.
    fn has_next_p(&self) -> bool;

    /// Whether [`Explorer::next_c`] may still find a solution.
    fn has_next_c(&self) -> bool;

    /// Same as [`Explorer::has_next_p`].
    fn has_next(&self) -> bool {
        self.has_next_p()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unconstrained,
    Path,
    Segment,
    Configuration,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Unconstrained => "unconstrained",
            Stage::Path => "path",
            Stage::Segment => "segment",
            Stage::Configuration => "configuration",
        }
    }
}

/// Enumerates the solutions of a first-order problem. Created by
/// [`TemporalSolver::solve_all`](crate::solver::TemporalSolver::solve_all).
pub struct SolutionIterator {
    formula: Formula,
    bounds: Bounds,
    options: Options,
    static_problem: bool,
    stage: Stage,
    length: usize,
    translation: Option<TemporalTranslation>,
    history: Vec<IterationStep>,
    /// The last solution returned
    anchor: Option<TemporalInstance>,
    /// Whether the anchor still has to be excluded
    unblocked: bool,
    exhausted: bool,
    last_segment: usize,
}

impl SolutionIterator {
    pub(crate) fn new(formula: Formula, bounds: Bounds, options: Options) -> Self {
        let static_problem = !formula.is_temporal() && bounds.mutable_relations().next().is_none();
        let length = if static_problem {
            1
        } else {
            options.min_trace_length
        };
        Self {
            formula,
            bounds,
            options,
            static_problem,
            stage: Stage::Unconstrained,
            length,
            translation: None,
            history: vec![],
            anchor: None,
            unblocked: false,
            exhausted: false,
            last_segment: 0,
        }
    }

    /// Forget all steps and start again at the minimum trace length. The
    /// last solution is excluded again under the new mode.
    fn restart(&mut self) {
        log::debug!("discarding {} steps", self.history.len());
        self.history.clear();
        self.translation = None;
        if !self.static_problem {
            self.length = self.options.min_trace_length;
        }
        self.exhausted = false;
        self.unblocked = self.anchor.is_some();
    }

    fn unsat(&self, statistics: Statistics) -> Solution {
        Solution {
            outcome: Outcome::Unsat {
                trace_length: self.length,
                proof: None,
            },
            statistics,
        }
    }

    fn block(&mut self, step: IterationStep) -> Result<(), SolveError> {
        match (&mut self.translation, self.options.iteration_encoding) {
            (Some(t), IterationEncoding::Sat) => {
                for c in step.constraints(t.expanded()) {
                    t.apply(&c, IterationEncoding::Sat)?;
                }
            }
            _ => self.translation = None,
        }
        self.history.push(step);
        self.unblocked = false;
        Ok(())
    }

    fn translate(&self, statistics: &mut Statistics) -> Result<TemporalTranslation, SolveError> {
        let interrupt = self.options.call_interrupt();
        let mut t = timed_translation(
            &self.formula,
            &self.bounds,
            self.length,
            None,
            &self.options,
            &interrupt,
            statistics,
        )?;
        if !self.history.is_empty() {
            self.options.reporter.report(&Event::Blocking {
                length: self.length,
                steps: self.history.len(),
            });
        }
        for step in &self.history {
            for c in step.constraints(t.expanded()) {
                t.apply(&c, self.options.iteration_encoding)?;
            }
        }
        Ok(t)
    }

    /// Exclude the anchor as described by the arguments if it is not
    /// excluded yet, and find the next solution.
    fn advance(
        &mut self,
        window: Window,
        fix: BTreeSet<Relation>,
        change: BTreeSet<Relation>,
    ) -> Result<Solution, SolveError> {
        let mut statistics = Statistics::default();
        if self.exhausted {
            return Ok(self.unsat(statistics));
        }
        if self.unblocked {
            if let Some(anchor) = self.anchor.clone() {
                if change.is_empty() {
                    self.exhausted = true;
                    return Ok(self.unsat(statistics));
                }
                self.block(IterationStep::new(anchor, window, fix, change)?)?;
            }
        }
        loop {
            let mut t = match self.translation.take() {
                Some(t) => t,
                None => self.translate(&mut statistics)?,
            };
            if timed_solve(&mut t, &self.options, &mut statistics)? {
                let instance = t.instance()?;
                self.translation = Some(t);
                self.anchor = Some(instance.clone());
                self.unblocked = true;
                return Ok(Solution {
                    outcome: Outcome::Sat { instance },
                    statistics,
                });
            }
            if self.static_problem || self.length >= self.options.max_trace_length {
                self.exhausted = true;
                return Ok(self.unsat(statistics));
            }
            self.length += 1;
        }
    }

    fn all_relations(&self) -> BTreeSet<Relation> {
        self.bounds.relations().cloned().collect()
    }
}

impl Explorer for SolutionIterator {
    fn next_p(&mut self) -> Result<Solution, SolveError> {
        match self.stage {
            Stage::Segment => {
                return Err(ConfigError::ModeSwitch {
                    from: self.stage.name(),
                    to: Stage::Path.name(),
                }
                .into())
            }
            Stage::Configuration => self.restart(),
            Stage::Unconstrained | Stage::Path => (),
        }
        if self.anchor.is_some() {
            self.stage = Stage::Path;
        }
        let window = Window::States {
            start: 0,
            end: None,
        };
        self.advance(window, BTreeSet::new(), self.all_relations())
    }

    fn next_s(
        &mut self,
        state: usize,
        delta: usize,
        force: &BTreeSet<Relation>,
    ) -> Result<Solution, SolveError> {
        if delta < 1 {
            return Err(ConfigError::EmptySegment(delta).into());
        }
        if let Some(r) = force.iter().find(|r| !self.bounds.contains(r)) {
            return Err(ConfigError::UnknownRelation(r.name.clone()).into());
        }
        match self.stage {
            Stage::Path => {
                return Err(ConfigError::ModeSwitch {
                    from: self.stage.name(),
                    to: Stage::Segment.name(),
                }
                .into())
            }
            Stage::Configuration => self.restart(),
            Stage::Segment if state < self.last_segment => {
                // steps at or after the new segment no longer apply
                self.history.retain(|step| match step.window() {
                    Window::States { start, .. } => start < state,
                    Window::Configuration => true,
                });
                self.translation = None;
                let min = self.options.min_trace_length;
                self.length = state.max(min).min(self.options.max_trace_length);
                self.exhausted = false;
                self.unblocked = self.anchor.is_some();
            }
            Stage::Segment | Stage::Unconstrained => (),
        }
        if self.anchor.is_some() {
            self.stage = Stage::Segment;
            self.last_segment = state;
        }
        let change: BTreeSet<Relation> = if force.is_empty() {
            self.bounds.mutable_relations().cloned().collect()
        } else {
            force.clone()
        };
        let fix = self.all_relations().difference(&change).cloned().collect();
        let window = Window::States {
            start: state,
            end: Some(state + delta),
        };
        self.advance(window, fix, change)
    }

    fn next_c(&mut self) -> Result<Solution, SolveError> {
        match self.stage {
            Stage::Path | Stage::Segment => self.restart(),
            Stage::Unconstrained | Stage::Configuration => (),
        }
        self.stage = Stage::Configuration;
        let change = self.bounds.static_relations().cloned().collect();
        self.advance(Window::Configuration, BTreeSet::new(), change)
    }

    fn has_next_p(&self) -> bool {
        match self.stage {
            Stage::Unconstrained | Stage::Path => !self.exhausted,
            Stage::Segment => false,
            Stage::Configuration => self.anchor.is_some(),
        }
    }

    fn has_next_c(&self) -> bool {
        match self.stage {
            Stage::Unconstrained | Stage::Configuration => !self.exhausted,
            Stage::Path | Stage::Segment => self.anchor.is_some(),
        }
    }
}

impl Iterator for SolutionIterator {
    type Item = Result<Solution, SolveError>;

    /// The next solution of [`Explorer::next_p`]; ends at the first
    /// unsatisfiable result.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next_p() {
            return None;
        }
        match self.next_p() {
            Ok(solution) if solution.is_sat() => Some(Ok(solution)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::TemporalSolver;
    use relational::{parser::parse_problem, universe::TupleSet};

    fn iterator(text: &str, options: Options) -> SolutionIterator {
        let problem = parse_problem(text).unwrap();
        TemporalSolver::new(options)
            .solve_all(&problem.formula(), &problem.bounds)
            .unwrap()
    }

    fn value(solution: &Solution, name: &str, state: usize) -> TupleSet {
        let instance = solution.instance().unwrap();
        let (_, ts) = instance
            .state(state)
            .iter()
            .find(|(r, _)| r.name == name)
            .unwrap();
        ts.clone()
    }

    #[test]
    fn test_step_rejects_fix_and_change() {
        let problem = parse_problem("universe A0\nstatic r: 1 <= {A0}").unwrap();
        let r = problem.bounds.relations().next().unwrap().clone();
        let mut instance = relational::instance::Instance::new(problem.bounds.universe().clone());
        instance.add(r.clone(), TupleSet::empty(1));
        let step = IterationStep::new(
            TemporalInstance::constant(instance),
            Window::Configuration,
            BTreeSet::from([r.clone()]),
            BTreeSet::from([r]),
        );
        assert_eq!(step.unwrap_err(), ConfigError::FixAndChange("r".to_string()));
    }

    #[test]
    fn test_path_enumeration_of_static_problem() {
        for encoding in [IterationEncoding::Sat, IterationEncoding::Formula] {
            let mut it = iterator(
                "universe A0 A1 A2
                static r: 1 <= {A0, A1, A2}
                fact lone r",
                Options::default().with_iteration_encoding(encoding),
            );
            let mut seen = BTreeSet::new();
            while let Some(solution) = it.next() {
                assert!(seen.insert(value(&solution.unwrap(), "r", 0)));
            }
            assert_eq!(seen.len(), 4);
            assert!(!it.has_next());
            // exhausted iterators keep answering unsat
            assert!(!it.next_p().unwrap().is_sat());
        }
    }

    #[test]
    fn test_path_enumeration_grows_and_replays() {
        // a single atom toggled: p is empty then always full, or full forever
        let mut it = iterator(
            "universe A0
            var p: 1 <= {A0}
            fact always (some p => after some p)",
            Options::default().with_trace_lengths(1, 3),
        );
        let mut traces = vec![];
        while let Some(solution) = it.next() {
            let trace = solution.unwrap().instance().unwrap().canonize();
            assert!(!traces.contains(&trace), "{trace:?}");
            traces.push(trace);
        }
        // p forever empty, p forever full, p empty for 1 or 2 states then full
        assert_eq!(traces.len(), 4);
    }

    #[test]
    fn test_segments() {
        let mut it = iterator(
            "universe A0 A1
            var p: 1 <= {A0, A1}
            static s: 1 <= {A0, A1}
            fact some s
            fact always lone p",
            Options::default().with_trace_lengths(3, 3),
        );
        let first = it.next_p().unwrap();
        assert!(first.is_sat());
        let second = it.next_s(1, 1, &BTreeSet::new()).unwrap();
        assert!(second.is_sat());
        assert_eq!(value(&first, "s", 0), value(&second, "s", 0));
        assert_eq!(value(&first, "p", 0), value(&second, "p", 0));
        assert_eq!(value(&first, "p", 2), value(&second, "p", 2));
        assert_ne!(value(&first, "p", 1), value(&second, "p", 1));

        // state 1 of p has three values
        let third = it.next_s(1, 1, &BTreeSet::new()).unwrap();
        assert!(third.is_sat());
        assert!(!it.next_s(1, 1, &BTreeSet::new()).unwrap().is_sat());
        assert!(it.has_next_c());

        assert!(it.next_p().unwrap_err().is_config());
        assert!(matches!(
            it.next_s(0, 0, &BTreeSet::new()),
            Err(SolveError::Config(ConfigError::EmptySegment(0)))
        ));
        // beyond the longest trace
        assert!(!it.next_s(0, 4, &BTreeSet::new()).unwrap().is_sat());
    }

    #[test]
    fn test_configurations() {
        let mut it = iterator(
            "universe A0 A1
            var p: 1 <= {A0, A1}
            static s: 1 <= {A0, A1}
            fact one s
            fact always p in s",
            Options::default().with_trace_lengths(1, 2),
        );
        let mut configurations = BTreeSet::new();
        while it.has_next_c() {
            let solution = it.next_c().unwrap();
            if !solution.is_sat() {
                break;
            }
            assert!(configurations.insert(value(&solution, "s", 0)));
        }
        assert_eq!(configurations.len(), 2);
        // leaving configuration mode starts over
        assert!(it.has_next_p());
        assert!(it.next_p().unwrap().is_sat());
    }
}
