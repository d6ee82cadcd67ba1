// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Solving a classified problem.
//!
//! Each [`Proc`] becomes a node: a plain node deepens the trace length of a
//! single translation, a candidate/verify node runs the refinement loop
//! over a candidate generator and a fresh verifier per candidate, and a
//! disjunctive node tries its alternatives in order, translating each only
//! when it is reached. Refinements sent to a node reach every plain node
//! below it.

use relational::{
    bounds::Bounds,
    instance::{InstanceError, TemporalInstance},
    nnf::nnf,
    printer,
    syntax::{Expression, Formula, Relation, Variable},
    universe::TupleSet,
};

use crate::{
    error::{HolError, SolveError},
    explorer::IterationStep,
    expand::Bindings,
    hol::proc::{skolemize, to_proc, Proc, Universal},
    options::IterationEncoding,
    reporter::Event,
    solver::Context,
    temporal::{timed_solve, timed_translation, TemporalTranslation},
};

/// A constraint added to a candidate generator.
#[derive(Debug, Clone)]
pub(crate) enum Refinement {
    /// Exclude a refuted candidate
    Block(IterationStep),
    /// A universal instantiated with a static counterexample. Existentials
    /// in its body are skolemized into the relations of `fresh`.
    Formula { formula: Formula, fresh: Bounds },
    /// A universal instantiated with a counterexample trace: the free
    /// variables of `formula` take the values of their skolem relations
    /// in `witness`, on the lassos that encode it
    Trace {
        formula: Formula,
        witness: TemporalInstance,
        skolems: Vec<(Variable, Relation)>,
        fresh: Bounds,
    },
}

impl Refinement {
    /// Relations the refinement mentions besides those of the problem.
    fn fresh(&self) -> Option<&Bounds> {
        match self {
            Refinement::Block(_) => None,
            Refinement::Formula { fresh, .. } | Refinement::Trace { fresh, .. } => Some(fresh),
        }
    }

    fn apply(
        &self,
        t: &mut TemporalTranslation,
        encoding: IterationEncoding,
    ) -> Result<(), SolveError> {
        match self {
            Refinement::Block(step) => {
                for c in step.constraints(t.expanded()) {
                    t.apply(&c, encoding)?;
                }
            }
            Refinement::Formula { formula, .. } => t.extend(formula)?,
            Refinement::Trace {
                formula,
                witness,
                skolems,
                ..
            } => {
                let length = t.length();
                // a trace that needs more states cannot be replayed here
                let Some(unrolled) = witness.unroll(length).into_iter().next() else {
                    return Ok(());
                };
                let mut bindings = Bindings::new();
                for (var, r) in skolems {
                    let values = (0..length)
                        .map(|i| {
                            unrolled
                                .state(i)
                                .tuples(r)
                                .cloned()
                                .unwrap_or_else(|| TupleSet::empty(r.arity))
                        })
                        .collect();
                    bindings.insert(var.clone(), values);
                }
                t.extend_with(formula, &bindings, &witness.loops_at(length))?;
            }
        }
        Ok(())
    }
}

/// Iterative deepening over one first-order translation.
pub(crate) struct PlainNode {
    formula: Formula,
    bounds: Bounds,
    candidate: Option<TemporalInstance>,
    max: usize,
    length: usize,
    static_problem: bool,
    refinements: Vec<Refinement>,
    translation: Option<TemporalTranslation>,
    exhausted: bool,
}

impl PlainNode {
    fn new(
        formula: Formula,
        bounds: Bounds,
        candidate: Option<TemporalInstance>,
        min: usize,
        max: usize,
    ) -> Self {
        let static_problem =
            !formula.is_temporal() && bounds.mutable_relations().next().is_none();
        Self {
            formula,
            bounds,
            candidate,
            max,
            length: if static_problem { 1 } else { min },
            static_problem,
            refinements: vec![],
            translation: None,
            exhausted: false,
        }
    }

    fn solve(&mut self, ctx: &mut Context) -> Result<bool, SolveError> {
        if self.exhausted {
            return Ok(false);
        }
        loop {
            let mut t = match self.translation.take() {
                Some(t) => t,
                None => {
                    let mut t = timed_translation(
                        &self.formula,
                        &self.bounds,
                        self.length,
                        self.candidate.as_ref(),
                        ctx.options,
                        &ctx.interrupt,
                        &mut ctx.stats,
                    )?;
                    for r in &self.refinements {
                        r.apply(&mut t, ctx.options.iteration_encoding)?;
                    }
                    t
                }
            };
            let sat = timed_solve(&mut t, ctx.options, &mut ctx.stats)?;
            self.translation = Some(t);
            if sat {
                return Ok(true);
            }
            if self.static_problem || self.length >= self.max {
                log::debug!("no solution up to trace length {}", self.length);
                self.exhausted = true;
                return Ok(false);
            }
            self.length += 1;
            self.translation = None;
        }
    }

    fn refine(&mut self, r: Refinement, ctx: &Context) -> Result<(), SolveError> {
        // new skolem relations need variables, so the translation is redone
        let mut grown = false;
        if let Some(fresh) = r.fresh() {
            for (relation, b) in fresh.iter() {
                if self.bounds.contains(relation) {
                    continue;
                }
                self.bounds.bound(relation, b.lower.clone(), b.upper.clone())?;
                self.static_problem &= !relation.mutable;
                grown = true;
            }
        }
        let incremental = ctx.options.solver.incremental() && !ctx.options.hol_full_increments;
        match &mut self.translation {
            Some(t) if incremental && !grown => r.apply(t, ctx.options.iteration_encoding)?,
            _ => self.translation = None,
        }
        self.refinements.push(r);
        Ok(())
    }

    fn instance(&self) -> Result<Option<TemporalInstance>, SolveError> {
        match &self.translation {
            Some(t) => Ok(Some(t.instance()?)),
            None => Ok(None),
        }
    }
}

/// What a counterexample adds to a candidate generator.
enum Strengthening {
    Refine(Refinement),
    /// An instance that still quantifies universally over a higher-order
    /// variable; the generator is rebuilt with it
    Rebuild(Formula),
}

/// The candidate/verify loop for `rest && all universals`.
pub(crate) struct Some4AllNode {
    bounds: Bounds,
    universals: Vec<Universal>,
    /// The problem of the generator, in negation normal form
    formula: Formula,
    generator: HolTranslation,
    /// Every refinement sent to the generator, replayed when it is rebuilt
    history: Vec<Refinement>,
    outer: Option<TemporalInstance>,
    min: usize,
    max: usize,
    depth: usize,
    iterations: usize,
    accepted: Option<TemporalInstance>,
}

impl Some4AllNode {
    #[allow(clippy::too_many_arguments)]
    fn new(
        bounds: Bounds,
        universals: Vec<Universal>,
        rest: Formula,
        outer: Option<TemporalInstance>,
        min: usize,
        max: usize,
        depth: usize,
        ctx: &mut Context,
    ) -> Result<Self, SolveError> {
        // every universal holds in particular for some value
        let flipped = universals
            .iter()
            .map(|u| Formula::exists(u.decls.clone(), u.body.clone()));
        let formula = Formula::and([rest].into_iter().chain(flipped));
        let proc = to_proc(&formula, &bounds, &mut ctx.supply)?;
        let generator = HolTranslation::new(proc, outer.clone(), min, max, depth + 1, ctx)?;
        Ok(Self {
            bounds,
            universals,
            formula,
            generator,
            history: vec![],
            outer,
            min,
            max,
            depth,
            iterations: 0,
            accepted: None,
        })
    }

    fn solve(&mut self, ctx: &mut Context) -> Result<bool, SolveError> {
        let depth = self.depth;
        ctx.options.reporter.report(&Event::HolLoopStarted { depth });
        loop {
            if !self.generator.solve(ctx)? {
                ctx.options.reporter.report(&Event::HolLoopUnsat {
                    depth,
                    iterations: self.iterations,
                });
                return Ok(false);
            }
            self.iterations += 1;
            if depth == 0 {
                ctx.stats.hol_candidates += 1;
            }
            ctx.options.reporter.report(&Event::HolCandidateFound {
                depth,
                iteration: self.iterations,
            });
            let candidate = self
                .generator
                .instance()?
                .strip(|r| self.bounds.contains(r));

            ctx.options.reporter.report(&Event::HolVerifying { depth });
            let strengthenings = self.verify(&candidate, ctx)?;
            if strengthenings.is_empty() {
                ctx.options.reporter.report(&Event::HolCandidateVerified { depth });
                self.accepted = Some(candidate);
                return Ok(true);
            }
            ctx.options.reporter.report(&Event::HolCandidateRefuted { depth });
            // the bound counts refuted candidates; a candidate found at the
            // bound is still checked
            let bound = ctx.options.hol_max_iterations;
            if bound != 0 && self.iterations > bound {
                ctx.options.reporter.report(&Event::HolLoopExhausted {
                    depth,
                    iterations: self.iterations,
                });
                return Err(HolError::SearchExhausted(self.iterations).into());
            }
            ctx.options.reporter.report(&Event::HolFindingNext {
                depth,
                strengthenings: strengthenings.len(),
            });
            let mut refinements = vec![];
            let mut increments = vec![];
            for s in strengthenings {
                match s {
                    Strengthening::Refine(r) => refinements.push(r),
                    Strengthening::Rebuild(f) => increments.push(f),
                }
            }
            let relations = self.bounds.relations().cloned().collect();
            refinements.push(Refinement::Block(IterationStep::path(candidate, relations)));
            if increments.is_empty() {
                for r in refinements {
                    self.refine(r, ctx)?;
                }
            } else {
                self.history.extend(refinements);
                self.rebuild(increments, ctx)?;
            }
        }
    }

    fn refine(&mut self, r: Refinement, ctx: &Context) -> Result<(), SolveError> {
        self.generator.refine(r.clone(), ctx)?;
        self.history.push(r);
        Ok(())
    }

    /// Replace the generator by one for its problem conjoined with
    /// `increments`, with every earlier refinement replayed.
    fn rebuild(&mut self, increments: Vec<Formula>, ctx: &mut Context) -> Result<(), SolveError> {
        log::debug!(
            "[{}] rebuilding the candidate generator with {} higher-order increments",
            self.depth,
            increments.len()
        );
        self.formula = Formula::and([self.formula.clone()].into_iter().chain(increments));
        let proc = to_proc(&self.formula, &self.bounds, &mut ctx.supply)?;
        let mut generator = HolTranslation::new(
            proc,
            self.outer.clone(),
            self.min,
            self.max,
            self.depth + 1,
            ctx,
        )?;
        for r in &self.history {
            generator.refine(r.clone(), ctx)?;
        }
        self.generator = generator;
        Ok(())
    }

    /// `formula` skolemized for the generator, with the bounds of its new
    /// skolem relations. `None` if a higher-order universal remains.
    fn first_order(
        &self,
        formula: &Formula,
        ctx: &mut Context,
    ) -> Result<Option<(Formula, Bounds)>, SolveError> {
        let mut fresh = Bounds::new(self.bounds.universe().clone());
        if !formula.is_higher_order() {
            return Ok(Some((formula.clone(), fresh)));
        }
        let proc = to_proc(&nnf(formula, false), &self.bounds, &mut ctx.supply)?.flatten()?;
        let Proc::Fol { formula, bounds } = proc else {
            return Ok(None);
        };
        for (r, b) in bounds.iter() {
            if !self.bounds.contains(r) {
                fresh.bound(r, b.lower.clone(), b.upper.clone())?;
            }
        }
        Ok(Some((formula, fresh)))
    }

    /// Look for a counterexample to some universal under `candidate`. No
    /// strengthenings means the candidate is a witness.
    fn verify(
        &self,
        candidate: &TemporalInstance,
        ctx: &mut Context,
    ) -> Result<Vec<Strengthening>, SolveError> {
        let mut alternatives = vec![];
        let mut skolems = vec![];
        for u in &self.universals {
            let mut bounds = self.bounds.clone();
            let negated = nnf(&u.body, true);
            let (f, s) = skolemize(&u.decls, &negated, &mut bounds, &mut ctx.supply)?;
            alternatives.push(to_proc(&f, &bounds, &mut ctx.supply)?);
            skolems.push(s);
        }
        let proc = if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Proc::Or { alternatives }
        };
        let min = candidate.prefix_length();
        let max = if self.universals.iter().any(|u| u.is_mutable()) {
            self.max
        } else {
            min
        };
        let mut verifier =
            HolTranslation::new(proc, Some(candidate.clone()), min, max, self.depth + 1, ctx)?;
        if !verifier.solve(ctx)? {
            return Ok(vec![]);
        }
        let cex = verifier.instance()?;
        log::debug!("[{}] counterexample of {} states", self.depth, cex.prefix_length());

        let mut strengthenings = vec![];
        for (u, skolems) in self.universals.iter().zip(skolems) {
            // a counterexample only refutes the universal it has values for
            if !skolems.iter().all(|(_, r)| cex.state(0).tuples(r).is_some()) {
                continue;
            }
            let constraints = u
                .decls
                .iter()
                .map(|d| d.constraint(&Expression::Var(d.var.clone())));
            let formula = Formula::implies(Formula::and(constraints), u.body.clone());
            if u.is_mutable() {
                let Some((formula, fresh)) = self.first_order(&formula, ctx)? else {
                    return Err(HolError::Unsupported(printer::formula(&u.formula())).into());
                };
                let witness = cex.strip(|r| skolems.iter().any(|(_, s)| s == r));
                strengthenings.push(Strengthening::Refine(Refinement::Trace {
                    formula,
                    witness,
                    skolems,
                    fresh,
                }));
            } else {
                let substitution = skolems
                    .iter()
                    .map(|(var, r)| {
                        let value = cex
                            .state(0)
                            .tuples(r)
                            .cloned()
                            .unwrap_or_else(|| TupleSet::empty(r.arity));
                        (var.clone(), Expression::Constant(value))
                    })
                    .collect();
                let instance = formula.substitute(&substitution);
                strengthenings.push(match self.first_order(&instance, ctx)? {
                    Some((formula, fresh)) => {
                        Strengthening::Refine(Refinement::Formula { formula, fresh })
                    }
                    None => Strengthening::Rebuild(nnf(&instance, false)),
                });
            }
        }
        Ok(strengthenings)
    }

    fn length(&self) -> usize {
        self.generator.length()
    }
}

/// Alternatives tried in order.
pub(crate) struct OrNode {
    alternatives: Vec<Proc>,
    nodes: Vec<HolTranslation>,
    candidate: Option<TemporalInstance>,
    min: usize,
    max: usize,
    depth: usize,
    current: usize,
    refinements: Vec<Refinement>,
}

impl OrNode {
    fn solve(&mut self, ctx: &mut Context) -> Result<bool, SolveError> {
        if self.nodes.is_empty() && self.current == 0 {
            ctx.options.reporter.report(&Event::SplitStarted {
                alternatives: self.alternatives.len(),
            });
        }
        while self.current < self.alternatives.len() {
            let index = self.current;
            if self.nodes.len() == index {
                ctx.options.reporter.report(&Event::SplitChoice { index });
                let mut node = HolTranslation::new(
                    self.alternatives[index].clone(),
                    self.candidate.clone(),
                    self.min,
                    self.max,
                    self.depth,
                    ctx,
                )?;
                for r in &self.refinements {
                    node.refine(r.clone(), ctx)?;
                }
                self.nodes.push(node);
            }
            if self.nodes[index].solve(ctx)? {
                ctx.options.reporter.report(&Event::SplitChoiceSat { index });
                return Ok(true);
            }
            ctx.options.reporter.report(&Event::SplitChoiceUnsat { index });
            self.current += 1;
        }
        Ok(false)
    }

    fn refine(&mut self, r: Refinement, ctx: &Context) -> Result<(), SolveError> {
        for node in self.nodes.iter_mut().skip(self.current) {
            node.refine(r.clone(), ctx)?;
        }
        self.refinements.push(r);
        Ok(())
    }

    fn current(&self) -> Option<&HolTranslation> {
        self.nodes.get(self.current)
    }
}

/// A node of the solving tree.
pub(crate) enum HolTranslation {
    Plain(PlainNode),
    CandidateVerify(Box<Some4AllNode>),
    Disjunctive(OrNode),
}

impl HolTranslation {
    /// Build the node for `proc`. With a `candidate`, the relations it has
    /// values for are fixed to them and only its lasso encodings are
    /// considered.
    pub(crate) fn new(
        proc: Proc,
        candidate: Option<TemporalInstance>,
        min: usize,
        max: usize,
        depth: usize,
        ctx: &mut Context,
    ) -> Result<Self, SolveError> {
        Ok(match proc {
            Proc::Fol { formula, bounds } => {
                HolTranslation::Plain(PlainNode::new(formula, bounds, candidate, min, max))
            }
            Proc::Some4All {
                bounds,
                universals,
                rest,
            } => HolTranslation::CandidateVerify(Box::new(Some4AllNode::new(
                bounds, universals, rest, candidate, min, max, depth, ctx,
            )?)),
            Proc::Or { alternatives } => HolTranslation::Disjunctive(OrNode {
                alternatives,
                nodes: vec![],
                candidate,
                min,
                max,
                depth,
                current: 0,
                refinements: vec![],
            }),
        })
    }

    pub(crate) fn solve(&mut self, ctx: &mut Context) -> Result<bool, SolveError> {
        match self {
            HolTranslation::Plain(node) => node.solve(ctx),
            HolTranslation::CandidateVerify(node) => node.solve(ctx),
            HolTranslation::Disjunctive(node) => node.solve(ctx),
        }
    }

    fn refine(&mut self, r: Refinement, ctx: &Context) -> Result<(), SolveError> {
        match self {
            HolTranslation::Plain(node) => node.refine(r, ctx),
            HolTranslation::CandidateVerify(node) => node.refine(r, ctx),
            HolTranslation::Disjunctive(node) => node.refine(r, ctx),
        }
    }

    /// The last solution, over the relations of the node's problem
    /// including its skolem relations.
    pub(crate) fn instance(&self) -> Result<TemporalInstance, SolveError> {
        let instance = match self {
            HolTranslation::Plain(node) => node.instance()?,
            HolTranslation::CandidateVerify(node) => node.accepted.clone(),
            HolTranslation::Disjunctive(node) => match node.current() {
                Some(n) => Some(n.instance()?),
                None => None,
            },
        };
        instance.ok_or(SolveError::Instance(InstanceError::Empty))
    }

    /// The core of an unsatisfiable first-order problem.
    pub(crate) fn core(&self) -> Option<Vec<Formula>> {
        match self {
            HolTranslation::Plain(node) => node.translation.as_ref().and_then(|t| t.core()),
            HolTranslation::CandidateVerify(_) | HolTranslation::Disjunctive(_) => None,
        }
    }

    /// The last trace length tried.
    pub(crate) fn length(&self) -> usize {
        match self {
            HolTranslation::Plain(node) => node.length,
            HolTranslation::CandidateVerify(node) => node.length(),
            HolTranslation::Disjunctive(node) => node
                .nodes
                .last()
                .map_or(node.max, |n| n.length()),
        }
    }
}
