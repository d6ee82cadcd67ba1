// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The entry points: solving a problem once, or enumerating its solutions.

use relational::{bounds::Bounds, nnf::nnf, syntax::Formula};
use translator::sat::Interrupt;

use crate::{
    error::{ConfigError, SolveError},
    explorer::SolutionIterator,
    hol::{proc::Supply, to_proc, translation::HolTranslation, Proc},
    options::Options,
    solution::{Outcome, Proof, Solution, Statistics},
};

/// State shared by every translation of one solve.
pub(crate) struct Context<'a> {
    pub(crate) options: &'a Options,
    pub(crate) interrupt: Interrupt,
    pub(crate) stats: Statistics,
    pub(crate) supply: Supply,
}

impl<'a> Context<'a> {
    fn new(options: &'a Options) -> Self {
        Self {
            options,
            interrupt: options.call_interrupt(),
            stats: Statistics::default(),
            supply: Supply::new(),
        }
    }
}

/// Solves temporal relational problems by iterative deepening over the
/// trace length.
#[derive(Debug, Clone, Default)]
pub struct TemporalSolver {
    options: Options,
}

impl TemporalSolver {
    #[allow(missing_docs)]
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    #[allow(missing_docs)]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Find a trace satisfying `formula` within `bounds`, trying every
    /// trace length from the minimum to the maximum in turn. Static
    /// problems are solved once, with a trace of one state.
    pub fn solve(&self, formula: &Formula, bounds: &Bounds) -> Result<Solution, SolveError> {
        self.options.validate()?;
        let formula = Formula::and([formula.clone(), bounds.resolve()]);
        let mut ctx = Context::new(&self.options);
        let proc = if formula.is_higher_order() {
            log::info!("resolving higher-order quantifiers");
            to_proc(&nnf(&formula, false), bounds, &mut ctx.supply)?
        } else {
            Proc::Fol {
                formula,
                bounds: bounds.clone(),
            }
        };
        let mut node = HolTranslation::new(
            proc,
            None,
            self.options.min_trace_length,
            self.options.max_trace_length,
            0,
            &mut ctx,
        )?;
        let outcome = if node.solve(&mut ctx)? {
            let instance = node.instance()?;
            log::info!("sat with a trace of {} states", instance.prefix_length());
            Outcome::Sat { instance }
        } else {
            let trace_length = node.length();
            log::info!("unsat up to trace length {trace_length}");
            Outcome::Unsat {
                trace_length,
                proof: node.core().map(|core| Proof { core }),
            }
        };
        Ok(Solution {
            outcome,
            statistics: ctx.stats,
        })
    }

    /// Enumerate the solutions of a first-order problem. Fails before any
    /// translation if the SAT backend is not incremental or the problem is
    /// higher-order.
    pub fn solve_all(
        &self,
        formula: &Formula,
        bounds: &Bounds,
    ) -> Result<SolutionIterator, SolveError> {
        self.options.validate()?;
        if !self.options.solver.incremental() {
            return Err(ConfigError::NotIncremental.into());
        }
        let formula = Formula::and([formula.clone(), bounds.resolve()]);
        if formula.is_higher_order() {
            return Err(ConfigError::HigherOrderEnumeration.into());
        }
        Ok(SolutionIterator::new(
            formula,
            bounds.clone(),
            self.options.clone(),
        ))
    }
}
