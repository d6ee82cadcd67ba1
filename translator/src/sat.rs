// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The interface to SAT solvers and the [CaDiCaL][cadical] backend.
//!
//! Literals follow the DIMACS convention: variables are numbered from 1 and
//! a negative number is the negation of its variable.
//!
//! [cadical]: https://fmv.jku.at/cadical/

use cadical::{Callbacks, Solver};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::external::ExternalSolver;

/// An error from calling a SAT solver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SatError {
    /// The interrupt flag was raised
    #[error("solver was interrupted")]
    Interrupted,
    /// The deadline passed
    #[error("solver timed out")]
    Timeout,
    /// The solver gave up or returned garbage
    #[error("solver failed: {0}")]
    Failed(String),
    /// Could not run an external solver
    #[error("could not run external solver: {0}")]
    Io(String),
}

/// The only cancellation channel for a solve: a shared flag that anyone
/// holding a clone can raise, plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// A fresh, lowered flag with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// The same flag, with a deadline `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            flag: self.flag.clone(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Raise the flag. Every clone observes it.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the flag was raised.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether the deadline (if any) has passed.
    pub fn timed_out(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Fail with the reason for stopping, if there is one.
    pub fn check(&self) -> Result<(), SatError> {
        if self.is_interrupted() {
            Err(SatError::Interrupted)
        } else if self.timed_out() {
            Err(SatError::Timeout)
        } else {
            Ok(())
        }
    }
}

impl Callbacks for Interrupt {
    fn terminate(&mut self) -> bool {
        self.is_interrupted() || self.timed_out()
    }
}

/// An incremental SAT solver over DIMACS literals.
pub trait SatSolver {
    /// Add a clause. The empty clause makes the problem unsatisfiable.
    fn add_clause(&mut self, clause: &[i32]);

    /// Solve under the given assumption literals.
    fn solve(&mut self, assumptions: &[i32]) -> Result<bool, SatError>;

    /// The value of a literal in the last satisfying assignment. Variables
    /// the solver never saw are false.
    fn value(&self, lit: i32) -> bool;

    /// Whether an assumption literal was used to prove the last
    /// unsatisfiable result.
    fn failed(&self, lit: i32) -> bool;

    /// The largest variable mentioned so far.
    fn num_variables(&self) -> i32;

    /// The number of clauses added so far.
    fn num_clauses(&self) -> usize;
}

/// The CaDiCaL solver, stopped early through its terminate callback.
pub struct CadicalSolver {
    solver: Solver<Interrupt>,
    interrupt: Interrupt,
    clauses: usize,
}

impl CadicalSolver {
    /// A new solver observing `interrupt`.
    pub fn new(interrupt: Interrupt) -> Self {
        let mut solver: Solver<Interrupt> = Default::default();
        solver.set_callbacks(Some(interrupt.clone()));
        Self {
            solver,
            interrupt,
            clauses: 0,
        }
    }

    fn known(&self, lit: i32) -> bool {
        lit != 0 && lit.abs() <= self.solver.max_variable()
    }
}

impl SatSolver for CadicalSolver {
    fn add_clause(&mut self, clause: &[i32]) {
        self.solver.add_clause(clause.iter().copied());
        self.clauses += 1;
    }

    fn solve(&mut self, assumptions: &[i32]) -> Result<bool, SatError> {
        self.interrupt.check()?;
        match self.solver.solve_with(assumptions.iter().copied()) {
            Some(sat) => Ok(sat),
            None => {
                self.interrupt.check()?;
                Err(SatError::Failed("CaDiCaL returned unknown".to_string()))
            }
        }
    }

    fn value(&self, lit: i32) -> bool {
        self.known(lit) && self.solver.value(lit) == Some(true)
    }

    fn failed(&self, lit: i32) -> bool {
        self.known(lit) && self.solver.failed(lit)
    }

    fn num_variables(&self) -> i32 {
        self.solver.max_variable()
    }

    fn num_clauses(&self) -> usize {
        self.clauses
    }
}

/// Selects the SAT backend of a translation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SatFactory {
    /// In-process CaDiCaL
    #[default]
    Cadical,
    /// In-process CaDiCaL, with every top-level conjunct guarded by an
    /// activation literal so that unsatisfiable results come with a core
    CadicalProver,
    /// A DIMACS solver run as an external process for every call
    External {
        /// The executable
        command: String,
        /// Extra arguments, before the input file
        args: Vec<String>,
    },
}

impl SatFactory {
    /// A new solver of this kind.
    pub fn create(&self, interrupt: &Interrupt) -> Box<dyn SatSolver> {
        match self {
            SatFactory::Cadical | SatFactory::CadicalProver => {
                Box::new(CadicalSolver::new(interrupt.clone()))
            }
            SatFactory::External { command, args } => Box::new(ExternalSolver::new(
                command.clone(),
                args.clone(),
                interrupt.clone(),
            )),
        }
    }

    /// Whether clauses can be added between calls without starting over.
    pub fn incremental(&self) -> bool {
        !matches!(self, SatFactory::External { .. })
    }

    /// Whether unsatisfiable results come with a core.
    pub fn prover(&self) -> bool {
        matches!(self, SatFactory::CadicalProver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadical_incremental() {
        let mut solver = CadicalSolver::new(Interrupt::new());
        solver.add_clause(&[1, 2]);
        solver.add_clause(&[-1]);
        assert_eq!(solver.solve(&[]), Ok(true));
        assert!(solver.value(2));
        assert!(!solver.value(1));
        // never mentioned
        assert!(!solver.value(7));

        assert_eq!(solver.solve(&[-2]), Ok(false));
        assert!(solver.failed(-2));

        solver.add_clause(&[-2]);
        assert_eq!(solver.solve(&[]), Ok(false));
        assert_eq!(solver.num_clauses(), 3);
    }

    #[test]
    fn test_interrupt_before_solve() {
        let interrupt = Interrupt::new();
        let mut solver = SatFactory::Cadical.create(&interrupt);
        solver.add_clause(&[1]);
        interrupt.interrupt();
        assert_eq!(solver.solve(&[]), Err(SatError::Interrupted));

        let expired = Interrupt::new().with_timeout(Duration::ZERO);
        assert_eq!(expired.check(), Err(SatError::Timeout));
    }

    #[test]
    fn test_empty_clause() {
        let mut solver = CadicalSolver::new(Interrupt::new());
        solver.add_clause(&[1]);
        solver.add_clause(&[]);
        assert_eq!(solver.solve(&[]), Ok(false));
    }
}
