// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Solver configuration.

use std::{fmt, sync::Arc, time::Duration};

use translator::sat::{Interrupt, SatFactory};

use crate::{
    error::ConfigError,
    reporter::{LogReporter, Reporter},
};

/// How previously seen solutions are excluded during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationEncoding {
    /// Clauses over the primary variables, added to the live solver
    #[default]
    Sat,
    /// Formulas over the expanded relations, retranslated with the problem
    Formula,
}

/// Options of a [`TemporalSolver`](crate::solver::TemporalSolver).
#[derive(Clone)]
pub struct Options {
    /// The first trace length tried
    pub min_trace_length: usize,
    /// The last trace length tried before reporting unsatisfiability
    pub max_trace_length: usize,
    /// The SAT backend
    pub solver: SatFactory,
    /// Bound on the candidates of a higher-order loop; 0 is unbounded
    pub hol_max_iterations: usize,
    /// Retranslate candidate generators from scratch after every
    /// refinement instead of extending them
    pub hol_full_increments: bool,
    /// Encoding of blocking constraints
    pub iteration_encoding: IterationEncoding,
    /// Deadline for each `solve` or `next` call
    pub timeout: Option<Duration>,
    /// Flag to stop solving from another thread
    pub interrupt: Interrupt,
    /// Receives progress events
    pub reporter: Arc<dyn Reporter>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            min_trace_length: 1,
            max_trace_length: 20,
            solver: SatFactory::default(),
            hol_max_iterations: 500,
            hol_full_increments: false,
            iteration_encoding: IterationEncoding::default(),
            timeout: None,
            interrupt: Interrupt::new(),
            reporter: Arc::new(LogReporter),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("min_trace_length", &self.min_trace_length)
            .field("max_trace_length", &self.max_trace_length)
            .field("solver", &self.solver)
            .field("hol_max_iterations", &self.hol_max_iterations)
            .field("hol_full_increments", &self.hol_full_increments)
            .field("iteration_encoding", &self.iteration_encoding)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Set both trace length bounds.
    pub fn with_trace_lengths(mut self, min: usize, max: usize) -> Self {
        self.min_trace_length = min;
        self.max_trace_length = max;
        self
    }

    /// Use another SAT backend.
    pub fn with_solver(mut self, solver: SatFactory) -> Self {
        self.solver = solver;
        self
    }

    /// Refuted candidates allowed per loop; 0 is unlimited.
    pub fn with_hol_max_iterations(mut self, iterations: usize) -> Self {
        self.hol_max_iterations = iterations;
        self
    }

    /// Strengthen with every failing universal instead of the first.
    pub fn with_hol_full_increments(mut self, full: bool) -> Self {
        self.hol_full_increments = full;
        self
    }

    /// How segment steps constrain the previous solution.
    pub fn with_iteration_encoding(mut self, encoding: IterationEncoding) -> Self {
        self.iteration_encoding = encoding;
        self
    }

    /// Abort the search after this long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share an interrupt flag with the caller.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Receive search events.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Check that the options are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_trace_length == 0 || self.min_trace_length > self.max_trace_length {
            return Err(ConfigError::TraceLengths {
                min: self.min_trace_length,
                max: self.max_trace_length,
            });
        }
        Ok(())
    }

    /// The interrupt for one call: the shared flag plus the deadline, which
    /// starts now.
    pub(crate) fn call_interrupt(&self) -> Interrupt {
        match self.timeout {
            Some(timeout) => self.interrupt.with_timeout(timeout),
            None => self.interrupt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert_eq!(Options::default().validate(), Ok(()));
        assert_eq!(
            Options::default().with_trace_lengths(3, 2).validate(),
            Err(ConfigError::TraceLengths { min: 3, max: 2 })
        );
        assert!(Options::default().with_trace_lengths(0, 2).validate().is_err());
        assert!(Options::default().with_trace_lengths(4, 4).validate().is_ok());
    }
}
