// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Progress events and where they go.

use std::sync::Mutex;

/// Something the engine did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A problem is being translated at a trace length
    Translating {
        /// The trace length
        length: usize,
    },
    /// A translation is handed to the SAT solver
    Solving {
        /// The trace length
        length: usize,
        /// Primary variables of the translation
        primary_variables: usize,
        /// All variables of the translation
        variables: usize,
        /// Clauses of the translation
        clauses: usize,
    },
    /// Previously seen solutions were excluded
    Blocking {
        /// The trace length
        length: usize,
        /// The number of excluded solutions
        steps: usize,
    },
    /// A candidate/counterexample loop started; `depth` is its nesting
    HolLoopStarted {
        /// Nesting of the candidate loop, from 0
        depth: usize,
    },
    /// The candidate generator produced a candidate
    HolCandidateFound {
        /// Nesting of the candidate loop, from 0
        depth: usize,
        /// The number of the candidate, from 1
        iteration: usize,
    },
    /// A candidate is being checked
    HolVerifying {
        /// Nesting of the candidate loop, from 0
        depth: usize,
    },
    /// No counterexample: the candidate is a witness
    HolCandidateVerified {
        /// Nesting of the candidate loop, from 0
        depth: usize,
    },
    /// A counterexample refuted the candidate
    HolCandidateRefuted {
        /// Nesting of the candidate loop, from 0
        depth: usize,
    },
    /// The candidate generator was refined and is asked again
    HolFindingNext {
        /// Nesting of the candidate loop, from 0
        depth: usize,
        /// The number of strengthening formulas added
        strengthenings: usize,
    },
    /// The candidate generator ran out of candidates: no witness exists
    HolLoopUnsat {
        /// Nesting of the candidate loop, from 0
        depth: usize,
        /// Candidates tried
        iterations: usize,
    },
    /// The loop hit its iteration bound without an answer
    HolLoopExhausted {
        /// Nesting of the candidate loop, from 0
        depth: usize,
        /// Candidates tried
        iterations: usize,
    },
    /// A disjunction is split into alternatives
    SplitStarted {
        /// The number of alternatives
        alternatives: usize,
    },
    /// An alternative is tried
    SplitChoice {
        #[allow(missing_docs)]
        index: usize,
    },
    /// An alternative is satisfiable
    SplitChoiceSat {
        #[allow(missing_docs)]
        index: usize,
    },
    /// An alternative is unsatisfiable
    SplitChoiceUnsat {
        #[allow(missing_docs)]
        index: usize,
    },
}

/// A sink for progress events. Implementations must not fail.
pub trait Reporter: Send + Sync {
    /// Record an event.
    fn report(&self, event: &Event);
}

/// Forwards events to the [`log`] facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: &Event) {
        match event {
            Event::Translating { length } => log::debug!("translating at trace length {length}"),
            Event::Solving {
                length,
                primary_variables,
                variables,
                clauses,
            } => log::info!(
                "solving at trace length {length}: {primary_variables} primary variables, \
                 {variables} variables, {clauses} clauses"
            ),
            Event::Blocking { length, steps } => {
                log::debug!("blocking {steps} previous solutions at trace length {length}")
            }
            Event::HolLoopStarted { depth } => log::info!("[{depth}] candidate loop started"),
            Event::HolCandidateFound { depth, iteration } => {
                log::info!("[{depth}] candidate {iteration} found")
            }
            Event::HolVerifying { depth } => log::debug!("[{depth}] verifying candidate"),
            Event::HolCandidateVerified { depth } => log::info!("[{depth}] candidate verified"),
            Event::HolCandidateRefuted { depth } => log::info!("[{depth}] candidate refuted"),
            Event::HolFindingNext {
                depth,
                strengthenings,
            } => log::debug!("[{depth}] finding next candidate ({strengthenings} strengthenings)"),
            Event::HolLoopUnsat { depth, iterations } => {
                log::info!("[{depth}] no more candidates after {iterations}")
            }
            Event::HolLoopExhausted { depth, iterations } => {
                log::warn!("[{depth}] giving up after {iterations} candidates")
            }
            Event::SplitStarted { alternatives } => {
                log::info!("split into {alternatives} alternatives")
            }
            Event::SplitChoice { index } => log::debug!("trying alternative {index}"),
            Event::SplitChoiceSat { index } => log::info!("alternative {index} is satisfiable"),
            Event::SplitChoiceUnsat { index } => {
                log::debug!("alternative {index} is unsatisfiable")
            }
        }
    }
}

/// Keeps every event, for tests and tools that inspect a run afterwards.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// The events so far, in order.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: &Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
