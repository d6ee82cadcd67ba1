// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Results of solving.

use serde::{Serialize, Serializer};
use std::time::Duration;

use relational::{instance::TemporalInstance, printer, syntax::Formula};

/// The answer to a `solve` or `next` call.
#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    /// Satisfiable with a witness, or unsatisfiable
    pub outcome: Outcome,
    /// Sizes and timings of the work done
    pub statistics: Statistics,
}

/// The verdict of a solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Outcome {
    /// A witness trace. Static problems have a trace of one state.
    Sat {
        #[allow(missing_docs)]
        instance: TemporalInstance,
    },
    /// No witness up to `trace_length`, the last length tried.
    Unsat {
        /// The longest trace tried
        trace_length: usize,
        /// Why, when the solver can tell
        proof: Option<Proof>,
    },
}

/// An unsatisfiable core: top-level conjuncts of the problem that are
/// unsatisfiable together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proof {
    #[allow(missing_docs)]
    #[serde(serialize_with = "serialize_formulas")]
    pub core: Vec<Formula>,
}

fn serialize_formulas<S: Serializer>(fs: &[Formula], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(fs.iter().map(printer::formula))
}

/// What a call cost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Every trace length translated, in order
    pub trace_lengths: Vec<usize>,
    /// Primary variables of the last translation
    pub primary_variables: usize,
    /// Variables of the last translation
    pub variables: usize,
    /// Clauses of the last translation
    pub clauses: usize,
    /// Time spent expanding and translating
    pub translation_time: Duration,
    /// Time spent in the SAT solver
    pub solving_time: Duration,
    /// Calls to the SAT solver
    pub sat_calls: usize,
    /// Candidates examined by the outermost higher-order loop
    pub hol_candidates: usize,
}

impl Solution {
    /// Whether the outcome is satisfiable.
    pub fn is_sat(&self) -> bool {
        matches!(self.outcome, Outcome::Sat { .. })
    }

    /// The witness, if satisfiable.
    pub fn instance(&self) -> Option<&TemporalInstance> {
        match &self.outcome {
            Outcome::Sat { instance } => Some(instance),
            Outcome::Unsat { .. } => None,
        }
    }

    /// The unsatisfiable core, if there is one.
    pub fn proof(&self) -> Option<&Proof> {
        match &self.outcome {
            Outcome::Sat { .. } => None,
            Outcome::Unsat { proof, .. } => proof.as_ref(),
        }
    }
}
