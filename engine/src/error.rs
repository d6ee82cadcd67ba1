// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Error types of the engine.
//!
//! An unsatisfiable problem is not an error: it is an
//! [`Outcome`](crate::solution::Outcome). Everything here stops a single
//! `solve` or `next` call and leaves no state behind that affects other
//! problems.

use relational::{bounds::BoundsError, instance::InstanceError};
use thiserror::Error;
use translator::{sat::SatError, translate::TranslationError};

/// A request that cannot be carried out with the given options or in the
/// current state of an enumeration. Always reported before any
/// translation work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Trace lengths have to satisfy `1 <= min <= max`
    #[error("inconsistent trace lengths: minimum {min}, maximum {max}")]
    TraceLengths {
        /// The minimum trace length
        min: usize,
        /// The maximum trace length
        max: usize,
    },
    /// Enumeration needs a solver that keeps its state between calls
    #[error("enumerating solutions requires an incremental SAT solver")]
    NotIncremental,
    /// Enumeration of higher-order problems is not supported
    #[error("solutions of higher-order problems cannot be enumerated")]
    HigherOrderEnumeration,
    /// A segment of width zero can never change anything
    #[error("segment width must be at least 1, got {0}")]
    EmptySegment(usize),
    /// Segment exploration and path exploration were interleaved without
    /// going through configuration exploration
    #[error("cannot switch from {from} exploration to {to} exploration")]
    ModeSwitch {
        /// The current exploration mode
        from: &'static str,
        /// The requested exploration mode
        to: &'static str,
    },
    /// A relation is both fixed and allowed to change
    #[error("relation {0} cannot be both fixed and changing")]
    FixAndChange(String),
    /// A relation named in a request does not appear in the bounds
    #[error("unknown relation {0}")]
    UnknownRelation(String),
}

/// An error in resolving higher-order quantifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HolError {
    /// The candidate/counterexample loop reached its iteration bound. This
    /// says nothing about satisfiability.
    #[error("higher-order search gave up after {0} candidates")]
    SearchExhausted(usize),
    /// A higher-order quantifier in a position that cannot be skolemized
    /// or refined, e.g. under a temporal operator
    #[error("unsupported higher-order formula: {0}")]
    Unsupported(String),
}

/// An error from solving or enumerating.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    #[allow(missing_docs)]
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Hol(#[from] HolError),
    /// The problem could not be translated
    #[error(transparent)]
    Translation(TranslationError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Bounds(#[from] BoundsError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Instance(#[from] InstanceError),
    /// The SAT solver was stopped (deadline, interrupt flag) or failed.
    /// Never retried.
    #[error("solving aborted: {0}")]
    Aborted(SatError),
}

impl From<TranslationError> for SolveError {
    fn from(e: TranslationError) -> Self {
        match e {
            TranslationError::Sat(e) => SolveError::Aborted(e),
            e => SolveError::Translation(e),
        }
    }
}

impl From<SatError> for SolveError {
    fn from(e: SatError) -> Self {
        SolveError::Aborted(e)
    }
}

impl SolveError {
    /// Whether the higher-order loop gave up.
    pub fn is_search_exhausted(&self) -> bool {
        matches!(self, SolveError::Hol(HolError::SearchExhausted(_)))
    }

    /// Whether the request was rejected as an invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, SolveError::Config(_))
    }
}
