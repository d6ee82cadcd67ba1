// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded model finding for relational logic with linear-temporal and
//! higher-order formulas.
//!
//! A temporal problem is solved by iterative deepening: the formula and
//! bounds are expanded onto a lasso of increasing length and handed to the
//! base [`translator`]. Higher-order quantifiers are resolved by a
//! candidate/counterexample refinement loop layered on top (see [`hol`]).

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod expand;
pub mod explorer;
pub mod hol;
pub mod options;
pub mod reporter;
pub mod solution;
pub mod solver;
pub mod temporal;

pub use error::{ConfigError, HolError, SolveError};
pub use explorer::{Explorer, SolutionIterator};
pub use options::{IterationEncoding, Options};
pub use solution::{Outcome, Solution, Statistics};
pub use solver::TemporalSolver;
