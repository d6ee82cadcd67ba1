// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Higher-order quantifiers.
//!
//! A formula in negation normal form is classified into a [`Proc`]: a
//! first-order problem, a candidate/verify problem for top-level
//! higher-order universals, or a disjunction of such problems. Top-level
//! existentials are skolemized on the way. A [`Proc`] is then solved by a
//! tree of translations (see [`translation`]).

pub mod proc;
pub(crate) mod translation;

pub use proc::{skolemize, to_proc, Proc, Supply, Universal};
