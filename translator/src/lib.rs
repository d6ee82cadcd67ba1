// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Translation of bounded, first-order relational formulas to SAT, and the
//! SAT backends it runs on.

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod circuit;
pub mod external;
pub mod matrix;
pub mod sat;
pub mod translate;
