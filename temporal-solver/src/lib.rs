// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Command-line front end of the bounded temporal model finder.
//!
//! The binary solves a problem file once (`solve`), enumerates its
//! solutions (`enumerate`), or pretty-prints it (`print`).

// configure clippy
#![allow(clippy::needless_return)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![deny(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod command;

#[doc(hidden)]
pub use command::App;
