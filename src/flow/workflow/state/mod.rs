// SPDX-License-Identifier: MIT

//! Run-scoped data for graph workflows
//!
//! This module provides `RunData`, the bag of values produced by completed
//! nodes, and the input resolution that feeds those values to dependents.

mod store;

pub use store::RunData;
