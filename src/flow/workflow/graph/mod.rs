// SPDX-License-Identifier: MIT

//! Graph analysis for workflow definitions
//!
//! This module provides the dependency resolver that turns a definition's
//! connections into an execution plan.

pub mod plan;

pub use plan::{plan, ExecutionPlan};
