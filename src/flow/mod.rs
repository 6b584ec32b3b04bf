// SPDX-License-Identifier: MIT

//! Workflow execution engine
//!
//! Definitions are validated against the node type registry, planned into a
//! dependency order, and driven to completion by a single coordinator task
//! per run. Execution records live in an `ExecutionStore`.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod mcp;
pub mod nodes;
pub mod server;
pub mod store;
pub mod workflow;

use crate::sdk::FlowError;

pub type Result<T> = std::result::Result<T, FlowError>;
