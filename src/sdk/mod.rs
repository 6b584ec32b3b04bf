// SPDX-License-Identifier: MIT

//! Node development kit
//!
//! The surface node implementations are written against:
//! - `NodeExecutor` - the per-type capability trait
//! - `NodeContext` / `NodeOutput` - what an invocation sees and produces
//! - `ExecutionEvent` - progress notifications
//! - the error hierarchy shared with the engine

pub mod error;
pub mod event;
pub mod node;

pub use error::{
    CycleError, FlowError, NodeError, NodeErrorKind, StoreError, ValidationError, ValidationIssue,
};
pub use event::ExecutionEvent;
pub use node::{NodeContext, NodeExecutor, NodeOutput, NodeTypeDescriptor, PortValues, MAIN_PORT};
