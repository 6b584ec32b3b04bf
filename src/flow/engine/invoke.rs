// SPDX-License-Identifier: MIT

//! Single node invocation
//!
//! The boundary between the coordinator and node implementations: applies
//! the per-node timeout and turns a panicking node into a node error so
//! siblings and the coordinator are unaffected.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

pub async fn invoke(
    executor: Arc<dyn NodeExecutor>,
    ctx: NodeContext,
    timeout: Duration,
) -> Result<NodeOutput, NodeError> {
    let node_id = ctx.node_id.clone();
    let call = tokio::time::timeout(timeout, executor.execute(ctx));

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            log::warn!("Node '{}' timed out after {:?}", node_id, timeout);
            Err(NodeError::timeout(timeout))
        }
        Err(panic) => Err(NodeError::failed(format!(
            "Node '{}' panicked: {}",
            node_id,
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
