//! Function node runtime.
//!
//! Races the function's response against a cancellation signal with
//! `tokio::select!`: whichever fires first wins, so a slow function never
//! blocks a cancel from taking effect.

use super::{NodeFacade, NodeRuntime, RunOutcome};
use crate::registry::FunctionRegistry;
use async_trait::async_trait;
use dataflow_kernel::error::ConfigurationError;
use std::sync::Arc;

pub struct FuncRuntime {
    registry: Arc<dyn FunctionRegistry>,
}

impl FuncRuntime {
    pub fn new(registry: Arc<dyn FunctionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeRuntime for FuncRuntime {
    #[tracing::instrument(skip_all, fields(node = %facade.node.id))]
    async fn run(&self, facade: &NodeFacade) -> RunOutcome {
        let func_id = match facade.config().get("func_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                return RunOutcome::Fail {
                    code: "missing_func_id".to_string(),
                    message: ConfigurationError::MissingFuncId.to_string(),
                }
            }
        };

        let func = match self.registry.lookup(&func_id) {
            Some(f) => f,
            None => {
                return RunOutcome::Fail {
                    code: "function_execution_failed".to_string(),
                    message: format!("no function registered for func_id={func_id}"),
                }
            }
        };

        let input = match facade.select_input().await {
            Ok(value) => value,
            Err(report) => {
                return RunOutcome::Fail {
                    code: "no_input_data".to_string(),
                    message: report.to_string(),
                }
            }
        };

        let context = facade.config().get("context").cloned();
        let cancel_token = facade.cancellation().raw_token();

        tokio::select! {
            result = func.call(input, context, cancel_token) => {
                match result {
                    Ok(value) => RunOutcome::Complete { result: value, message: None },
                    Err(message) => RunOutcome::Fail {
                        code: "function_execution_failed".to_string(),
                        message,
                    },
                }
            }
            _ = facade.cancellation().canceled() => RunOutcome::Canceled,
        }
    }
}
