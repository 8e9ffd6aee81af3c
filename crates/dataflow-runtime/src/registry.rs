//! Function lookup-and-invoke contract: a thin seam, not a real function
//! host. A name -> async-function map a caller registers applications' own
//! functions into.

use async_trait::async_trait;
use dataflow_kernel::pipeline::{PipelineFn, PipelineFnRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A registered node function. Implementations should observe `cancel` and
/// return promptly when it fires.
#[async_trait]
pub trait NodeFunction: Send + Sync {
    async fn call(
        &self,
        input: Value,
        context: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<Value, String>;
}

pub trait FunctionRegistry: Send + Sync {
    fn lookup(&self, func_id: &str) -> Option<Arc<dyn NodeFunction>>;
}

#[derive(Default, Clone)]
pub struct InMemoryFunctionRegistry {
    functions: HashMap<String, Arc<dyn NodeFunction>>,
}

impl InMemoryFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, func_id: impl Into<String>, func: Arc<dyn NodeFunction>) -> Self {
        self.functions.insert(func_id.into(), func);
        self
    }

    /// A registry pre-populated with the `echo` function, enough to smoke a
    /// single-node workflow without a host application.
    pub fn with_builtins() -> Self {
        Self::new().register("echo", Arc::new(Echo))
    }
}

impl FunctionRegistry for InMemoryFunctionRegistry {
    fn lookup(&self, func_id: &str) -> Option<Arc<dyn NodeFunction>> {
        self.functions.get(func_id).cloned()
    }
}

/// Returns `{echoed: input.message}`, optionally sleeping `input.delay_ms`
/// first so it can be cancelled mid-flight.
pub struct Echo;

#[async_trait]
impl NodeFunction for Echo {
    async fn call(
        &self,
        input: Value,
        _context: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<Value, String> {
        let delay_ms = input.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);
        if delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
                _ = cancel.cancelled() => return Err("canceled".to_string()),
            }
        }
        let message = input.get("message").cloned().unwrap_or(Value::Null);
        Ok(serde_json::json!({ "echoed": message }))
    }
}

/// A name -> [`PipelineFn`] map, the synchronous counterpart to
/// [`InMemoryFunctionRegistry`] for map-reduce item/reduction steps.
#[derive(Default)]
pub struct InMemoryPipelineFnRegistry {
    functions: HashMap<String, Box<dyn PipelineFn>>,
}

impl InMemoryPipelineFnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, func_id: impl Into<String>, func: impl PipelineFn + 'static) -> Self {
        self.functions.insert(func_id.into(), Box::new(func));
        self
    }

    /// `identity` (map passthrough), `extract` (map: pulls the field named by
    /// a string context out of each item), `count` (aggregate: array length),
    /// and `sum` (aggregate: sums a numeric array), enough to drive a
    /// map-reduce reduction without a host application supplying its own.
    pub fn with_builtins() -> Self {
        Self::new()
            .register("identity", |input: &Value, _ctx: Option<&Value>| Ok(input.clone()))
            .register("extract", |input: &Value, ctx: Option<&Value>| {
                let key = ctx
                    .and_then(|c| c.as_str())
                    .ok_or_else(|| "extract requires a string context naming the field".to_string())?;
                Ok(input.get(key).cloned().unwrap_or(Value::Null))
            })
            .register("count", |input: &Value, _ctx: Option<&Value>| {
                let len = input.as_array().map(|a| a.len()).unwrap_or(0);
                Ok(serde_json::json!(len))
            })
            .register("sum", |input: &Value, _ctx: Option<&Value>| {
                let items = input.as_array().ok_or_else(|| "sum expects an array".to_string())?;
                let total: f64 = items.iter().filter_map(|v| v.as_f64()).sum();
                Ok(serde_json::json!(total))
            })
    }
}

impl PipelineFnRegistry for InMemoryPipelineFnRegistry {
    fn lookup(&self, func_id: &str) -> Option<&dyn PipelineFn> {
        self.functions.get(func_id).map(|b| b.as_ref())
    }
}
