//! Map-reduce item/reduction pipeline step types and their evaluator.
//!
//! An unrecognised step type is rejected at validation time rather than at
//! execution time: the step family is a closed enum, not a dynamic table of
//! string-keyed behaviors, so a bad `step_type` fails fast on the node's
//! config instead of surfacing mid-run.

use crate::error::{ConfigurationError, RuntimeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The per-step function a pipeline stage invokes, looked up through the same
/// kind of name->behavior registry as node functions, but synchronous:
/// pipeline steps operate on already-materialised values.
pub trait PipelineFn: Send + Sync {
    fn call(&self, input: &Value, context: Option<&Value>) -> Result<Value, String>;
}

impl<F> PipelineFn for F
where
    F: Fn(&Value, Option<&Value>) -> Result<Value, String> + Send + Sync,
{
    fn call(&self, input: &Value, context: Option<&Value>) -> Result<Value, String> {
        self(input, context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStepType {
    Map,
    Filter,
    Group,
    ReduceGroups,
    Aggregate,
    Flatten,
}

/// The shape a step type requires of its input, independent of any
/// particular value, so a caller can check compatibility before data exists
/// (e.g. a map-reduce node's reduction pipeline at config-parse time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineDataShape {
    Array,
    Object,
}

impl PipelineDataShape {
    fn label(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Object => "grouped object",
        }
    }

    fn matches(self, input: &Value) -> bool {
        match self {
            Self::Array => input.is_array(),
            Self::Object => input.is_object(),
        }
    }
}

impl fmt::Display for PipelineStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Group => "group",
            Self::ReduceGroups => "reduce_groups",
            Self::Aggregate => "aggregate",
            Self::Flatten => "flatten",
        };
        write!(f, "{s}")
    }
}

impl PipelineStepType {
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        match raw {
            "map" => Ok(Self::Map),
            "filter" => Ok(Self::Filter),
            "group" => Ok(Self::Group),
            "reduce_groups" => Ok(Self::ReduceGroups),
            "aggregate" => Ok(Self::Aggregate),
            "flatten" => Ok(Self::Flatten),
            other => Err(ConfigurationError::InvalidPipelineStep(other.to_string())),
        }
    }

    /// `map`/`filter`/`group` require array input; `reduce_groups` requires a
    /// grouped object; `aggregate`/`flatten` accept any shape.
    pub fn required_shape(self) -> Option<PipelineDataShape> {
        match self {
            Self::Map | Self::Filter | Self::Group => Some(PipelineDataShape::Array),
            Self::ReduceGroups => Some(PipelineDataShape::Object),
            Self::Aggregate | Self::Flatten => None,
        }
    }

    fn validate_input(self, input: &Value) -> Result<(), ConfigurationError> {
        match self.required_shape() {
            None => Ok(()),
            Some(shape) if shape.matches(input) => Ok(()),
            Some(shape) => Err(ConfigurationError::IncompatiblePipelineData {
                step: self.to_string(),
                expected: shape.label().to_string(),
            }),
        }
    }

    /// The shape this step type leaves its input in, when that's knowable
    /// without running any function. `None` for `Aggregate`: its output is
    /// whatever the looked-up function returns, so shape-checking a pipeline
    /// ahead of time stops there and falls back to runtime validation.
    fn output_shape(self) -> Option<PipelineDataShape> {
        match self {
            Self::Map | Self::Filter | Self::Flatten => Some(PipelineDataShape::Array),
            Self::Group | Self::ReduceGroups => Some(PipelineDataShape::Object),
            Self::Aggregate => None,
        }
    }
}

/// Checks a pipeline's declared step types against `initial_shape` without
/// touching any data, so a node can reject an `incompatible_pipeline_data`
/// config at startup instead of discovering it mid-run.
/// Stops checking once a step's output shape isn't statically knowable
/// (currently only after an `Aggregate` step); everything before that point
/// is fully validated.
pub fn validate_pipeline_shapes(
    steps: &[PipelineStep],
    initial_shape: PipelineDataShape,
) -> Result<(), ConfigurationError> {
    let mut shape = Some(initial_shape);
    for step in steps {
        let Some(current) = shape else { break };
        if let Some(required) = step.step_type.required_shape() {
            if required != current {
                return Err(ConfigurationError::IncompatiblePipelineData {
                    step: step.step_type.to_string(),
                    expected: required.label().to_string(),
                });
            }
        }
        shape = step.step_type.output_shape();
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub step_type: PipelineStepType,
    pub func_id: String,
    pub context: Option<Value>,
}

impl PipelineStep {
    pub fn new(step_type: PipelineStepType, func_id: impl Into<String>) -> Self {
        Self {
            step_type,
            func_id: func_id.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Looks up a [`PipelineFn`] by id. Kept as a thin trait, like the function
/// registry for node functions, so host applications supply their own.
pub trait PipelineFnRegistry {
    fn lookup(&self, func_id: &str) -> Option<&dyn PipelineFn>;
}

/// Applies one pipeline step to `input`. Each step sees only its own declared
/// `context`, never one accumulated from prior steps.
pub fn apply_step(
    step: &PipelineStep,
    input: Value,
    registry: &dyn PipelineFnRegistry,
) -> Result<Value, RuntimeError> {
    step.step_type
        .validate_input(&input)
        .map_err(|e| RuntimeError::PipelineFailed(e.to_string()))?;

    if step.step_type == PipelineStepType::Flatten {
        let mut out = Vec::new();
        flatten_into(&input, &mut out);
        return Ok(Value::Array(out));
    }

    let func = registry
        .lookup(&step.func_id)
        .ok_or_else(|| RuntimeError::PipelineFailed(format!("unknown func_id: {}", step.func_id)))?;

    match step.step_type {
        PipelineStepType::Map => {
            let arr = input.as_array().expect("validated array");
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(
                    func.call(item, step.context.as_ref())
                        .map_err(RuntimeError::ItemPipelineFailed)?,
                );
            }
            Ok(Value::Array(out))
        }
        PipelineStepType::Filter => {
            let arr = input.as_array().expect("validated array");
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let keep = func
                    .call(item, step.context.as_ref())
                    .map_err(RuntimeError::ItemPipelineFailed)?;
                if keep.as_bool().unwrap_or(false) {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        PipelineStepType::Group => {
            let arr = input.as_array().expect("validated array");
            let mut groups = serde_json::Map::new();
            for item in arr {
                let key_value = func
                    .call(item, step.context.as_ref())
                    .map_err(RuntimeError::ItemPipelineFailed)?;
                let key = key_value.as_str().map(str::to_string).unwrap_or_else(|| key_value.to_string());
                groups
                    .entry(key)
                    .or_insert_with(|| Value::Array(Vec::new()))
                    .as_array_mut()
                    .expect("group bucket is always an array")
                    .push(item.clone());
            }
            Ok(Value::Object(groups))
        }
        PipelineStepType::ReduceGroups => {
            let obj = input.as_object().expect("validated object");
            let mut out = serde_json::Map::new();
            for (key, bucket) in obj {
                let reduced = func
                    .call(bucket, step.context.as_ref())
                    .map_err(RuntimeError::ItemPipelineFailed)?;
                out.insert(key.clone(), reduced);
            }
            Ok(Value::Object(out))
        }
        PipelineStepType::Aggregate => func
            .call(&input, step.context.as_ref())
            .map_err(RuntimeError::PipelineFailed),
        PipelineStepType::Flatten => unreachable!("handled before func lookup"),
    }
}

fn flatten_into(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// Runs a full pipeline left to right. `apply([s1..sn], x) ==
/// apply([sn], apply([s1..s(n-1)], x))` whenever no step fails.
pub fn apply_pipeline(
    steps: &[PipelineStep],
    input: Value,
    registry: &dyn PipelineFnRegistry,
) -> Result<Value, RuntimeError> {
    steps
        .iter()
        .try_fold(input, |acc, step| apply_step(step, acc, registry))
}
