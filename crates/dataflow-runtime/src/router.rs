//! Data Router: turns one node's produced output (or error) into data items
//! at the declared `data_targets`/`error_targets`, in the same command batch
//! as the node's terminal status change.
//!
//! Targets are declared per-node (`config.data_targets`/`error_targets`)
//! rather than resolved against a dataflow-wide connection table, and a
//! missing destination is dropped rather than treated as an error.

use dataflow_kernel::error::RuntimeError;
use dataflow_kernel::ids::DataflowId;
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::data::{ContentType, DataType};
use dataflow_kernel::model::node::Node;
use dataflow_kernel::model::target::Target;
use dataflow_kernel::ids::DataId;
use dataflow_store::Store;
use serde_json::Value;
use tracing::debug;

pub enum RouteOutcome {
    Success(Value),
    Failure { code: String, message: String },
}

fn parse_targets(config: &Value, key: &str) -> Vec<Target> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| serde_json::from_value(t.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Encodes `content` per `content_type`: JSON-encode structured values (the
/// default), stringify everything else when `text/plain` is requested.
/// Reference-item creation ("large output, reference-enabled") is left to a
/// caller that has a reference threshold policy; this engine routes content
/// inline.
fn encode_content(content: &Value, content_type: Option<&ContentType>) -> (Value, ContentType) {
    match content_type {
        Some(ContentType::Text) => (Value::String(content.to_string()), ContentType::Text),
        Some(other) => (content.clone(), other.clone()),
        None => (content.clone(), ContentType::Json),
    }
}

/// Builds the command batch for one node's terminal transition: the
/// producer's own `node.output` record, one `CreateData` per resolved
/// target, and the trailing `CompleteNode`/`FailNode`. Targets naming a
/// node that no longer exists are dropped silently; targets are additive,
/// not required.
pub async fn route(
    store: &dyn Store,
    node: &Node,
    dataflow: DataflowId,
    outcome: RouteOutcome,
) -> Result<Vec<CommandPayload>, RuntimeError> {
    let (targets, terminal, discriminator) = match &outcome {
        RouteOutcome::Success(value) => (
            parse_targets(&node.config, "data_targets"),
            value.clone(),
            "success",
        ),
        RouteOutcome::Failure { message, .. } => (
            parse_targets(&node.config, "error_targets"),
            Value::String(message.clone()),
            "error",
        ),
    };

    // The producer always owns a record of what it emitted, whether or not
    // any target consumes it; iteration result collection reads these.
    let mut commands = vec![CommandPayload::CreateData {
        data_id: DataId::new(),
        data_type: DataType::NodeOutput,
        node_id: Some(node.id),
        key: None,
        content: terminal.clone(),
        content_type: ContentType::Json,
        discriminator: Some(discriminator.to_string()),
        metadata: Default::default(),
    }];

    for target in targets {
        if let Some(target_node_id) = target.node_id {
            if store.get_node(target_node_id).await.is_err() {
                debug!(%dataflow, node = %node.id, target = %target_node_id, "dropping target: destination node no longer exists");
                continue;
            }
        }
        let (content, content_type) = encode_content(&terminal, target.content_type.as_ref());
        commands.push(CommandPayload::CreateData {
            data_id: DataId::new(),
            data_type: target.data_type,
            node_id: target.node_id,
            key: target.key.clone(),
            content,
            content_type,
            discriminator: Some(discriminator.to_string()),
            metadata: Default::default(),
        });
    }

    match outcome {
        RouteOutcome::Success(_) => {
            commands.push(CommandPayload::CompleteNode {
                node_id: node.id,
                message: None,
            });
        }
        RouteOutcome::Failure { code, message } => {
            commands.push(CommandPayload::FailNode {
                node_id: node.id,
                error_code: code,
                error_message: message,
            });
        }
    }

    Ok(commands)
}
