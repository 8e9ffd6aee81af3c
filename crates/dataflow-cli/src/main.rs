//! Thin `clap`-derive CLI over the [`dataflow_runtime::Client`] façade.
//! The only binary in the workspace, and the only place a
//! `tracing-subscriber` global subscriber is installed. Every library crate
//! below it only emits `tracing` events, never configures a subscriber
//! itself, matching the pack-wide convention that subscriber setup belongs
//! to the final binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dataflow_kernel::config::{load_config, EngineConfig};
use dataflow_kernel::ids::DataflowId;
use dataflow_kernel::model::command::CommandPayload;
use dataflow_kernel::model::dataflow::DataflowStatus;
use dataflow_runtime::client::{CreateOptions, ExecuteOutcome};
use dataflow_runtime::registry::{InMemoryFunctionRegistry, InMemoryPipelineFnRegistry};
use dataflow_runtime::Client;
use dataflow_store::{DataflowFilter, InMemoryStore, Page, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dataflow", version, about = "Drive the persistent dataflow execution engine")]
struct Cli {
    /// Path to an engine config file (TOML/YAML/JSON/INI/RON/JSON5).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a dataflow from a JSON array of commands read from a file (or `-` for stdin).
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        commands: PathBuf,
        #[arg(long)]
        parent: Option<DataflowId>,
    },
    /// Start (or attach to) the scheduler for a dataflow and block until it finishes.
    Execute { dataflow_id: DataflowId },
    /// Gracefully cancel a dataflow, waiting up to `--timeout` seconds for it to settle.
    Cancel {
        dataflow_id: DataflowId,
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Immediately terminate a dataflow without draining running workers.
    Terminate { dataflow_id: DataflowId },
    /// List dataflows, newest first.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show one dataflow and its nodes; `--full` also lists its data items.
    Show {
        dataflow_id: DataflowId,
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("loading engine config")?;
    let client = build_client(&config).await?;

    match cli.command {
        Command::Create { owner, commands, parent } => {
            let dataflow_id = run_create(&client, owner, commands, parent).await?;
            println!("{{\"success\":true,\"dataflow_id\":\"{dataflow_id}\"}}");
        }
        Command::Execute { dataflow_id } => {
            let outcome = client.execute(dataflow_id).await.map_err(|e| anyhow::anyhow!("{e:?}"))?;
            print_execute_outcome(&outcome);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::Cancel { dataflow_id, timeout } => {
            let outcome = client
                .cancel(dataflow_id, Duration::from_secs(timeout))
                .await
                .map_err(|e| anyhow::anyhow!("{e:?}"))?;
            println!("{{\"success\":true,\"outcome\":\"{outcome:?}\"}}");
        }
        Command::Terminate { dataflow_id } => {
            client.terminate(dataflow_id).await.map_err(|e| anyhow::anyhow!("{e:?}"))?;
            println!("{{\"success\":true}}");
        }
        Command::List { status, limit, offset } => {
            let filter = DataflowFilter {
                owner: None,
                status: status.as_deref().map(parse_status).transpose()?,
            };
            let dataflows = client
                .list(filter, Page { limit, offset })
                .await
                .map_err(|e| anyhow::anyhow!("{e:?}"))?;
            for df in dataflows {
                println!("{}\t{}\t{:?}", df.id, df.owner, df.status);
            }
        }
        Command::Show { dataflow_id, full } => {
            let detail = client.show(dataflow_id, full).await.map_err(|e| anyhow::anyhow!("{e:?}"))?;
            println!("dataflow {} owner={} status={:?}", detail.dataflow.id, detail.dataflow.owner, detail.dataflow.status);
            for node in detail.nodes {
                let parent = node
                    .parent_node_id
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  node {} type={} status={:?} parent={}", node.id, node.node_type, node.status, parent);
            }
            for item in detail.data.unwrap_or_default() {
                let node = item
                    .node_id
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let key = item.key.as_deref().unwrap_or("-");
                println!(
                    "  data {} type={:?} node={} key={} content_type={}",
                    item.id,
                    item.data_type,
                    node,
                    key,
                    item.content_type.as_str()
                );
            }
        }
    }

    Ok(())
}

async fn build_client(config: &EngineConfig) -> Result<Client> {
    let store: Arc<dyn Store> = match config.store_backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let uri = config.store_uri.as_deref().unwrap_or("sqlite::memory:");
            Arc::new(
                dataflow_store::sqlite::SqliteStore::connect(uri)
                    .await
                    .map_err(|e| anyhow::anyhow!("connecting sqlite store: {e}"))?,
            )
        }
        other => anyhow::bail!("store backend '{other}' is not available in this binary"),
    };
    Ok(Client::new(
        store,
        Arc::new(InMemoryFunctionRegistry::with_builtins()),
        Arc::new(InMemoryPipelineFnRegistry::with_builtins()),
        config.concurrency_cap,
    ))
}

async fn run_create(client: &Client, owner: String, commands_path: PathBuf, parent: Option<DataflowId>) -> Result<DataflowId> {
    let raw = if commands_path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(&commands_path).with_context(|| format!("reading {}", commands_path.display()))?
    };
    let commands: Vec<CommandPayload> = serde_json::from_str(&raw).context("parsing commands as a JSON array")?;
    client
        .create_workflow(commands, CreateOptions { owner, parent_dataflow_id: parent })
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))
}

fn print_execute_outcome(outcome: &ExecuteOutcome) {
    match &outcome.error {
        Some(error) => println!("{{\"success\":{},\"status\":\"{:?}\",\"error\":\"{error}\"}}", outcome.success, outcome.status),
        None => println!("{{\"success\":{},\"status\":\"{:?}\"}}", outcome.success, outcome.status),
    }
}

fn parse_status(raw: &str) -> Result<DataflowStatus> {
    match raw {
        "pending" => Ok(DataflowStatus::Pending),
        "running" => Ok(DataflowStatus::Running),
        "completed" => Ok(DataflowStatus::Completed),
        "failed" => Ok(DataflowStatus::Failed),
        "canceled" => Ok(DataflowStatus::Canceled),
        "terminated" => Ok(DataflowStatus::Terminated),
        other => anyhow::bail!("unknown status: {other}"),
    }
}
