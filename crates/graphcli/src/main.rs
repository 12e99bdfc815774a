// crates/graphcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use graphcore::{node_types, EventKind, ExecutionEvent, NodeInstance, Value, WorkflowGraph};
use graphruntime::{ExecutionOrchestrator, GraphRuntime, NodeRegistry, RuntimeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphflow")]
#[command(about = "Workflow graph engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Only run this node and what it depends on
        #[arg(short, long)]
        target: Option<String>,

        /// Keep walking independent nodes after a failure
        #[arg(long)]
        continue_on_error: bool,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the cleanup timeout
        #[arg(long)]
        cleanup_timeout_ms: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            target,
            continue_on_error,
            config,
            cleanup_timeout_ms,
            verbose,
        } => {
            init_logging(verbose);

            let mut config = match config {
                Some(path) => RuntimeConfig::from_json_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => RuntimeConfig::default(),
            };
            if continue_on_error {
                config.continue_on_error = true;
            }
            if let Some(ms) = cleanup_timeout_ms {
                config.cleanup_timeout_ms = ms;
            }

            run_workflow(&file, input, target, config).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> NodeRegistry {
    graphnodes::standard_registry()
}

fn load_workflow(file: &Path) -> Result<WorkflowGraph> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading workflow {}", file.display()))?;
    let workflow: WorkflowGraph = serde_json::from_str(&raw)
        .with_context(|| format!("parsing workflow {}", file.display()))?;
    Ok(workflow)
}

fn parse_inputs(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => {
            Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        }
        _ => bail!("Input must be a JSON object"),
    }
}

fn print_event(event: &ExecutionEvent) {
    let node = event.node_id().unwrap_or("?");
    let field = |key: &str| event.payload.get(key).cloned().unwrap_or(Value::Null);
    match event.kind {
        EventKind::WorkflowStarted => {
            println!("▶️  Workflow started ({} nodes)", field("total_nodes"));
        }
        EventKind::NodeStarted => {
            println!("  ⚡ Starting node: {} ({})", node, field("node_type"));
        }
        EventKind::NodeCompleted => {
            println!("  ✅ Node {} completed in {}ms", node, field("duration_ms"));
        }
        EventKind::NodeFailed => {
            println!("  ❌ Node {} failed: {}", node, field("error"));
        }
        EventKind::NodeSkipped => {
            println!("  ⏭️  Node {} skipped ({})", node, field("reason"));
        }
        EventKind::NodeMessage => {
            let marker = if field("level").as_str() == Some("warn") {
                "⚠️ "
            } else {
                "ℹ️ "
            };
            println!("     {} [{}] {}", marker, node, field("message"));
        }
        EventKind::WorkflowCompleted => {
            println!("✨ Workflow completed successfully in {}ms", field("duration_ms"));
        }
        EventKind::WorkflowError => {
            println!("💥 Workflow failed at {}: {}", node, field("error"));
        }
        EventKind::WorkflowStopped => {
            println!("⏹️  Workflow stopped after {}ms", field("duration_ms"));
        }
    }
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    target: Option<String>,
    config: RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let inputs = parse_inputs(input)?;

    let runtime = Arc::new(GraphRuntime::with_registry(Arc::new(registry()), config));
    let mut options = runtime.default_options();
    if let Some(target) = target {
        options = options.with_target(target);
    }

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
            if event.kind.is_terminal() {
                break;
            }
        }
    });

    let ctrl_c = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current node");
                runtime.stop();
            }
        })
    };

    let result = runtime.execute_with(&workflow, inputs, options).await;
    ctrl_c.abort();
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            event_task.abort();
            return Err(e).context("workflow rejected");
        }
    };

    // Wait for events to finish printing
    if tokio::time::timeout(Duration::from_millis(500), event_task).await.is_err() {
        tracing::debug!("Event printer did not drain in time");
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Status: {}", result.status);
    println!("   Completed: {}/{} nodes", result.completed_nodes, result.total_nodes);
    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }

    if !result.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        let mut node_ids: Vec<_> = result.outputs.keys().collect();
        node_ids.sort();
        for node_id in node_ids {
            let outputs = &result.outputs[node_id];
            if !outputs.is_empty() {
                println!("   Node {}:", node_id);
                for (key, value) in outputs {
                    println!("     {}: {}", key, value);
                }
            }
        }
    }

    if !result.success {
        match &result.error {
            Some(error) => bail!(
                "workflow {}: node {} failed: {}",
                result.status,
                error.node_id,
                error.message
            ),
            None => bail!("workflow {}", result.status),
        }
    }

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    workflow.validate()?;

    let start = ExecutionOrchestrator::new(&workflow).find_start_node()?;

    let registry = registry();
    let unknown: Vec<&NodeInstance> = workflow
        .nodes
        .iter()
        .filter(|n| !registry.contains(&n.node_type))
        .collect();
    if !unknown.is_empty() {
        for node in &unknown {
            println!("❌ Node {} has unknown type {}", node.id, node.node_type);
        }
        bail!("{} node(s) with unknown type", unknown.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Start: {}", start.display_name());
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowGraph::new("Example Branching Workflow")
        .with_variable("name", "World")
        .with_variable("loud", false);
    workflow.description = Some("Greets someone, quietly or loudly".to_string());

    workflow.add_node(
        NodeInstance::new("start", node_types::START)
            .with_name("Start")
            .with_position(0.0, 100.0),
    );
    workflow.add_node(
        NodeInstance::new("check", node_types::IF)
            .with_name("Loud?")
            .with_parameter("condition", "{{loud}}")
            .with_position(200.0, 100.0),
    );
    workflow.add_node(
        NodeInstance::new("shout", "debug.log")
            .with_name("Shout")
            .with_parameter("message", "HELLO {{name}}! ({{$time}})")
            .with_parameter("level", "warn")
            .with_position(400.0, 0.0),
    );
    workflow.add_node(
        NodeInstance::new("greet", "debug.log")
            .with_name("Greet")
            .with_parameter("message", "Hello {{name}}")
            .with_position(400.0, 200.0),
    );
    workflow.add_node(
        NodeInstance::new("end", node_types::END)
            .with_name("End")
            .with_position(600.0, 100.0),
    );

    workflow.connect("start", "exec_out", "check", "exec_in");
    workflow.connect("check", "true", "shout", "exec_in");
    workflow.connect("check", "false", "greet", "exec_in");
    workflow.connect("shout", "exec_out", "end", "exec_in");
    workflow.connect("greet", "exec_out", "end", "exec_in");

    // Save to file
    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  graphflow run --file {} --input '{{\"name\": \"Ada\", \"loud\": true}}'",
        output.display()
    );

    Ok(())
}
