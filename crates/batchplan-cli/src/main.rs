//! batchplan CLI: validate, explain and run YAML request documents.

use batchplan_core::config::{ExecConfig, PlannerConfig};
use batchplan_core::Value;
use batchplan_exec::{ExecutionInput, Executor};
use batchplan_planner::{
    build_plan, parse_yaml_request, print_plan_graph, DocConfig, FieldPlans, PrintOptions,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "batchplan")]
#[command(about = "Batched query planning and execution over resolved request trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a request document against a JSON input value
    Run {
        /// Path to the request YAML file
        #[arg(short, long)]
        request: PathBuf,

        /// JSON file holding the root value (defaults to `{}`)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// JSON file holding the request context
        #[arg(long)]
        context: Option<PathBuf>,

        /// Maximum concurrent non-sync batch calls (overrides config)
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Request timeout in milliseconds (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Run sibling buckets one after another
        #[arg(long)]
        sequential: bool,

        /// Skip step deduplication
        #[arg(long)]
        no_dedupe: bool,

        /// Print the run manifest to stderr
        #[arg(long)]
        manifest: bool,
    },

    /// Validate a request YAML file (syntax and structure)
    Validate {
        /// Path to the request YAML file
        #[arg(short, long)]
        request: PathBuf,
    },

    /// Show the operation plan for a request (EXPLAIN)
    Explain {
        /// Path to the request YAML file
        #[arg(short, long)]
        request: PathBuf,

        /// Shorter diagram: no bucket subgraph labels beyond the reason
        #[arg(long)]
        concise: bool,

        /// Print the plan description as JSON instead of a diagram
        #[arg(long)]
        json: bool,

        /// Skip step deduplication
        #[arg(long)]
        no_dedupe: bool,
    },
}

/// Command-line overrides; the highest priority layer.
#[derive(Debug, Default)]
struct Overrides {
    no_dedupe: bool,
    max_concurrent: Option<usize>,
    timeout_ms: Option<u64>,
    sequential: bool,
}

fn main() {
    install_tracing_subscriber();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            request,
            input,
            context,
            max_concurrent,
            timeout_ms,
            sequential,
            no_dedupe,
            manifest,
        } => {
            let overrides = Overrides {
                no_dedupe,
                max_concurrent,
                timeout_ms,
                sequential,
            };
            if let Err(e) = run_request(
                &request,
                input.as_deref(),
                context.as_deref(),
                &overrides,
                manifest,
            ) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { request } => {
            if let Err(e) = validate_request(&request) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Request is valid");
        }
        Commands::Explain {
            request,
            concise,
            json,
            no_dedupe,
        } => {
            let overrides = Overrides {
                no_dedupe,
                ..Default::default()
            };
            if let Err(e) = explain_request(&request, concise, json, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_request(
    request_path: &Path,
    input_path: Option<&Path>,
    context_path: Option<&Path>,
    overrides: &Overrides,
    print_manifest: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(request_path)?;
    let doc = parse_yaml_request(&yaml_content)?;
    let (planner_cfg, exec_cfg) = resolve_configs(doc.config.as_ref(), overrides);

    let root_value = match input_path {
        Some(path) => read_json(path)?,
        None => Value::Object(Default::default()),
    };
    let mut input = ExecutionInput::new(root_value);
    if let Some(path) = context_path {
        input = input.with_context(read_json(path)?);
    }

    let plan = build_plan(&doc.request, &FieldPlans::new(), planner_cfg)?;
    let executor = Executor::new(exec_cfg)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(executor.execute(&plan, input))?;

    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    if print_manifest {
        eprintln!("{}", serde_json::to_string_pretty(&result.manifest)?);
    } else if !result.errors.is_empty() {
        eprintln!("{} error(s) in result", result.errors.len());
    }
    Ok(())
}

fn validate_request(request_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(request_path)?;
    let _ = parse_yaml_request(&yaml_content)?;
    Ok(())
}

fn explain_request(
    request_path: &Path,
    concise: bool,
    json: bool,
    overrides: &Overrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(request_path)?;
    let doc = parse_yaml_request(&yaml_content)?;
    let (planner_cfg, _) = resolve_configs(doc.config.as_ref(), overrides);
    let plan = build_plan(&doc.request, &FieldPlans::new(), planner_cfg)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan.describe())?);
        return Ok(());
    }

    println!("{}", print_plan_graph(&plan, PrintOptions { concise })?);
    println!();
    println!("%% Plan hash: {}", plan.fingerprint()?);
    Ok(())
}

/// Environment, then the document's `config:` block, then command-line flags.
fn resolve_configs(doc: Option<&DocConfig>, overrides: &Overrides) -> (PlannerConfig, ExecConfig) {
    let mut planner = PlannerConfig::from_env();
    let mut exec = ExecConfig::from_env();
    if let Some(doc) = doc {
        doc.apply_planner(&mut planner);
        doc.apply_exec(&mut exec);
    }
    apply_overrides(&mut planner, &mut exec, overrides);
    (planner, exec)
}

fn apply_overrides(planner: &mut PlannerConfig, exec: &mut ExecConfig, overrides: &Overrides) {
    if overrides.no_dedupe {
        planner.dedupe = false;
    }
    if let Some(max) = overrides.max_concurrent {
        exec.max_concurrent_batches = max;
    }
    if let Some(ms) = overrides.timeout_ms {
        exec.request_timeout_ms = Some(ms);
    }
    if overrides.sequential {
        exec.parallel_buckets = false;
    }
}

fn read_json(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    Ok(Value::from(json))
}

#[cfg(test)]
mod tests {
    use super::{apply_overrides, ExecConfig, Overrides, PlannerConfig};
    use batchplan_planner::DocConfig;

    #[test]
    fn document_config_overrides_env_defaults() {
        let mut planner = PlannerConfig::default();
        let mut exec = ExecConfig::default();
        let doc = DocConfig {
            dedupe: Some(false),
            max_concurrent_batches: Some(2),
            request_timeout_ms: Some(500),
            ..Default::default()
        };
        doc.apply_planner(&mut planner);
        doc.apply_exec(&mut exec);
        assert!(!planner.dedupe);
        assert_eq!(planner.max_depth, PlannerConfig::default().max_depth);
        assert_eq!(exec.max_concurrent_batches, 2);
        assert_eq!(exec.request_timeout_ms, Some(500));
        assert!(exec.parallel_buckets);
    }

    #[test]
    fn cli_overrides_higher_priority_than_document() {
        let mut planner = PlannerConfig::default();
        let mut exec = ExecConfig::default();
        let doc = DocConfig {
            max_concurrent_batches: Some(2),
            ..Default::default()
        };
        doc.apply_exec(&mut exec);
        apply_overrides(
            &mut planner,
            &mut exec,
            &Overrides {
                max_concurrent: Some(8),
                sequential: true,
                no_dedupe: true,
                ..Default::default()
            },
        );
        assert_eq!(exec.max_concurrent_batches, 8);
        assert!(!exec.parallel_buckets);
        assert!(!planner.dedupe);
    }
}
