//! ST-040: CLI subcommands: init, validate, synth, audit, diff, deploy, destroy, outputs, status.

use crate::core::error::{Error, Result};
use crate::core::synth::{self, TemplateFormat};
use crate::core::template::Template;
use crate::core::topology::Topology;
use crate::core::{audit, parser, planner, resolver, state, types};
use crate::resources::outputs;
use crate::transport::local::AwsCli;
use crate::transport::{DryRun, Engine};
use crate::tripwire::{eventlog, hasher};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

const DEFAULT_CONFIG: &str = "stack.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "stackforge",
    version,
    about = "Declare a web + MySQL + Redis topology as data, synthesize it to CloudFormation, deploy it"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// `--profile` / `--region` passed through to the `aws` CLI.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// AWS named profile
    #[arg(long)]
    pub profile: Option<String>,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,
}

impl EngineArgs {
    fn aws(&self) -> AwsCli {
        AwsCli {
            profile: self.profile.clone(),
            region: self.region.clone(),
            ..AwsCli::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stackforge project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml without contacting the provider
    Validate {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Synthesize the deployment template
    Synth {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "cdk.out")]
        out_dir: PathBuf,

        /// Template format (json, yaml)
        #[arg(long, default_value = "json")]
        format: TemplateFormat,

        /// Print the template instead of writing it
        #[arg(long)]
        stdout: bool,
    },

    /// Check isolation, placement and teardown properties of the template
    Audit {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show what a deploy would change (diff against the last lock)
    Diff {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Synthesize, audit and submit the stack
    Deploy {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output directory for the template
        #[arg(short, long, default_value = "cdk.out")]
        out_dir: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Show the engine commands without running them
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Withdraw the stack
    Destroy {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Show the teardown plan and engine commands without running them
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print the outputs of the deployed stack
    Outputs {
        /// Path to stack.yaml (built-in defaults when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Print the JSON schema of stack.yaml
    Schema,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(file.as_deref()),
        Commands::Synth {
            file,
            out_dir,
            format,
            stdout,
        } => cmd_synth(file.as_deref(), &out_dir, format, stdout),
        Commands::Audit { file } => cmd_audit(file.as_deref()),
        Commands::Diff { file, state_dir } => cmd_diff(file.as_deref(), &state_dir),
        Commands::Deploy {
            file,
            out_dir,
            state_dir,
            dry_run,
            engine,
        } => cmd_deploy(file.as_deref(), &out_dir, &state_dir, dry_run, &engine),
        Commands::Destroy {
            file,
            state_dir,
            dry_run,
            engine,
        } => cmd_destroy(file.as_deref(), &state_dir, dry_run, &engine),
        Commands::Outputs { file, engine } => cmd_outputs(file.as_deref(), &engine.aws()),
        Commands::Status { state_dir } => cmd_status(&state_dir),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stackforge", &mut std::io::stdout());
            Ok(())
        }
    }
}

// ============================================================================
// Config loading
// ============================================================================

/// Load the configuration and the directory relative paths resolve against.
/// Without `-f`, `stack.yaml` is used when present, built-in defaults otherwise.
fn load_config(file: Option<&Path>) -> Result<(types::StackConfig, PathBuf)> {
    let path = match file {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => {
            tracing::info!("no {} found, using built-in defaults", DEFAULT_CONFIG);
            return Ok((types::StackConfig::default(), PathBuf::from(".")));
        }
    };
    let config = parser::parse_config_file(&path)?;
    let base = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((config, base))
}

/// Parse and validate, printing every error before failing.
fn parse_and_validate(file: Option<&Path>) -> Result<(types::StackConfig, PathBuf)> {
    let (config, base) = load_config(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok((config, base));
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::Validation(errors.len()))
}

fn load_topology(file: Option<&Path>) -> Result<Topology> {
    let (config, base) = parse_and_validate(file)?;
    Topology::load(config, &base)
}

// ============================================================================
// Commands
// ============================================================================

const STACK_TEMPLATE: &str = r#"version: "1.0"
name: cdk-redis-stack
description: "Web server with MySQL and Redis, managed by stackforge"

network:
  cidr: 10.0.0.0/16
  max_azs: 2
  nat_gateways: 1

web:
  app_port: 8008
  instance_type: t3.small
  user_data: ./userdata.sh

database:
  engine_version: "8.0.28"
  instance_class: db.t3.medium
  name: appdb
  removal_policy: destroy

cache:
  engine: redis
  node_type: cache.t3.small
  nodes: 1
"#;

const USERDATA_TEMPLATE: &str = r#"#!/bin/bash
# Runs once at first boot, as root.
yum update -y
yum install -y docker jq
systemctl enable --now docker
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG);
    if config_path.exists() {
        return Err(Error::State(format!("{} already exists", config_path.display())));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)?;
    std::fs::write(&config_path, STACK_TEMPLATE)?;

    let script_path = path.join("userdata.sh");
    let wrote_script = !script_path.exists();
    if wrote_script {
        std::fs::write(&script_path, USERDATA_TEMPLATE)?;
    }

    println!("Initialized stackforge project at {}", path.display());
    println!("  Created: {}", config_path.display());
    if wrote_script {
        println!("  Created: {}", script_path.display());
    }
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: Option<&Path>) -> Result<()> {
    let (config, base) = parse_and_validate(file)?;
    let script = crate::core::topology::script_location(&config, &base);
    if !script.is_file() {
        eprintln!("  WARNING: bootstrap script {} not found", script.display());
    }
    println!(
        "OK: {} ({} zones, {} subnets, {} NAT, mysql {}, {} x{})",
        config.name,
        config.network.max_azs,
        config.network.max_azs * parser::SUBNET_TIERS,
        config.network.nat_gateways,
        config.database.engine_version,
        config.cache.engine,
        config.cache.nodes
    );
    Ok(())
}

fn cmd_synth(file: Option<&Path>, out_dir: &Path, format: TemplateFormat, stdout: bool) -> Result<()> {
    let topology = load_topology(file)?;
    let template = topology.synthesize()?;

    if stdout {
        print!("{}", synth::render(&template, format)?);
        return Ok(());
    }
    let path = synth::write_template(out_dir, &topology.config.name, &template, format)?;
    println!(
        "Synthesized {} ({} resources, {} outputs) to {}",
        topology.config.name,
        template.resources.len(),
        template.outputs.len(),
        path.display()
    );
    Ok(())
}

/// Print findings; fail if there are any.
fn report_audit(template: &Template) -> Result<()> {
    let findings = audit::audit(template);
    if findings.is_empty() {
        return Ok(());
    }
    for f in &findings {
        eprintln!("  FINDING: {}", f);
    }
    Err(Error::Audit(findings.len()))
}

fn cmd_audit(file: Option<&Path>) -> Result<()> {
    let topology = load_topology(file)?;
    let template = topology.synthesize()?;
    report_audit(&template)?;
    println!(
        "Audit passed: {} ({} resources)",
        topology.config.name,
        template.resources.len()
    );
    Ok(())
}

fn cmd_diff(file: Option<&Path>, state_dir: &Path) -> Result<()> {
    let topology = load_topology(file)?;
    let template = topology.synthesize()?;
    let lock = state::load_lock(state_dir, &topology.config.name)?;
    let plan = planner::plan(&topology.config.name, &template, lock.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

/// Summary of a submitted deploy.
#[derive(Debug)]
pub struct DeployReport {
    pub run_id: String,
    pub template_path: PathBuf,
    pub plan: types::ExecutionPlan,
}

/// Synthesize, audit, write, submit, then record the lock and events.
pub fn run_deploy(
    topology: &Topology,
    out_dir: &Path,
    state_dir: &Path,
    engine: &dyn Engine,
) -> Result<DeployReport> {
    let stack = topology.config.name.as_str();
    let template = topology.synthesize()?;
    report_audit(&template)?;

    let template_path = synth::write_template(out_dir, stack, &template, TemplateFormat::Json)?;
    let template_hash = hasher::hash_template(&template)?;
    eventlog::append_event(
        state_dir,
        stack,
        types::ProvenanceEvent::SynthCompleted {
            stack: stack.to_string(),
            template_hash,
            resources: template.resources.len() as u32,
        },
    )?;

    let previous = state::load_lock(state_dir, stack)?;
    let plan = planner::plan(stack, &template, previous.as_ref())?;

    let run_id = eventlog::generate_run_id();
    eventlog::append_event(
        state_dir,
        stack,
        types::ProvenanceEvent::DeployStarted {
            stack: stack.to_string(),
            run_id: run_id.clone(),
            stackforge_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )?;
    tracing::info!(stack, run_id = %run_id, template = %template_path.display(), "submitting stack");

    let started = Instant::now();
    if let Err(e) = engine.deploy(stack, &template_path) {
        tracing::warn!(stack, run_id = %run_id, error = %e, "deploy failed");
        let failed = types::ProvenanceEvent::DeployFailed {
            stack: stack.to_string(),
            run_id,
            error: e.to_string(),
        };
        if let Err(log_err) = eventlog::append_event(state_dir, stack, failed) {
            tracing::warn!(stack, error = %log_err, "could not record deploy_failed");
        }
        return Err(e);
    }

    let order = resolver::build_creation_order(&template)?;
    let lock = state::new_lock(stack, &template, &order)?;
    state::save_lock(state_dir, &lock)?;
    eventlog::append_event(
        state_dir,
        stack,
        types::ProvenanceEvent::DeployCompleted {
            stack: stack.to_string(),
            run_id: run_id.clone(),
            to_create: plan.to_create,
            to_update: plan.to_update,
            to_destroy: plan.to_destroy,
            total_seconds: started.elapsed().as_secs_f64(),
        },
    )?;

    Ok(DeployReport {
        run_id,
        template_path,
        plan,
    })
}

fn cmd_deploy(
    file: Option<&Path>,
    out_dir: &Path,
    state_dir: &Path,
    dry_run: bool,
    engine_args: &EngineArgs,
) -> Result<()> {
    let topology = load_topology(file)?;

    if dry_run {
        let template = topology.synthesize()?;
        report_audit(&template)?;
        let stack = &topology.config.name;
        let path = synth::template_path(out_dir, stack, TemplateFormat::Json);
        let lock = state::load_lock(state_dir, stack)?;
        print_plan(&planner::plan(stack, &template, lock.as_ref())?);
        let recorder = DryRun::new(&engine_args.aws().binary);
        recorder.deploy(stack, &path)?;
        println!();
        for argv in recorder.commands() {
            println!("  would run: {}", engine_args.aws().with_globals(argv).join(" "));
        }
        println!("Dry run: nothing submitted.");
        return Ok(());
    }

    let aws = engine_args.aws();
    let report = run_deploy(&topology, out_dir, state_dir, &aws)?;
    print_plan(&report.plan);
    println!();
    println!(
        "Deploy complete: {} (run {}, template {})",
        topology.config.name,
        report.run_id,
        report.template_path.display()
    );
    print_outputs(&aws, &topology.config.name)
}

fn cmd_destroy(
    file: Option<&Path>,
    state_dir: &Path,
    dry_run: bool,
    engine_args: &EngineArgs,
) -> Result<()> {
    let (config, _) = parse_and_validate(file)?;
    let stack = config.name.as_str();

    let lock = state::load_lock(state_dir, stack)?;
    let retained = match lock {
        Some(ref lock) => print_teardown(&planner::plan_teardown(lock)),
        None => {
            println!("No lock for {}; the engine decides what remains.", stack);
            Vec::new()
        }
    };

    if dry_run {
        let recorder = DryRun::new(&engine_args.aws().binary);
        recorder.delete(stack)?;
        for argv in recorder.commands() {
            println!("  would run: {}", engine_args.aws().with_globals(argv).join(" "));
        }
        println!("Dry run: nothing deleted.");
        return Ok(());
    }

    run_destroy(stack, state_dir, retained, &engine_args.aws())?;
    println!("Destroyed {}.", stack);
    Ok(())
}

/// Request withdrawal, log it, and drop the lock once the engine is done.
pub fn run_destroy(
    stack: &str,
    state_dir: &Path,
    retained: Vec<String>,
    engine: &dyn Engine,
) -> Result<()> {
    eventlog::append_event(
        state_dir,
        stack,
        types::ProvenanceEvent::DestroyRequested {
            stack: stack.to_string(),
            run_id: eventlog::generate_run_id(),
            retained,
        },
    )?;
    engine.delete(stack)?;
    state::remove_lock(state_dir, stack)?;
    Ok(())
}

/// Print the teardown plan; returns the logical IDs that survive withdrawal.
fn print_teardown(entries: &[types::TeardownEntry]) -> Vec<String> {
    println!("Teardown ({} resources):", entries.len());
    let mut retained = Vec::new();
    for e in entries {
        let fate = if e.deletion_protection {
            "BLOCKED (deletion protection)".to_string()
        } else {
            match e.policy {
                types::DeletionPolicy::Delete => "delete".to_string(),
                types::DeletionPolicy::Retain => "RETAIN".to_string(),
                types::DeletionPolicy::Snapshot => "snapshot, then delete".to_string(),
            }
        };
        if !e.destructible() {
            retained.push(e.logical_id.clone());
        }
        println!("  {} [{}]: {}", e.logical_id, e.resource_type, fate);
    }
    if !retained.is_empty() {
        println!("{} resource(s) will outlive the stack.", retained.len());
    }
    retained
}

fn cmd_outputs(file: Option<&Path>, engine: &dyn Engine) -> Result<()> {
    let (config, _) = parse_and_validate(file)?;
    print_outputs(engine, &config.name)
}

/// Print the five named outputs first, then anything else the engine reports.
fn print_outputs(engine: &dyn Engine, stack: &str) -> Result<()> {
    let mut reported = engine.describe_outputs(stack)?;
    if reported.is_empty() {
        println!("No outputs reported for {}.", stack);
        return Ok(());
    }
    reported.sort_by_key(|o| {
        outputs::NAMES
            .iter()
            .position(|n| *n == outputs::display_name(&o.key))
            .unwrap_or(outputs::NAMES.len())
    });
    println!("Outputs:");
    for o in &reported {
        println!("  {} = {}", outputs::display_name(&o.key), o.value);
    }
    Ok(())
}

fn cmd_status(state_dir: &Path) -> Result<()> {
    let locks = state::list_locks(state_dir)?;
    if locks.is_empty() {
        println!("No state found. Run `stackforge deploy` first.");
        return Ok(());
    }
    for lock in &locks {
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Template:  {}", lock.template_hash);
        println!("  Resources: {}", lock.resources.len());
        for (id, rl) in &lock.resources {
            let policy = rl
                .deletion_policy
                .map(|p| format!(" ({})", p))
                .unwrap_or_default();
            println!("    {}: {}{}", id, rl.resource_type, policy);
        }
        println!();
    }
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(types::StackConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
