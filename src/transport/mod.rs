//! ST-030: Provisioning-engine seam. The `aws` CLI, or a dry-run recorder.

pub mod local;

use crate::core::error::{Error, Result};
use serde::Deserialize;
use std::cell::RefCell;
use std::path::Path;

/// Output from running an engine command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `Error::Engine` carrying the engine's stderr.
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = match self.stderr.trim() {
            "" => self.stdout.trim().to_string(),
            s => s.to_string(),
        };
        Err(Error::Engine(format!(
            "{} exited with code {}: {}",
            what, self.exit_code, detail
        )))
    }
}

/// One output reported by the engine for a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StackOutput {
    #[serde(rename = "OutputKey")]
    pub key: String,
    #[serde(rename = "OutputValue")]
    pub value: String,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
}

/// Parse the JSON printed by `describe-stacks --query Stacks[0].Outputs`.
/// A stack without outputs prints `null`.
pub fn parse_outputs(json: &str) -> Result<Vec<StackOutput>> {
    let parsed: Option<Vec<StackOutput>> = serde_json::from_str(json.trim())?;
    Ok(parsed.unwrap_or_default())
}

/// The provisioning engine. Submission is one call; the engine owns ordering,
/// rollback and change detection.
pub trait Engine {
    /// Create or update the stack from a template file.
    fn deploy(&self, stack: &str, template_path: &Path) -> Result<ExecOutput>;

    /// Withdraw the stack.
    fn delete(&self, stack: &str) -> Result<ExecOutput>;

    /// Outputs of the deployed stack.
    fn describe_outputs(&self, stack: &str) -> Result<Vec<StackOutput>>;
}

/// Records the commands a real engine would run, without running them.
#[derive(Debug, Default)]
pub struct DryRun {
    binary: String,
    commands: RefCell<Vec<Vec<String>>>,
}

impl DryRun {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Every recorded argv, in call order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.borrow().clone()
    }

    fn record(&self, args: Vec<String>) -> ExecOutput {
        let mut argv = vec![self.binary.clone()];
        argv.extend(args);
        let line = argv.join(" ");
        tracing::info!(command = %line, "dry run");
        self.commands.borrow_mut().push(argv);
        ExecOutput {
            exit_code: 0,
            stdout: line,
            stderr: String::new(),
        }
    }
}

impl Engine for DryRun {
    fn deploy(&self, stack: &str, template_path: &Path) -> Result<ExecOutput> {
        Ok(self.record(local::deploy_args(stack, template_path)))
    }

    fn delete(&self, stack: &str) -> Result<ExecOutput> {
        Ok(self.record(local::delete_args(stack)))
    }

    fn describe_outputs(&self, stack: &str) -> Result<Vec<StackOutput>> {
        self.record(local::describe_outputs_args(stack));
        Ok(Vec::new())
    }
}
