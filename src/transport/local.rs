//! ST-031: `aws cloudformation` through a local child process.

use super::{parse_outputs, Engine, ExecOutput, StackOutput};
use crate::core::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};

pub const DEFAULT_BINARY: &str = "aws";

/// Run a program to completion, capturing stdout and stderr.
pub fn exec_local(program: &str, args: &[String]) -> Result<ExecOutput> {
    tracing::debug!(program, ?args, "spawning");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Engine(format!("failed to spawn {}: {}", program, e)))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn deploy_args(stack: &str, template_path: &Path) -> Vec<String> {
    let template = template_path.display().to_string();
    args(&[
        "cloudformation",
        "deploy",
        "--stack-name",
        stack,
        "--template-file",
        template.as_str(),
        "--capabilities",
        "CAPABILITY_IAM",
        "--no-fail-on-empty-changeset",
    ])
}

pub fn delete_args(stack: &str) -> Vec<String> {
    args(&["cloudformation", "delete-stack", "--stack-name", stack])
}

pub fn wait_delete_args(stack: &str) -> Vec<String> {
    args(&["cloudformation", "wait", "stack-delete-complete", "--stack-name", stack])
}

pub fn describe_outputs_args(stack: &str) -> Vec<String> {
    args(&[
        "cloudformation",
        "describe-stacks",
        "--stack-name",
        stack,
        "--query",
        "Stacks[0].Outputs",
        "--output",
        "json",
    ])
}

/// The `aws` CLI, optionally pinned to a profile and region.
#[derive(Debug, Clone)]
pub struct AwsCli {
    pub binary: String,
    pub profile: Option<String>,
    pub region: Option<String>,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            profile: None,
            region: None,
        }
    }
}

impl AwsCli {
    /// Append `--profile` / `--region` when set.
    pub fn with_globals(&self, mut argv: Vec<String>) -> Vec<String> {
        if let Some(ref p) = self.profile {
            argv.extend(["--profile".to_string(), p.clone()]);
        }
        if let Some(ref r) = self.region {
            argv.extend(["--region".to_string(), r.clone()]);
        }
        argv
    }

    fn run(&self, argv: Vec<String>, what: &str) -> Result<ExecOutput> {
        let argv = self.with_globals(argv);
        tracing::info!(command = %format!("{} {}", self.binary, argv.join(" ")), "running engine command");
        exec_local(&self.binary, &argv)?.check(what)
    }
}

impl Engine for AwsCli {
    fn deploy(&self, stack: &str, template_path: &Path) -> Result<ExecOutput> {
        self.run(deploy_args(stack, template_path), "cloudformation deploy")
    }

    /// Request deletion, then block until the engine reports completion.
    fn delete(&self, stack: &str) -> Result<ExecOutput> {
        self.run(delete_args(stack), "cloudformation delete-stack")?;
        self.run(wait_delete_args(stack), "cloudformation wait stack-delete-complete")
    }

    fn describe_outputs(&self, stack: &str) -> Result<Vec<StackOutput>> {
        let out = self.run(describe_outputs_args(stack), "cloudformation describe-stacks")?;
        parse_outputs(&out.stdout)
    }
}
