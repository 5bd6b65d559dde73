// src/exec/shell.rs

//! Built-in `shell.run` job function.
//!
//! The first positional argument is a command line run through the
//! platform shell. Exit code 0 is a success (stdout becomes the result),
//! 75 (`EX_TEMPFAIL`) asks for a retry, anything else fails the job.

use std::process::Command;

use anyhow::Context;
use serde_json::Value;
use tracing::debug;

use crate::job::{Job, JobError, JobFunction};

pub const SHELL_FUNCTION: &str = "shell.run";

/// Exit code meaning "try again later".
pub const EX_TEMPFAIL: i32 = 75;

pub fn shell_function() -> JobFunction {
    JobFunction::new(SHELL_FUNCTION, run_shell)
}

fn run_shell(job: &Job) -> Result<Value, JobError> {
    let cmd = job
        .work
        .args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| JobError::Failed("shell.run expects a command string argument".to_string()))?;

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    debug!(job = %job.uuid, cmd = %cmd, "running shell command");
    let output = command
        .output()
        .with_context(|| format!("spawning shell for job {}", job.uuid))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

    match output.status.code() {
        Some(0) => Ok(Value::String(stdout)),
        Some(EX_TEMPFAIL) => Err(JobError::retry_later(format!(
            "command asked for a retry: {stderr}"
        ))),
        Some(code) => Err(JobError::Failed(format!(
            "command exited with status {code}: {stderr}"
        ))),
        None => Err(JobError::Failed("command terminated by signal".to_string())),
    }
}
