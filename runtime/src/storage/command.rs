//! External command execution for storage tools.

use depot_core::error::{DepotError, Result};
use std::process::Command;

/// Runs storage tools (`btrfs`, `lvcreate`, `mkfs.ext4`, `mount`, ...).
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout on success.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        tracing::debug!(program, args = ?args, "Running storage command");

        let output = Command::new(program).args(args).output().map_err(|e| {
            DepotError::StorageBackend(format!("failed to execute {}: {}", program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let line = stderr.lines().next().unwrap_or_default();
            return Err(DepotError::StorageBackend(format!(
                "{} {} failed ({}): {}",
                program,
                args.join(" "),
                output.status,
                line
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_runner_success() {
        let out = SystemRunner.run("echo", &["hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_system_runner_failure_keeps_first_stderr_line() {
        let err = SystemRunner
            .run("sh", &["-c", "echo first >&2; echo second >&2; exit 3"])
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, DepotError::StorageBackend(_)));
        assert!(message.contains("first"));
        assert!(!message.contains("second"));
    }

    #[test]
    fn test_system_runner_missing_binary() {
        let err = SystemRunner
            .run("depot-definitely-not-a-binary", &[])
            .unwrap_err();
        assert!(matches!(err, DepotError::StorageBackend(_)));
    }
}
