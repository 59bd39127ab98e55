//! Execution layer: runs a [`CommandSpec`] on every host of a group.

use std::collections::BTreeMap;

use crate::command::CommandSpec;
use crate::config::{Inventory, Settings, Transport};
use crate::runner::{self, HostResult};

/// Per-host output of one invocation, keyed by host identifier.
pub type ExecutionResults = BTreeMap<String, HostResult>;

/// Abstraction over how commands reach the hosts under test.
pub trait Executor {
    /// Run `command` on every host of `group`.
    ///
    /// # Errors
    ///
    /// Returns an error if the group cannot be resolved or any host cannot be
    /// reached. A command that runs and exits non-zero is not an error.
    fn execute(&self, group: &str, command: &CommandSpec) -> anyhow::Result<ExecutionResults>;

    /// Printable form of `command` for reports.
    fn describe(&self, command: &CommandSpec) -> String;
}

/// Runs the `pki` client on this machine.
pub struct LocalExecutor {
    binary: String,
}

impl LocalExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Executor for LocalExecutor {
    fn execute(&self, group: &str, command: &CommandSpec) -> anyhow::Result<ExecutionResults> {
        let args = command.to_args();
        tracing::debug!(group, host = "localhost", command = %self.describe(command), "executing");
        let result = runner::execute(&self.binary, &args)?;
        Ok(BTreeMap::from([("localhost".to_string(), result)]))
    }

    fn describe(&self, command: &CommandSpec) -> String {
        command.display_line(&self.binary)
    }
}

/// Printed on stderr by the remote shell before `pki` starts. Without it the
/// remote command never ran, whatever the exit status.
const CONNECTED_MARKER: &str = "__certcheck_connected";

/// Runs the `pki` client on each inventory host over `ssh`.
pub struct SshExecutor {
    binary: String,
    inventory: Inventory,
}

impl SshExecutor {
    pub const fn new(binary: String, inventory: Inventory) -> Self {
        Self { binary, inventory }
    }

    /// Arguments passed to the local `ssh` client for `host`.
    fn ssh_args(&self, host: &str, command: &CommandSpec) -> Vec<String> {
        let pki = std::iter::once(self.binary.as_str())
            .map(runner::shell_escape)
            .chain(command.to_args().iter().map(|a| runner::shell_escape(a)))
            .collect::<Vec<_>>()
            .join(" ");
        let remote = format!("echo {CONNECTED_MARKER} >&2; exec {pki}");
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            host.to_string(),
            "--".to_string(),
            remote,
        ]
    }
}

impl Executor for SshExecutor {
    fn execute(&self, group: &str, command: &CommandSpec) -> anyhow::Result<ExecutionResults> {
        let mut results = BTreeMap::new();
        for host in self.inventory.hosts(group)? {
            tracing::debug!(group, host = %host, command = %self.describe(command), "executing");
            let result = runner::execute("ssh", &self.ssh_args(&host, command))?;
            let result = strip_connected_marker(&host, result)?;
            results.insert(host, result);
        }
        Ok(results)
    }

    fn describe(&self, command: &CommandSpec) -> String {
        command.display_line(&self.binary)
    }
}

/// Check that the remote shell announced itself and drop everything on stderr
/// up to and including the marker, which is ssh's own chatter.
///
/// `pki` exits 255 on authorization and certificate failures, the same status
/// ssh uses for connection errors, so the exit code alone cannot tell them apart.
fn strip_connected_marker(host: &str, mut result: HostResult) -> anyhow::Result<HostResult> {
    let Some(pos) = result
        .stderr_lines
        .iter()
        .position(|l| l == CONNECTED_MARKER)
    else {
        let reason = result.stderr_lines.last().map_or("", String::as_str);
        anyhow::bail!("cannot reach host {host}: {reason}");
    };
    result.stderr_lines.drain(..=pos);
    Ok(result)
}

/// Build the executor selected by `settings.inventory.transport`.
pub fn from_settings(settings: &Settings) -> Box<dyn Executor> {
    match settings.inventory.transport {
        Transport::Local => Box::new(LocalExecutor::new(settings.pki.binary.clone())),
        Transport::Ssh => Box::new(SshExecutor::new(
            settings.pki.binary.clone(),
            settings.inventory.clone(),
        )),
    }
}
