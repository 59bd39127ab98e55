use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::Context;
use serde::Serialize;

/// Output captured from one host for one invocation.
///
/// `stdout` is kept as free-form text for substring checks; stderr is kept
/// line by line because failure messages are matched as whole lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostResult {
    pub stdout: String,
    pub stderr_lines: Vec<String>,
    pub exit_code: i32,
}

/// Extract an exit code from a process status, mapping signals to 128+N on Unix.
fn exit_code_from_status(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .unwrap_or_else(|| status.signal().map_or(1, |s| 128 + s))
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}

type Drained = thread::JoinHandle<std::io::Result<Vec<u8>>>;

/// Read `pipe` to the end on its own thread.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Drained {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drained(handle: Drained, name: &str) -> anyhow::Result<String> {
    let bytes = handle
        .join()
        .map_err(|_| anyhow::anyhow!("{name} reader thread panicked"))?
        .with_context(|| format!("failed to read {name}"))?;
    // Invalid UTF-8 is replaced so later lines are still checked.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Drain stdout and stderr concurrently so neither pipe can fill up and
/// block the child.
fn collect(mut child: std::process::Child) -> anyhow::Result<HostResult> {
    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout not captured"))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("stderr not captured"))?;

    let stdout_thread = drain(stdout_pipe);
    let stderr_thread = drain(stderr_pipe);

    let stdout = join_drained(stdout_thread, "stdout")?;
    let stderr = join_drained(stderr_thread, "stderr")?;
    let status = child.wait()?;

    Ok(HostResult {
        stdout: stdout.lines().collect::<Vec<_>>().join("\n"),
        stderr_lines: stderr.lines().map(str::to_string).collect(),
        exit_code: exit_code_from_status(status),
    })
}

/// Escape a string for safe inclusion in a shell command (single-quote wrapping).
pub fn shell_escape(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Run `program` with `args` and capture its output.
///
/// A non-zero exit status is returned in [`HostResult::exit_code`], not as
/// an error: failure paths are part of the contract being checked.
///
/// # Errors
///
/// Returns an error if the program name is empty or the process fails to spawn.
pub fn execute(program: &str, args: &[String]) -> anyhow::Result<HostResult> {
    if program.trim().is_empty() {
        anyhow::bail!("empty command");
    }

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    collect(child)
}
