//! Host process table and interrupt signals.

use std::process::Stdio;

use tracing::debug;

use crate::BoxFuture;

/// Wrappers a daemon may be started behind.
const LAUNCHERS: [&str; 6] = ["sudo", "doas", "env", "nice", "valgrind", "gdb"];

/// One row of the host process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Full command line.
    pub command: String,
}

/// A prior daemon instance found before spawning a new one.
///
/// Not an error: the operator decides whether it gets interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZombieInstance {
    pub pid: u32,
    pub command: String,
}

/// Source of the host's process list.
pub trait ProcessTable: Send + Sync {
    fn list(&self) -> BoxFuture<'_, std::io::Result<Vec<ProcessInfo>>>;
}

/// Sends the interrupt signal to a process.
pub trait Signaller: Send + Sync {
    fn interrupt(&self, pid: u32) -> BoxFuture<'_, std::io::Result<()>>;
}

/// Reads the process list from `ps`.
pub struct PsProcessTable;

impl ProcessTable for PsProcessTable {
    fn list(&self) -> BoxFuture<'_, std::io::Result<Vec<ProcessInfo>>> {
        Box::pin(async move {
            let output = tokio::process::Command::new("ps")
                .args(["ax", "-o", "pid=,args="])
                .stderr(Stdio::null())
                .output()
                .await?;
            if !output.status.success() {
                return Err(std::io::Error::other(format!(
                    "ps exited with {}",
                    output.status
                )));
            }
            Ok(parse_ps(&String::from_utf8_lossy(&output.stdout)))
        })
    }
}

/// Interrupts through `kill -INT`, optionally behind a launcher such as
/// `sudo` so that privileged daemons can be reached.
pub struct KillSignaller {
    launcher: Vec<String>,
}

impl KillSignaller {
    pub fn new(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    fn argv(&self, pid: u32) -> Vec<String> {
        let mut argv = self.launcher.clone();
        argv.extend(["kill".to_string(), "-INT".to_string(), pid.to_string()]);
        argv
    }
}

impl Signaller for KillSignaller {
    fn interrupt(&self, pid: u32) -> BoxFuture<'_, std::io::Result<()>> {
        let argv = self.argv(pid);
        Box::pin(async move {
            debug!(?argv, "Sending interrupt");
            let status = tokio::process::Command::new(&argv[0])
                .args(&argv[1..])
                .status()
                .await?;
            if status.success() {
                Ok(())
            } else {
                Err(std::io::Error::other(format!(
                    "kill -INT {pid} exited with {status}"
                )))
            }
        })
    }
}

/// Parse `ps ax -o pid=,args=` output.
pub fn parse_ps(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, command) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                command: command.trim().to_string(),
            })
        })
        .collect()
}

/// Processes running the executable `process_name`, other than `own_pid`.
pub fn find_instances(processes: &[ProcessInfo], process_name: &str, own_pid: u32) -> Vec<ZombieInstance> {
    processes
        .iter()
        .filter(|p| p.pid != own_pid && runs_executable(&p.command, process_name))
        .map(|p| ZombieInstance {
            pid: p.pid,
            command: p.command.clone(),
        })
        .collect()
}

/// Whether the program of `command` is `process_name`, looking past
/// launchers like `sudo` and their options.
fn runs_executable(command: &str, process_name: &str) -> bool {
    for arg in command.split_whitespace() {
        let name = arg.rsplit('/').next().unwrap_or(arg);
        if name == process_name {
            return true;
        }
        if !arg.starts_with('-') && !LAUNCHERS.contains(&name) {
            return false;
        }
    }
    false
}
