//! Type-state lifecycle of the external radio daemon.
//!
//! ```text
//! Supervisor<Unconfigured>
//!     → .configure(&selector)     // render template, write <runtime_dir>/radiosocketd_<id>.conf
//!         → Supervisor<Configured>
//!             → .start()          // zombie scan, operator decision, spawn
//!                 → (Supervisor<Running>, Dispatcher)
//!                     → .stop(&mut dispatcher)   // EXIT, wait, clean up
//!                         → Supervisor<Stopped>
//! ```
//!
//! The daemon process is owned here and nowhere else. Failures after the
//! spawn are per-call transport failures inside the [`Dispatcher`] and do
//! not move the supervisor between states.

pub mod devices;
pub mod process;
pub mod prompt;
pub mod template;

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use radiolink_config::AppConfig;

use crate::ipc::Dispatcher;
use devices::{DeviceError, DeviceSelector};
use process::{KillSignaller, ProcessTable, PsProcessTable, Signaller, ZombieInstance};
use prompt::{OperatorPrompt, StdinPrompt};
use template::{Substitutions, TOKEN_OTHER, TOKEN_OWN, TemplateError};

/// Errors surfaced to the supervisor's caller.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("device selection failed: {0}")]
    Device(#[from] DeviceError),

    #[error("failed to scan the process list: {0}")]
    Scan(#[source] std::io::Error),

    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("failed waiting for the daemon to exit: {0}")]
    Wait(#[source] std::io::Error),
}

/// No config rendered yet.
pub struct Unconfigured;

/// Config file written; daemon not running.
pub struct Configured {
    config_path: PathBuf,
}

/// Daemon spawned.
pub struct Running {
    config_path: PathBuf,
    child: Child,
}

/// Daemon gone (or leaked after a stop timeout).
pub struct Stopped {
    status: Option<ExitStatus>,
}

/// Host collaborators: process list, signals, operator.
#[derive(Clone)]
struct Host {
    processes: Arc<dyn ProcessTable>,
    signaller: Arc<dyn Signaller>,
    prompt: Arc<dyn OperatorPrompt>,
}

/// Supervisor of one daemon instance, parameterized by lifecycle state.
pub struct Supervisor<S> {
    config: AppConfig,
    instance_id: u32,
    host: Host,
    state: S,
}

impl<S> Supervisor<S> {
    /// Instance id used in the socket and config file names.
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// `<runtime_dir>/radiosocketd_<id>.sock`
    pub fn socket_path(&self) -> PathBuf {
        instance_path(&self.config, self.instance_id, "sock")
    }

    /// `<runtime_dir>/radiosocketd_<id>.conf`
    pub fn config_path(&self) -> PathBuf {
        instance_path(&self.config, self.instance_id, "conf")
    }

    fn transition<T>(self, state: T) -> Supervisor<T> {
        Supervisor {
            config: self.config,
            instance_id: self.instance_id,
            host: self.host,
            state,
        }
    }
}

fn instance_path(config: &AppConfig, instance_id: u32, extension: &str) -> PathBuf {
    config.daemon.runtime_dir.join(format!(
        "{}_{instance_id}.{extension}",
        config.daemon.process_name
    ))
}

impl Supervisor<Unconfigured> {
    /// Supervisor for a new instance keyed by this process's pid, using
    /// `ps`, `kill -INT` through the configured launcher, and the terminal
    /// for operator questions.
    pub fn new(config: AppConfig) -> Self {
        let host = Host {
            processes: Arc::new(PsProcessTable),
            signaller: Arc::new(KillSignaller::new(config.daemon.launcher.clone())),
            prompt: Arc::new(StdinPrompt),
        };
        Self {
            config,
            instance_id: std::process::id(),
            host,
            state: Unconfigured,
        }
    }

    pub fn with_instance_id(mut self, instance_id: u32) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_process_table(mut self, processes: Arc<dyn ProcessTable>) -> Self {
        self.host.processes = processes;
        self
    }

    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.host.signaller = signaller;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn OperatorPrompt>) -> Self {
        self.host.prompt = prompt;
        self
    }

    pub fn prompt(&self) -> Arc<dyn OperatorPrompt> {
        Arc::clone(&self.host.prompt)
    }

    pub fn process_table(&self) -> Arc<dyn ProcessTable> {
        Arc::clone(&self.host.processes)
    }

    /// Render the config template with the selected device and the link
    /// identities, then write it to [`config_path`](Self::config_path).
    pub async fn configure(
        self,
        selector: &dyn DeviceSelector,
    ) -> Result<Supervisor<Configured>, SupervisorError> {
        let template_path = &self.config.daemon.template;
        let text = tokio::fs::read_to_string(template_path)
            .await
            .map_err(|source| TemplateError::Read {
                path: template_path.clone(),
                source,
            })?;

        let mut substitutions: Substitutions = selector.select().await?;
        substitutions.insert(TOKEN_OWN.to_string(), self.config.link.own_id.clone());
        substitutions.insert(TOKEN_OTHER.to_string(), self.config.link.other_id.clone());

        let rendered = template::render(&text, &substitutions);
        let leftover = template::unresolved_tokens(&rendered);
        if !leftover.is_empty() {
            warn!(tokens = ?leftover, "Config template has unresolved tokens");
        }

        let config_path = self.config_path();
        info!(path = %config_path.display(), "Daemon config:\n{rendered}");
        tokio::fs::write(&config_path, rendered)
            .await
            .map_err(|source| TemplateError::Write {
                path: config_path.clone(),
                source,
            })?;

        Ok(self.transition(Configured { config_path }))
    }
}

impl Supervisor<Configured> {
    /// Deal with prior instances, then spawn the daemon.
    ///
    /// Returns the running supervisor together with a dispatcher bound to
    /// this instance's socket. Spawn failure is final; nothing is retried.
    pub async fn start(self) -> Result<(Supervisor<Running>, Dispatcher), SupervisorError> {
        for zombie in self.scan_for_zombies().await? {
            self.resolve_zombie(&zombie).await;
        }

        let argv = self.command_line();
        let socket_path = self.socket_path();
        info!(command = %argv.join(" "), "Starting daemon");
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                program: argv[0].clone(),
                source,
            })?;
        info!(pid = ?child.id(), socket = %socket_path.display(), "Daemon spawned");

        let dispatcher = Dispatcher::from_config(socket_path, &self.config);
        let config_path = self.state.config_path.clone();
        Ok((self.transition(Running { config_path, child }), dispatcher))
    }

    /// `launcher… debug_wrapper? executable extra_args… -c <conf> -s <sock>`
    pub fn command_line(&self) -> Vec<String> {
        let daemon = &self.config.daemon;
        let mut argv = daemon.launcher.clone();
        argv.extend(daemon.debug_wrapper.iter().cloned());
        argv.push(daemon.executable.clone());
        argv.extend(daemon.extra_args.iter().cloned());
        argv.push("-c".to_string());
        argv.push(self.state.config_path.display().to_string());
        argv.push("-s".to_string());
        argv.push(self.socket_path().display().to_string());
        argv
    }

    pub fn rendered_config(&self) -> &Path {
        &self.state.config_path
    }

    async fn scan_for_zombies(&self) -> Result<Vec<ZombieInstance>, SupervisorError> {
        let processes = self
            .host
            .processes
            .list()
            .await
            .map_err(SupervisorError::Scan)?;
        Ok(process::find_instances(
            &processes,
            &self.config.daemon.process_name,
            std::process::id(),
        ))
    }

    async fn resolve_zombie(&self, zombie: &ZombieInstance) {
        warn!(pid = zombie.pid, command = %zombie.command, "Found a running daemon instance");
        let question = format!(
            "{} (pid {}) is already running: {}\nKill?",
            self.config.daemon.process_name, zombie.pid, zombie.command
        );
        if !self.host.prompt.confirm(question).await {
            info!(pid = zombie.pid, "Leaving prior instance running");
            return;
        }
        match self.host.signaller.interrupt(zombie.pid).await {
            Ok(()) => info!(pid = zombie.pid, "Interrupted prior instance"),
            Err(e) => warn!(pid = zombie.pid, error = %e, "Failed to interrupt prior instance"),
        }
    }
}

impl Supervisor<Running> {
    /// OS pid of the spawned process (the launcher, when one is configured).
    pub fn pid(&self) -> Option<u32> {
        self.state.child.id()
    }

    /// Ask the daemon to exit, wait for it, and remove the rendered config.
    ///
    /// A failed `EXIT` is logged and the wait still happens. With a stop
    /// timeout configured, a daemon that outlives it is reported as leaked.
    pub async fn stop(
        mut self,
        dispatcher: &mut Dispatcher,
    ) -> Result<Supervisor<Stopped>, SupervisorError> {
        if !dispatcher.exit().await {
            warn!(socket = %dispatcher.endpoint().display(), "Daemon did not acknowledge EXIT");
        }

        let status = match self.config.daemon.stop_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.state.child.wait()).await {
                Ok(waited) => Some(waited.map_err(SupervisorError::Wait)?),
                Err(_) => {
                    warn!(
                        pid = ?self.state.child.id(),
                        timeout_secs = limit.as_secs(),
                        "Daemon did not exit in time; leaving it running"
                    );
                    None
                }
            },
            None => Some(self.state.child.wait().await.map_err(SupervisorError::Wait)?),
        };
        if let Some(status) = status {
            info!(%status, "Daemon exited");
        }

        if let Err(e) = tokio::fs::remove_file(&self.state.config_path).await {
            debug!(path = %self.state.config_path.display(), error = %e, "Could not remove daemon config");
        }
        Ok(self.transition(Stopped { status }))
    }
}

impl Supervisor<Stopped> {
    /// Exit status, or `None` if the daemon was left running.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.state.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.daemon.runtime_dir = PathBuf::from("/run/radio");
        config
    }

    #[test]
    fn test_instance_paths() {
        let supervisor = Supervisor::new(config()).with_instance_id(4400);
        assert_eq!(
            supervisor.socket_path(),
            PathBuf::from("/run/radio/radiosocketd_4400.sock")
        );
        assert_eq!(
            supervisor.config_path(),
            PathBuf::from("/run/radio/radiosocketd_4400.conf")
        );
    }

    #[test]
    fn test_default_instance_id_is_own_pid() {
        assert_eq!(Supervisor::new(config()).instance_id(), std::process::id());
    }

    #[test]
    fn test_command_line() {
        let mut config = config();
        config.daemon.debug_wrapper = Some("valgrind".to_string());
        let configured = Supervisor::new(config)
            .with_instance_id(7)
            .transition(Configured {
                config_path: PathBuf::from("/run/radio/radiosocketd_7.conf"),
            });
        assert_eq!(
            configured.command_line(),
            vec![
                "sudo",
                "valgrind",
                "./radiosocketd",
                "-v",
                "-c",
                "/run/radio/radiosocketd_7.conf",
                "-s",
                "/run/radio/radiosocketd_7.sock",
            ]
        );
    }

    #[test]
    fn test_command_line_without_launcher() {
        let mut config = config();
        config.daemon.launcher.clear();
        config.daemon.extra_args.clear();
        config.daemon.executable = "/opt/radio/radiosocketd".to_string();
        let configured = Supervisor::new(config)
            .with_instance_id(1)
            .transition(Configured {
                config_path: PathBuf::from("c.conf"),
            });
        assert_eq!(configured.command_line()[0], "/opt/radio/radiosocketd");
        assert_eq!(configured.command_line().len(), 5);
    }
}
