//! Configuration builders for tests.

use std::path::Path;

use radiolink_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from defaults with no launcher, so spawned commands run
/// directly instead of through `sudo`.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .runtime_dir(dir.path())
///     .executable("true")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.launcher.clear();
        Self { config }
    }

    pub fn runtime_dir(mut self, dir: &Path) -> Self {
        self.config.daemon.runtime_dir = dir.to_path_buf();
        self
    }

    pub fn template(mut self, path: &Path) -> Self {
        self.config.daemon.template = path.to_path_buf();
        self
    }

    pub fn executable(mut self, executable: &str) -> Self {
        self.config.daemon.executable = executable.to_string();
        self
    }

    pub fn process_name(mut self, name: &str) -> Self {
        self.config.daemon.process_name = name.to_string();
        self
    }

    pub fn extra_args(mut self, args: &[&str]) -> Self {
        self.config.daemon.extra_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.daemon.stop_timeout_secs = secs;
        self
    }

    pub fn link_ids(mut self, own: &str, other: &str) -> Self {
        self.config.link.own_id = own.to_string();
        self.config.link.other_id = other.to_string();
        self
    }

    pub fn report_protocol(mut self, protocol: &str) -> Self {
        self.config.report.protocol = protocol.to_string();
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.ipc.read_timeout_ms = ms;
        self
    }

    pub fn history_len(mut self, len: usize) -> Self {
        self.config.poller.history_len = len;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
