#![deny(unsafe_code)]

//! Shared test utilities for the radiolink workspace.
//!
//! Provides a scripted mock of the radio daemon's socket, fakes for the
//! supervisor's host collaborators, and config builders. Tests
//! capture tracing output through `test-log`.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! radiolink-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod host;
pub mod mock_daemon;

pub use config::TestConfigBuilder;
pub use host::{FakeProcessTable, RecordingSignaller, ScriptedPrompt};
pub use mock_daemon::{MockDaemon, Reply};
