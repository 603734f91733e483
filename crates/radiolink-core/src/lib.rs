#![deny(unsafe_code)]

//! Control link to the `radiosocketd` radio daemon.
//!
//! Speaks the daemon's binary frame protocol over its per-instance Unix
//! socket, decodes its telemetry reports, and owns the daemon process from
//! config rendering to exit.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future for async methods on `dyn` traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP/JSON bridge for a browser UI.
pub mod bridge;
/// Frame codec, transport session, and command dispatcher.
pub mod ipc;
/// Report payload decoding.
pub mod report;
/// Daemon lifecycle, device selection, and host collaborators.
pub mod supervisor;
/// Bounded telemetry history and the periodic poller.
pub mod telemetry;

pub use ipc::{Dispatcher, Message, Opcode, TransportError};
pub use report::{ReportEntry, ReportLayout};
pub use supervisor::{Supervisor, SupervisorError};
pub use telemetry::{Poller, ShutdownSignal, TelemetryHistory};
