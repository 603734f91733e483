//! Daemon IPC: a binary request/response protocol over a Unix socket.
//!
//! The radio daemon listens on a per-instance Unix socket. Each command is
//! a short-lived connection carrying exactly one request frame and one
//! response frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  report()/switch_channel()  ┌──────────────┐
//! │ Dispatcher  │────────────────────────────▶│   session    │
//! │ (id counter)│                             │ connect/write│
//! └─────────────┘                             │ read/close   │
//!                                             └──────┬───────┘
//!                                                    │ frame codec
//!                                             ┌──────▼───────┐
//!                                             │ radiosocketd │
//!                                             └──────────────┘
//! ```

pub mod dispatcher;
pub mod frame;
pub mod session;
pub mod types;

pub use dispatcher::Dispatcher;
pub use frame::{FrameError, FrameHeader, Message, Section, read_frame, write_frame};
pub use session::{CallTimeouts, TransportError};
pub use types::*;
