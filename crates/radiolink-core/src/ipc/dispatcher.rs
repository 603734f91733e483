//! Command dispatcher, the typed command surface of the daemon.
//!
//! Owns the correlation-id counter for one daemon endpoint. Every method
//! takes `&mut self`, so a single dispatcher can only have one call in
//! flight; callers that share one (poller, HTTP bridge) wrap it in a
//! `tokio::sync::Mutex`. Separate dispatchers for separate daemons are
//! independent.
//!
//! Transport failures never escape: they are logged and turned into an
//! empty report, [`STATUS_FAILED`], or `None`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use radiolink_config::AppConfig;

use super::frame::Message;
use super::session::{self, CallTimeouts, TransportError};
use super::types::{Opcode, STATUS_FAILED};
use crate::report::{self, ReportEntry, ReportLayout};

/// Client for one daemon's control socket.
#[derive(Debug)]
pub struct Dispatcher {
    endpoint: PathBuf,
    last_id: u32,
    timeouts: CallTimeouts,
    layout: ReportLayout,
}

impl Dispatcher {
    /// Create a dispatcher for the socket at `endpoint` with no timeouts
    /// and the current report layout.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            last_id: 0,
            timeouts: CallTimeouts::default(),
            layout: ReportLayout::default(),
        }
    }

    /// Create a dispatcher using the `[ipc]` timeouts and `[report]` layout.
    pub fn from_config(endpoint: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self::new(endpoint)
            .with_timeouts(CallTimeouts {
                connect: config.ipc.connect_timeout(),
                read: config.ipc.read_timeout(),
            })
            .with_layout(ReportLayout::from_name(&config.report.protocol).unwrap_or_default())
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_layout(mut self, layout: ReportLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// The id used by the most recent call (0 before the first call).
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    /// Request telemetry. Returns an empty list if the call failed.
    pub async fn report(&mut self) -> Vec<ReportEntry> {
        match self.call(Message::new(0, Opcode::Report)).await {
            Ok(response) => {
                report::decode_report(&response, self.layout, report::now_unix_secs())
            }
            Err(_) => Vec::new(),
        }
    }

    /// Rebind `port` to `new_channel`. Returns the daemon's status code,
    /// or [`STATUS_FAILED`] if the call failed.
    pub async fn switch_channel(&mut self, port: i32, new_channel: i32) -> i32 {
        let request = Message::new(0, Opcode::SwitchChannel).with_ints(vec![port, new_channel]);
        self.status_of(request).await
    }

    /// Set the FEC factor of `port`. Same status convention as
    /// [`switch_channel`](Self::switch_channel).
    pub async fn update_port(&mut self, port: i32, fec_factor: f64) -> i32 {
        let request = Message::new(0, Opcode::UpdatePort)
            .with_ints(vec![port])
            .with_doubles(vec![fec_factor]);
        self.status_of(request).await
    }

    /// Ask the daemon to shut down. Returns whether it acknowledged.
    pub async fn exit(&mut self) -> bool {
        self.call(Message::new(0, Opcode::Exit)).await.is_ok()
    }

    /// Send `EXIT` and drop the dispatcher.
    pub async fn close(mut self) -> bool {
        self.exit().await
    }

    /// Issue an arbitrary command and return the raw response.
    pub async fn raw(
        &mut self,
        command: u32,
        payload_int: Vec<i32>,
        payload_char: Vec<u8>,
        payload_double: Vec<f64>,
    ) -> Option<Message> {
        let request = Message::new(0, command)
            .with_ints(payload_int)
            .with_chars(payload_char)
            .with_doubles(payload_double);
        self.call(request).await.ok()
    }

    async fn status_of(&mut self, request: Message) -> i32 {
        self.call(request)
            .await
            .map(|response| response.status())
            .unwrap_or(STATUS_FAILED)
    }

    /// Stamp `request` with the next id and run one exchange.
    async fn call(&mut self, mut request: Message) -> Result<Message, TransportError> {
        let result = match self.last_id.checked_add(1) {
            Some(id) => {
                self.last_id = id;
                request.id = id;
                session::call(&self.endpoint, &request, self.timeouts).await
            }
            None => Err(TransportError::IdSpaceExhausted),
        };

        match &result {
            Ok(response) => debug!(
                id = request.id,
                command = request.command,
                status = response.status(),
                "Command answered"
            ),
            Err(e) => warn!(
                id = request.id,
                command = %describe(request.command),
                endpoint = %self.endpoint.display(),
                error = %e,
                "Command failed"
            ),
        }
        result
    }
}

fn describe(command: u32) -> String {
    Opcode::from_code(command)
        .map(|op| op.to_string())
        .unwrap_or_else(|| command.to_string())
}
