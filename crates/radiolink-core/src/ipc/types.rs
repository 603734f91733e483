//! Opcodes and wire constants shared by the codec, session and dispatcher.

use std::fmt;

/// Size of the packed frame header: id, command, and three u16 lengths.
pub const HEADER_LEN: usize = 4 + 4 + 2 + 2 + 2;

/// Status returned by the dispatcher when a call produced no response.
pub const STATUS_FAILED: i32 = -1;

/// Command opcodes understood by the daemon.
///
/// The gap between `UpdatePort` and `Exit` is reserved opcode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Report = 1,
    SwitchChannel = 2,
    UpdatePort = 3,
    Exit = 13,
}

impl Opcode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Report),
            2 => Some(Self::SwitchChannel),
            3 => Some(Self::UpdatePort),
            13 => Some(Self::Exit),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::SwitchChannel => "switch_channel",
            Self::UpdatePort => "update_port",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

impl From<Opcode> for u32 {
    fn from(op: Opcode) -> Self {
        op.code()
    }
}
