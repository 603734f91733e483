//! Frame codec. One [`Message`] per frame on the control socket.
//!
//! ```text
//! offset 0   id                  u32
//! offset 4   command             u32
//! offset 8   len_payload_int     u16
//! offset 10  len_payload_char    u16
//! offset 12  len_payload_double  u16
//! offset 14  payload_int         i32 × len_payload_int
//!            payload_char        u8  × len_payload_char
//!            payload_double      f64 × len_payload_double
//! ```
//!
//! All fields use the host byte order. Both ends of the link run on the
//! same machine, so no endianness negotiation takes place. There is no
//! protocol version field: the report layout has to be agreed out of band
//! (see [`crate::report::ReportLayout`]).

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::HEADER_LEN;

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("short read in {section}: expected {expected} bytes, got {actual}")]
    ShortRead {
        section: Section,
        expected: usize,
        actual: usize,
    },

    #[error("{section} has {len} elements, more than a frame can declare")]
    PayloadTooLarge { section: Section, len: usize },

    #[error("{0} unexpected bytes after the declared payload")]
    TrailingBytes(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Part of a frame, used to report where decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    PayloadInt,
    PayloadChar,
    PayloadDouble,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::PayloadInt => "payload_int",
            Self::PayloadChar => "payload_char",
            Self::PayloadDouble => "payload_double",
        })
    }
}

/// The fixed-layout frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub id: u32,
    pub command: u32,
    pub len_payload_int: u16,
    pub len_payload_char: u16,
    pub len_payload_double: u16,
}

impl FrameHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.id.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.command.to_ne_bytes());
        buf[8..10].copy_from_slice(&self.len_payload_int.to_ne_bytes());
        buf[10..12].copy_from_slice(&self.len_payload_char.to_ne_bytes());
        buf[12..14].copy_from_slice(&self.len_payload_double.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            id: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            command: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
            len_payload_int: u16::from_ne_bytes([buf[8], buf[9]]),
            len_payload_char: u16::from_ne_bytes([buf[10], buf[11]]),
            len_payload_double: u16::from_ne_bytes([buf[12], buf[13]]),
        }
    }

    fn int_bytes(&self) -> usize {
        usize::from(self.len_payload_int) * size_of::<i32>()
    }

    fn char_bytes(&self) -> usize {
        usize::from(self.len_payload_char)
    }

    fn double_bytes(&self) -> usize {
        usize::from(self.len_payload_double) * size_of::<f64>()
    }

    /// Total size of the frame this header announces.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.int_bytes() + self.char_bytes() + self.double_bytes()
    }
}

/// One request or response exchanged with the daemon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Correlation id chosen by the requester and echoed by the daemon.
    pub id: u32,
    /// Opcode on requests, status code on responses.
    pub command: u32,
    pub payload_int: Vec<i32>,
    /// ASCII text, not NUL-terminated.
    pub payload_char: Vec<u8>,
    pub payload_double: Vec<f64>,
}

impl Message {
    /// A message with empty payloads.
    pub fn new(id: u32, command: impl Into<u32>) -> Self {
        Self {
            id,
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_ints(mut self, ints: impl Into<Vec<i32>>) -> Self {
        self.payload_int = ints.into();
        self
    }

    pub fn with_chars(mut self, chars: impl Into<Vec<u8>>) -> Self {
        self.payload_char = chars.into();
        self
    }

    pub fn with_doubles(mut self, doubles: impl Into<Vec<f64>>) -> Self {
        self.payload_double = doubles.into();
        self
    }

    /// The response `command` field interpreted as a signed status code.
    pub fn status(&self) -> i32 {
        self.command as i32
    }

    /// `payload_char` as text; non-ASCII bytes are replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload_char).into_owned()
    }

    /// Build the header describing this message's payloads.
    pub fn header(&self) -> Result<FrameHeader, FrameError> {
        Ok(FrameHeader {
            id: self.id,
            command: self.command,
            len_payload_int: section_len(Section::PayloadInt, self.payload_int.len())?,
            len_payload_char: section_len(Section::PayloadChar, self.payload_char.len())?,
            len_payload_double: section_len(Section::PayloadDouble, self.payload_double.len())?,
        })
    }

    /// Serialize into a single contiguous frame.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let header = self.header()?;
        let mut buf = Vec::with_capacity(header.frame_len());
        buf.extend_from_slice(&header.to_bytes());
        for v in &self.payload_int {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        buf.extend_from_slice(&self.payload_char);
        for v in &self.payload_double {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        Ok(buf)
    }

    /// Decode exactly one frame; leftover bytes are an error.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (message, consumed) = Self::decode_prefix(buf)?;
        if consumed != buf.len() {
            return Err(FrameError::TrailingBytes(buf.len() - consumed));
        }
        Ok(message)
    }

    /// Decode the frame at the start of `buf`, returning it with the number
    /// of bytes it occupied.
    pub fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        let mut cursor = buf;
        let header_bytes = take(&mut cursor, HEADER_LEN, Section::Header)?;
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(header_bytes);
        let header = FrameHeader::from_bytes(&raw);

        let ints = take(&mut cursor, header.int_bytes(), Section::PayloadInt)?;
        let chars = take(&mut cursor, header.char_bytes(), Section::PayloadChar)?;
        let doubles = take(&mut cursor, header.double_bytes(), Section::PayloadDouble)?;

        Ok((assemble(header, ints, chars, doubles), header.frame_len()))
    }
}

fn section_len(section: Section, len: usize) -> Result<u16, FrameError> {
    u16::try_from(len).map_err(|_| FrameError::PayloadTooLarge { section, len })
}

fn take<'a>(cursor: &mut &'a [u8], len: usize, section: Section) -> Result<&'a [u8], FrameError> {
    if cursor.len() < len {
        return Err(FrameError::ShortRead {
            section,
            expected: len,
            actual: cursor.len(),
        });
    }
    let (head, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(head)
}

fn assemble(header: FrameHeader, ints: &[u8], chars: &[u8], doubles: &[u8]) -> Message {
    let payload_int = ints
        .chunks_exact(size_of::<i32>())
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let payload_double = doubles
        .chunks_exact(size_of::<f64>())
        .map(|c| f64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();

    Message {
        id: header.id,
        command: header.command,
        payload_int,
        payload_char: chars.to_vec(),
        payload_double,
    }
}

/// Read one frame from a stream.
///
/// The header is read in full before anything is interpreted; a stream
/// that ends early in any section is a [`FrameError::ShortRead`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let header_bytes = read_section(reader, HEADER_LEN, Section::Header).await?;
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&header_bytes);
    let header = FrameHeader::from_bytes(&raw);

    let ints = read_section(reader, header.int_bytes(), Section::PayloadInt).await?;
    let chars = read_section(reader, header.char_bytes(), Section::PayloadChar).await?;
    let doubles = read_section(reader, header.double_bytes(), Section::PayloadDouble).await?;

    Ok(assemble(header, &ints, &chars, &doubles))
}

/// Encode and write one frame, flushing the stream.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_section<R>(reader: &mut R, len: usize, section: Section) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(FrameError::ShortRead {
                section,
                expected: len,
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(buf)
}
