//! Worker dispatch messages and fragmentation.
//!
//! The list of table addresses for one compression attempt can be longer
//! than a single fixed-size payload holds, so it is split into one start
//! fragment followed by zero or more extra fragments. Workers answer with a
//! single response message.
//!
//! # Wire Format
//!
//! All fields are 32-bit little-endian words.
//!
//! ```text
//! start:    | command=20 | n_fragments | compressed_table | scratch_region |
//!           | total_tables | n_tables_here | table_address ... |
//!
//! extra:    | command=21 | n_tables_here | table_address ... |
//!
//! response: | command=22 | response_code | length |
//! ```
//!
//! # Capacity
//!
//! A start fragment holds `(payload - 24) / 4` addresses and an extra
//! fragment `(payload - 8) / 4`. For `N` addresses the number of fragments is
//! 1 when `N` fits the start fragment, otherwise
//! `1 + ceil((N - start) / extra)`.

use crate::error::{Error, MessageError, Result};
use crate::sdram::Address;

/// Bytes per word on the wire.
pub const WORD_BYTES: usize = 4;

/// Size of the start fragment header in bytes
pub const START_HEADER_BYTES: usize = 6 * WORD_BYTES;

/// Size of the extra fragment header in bytes
pub const EXTRA_HEADER_BYTES: usize = 2 * WORD_BYTES;

/// Size of a response message in bytes
pub const RESPONSE_BYTES: usize = 3 * WORD_BYTES;

/// Largest payload a single SDP message carries.
pub const DEFAULT_PAYLOAD_BYTES: usize = 256;

/// Command tag in the first word of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    StartDataStream = 20,
    ExtraDataStream = 21,
    CompressionResponse = 22,
}

impl TryFrom<u32> for Command {
    type Error = MessageError;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            20 => Ok(Command::StartDataStream),
            21 => Ok(Command::ExtraDataStream),
            22 => Ok(Command::CompressionResponse),
            other => Err(MessageError::UnknownCommand(other)),
        }
    }
}

/// Outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseCode {
    SuccessfulCompression = 30,
    FailedMalloc = 31,
    FailedToCompress = 32,
}

impl TryFrom<u32> for ResponseCode {
    type Error = MessageError;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            30 => Ok(ResponseCode::SuccessfulCompression),
            31 => Ok(ResponseCode::FailedMalloc),
            32 => Ok(ResponseCode::FailedToCompress),
            other => Err(MessageError::UnknownResponseCode(other)),
        }
    }
}

/// First fragment of a dispatch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFragment {
    /// Fragments in the whole stream, this one included
    pub n_fragments: u32,
    /// Where the worker writes a successful result
    pub compressed_table: Address,
    /// Region the worker may use as working space
    pub scratch_region: Address,
    /// Table addresses across the whole stream
    pub total_tables: u32,
    pub tables: Vec<Address>,
}

/// Continuation fragment carrying more table addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraFragment {
    pub tables: Vec<Address>,
}

/// A worker's answer to one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    /// Entries in the minimised table (0 on allocation failure)
    pub length: u32,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::SuccessfulCompression
    }
}

/// Any message exchanged between the coordinator and a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Start(StartFragment),
    Extra(ExtraFragment),
    Response(Response),
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Start(_) => Command::StartDataStream,
            Message::Extra(_) => Command::ExtraDataStream,
            Message::Response(_) => Command::CompressionResponse,
        }
    }

    /// Table addresses carried by this message.
    pub fn tables(&self) -> &[Address] {
        match self {
            Message::Start(start) => &start.tables,
            Message::Extra(extra) => &extra.tables,
            Message::Response(_) => &[],
        }
    }

    /// Size of this message on the wire.
    pub fn size(&self) -> usize {
        match self {
            Message::Start(start) => START_HEADER_BYTES + start.tables.len() * WORD_BYTES,
            Message::Extra(extra) => EXTRA_HEADER_BYTES + extra.tables.len() * WORD_BYTES,
            Message::Response(_) => RESPONSE_BYTES,
        }
    }

    /// Serialize this message into bytes for transmission.
    pub fn serialize(&self) -> Vec<u8> {
        let mut words: Vec<u32> = Vec::with_capacity(self.size() / WORD_BYTES);
        words.push(self.command() as u32);

        match self {
            Message::Start(start) => {
                words.push(start.n_fragments);
                words.push(start.compressed_table.0);
                words.push(start.scratch_region.0);
                words.push(start.total_tables);
                words.push(start.tables.len() as u32);
                words.extend(start.tables.iter().map(|a| a.0));
            }
            Message::Extra(extra) => {
                words.push(extra.tables.len() as u32);
                words.extend(extra.tables.iter().map(|a| a.0));
            }
            Message::Response(response) => {
                words.push(response.code as u32);
                words.push(response.length);
            }
        }

        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Deserialize a message from bytes.
    ///
    /// # Errors
    /// - `MessageError::TooShort` if the header is truncated
    /// - `MessageError::Misaligned` if a trailing partial word is present
    /// - `MessageError::UnknownCommand` / `UnknownResponseCode` for bad tags
    /// - `MessageError::TableCountMismatch` if the address count in the
    ///   header doesn't match the remaining payload
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let words = read_words(bytes)?;
        let command = Command::try_from(words[0])?;

        let header_words = match command {
            Command::StartDataStream => START_HEADER_BYTES / WORD_BYTES,
            Command::ExtraDataStream => EXTRA_HEADER_BYTES / WORD_BYTES,
            Command::CompressionResponse => RESPONSE_BYTES / WORD_BYTES,
        };
        if words.len() < header_words {
            return Err(MessageError::TooShort {
                required: header_words * WORD_BYTES,
                actual: bytes.len(),
            }
            .into());
        }

        let message = match command {
            Command::StartDataStream => Message::Start(StartFragment {
                n_fragments: words[1],
                compressed_table: Address(words[2]),
                scratch_region: Address(words[3]),
                total_tables: words[4],
                tables: read_tables(words[5], &words[header_words..])?,
            }),
            Command::ExtraDataStream => Message::Extra(ExtraFragment {
                tables: read_tables(words[1], &words[header_words..])?,
            }),
            Command::CompressionResponse => Message::Response(Response {
                code: ResponseCode::try_from(words[1])?,
                length: words[2],
            }),
        };

        Ok(message)
    }
}

fn read_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() < WORD_BYTES {
        return Err(MessageError::TooShort {
            required: WORD_BYTES,
            actual: bytes.len(),
        }
        .into());
    }
    if bytes.len() % WORD_BYTES != 0 {
        return Err(MessageError::Misaligned {
            actual: bytes.len(),
            word: WORD_BYTES,
        }
        .into());
    }
    Ok(bytes
        .chunks_exact(WORD_BYTES)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_tables(count: u32, payload: &[u32]) -> Result<Vec<Address>> {
    if count as usize != payload.len() {
        return Err(MessageError::TableCountMismatch {
            expected: count as usize,
            actual: payload.len(),
        }
        .into());
    }
    Ok(payload.iter().map(|&w| Address(w)).collect())
}

/// How many table addresses fit in each kind of fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentCapacity {
    pub start: usize,
    pub extra: usize,
}

impl FragmentCapacity {
    /// Capacities for an explicit address count per fragment kind.
    ///
    /// # Errors
    /// `Error::Config` if either capacity is zero.
    pub fn new(start: usize, extra: usize) -> Result<Self> {
        if start == 0 || extra == 0 {
            return Err(Error::Config(format!(
                "fragment capacities must be positive (start {start}, extra {extra})"
            )));
        }
        Ok(Self { start, extra })
    }

    /// Capacities implied by a payload size in bytes.
    pub fn from_payload_bytes(payload_bytes: usize) -> Result<Self> {
        let start = payload_bytes.saturating_sub(START_HEADER_BYTES) / WORD_BYTES;
        let extra = payload_bytes.saturating_sub(EXTRA_HEADER_BYTES) / WORD_BYTES;
        Self::new(start, extra)
    }

    /// Fragments needed to carry `n_tables` addresses.
    pub fn total_fragments(&self, n_tables: usize) -> usize {
        if n_tables <= self.start {
            1
        } else {
            1 + (n_tables - self.start).div_ceil(self.extra)
        }
    }

    /// Payload bytes of the largest fragment these capacities produce.
    pub fn payload_bytes(&self) -> usize {
        (START_HEADER_BYTES + self.start * WORD_BYTES)
            .max(EXTRA_HEADER_BYTES + self.extra * WORD_BYTES)
    }
}

/// Split a dispatch into its start and extra fragments.
///
/// # Returns
/// Fragments in send order. The concatenation of their address lists is
/// exactly `tables`.
pub fn fragment(
    tables: &[Address],
    compressed_table: Address,
    scratch_region: Address,
    capacity: FragmentCapacity,
) -> Vec<Message> {
    let total = capacity.total_fragments(tables.len());
    let mut fragments = Vec::with_capacity(total);

    let first = tables.len().min(capacity.start);
    fragments.push(Message::Start(StartFragment {
        n_fragments: total as u32,
        compressed_table,
        scratch_region,
        total_tables: tables.len() as u32,
        tables: tables[..first].to_vec(),
    }));

    for chunk in tables[first..].chunks(capacity.extra) {
        fragments.push(Message::Extra(ExtraFragment {
            tables: chunk.to_vec(),
        }));
    }

    debug_assert_eq!(fragments.len(), total);
    fragments
}
