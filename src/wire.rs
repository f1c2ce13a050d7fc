//! Frame codec for the GDS data-service protocol.
//!
//! Every exchange is one request frame and one reply frame:
//!
//! ```text
//! u32 body_len | u8 kind | u64 request_id | fields...
//! ```
//!
//! All numbers are little-endian and strings are `u16` length-prefixed
//! UTF-8. The codec is pure: it never touches the network, so both sides of
//! the protocol can be exercised in tests without a server.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::catalog::CatalogEntry;
use crate::error::{MdfsError, MdfsResult};
use crate::reader::LeReader;

const LEN_PREFIX: usize = 4;

const CMD_LIST_DIRECTORY: u8 = 0x01;
const CMD_GET_FILE: u8 = 0x02;
const CMD_LATEST_NAME: u8 = 0x03;

const REPLY_LISTING: u8 = 0x81;
const REPLY_PAYLOAD: u8 = 0x82;
const REPLY_NAME: u8 = 0x83;
const REPLY_FAILURE: u8 = 0xEE;

/// Inclusive start, byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// Operations the client can ask the server for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ListDirectory { path: String },
    GetFile { path: String, range: Option<ByteRange> },
    LatestName { path: String, filter: String },
}

impl Command {
    pub(crate) fn path(&self) -> &str {
        match self {
            Self::ListDirectory { path }
            | Self::GetFile { path, .. }
            | Self::LatestName { path, .. } => path,
        }
    }
}

/// Server answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Listing(Vec<CatalogEntry>),
    Payload(Bytes),
    Name(String),
    Failure { code: i32, message: String },
}

impl Reply {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Listing(_) => "listing",
            Self::Payload(_) => "payload",
            Self::Name(_) => "name",
            Self::Failure { .. } => "failure",
        }
    }
}

/// A message tagged with the id of the exchange it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    pub request_id: u64,
    pub body: T,
}

impl<T> Frame<T> {
    pub fn new(request_id: u64, body: T) -> Self {
        Self { request_id, body }
    }
}

pub fn encode_command(frame: &Frame<Command>) -> MdfsResult<Bytes> {
    let mut body = BytesMut::new();
    match &frame.body {
        Command::ListDirectory { path } => {
            put_head(&mut body, CMD_LIST_DIRECTORY, frame.request_id);
            put_str(&mut body, "path", path)?;
        }
        Command::GetFile { path, range } => {
            put_head(&mut body, CMD_GET_FILE, frame.request_id);
            put_str(&mut body, "path", path)?;
            match range {
                Some(r) => {
                    body.put_u8(1);
                    body.put_u64_le(r.offset);
                    body.put_u64_le(r.length);
                }
                None => body.put_u8(0),
            }
        }
        Command::LatestName { path, filter } => {
            put_head(&mut body, CMD_LATEST_NAME, frame.request_id);
            put_str(&mut body, "path", path)?;
            put_str(&mut body, "filter", filter)?;
        }
    }
    seal(body)
}

pub fn decode_command(buf: &[u8]) -> MdfsResult<Frame<Command>> {
    let mut r = open(buf)?;
    let kind = get(&mut r, LeReader::u8)?;
    let request_id = get(&mut r, LeReader::u64)?;
    let body = match kind {
        CMD_LIST_DIRECTORY => Command::ListDirectory {
            path: get_str(&mut r)?,
        },
        CMD_GET_FILE => {
            let path = get_str(&mut r)?;
            let range = match get(&mut r, LeReader::u8)? {
                0 => None,
                _ => Some(ByteRange {
                    offset: get(&mut r, LeReader::u64)?,
                    length: get(&mut r, LeReader::u64)?,
                }),
            };
            Command::GetFile { path, range }
        }
        CMD_LATEST_NAME => Command::LatestName {
            path: get_str(&mut r)?,
            filter: get_str(&mut r)?,
        },
        other => {
            return Err(MdfsError::ProtocolMismatch(format!(
                "unknown request kind 0x{other:02x}"
            )));
        }
    };
    finish(&r)?;
    Ok(Frame::new(request_id, body))
}

pub fn encode_reply(frame: &Frame<Reply>) -> MdfsResult<Bytes> {
    let mut body = BytesMut::new();
    match &frame.body {
        Reply::Listing(entries) => {
            put_head(&mut body, REPLY_LISTING, frame.request_id);
            body.put_u32_le(fits_u32("listing", entries.len())?);
            for entry in entries {
                put_str(&mut body, "entry name", &entry.name)?;
                body.put_u8(u8::from(entry.is_dir));
                body.put_u64_le(entry.size);
                body.put_i64_le(entry.modified.timestamp());
            }
        }
        Reply::Payload(bytes) => {
            put_head(&mut body, REPLY_PAYLOAD, frame.request_id);
            body.put_u32_le(fits_u32("payload", bytes.len())?);
            body.put_slice(bytes);
        }
        Reply::Name(name) => {
            put_head(&mut body, REPLY_NAME, frame.request_id);
            put_str(&mut body, "name", name)?;
        }
        Reply::Failure { code, message } => {
            put_head(&mut body, REPLY_FAILURE, frame.request_id);
            body.put_i32_le(*code);
            put_str(&mut body, "message", message)?;
        }
    }
    seal(body)
}

pub fn decode_reply(buf: &[u8]) -> MdfsResult<Frame<Reply>> {
    let mut r = open(buf)?;
    let kind = get(&mut r, LeReader::u8)?;
    let request_id = get(&mut r, LeReader::u64)?;
    let body = match kind {
        REPLY_LISTING => {
            let count = get(&mut r, LeReader::u32)? as usize;
            // Smallest possible entry: empty name + flag + size + mtime.
            let min_entry = 2 + 1 + 8 + 8;
            if count.saturating_mul(min_entry) > r.remaining() {
                return Err(MdfsError::FrameTruncated {
                    needed: count.saturating_mul(min_entry),
                    available: r.remaining(),
                });
            }
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let name = get_str(&mut r)?;
                let is_dir = get(&mut r, LeReader::u8)? != 0;
                let size = get(&mut r, LeReader::u64)?;
                let mtime = get(&mut r, LeReader::i64)?;
                let modified = DateTime::<Utc>::from_timestamp(mtime, 0).ok_or_else(|| {
                    MdfsError::ProtocolMismatch(format!("invalid mtime {mtime} for {name}"))
                })?;
                entries.push(CatalogEntry {
                    name,
                    is_dir,
                    size,
                    modified,
                });
            }
            Reply::Listing(entries)
        }
        REPLY_PAYLOAD => {
            let len = get(&mut r, LeReader::u32)? as usize;
            Reply::Payload(Bytes::copy_from_slice(get_bytes(&mut r, len)?))
        }
        REPLY_NAME => Reply::Name(get_str(&mut r)?),
        REPLY_FAILURE => Reply::Failure {
            code: get(&mut r, LeReader::i32)?,
            message: get_str(&mut r)?,
        },
        other => return Err(MdfsError::UnknownResponseKind(other)),
    };
    finish(&r)?;
    Ok(Frame::new(request_id, body))
}

/// Length of the complete frame starting at `buf`, if the prefix is present.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    LeReader::new(buf)
        .u32()
        .map(|len| LEN_PREFIX + len as usize)
}

fn put_head(body: &mut BytesMut, kind: u8, request_id: u64) {
    body.put_u8(kind);
    body.put_u64_le(request_id);
}

fn put_str(body: &mut BytesMut, field: &'static str, s: &str) -> MdfsResult<()> {
    let raw = s.as_bytes();
    let len = u16::try_from(raw.len()).map_err(|_| MdfsError::FieldTooLong {
        field,
        len: raw.len(),
        max: u16::MAX as usize,
    })?;
    body.put_u16_le(len);
    body.put_slice(raw);
    Ok(())
}

fn fits_u32(field: &'static str, len: usize) -> MdfsResult<u32> {
    u32::try_from(len).map_err(|_| MdfsError::FieldTooLong {
        field,
        len,
        max: u32::MAX as usize,
    })
}

fn seal(body: BytesMut) -> MdfsResult<Bytes> {
    let len = fits_u32("frame body", body.len())?;
    let mut frame = BytesMut::with_capacity(LEN_PREFIX + body.len());
    frame.put_u32_le(len);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

/// Checks the length prefix and returns a reader over exactly the body.
fn open(buf: &[u8]) -> MdfsResult<LeReader<'_>> {
    let total = frame_len(buf).ok_or(MdfsError::FrameTruncated {
        needed: LEN_PREFIX,
        available: buf.len(),
    })?;
    if total > buf.len() {
        return Err(MdfsError::FrameTruncated {
            needed: total,
            available: buf.len(),
        });
    }
    if total < buf.len() {
        return Err(MdfsError::ProtocolMismatch(format!(
            "{} trailing byte(s) after frame",
            buf.len() - total
        )));
    }
    Ok(LeReader::new(&buf[LEN_PREFIX..]))
}

fn finish(r: &LeReader<'_>) -> MdfsResult<()> {
    match r.remaining() {
        0 => Ok(()),
        n => Err(MdfsError::ProtocolMismatch(format!(
            "{n} unread byte(s) in frame body"
        ))),
    }
}

fn get<'a, T>(r: &mut LeReader<'a>, read: fn(&mut LeReader<'a>) -> Option<T>) -> MdfsResult<T> {
    let available = r.remaining();
    read(r).ok_or(MdfsError::FrameTruncated {
        needed: std::mem::size_of::<T>(),
        available,
    })
}

fn get_bytes<'a>(r: &mut LeReader<'a>, len: usize) -> MdfsResult<&'a [u8]> {
    let available = r.remaining();
    r.take(len).ok_or(MdfsError::FrameTruncated {
        needed: len,
        available,
    })
}

fn get_str(r: &mut LeReader<'_>) -> MdfsResult<String> {
    let len = get(r, LeReader::u16)? as usize;
    let raw = get_bytes(r, len)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| MdfsError::ProtocolMismatch(format!("string field is not UTF-8: {e}")))
}
