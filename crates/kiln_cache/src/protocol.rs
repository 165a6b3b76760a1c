//! The cache wire protocol.
//!
//! All integers are little endian.
//!
//! ```text
//! request  = op:u8 | key:[u8; 32] | len:u32 | payload[len]
//! response = status:u8 | len:u32 | payload[len]
//! ```
//!
//! Only `SET` requests carry a payload. A `VALUE` response carries the
//! artifact, an `ERROR` response a UTF-8 message.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::key::CacheKey;

/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD: u32 = 1 << 30;

/// Request operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Fetch an entry.
    Get = 1,
    /// Store an entry.
    Set = 2,
    /// Remove an entry.
    Delete = 3,
    /// Liveness check.
    Ping = 4,
}

impl Op {
    fn from_u8(value: u8) -> io::Result<Self> {
        match value {
            1 => Ok(Op::Get),
            2 => Ok(Op::Set),
            3 => Ok(Op::Delete),
            4 => Ok(Op::Ping),
            other => Err(invalid(format!("unknown op {other}"))),
        }
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The request succeeded without a value.
    Ok = 0,
    /// The payload is the requested value.
    Value = 1,
    /// The key does not exist.
    NotFound = 2,
    /// The request failed; the payload is a message.
    Error = 3,
}

impl Status {
    fn from_u8(value: u8) -> io::Result<Self> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Value),
            2 => Ok(Status::NotFound),
            3 => Ok(Status::Error),
            other => Err(invalid(format!("unknown status {other}"))),
        }
    }
}

/// One client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The operation.
    pub op: Op,
    /// The entry key; zeroed for `PING`.
    pub key: CacheKey,
    /// Payload, non-empty only for `SET`.
    pub payload: Vec<u8>,
}

/// One server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The outcome.
    pub status: Status,
    /// The value or error message.
    pub payload: Vec<u8>,
}

impl Response {
    /// A bare success.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            payload: Vec::new(),
        }
    }

    /// A value response.
    pub fn value(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Value,
            payload,
        }
    }

    /// A not-found response.
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: Vec::new(),
        }
    }

    /// An error response carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            payload: message.into().into_bytes(),
        }
    }

    /// Returns the payload of an error response as text.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Initial buffer size for incoming payloads.
const READ_CHUNK: usize = 64 * 1024;

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn payload_len(len: usize) -> io::Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&l| l <= MAX_PAYLOAD)
        .ok_or_else(|| invalid(format!("payload of {len} bytes exceeds limit")))
}

fn read_payload(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()?;
    if len > MAX_PAYLOAD {
        return Err(invalid(format!("payload of {len} bytes exceeds limit")));
    }
    // The buffer grows with the bytes that actually arrive, so an announced
    // length alone commits no memory.
    let mut payload = Vec::with_capacity((len as usize).min(READ_CHUNK));
    let read = r.by_ref().take(u64::from(len)).read_to_end(&mut payload)?;
    if read != len as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("payload ended after {read} of {len} bytes"),
        ));
    }
    Ok(payload)
}

/// Writes a request frame.
pub fn write_request(w: &mut impl Write, request: &Request) -> io::Result<()> {
    let len = payload_len(request.payload.len())?;
    w.write_u8(request.op as u8)?;
    w.write_all(&request.key.encode())?;
    w.write_u32::<LittleEndian>(len)?;
    w.write_all(&request.payload)?;
    w.flush()
}

/// Reads a request frame. Returns `Ok(None)` when the peer closed the
/// connection between frames.
pub fn read_request(r: &mut impl Read) -> io::Result<Option<Request>> {
    let op = match r.read_u8() {
        Ok(op) => Op::from_u8(op)?,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut key = [0u8; CacheKey::ENCODED_LEN];
    r.read_exact(&mut key)?;
    let payload = read_payload(r)?;
    Ok(Some(Request {
        op,
        key: CacheKey::decode(&key),
        payload,
    }))
}

/// Writes a response frame.
pub fn write_response(w: &mut impl Write, response: &Response) -> io::Result<()> {
    let len = payload_len(response.payload.len())?;
    w.write_u8(response.status as u8)?;
    w.write_u32::<LittleEndian>(len)?;
    w.write_all(&response.payload)?;
    w.flush()
}

/// Reads a response frame.
pub fn read_response(r: &mut impl Read) -> io::Result<Response> {
    let status = Status::from_u8(r.read_u8()?)?;
    let payload = read_payload(r)?;
    Ok(Response { status, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::{ContentHash, Guid};
    use std::io::Cursor;

    fn key() -> CacheKey {
        CacheKey::new(Guid::from_u128(5), ContentHash::from_bytes(b"k"))
    }

    #[test]
    fn request_frame_layout() {
        let request = Request {
            op: Op::Set,
            key: key(),
            payload: b"abc".to_vec(),
        };
        let mut buf = Vec::new();
        write_request(&mut buf, &request).unwrap();
        assert_eq!(buf.len(), 1 + 32 + 4 + 3);
        assert_eq!(buf[0], 2);
        assert_eq!(&buf[1..33], &key().encode());
        assert_eq!(&buf[33..37], &3u32.to_le_bytes());
        assert_eq!(&buf[37..], b"abc");

        let parsed = read_request(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn response_frame_layout() {
        let mut buf = Vec::new();
        write_response(&mut buf, &Response::error("boom")).unwrap();
        assert_eq!(buf[0], 3);
        assert_eq!(&buf[1..5], &4u32.to_le_bytes());
        let parsed = read_response(&mut Cursor::new(buf)).unwrap();
        assert_eq!(parsed.status, Status::Error);
        assert_eq!(parsed.message(), "boom");
    }

    #[test]
    fn eof_between_frames_is_none() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_request(&mut empty).unwrap().is_none());
    }

    #[test]
    fn truncated_request_is_error() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&[0u8; 10]);
        assert!(read_request(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn unknown_op_is_rejected() {
        let mut buf = vec![9u8];
        buf.extend_from_slice(&[0u8; 36]);
        let err = read_request(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = vec![0u8];
        buf.extend_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        let err = read_response(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn announced_length_without_body_is_eof() {
        let mut buf = vec![Op::Set as u8];
        buf.extend_from_slice(&key().encode());
        buf.extend_from_slice(&MAX_PAYLOAD.to_le_bytes());
        buf.extend_from_slice(b"only a few bytes");
        let err = read_request(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
