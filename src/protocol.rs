//! RPC messages and wire framing for the store service
//!
//! Frames are CRLF-terminated header lines parsed with nom. Values travel as a
//! length-prefixed payload after the header so they may contain any UTF-8,
//! including spaces and line breaks. Keys are single tokens.
//!
//! ```text
//! STORE <key> <len>\r\n<value>\r\n     SUCCESS true|false\r\n
//! RETRIEVE <key>\r\n                   FOUND <len>\r\n<value>\r\n | MISSING\r\n
//! DELETE <key>\r\n                     SUCCESS true|false\r\n
//! DELETE_STRICT <key>\r\n              SUCCESS true\r\n | ERROR NOT_FOUND ...\r\n
//! ```

use crate::error::{KvError, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{digit1, space1},
    combinator::{map, map_res, opt, value},
    sequence::{preceded, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest key accepted by the service
pub const MAX_KEY_LEN: usize = 1024;

/// Longest header line read before the frame is rejected
pub const MAX_HEADER_LEN: usize = 2048;

/// Default cap on a single value payload
pub const DEFAULT_MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub key: String,
}

/// `value` is empty whenever `found` is false
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub value: String,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Requests understood by the store service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Store(StoreRequest),
    Retrieve(RetrieveRequest),
    Delete(DeleteRequest),
    /// Delete that reports an absent key as a `NOT_FOUND` status
    DeleteStrict(DeleteRequest),
}

/// Replies sent back by the store service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Success(bool),
    Retrieved(RetrieveResponse),
    Error(Status),
}

/// Status codes carried by `ERROR` replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    Unavailable,
    Internal,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Check that a key can be carried in a header line
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidRequest("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KvError::InvalidRequest(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    if !key.bytes().all(is_key_byte) {
        return Err(KvError::InvalidRequest(format!(
            "key {:?} contains whitespace or control characters",
            key
        )));
    }
    Ok(())
}

fn is_key_byte(c: u8) -> bool {
    !c.is_ascii_whitespace() && !c.is_ascii_control()
}

impl Request {
    /// Key addressed by this request
    pub fn key(&self) -> &str {
        match self {
            Request::Store(req) => &req.key,
            Request::Retrieve(req) => &req.key,
            Request::Delete(req) | Request::DeleteStrict(req) => &req.key,
        }
    }

    /// Serialize the request to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Request::Store(req) => {
                let mut out = format!("STORE {} {}\r\n", req.key, req.value.len()).into_bytes();
                out.extend_from_slice(req.value.as_bytes());
                out.extend_from_slice(b"\r\n");
                out
            }
            Request::Retrieve(req) => format!("RETRIEVE {}\r\n", req.key).into_bytes(),
            Request::Delete(req) => format!("DELETE {}\r\n", req.key).into_bytes(),
            Request::DeleteStrict(req) => format!("DELETE_STRICT {}\r\n", req.key).into_bytes(),
        }
    }
}

impl Reply {
    /// Serialize the reply to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Reply::Success(success) => format!("SUCCESS {}\r\n", success).into_bytes(),
            Reply::Retrieved(resp) if resp.found => {
                let mut out = format!("FOUND {}\r\n", resp.value.len()).into_bytes();
                out.extend_from_slice(resp.value.as_bytes());
                out.extend_from_slice(b"\r\n");
                out
            }
            Reply::Retrieved(_) => b"MISSING\r\n".to_vec(),
            Reply::Error(status) => {
                // the message must stay on the header line
                let message = status.message.replace(['\r', '\n'], " ");
                format!("ERROR {} {}\r\n", status.code, message).into_bytes()
            }
        }
    }
}

/// Request header line; `Store` still owes a payload of `len` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestHeader {
    Store { key: String, len: usize },
    Retrieve { key: String },
    Delete { key: String },
    DeleteStrict { key: String },
}

/// Reply header line; `Found` still owes a payload of `len` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyHeader {
    Success(bool),
    Found { len: usize },
    Missing,
    Error(Status),
}

/// Parse a request header line
pub fn parse_request_header(input: &[u8]) -> Result<RequestHeader> {
    let (_, header) = request_header(input)?;
    Ok(header)
}

/// Parse a reply header line
pub fn parse_reply_header(input: &[u8]) -> Result<ReplyHeader> {
    let (_, header) = reply_header(input)?;
    Ok(header)
}

fn line_end(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag(b"\r\n"), tag(b"\n")))(input)
}

fn key(input: &[u8]) -> IResult<&[u8], String> {
    map_res(take_while1(is_key_byte), |bytes: &[u8]| {
        str::from_utf8(bytes).map(str::to_owned)
    })(input)
}

fn length(input: &[u8]) -> IResult<&[u8], usize> {
    map_res(digit1, |digits: &[u8]| {
        str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(())
    })(input)
}

fn request_header(input: &[u8]) -> IResult<&[u8], RequestHeader> {
    terminated(
        alt((store_header, retrieve_header, delete_strict_header, delete_header)),
        line_end,
    )(input)
}

/// STORE <key> <len>
fn store_header(input: &[u8]) -> IResult<&[u8], RequestHeader> {
    map(
        tuple((tag(b"STORE"), space1, key, space1, length)),
        |(_, _, key, _, len)| RequestHeader::Store { key, len },
    )(input)
}

/// RETRIEVE <key>
fn retrieve_header(input: &[u8]) -> IResult<&[u8], RequestHeader> {
    map(preceded(tuple((tag(b"RETRIEVE"), space1)), key), |key| {
        RequestHeader::Retrieve { key }
    })(input)
}

/// DELETE_STRICT <key>
fn delete_strict_header(input: &[u8]) -> IResult<&[u8], RequestHeader> {
    map(preceded(tuple((tag(b"DELETE_STRICT"), space1)), key), |key| {
        RequestHeader::DeleteStrict { key }
    })(input)
}

/// DELETE <key>
fn delete_header(input: &[u8]) -> IResult<&[u8], RequestHeader> {
    map(preceded(tuple((tag(b"DELETE"), space1)), key), |key| {
        RequestHeader::Delete { key }
    })(input)
}

fn reply_header(input: &[u8]) -> IResult<&[u8], ReplyHeader> {
    terminated(
        alt((success_header, found_header, missing_header, error_header)),
        line_end,
    )(input)
}

fn success_header(input: &[u8]) -> IResult<&[u8], ReplyHeader> {
    map(
        preceded(
            tuple((tag(b"SUCCESS"), space1)),
            alt((value(true, tag(b"true")), value(false, tag(b"false")))),
        ),
        ReplyHeader::Success,
    )(input)
}

fn found_header(input: &[u8]) -> IResult<&[u8], ReplyHeader> {
    map(preceded(tuple((tag(b"FOUND"), space1)), length), |len| {
        ReplyHeader::Found { len }
    })(input)
}

fn missing_header(input: &[u8]) -> IResult<&[u8], ReplyHeader> {
    value(ReplyHeader::Missing, tag(b"MISSING"))(input)
}

fn status_code(input: &[u8]) -> IResult<&[u8], StatusCode> {
    alt((
        value(StatusCode::InvalidArgument, tag(b"INVALID_ARGUMENT")),
        value(StatusCode::NotFound, tag(b"NOT_FOUND")),
        value(StatusCode::Unavailable, tag(b"UNAVAILABLE")),
        value(StatusCode::Internal, tag(b"INTERNAL")),
    ))(input)
}

/// ERROR <CODE> [message]
fn error_header(input: &[u8]) -> IResult<&[u8], ReplyHeader> {
    map(
        tuple((
            tag(b"ERROR"),
            space1,
            status_code,
            opt(preceded(space1, take_till(|c: u8| c == b'\r' || c == b'\n'))),
        )),
        |(_, _, code, message)| {
            let message = message
                .map(|m| String::from_utf8_lossy(m).into_owned())
                .unwrap_or_default();
            ReplyHeader::Error(Status::new(code, message))
        },
    )(input)
}

/// Read one header line; `None` on a clean end of stream
async fn read_header<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_HEADER_LEN as u64);
    let n = limited.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") {
        if line.len() >= MAX_HEADER_LEN {
            return Err(KvError::FrameTooLarge {
                len: line.len(),
                max: MAX_HEADER_LEN,
            });
        }
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(Some(line))
}

/// Read a `len`-byte payload followed by its line terminator
async fn read_payload<R>(reader: &mut R, len: usize, max: usize) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    if len > max {
        return Err(KvError::FrameTooLarge { len, max });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let mut terminator = [0u8; 1];
    reader.read_exact(&mut terminator).await?;
    if terminator[0] == b'\r' {
        reader.read_exact(&mut terminator).await?;
    }
    if terminator[0] != b'\n' {
        return Err(KvError::Protocol("payload not followed by line end".to_string()));
    }

    String::from_utf8(payload)
        .map_err(|_| KvError::InvalidRequest("value is not valid UTF-8".to_string()))
}

/// Read the next request frame; `None` when the peer closed the stream
pub async fn read_request<R>(reader: &mut R, max_value_len: usize) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_header(reader).await? else {
        return Ok(None);
    };
    let request = match parse_request_header(&line)? {
        RequestHeader::Store { key, len } => {
            let value = read_payload(reader, len, max_value_len).await?;
            Request::Store(StoreRequest { key, value })
        }
        RequestHeader::Retrieve { key } => Request::Retrieve(RetrieveRequest { key }),
        RequestHeader::Delete { key } => Request::Delete(DeleteRequest { key }),
        RequestHeader::DeleteStrict { key } => Request::DeleteStrict(DeleteRequest { key }),
    };
    Ok(Some(request))
}

/// Read the reply to a previously written request
pub async fn read_reply<R>(reader: &mut R, max_value_len: usize) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_header(reader)
        .await?
        .ok_or(KvError::ConnectionClosed)?;
    let reply = match parse_reply_header(&line)? {
        ReplyHeader::Success(success) => Reply::Success(success),
        ReplyHeader::Found { len } => {
            let value = read_payload(reader, len, max_value_len).await?;
            Reply::Retrieved(RetrieveResponse { value, found: true })
        }
        ReplyHeader::Missing => Reply::Retrieved(RetrieveResponse::default()),
        ReplyHeader::Error(status) => Reply::Error(status),
    };
    Ok(reply)
}
