/*!
 * Tuple Space Wire Protocol
 *
 * This module implements the length-prefixed text protocol spoken between
 * tuple space peers. It handles frame splitting, request/response parsing
 * and the matching encoders.
 *
 * Frame layout: `LLL <payload>` where `LLL` is a three digit, zero padded
 * decimal length. The length counts the WHOLE frame: the three digits, the
 * separating space and the payload. Every encoder and decoder in this crate
 * applies that rule, so `"009 R abc"` is the only valid framing of `R abc`.
 */

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Read;

/// Width of the decimal length field
pub const LEN_DIGITS: usize = 3;

/// Length field plus its trailing separator
pub const HEADER_LEN: usize = LEN_DIGITS + 1;

/// Largest frame the three digit length field can describe
pub const MAX_FRAME_LEN: usize = 999;

/// Upper bound for `key.len() + value.len()` of a single request.
///
/// Keeps every response to a valid request (`OK (k, v) removed` is the
/// longest) inside one frame.
pub const MAX_ENTRY_LEN: usize = 970;

/// Errors raised while framing or parsing protocol data.
///
/// Every variant is fatal for the connection it occurred on: the byte stream
/// is no longer trusted to be aligned on frame boundaries.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid length field {0:?}")]
    InvalidLength(String),
    #[error("missing separator after length field")]
    MissingSeparator,
    #[error("connection closed with {got} of {expected} frame bytes")]
    Truncated { got: usize, expected: usize },
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed request {0:?}")]
    MalformedRequest(String),
    #[error("malformed response {0:?}")]
    MalformedResponse(String),
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("entry of {0} bytes exceeds the 970 byte limit")]
    EntryTooLarge(usize),
    #[error("frame of {0} bytes exceeds the 999 byte limit")]
    FrameTooLarge(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `P key value` - insert, fails if the key exists
    Put { key: String, value: String },
    /// `R key` - non-destructive lookup
    Read { key: String },
    /// `G key` - destructive lookup (take)
    Get { key: String },
    /// Any other command token. Answered with `invalid command`.
    Unknown {
        command: String,
        key: String,
        value: Option<String>,
    },
}

impl Request {
    /// Key the request targets
    pub fn key(&self) -> &str {
        match self {
            Request::Put { key, .. }
            | Request::Read { key }
            | Request::Get { key }
            | Request::Unknown { key, .. } => key,
        }
    }

    /// Parse a request payload (the part after `LLL `).
    ///
    /// Shape: `CMD KEY[ VALUE]`. The key ends at the first space; everything
    /// after it is the value, spaces included. `P` requires the value
    /// separator (the value itself may be empty), `R` and `G` forbid it.
    pub fn parse(payload: &str) -> Result<Request, ProtocolError> {
        let malformed = || ProtocolError::MalformedRequest(payload.to_string());

        let (command, rest) = payload.split_once(' ').ok_or_else(malformed)?;
        if command.is_empty() {
            return Err(malformed());
        }
        let (key, value) = match rest.split_once(' ') {
            Some((k, v)) => (k, Some(v)),
            None => (rest, None),
        };
        check_key(key)?;
        check_entry_len(key, value.unwrap_or(""))?;

        let key = key.to_string();
        let req = match (command, value) {
            ("P", Some(v)) => Request::Put {
                key,
                value: v.to_string(),
            },
            ("R", None) => Request::Read { key },
            ("G", None) => Request::Get { key },
            ("P", None) | ("R", Some(_)) | ("G", Some(_)) => return Err(malformed()),
            (other, value) => Request::Unknown {
                command: other.to_string(),
                key,
                value: value.map(str::to_string),
            },
        };
        Ok(req)
    }

    /// Append this request as a complete frame to `out`.
    ///
    /// Fails without touching `out` if the key breaks the key rule or the
    /// frame would not fit the length field.
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        check_key(self.key())?;
        if let Request::Unknown { command, .. } = self {
            if command.is_empty() || command.contains(' ') {
                return Err(ProtocolError::MalformedRequest(command.clone()));
            }
        }
        write_frame(&self.to_string(), out)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Put { key, value } => write!(f, "P {} {}", key, value),
            Request::Read { key } => write!(f, "R {}", key),
            Request::Get { key } => write!(f, "G {}", key),
            Request::Unknown {
                command,
                key,
                value: Some(v),
            } => write!(f, "{} {} {}", command, key, v),
            Request::Unknown {
                command,
                key,
                value: None,
            } => write!(f, "{} {}", command, key),
        }
    }
}

/// What a successful operation did to the tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Added,
    Removed,
    Read,
}

impl Outcome {
    /// Wire word closing an `OK` response
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Added => "added",
            Outcome::Removed => "removed",
            Outcome::Read => "read",
        }
    }

    fn from_wire(s: &str) -> Option<Outcome> {
        match s {
            "added" => Some(Outcome::Added),
            "removed" => Some(Outcome::Removed),
            "read" => Some(Outcome::Read),
            _ => None,
        }
    }
}

/// Fixed failure reasons reported with `ERR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    AlreadyExists,
    DoesNotExist,
    InvalidCommand,
}

impl Reason {
    /// Wire text following the key in an `ERR` response
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::AlreadyExists => "already exists",
            Reason::DoesNotExist => "does not exist",
            Reason::InvalidCommand => "invalid command",
        }
    }

    fn from_wire(s: &str) -> Option<Reason> {
        match s {
            "already exists" => Some(Reason::AlreadyExists),
            "does not exist" => Some(Reason::DoesNotExist),
            "invalid command" => Some(Reason::InvalidCommand),
            _ => None,
        }
    }
}

/// A server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK (key, value) added|removed|read`
    Ok {
        key: String,
        value: String,
        outcome: Outcome,
    },
    /// `ERR key reason`
    Err { key: String, reason: Reason },
}

impl Response {
    /// Build a success response.
    ///
    /// # Arguments
    ///
    /// * `key` - Key of the affected tuple
    /// * `value` - Value stored, read or removed
    /// * `outcome` - What happened to the tuple
    pub fn ok(key: impl Into<String>, value: impl Into<String>, outcome: Outcome) -> Self {
        Response::Ok {
            key: key.into(),
            value: value.into(),
            outcome,
        }
    }

    /// Build an application error for `key`
    pub fn err(key: impl Into<String>, reason: Reason) -> Self {
        Response::Err {
            key: key.into(),
            reason,
        }
    }

    /// `true` for `OK` responses
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    /// Parse a response payload.
    ///
    /// The outcome is the last word and the key ends at the first `", "`,
    /// so values may contain spaces, commas and parentheses.
    pub fn parse(payload: &str) -> Result<Response, ProtocolError> {
        let malformed = || ProtocolError::MalformedResponse(payload.to_string());

        if let Some(body) = payload.strip_prefix("OK (") {
            let (tuple, outcome) = body.rsplit_once(") ").ok_or_else(malformed)?;
            let outcome = Outcome::from_wire(outcome).ok_or_else(malformed)?;
            let (key, value) = tuple.split_once(", ").ok_or_else(malformed)?;
            check_key(key).map_err(|_| malformed())?;
            return Ok(Response::ok(key, value, outcome));
        }

        if let Some(body) = payload.strip_prefix("ERR ") {
            let (key, reason) = body.split_once(' ').ok_or_else(malformed)?;
            let reason = Reason::from_wire(reason).ok_or_else(malformed)?;
            check_key(key).map_err(|_| malformed())?;
            return Ok(Response::err(key, reason));
        }

        Err(malformed())
    }

    /// Append this response as a complete frame to `out`
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        write_frame(&self.to_string(), out)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok {
                key,
                value,
                outcome,
            } => write!(f, "OK ({}, {}) {}", key, value, outcome.as_str()),
            Response::Err { key, reason } => write!(f, "ERR {} {}", key, reason.as_str()),
        }
    }
}

/// Keys are non-empty and never contain the field separator
fn check_key(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty() || key.contains(' ') {
        return Err(ProtocolError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn check_entry_len(key: &str, value: &str) -> Result<(), ProtocolError> {
    let len = key.len() + value.len();
    if len > MAX_ENTRY_LEN {
        return Err(ProtocolError::EntryTooLarge(len));
    }
    Ok(())
}

/// Append `LLL payload` to `out`
pub fn write_frame(payload: &str, out: &mut BytesMut) -> Result<(), ProtocolError> {
    let total = HEADER_LEN + payload.len();
    if total > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(total));
    }
    out.reserve(total);
    out.put_slice(format!("{:03} ", total).as_bytes());
    out.put_slice(payload.as_bytes());
    Ok(())
}

/// Parse the length field at the start of `data`.
///
/// # Returns
/// * `Ok(Some(len))` - declared frame length
/// * `Ok(None)` - fewer than three bytes buffered, all digits so far
/// * `Err(...)` - a non-digit in the field or a length below the header size
fn read_len(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let field = &data[..data.len().min(LEN_DIGITS)];
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidLength(
            String::from_utf8_lossy(field).into_owned(),
        ));
    }
    if field.len() < LEN_DIGITS {
        return Ok(None);
    }

    let len = field
        .iter()
        .fold(0usize, |n, &c| n * 10 + (c - b'0') as usize);
    // The payload must hold at least one byte
    if len <= HEADER_LEN {
        return Err(ProtocolError::InvalidLength(format!("{:03}", len)));
    }
    Ok(Some(len))
}

/// Split one frame off the front of `data`.
///
/// # Returns
/// * `Ok(Some((consumed_bytes, payload)))` - a complete frame
/// * `Ok(None)` - incomplete frame, need more bytes
/// * `Err(...)` - the stream cannot be framed
pub fn split_frame(data: &[u8]) -> Result<Option<(usize, &str)>, ProtocolError> {
    let len = match read_len(data)? {
        Some(len) => len,
        None => return Ok(None),
    };

    // Reject a bad separator as soon as it is visible
    if data.len() > LEN_DIGITS && data[LEN_DIGITS] != b' ' {
        return Err(ProtocolError::MissingSeparator);
    }
    if data.len() < len {
        return Ok(None);
    }

    let payload =
        std::str::from_utf8(&data[HEADER_LEN..len]).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(Some((len, payload)))
}

/// Parse a single request frame from the front of `data`.
///
/// Incremental counterpart of [`decode`], used on a growing read buffer.
pub fn parse_frame(data: &[u8]) -> Result<Option<(usize, Request)>, ProtocolError> {
    match split_frame(data)? {
        Some((consumed, payload)) => Ok(Some((consumed, Request::parse(payload)?))),
        None => Ok(None),
    }
}

/// Parse every complete request frame in `buf`.
///
/// Consumed bytes are removed from `buf`; a trailing partial frame stays
/// buffered for the next read.
pub fn decode_many(buf: &mut BytesMut, out: &mut Vec<Request>) -> Result<(), ProtocolError> {
    loop {
        let (consumed, req) = match parse_frame(&buf[..])? {
            Some(x) => x,
            None => break,
        };
        buf.advance(consumed);
        out.push(req);
    }
    Ok(())
}

/// The error for a stream that ended with `data` still unframed
pub fn truncated(data: &[u8]) -> ProtocolError {
    ProtocolError::Truncated {
        got: data.len(),
        expected: read_len(data).ok().flatten().unwrap_or(HEADER_LEN),
    }
}

/// Check that `data` is exactly one frame and return its payload
fn whole_frame(data: &[u8]) -> Result<&str, ProtocolError> {
    match split_frame(data)? {
        Some((consumed, payload)) if consumed == data.len() => Ok(payload),
        Some((consumed, _)) => Err(ProtocolError::TrailingBytes(data.len() - consumed)),
        None => Err(truncated(data)),
    }
}

/// Decode exactly one request frame
pub fn decode(frame: &[u8]) -> Result<Request, ProtocolError> {
    Request::parse(whole_frame(frame)?)
}

/// Decode exactly one response frame
pub fn decode_response(frame: &[u8]) -> Result<Response, ProtocolError> {
    Response::parse(whole_frame(frame)?)
}

/// Encode a response into a standalone frame
pub fn encode(resp: &Response) -> Result<Bytes, ProtocolError> {
    let mut out = BytesMut::new();
    resp.encode(&mut out)?;
    Ok(out.freeze())
}

/// Read one frame from a blocking reader and return its payload.
///
/// # Returns
/// * `Ok(Some(payload))` - a complete frame
/// * `Ok(None)` - the peer closed the stream on a frame boundary
/// * `Err(Truncated)` - the peer closed the stream mid-frame
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<String>, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(truncated(&header[..got]));
    }

    let len = read_len(&header)?.unwrap_or(HEADER_LEN);
    if header[LEN_DIGITS] != b' ' {
        return Err(ProtocolError::MissingSeparator);
    }

    let mut payload = vec![0u8; len - HEADER_LEN];
    let got = read_full(reader, &mut payload)?;
    if got < payload.len() {
        return Err(ProtocolError::Truncated {
            got: HEADER_LEN + got,
            expected: len,
        });
    }
    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Like `read_exact`, but reports how many bytes arrived before EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_counts_whole_frame() {
        let mut out = BytesMut::new();
        Request::Read { key: "abc".into() }.encode(&mut out).unwrap();
        assert_eq!(&out[..], b"009 R abc");
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn partial_frames_need_more_bytes() {
        assert!(parse_frame(b"").unwrap().is_none());
        assert!(parse_frame(b"00").unwrap().is_none());
        assert!(parse_frame(b"009 R a").unwrap().is_none());
        assert!(parse_frame(b"009 R abc").unwrap().is_some());
    }

    #[test]
    fn bad_length_field_fails_early() {
        assert!(matches!(
            parse_frame(b"0x9"),
            Err(ProtocolError::InvalidLength(_))
        ));
        assert!(matches!(
            parse_frame(b"004 "),
            Err(ProtocolError::InvalidLength(_))
        ));
        assert!(matches!(
            parse_frame(b"009-R abc"),
            Err(ProtocolError::MissingSeparator)
        ));
    }

    #[test]
    fn value_keeps_inner_spaces() {
        let req = decode(b"020 P k hello world!").unwrap();
        assert_eq!(
            req,
            Request::Put {
                key: "k".into(),
                value: "hello world!".into()
            }
        );
    }

    #[test]
    fn request_shape_is_enforced() {
        assert!(matches!(
            decode(b"008 P ab"),
            Err(ProtocolError::MalformedRequest(_))
        ));
        assert!(matches!(
            decode(b"009 R a b"),
            Err(ProtocolError::MalformedRequest(_))
        ));
        assert!(matches!(decode(b"006 R "), Err(ProtocolError::InvalidKey(_))));
        assert!(matches!(
            decode(b"005 R"),
            Err(ProtocolError::MalformedRequest(_))
        ));
    }

    #[test]
    fn unknown_command_still_decodes() {
        let req = decode(b"008 X ab").unwrap();
        assert_eq!(
            req,
            Request::Unknown {
                command: "X".into(),
                key: "ab".into(),
                value: None
            }
        );
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let payload = format!("P k {}", "v".repeat(MAX_ENTRY_LEN));
        let frame = format!("{:03} {}", HEADER_LEN + payload.len(), payload);
        assert!(matches!(
            decode(frame.as_bytes()),
            Err(ProtocolError::EntryTooLarge(971))
        ));
    }

    #[test]
    fn encode_refuses_keys_with_spaces() {
        let mut out = BytesMut::new();
        let req = Request::Get {
            key: "a b".into(),
        };
        assert!(matches!(
            req.encode(&mut out),
            Err(ProtocolError::InvalidKey(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn response_value_may_contain_delimiters() {
        let resp = Response::ok("k", "a, b) c", Outcome::Read);
        let frame = encode(&resp).unwrap();
        assert_eq!(decode_response(&frame).unwrap(), resp);
    }

    #[test]
    fn read_frame_reports_truncation() {
        let mut full: &[u8] = b"009 R abc009 G abc";
        assert_eq!(read_frame(&mut full).unwrap().as_deref(), Some("R abc"));
        assert_eq!(read_frame(&mut full).unwrap().as_deref(), Some("G abc"));
        assert!(read_frame(&mut full).unwrap().is_none());

        let mut cut: &[u8] = b"009 R a";
        assert!(matches!(
            read_frame(&mut cut),
            Err(ProtocolError::Truncated {
                got: 7,
                expected: 9
            })
        ));
    }
}
