/*!
 * Blocking Tuple Space Client
 *
 * A synchronous protocol peer over `std::net::TcpStream`, and the script
 * runner behind the `tuplespace-client` binary. Script lines look like
 * `PUT key some value`, `READ key` or `GET key`.
 */

use crate::protocol::{read_frame, ProtocolError, Request, Response, MAX_ENTRY_LEN};
use bytes::BytesMut;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("server closed the connection")]
    Disconnected,
    #[error("unknown command {0:?}, expected PUT, GET or READ")]
    UnknownCommand(String),
    #[error("missing key")]
    MissingKey,
    #[error("PUT needs a value")]
    MissingValue,
    #[error("{0} takes no value")]
    UnexpectedValue(&'static str),
    #[error("entry of {0} bytes exceeds the 970 byte limit")]
    EntryTooLarge(usize),
}

impl ClientError {
    /// Validation errors only affect one script line
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::UnknownCommand(_)
                | ClientError::MissingKey
                | ClientError::MissingValue
                | ClientError::UnexpectedValue(_)
                | ClientError::EntryTooLarge(_)
        )
    }
}

/// A connected protocol peer
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    buf: BytesMut,
}

impl Client {
    /// Connect to a tuple space server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Anything resolving to the server's socket address
    ///
    /// # Returns
    ///
    /// A client with Nagle disabled, or the connect error.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            buf: BytesMut::new(),
        })
    }

    /// Send one request and wait for its response
    pub fn request(&mut self, req: &Request) -> Result<Response, ClientError> {
        self.buf.clear();
        req.encode(&mut self.buf)?;
        self.writer.write_all(&self.buf)?;

        match read_frame(&mut self.reader)? {
            Some(payload) => Ok(Response::parse(&payload)?),
            None => Err(ClientError::Disconnected),
        }
    }

    /// Store `value` under `key`. Answered with `ERR` if the key exists.
    pub fn put(&mut self, key: &str, value: &str) -> Result<Response, ClientError> {
        self.request(&Request::Put {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Look `key` up without removing it
    pub fn read(&mut self, key: &str) -> Result<Response, ClientError> {
        self.request(&Request::Read {
            key: key.to_string(),
        })
    }

    /// Remove `key` and return its value.
    ///
    /// # Returns
    ///
    /// `OK (key, value) removed`, or `ERR key does not exist` as a normal
    /// response. Only transport and protocol failures are `Err`.
    pub fn get(&mut self, key: &str) -> Result<Response, ClientError> {
        self.request(&Request::Get {
            key: key.to_string(),
        })
    }
}

/// Turn a script line into a request.
///
/// The command word is case sensitive. The key is the second word and the
/// value is everything after the single space that follows it, so values
/// keep inner and leading spaces. Surrounding whitespace of the line is
/// ignored. The collated
/// `KEY VALUE` text must fit in [`MAX_ENTRY_LEN`] bytes.
pub fn parse_line(line: &str) -> Result<Request, ClientError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim_start()),
        None => (line, ""),
    };
    if !matches!(command, "PUT" | "GET" | "READ") {
        return Err(ClientError::UnknownCommand(command.to_string()));
    }
    if rest.is_empty() {
        return Err(ClientError::MissingKey);
    }

    // Bytes, not chars: this is what the server measures
    let collated = rest.len();
    if collated > MAX_ENTRY_LEN {
        return Err(ClientError::EntryTooLarge(collated));
    }

    // One separator, as on the wire: further spaces belong to the value
    let (key, value) = match rest.split_once(' ') {
        Some((k, v)) => (k.to_string(), Some(v.to_string())),
        None => (rest.to_string(), None),
    };

    match (command, value) {
        ("PUT", Some(value)) if !value.is_empty() => Ok(Request::Put { key, value }),
        ("PUT", _) => Err(ClientError::MissingValue),
        ("GET", None) => Ok(Request::Get { key }),
        ("READ", None) => Ok(Request::Read { key }),
        ("GET", Some(_)) => Err(ClientError::UnexpectedValue("GET")),
        _ => Err(ClientError::UnexpectedValue("READ")),
    }
}

/// Totals of a script run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptSummary {
    pub sent: usize,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Run every line of `script` against `client`, echoing results to `out`.
///
/// Invalid lines are reported and skipped. A transport or protocol failure
/// aborts the run with an error.
pub fn run_script<R: BufRead, W: Write>(
    client: &mut Client,
    script: R,
    out: &mut W,
) -> Result<ScriptSummary, ClientError> {
    let mut summary = ScriptSummary::default();

    for line in script.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let req = match parse_line(line) {
            Ok(req) => req,
            Err(e) => {
                summary.skipped += 1;
                writeln!(out, "{}: error: {}", line, e)?;
                continue;
            }
        };

        let resp = client.request(&req)?;
        summary.sent += 1;
        if resp.is_ok() {
            summary.ok += 1;
        } else {
            summary.failed += 1;
        }
        writeln!(out, "{}: {}", line, resp)?;
    }

    Ok(summary)
}
