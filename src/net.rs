/*!
 * Network Layer and Event Loop
 *
 * This module implements the TCP listener and the per-connection protocol
 * loop. Connections are spread over a fixed set of mio reactor threads; each
 * accepted socket becomes an independent connection state machine that
 * reads frames, executes them against the shared space and writes the
 * responses back, until the peer leaves or breaks framing.
 */

use crate::config::Config;
use crate::protocol::{decode_many, truncated, ProtocolError, Request};
use crate::space::Space;
use crate::stats::spawn_stats_reporter;
use anyhow::{anyhow, bail, Context, Result};
use bytes::{Buf, BytesMut};
use crossbeam::channel::{unbounded, Receiver};
use hashbrown::HashMap;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Size of read buffer for incoming data
const READ_BUF: usize = 4096;

const LISTENER: Token = Token(0);

/// Bind a nonblocking TCP listener.
///
/// Uses socket2 so SO_REUSEADDR is set before binding and a restarted server
/// can take its port back while old connections sit in TIME_WAIT.
pub fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind {}", addr))?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// A bound tuple space server
pub struct Server {
    listener: std::net::TcpListener,
    space: Arc<Space>,
    config: Config,
}

impl Server {
    /// Bind `config.addr` and create an empty tuple space
    pub fn bind(config: Config) -> Result<Self> {
        Self::with_space(config, Arc::new(Space::new()))
    }

    /// Bind `config.addr` and serve an existing space
    pub fn with_space(config: Config, space: Arc<Space>) -> Result<Self> {
        let listener = bind_listener(config.addr)?;
        Ok(Self {
            listener,
            space,
            config,
        })
    }

    /// Address actually bound, useful when the config asked for port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared handle to the served space
    pub fn space(&self) -> Arc<Space> {
        self.space.clone()
    }

    /// Serve forever.
    ///
    /// Starts the stats reporter and `config.workers` reactor threads, each
    /// polling its own clone of the listening socket. Returns as soon as any
    /// reactor fails, with that reactor's error.
    pub fn run(self) -> Result<()> {
        let _reporter = spawn_stats_reporter(self.space.clone(), self.config.stats_interval)?;
        let workers = self.config.workers.max(1);

        log::info!(
            "tuplespace listening on {} with {} worker threads",
            self.local_addr()?,
            workers
        );

        // Every reactor reports how it ended; the first report wins
        let (exit_tx, exit_rx) = unbounded::<ReactorExit>();
        for id in 0..workers {
            let listener = self.listener.try_clone()?;
            let space = self.space.clone();
            let exit_tx = exit_tx.clone();
            std::thread::Builder::new()
                .name(format!("reactor-{}", id))
                .spawn(move || {
                    let res = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_worker_loop(id, listener, space)
                    }))
                    .unwrap_or_else(|_| Err(anyhow!("reactor thread panicked")));
                    let _ = exit_tx.send((id, res));
                })?;
        }
        drop(exit_tx);

        first_exit(&exit_rx)
    }
}

/// Reactor id and how its loop ended
type ReactorExit = (usize, Result<()>);

/// Block until any reactor stops and turn its exit into the server's result.
///
/// Reactors never return on their own, so even a clean exit is an error.
fn first_exit(exits: &Receiver<ReactorExit>) -> Result<()> {
    match exits.recv() {
        Ok((id, Ok(()))) => bail!("reactor {} stopped", id),
        Ok((id, Err(e))) => Err(e.context(format!("reactor {} failed", id))),
        Err(_) => bail!("no reactor running"),
    }
}

/// Why a connection left the loop
#[derive(Debug)]
enum Close {
    /// Peer closed its side on a frame boundary
    Peer,
    /// Stream can no longer be framed
    Framing(ProtocolError),
    /// Socket failure
    Transport(io::Error),
}

/// Per-connection state
struct Connection {
    sock: TcpStream,
    peer: SocketAddr,
    rbuf: BytesMut,
    wbuf: BytesMut,
    reqs: Vec<Request>,
    /// Set once the peer shut down its write side
    eof: bool,
    /// Reason to close once `wbuf` has drained; no more frames are read
    closing: Option<Close>,
}

impl Connection {
    fn new(sock: TcpStream, peer: SocketAddr) -> Self {
        Self {
            sock,
            peer,
            rbuf: BytesMut::with_capacity(READ_BUF),
            wbuf: BytesMut::new(),
            reqs: Vec::with_capacity(8),
            eof: false,
            closing: None,
        }
    }

    /// Still accepting new frames
    fn open(&self) -> bool {
        !self.eof && self.closing.is_none()
    }

    /// Drive the connection after a readiness event.
    ///
    /// Responses to every frame executed so far are written out before the
    /// connection is closed, whatever the reason for closing.
    ///
    /// # Returns
    /// * `None` - keep the connection registered
    /// * `Some(reason)` - the connection is finished
    fn ready(&mut self, ev: &Event, space: &Space, tmp: &mut [u8]) -> Option<Close> {
        if ev.is_readable() && self.open() {
            if let Err(e) = self.fill(tmp) {
                return Some(Close::Transport(e));
            }
            self.closing = self.process(space);
        }

        if let Err(e) = self.flush() {
            // The pending reason would otherwise go unreported
            if let Some(pending) = self.closing.take() {
                log_close(self.peer, pending);
            }
            return Some(Close::Transport(e));
        }
        if !self.wbuf.is_empty() {
            return None;
        }
        match self.closing.take() {
            Some(reason) => Some(reason),
            None if self.eof => Some(Close::Peer),
            None => None,
        }
    }

    /// Execute every complete frame in `rbuf`, queueing the responses.
    ///
    /// # Returns
    /// * `Some(Close::Framing(..))` - the stream broke framing; frames before
    ///   the bad one have been answered
    /// * `None` - the stream is still aligned
    fn process(&mut self, space: &Space) -> Option<Close> {
        let framed = decode_many(&mut self.rbuf, &mut self.reqs);
        for req in self.reqs.drain(..) {
            log::debug!("{} -> {}", self.peer, req);
            let resp = space.exec(req);
            if let Err(e) = resp.encode(&mut self.wbuf) {
                return Some(Close::Framing(e));
            }
        }
        if let Err(e) = framed {
            return Some(Close::Framing(e));
        }
        if self.eof && !self.rbuf.is_empty() {
            return Some(Close::Framing(truncated(&self.rbuf)));
        }
        None
    }

    /// Read everything the socket has; sets `eof` on orderly shutdown
    fn fill(&mut self, tmp: &mut [u8]) -> io::Result<()> {
        loop {
            match self.sock.read(tmp) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.rbuf.extend_from_slice(&tmp[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if would_block(e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Write as much of `wbuf` as the socket accepts
    fn flush(&mut self) -> io::Result<()> {
        while !self.wbuf.is_empty() {
            match self.sock.write(&self.wbuf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.wbuf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if would_block(e) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Interest matching what the connection still waits for
    fn interest(&self) -> Interest {
        match (self.open(), self.wbuf.is_empty()) {
            (true, true) => Interest::READABLE,
            (true, false) => Interest::READABLE | Interest::WRITABLE,
            (false, _) => Interest::WRITABLE,
        }
    }
}

/// Event loop of one reactor thread
fn run_worker_loop(id: usize, listener: std::net::TcpListener, space: Arc<Space>) -> Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);

    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;

    let mut conns: HashMap<usize, Connection> = HashMap::new();
    let mut next_tok: usize = 1;

    // Buffer for reading from sockets
    let mut tmp_buf = [0u8; READ_BUF];

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e).context("poll");
        }

        for ev in events.iter() {
            match ev.token() {
                LISTENER => loop {
                    match listener.accept() {
                        Ok((mut sock, peer)) => {
                            sock.set_nodelay(true).ok();
                            let tok = next_tok;
                            next_tok = next_tok.wrapping_add(1);
                            if next_tok == 0 {
                                next_tok = 1; // Skip 0 (LISTENER)
                            }

                            if let Err(e) =
                                poll.registry().register(&mut sock, Token(tok), Interest::READABLE)
                            {
                                log::warn!("reactor {} cannot register {}: {}", id, peer, e);
                                continue;
                            }
                            space.client_connected();
                            log::info!("client {} connected (reactor {})", peer, id);
                            conns.insert(tok, Connection::new(sock, peer));
                        }
                        Err(ref e) if would_block(e) => break,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            log::warn!("reactor {} accept error: {}", id, e);
                            break;
                        }
                    }
                },
                Token(t) => {
                    let close = match conns.get_mut(&t) {
                        Some(conn) => match conn.ready(ev, &space, &mut tmp_buf) {
                            None => reregister(poll.registry(), conn, Token(t)).err(),
                            Some(close) => Some(close),
                        },
                        None => continue,
                    };

                    if let Some(reason) = close {
                        if let Some(mut conn) = conns.remove(&t) {
                            let _ = poll.registry().deregister(&mut conn.sock);
                            log_close(conn.peer, reason);
                        }
                    }
                }
            }
        }
    }
}

fn reregister(registry: &Registry, conn: &mut Connection, token: Token) -> Result<(), Close> {
    let interest = conn.interest();
    registry
        .reregister(&mut conn.sock, token, interest)
        .map_err(Close::Transport)
}

fn log_close(peer: SocketAddr, reason: Close) {
    match reason {
        Close::Peer => log::info!("client {} disconnected", peer),
        Close::Framing(e) => log::warn!("client {} dropped, framing error: {}", peer, e),
        Close::Transport(e) => log::warn!("client {} dropped, transport error: {}", peer, e),
    }
}

/// Check if an I/O error indicates the operation would block
#[inline]
fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_exit_reports_any_reactor() {
        let (tx, rx) = unbounded::<ReactorExit>();
        // Reactor 0 keeps running (its sender stays alive), reactor 3 fails
        let _running = tx.clone();
        tx.send((3, Err(anyhow!("poll broke")))).unwrap();

        let err = first_exit(&rx).unwrap_err();
        assert!(format!("{:#}", err).contains("reactor 3 failed"));
        assert!(format!("{:#}", err).contains("poll broke"));
    }

    #[test]
    fn first_exit_treats_clean_return_as_error() {
        let (tx, rx) = unbounded::<ReactorExit>();
        tx.send((1, Ok(()))).unwrap();
        assert!(first_exit(&rx).is_err());

        drop(tx);
        assert!(first_exit(&rx).is_err());
    }
}
