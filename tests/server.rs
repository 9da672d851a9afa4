use std::io::{Cursor, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tuplespace::*;

fn start_server() -> (SocketAddr, Arc<Space>) {
    let config = Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        workers: 2,
        stats_interval: Duration::from_secs(1),
    };
    let server = Server::bind(config).expect("bind");
    let addr = server.local_addr().unwrap();
    let space = server.space();
    std::thread::spawn(move || server.run());
    (addr, space)
}

fn raw_client(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("Failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("Failed to set read timeout");
    stream
}

fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).expect("Failed to read until close");
    out
}

#[test]
fn end_to_end_scenario() {
    let (addr, _) = start_server();
    let mut c = Client::connect(addr).unwrap();

    assert_eq!(c.put("a", "b").unwrap().to_string(), "OK (a, b) added");
    assert_eq!(c.read("a").unwrap().to_string(), "OK (a, b) read");
    assert_eq!(c.get("a").unwrap().to_string(), "OK (a, b) removed");
    assert_eq!(c.read("a").unwrap().to_string(), "ERR a does not exist");
}

#[test]
fn wire_bytes_use_whole_frame_length() {
    let (addr, _) = start_server();
    let mut s = raw_client(addr);

    s.write_all(b"009 P a b").unwrap();
    let mut buf = [0u8; 19];
    s.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"019 OK (a, b) added");
}

#[test]
fn application_errors_keep_connection_open() {
    let (addr, space) = start_server();
    let mut c = Client::connect(addr).unwrap();

    let resp = c
        .request(&Request::Unknown {
            command: "X".into(),
            key: "k".into(),
            value: Some("v".into()),
        })
        .unwrap();
    assert_eq!(resp, Response::err("k", Reason::InvalidCommand));
    assert!(space.is_empty());

    c.put("k", "v1").unwrap();
    assert_eq!(
        c.put("k", "v2").unwrap(),
        Response::err("k", Reason::AlreadyExists)
    );
    assert_eq!(c.read("k").unwrap(), Response::ok("k", "v1", Outcome::Read));
    assert_eq!(space.snapshot().counters.errors, 2);
}

#[test]
fn framing_error_closes_connection() {
    let (addr, space) = start_server();
    let mut s = raw_client(addr);

    s.write_all(b"xyz P a b").unwrap();
    assert!(read_to_close(&mut s).is_empty());
    assert_eq!(space.snapshot().counters.total_ops, 0);
}

#[test]
fn pipelined_frames_are_answered_before_close() {
    let (addr, _) = start_server();
    let mut s = raw_client(addr);

    s.write_all(b"009 P a b007 G a").unwrap();
    s.shutdown(Shutdown::Write).unwrap();

    let got = read_to_close(&mut s);
    assert_eq!(&got[..], &b"019 OK (a, b) added021 OK (a, b) removed"[..]);
}

#[test]
fn truncated_frame_gets_no_response() {
    let (addr, space) = start_server();
    let mut s = raw_client(addr);

    s.write_all(b"020 P a b").unwrap();
    s.shutdown(Shutdown::Write).unwrap();

    assert!(read_to_close(&mut s).is_empty());
    assert!(space.is_empty());
}

#[test]
fn complete_frame_before_truncated_tail_is_answered() {
    let (addr, space) = start_server();
    let mut s = raw_client(addr);

    s.write_all(b"009 P a b020 P c d").unwrap();
    s.shutdown(Shutdown::Write).unwrap();

    let got = read_to_close(&mut s);
    assert_eq!(&got[..], &b"019 OK (a, b) added"[..]);
    assert_eq!(space.len(), 1);
}

#[test]
fn backlog_is_drained_before_framing_close() {
    let (addr, _) = start_server();
    let mut s = raw_client(addr);

    // Far more response bytes than a socket buffer holds, then garbage
    let n = 40_000;
    let mut frames = b"007 R k".repeat(n);
    frames.extend_from_slice(b"xyz");
    s.write_all(&frames).unwrap();

    let got = read_to_close(&mut s);
    let answer = b"024 ERR k does not exist";
    assert_eq!(got.len(), n * answer.len());
    assert!(got.chunks(answer.len()).all(|c| c == &answer[..]));
}

#[test]
fn concurrent_connections_put_distinct_keys() {
    let (addr, space) = start_server();
    let n = 32;

    let handles: Vec<_> = (0..n)
        .map(|i| {
            std::thread::spawn(move || {
                let mut c = Client::connect(addr).unwrap();
                c.put(&format!("key{}", i), &format!("value {}", i)).unwrap()
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap().is_ok());
    }

    assert_eq!(space.len(), n);
    let snap = space.snapshot();
    assert_eq!(snap.counters.puts, n as u64);
    assert_eq!(snap.counters.clients, n as u64);
}

#[test]
fn script_runs_and_skips_bad_lines() {
    let (addr, space) = start_server();
    let mut c = Client::connect(addr).unwrap();

    let script = "PUT a hello world\n\nREAD a\nTAKE a\nPUT b\nGET a\nGET a\n";
    let mut out = Vec::new();
    let summary = run_script(&mut c, Cursor::new(script), &mut out).unwrap();

    assert_eq!(
        summary,
        ScriptSummary {
            sent: 4,
            ok: 3,
            failed: 1,
            skipped: 2,
        }
    );
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "PUT a hello world: OK (a, hello world) added");
    assert_eq!(lines[1], "READ a: OK (a, hello world) read");
    assert!(lines[2].starts_with("TAKE a: error:"));
    assert_eq!(lines[3], "PUT b: error: PUT needs a value");
    assert_eq!(lines[4], "GET a: OK (a, hello world) removed");
    assert_eq!(lines[5], "GET a: ERR a does not exist");
    assert!(space.is_empty());
}
