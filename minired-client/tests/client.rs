use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use minired_client::{Arg, Client, ClientConfig, Connection, ErrorKind, ReplyKind, ReplyReader, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spawn_server(expected_commands: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
        // Hold the socket open until the client hangs up.
        let mut sink = [0u8; 64];
        while matches!(reader.read(&mut sink), Ok(n) if n > 0) {}
    });

    port
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty"));
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("+{}\r\n", msg).as_bytes());
}

fn write_error(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("-{}\r\n", msg).as_bytes());
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut frame = format!("${}\r\n", data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");
    write_raw(stream, &frame);
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    write_raw(stream, format!(":{}\r\n", value).as_bytes());
}

fn client_on(port: u16) -> Client {
    init_tracing();
    let config = ClientConfig {
        port,
        connect_timeout: Some(Duration::from_secs(1)),
        io_timeout: Some(Duration::from_secs(2)),
        ..ClientConfig::default()
    };
    Client::with_config(config).expect("client")
}

#[test]
fn ping_returns_pong_status() {
    let port = spawn_server(1, |_, args, stream| {
        assert_eq!(args, vec![b"PING".to_vec()]);
        write_simple(stream, "PONG");
    });

    let mut client = client_on(port);
    let reply = client.ping().expect("ping");
    assert_eq!(reply, Value::Status("PONG".into()));
}

#[test]
fn set_then_get_roundtrip() {
    let port = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args, vec![b"SET".to_vec(), b"key".to_vec(), b"val\0ue".to_vec()]);
            write_simple(stream, "OK");
        } else {
            assert_eq!(args, vec![b"GET".to_vec(), b"key".to_vec()]);
            write_bulk(stream, b"val\0ue");
        }
    });

    let mut client = client_on(port);
    let set = client
        .command("SET %s %b", &[Arg::Str("key"), Arg::Bytes(b"val\0ue")])
        .expect("set");
    assert_eq!(set, Value::Status("OK".into()));
    let get = client.command("GET %s", &["key".into()]).expect("get");
    assert_eq!(get.as_bytes(), Some(&b"val\0ue"[..]));
}

#[test]
fn numeric_conversions_reach_the_server_as_text() {
    let port = spawn_server(1, |_, args, stream| {
        assert_eq!(
            args,
            vec![b"EXPIRE".to_vec(), b"key".to_vec(), b"30".to_vec(), b"1.50".to_vec()]
        );
        write_integer(stream, 1);
    });

    let mut client = client_on(port);
    let reply = client
        .command("EXPIRE key %d %.2f", &[Arg::Int(30), Arg::Float(1.5)])
        .expect("expire");
    assert_eq!(reply, Value::Integer(1));
}

#[test]
fn missing_key_is_nil_not_empty() {
    let port = spawn_server(2, |idx, _, stream| {
        if idx == 0 {
            write_raw(stream, b"$-1\r\n");
        } else {
            write_bulk(stream, b"");
        }
    });

    let mut client = client_on(port);
    let missing = client.command_argv(&["GET", "missing"]).expect("get");
    assert!(missing.is_nil());
    let empty = client.command_argv(&["GET", "empty"]).expect("get");
    assert_eq!(empty, Value::Bulk("".into()));
}

#[test]
fn server_error_is_a_reply_not_a_failure() {
    let port = spawn_server(1, |_, _, stream| {
        write_error(stream, "ERR unknown command 'NOPE'");
    });

    let mut client = client_on(port);
    let reply = client.command("NOPE", &[]).expect("reply");
    assert_eq!(reply, Value::Error("ERR unknown command 'NOPE'".into()));
}

#[test]
fn pipeline_collects_one_reply_per_command() {
    let port = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"INCR");
            write_integer(stream, 1);
        }
        1 => {
            assert_eq!(args[0], b"INCR");
            write_integer(stream, 2);
        }
        _ => {
            assert_eq!(args[0], b"LRANGE");
            write_raw(stream, b"*3\r\n$1\r\na\r\n$-1\r\n:7\r\n");
        }
    });

    let mut client = client_on(port);
    client.queue("INCR counter", &[]).expect("queue");
    client.queue("INCR counter", &[]).expect("queue");
    client.queue("LRANGE list 0 -1", &[]).expect("queue");
    assert_eq!(client.connection().pipeline_depth(), 3);

    let replies = client.pipeline().expect("pipeline");
    assert_eq!(client.connection().pipeline_depth(), 0);
    assert_eq!(
        replies,
        vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Array(vec![Value::Bulk("a".into()), Value::Nil, Value::Integer(7)]),
        ]
    );
}

#[test]
fn auth_accepts_ok_and_rejects_errors() {
    let port = spawn_server(2, |idx, args, stream| {
        assert_eq!(args[0], b"AUTH");
        if idx == 0 {
            assert_eq!(args[1], b"wrong");
            write_error(stream, "WRONGPASS invalid password");
        } else {
            assert_eq!(args[1], b"secret");
            write_simple(stream, "OK");
        }
    });

    let mut client = client_on(port);
    let err = client.auth("wrong").expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::Auth);
    client.auth("secret").expect("accepted");
}

#[test]
fn server_hangup_surfaces_as_eof() {
    let port = spawn_server(1, |_, _, stream| {
        let _ = stream.shutdown(Shutdown::Both);
    });

    let mut client = client_on(port);
    let err = client.ping().expect_err("hangup");
    assert_eq!(err.kind(), ErrorKind::Eof);
    assert!(err.is_connection_lost());
}

#[test]
fn silent_server_times_out_in_blocking_mode() {
    let port = spawn_server(1, |_, _, _| {
        thread::sleep(Duration::from_millis(500));
    });

    init_tracing();
    let config = ClientConfig {
        port,
        io_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let mut client = Client::with_config(config).expect("client");
    let err = client.ping().expect_err("timeout");
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(client.reader_mut().last_error().is_some());
}

#[test]
fn exec_without_commands_is_rejected() {
    let port = spawn_server(0, |_, _, _| {});

    init_tracing();
    let mut conn = Connection::connect("127.0.0.1", port).expect("connect");
    let mut reader = ReplyReader::new();
    let err = conn.exec(&mut reader).expect_err("nothing queued");
    assert_eq!(err.kind(), ErrorKind::NoPendingCommands);
    assert_eq!(conn.last_error().map(|e| e.kind), Some(ErrorKind::NoPendingCommands));
}

#[test]
fn nonblocking_get_reply_reports_nothing_until_data_arrives() {
    let port = spawn_server(1, |_, _, stream| {
        thread::sleep(Duration::from_millis(100));
        write_simple(stream, "PONG");
    });

    init_tracing();
    let mut conn = Connection::connect("127.0.0.1", port).expect("connect");
    conn.set_nonblocking().expect("nonblocking");
    assert!(!conn.is_blocking());
    let mut reader = ReplyReader::new();
    conn.append_command("PING", &[]).expect("append");
    assert_eq!(conn.exec(&mut reader).expect("exec"), 1);

    assert!(reader.get_reply(&mut conn).expect("poll").is_none());

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        reader.begin_cycle();
        if let Some(reply) = reader.get_reply(&mut conn).expect("poll") {
            assert_eq!(reply.kind(), ReplyKind::Status);
            assert_eq!(reply.as_str(), Some("PONG"));
            break;
        }
        assert!(Instant::now() < deadline, "reply never arrived");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn replies_in_one_segment_drain_without_extra_reads() {
    let port = spawn_server(1, |_, _, stream| {
        write_raw(stream, b"+first\r\n:2\r\n$5\r\nthird\r\n");
    });

    init_tracing();
    let mut conn = Connection::connect("127.0.0.1", port).expect("connect");
    conn.set_timeout(Duration::from_secs(2)).expect("timeout");
    let mut reader = ReplyReader::new();
    conn.append_command("SUBSCRIBE news", &[]).expect("append");
    conn.exec(&mut reader).expect("exec");

    // Wait for the whole segment so one read picks up all three replies.
    thread::sleep(Duration::from_millis(100));
    let mut seen = Vec::new();
    while let Some(reply) = reader.get_reply(&mut conn).expect("reply") {
        seen.push(reply.to_value());
    }
    assert_eq!(reader.read_count(), 1);
    assert_eq!(
        seen,
        vec![
            Value::Status("first".into()),
            Value::Integer(2),
            Value::Bulk("third".into()),
        ]
    );
}
