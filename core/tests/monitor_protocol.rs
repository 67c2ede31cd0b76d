//! Integration tests for the monitor protocol over loopback sockets.
//!
//! Every test starts a real agent on an ephemeral port and talks to it the
//! way a controller would: one connection per command.

use callwatch_core::protocol::{read_frame, read_stream_header, write_frame};
use callwatch_core::{
    Agent, Command, Config, MonitorClient, PolicyConfig, PolicyEngine, ResponseRow, ServerConfig,
    StaticContext, Verdict,
};
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn launch_agent(dir: &tempfile::TempDir) -> (Agent, MonitorClient) {
    let config = Config {
        server: ServerConfig {
            ports: vec![0],
            ..Default::default()
        },
        policy: PolicyConfig {
            file: Some(dir.path().join("api_policies.txt")),
        },
        ..Default::default()
    };
    let agent = Agent::launch(config).expect("failed to build agent");
    let port = agent.server_port().expect("server did not start");
    let client = MonitorClient::new(SocketAddr::from(([127, 0, 0, 1], port)))
        .timeout(Duration::from_secs(5));
    (agent, client)
}

fn wait_for_shutdown(agent: &Agent) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while agent.server_port().is_some() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_connection_check_reports_pid_and_package() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);
    agent.init(Arc::new(StaticContext::new("org.example.browser")));

    let rows = client.query(Command::ConnectionCheck).expect("query failed");

    assert_eq!(
        rows,
        vec![ResponseRow::full(
            std::process::id().to_string(),
            "org.example.browser",
            ""
        )]
    );
    agent.shutdown();
}

#[test]
fn test_get_logs_twice() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);

    for i in 0..5 {
        agent.record_log(format!("TId:1;objCls:'C';mthd:'m{}'", i));
    }

    let first = client.query(Command::GetLogs).expect("query failed");
    let payloads: Vec<_> = first.iter().map(|row| row.2.clone().unwrap_or_default()).collect();
    assert_eq!(
        payloads,
        (0..5)
            .map(|i| format!("TId:1;objCls:'C';mthd:'m{}'", i))
            .collect::<Vec<_>>()
    );

    let timestamps: Vec<_> = first.iter().map(|row| row.1.clone().unwrap_or_default()).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);

    let second = client.query(Command::GetLogs).expect("query failed");
    assert!(second.is_empty());
    agent.shutdown();
}

#[test]
fn test_concurrent_recording_is_drained_once() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);
    let agent = Arc::new(agent);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let agent = Arc::clone(&agent);
            thread::spawn(move || {
                for i in 0..50 {
                    agent.record_log(format!("writer{}-{}", t, i));
                }
            })
        })
        .collect();

    let mut drained = client.query(Command::GetLogs).expect("query failed");
    for writer in writers {
        writer.join().expect("writer panicked");
    }
    drained.extend(client.query(Command::GetLogs).expect("query failed"));

    let mut payloads: Vec<_> = drained.into_iter().filter_map(|row| row.2).collect();
    payloads.sort();
    payloads.dedup();
    assert_eq!(payloads.len(), 200);
    agent.shutdown();
}

#[test]
fn test_drain_larger_than_request_limit() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);
    let client = client.timeout(Duration::from_secs(30));

    let body = "x".repeat(1000);
    for i in 0..18_000 {
        agent.record_log(format!("{:05}{}", i, body));
    }

    let rows = client.query(Command::GetLogs).expect("large drain failed");
    assert_eq!(rows.len(), 18_000);
    assert_eq!(rows[0].2.as_deref().map(str::len), Some(1005));
    assert!(rows[17_999].2.as_deref().is_some_and(|p| p.starts_with("17999")));
    assert!(agent.logs().is_empty());

    // Server survived the exchange
    assert_eq!(client.query(Command::GetTime).expect("query failed").len(), 1);
    agent.shutdown();
}

#[test]
fn test_get_time_format() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);

    let rows = client.query(Command::GetTime).expect("query failed");

    assert_eq!(rows.len(), 1);
    let time = rows[0].0.clone().expect("time column missing");
    assert!(chrono::NaiveDateTime::parse_from_str(&time, "%Y-%m-%d %H:%M:%S%.3f").is_ok());
    assert_eq!(rows[0].1, None);
    assert_eq!(rows[0].2, None);
    agent.shutdown();
}

#[test]
fn test_unknown_command_keeps_server_open() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);

    assert!(client.send_raw("listTables").expect("query failed").is_empty());
    assert!(agent.server_port().is_some());
    assert_eq!(client.query(Command::GetTime).expect("query failed").len(), 1);
    agent.shutdown();
}

#[test]
fn test_close_stops_server() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);

    let rows = client.query(Command::Close).expect("query failed");
    assert!(rows.is_empty());

    wait_for_shutdown(&agent);
    assert!(agent.server_port().is_none());
    assert!(TcpStream::connect(client.addr()).is_err());
}

#[test]
fn test_malformed_frame_closes_server() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);

    let stream = TcpStream::connect(client.addr()).expect("connect failed");
    let mut reader = BufReader::new(&stream);
    read_stream_header(&mut reader).expect("bad header");

    // Valid length prefix, body is not JSON
    let mut writer = &stream;
    writer.write_all(&4u32.to_be_bytes()).expect("write failed");
    writer.write_all(b"!!!!").expect("write failed");
    writer.flush().expect("flush failed");

    wait_for_shutdown(&agent);
    assert!(agent.server_port().is_none());
}

#[test]
fn test_raw_exchange_shapes() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, client) = launch_agent(&dir);
    agent.record_log("payload with 'quotes'");

    let stream = TcpStream::connect(client.addr()).expect("connect failed");
    let mut reader = BufReader::new(&stream);
    read_stream_header(&mut reader).expect("bad header");

    let mut writer = &stream;
    write_frame(&mut writer, "getLogs").expect("write failed");
    writer.flush().expect("flush failed");

    let body: serde_json::Value = read_frame(&mut reader, 1 << 20).expect("read failed");
    let rows = body.as_array().expect("response is an array");
    assert_eq!(rows.len(), 1);
    let row = rows[0].as_array().expect("row is an array");
    assert_eq!(row.len(), 3);
    assert_eq!(row[2], "payload with 'quotes'");
    agent.shutdown();
}

#[test]
fn test_policy_is_independent_of_server() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let (agent, _client) = launch_agent(&dir);
    std::fs::write(
        dir.path().join("api_policies.txt"),
        "android.foo.bar\thttp://x\tDeny\n",
    )
    .expect("failed to write policy");

    assert_eq!(agent.get_policy("android.foo.bar", &["http://x/path"]), Verdict::Deny);
    assert_eq!(agent.get_policy("android.foo.bar", &["http://y"]), Verdict::Allow);

    let engine = PolicyEngine::new(dir.path().join("api_policies.txt"));
    assert_eq!(engine.get_policy("android.foo.bar", &["http://x"]), Verdict::Deny);
    agent.shutdown();
}
