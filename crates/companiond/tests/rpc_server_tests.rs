//! End-to-end: JSON lines over the inbound Unix socket.

mod common;

use common::{FakeDaemon, FakeLocator, FakePackages, RecordingBus};
use companion_common::{Method, Request, Response, ResponseData, TypedValue};
use companiond::clock::ManualClock;
use companiond::config::CompanionConfig;
use companiond::providers::Providers;
use companiond::pull::tags;
use companiond::{rpc_server, Environment, StatsCompanion};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::runtime::Handle;

async fn start(dir: &Path) -> std::path::PathBuf {
    let mut config = CompanionConfig::default();
    config.paths.config_dir = dir.join("configs");
    config.paths.socket_path = dir.join("run").join("companion.sock");

    let env = Environment {
        clock: Arc::new(ManualClock::new(12_345, 1_700_000_000_000)),
        providers: Providers::default(),
        locator: FakeLocator::new(FakeDaemon::new()),
        packages: Arc::new(FakePackages),
        bus: Arc::new(RecordingBus::default()),
    };
    let companion = Arc::new(StatsCompanion::new(&config, env, Handle::current()));

    let listener = rpc_server::bind(&config.paths.socket_path).await.unwrap();
    tokio::spawn(rpc_server::run(listener, companion));
    config.paths.socket_path
}

async fn call(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    request: &Request,
) -> Response {
    let line = serde_json::to_string(request).unwrap() + "\n";
    writer.write_all(line.as_bytes()).await.unwrap();
    let mut reply = String::new();
    reader.read_line(&mut reply).await.unwrap();
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn test_pull_over_socket() {
    let dir = TempDir::new().unwrap();
    let socket = start(dir.path()).await;

    let (reader, mut writer) = UnixStream::connect(&socket).await.unwrap().into_split();
    let mut reader = BufReader::new(reader);

    let response = call(
        &mut reader,
        &mut writer,
        &Request {
            id: 7,
            method: Method::Pull {
                tag: tags::SYSTEM_UPTIME,
            },
        },
    )
    .await;

    assert_eq!(response.id, 7);
    match response.result {
        Ok(ResponseData::Records(records)) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].fields, vec![TypedValue::Int64(12_345)]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_errors_carry_codes_and_bad_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let socket = start(dir.path()).await;

    let (reader, mut writer) = UnixStream::connect(&socket).await.unwrap().into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"not json\n").await.unwrap();
    let response = call(
        &mut reader,
        &mut writer,
        &Request {
            id: 8,
            method: Method::Pull { tag: 1 },
        },
    )
    .await;

    assert_eq!(response.id, 8);
    let err = response.result.unwrap_err();
    assert_eq!(err.code, -32011);

    let dump = Request {
        id: 9,
        method: Method::Dump,
    };
    let response = call(&mut reader, &mut writer, &dump).await;
    assert!(matches!(
        response.result,
        Ok(ResponseData::Dump(text)) if text.contains("disconnected")
    ));
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = TempDir::new().unwrap();
    let run = dir.path().join("run");
    std::fs::create_dir_all(&run).unwrap();
    std::fs::write(run.join("companion.sock"), b"stale").unwrap();

    let socket = start(dir.path()).await;
    assert!(UnixStream::connect(&socket).await.is_ok());
}
