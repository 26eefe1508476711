//! End-to-end integration tests for the PTY proxy.
//!
//! These tests verify complete flows work correctly:
//! - Session lifecycle over the line protocol
//! - Output flow control
//! - Environment and working-directory resolution
//! - Process exit status of the built binary

use std::io::Write as _;
use std::process::{Command as Process, Stdio};
use std::time::Duration;

use protocol::messages::{Closed, Created, Output, WorkingDirectory};
use protocol::Reply;
use proxy::{spawn_line_reader, Dispatcher, ProxyError, ReplyWriter};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// The controller's side of an in-process proxy.
struct Controller {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    proxy: JoinHandle<Result<(), ProxyError>>,
}

impl Controller {
    fn start() -> Self {
        let (input, proxy_stdin) = tokio::io::duplex(64 * 1024);
        let (proxy_stdout, output) = tokio::io::duplex(64 * 1024);

        let proxy = tokio::spawn(async move {
            let commands = spawn_line_reader(proxy_stdin);
            let mut writer = ReplyWriter::new(proxy_stdout);
            let (dispatcher, activity) = Dispatcher::new();
            dispatcher.run(commands, activity, &mut writer).await
        });

        Self {
            input,
            output: BufReader::new(output).lines(),
            proxy,
        }
    }

    async fn send(&mut self, command: serde_json::Value) {
        let mut line = command.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn next_reply(&mut self) -> Reply {
        let line = timeout(REPLY_TIMEOUT, self.output.next_line())
            .await
            .expect("timed out waiting for a reply")
            .unwrap()
            .expect("proxy output ended");
        serde_json::from_str(&line).unwrap()
    }

    /// Collects output of `id` until its closed reply; returns text and exit code.
    async fn drain(&mut self, id: u32) -> (String, i32) {
        let mut text = String::new();
        loop {
            match self.next_reply().await {
                Reply::Output(Output { id: got, data }) if got == id => text.push_str(&data),
                Reply::Closed(Closed { id: got, exit_code }) if got == id => {
                    return (text, exit_code)
                }
                other => panic!("unexpected reply: {other:?}"),
            }
        }
    }

    /// Collects output of `id` until it contains `needle`.
    async fn read_until(&mut self, id: u32, needle: &str) -> String {
        let mut text = String::new();
        while !text.contains(needle) {
            match self.next_reply().await {
                Reply::Output(Output { id: got, data }) if got == id => text.push_str(&data),
                other => panic!("unexpected reply: {other:?}"),
            }
        }
        text
    }

    async fn terminate(mut self) -> Result<(), ProxyError> {
        self.send(json!({"type": "terminate"})).await;
        timeout(REPLY_TIMEOUT, self.proxy).await.unwrap().unwrap()
    }
}

fn create(argv: &[&str]) -> serde_json::Value {
    json!({"type": "create", "argv": argv, "rows": 24, "columns": 80})
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_interactive_shell_session() {
    let mut controller = Controller::start();

    controller.send(create(&["/bin/sh"])).await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 1 })
    );

    controller
        .send(json!({"type": "permit-data-size", "id": 1, "size": 1_000_000}))
        .await;
    controller
        .send(json!({"type": "write", "id": 1, "data": "echo marker-$((6 * 7))\n"}))
        .await;
    controller.read_until(1, "marker-42").await;

    controller
        .send(json!({"type": "write", "id": 1, "data": "exit 3\n"}))
        .await;
    let (_, exit_code) = controller.drain(1).await;
    assert_eq!(exit_code, 3);

    assert!(controller.terminate().await.is_ok());
}

#[tokio::test]
async fn test_environment_is_replaced_then_extended() {
    let mut controller = Controller::start();

    controller
        .send(json!({
            "type": "create",
            "argv": ["/bin/sh", "-c", "echo \"[$PROXY_BASE:$PROXY_EXTRA:$HOME]\""],
            "rows": 24,
            "columns": 80,
            "env": {"PROXY_BASE": "base"},
            "extraEnv": {"PROXY_EXTRA": "extra"}
        }))
        .await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 1 })
    );

    controller
        .send(json!({"type": "permit-data-size", "id": 1, "size": 4096}))
        .await;
    let (text, exit_code) = controller.drain(1).await;
    assert!(text.contains("[base:extra:]"), "output was {text:?}");
    assert_eq!(exit_code, 0);

    assert!(controller.terminate().await.is_ok());
}

#[tokio::test]
async fn test_bare_program_with_explicit_environment() {
    let mut controller = Controller::start();

    controller
        .send(json!({
            "type": "create",
            "argv": ["env"],
            "rows": 24,
            "columns": 80,
            "env": {"A": "1"},
            "extraEnv": {"B": "2"}
        }))
        .await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 1 })
    );

    controller
        .send(json!({"type": "permit-data-size", "id": 1, "size": 4096}))
        .await;
    let (text, exit_code) = controller.drain(1).await;
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    assert!(lines.contains(&"A=1"), "output was {text:?}");
    assert!(lines.contains(&"B=2"), "output was {text:?}");
    assert!(!lines.iter().any(|line| line.starts_with("PATH=")));
    assert_eq!(exit_code, 0);

    assert!(controller.terminate().await.is_ok());
}

#[tokio::test]
async fn test_spawn_failure_reports_and_ids_continue() {
    let mut controller = Controller::start();

    controller.send(create(&["/definitely/not/here"])).await;
    let Reply::Output(Output { id, data }) = controller.next_reply().await else {
        panic!("expected the failure text first");
    };
    assert_eq!(id, 1);
    assert!(data.starts_with("Error while starting process '/definitely/not/here'."));
    assert!(data.contains("argv: ['/definitely/not/here']"));
    assert_eq!(
        controller.next_reply().await,
        Reply::Closed(Closed { id: 1, exit_code: 0 })
    );

    controller.send(create(&["/bin/sh"])).await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 2 })
    );

    controller
        .send(json!({"type": "permit-data-size", "id": 2, "size": 1_000_000}))
        .await;
    controller.send(json!({"type": "close", "id": 2})).await;
    let (_, exit_code) = controller.drain(2).await;
    assert_ne!(exit_code, 0);

    assert!(controller.terminate().await.is_ok());
}

#[tokio::test]
async fn test_commands_for_closed_session_are_ignored() {
    let mut controller = Controller::start();

    controller.send(create(&["/bin/sh", "-c", "exit 0"])).await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 1 })
    );
    controller
        .send(json!({"type": "permit-data-size", "id": 1, "size": 1024}))
        .await;
    let (_, exit_code) = controller.drain(1).await;
    assert_eq!(exit_code, 0);

    controller
        .send(json!({"type": "write", "id": 1, "data": "ignored\n"}))
        .await;
    controller.send(json!({"type": "close", "id": 1})).await;
    controller
        .send(json!({"type": "get-working-directory", "id": 1}))
        .await;
    assert_eq!(
        controller.next_reply().await,
        Reply::WorkingDirectory(WorkingDirectory {
            id: 1,
            cwd: String::new()
        })
    );

    assert!(controller.terminate().await.is_ok());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_working_directory_follows_suggestion() {
    let suggested = TempDir::new().unwrap();
    let requested = TempDir::new().unwrap();
    let mut controller = Controller::start();

    controller
        .send(json!({
            "type": "create",
            "argv": ["/bin/sh"],
            "rows": 24,
            "columns": 80,
            "cwd": requested.path(),
            "suggestedCwd": suggested.path()
        }))
        .await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 1 })
    );

    controller
        .send(json!({"type": "get-working-directory", "id": 1}))
        .await;
    let expected = suggested.path().canonicalize().unwrap();
    assert_eq!(
        controller.next_reply().await,
        Reply::WorkingDirectory(WorkingDirectory {
            id: 1,
            cwd: expected.to_string_lossy().into_owned()
        })
    );

    controller
        .send(json!({"type": "permit-data-size", "id": 1, "size": 1_000_000}))
        .await;
    controller.send(json!({"type": "close", "id": 1})).await;
    controller.drain(1).await;

    assert!(controller.terminate().await.is_ok());
}

// =============================================================================
// Flow Control Tests
// =============================================================================

#[tokio::test]
async fn test_output_waits_for_permission() {
    let mut controller = Controller::start();

    controller
        .send(create(&["/bin/sh", "-c", "echo held-back; exec sleep 5"]))
        .await;
    assert_eq!(
        controller.next_reply().await,
        Reply::Created(Created { id: 1 })
    );

    let early = timeout(Duration::from_millis(500), controller.output.next_line()).await;
    assert!(early.is_err(), "output arrived before any permit");

    controller
        .send(json!({"type": "permit-data-size", "id": 1, "size": 4096}))
        .await;
    controller.read_until(1, "held-back").await;

    controller.send(json!({"type": "close", "id": 1})).await;
    controller.drain(1).await;

    assert!(controller.terminate().await.is_ok());
}

// =============================================================================
// Protocol Fault Tests
// =============================================================================

#[tokio::test]
async fn test_unknown_command_stops_proxy() {
    let mut controller = Controller::start();
    controller.send(json!({"type": "reboot"})).await;

    let result = timeout(REPLY_TIMEOUT, controller.proxy).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProxyError::Protocol(_))));
}

// =============================================================================
// Binary Tests
// =============================================================================

/// Runs the built binary with `input` on stdin; returns exit code and stdout.
fn run_binary(args: &[&str], input: impl AsRef<[u8]>) -> (Option<i32>, String) {
    let mut child = Process::new(env!("CARGO_BIN_EXE_pty-proxy"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input.as_ref()).unwrap();
    drop(stdin);

    let output = child.wait_with_output().unwrap();
    (
        output.status.code(),
        String::from_utf8(output.stdout).unwrap(),
    )
}

#[test]
fn test_binary_terminate_exits_zero() {
    let (code, stdout) = run_binary(
        &[],
        "{\"type\":\"get-working-directory\",\"id\":4}\n{\"type\":\"terminate\"}\n",
    );
    assert_eq!(code, Some(0));
    assert_eq!(stdout, "{\"type\":\"working-directory\",\"id\":4,\"cwd\":\"\"}\n");
}

#[test]
fn test_binary_end_of_input_exits_zero() {
    let (code, stdout) = run_binary(&["--log-level", "debug"], "\n\n");
    assert_eq!(code, Some(0));
    assert!(stdout.is_empty());
}

#[test]
fn test_binary_unknown_type_exits_one() {
    let (code, _) = run_binary(&[], "{\"type\":\"reboot\"}\n{\"type\":\"terminate\"}\n");
    assert_eq!(code, Some(1));
}

#[test]
fn test_binary_malformed_line_exits_one() {
    let (code, _) = run_binary(&[], "this is not json\n");
    assert_eq!(code, Some(1));
}

#[test]
fn test_binary_line_not_utf8_exits_one() {
    let (code, stdout) = run_binary(
        &[],
        b"{\"type\":\"wr\xffite\"}\n{\"type\":\"terminate\"}\n",
    );
    assert_eq!(code, Some(1));
    assert!(stdout.is_empty());
}

#[test]
fn test_binary_invalid_log_level_exits_one() {
    let (code, stdout) = run_binary(&["--log-level", "chatty"], "{\"type\":\"terminate\"}\n");
    assert_eq!(code, Some(1));
    assert!(stdout.is_empty());
}

#[test]
fn test_binary_writes_log_file() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("proxy.log");
    let (code, _) = run_binary(
        &["--verbose", "--log-file", log_path.to_str().unwrap()],
        "{\"type\":\"terminate\"}\n",
    );
    assert_eq!(code, Some(0));

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Received command"), "log was {log:?}");
}
