//! Shared fixtures: a fake stream-json agent and a JSON-RPC test client

#![allow(dead_code)]

use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_code_bridge::types::{BridgeConfig, SessionTimeouts};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// Agent conversation id reported by the fake agent
pub const AGENT_SESSION_ID: &str = "agent-123";

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

// Replies to each user line by what the prompt text contains:
//   "write"  -> Write tool use for a.txt, then a result
//   "sudo"   -> can_use_tool control request for Bash; result after the response
//   "crash"  -> exit 3 without a result
//   other    -> one assistant text block, then a result
const FAKE_AGENT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "2.0.0 (Claude Code)"
  exit 0
fi

result() {
  echo '{"type":"result","subtype":"success","is_error":false,"result":"done","session_id":"agent-123","duration_ms":12,"usage":{"input_tokens":100,"output_tokens":50}}'
}

echo '{"type":"system","subtype":"init","session_id":"agent-123","model":"claude-test"}'

while IFS= read -r line; do
  case "$line" in
    *control_response*)
      result
      ;;
    *crash*)
      exit 3
      ;;
    *sudo*)
      echo '{"type":"control_request","request_id":"req-1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"sudo rm -rf /"},"tool_use_id":"toolu_bash"}}'
      ;;
    *write*)
      echo '{"type":"assistant","session_id":"agent-123","message":{"role":"assistant","content":[{"type":"tool_use","id":"toolu_write","name":"Write","input":{"path":"a.txt","content":"hi"}}]}}'
      result
      ;;
    *)
      echo '{"type":"assistant","session_id":"agent-123","message":{"role":"assistant","content":[{"type":"text","text":"hello from the fake agent"}]}}'
      result
      ;;
  esac
done
"#;

/// A workspace directory holding the fake agent script
#[derive(Debug)]
pub struct FakeAgent {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::with_script(FAKE_AGENT)
    }

    /// Fake agent running a custom shell script
    pub fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let path = bin.join("claude");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    pub fn workspace(&self) -> &Path {
        self.dir.path()
    }

    /// Bridge configuration pointing at this agent, with short timeouts
    pub fn config(&self) -> BridgeConfig {
        let mut config = BridgeConfig {
            workspace_root: self.workspace().to_path_buf(),
            timeouts: SessionTimeouts {
                init: Duration::from_secs(10),
                crash_backoff: Duration::from_millis(50),
                stop_grace: Duration::from_secs(1),
                ..SessionTimeouts::default()
            },
            ..BridgeConfig::default()
        };
        config.agent.agent_path = Some(self.path.clone());
        config
    }
}

/// JSON-RPC client talking to an in-process bridge over a duplex pipe
#[derive(Debug)]
pub struct Client {
    writer: WriteHalf<DuplexStream>,
    reader: BufReader<ReadHalf<DuplexStream>>,
    backlog: VecDeque<Value>,
    next_id: u64,
}

impl Client {
    pub fn start(config: BridgeConfig) -> Self {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(claude_code_bridge::serve(
            config,
            server_read,
            server_write,
            std::future::pending(),
        ));

        let (client_read, client_write) = tokio::io::split(client);
        Self {
            writer: client_write,
            reader: BufReader::new(client_read),
            backlog: VecDeque::new(),
            next_id: 1,
        }
    }

    pub async fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Send a request without waiting; returns its id
    pub async fn call(&mut self, method: &str, params: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        id
    }

    async fn read_frame(&mut self) -> Value {
        let mut line = String::new();
        let read = tokio::time::timeout(FRAME_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a frame from the bridge")
            .unwrap();
        assert!(read > 0, "bridge closed the transport");
        serde_json::from_str(&line).unwrap()
    }

    /// Next frame matching `pred`; other frames stay queued in order
    pub async fn wait_for(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.backlog.iter().position(&pred) {
            return self.backlog.remove(pos).unwrap();
        }
        loop {
            let frame = self.read_frame().await;
            if pred(&frame) {
                return frame;
            }
            self.backlog.push_back(frame);
        }
    }

    pub async fn response(&mut self, id: u64) -> Value {
        self.wait_for(|f| f["id"] == id && f.get("method").is_none())
            .await
    }

    /// Send a request and return its `result`, panicking on an error response
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.call(method, params).await;
        let frame = self.response(id).await;
        assert!(
            frame.get("error").is_none(),
            "{} failed: {}",
            method,
            frame["error"]
        );
        frame["result"].clone()
    }

    /// Next `session/update` whose update has the given type
    pub async fn update(&mut self, update_type: &str) -> Value {
        let frame = self
            .wait_for(|f| f["method"] == "session/update" && f["params"]["update"]["type"] == update_type)
            .await;
        frame["params"]["update"].clone()
    }

    /// The first `session/update` read after every frame seen so far
    pub async fn next_update_on_wire(&mut self) -> Value {
        loop {
            let frame = self.read_frame().await;
            if frame["method"] == "session/update" {
                return frame["params"]["update"].clone();
            }
            self.backlog.push_back(frame);
        }
    }

    /// Next notification with this method
    pub async fn notification(&mut self, method: &str) -> Value {
        let frame = self.wait_for(|f| f["method"] == method).await;
        frame["params"].clone()
    }

    /// Queued `session/update` types, in arrival order
    pub fn queued_update_types(&self) -> Vec<String> {
        self.backlog
            .iter()
            .filter(|f| f["method"] == "session/update")
            .filter_map(|f| f["params"]["update"]["type"].as_str().map(String::from))
            .collect()
    }
}
