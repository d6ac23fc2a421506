#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use dbgp_mcp::config::Config;
use dbgp_mcp::daemon::{ManagerEvent, SessionManager};

pub const WAIT: Duration = Duration::from_secs(5);

/// Start a manager on an ephemeral loopback port.
pub async fn start_manager() -> (Arc<SessionManager>, SocketAddr) {
    let config = Config {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        command_timeout_ms: 5_000,
        ..Config::default()
    };
    let manager = Arc::new(SessionManager::new(config));
    let addr = Arc::clone(&manager)
        .listen()
        .await
        .expect("listener bind failed");
    (manager, addr)
}

/// A command line as decoded by the fake engine.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub name: String,
    pub tx_id: u32,
    pub args: HashMap<String, String>,
    /// The `-- <base64>` payload, already decoded.
    pub data: Option<String>,
}

impl EngineCommand {
    pub fn arg(&self, flag: &str) -> Option<&str> {
        self.args.get(flag).map(String::as_str)
    }
}

/// Scripted stand-in for a DBGp engine: connects inbound to the manager,
/// sends frames, and decodes the command lines the server writes.
pub struct MockEngine {
    stream: TcpStream,
    read_buf: Vec<u8>,
}

impl MockEngine {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("engine connect failed");
        Self {
            stream,
            read_buf: Vec::new(),
        }
    }

    pub async fn send_frame(&mut self, xml: &str) {
        let mut bytes = xml.len().to_string().into_bytes();
        bytes.push(0);
        bytes.extend_from_slice(xml.as_bytes());
        bytes.push(0);
        self.stream.write_all(&bytes).await.expect("engine write failed");
    }

    pub async fn send_init(&mut self, file_uri: &str, ide_key: &str) {
        let xml = format!(
            r#"<init xmlns="urn:debugger_protocol_v1" appid="4242" idekey="{}" session="1"
                     thread="1" language="PHP" protocol_version="1.0" fileuri="{}">
                 <engine version="3.3.1"><![CDATA[Xdebug]]></engine>
               </init>"#,
            ide_key, file_uri
        );
        self.send_frame(&xml).await;
    }

    /// Read one NUL-terminated command line and decode it.
    pub async fn recv_command(&mut self) -> EngineCommand {
        let line = tokio::time::timeout(WAIT, self.read_line())
            .await
            .expect("timed out waiting for a command");
        parse_command(&line)
    }

    async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == 0) {
                let line: Vec<u8> = self.read_buf.drain(..=pos).collect();
                return String::from_utf8(line[..line.len() - 1].to_vec())
                    .expect("command was not UTF-8");
            }
            let mut chunk = [0u8; 1024];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .expect("engine read failed");
            assert!(n > 0, "server closed the connection mid-command");
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reply with a bare success response echoing the transaction id.
    pub async fn respond_ok(&mut self, cmd: &EngineCommand) {
        let xml = format!(
            r#"<response command="{}" transaction_id="{}" success="1"/>"#,
            cmd.name, cmd.tx_id
        );
        self.send_frame(&xml).await;
    }

    /// Service the four feature_set commands the session issues on attach.
    pub async fn auto_negotiate(&mut self) {
        for _ in 0..4 {
            let cmd = self.recv_command().await;
            assert_eq!(cmd.name, "feature_set", "expected negotiation, got {}", cmd.name);
            let xml = format!(
                r#"<response command="feature_set" transaction_id="{}" feature="{}" success="1"/>"#,
                cmd.tx_id,
                cmd.arg("n").unwrap_or_default()
            );
            self.send_frame(&xml).await;
        }
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = line.chars();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    cur.push(next);
                }
            }
            ' ' if !in_quotes => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn parse_command(line: &str) -> EngineCommand {
    let tokens = tokenize(line);
    assert!(!tokens.is_empty(), "empty command line");
    let name = tokens[0].clone();
    let mut args = HashMap::new();
    let mut data = None;

    let mut i = 1;
    while i < tokens.len() {
        if tokens[i] == "--" {
            let raw = tokens.get(i + 1).expect("-- without data");
            let bytes = BASE64.decode(raw.as_bytes()).expect("data was not base64");
            data = Some(String::from_utf8(bytes).expect("data was not UTF-8"));
            break;
        }
        let flag = tokens[i]
            .strip_prefix('-')
            .unwrap_or_else(|| panic!("expected a flag, got {:?}", tokens[i]))
            .to_string();
        let value = tokens
            .get(i + 1)
            .unwrap_or_else(|| panic!("flag -{} without value", flag))
            .clone();
        args.insert(flag, value);
        i += 2;
    }

    let tx_id = args
        .get("i")
        .and_then(|v| v.parse().ok())
        .expect("command without transaction id");

    EngineCommand {
        name,
        tx_id,
        args,
        data,
    }
}

/// Block until the manager announces a new session, ignoring other events.
pub async fn wait_for_session_created(rx: &mut broadcast::Receiver<ManagerEvent>) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            if let ManagerEvent::SessionCreated { session_id } =
                rx.recv().await.expect("event channel closed")
            {
                return session_id;
            }
        }
    })
    .await
    .expect("timed out waiting for session_created")
}

pub async fn wait_for_session_ended(rx: &mut broadcast::Receiver<ManagerEvent>) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            if let ManagerEvent::SessionEnded { session_id } =
                rx.recv().await.expect("event channel closed")
            {
                return session_id;
            }
        }
    })
    .await
    .expect("timed out waiting for session_ended")
}

/// Attach a fresh engine with negotiation already serviced; returns the
/// engine and the new session id.
pub async fn attach_engine(
    addr: SocketAddr,
    rx: &mut broadcast::Receiver<ManagerEvent>,
    file_uri: &str,
) -> (MockEngine, String) {
    let mut engine = MockEngine::connect(addr).await;
    engine.send_init(file_uri, "mcp-test").await;
    engine.auto_negotiate().await;
    let session_id = wait_for_session_created(rx).await;
    (engine, session_id)
}
