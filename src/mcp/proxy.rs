//! Stdio proxy connecting MCP clients to the daemon.
//!
//! The assistant launches `dbgp-mcp mcp`; this pipes line-delimited JSON-RPC
//! between stdin/stdout and the daemon's Unix socket, starting the daemon
//! first when none is running. The daemon outlives any one client, so debug
//! sessions and pending breakpoints survive client restarts.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::config;
use crate::{Error, Result};

pub async fn stdio_proxy() -> Result<()> {
    let dir = config::home_dir();
    let socket_path = dir.join("dbgp-mcp.sock");
    let pid_path = dir.join("dbgp-mcp.pid");

    if !daemon_running(&pid_path, &socket_path) {
        tracing::info!("no daemon running, starting one");
        spawn_daemon()?;
    }

    let stream = connect_with_retry(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut daemon_reader = BufReader::new(reader);

    let mut stdin_reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    let mut stdin_line = String::new();
    let mut daemon_line = String::new();

    loop {
        tokio::select! {
            result = stdin_reader.read_line(&mut stdin_line) => {
                match result {
                    Ok(0) => break, // client went away
                    Ok(_) => {
                        writer.write_all(stdin_line.as_bytes()).await?;
                        writer.flush().await?;
                        stdin_line.clear();
                    }
                    Err(e) => {
                        tracing::error!("stdin error: {}", e);
                        break;
                    }
                }
            }
            result = daemon_reader.read_line(&mut daemon_line) => {
                match result {
                    Ok(0) => break, // daemon went away
                    Ok(_) => {
                        stdout.write_all(daemon_line.as_bytes()).await?;
                        stdout.flush().await?;
                        daemon_line.clear();
                    }
                    Err(e) => {
                        tracing::error!("daemon error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// The pid file plus a signal-0 probe tells us whether the daemon is alive;
/// a stale socket alone does not.
fn daemon_running(pid_path: &Path, socket_path: &Path) -> bool {
    if !pid_path.exists() || !socket_path.exists() {
        return false;
    }
    let Ok(pid_str) = std::fs::read_to_string(pid_path) else {
        return false;
    };
    let Ok(pid) = pid_str.trim().parse::<i32>() else {
        return false;
    };
    unsafe { libc::kill(pid, 0) == 0 }
}

fn spawn_daemon() -> Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

async fn connect_with_retry(socket_path: &Path) -> Result<UnixStream> {
    for _ in 0..50 {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("daemon socket {} not reachable", socket_path.display()),
    )))
}
