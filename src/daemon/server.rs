use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config;
use crate::dbgp::{BreakpointState, Session};
use crate::mcp::*;
use crate::{Error, Result};

use super::SessionManager;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60); // 30 minutes

pub struct Daemon {
    socket_path: PathBuf,
    pid_path: PathBuf,
    manager: Arc<SessionManager>,
    last_activity: Arc<RwLock<Instant>>,
}

impl Daemon {
    pub async fn run() -> Result<()> {
        let dir = config::home_dir();
        std::fs::create_dir_all(&dir)?;

        let socket_path = dir.join("dbgp-mcp.sock");
        let pid_path = dir.join("dbgp-mcp.pid");

        // Remove stale socket
        let _ = std::fs::remove_file(&socket_path);

        // Write PID file
        std::fs::write(&pid_path, std::process::id().to_string())?;

        let manager = Arc::new(SessionManager::new(config::resolve()));
        // Binding the DBGp listener is the one fatal startup step.
        Arc::clone(&manager).listen().await?;

        let daemon = Arc::new(Self::new(socket_path.clone(), pid_path, manager));

        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!("daemon listening on {:?}", socket_path);

        // Spawn idle timeout checker
        let daemon_clone = Arc::clone(&daemon);
        tokio::spawn(async move {
            daemon_clone.idle_timeout_loop().await;
        });

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let daemon = Arc::clone(&daemon);
                    tokio::spawn(async move {
                        if let Err(e) = daemon.handle_connection(stream).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }

    fn new(socket_path: PathBuf, pid_path: PathBuf, manager: Arc<SessionManager>) -> Self {
        Self {
            socket_path,
            pid_path,
            manager,
            last_activity: Arc::new(RwLock::new(Instant::now())),
        }
    }

    async fn idle_timeout_loop(&self) {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;

            // Never shut down under a live engine session.
            if self.manager.session_count() > 0 {
                *self.last_activity.write().await = Instant::now();
                continue;
            }

            let last = *self.last_activity.read().await;
            if last.elapsed() > IDLE_TIMEOUT {
                tracing::info!("Idle timeout reached, shutting down");
                self.graceful_shutdown().await;
                std::process::exit(0);
            }
        }
    }

    async fn graceful_shutdown(&self) {
        tracing::info!("Starting graceful shutdown...");
        // Sessions close first; the manager then stops accepting engines.
        self.manager.shutdown().await;
        self.cleanup();
        tracing::info!("Graceful shutdown complete");
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_path);
    }

    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut initialized = false;
        let connection_id = uuid::Uuid::new_v4().to_string();

        tracing::info!("Client connected: {}", connection_id);

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break; // EOF
            }

            *self.last_activity.write().await = Instant::now();

            let response = self.handle_message(&line, &mut initialized).await;
            let response_json = serde_json::to_string(&response)?;
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        tracing::info!("Client disconnected: {}", connection_id);
        Ok(())
    }

    async fn handle_message(&self, message: &str, initialized: &mut bool) -> JsonRpcResponse {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(r) => r,
            Err(e) => {
                return JsonRpcResponse::error(
                    Value::Null,
                    -32700,
                    format!("Parse error: {}", e),
                    None,
                );
            }
        };

        // MCP requires initialize before anything else.
        if !*initialized && request.method != "initialize" {
            return JsonRpcResponse::error(
                request.id,
                -32002,
                "Server not initialized. Call 'initialize' first.".to_string(),
                None,
            );
        }

        let result = match request.method.as_str() {
            "initialize" => {
                let result = self.handle_initialize().await;
                if result.is_ok() {
                    *initialized = true;
                }
                result
            }
            "initialized" | "notifications/initialized" => Ok(json!({})),
            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(&request.params).await,
            _ => Err(Error::InvalidArgument(format!(
                "Unknown method: {}",
                request.method
            ))),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                let mcp_error: McpError = e.into();
                JsonRpcResponse::error(
                    request.id,
                    -32000,
                    mcp_error.message,
                    Some(serde_json::to_value(mcp_error.code).unwrap_or(Value::Null)),
                )
            }
        }
    }

    async fn handle_initialize(&self) -> Result<Value> {
        let response = McpInitializeResponse {
            protocol_version: "2024-11-05".to_string(),
            capabilities: McpServerCapabilities {
                tools: McpToolsCapability { list_changed: false },
            },
            server_info: McpServerInfo {
                name: "dbgp-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(Self::debugging_instructions().to_string()),
        };

        Ok(serde_json::to_value(response)?)
    }

    fn debugging_instructions() -> &'static str {
        r#"dbgp-mcp drives script debuggers that speak DBGp (Xdebug and friends). The daemon listens for engine connections on TCP (default port 9003); each connecting script becomes a session you can step, inspect, and evaluate in.

## Workflow

1. Set breakpoints first — debug_set_breakpoint works before any script runs. Breakpoints set while no session exists are held as pending and installed automatically on every new session.
2. Trigger the script — run the page, CLI command, or test with the debugger extension enabled (e.g. XDEBUG_SESSION=1). The engine connects inbound; debug_list_sessions shows it.
3. Run to the breakpoint — debug_continue. The session status becomes "break" and the current file/line update.
4. Inspect — debug_stack for the call stack, debug_variables for a frame's locals, debug_variable for one value in depth, debug_eval for arbitrary expressions.
5. Step — debug_step_over / debug_step_into / debug_step_out, then inspect again.
6. Finish — debug_continue to run free, or debug_stop to terminate the script.

## Sessions

Most tools take an optional sessionId. When omitted, the active session is used: an explicitly selected one, else the earliest session currently paused at a break, else the earliest session. Multiple scripts may be debugged concurrently; use debug_set_active_session or pass sessionId to address one.

## Notes

- Paths are accepted with or without the file:// scheme.
- Variable names are the engine's fully qualified names ($user->name, $arr[3]).
- debug_eval runs code in the paused script. Expressions with side effects will have them.
- A breakpoint id starting with "pending_" lives in this server, not the engine; it accepts only enable/disable updates until a session applies it."#
    }

    async fn handle_tools_list(&self) -> Result<Value> {
        let session_id_prop = json!({
            "type": "string",
            "description": "Session ID. Omit to use the active session."
        });

        let tools = vec![
            McpTool {
                name: "debug_list_sessions".to_string(),
                description: "List connected debug sessions with status, current location, and which one is active. Also reports how many pending breakpoints are waiting for a session.".to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
            McpTool {
                name: "debug_session_state".to_string(),
                description: "Full state of one session: status, current file/line, engine info, known breakpoints, and pending breakpoints applied to it.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_set_active_session".to_string(),
                description: "Select the session that tools without an explicit sessionId address.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": { "type": "string" } },
                    "required": ["sessionId"]
                }),
            },
            McpTool {
                name: "debug_close_session".to_string(),
                description: "Close a debug session's connection. The script resumes or terminates per engine behavior.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_set_breakpoint".to_string(),
                description: "Set a line breakpoint, optionally conditional. Works with no session connected: the breakpoint is stored as pending and installed on every future session automatically.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "filename": { "type": "string", "description": "Script path, with or without file://" },
                        "lineno": { "type": "integer", "description": "1-based line number" },
                        "condition": { "type": "string", "description": "Break only when this expression is truthy" },
                        "hitValue": { "type": "integer", "description": "Hit count operand" },
                        "hitCondition": { "type": "string", "enum": [">=", "==", "%"], "description": "Hit count comparison" },
                        "temporary": { "type": "boolean", "description": "Remove after the first hit" }
                    },
                    "required": ["filename", "lineno"]
                }),
            },
            McpTool {
                name: "debug_set_exception_breakpoint".to_string(),
                description: "Break when an exception is thrown. Use '*' to break on all exceptions.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "exception": { "type": "string", "description": "Exception class name or '*'" }
                    },
                    "required": ["exception"]
                }),
            },
            McpTool {
                name: "debug_set_call_breakpoint".to_string(),
                description: "Break when a named function or method is entered.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "function": { "type": "string", "description": "Function name, Class::method for methods" }
                    },
                    "required": ["function"]
                }),
            },
            McpTool {
                name: "debug_remove_breakpoint".to_string(),
                description: "Remove a breakpoint. Ids starting with 'pending_' are removed from the pending store; other ids from the session's engine.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "breakpointId": { "type": "string" }
                    },
                    "required": ["breakpointId"]
                }),
            },
            McpTool {
                name: "debug_update_breakpoint".to_string(),
                description: "Enable/disable a breakpoint or change its hit count settings. Pending breakpoints accept only enable/disable.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "breakpointId": { "type": "string" },
                        "enabled": { "type": "boolean" },
                        "hitValue": { "type": "integer" },
                        "hitCondition": { "type": "string", "enum": [">=", "==", "%"] }
                    },
                    "required": ["breakpointId"]
                }),
            },
            McpTool {
                name: "debug_list_breakpoints".to_string(),
                description: "List breakpoints: the session's engine-side list (when a session exists) plus all pending breakpoints.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_continue".to_string(),
                description: "Resume execution until the next breakpoint or script end. Returns the new status and location.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_step_over".to_string(),
                description: "Step to the next statement in the current frame, without entering calls.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_step_into".to_string(),
                description: "Step to the next statement, entering function calls.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_step_out".to_string(),
                description: "Run until the current function returns.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_stop".to_string(),
                description: "Terminate the script being debugged.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_detach".to_string(),
                description: "Detach the debugger and let the script run free.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "sessionId": session_id_prop.clone() }
                }),
            },
            McpTool {
                name: "debug_stack".to_string(),
                description: "Call stack of a paused session, innermost frame first.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "depth": { "type": "integer", "description": "Fetch a single frame at this depth" }
                    }
                }),
            },
            McpTool {
                name: "debug_contexts".to_string(),
                description: "Variable contexts the engine offers at a stack depth (locals, superglobals, constants).".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "depth": { "type": "integer" }
                    }
                }),
            },
            McpTool {
                name: "debug_variables".to_string(),
                description: "Variables of one context at one stack depth. Defaults: depth 0 (innermost frame), context 0 (locals).".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "depth": { "type": "integer" },
                        "context": { "type": "integer" }
                    }
                }),
            },
            McpTool {
                name: "debug_variable".to_string(),
                description: "One variable in depth, by fully qualified name ($user->name, $arr[3]). Use page for large arrays.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "name": { "type": "string" },
                        "depth": { "type": "integer" },
                        "context": { "type": "integer" },
                        "page": { "type": "integer" }
                    },
                    "required": ["name"]
                }),
            },
            McpTool {
                name: "debug_set_variable".to_string(),
                description: "Assign a new value to a variable in the paused script.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "name": { "type": "string" },
                        "value": { "type": "string" },
                        "depth": { "type": "integer" },
                        "context": { "type": "integer" }
                    },
                    "required": ["name", "value"]
                }),
            },
            McpTool {
                name: "debug_eval".to_string(),
                description: "Evaluate an expression in the paused script and return its value tree. Side effects are real.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "expression": { "type": "string" },
                        "depth": { "type": "integer", "description": "Stack depth to evaluate at" }
                    },
                    "required": ["expression"]
                }),
            },
            McpTool {
                name: "debug_source".to_string(),
                description: "Fetch script source as the engine sees it. Defaults to the session's current file.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sessionId": session_id_prop.clone(),
                        "filename": { "type": "string" },
                        "begin": { "type": "integer", "description": "First line" },
                        "end": { "type": "integer", "description": "Last line" }
                    }
                }),
            },
        ];

        let response = McpToolsListResponse { tools };
        Ok(serde_json::to_value(response)?)
    }

    async fn handle_tools_call(&self, params: &Value) -> Result<Value> {
        let call: McpToolCallRequest = serde_json::from_value(params.clone())?;

        let result = match call.name.as_str() {
            "debug_list_sessions" => self.tool_list_sessions().await,
            "debug_session_state" => self.tool_session_state(&call.arguments).await,
            "debug_set_active_session" => self.tool_set_active_session(&call.arguments).await,
            "debug_close_session" => self.tool_close_session(&call.arguments).await,
            "debug_set_breakpoint" => self.tool_set_breakpoint(&call.arguments).await,
            "debug_set_exception_breakpoint" => {
                self.tool_set_exception_breakpoint(&call.arguments).await
            }
            "debug_set_call_breakpoint" => self.tool_set_call_breakpoint(&call.arguments).await,
            "debug_remove_breakpoint" => self.tool_remove_breakpoint(&call.arguments).await,
            "debug_update_breakpoint" => self.tool_update_breakpoint(&call.arguments).await,
            "debug_list_breakpoints" => self.tool_list_breakpoints(&call.arguments).await,
            "debug_continue" => self.tool_continuation(&call.arguments, "run").await,
            "debug_step_over" => self.tool_continuation(&call.arguments, "step_over").await,
            "debug_step_into" => self.tool_continuation(&call.arguments, "step_into").await,
            "debug_step_out" => self.tool_continuation(&call.arguments, "step_out").await,
            "debug_stop" => self.tool_continuation(&call.arguments, "stop").await,
            "debug_detach" => self.tool_continuation(&call.arguments, "detach").await,
            "debug_stack" => self.tool_stack(&call.arguments).await,
            "debug_contexts" => self.tool_contexts(&call.arguments).await,
            "debug_variables" => self.tool_variables(&call.arguments).await,
            "debug_variable" => self.tool_variable(&call.arguments).await,
            "debug_set_variable" => self.tool_set_variable(&call.arguments).await,
            "debug_eval" => self.tool_eval(&call.arguments).await,
            "debug_source" => self.tool_source(&call.arguments).await,
            _ => Err(Error::InvalidArgument(format!("Unknown tool: {}", call.name))),
        };

        match result {
            Ok(value) => {
                let response = McpToolCallResponse {
                    content: vec![McpContent::Text {
                        text: serde_json::to_string_pretty(&value)?,
                    }],
                    is_error: None,
                };
                Ok(serde_json::to_value(response)?)
            }
            Err(e) => {
                // Tool failures are structured payloads, not protocol errors.
                let mcp_error: McpError = e.into();
                let response = McpToolCallResponse {
                    content: vec![McpContent::Text {
                        text: serde_json::to_string(&json!({ "error": mcp_error }))?,
                    }],
                    is_error: Some(true),
                };
                Ok(serde_json::to_value(response)?)
            }
        }
    }

    fn session_summary(session: &Session) -> Value {
        let state = session.state_snapshot();
        json!({
            "sessionId": session.id(),
            "status": state.status,
            "currentFile": state.current_file,
            "currentLine": state.current_line,
            "language": session.init().language,
            "ideKey": session.init().ide_key,
            "fileUri": session.init().file_uri,
            "engine": session.init().engine,
            "startTime": session.start_time().to_rfc3339(),
        })
    }

    async fn tool_list_sessions(&self) -> Result<Value> {
        let sessions: Vec<Value> = self
            .manager
            .list()
            .iter()
            .map(|s| Self::session_summary(s))
            .collect();
        Ok(json!({
            "sessions": sessions,
            "activeSessionId": self.manager.active_id(),
            "pendingBreakpoints": self.manager.pending().list().len(),
        }))
    }

    async fn tool_session_state(&self, args: &Value) -> Result<Value> {
        let req: SessionStateRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let mut summary = Self::session_summary(&session);
        summary["breakpoints"] = serde_json::to_value(session.cached_breakpoints())?;
        summary["appliedPending"] =
            serde_json::to_value(self.manager.pending().mappings_for_session(session.id()))?;
        Ok(summary)
    }

    async fn tool_set_active_session(&self, args: &Value) -> Result<Value> {
        let req: SetActiveSessionRequest = serde_json::from_value(args.clone())?;
        self.manager.set_active(&req.session_id)?;
        Ok(json!({ "activeSessionId": req.session_id }))
    }

    async fn tool_close_session(&self, args: &Value) -> Result<Value> {
        let req: CloseSessionRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        self.manager.close_session(session.id())?;
        Ok(json!({ "closed": session.id() }))
    }

    /// Resolve the target session for a breakpoint-set tool: an explicit id
    /// must exist; with no id, fall back to the active session or, when no
    /// engine is connected at all, to the pending store (`None`).
    fn breakpoint_target(&self, session_id: Option<&str>) -> Result<Option<Arc<Session>>> {
        match session_id {
            Some(id) => self.manager.resolve(Some(id)).map(Some),
            None => Ok(self.manager.active_session()),
        }
    }

    async fn tool_set_breakpoint(&self, args: &Value) -> Result<Value> {
        let req: SetBreakpointRequest = serde_json::from_value(args.clone())?;
        match self.breakpoint_target(req.session_id.as_deref())? {
            Some(session) => {
                let result = session
                    .set_line_breakpoint(
                        &req.filename,
                        req.lineno,
                        req.condition.as_deref(),
                        req.hit_value,
                        req.hit_condition.as_deref(),
                        req.temporary,
                    )
                    .await?;
                Ok(json!({
                    "pending": false,
                    "sessionId": session.id(),
                    "breakpointId": result.id,
                    "resolved": result.resolved,
                }))
            }
            None => {
                let bp = self
                    .manager
                    .pending()
                    .add_line(&req.filename, req.lineno, req.condition.clone());
                let mut result = json!({
                    "pending": true,
                    "breakpointId": bp.id,
                    "note": "No session connected; the breakpoint will be applied to each new session.",
                });
                if req.hit_value.is_some() || req.hit_condition.is_some() || req.temporary {
                    result["warnings"] = json!([
                        "hit count and temporary options take effect only on breakpoints set on a live session"
                    ]);
                }
                Ok(result)
            }
        }
    }

    async fn tool_set_exception_breakpoint(&self, args: &Value) -> Result<Value> {
        let req: SetExceptionBreakpointRequest = serde_json::from_value(args.clone())?;
        match self.breakpoint_target(req.session_id.as_deref())? {
            Some(session) => {
                let result = session.set_exception_breakpoint(&req.exception).await?;
                Ok(json!({
                    "pending": false,
                    "sessionId": session.id(),
                    "breakpointId": result.id,
                    "resolved": result.resolved,
                }))
            }
            None => {
                let bp = self.manager.pending().add_exception(&req.exception);
                Ok(json!({ "pending": true, "breakpointId": bp.id }))
            }
        }
    }

    async fn tool_set_call_breakpoint(&self, args: &Value) -> Result<Value> {
        let req: SetCallBreakpointRequest = serde_json::from_value(args.clone())?;
        match self.breakpoint_target(req.session_id.as_deref())? {
            Some(session) => {
                let result = session.set_call_breakpoint(&req.function).await?;
                Ok(json!({
                    "pending": false,
                    "sessionId": session.id(),
                    "breakpointId": result.id,
                    "resolved": result.resolved,
                }))
            }
            None => {
                let bp = self.manager.pending().add_call(&req.function);
                Ok(json!({ "pending": true, "breakpointId": bp.id }))
            }
        }
    }

    async fn tool_remove_breakpoint(&self, args: &Value) -> Result<Value> {
        let req: RemoveBreakpointRequest = serde_json::from_value(args.clone())?;
        if crate::daemon::PendingBreakpoints::is_pending_id(&req.breakpoint_id) {
            if self.manager.pending().remove(&req.breakpoint_id) {
                return Ok(json!({ "removed": req.breakpoint_id, "pending": true }));
            }
            return Err(Error::BreakpointNotFound(req.breakpoint_id));
        }
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let success = session.remove_breakpoint(&req.breakpoint_id).await?;
        Ok(json!({
            "removed": req.breakpoint_id,
            "pending": false,
            "sessionId": session.id(),
            "success": success,
        }))
    }

    async fn tool_update_breakpoint(&self, args: &Value) -> Result<Value> {
        let req: UpdateBreakpointRequest = serde_json::from_value(args.clone())?;
        if crate::daemon::PendingBreakpoints::is_pending_id(&req.breakpoint_id) {
            if req.hit_value.is_some() || req.hit_condition.is_some() {
                return Err(Error::InvalidArgument(
                    "pending breakpoints accept only enable/disable updates".to_string(),
                ));
            }
            let enabled = req.enabled.ok_or_else(|| {
                Error::InvalidArgument("'enabled' is required for pending breakpoints".to_string())
            })?;
            if !self.manager.pending().set_enabled(&req.breakpoint_id, enabled) {
                return Err(Error::BreakpointNotFound(req.breakpoint_id));
            }
            return Ok(json!({
                "breakpointId": req.breakpoint_id,
                "pending": true,
                "enabled": enabled,
            }));
        }

        let session = self.manager.resolve(req.session_id.as_deref())?;
        let state = req.enabled.map(|e| {
            if e {
                BreakpointState::Enabled
            } else {
                BreakpointState::Disabled
            }
        });
        let success = session
            .update_breakpoint(
                &req.breakpoint_id,
                state,
                req.hit_value,
                req.hit_condition.as_deref(),
            )
            .await?;
        Ok(json!({
            "breakpointId": req.breakpoint_id,
            "pending": false,
            "sessionId": session.id(),
            "success": success,
        }))
    }

    async fn tool_list_breakpoints(&self, args: &Value) -> Result<Value> {
        let req: SessionStateRequest = serde_json::from_value(args.clone())?;
        let session = self.breakpoint_target(req.session_id.as_deref())?;
        let (session_id, breakpoints) = match &session {
            Some(s) => (Some(s.id().to_string()), s.list_breakpoints().await?),
            None => (None, Vec::new()),
        };
        Ok(json!({
            "sessionId": session_id,
            "breakpoints": breakpoints,
            "pendingBreakpoints": self.manager.pending().list(),
        }))
    }

    async fn tool_continuation(&self, args: &Value, command: &str) -> Result<Value> {
        let req: SessionStateRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let result = match command {
            "run" => session.run().await?,
            "step_over" => session.step_over().await?,
            "step_into" => session.step_into().await?,
            "step_out" => session.step_out().await?,
            "stop" => session.stop().await?,
            "detach" => session.detach().await?,
            other => return Err(Error::InvalidArgument(format!("unknown command {}", other))),
        };
        let mut value = serde_json::to_value(&result)?;
        value["sessionId"] = json!(session.id());
        Ok(value)
    }

    async fn tool_stack(&self, args: &Value) -> Result<Value> {
        let req: StackRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let frames = session.stack_get(req.depth).await?;
        Ok(json!({ "sessionId": session.id(), "frames": frames }))
    }

    async fn tool_contexts(&self, args: &Value) -> Result<Value> {
        let req: StackRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let contexts = session.context_names(req.depth).await?;
        Ok(json!({ "sessionId": session.id(), "contexts": contexts }))
    }

    async fn tool_variables(&self, args: &Value) -> Result<Value> {
        let req: VariablesRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let variables = session
            .context_get(req.depth.unwrap_or(0), req.context.unwrap_or(0))
            .await?;
        Ok(json!({ "sessionId": session.id(), "variables": variables }))
    }

    async fn tool_variable(&self, args: &Value) -> Result<Value> {
        let req: VariableRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let variable = session
            .property_get(
                &req.name,
                req.depth.unwrap_or(0),
                req.context.unwrap_or(0),
                None,
                req.page,
            )
            .await?;
        Ok(json!({ "sessionId": session.id(), "variable": variable }))
    }

    async fn tool_set_variable(&self, args: &Value) -> Result<Value> {
        let req: SetVariableRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let success = session
            .property_set(
                &req.name,
                req.depth.unwrap_or(0),
                req.context.unwrap_or(0),
                &req.value,
            )
            .await?;
        Ok(json!({ "sessionId": session.id(), "name": req.name, "success": success }))
    }

    async fn tool_eval(&self, args: &Value) -> Result<Value> {
        let req: EvalRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let result = session.eval(&req.expression, req.depth).await?;
        Ok(json!({ "sessionId": session.id(), "result": result }))
    }

    async fn tool_source(&self, args: &Value) -> Result<Value> {
        let req: SourceRequest = serde_json::from_value(args.clone())?;
        let session = self.manager.resolve(req.session_id.as_deref())?;
        let filename = match req.filename {
            Some(f) => f,
            None => session
                .state_snapshot()
                .current_file
                .ok_or_else(|| {
                    Error::InvalidArgument(
                        "no filename given and the session has no current file".to_string(),
                    )
                })?,
        };
        let source = session.source(&filename, req.begin, req.end).await?;
        Ok(json!({
            "sessionId": session.id(),
            "filename": filename,
            "source": source,
        }))
    }
}
