//! A debug session wrapping one engine connection.
//!
//! The session performs feature negotiation on attach and exposes the typed
//! command surface. Status and current location always reflect the most
//! recent response that carried them; the session manager's event pump
//! feeds those updates through [`Session::apply_response`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::Config;
use crate::dbgp::connection::Connection;
use crate::dbgp::parse;
use crate::dbgp::types::*;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SessionState {
    pub status: SessionStatus,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
}

pub struct Session {
    id: String,
    seq: u64,
    conn: Connection,
    init: Init,
    start_time: DateTime<Utc>,
    state: RwLock<SessionState>,
    /// Engine breakpoints as last observed, keyed by engine id.
    breakpoints: RwLock<HashMap<String, Breakpoint>>,
}

impl Session {
    pub(crate) fn new(id: String, seq: u64, conn: Connection, init: Init) -> Self {
        Self {
            id,
            seq,
            conn,
            init,
            start_time: Utc::now(),
            state: RwLock::new(SessionState {
                status: SessionStatus::Starting,
                current_file: None,
                current_line: None,
            }),
            breakpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn init(&self) -> &Init {
        &self.init
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().unwrap().status
    }

    pub fn state_snapshot(&self) -> SessionState {
        self.state.read().unwrap().clone()
    }

    pub fn cached_breakpoints(&self) -> Vec<Breakpoint> {
        let mut list: Vec<Breakpoint> = self.breakpoints.read().unwrap().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// True when the init file URI or the current file contains `needle`.
    pub fn matches_file(&self, needle: &str) -> bool {
        if self.init.file_uri.contains(needle) {
            return true;
        }
        self.state
            .read()
            .unwrap()
            .current_file
            .as_deref()
            .map(|f| f.contains(needle))
            .unwrap_or(false)
    }

    /// Negotiate inspection limits after attach. A feature the engine
    /// rejects is logged and skipped; negotiation never fails the session.
    pub async fn negotiate_features(&self, config: &Config) {
        let features = [
            ("max_depth", config.max_depth.to_string()),
            ("max_children", config.max_children.to_string()),
            ("max_data", config.max_data.to_string()),
            ("show_hidden", "1".to_string()),
        ];
        for (name, value) in features {
            let args = vec![("n", name.to_string()), ("v", value)];
            match self.conn.request("feature_set", args, None).await {
                Ok(resp) => {
                    if let Some(err) = resp.error {
                        tracing::warn!(
                            session = %self.id,
                            feature = name,
                            "engine rejected feature: {} ({})",
                            err.message,
                            engine_error_name(err.code)
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, feature = name, "feature negotiation failed: {}", e);
                }
            }
        }
    }

    /// Engine errors become typed errors; everything else passes through.
    fn check(resp: Response) -> Result<Response> {
        match resp.error {
            Some(err) => Err(Error::Engine {
                command: resp.command,
                code: err.code,
                message: err.message,
            }),
            None => Ok(resp),
        }
    }

    // ---- breakpoints ----

    pub async fn set_line_breakpoint(
        &self,
        filename: &str,
        lineno: u32,
        condition: Option<&str>,
        hit_value: Option<u32>,
        hit_condition: Option<&str>,
        temporary: bool,
    ) -> Result<BreakpointSetResult> {
        let uri = file_uri(filename);
        let kind = if condition.is_some() {
            BreakpointType::Conditional
        } else {
            BreakpointType::Line
        };
        let mut args = vec![
            ("t", kind.as_str().to_string()),
            ("f", uri.clone()),
            ("n", lineno.to_string()),
        ];
        if let Some(h) = hit_value {
            args.push(("h", h.to_string()));
        }
        if let Some(o) = hit_condition {
            args.push(("o", o.to_string()));
        }
        if temporary {
            args.push(("r", "1".to_string()));
        }
        let data = condition.map(|c| c.as_bytes().to_vec());

        let resp = Self::check(self.conn.request("breakpoint_set", args, data).await?)?;
        let result = parse::parse_breakpoint_set(&resp);
        self.breakpoints.write().unwrap().insert(
            result.id.clone(),
            Breakpoint {
                id: result.id.clone(),
                kind,
                state: BreakpointState::Enabled,
                resolved: result.resolved,
                filename: Some(uri),
                lineno: Some(lineno),
                function: None,
                exception: None,
                expression: condition.map(str::to_string),
                hit_count: None,
                hit_value,
                hit_condition: hit_condition.map(str::to_string),
            },
        );
        Ok(result)
    }

    pub async fn set_exception_breakpoint(&self, exception: &str) -> Result<BreakpointSetResult> {
        let args = vec![
            ("t", "exception".to_string()),
            ("x", exception.to_string()),
        ];
        let resp = Self::check(self.conn.request("breakpoint_set", args, None).await?)?;
        let result = parse::parse_breakpoint_set(&resp);
        self.breakpoints.write().unwrap().insert(
            result.id.clone(),
            Breakpoint {
                id: result.id.clone(),
                kind: BreakpointType::Exception,
                state: BreakpointState::Enabled,
                resolved: result.resolved,
                filename: None,
                lineno: None,
                function: None,
                exception: Some(exception.to_string()),
                expression: None,
                hit_count: None,
                hit_value: None,
                hit_condition: None,
            },
        );
        Ok(result)
    }

    pub async fn set_call_breakpoint(&self, function: &str) -> Result<BreakpointSetResult> {
        let args = vec![("t", "call".to_string()), ("m", function.to_string())];
        let resp = Self::check(self.conn.request("breakpoint_set", args, None).await?)?;
        let result = parse::parse_breakpoint_set(&resp);
        self.breakpoints.write().unwrap().insert(
            result.id.clone(),
            Breakpoint {
                id: result.id.clone(),
                kind: BreakpointType::Call,
                state: BreakpointState::Enabled,
                resolved: result.resolved,
                filename: None,
                lineno: None,
                function: Some(function.to_string()),
                exception: None,
                expression: None,
                hit_count: None,
                hit_value: None,
                hit_condition: None,
            },
        );
        Ok(result)
    }

    pub async fn remove_breakpoint(&self, id: &str) -> Result<bool> {
        let args = vec![("d", id.to_string())];
        let resp = Self::check(self.conn.request("breakpoint_remove", args, None).await?)?;
        self.breakpoints.write().unwrap().remove(id);
        Ok(resp.success.unwrap_or(true))
    }

    pub async fn update_breakpoint(
        &self,
        id: &str,
        state: Option<BreakpointState>,
        hit_value: Option<u32>,
        hit_condition: Option<&str>,
    ) -> Result<bool> {
        let mut args = vec![("d", id.to_string())];
        if let Some(state) = state {
            args.push(("s", state.as_str().to_string()));
        }
        if let Some(h) = hit_value {
            args.push(("h", h.to_string()));
        }
        if let Some(o) = hit_condition {
            args.push(("o", o.to_string()));
        }
        let resp = Self::check(self.conn.request("breakpoint_update", args, None).await?)?;
        if let Some(state) = state {
            if let Some(bp) = self.breakpoints.write().unwrap().get_mut(id) {
                bp.state = state;
            }
        }
        Ok(resp.success.unwrap_or(true))
    }

    /// Fetch the engine's breakpoint list, replacing the local cache.
    pub async fn list_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        let resp = Self::check(self.conn.request("breakpoint_list", vec![], None).await?)?;
        let list = parse::parse_breakpoints(&resp);
        let mut cache = self.breakpoints.write().unwrap();
        cache.clear();
        for bp in &list {
            cache.insert(bp.id.clone(), bp.clone());
        }
        Ok(list)
    }

    // ---- execution ----

    async fn continuation(&self, command: &str) -> Result<StepResult> {
        let resp = Self::check(self.conn.request(command, vec![], None).await?)?;
        let status = resp.status.unwrap_or_else(|| self.status());
        Ok(StepResult {
            status,
            filename: resp.location.as_ref().map(|l| l.filename.clone()),
            lineno: resp.location.as_ref().map(|l| l.lineno),
        })
    }

    pub async fn run(&self) -> Result<StepResult> {
        self.continuation("run").await
    }

    pub async fn step_into(&self) -> Result<StepResult> {
        self.continuation("step_into").await
    }

    pub async fn step_over(&self) -> Result<StepResult> {
        self.continuation("step_over").await
    }

    pub async fn step_out(&self) -> Result<StepResult> {
        self.continuation("step_out").await
    }

    pub async fn stop(&self) -> Result<StepResult> {
        self.continuation("stop").await
    }

    pub async fn detach(&self) -> Result<StepResult> {
        self.continuation("detach").await
    }

    // ---- inspection ----

    pub async fn stack_depth(&self) -> Result<u32> {
        let resp = Self::check(self.conn.request("stack_depth", vec![], None).await?)?;
        Ok(resp.root.attr_u32("depth").unwrap_or(0))
    }

    pub async fn stack_get(&self, depth: Option<u32>) -> Result<Vec<StackFrame>> {
        let mut args = vec![];
        if let Some(d) = depth {
            args.push(("d", d.to_string()));
        }
        let resp = Self::check(self.conn.request("stack_get", args, None).await?)?;
        Ok(parse::parse_stack_frames(&resp))
    }

    pub async fn context_names(&self, depth: Option<u32>) -> Result<Vec<Context>> {
        let mut args = vec![];
        if let Some(d) = depth {
            args.push(("d", d.to_string()));
        }
        let resp = Self::check(self.conn.request("context_names", args, None).await?)?;
        Ok(parse::parse_contexts(&resp))
    }

    pub async fn context_get(&self, depth: u32, context: u32) -> Result<Vec<Property>> {
        let args = vec![("d", depth.to_string()), ("c", context.to_string())];
        let resp = Self::check(self.conn.request("context_get", args, None).await?)?;
        Ok(parse::parse_properties(&resp))
    }

    pub async fn property_get(
        &self,
        name: &str,
        depth: u32,
        context: u32,
        max_data: Option<u32>,
        page: Option<u32>,
    ) -> Result<Property> {
        let mut args = vec![
            ("n", name.to_string()),
            ("d", depth.to_string()),
            ("c", context.to_string()),
        ];
        if let Some(m) = max_data {
            args.push(("m", m.to_string()));
        }
        if let Some(p) = page {
            args.push(("p", p.to_string()));
        }
        let resp = Self::check(self.conn.request("property_get", args, None).await?)?;
        parse::parse_properties(&resp)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Protocol(format!("engine returned no property for '{}'", name)))
    }

    pub async fn property_set(
        &self,
        name: &str,
        depth: u32,
        context: u32,
        value: &str,
    ) -> Result<bool> {
        let args = vec![
            ("n", name.to_string()),
            ("d", depth.to_string()),
            ("c", context.to_string()),
        ];
        let resp = Self::check(
            self.conn
                .request("property_set", args, Some(value.as_bytes().to_vec()))
                .await?,
        )?;
        Ok(resp.success.unwrap_or(false))
    }

    /// Evaluate an expression at the given stack depth. Engine failures
    /// surface as [`Error::Eval`] rather than a generic engine error.
    pub async fn eval(&self, expression: &str, depth: Option<u32>) -> Result<Property> {
        let mut args = vec![];
        if let Some(d) = depth {
            args.push(("d", d.to_string()));
        }
        let resp = self
            .conn
            .request("eval", args, Some(expression.as_bytes().to_vec()))
            .await?;
        if let Some(err) = resp.error {
            return Err(Error::Eval(if err.message.is_empty() {
                engine_error_name(err.code).to_string()
            } else {
                err.message
            }));
        }
        parse::parse_properties(&resp)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Eval("engine returned no result".to_string()))
    }

    pub async fn source(&self, filename: &str, begin: Option<u32>, end: Option<u32>) -> Result<String> {
        let mut args = vec![("f", file_uri(filename))];
        if let Some(b) = begin {
            args.push(("b", b.to_string()));
        }
        if let Some(e) = end {
            args.push(("e", e.to_string()));
        }
        let resp = Self::check(self.conn.request("source", args, None).await?)?;
        Ok(resp.root.decoded_text())
    }

    // ---- stream redirection ----

    pub async fn redirect_stdout(&self, mode: u32) -> Result<bool> {
        let resp = Self::check(
            self.conn
                .request("stdout", vec![("c", mode.to_string())], None)
                .await?,
        )?;
        Ok(resp.success.unwrap_or(false))
    }

    pub async fn redirect_stderr(&self, mode: u32) -> Result<bool> {
        let resp = Self::check(
            self.conn
                .request("stderr", vec![("c", mode.to_string())], None)
                .await?,
        )?;
        Ok(resp.success.unwrap_or(false))
    }

    // ---- lifecycle / state ----

    /// Fold a response's status and location into the session state.
    /// Returns true when anything changed.
    pub(crate) fn apply_response(&self, resp: &Response) -> bool {
        let mut state = self.state.write().unwrap();
        let mut changed = false;
        if let Some(status) = resp.status {
            if state.status != status {
                state.status = status;
                changed = true;
            }
        }
        if let Some(loc) = &resp.location {
            if state.current_file.as_deref() != Some(loc.filename.as_str())
                || state.current_line != Some(loc.lineno)
            {
                state.current_file = Some(loc.filename.clone());
                state.current_line = Some(loc.lineno);
                changed = true;
            }
        }
        changed
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.write().unwrap().status = SessionStatus::Stopped;
    }

    /// Close the underlying connection; removal from the manager happens
    /// through the connection's close event.
    pub fn close(&self) {
        self.conn.close();
    }
}
