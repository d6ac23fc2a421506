use crate::dbgp::xml::Element;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine run state, as reported on command responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Break,
    Running,
    Stopping,
    Stopped,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "break" => Some(Self::Break),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Break => "break",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First frame the engine sends on a new connection. Immutable once received.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Init {
    pub app_id: String,
    pub ide_key: String,
    pub session: String,
    pub thread: String,
    pub language: String,
    pub protocol_version: String,
    pub file_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
}

/// `error` element carried inside a response. Code 0 never reaches callers.
#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: u32,
    pub message: String,
}

/// Post-step location reported via `xdebug:message` (or plain `message`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub filename: String,
    pub lineno: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// A reply to a command. The raw element stays attached so per-command
/// decoders can pull their payload out of it.
#[derive(Debug, Clone)]
pub struct Response {
    pub command: String,
    pub transaction_id: Option<u32>,
    pub status: Option<SessionStatus>,
    pub reason: Option<String>,
    pub success: Option<bool>,
    pub error: Option<EngineError>,
    pub location: Option<SourceLocation>,
    pub root: Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Engine-initiated stdout/stderr content. Carries no transaction id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// 0 is the innermost frame.
    pub level: u32,
    #[serde(rename = "type")]
    pub frame_type: String,
    pub filename: String,
    pub lineno: u32,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdbegin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdend: Option<String>,
}

/// Variable scope advertised by the engine (0 = locals by convention).
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub id: u32,
    pub name: String,
}

/// One variable or value; a tree bounded by the negotiated
/// `max_depth` / `max_children` / `max_data` limits.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    pub fullname: String,
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet: Option<String>,
    pub constant: bool,
    pub has_children: bool,
    pub num_children: u32,
    pub size: u32,
    pub page: u32,
    pub pagesize: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<Property>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointType {
    Line,
    Call,
    Return,
    Exception,
    Conditional,
    Watch,
}

impl BreakpointType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(Self::Line),
            "call" => Some(Self::Call),
            "return" => Some(Self::Return),
            "exception" => Some(Self::Exception),
            "conditional" => Some(Self::Conditional),
            "watch" => Some(Self::Watch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Call => "call",
            Self::Return => "return",
            Self::Exception => "exception",
            Self::Conditional => "conditional",
            Self::Watch => "watch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointState {
    Enabled,
    Disabled,
}

impl BreakpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

/// An engine-side breakpoint as reported by `breakpoint_list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BreakpointType,
    pub state: BreakpointState,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointSetResult {
    pub id: String,
    pub resolved: bool,
}

/// Outcome of a continuation command (`run`, `step_*`, `stop`, `detach`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
}

/// Prefix a bare path with `file://`; URIs pass through untouched.
pub fn file_uri(path: &str) -> String {
    if path.starts_with("file://") {
        path.to_string()
    } else {
        format!("file://{}", path)
    }
}

/// Human name for a DBGp error code, for log and tool output.
pub fn engine_error_name(code: u32) -> &'static str {
    match code {
        1 => "parse error in command",
        2 => "duplicate arguments",
        3 => "invalid options",
        4 => "unimplemented command",
        5 => "command not available",
        100 => "file not found",
        200 => "breakpoint could not be set",
        201 => "breakpoint type not supported",
        202 => "invalid breakpoint",
        203 => "no code on breakpoint line",
        204 => "invalid breakpoint state",
        205 => "no such breakpoint",
        206 => "error evaluating code",
        300 => "property does not exist",
        301 => "invalid stack depth",
        302 => "invalid context",
        900 => "encoding not supported",
        998 => "internal exception",
        999 => "unknown error",
        _ => "unrecognized error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["starting", "break", "running", "stopping", "stopped"] {
            assert_eq!(SessionStatus::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(SessionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_file_uri_normalization() {
        assert_eq!(file_uri("/srv/app/index.php"), "file:///srv/app/index.php");
        assert_eq!(file_uri("file:///srv/app/index.php"), "file:///srv/app/index.php");
    }

    #[test]
    fn test_engine_error_names() {
        assert_eq!(engine_error_name(100), "file not found");
        assert_eq!(engine_error_name(205), "no such breakpoint");
        assert_eq!(engine_error_name(12345), "unrecognized error code");
    }

    #[test]
    fn test_property_serialization_shape() {
        let prop = Property {
            name: "$s".to_string(),
            fullname: "$s".to_string(),
            property_type: "string".to_string(),
            classname: None,
            facet: None,
            constant: false,
            has_children: false,
            num_children: 0,
            size: 5,
            page: 0,
            pagesize: 0,
            address: None,
            key: None,
            value: "Hello".to_string(),
            children: Vec::new(),
        };
        let json = serde_json::to_value(&prop).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["value"], "Hello");
        assert!(json.get("children").is_none()); // empty list elided
    }
}
