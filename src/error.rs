use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("TIMEOUT: No response from engine within {0} ms.")]
    Timeout(u64),

    #[error("CONNECTION_CLOSED: Engine connection is closed.")]
    ConnectionClosed,

    #[error("SESSION_NOT_FOUND: No session found with ID '{0}'.")]
    SessionNotFound(String),

    #[error("NO_ACTIVE_SESSION: No debug session is connected. Start the script with debugging enabled and wait for the engine to attach.")]
    NoActiveSession,

    #[error("ENGINE_ERROR: '{command}' failed with code {code}: {message}")]
    Engine {
        command: String,
        code: u32,
        message: String,
    },

    #[error("EVAL_FAILED: {0}")]
    Eval(String),

    #[error("BREAKPOINT_NOT_FOUND: No breakpoint with ID '{0}'.")]
    BreakpointNotFound(String),

    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    #[error("PROTOCOL: {0}")]
    Protocol(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
