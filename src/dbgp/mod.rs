mod connection;
mod framing;
mod parse;
mod session;
mod types;
mod xml;

pub use connection::{Connection, ConnectionEvent};
pub use framing::{encode_command, quote_arg, FrameDecoder, FrameEvent};
pub use parse::{
    parse_breakpoint_set, parse_breakpoints, parse_contexts, parse_init, parse_properties,
    parse_response, parse_stack_frames, parse_stream,
};
pub use session::{Session, SessionState};
pub use types::*;
pub use xml::{parse_document, Element};
