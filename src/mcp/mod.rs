mod protocol;
mod proxy;
mod types;

pub use protocol::*;
pub use proxy::stdio_proxy;
pub use types::*;
