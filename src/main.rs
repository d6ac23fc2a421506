use dbgp_mcp::daemon::Daemon;
use dbgp_mcp::{config, mcp, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP transport in proxy mode, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::resolve().log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("daemon") => Daemon::run().await,
        Some("mcp") | None => mcp::stdio_proxy().await,
        _ => {
            eprintln!("Usage: dbgp-mcp <daemon|mcp>");
            std::process::exit(1);
        }
    }
}
