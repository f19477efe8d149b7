//! Process entrypoint flags (§ Configuration: env > project `.env` > XDG `config.toml`, then CLI).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Multi-channel AI bot gateway: channel adapters, tool-worker sessions, MCP federation")]
pub struct Args {
    /// Address the HTTP surface listens on.
    #[arg(long, env = "GATEWAY_BIND_ADDR", default_value = "0.0.0.0:8089")]
    pub bind: String,

    /// Bearer token the `Authorizer` accepts; a process with no configured token rejects every
    /// call (fail closed).
    #[arg(long, env = "GATEWAY_BEARER_TOKEN")]
    pub bearer_token: Option<String>,

    /// Directory to look for a project `.env` in, instead of the current directory.
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Emit newline-delimited JSON logs instead of the human-readable formatter.
    #[arg(long, env = "GATEWAY_LOG_JSON")]
    pub log_json: bool,

    /// Also write daily-rotating log files under this directory, in addition to stderr.
    #[arg(long, value_name = "DIR", env = "GATEWAY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}
