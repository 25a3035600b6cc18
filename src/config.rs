use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Grading sidecar: answers newline-delimited JSON requests on stdin.
#[derive(Debug, Clone, Parser)]
#[command(name = "gradebookd", version)]
pub struct Config {
    /// Workspace directory to open on startup
    #[arg(long, env = "GRADEBOOKD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Seconds a fetched score table stays cached (0 disables the cache)
    #[arg(long, env = "GRADEBOOKD_CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Log output format on stderr
    #[arg(long, env = "GRADEBOOKD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
