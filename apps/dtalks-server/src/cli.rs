//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dtalks-server",
    about = "Dtalks internal chatbot server",
    version,
    long_about = "Chat socket client, conversation pipeline and analytics API \
                  for the Dtalks internal assistant."
)]
pub struct Args {
    /// Path to configuration file (optional; environment variables override it)
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config/default")]
    pub config: PathBuf,

    /// HTTP server port, overrides the configured one
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    pub fn config_path(&self) -> String {
        self.config.to_string_lossy().into_owned()
    }
}
