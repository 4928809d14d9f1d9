//! CLI argument parsing for the daemon binary (A3 ambient stack).

use clap::Parser;
use std::path::PathBuf;

/// canlogger - multi-channel CAN bus data logger
#[derive(Parser, Debug)]
#[command(name = "canlogger")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Root directory standing in for the SD card mount point.
    #[arg(long, default_value = "./canlogger-data")]
    pub storage_root: PathBuf,

    /// Path to the versioned binary configuration blob.
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Address the REST control plane binds to.
    #[arg(long, default_value = "0.0.0.0:80")]
    pub bind_addr: String,

    /// Directory of static web UI assets served at `/`.
    #[arg(long)]
    pub assets_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Cap reported storage capacity in bytes (testing / simulation only).
    #[arg(long)]
    pub virtual_capacity_bytes: Option<u64>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_parse_from_bare_invocation() {
        let cli = Cli::parse_from(["canlogger"]);
        assert_eq!(cli.bind_addr, "0.0.0.0:80");
        assert_eq!(cli.log_level, "info");
        assert!(cli.config_path.is_none());
    }
}
