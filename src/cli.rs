//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OAI-PMH proxy with set intersection and metadata format conversion
#[derive(Parser, Debug)]
#[command(name = "oai-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OAI_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "OAI_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "OAI_PROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "OAI_PROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OAI_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Fetch one record through the proxy and print its metadata
    Record {
        /// Metadata prefix, native or served through a pipeline
        #[arg(required = true)]
        format: String,

        /// OAI identifier of the record
        #[arg(required = true)]
        identifier: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_server_mode() {
        let cli = Cli::parse_from(["oai-proxy", "--port", "9000"]);
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level, "info");
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_record_subcommand() {
        let cli = Cli::parse_from([
            "oai-proxy",
            "record",
            "dc",
            "oai:example.org:1",
            "--config",
            "proxy.yaml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("proxy.yaml")));
        match cli.command {
            Some(Command::Record { format, identifier }) => {
                assert_eq!(format, "dc");
                assert_eq!(identifier, "oai:example.org:1");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
