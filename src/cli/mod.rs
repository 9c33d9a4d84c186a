//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for PDR Ingest using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// PDR Ingest - Patient Data Receipt ingestion
#[derive(Parser, Debug)]
#[command(name = "pdr")]
#[command(version, about, long_about = None)]
#[command(author = "Open Health Manager Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pdr.toml", env = "PDR_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PDR_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest one PDR message Bundle and print the response envelope
    Process(commands::process::ProcessArgs),

    /// Validate a PDR message Bundle without writing anything
    Check(commands::check::CheckArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_process() {
        let cli = Cli::parse_from(["pdr", "process", "submission.json"]);
        assert_eq!(cli.config, "pdr.toml");
        match cli.command {
            Commands::Process(args) => {
                assert_eq!(args.bundle, "submission.json");
                assert!(args.preload.is_empty());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["pdr", "--config", "custom.toml", "check", "b.json"]);
        assert_eq!(cli.config, "custom.toml");
        assert!(matches!(cli.command, Commands::Check(_)));
    }

    #[test]
    fn test_cli_parse_with_log_level() {
        let cli = Cli::parse_from(["pdr", "--log-level", "debug", "validate-config"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_parse_process_preload() {
        let cli = Cli::parse_from([
            "pdr",
            "process",
            "--preload",
            "patient.json",
            "--preload",
            "history.json",
            "--server-base",
            "https://hm.example.org/fhir",
            "-",
        ]);
        let Commands::Process(args) = cli.command else {
            panic!("expected process");
        };
        assert_eq!(args.bundle, "-");
        assert_eq!(args.preload, vec!["patient.json", "history.json"]);
        assert_eq!(args.server_base, "https://hm.example.org/fhir");
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["pdr", "init", "--force"]);
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert!(args.force);
        assert_eq!(args.output, "pdr.toml");
    }
}
