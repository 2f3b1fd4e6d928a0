//! Command-line interface for jd-decoder.

mod config;
mod decode;
mod serve;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "jd-decoder",
    version,
    about = "Decode job descriptions into must-haves, nice-to-haves, keywords and insights"
)]
pub(crate) struct Cli {
    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        env = "JD_DECODER_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Output format for `jd-decoder decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Listen port (overrides config)
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Decode one job description from a file or stdin
    Decode {
        /// Input file; reads stdin when omitted or `-`
        file: Option<PathBuf>,
        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Print the effective configuration
    Config,
}

/// Install the global tracing subscriber. Logs go to stderr so `decode`
/// output on stdout stays machine-readable.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

/// Parse arguments and dispatch.
pub(crate) async fn run() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Serve { bind, port } => serve::cmd_serve(bind, port).await,
        Commands::Decode {
            file,
            api_key,
            format,
        } => decode::cmd_decode(file, api_key, format).await,
        Commands::Config => config::cmd_config(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_overrides() {
        let cli = Cli::try_parse_from(["jd-decoder", "serve", "--bind", "127.0.0.1", "-p", "9000"])
            .unwrap();
        match cli.command {
            Commands::Serve { bind, port } => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_decode_with_text_format() {
        let cli = Cli::try_parse_from([
            "jd-decoder",
            "--log-format",
            "json",
            "decode",
            "jd.txt",
            "--api-key",
            "k",
            "--format",
            "text",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Decode {
                file,
                api_key,
                format,
            } => {
                assert_eq!(file, Some(PathBuf::from("jd.txt")));
                assert_eq!(api_key.as_deref(), Some("k"));
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
