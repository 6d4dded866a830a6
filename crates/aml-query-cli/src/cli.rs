use aml_query::{OutputMode, PermissionMode};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (every criterion)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "amlq")]
#[command(about = "amlq - compile AML item queries into SQL")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace)
    /// If not specified, uses config file value or defaults to 'warn'
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose logging (shortcut for --log-level=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (defaults to $AMLQ_CONFIG, then ./amlq.toml)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Effective log level: flags first, then the config file value
    pub fn level_filter(&self, configured: Option<&str>) -> LevelFilter {
        if self.verbose {
            return LevelFilter::DEBUG;
        }
        if let Some(level) = self.log_level {
            return level.into();
        }
        configured
            .and_then(|l| LogLevel::from_str(l, true).ok())
            .map(LevelFilter::from)
            .unwrap_or(LevelFilter::WARN)
    }
}

/// Output format of the compile command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Bare SQL text
    #[default]
    Sql,
    /// JSON object with the SQL and the mode that produced it
    Json,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Compile an AML document into SQL
    Compile {
        /// AML file to compile ('-' or omitted reads stdin)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Output mode: full, count, offset_within_results, or a clause
        /// list such as "select,from,where"
        #[arg(short, long)]
        mode: Option<OutputMode>,

        /// Permission mode (none, secured, legacy)
        #[arg(short, long)]
        permission_mode: Option<PermissionMode>,

        /// Identity list passed to the permission checks
        #[arg(long)]
        identities: Option<String>,

        /// User id passed to the permission checks
        #[arg(long)]
        user: Option<String>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Sql)]
        format: OutputFormat,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Output format (toml, json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Print the default configuration
    Dump,
}
