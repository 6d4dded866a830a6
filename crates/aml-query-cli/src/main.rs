use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;

use aml_query_cli::{
    cli::{Cli, Commands},
    commands::{self, compile::CompileArgs},
    config::AmlqConfig,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        // Config commands report their own load errors
        Commands::Config(cmd) => {
            init_logging(cli.level_filter(None));
            commands::config::execute(cli.config.clone(), cmd.clone())
        }
        Commands::Compile {
            file,
            mode,
            permission_mode,
            identities,
            user,
            format,
        } => {
            let config = AmlqConfig::load(cli.config.clone())?;
            init_logging(cli.level_filter(config.logging.level.as_deref()));
            debug!("Configuration loaded");

            commands::compile::execute(
                config,
                CompileArgs {
                    file: file.clone(),
                    mode: *mode,
                    permission_mode: *permission_mode,
                    identities: identities.clone(),
                    user: user.clone(),
                    format: *format,
                },
            )
        }
    }
}

/// Log to stderr so stdout carries only SQL
fn init_logging(level: LevelFilter) {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
