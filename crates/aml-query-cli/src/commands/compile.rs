use aml_query::{compile_aml, OutputMode, PermissionMode};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::config::AmlqConfig;

/// Flags of the compile command that override the config file
#[derive(Debug, Clone, Default)]
pub struct CompileArgs {
    pub file: Option<PathBuf>,
    pub mode: Option<OutputMode>,
    pub permission_mode: Option<PermissionMode>,
    pub identities: Option<String>,
    pub user: Option<String>,
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct CompileOutput<'a> {
    mode: String,
    permission_mode: String,
    sql: &'a str,
}

/// Execute the compile command
pub fn execute(config: AmlqConfig, args: CompileArgs) -> Result<()> {
    let input = read_input(args.file.as_deref())?;
    let output = compile_to_string(config, &args, &input)?;
    println!("{}", output);
    Ok(())
}

/// Compile `input` and format the result per `args.format`
pub fn compile_to_string(config: AmlqConfig, args: &CompileArgs, input: &str) -> Result<String> {
    let mut settings = config.compile;
    if let Some(mode) = args.mode {
        settings.output_mode = mode;
    }
    if let Some(mode) = args.permission_mode {
        settings.permission_mode = mode;
    }
    if let Some(identities) = &args.identities {
        settings.identity_list = identities.clone();
    }
    if let Some(user) = &args.user {
        settings.user_id = user.clone();
    }

    let mode = settings.output_mode;
    let permission_mode = settings.permission_mode;
    debug!(%mode, %permission_mode, "Compiling AML document");

    let compiler = compile_aml(input, settings, Arc::new(config.metadata))
        .context("Failed to compile AML")?;
    let sql = compiler.render().context("Failed to render SQL")?;
    info!(bytes = sql.len(), "Rendered SQL");

    match args.format {
        OutputFormat::Sql => Ok(sql),
        OutputFormat::Json => serde_json::to_string_pretty(&CompileOutput {
            mode: mode.to_string(),
            permission_mode: permission_mode.to_string(),
            sql: &sql,
        })
        .context("Failed to serialize output as JSON"),
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read AML file: {}", path.display())),
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read AML from stdin")?;
            Ok(input)
        }
    }
}
