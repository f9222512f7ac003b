//! Config subcommand handlers.

use std::path::PathBuf;

use netlab_config::{Config, config_path, load_config, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

fn target_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

fn show(global: &GlobalOpts) -> Result<String, CliError> {
    let cfg = load_config(global.config.as_deref())?;
    // Surface invalid values here rather than at the next `plan`.
    cfg.to_hub_config()?;

    if matches!(global.output, OutputFormat::Table) {
        return toml::to_string_pretty(&cfg).map_err(|e| CliError::Serialize {
            message: e.to_string(),
        });
    }
    output::render_single(
        &global.output,
        &cfg,
        |_| String::new(),
        |c| c.hub.router_tag.clone(),
    )
}

fn init(global: &GlobalOpts, force: bool) -> Result<String, CliError> {
    let path = target_path(global);
    if path.exists() && !force {
        return Err(CliError::ConfigExists { path });
    }
    let written = save_config(&Config::default(), Some(&path))?;
    Ok(format!("Wrote default config to {}", written.display()))
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let rendered = match args.command {
        ConfigCommand::Show => show(global)?,
        ConfigCommand::Path => target_path(global).display().to_string(),
        ConfigCommand::Init { force } => init(global, force)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
