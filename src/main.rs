mod logging;
mod render;

use anklang_engine::config::EngineOptions;
use anklang_engine::plugins::clap::ClapPluginRegistry;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "anklang", version, about = "Anklang audio engine front end")]
struct Cli {
    /// Raise the log level, repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List CLAP plugins found on the search path.
    Plugins {
        #[arg(long)]
        json: bool,
        /// Engine configuration file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Render a demo clip through an audio chain.
    Render(render::RenderArgs),
}

fn load_options(config: Option<&PathBuf>) -> Result<EngineOptions, String> {
    match config {
        Some(path) => EngineOptions::load(path),
        None => Ok(EngineOptions::from_env()),
    }
}

fn list_plugins(config: Option<&PathBuf>, json: bool) -> Result<(), String> {
    let options = load_options(config)?;
    let registry = ClapPluginRegistry::from_options(&options);
    let descriptors = registry.descriptors();
    if json {
        let list: Vec<_> = descriptors.iter().map(|d| d.as_ref()).collect();
        let text = serde_json::to_string_pretty(&list).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }
    for d in descriptors {
        println!("{:<40} {} {} ({})", d.id, d.name, d.version, d.vendor);
        println!("    {}", d.path.display());
    }
    if descriptors.is_empty() {
        println!("No CLAP plugins found");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let result = match &cli.command {
        Command::Plugins { json, config } => list_plugins(config.as_ref(), *json),
        Command::Render(args) => {
            load_options(args.config.as_ref()).and_then(|options| render::run(options, args))
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("anklang: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_render() {
        let cli = Cli::parse_from(["anklang", "-vv", "render", "--blocks", "8", "--plugin", "x"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Render(args) => {
                assert_eq!(args.blocks, 8);
                assert_eq!(args.plugin.as_deref(), Some("x"));
                assert_eq!(args.gui, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
