//! `ci`: run one named command from a TOML build script.

use std::path::PathBuf;

use anyhow::Result;
use ci_runner::io::config::ColorMode;
use ci_runner::script::load_script;
use ci_runner::dispatch::prepare_process;
use ci_runner::{DispatchResult, exit_codes};
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "ci",
    version,
    about = "Run a named CI command declared in a build script"
)]
struct Cli {
    /// Name of the command to run.
    command: Option<String>,

    /// Build script declaring the commands.
    #[arg(long, default_value = "ci.toml")]
    script: PathBuf,

    /// Root directory for durable build logs (overrides `settings.log_dir`).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Console colors (overrides `settings.color`).
    #[arg(long, value_enum)]
    color: Option<ColorMode>,

    /// Print the names of all commands and exit.
    #[arg(long)]
    list: bool,
}

fn main() {
    prepare_process();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::UNEXPECTED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut script = load_script(&cli.script)?;
    if let Some(dir) = cli.log_dir {
        script.settings.log_dir = Some(dir);
    }
    if let Some(color) = cli.color {
        script.settings.color = color;
    }
    let pipeline = script.into_pipeline();

    if cli.list {
        for name in pipeline.names() {
            println!("{name}");
        }
        return Ok(exit_codes::OK);
    }

    let available = pipeline.names().collect::<Vec<_>>().join(", ");
    let Some(name) = cli.command else {
        eprintln!("No command given. Available commands: {available}");
        return Ok(exit_codes::UNKNOWN_COMMAND);
    };
    match pipeline.dispatch(Some(&name)) {
        DispatchResult::NoMatch => {
            eprintln!("Unknown command '{name}'. Available commands: {available}");
            Ok(exit_codes::UNKNOWN_COMMAND)
        }
        DispatchResult::Completed { exit_code, .. } => Ok(exit_code),
    }
}
