//! runtests CLI - build a Python package, install it in isolation, run its tests.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use runtests::config::{self, CONFIG_FILE, Config};
use runtests::fanout::SystemProbe;
use runtests::invocation::{InvocationSpec, RunArgs};
use runtests::orchestrator::Orchestrator;
use runtests::process::LocalRunner;

#[derive(Parser)]
#[command(name = "runtests")]
#[command(about = "Build, install in isolation and test a Python package", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: <root>/runtests.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    run: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to determine the current directory")?;
    let config = load_project_config(cli.config.as_deref(), &cli.run, &cwd)?;

    let spec = InvocationSpec::resolve(&cli.run, &config, &cwd)?;
    info!("Testing {} from {}", spec.package, spec.root.display());

    let runner = LocalRunner::new();
    let probe = SystemProbe::new(&runner);
    let result = Orchestrator::new(&runner, &probe).run(&spec).await?;

    Ok(result.exit_code)
}

fn load_project_config(explicit: Option<&Path>, args: &RunArgs, cwd: &Path) -> Result<Config> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        return Ok(config);
    }

    let root = match &args.root {
        Some(root) => cwd.join(config::expand_path(root)),
        None => cwd.to_path_buf(),
    };
    config::load_config_or_default(&root.join(CONFIG_FILE))
}
