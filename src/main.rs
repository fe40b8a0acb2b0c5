//! FlowQuery command line: an interactive shell by default, or one-shot
//! statement execution with `-c`.

use anyhow::Context;
use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use flowquery::config::Config;
use flowquery::repl::{format_results, Repl};

#[derive(ClapParser, Debug)]
#[command(name = "flowquery", about = "FlowQuery graph query shell", version)]
struct Args {
    /// Execute one statement and exit instead of starting the shell
    #[arg(short = 'c', long = "command")]
    command: Option<String>,

    /// Configuration file (defaults to flowquery.toml discovery)
    #[arg(long = "config")]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path).context("loading configuration")?,
        None => Config::load().unwrap_or_default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let repl = Repl::new(config);
    match args.command {
        Some(statement) => {
            let statement = statement.trim().trim_end_matches(';');
            let rows = repl.execute(statement)?;
            println!("{}", format_results(&rows));
            Ok(())
        }
        None => repl.run_loop(),
    }
}
