use std::collections::HashMap;
use std::io::Read as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tsqlflow_core::{dry_run, parse, sandbox_run, Bindings};

#[derive(Parser)]
#[command(name = "tsqlflow", version, about = "Builds and drives control flow graphs for T-SQL stored procedures")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a procedure body into a control flow graph.
    Parse {
        #[command(flatten)]
        input: Input,
        /// Print the graph as pretty-printed JSON instead of one compact line.
        #[arg(long)]
        pretty: bool,
    },
    /// Simulate a procedure without touching a database.
    DryRun {
        #[command(flatten)]
        input: Input,
        /// Bind a parameter as NAME=VALUE; repeatable. Omit VALUE for NULL.
        #[arg(long = "bind", value_name = "NAME=VALUE")]
        binds: Vec<String>,
        #[arg(long)]
        pretty: bool,
    },
    /// Run a procedure's statements against a throwaway in-memory SQLite database.
    Sandbox {
        #[command(flatten)]
        input: Input,
        #[arg(long = "bind", value_name = "NAME=VALUE")]
        binds: Vec<String>,
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(clap::Args)]
struct Input {
    /// Path to the procedure source; reads stdin when omitted.
    file: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Parse { input, pretty } => run_parse(&input, pretty),
        Command::DryRun { input, binds, pretty } => run_dry_run(&input, &binds, pretty),
        Command::Sandbox { input, binds, pretty } => run_sandbox(&input, &binds, pretty),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_parse(input: &Input, pretty: bool) -> Result<(), String> {
    let source = read_source(input)?;
    let graph = parse(&source).map_err(|e| e.to_string())?;
    print_json(&graph, pretty)
}

fn run_dry_run(input: &Input, binds: &[String], pretty: bool) -> Result<(), String> {
    let source = read_source(input)?;
    let graph = parse(&source).map_err(|e| e.to_string())?;
    let bindings = parse_bindings(binds)?;
    let result = dry_run(&graph, &bindings);
    print_json(&result, pretty)
}

fn run_sandbox(input: &Input, binds: &[String], pretty: bool) -> Result<(), String> {
    let source = read_source(input)?;
    let graph = parse(&source).map_err(|e| e.to_string())?;
    let bindings = parse_bindings(binds)?;
    let result = sandbox_run(&graph, &source, &bindings);
    print_json(&result, pretty)
}

fn read_source(input: &Input) -> Result<String, String> {
    match &input.file {
        Some(path) => std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("reading stdin: {e}"))?;
            Ok(buf)
        }
    }
}

/// Parses `NAME=VALUE` binds into [`Bindings`]. `NAME` alone (no `=`) binds
/// the parameter to SQL `NULL`.
fn parse_bindings(binds: &[String]) -> Result<Bindings, String> {
    let mut bindings = HashMap::new();
    for bind in binds {
        match bind.split_once('=') {
            Some((name, value)) => {
                bindings.insert(name.to_string(), Some(value.to_string()));
            }
            None => {
                bindings.insert(bind.clone(), None);
            }
        }
    }
    Ok(bindings)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| format!("serialising result: {e}"))?;
    println!("{text}");
    Ok(())
}
