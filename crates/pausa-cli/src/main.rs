//! `pausa` - run or check a script against an in-memory filesystem.

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::{Args, Parser, Subcommand};
use pausa::{Object, StderrTracer};
use pausa_sandbox::{Limits, PseudoFs, Sandbox, SandboxError};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pausa")]
#[command(about = "Run Python-subset scripts in a pausable sandbox")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script to completion and print its output and final value
    Run(RunArgs),
    /// Parse and compile a script without running it
    Check {
        script: PathBuf,
        /// Input names the script reads
        #[arg(long = "input-name")]
        input_names: Vec<String>,
        /// External function names the script may call
        #[arg(long = "function")]
        functions: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    script: PathBuf,

    /// Input variable as NAME=JSON
    #[arg(long = "input", value_parser = parse_key_value)]
    inputs: Vec<(String, String)>,

    /// Text file in the guest filesystem as PATH=CONTENT
    #[arg(long = "file", value_parser = parse_key_value)]
    files: Vec<(String, String)>,

    /// Environment variable visible to the guest as KEY=VALUE
    #[arg(long = "env", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// JSON file with resource limits, flags below override it
    #[arg(long)]
    limits: Option<PathBuf>,

    #[arg(long)]
    max_duration_secs: Option<f64>,

    #[arg(long)]
    max_memory: Option<usize>,

    #[arg(long)]
    max_allocations: Option<usize>,

    #[arg(long)]
    max_recursion_depth: Option<usize>,

    /// Print the final value as JSON instead of its repr
    #[arg(long)]
    json: bool,

    /// Trace every VM instruction to stderr
    #[arg(long)]
    trace: bool,

    /// List the guest filesystem after the run
    #[arg(long)]
    show_fs: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pausa_sandbox=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => run(&args),
        Command::Check {
            script,
            input_names,
            functions,
        } => check(&script, &input_names, functions),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &RunArgs) -> Result<(), String> {
    let code = read_script(&args.script)?;
    let script_name = args.script.display().to_string();

    let mut inputs = Vec::with_capacity(args.inputs.len());
    for (name, raw) in &args.inputs {
        let json: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| format!("error: input '{name}' is not valid JSON: {err}"))?;
        inputs.push((name.as_str(), Object::from_json_value(json)));
    }

    let mut fs = PseudoFs::new().put_envs(args.env.iter().cloned());
    for (path, content) in &args.files {
        fs = fs.put_file(path, content.as_str());
    }

    let sandbox = Sandbox::new()
        .script_name(script_name)
        .pseudo_fs(fs)
        .limits(load_limits(args)?);
    debug!(?sandbox, "sandbox configured");

    let start = Instant::now();
    let result = if args.trace {
        sandbox.run_traced(&code, inputs, &mut StderrTracer::new())
    } else {
        sandbox.run(&code, inputs)
    }
    .map_err(|err| describe(&err))?;
    info!(elapsed = ?start.elapsed(), "run finished");

    print!("{}", result.output);
    if args.json {
        println!("{}", result.value.to_json_value());
    } else if result.value != Object::None {
        println!("{}", result.value.py_repr());
    }
    if args.show_fs
        && let Some(fs) = &result.fs
    {
        for dir in fs.dirs() {
            eprintln!("{dir}/");
        }
        for (path, content) in fs.files() {
            eprintln!("{path} ({} bytes)", content.len());
        }
    }
    Ok(())
}

fn check(script: &Path, input_names: &[String], functions: Vec<String>) -> Result<(), String> {
    let code = read_script(script)?;
    let input_names: Vec<&str> = input_names.iter().map(String::as_str).collect();
    let sandbox = Sandbox::new()
        .script_name(script.display().to_string())
        .external_functions(functions);
    sandbox.compile(&code, &input_names).map_err(|err| describe(&err))?;
    eprintln!("{}: ok", script.display());
    Ok(())
}

fn load_limits(args: &RunArgs) -> Result<Limits, String> {
    let mut limits = match &args.limits {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|err| format!("error reading {}: {err}", path.display()))?;
            serde_json::from_str(&raw).map_err(|err| format!("error: invalid limits in {}: {err}", path.display()))?
        }
        None => Limits::new(),
    };
    if let Some(secs) = args.max_duration_secs {
        limits = limits.max_duration_secs(secs);
    }
    if let Some(bytes) = args.max_memory {
        limits = limits.max_memory(bytes);
    }
    if let Some(count) = args.max_allocations {
        limits = limits.max_allocations(count);
    }
    if let Some(depth) = args.max_recursion_depth {
        limits = limits.max_recursion_depth(depth);
    }
    Ok(limits)
}

fn read_script(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|err| format!("error reading {}: {err}", path.display()))
}

/// Python-style traceback for guest failures, a single line otherwise.
fn describe(err: &SandboxError) -> String {
    match err {
        SandboxError::Guest(exc) | SandboxError::Compile(exc) => exc.traceback_text(),
        SandboxError::ResourceLimit { exception, .. } => format!("{}\n{err}", exception.traceback_text()),
        _ => format!("error: {err}"),
    }
}
