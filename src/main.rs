use clap::Parser;
use log::{info, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "wasmcheck", version, about = "Validate WebAssembly binary modules")]
struct Args {
    /// Modules to validate
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// More logging; repeat for instruction-level tracing
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report through the exit status
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print a JSON summary of each valid module
    #[arg(long)]
    tree: bool,
}

fn init_logging(args: &Args) {
    let level = match (args.quiet, args.verbose) {
        (true, _) => LevelFilter::Off,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn check(path: &Path, args: &Args) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("couldn't read: {e}"))?;
    let tree = wasmcheck::validate_tree(&bytes).map_err(|e| match e.validation() {
        Some(v) => format!("{} ({})", v, v.cause()),
        None => e.to_string(),
    })?;
    info!(
        "{}: {} functions, {} globals",
        path.display(),
        tree.functions.len(),
        tree.globals.len()
    );
    if args.tree {
        let json = serde_json::to_string_pretty(&tree.summary()).map_err(|e| e.to_string())?;
        println!("{json}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let mut failed = false;
    for path in &args.files {
        match check(path, &args) {
            Ok(()) => {
                if !args.quiet && !args.tree {
                    println!("{}: valid", path.display());
                }
            }
            Err(message) => {
                failed = true;
                if !args.quiet {
                    eprintln!("{}: invalid: {message}", path.display());
                }
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
