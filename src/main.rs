// ABOUTME: CLI entry point: file runner and REPL

use clap::Parser;
use lea::builtins;
use lea::config::{FsConfig, VERSION, WELCOME_FOOTER, WELCOME_MESSAGE, WELCOME_SUBTITLE};
use lea::eval::Evaluator;
use lea::sandbox::Sandbox;
use lea::value::Value;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

/// Lea: a pipe-oriented scripting language
#[derive(Parser, Debug)]
#[command(name = "lea")]
#[command(version = VERSION)]
#[command(about = "A pipe-oriented, mostly-functional scripting language")]
struct CliArgs {
    /// Script file to execute (starts a REPL when omitted)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Add an allowed filesystem path (can be repeated)
    #[arg(long = "fs-sandbox", value_name = "PATH", action = clap::ArgAction::Append)]
    fs_paths: Vec<PathBuf>,

    /// Maximum file size in bytes for the fs built-ins
    #[arg(long = "max-file-size", value_name = "BYTES", default_value = "10485760")]
    max_file_size: usize,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()?;

    let fs_config = if args.fs_paths.is_empty() {
        FsConfig {
            max_file_size: args.max_file_size,
            ..FsConfig::default()
        }
    } else {
        FsConfig {
            allowed_paths: args.fs_paths.clone(),
            max_file_size: args.max_file_size,
        }
    };

    let mut ev = Evaluator::new();
    ev.sandbox = Some(Sandbox::new(&fs_config)?);

    match args.script {
        Some(path) => run_script(&path, &mut ev),
        None => repl(&mut ev),
    }
}

fn run_script(path: &PathBuf, ev: &mut Evaluator) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    match eval_source(&source, ev) {
        Ok(_) => Ok(()),
        Err(diags) => {
            for diag in &diags {
                eprintln!("{}", diag);
            }
            std::process::exit(1);
        }
    }
}

fn repl(ev: &mut Evaluator) -> Result<(), Box<dyn std::error::Error>> {
    println!("{} v{}", WELCOME_MESSAGE, VERSION);
    println!("{}", WELCOME_SUBTITLE);
    println!("{}", WELCOME_FOOTER);

    let mut rl = DefaultEditor::new()?;
    let history_file = ".lea_history";
    let _ = rl.load_history(history_file);

    loop {
        match rl.readline("lea> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                match trimmed {
                    ":quit" | ":exit" => break,
                    ":builtins" => {
                        for def in builtins::all() {
                            println!("  {:<14} ({})  {}", def.name, def.arity.describe(), def.doc);
                        }
                        continue;
                    }
                    _ => {}
                }
                match eval_source(&line, ev) {
                    Ok(Value::Null) => {}
                    Ok(value) => println!("{}", value),
                    Err(diags) => {
                        for diag in &diags {
                            eprintln!("{}", diag);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    Ok(())
}

/// Run one source text against the persistent evaluator so REPL bindings,
/// contexts, and scheduler state survive across inputs.
fn eval_source(source: &str, ev: &mut Evaluator) -> Result<Value, Vec<lea::Diagnostic>> {
    let (tokens, mut diags) = lea::lex(source);
    let (program, parse_diags) = lea::parse(tokens);
    diags.extend(parse_diags);
    if !diags.is_empty() {
        return Err(diags);
    }
    ev.eval_program(&program)
        .map_err(|error| vec![error.into_diagnostic((1, 1))])
}
