//! Interactive shell for leafdb.
//!
//! Reads one statement per line, executes it against the backing file,
//! and prints SELECT results as comma-separated rows.

use clap::Parser;
use leafdb::engine::{Database, StatementOutput};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leafdb", about = "Single-file SQL database shell")]
struct Args {
    /// Path of the backing database file.
    #[arg(long, default_value = "data")]
    file: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match repl(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn repl(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = Database::open(&args.file)?;
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match db.run_statement(&line) {
                    Ok(StatementOutput::Rows(rows)) => print_rows(&rows),
                    Ok(StatementOutput::Complete) => {}
                    Err(err) => eprintln!("{}", err),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // cancel the current input line without leaving the shell
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn print_rows(rows: &[Vec<String>]) {
    for row in rows {
        println!("{}", row.join(", "));
    }
    if !rows.is_empty() {
        println!();
    }
}
