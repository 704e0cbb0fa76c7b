use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use burrowdb::recovery::{self, RecoveryManager};
use burrowdb::repl::Session;
use burrowdb::transaction::{LockManager, TransactionManager};

const HISTORY_FILE: &str = ".burrowdb_history";

#[derive(Parser)]
#[command(author, version, about = "BurrowDB - a page-oriented key/value database")]
struct Cli {
    /// Database data folder
    #[arg(short, long, default_value = "data")]
    db: String,

    /// Write-ahead log file
    #[arg(short, long, default_value = "db.log")]
    log_file: String,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive shell
    Shell,

    /// Execute a single command directly
    Exec {
        /// Command line to execute
        line: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // Prime the database: restore the checkpoint snapshot when one exists.
    let db = Arc::new(recovery::prime(&cli.db).context("failed to open database")?);
    let lock_manager = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(lock_manager));
    let rm = Arc::new(RecoveryManager::new(
        Arc::clone(&db),
        Arc::clone(&tm),
        &cli.log_file,
    )?);
    // Replay the log. A recovery failure is fatal: better to stop than to
    // serve a database in an unknown state.
    if let Err(e) = rm.recover() {
        eprintln!("unable to recover the write-ahead log: {}", e);
        eprintln!("consider inspecting or clearing {}", cli.log_file);
        std::process::exit(1);
    }

    let session = Session::new(Arc::clone(&db), tm, rm);
    let mut stdout = std::io::stdout();
    match cli.command {
        Some(Commands::Exec { line }) => {
            if let Err(e) = session.execute(&line, &mut stdout) {
                eprintln!("{}", e);
            }
        }
        Some(Commands::Shell) | None => {
            run_shell(&session, &mut stdout)?;
        }
    }
    session.finish();
    db.close()?;
    Ok(())
}

fn run_shell(session: &Session, stdout: &mut dyn Write) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(HISTORY_FILE);
    loop {
        match rl.readline("burrow> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                let _ = rl.add_history_entry(line);
                if let Err(e) = session.execute(line, stdout) {
                    writeln!(stdout, "{}", e)?;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}
