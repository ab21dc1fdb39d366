//! Store inspection probe.
//!
//! # Responsibility
//! - Open (and migrate) a store, then print its schema version and the
//!   number of audit rows per type key.
//! - Keep output line-oriented `key=value` for quick local checks.

use clap::Parser;
use keelstore_core::db::migrations::current_version;
use keelstore_core::mapper::audit::count_by_type;
use keelstore_core::{
    core_version, default_log_level, init_logging, open_db, open_db_in_memory, LogConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "keelstore_cli", about = "Inspect a keelstore database")]
struct Args {
    /// Database file; an in-memory store is used when omitted.
    #[arg(long)]
    db: Option<PathBuf>,

    /// trace|debug|info|warn|error, logged to stderr.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let level = args.log_level.as_deref().unwrap_or(default_log_level());
    init_logging(&LogConfig::stderr(level)).map_err(|err| err.to_string())?;

    let conn = match &args.db {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    }
    .map_err(|err| err.to_string())?;

    println!("keelstore_core version={}", core_version());
    println!(
        "schema version={}",
        current_version(&conn).map_err(|err| err.to_string())?
    );
    for (type_key, count) in count_by_type(&conn).map_err(|err| err.to_string())? {
        println!("objects type={type_key} count={count}");
    }
    log::debug!("event=cli_inspect module=cli status=ok");
    Ok(())
}
