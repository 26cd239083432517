//! Command-line front-end for a reliable store.
//!
//! ```text
//! constdb <db-path> get <key>
//! constdb <db-path> store <key> <value>
//! constdb <db-path> del <key>
//! constdb <db-path> dump
//! constdb <db-path> reorg
//! ```

use constdb::{Error, Options, ReliableStore};
use std::process::ExitCode;

fn usage(program: &str) -> ExitCode {
    eprintln!(
        "usage: {} <db-path> get <key>\n       {} <db-path> store <key> <value>\n       {} <db-path> del <key>\n       {} <db-path> dump\n       {} <db-path> reorg",
        program, program, program, program, program
    );
    ExitCode::from(2)
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("constdb");
    if args.len() < 3 {
        return usage(program);
    }

    let path = &args[1];
    let command = args[2].as_str();

    let result = match (command, args.len()) {
        ("get", 4) => run_get(path, args[3].as_bytes()),
        ("store", 5) => run_store(path, args[3].as_bytes(), args[4].as_bytes()),
        ("del", 4) => run_del(path, args[3].as_bytes()),
        ("dump", 3) => run_dump(path),
        ("reorg", 3) => run_reorg(path),
        _ => return usage(program),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", program, e);
            ExitCode::FAILURE
        }
    }
}

fn open(path: &str, read_only: bool) -> Result<ReliableStore, Error> {
    let options = if read_only {
        Options::new().read_only(true).create_if_missing(false)
    } else {
        Options::default()
    };
    ReliableStore::open(path, options)
}

fn run_get(path: &str, key: &[u8]) -> Result<ExitCode, Error> {
    let store = open(path, true)?;
    match store.get(key)? {
        Some(value) => {
            println!("{}", String::from_utf8_lossy(&value));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("key not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_store(path: &str, key: &[u8], value: &[u8]) -> Result<ExitCode, Error> {
    let store = open(path, false)?;
    store.store(key, value)?;
    Ok(ExitCode::SUCCESS)
}

fn run_del(path: &str, key: &[u8]) -> Result<ExitCode, Error> {
    let store = open(path, false)?;
    match store.remove(key) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(Error::NotFound(_)) => {
            eprintln!("key not found");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}

fn run_dump(path: &str) -> Result<ExitCode, Error> {
    let store = open(path, true)?;
    for (key, value) in store.dump()? {
        println!(
            "{}\t{}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_reorg(path: &str) -> Result<ExitCode, Error> {
    let store = open(path, false)?;
    store.close_reorganize()?;
    Ok(ExitCode::SUCCESS)
}
