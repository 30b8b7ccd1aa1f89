//! The `tamarin` binary: a REPL, or a script runner when given a file.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;

use tamarin::{Session, Value};

const PROMPT: &str = ">> ";

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("usage: {} [script]", args[0]);
            process::exit(64);
        }
    }
}

fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("tamarin: cannot read {path}: {err}");
            process::exit(66);
        }
    };

    let mut session = Session::new();
    match session.run(&source) {
        Ok(value) => {
            if !matches!(value, Value::Null) {
                println!("{value}");
            }
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(70);
        }
    }
}

fn repl() {
    let mut session = Session::new();
    let stdin = io::stdin();
    print_prompt();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if !line.trim().is_empty() {
            match session.run(&line) {
                Ok(value) => println!("{value}"),
                Err(err) => println!("{err}"),
            }
        }
        print_prompt();
    }
}

fn print_prompt() {
    print!("{PROMPT}");
    let _ = io::stdout().flush();
}
