//! The `jk` command-line driver.
//!
//! Subcommands: `build`, `run`, `bytecode|bc`, `interpret|i`, `debug|d`.
//! With no arguments, starts a REPL on stdin/stdout. Exit code 0 on clean
//! completion, 1 on any error with the message on stderr.

use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
};

use jk::{Bytecode, Debugger, Object, PROMPT, ReplSession, StdPrint, Type, Vm};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None => repl(),
        Some("build") => build(file_arg(&args, "main.jk")),
        Some("run") => run(file_arg(&args, "main.jkb")),
        Some("bytecode" | "bc") => bytecode(file_arg(&args, "main.jkb")),
        Some("interpret" | "i") => interpret(file_arg(&args, "main.jk")),
        Some("debug" | "d") => debug(file_arg(&args, "main.jkb")),
        Some(other) => Err(format!("unknown command: {other}")),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn file_arg<'a>(args: &'a [String], default: &'a str) -> &'a str {
    args.get(1).map_or(default, String::as_str)
}

/// `.jk` is source, `.jkb` is serialized bytecode.
fn extension(filename: &str) -> &str {
    filename.rsplit_once('.').map_or("", |(_, ext)| ext)
}

fn read_source(filename: &str) -> Result<String, String> {
    fs::read_to_string(filename).map_err(|err| format!("reading {filename}: {err}"))
}

fn load_bytecode(filename: &str) -> Result<Bytecode, String> {
    match extension(filename) {
        "jkb" => {
            let data = fs::read(filename).map_err(|err| format!("reading {filename}: {err}"))?;
            Bytecode::unmarshal(&data).map_err(|err| err.to_string())
        }
        "jk" => jk::compile_source(&read_source(filename)?).map_err(|err| err.to_string()),
        ext => Err(format!("invalid filetype: .{ext}")),
    }
}

/// Reports a trailing `Error` value left on the stack by a finished program.
fn check_result(result: &Object) -> Result<(), String> {
    if result.kind() == Type::Error {
        Err(format!("runtime error: {}", result.inspect()))
    } else {
        Ok(())
    }
}

fn build(filename: &str) -> Result<(), String> {
    let bytecode = jk::compile_source(&read_source(filename)?).map_err(|err| err.to_string())?;
    let data = bytecode.marshal().map_err(|err| err.to_string())?;
    let out_filename = format!("{filename}b");
    fs::write(&out_filename, data).map_err(|err| format!("writing {out_filename}: {err}"))
}

fn run(filename: &str) -> Result<(), String> {
    let bytecode = load_bytecode(filename)?;
    let mut print = StdPrint;
    let result = jk::run_bytecode(bytecode, &mut print).map_err(|err| err.to_string())?;
    check_result(&result)
}

fn bytecode(filename: &str) -> Result<(), String> {
    let bytecode = load_bytecode(filename)?;
    print!("{bytecode}");
    Ok(())
}

fn interpret(filename: &str) -> Result<(), String> {
    let mut print = StdPrint;
    jk::interpret_source(&read_source(filename)?, &mut print)
        .map(|_| ())
        .map_err(|err| err.to_string())
}

fn debug(filename: &str) -> Result<(), String> {
    let bytecode = load_bytecode(filename)?;
    let mut vm = Vm::new(bytecode);
    let mut print = StdPrint;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    Debugger::new(&mut vm)
        .run(&mut input, &mut output, &mut print)
        .map_err(|err| err.to_string())?;
    if let Some(top) = vm.stack_top() {
        check_result(top)?;
    }
    Ok(())
}

fn repl() -> Result<(), String> {
    let mut session = ReplSession::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("{PROMPT}");
        let _ = stdout.flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(err) => return Err(err.to_string()),
        }
        if line.trim().is_empty() {
            continue;
        }
        let mut print = StdPrint;
        match session.execute(&line, &mut print) {
            Ok(result) => println!("{}", result.inspect()),
            // the REPL prints errors and keeps going
            Err(err) => println!("{err}"),
        }
    }
}
