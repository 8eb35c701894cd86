//! Command-line driver for the v7 engine.
//!
//! Usage: `v7 [flags] [file ...]`
//!
//! - `-e <expr>`   evaluate an expression (repeatable)
//! - `-t`          dump the text AST instead of executing
//! - `-b`          dump the binary AST instead of executing
//! - `-c`          dump the compiled bytecode instead of executing
//! - `-j`          JSON-stringify the final value
//! - `-mm`         dump memory stats after execution
//! - `-vo/-vf/-vp N`  object/function/property arena block sizes

use std::env;
use std::fs;
use std::io::Write as _;
use std::process::ExitCode;

use v7::{CompileTarget, Engine, EngineOpts, ExecError, Val};

#[derive(Default)]
struct Flags {
    exprs: Vec<String>,
    files: Vec<String>,
    dump: Option<CompileTarget>,
    json: bool,
    mem_stats: bool,
    opts: EngineOpts,
}

fn usage() -> ExitCode {
    eprintln!(
        "usage: v7 [-e expr] [-t|-b|-c] [-j] [-mm] [-vo N] [-vf N] [-vp N] [file ...]"
    );
    ExitCode::FAILURE
}

fn parse_flags() -> Result<Flags, ExitCode> {
    let mut flags = Flags::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-e" => match args.next() {
                Some(expr) => flags.exprs.push(expr),
                None => return Err(usage()),
            },
            "-t" => flags.dump = Some(CompileTarget::AstText),
            "-b" => flags.dump = Some(CompileTarget::AstBinary),
            "-c" => flags.dump = Some(CompileTarget::BcodeBinary),
            "-j" => flags.json = true,
            "-mm" => flags.mem_stats = true,
            "-vo" | "-vf" | "-vp" => {
                let n: u32 = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(usage)?;
                match arg.as_str() {
                    "-vo" => flags.opts.object_arena_size = n,
                    "-vf" => flags.opts.function_arena_size = n,
                    _ => flags.opts.property_arena_size = n,
                }
            }
            _ if arg.starts_with('-') => return Err(usage()),
            _ => flags.files.push(arg),
        }
    }
    if flags.exprs.is_empty() && flags.files.is_empty() {
        return Err(usage());
    }
    Ok(flags)
}

fn show(engine: &mut Engine, value: Val, json: bool) -> Result<(), ExecError> {
    let text = if json {
        engine.to_json_string(value).map_err(|t| engine.store_thrown(t))?
    } else {
        engine
            .to_display_string(value)
            .map_err(|t| engine.store_thrown(t))?
    };
    println!("{text}");
    Ok(())
}

fn run_source(engine: &mut Engine, src: &str, flags: &Flags) -> Result<(), ExecError> {
    if let Some(target) = flags.dump {
        let out = engine.compile_to(src, target)?;
        if target == CompileTarget::AstBinary || target == CompileTarget::BcodeBinary {
            let _ = std::io::stdout().write_all(&out);
        } else {
            print!("{}", String::from_utf8_lossy(&out));
        }
        return Ok(());
    }
    let value = engine.exec(src)?;
    show(engine, value, flags.json)
}

fn main() -> ExitCode {
    let flags = match parse_flags() {
        Ok(flags) => flags,
        Err(code) => return code,
    };

    let mut engine = Engine::with_opts(flags.opts.clone());
    let mut failed = false;

    for expr in &flags.exprs {
        if let Err(err) = run_source(&mut engine, expr, &flags) {
            eprintln!("{err}");
            failed = true;
        }
    }
    for path in &flags.files {
        match fs::read_to_string(path) {
            Ok(src) => {
                if let Err(err) = run_source(&mut engine, &src, &flags) {
                    eprintln!("{err}");
                    failed = true;
                }
            }
            Err(err) => {
                eprintln!("error: {path}: {err}");
                failed = true;
            }
        }
    }

    if flags.mem_stats {
        match serde_json::to_string_pretty(&engine.mem_stats()) {
            Ok(stats) => eprintln!("{stats}"),
            Err(err) => eprintln!("error: {err}"),
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
