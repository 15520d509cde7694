//! The main compiler binary. Reads Mx* source from standard input and
//! writes RV32IM assembly to standard output; `--emit` dumps an earlier
//! stage instead, for debugging. Mem2Reg + DCE run by default; pass
//! `--no-optimize` to see the unoptimized pipeline's output instead.
//!
//! run with `--help` for more info.

use std::io::Read;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use mxc::back::codegen;
use mxc::front::{self, ast};
use mxc::middle;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// which stage to print, instead of the default compiled assembly
    #[arg(value_enum, short, long, default_value_t = Emit::Asm)]
    emit: Emit,
    /// skip Mem2Reg + dead-code elimination ahead of register allocation
    #[arg(long, default_value_t = false)]
    no_optimize: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Emit {
    /// the parsed AST
    Ast,
    /// the built SSA IR, before register allocation
    Tir,
    /// the resulting assembly code (default)
    Asm,
}

/// The union of every error a compilation run can fail with, each already
/// `Display`-able the way its source module renders it.
enum CompileError {
    Parse(front::parse::ParseError),
    Sema(front::sema::SemaError),
    Build(middle::BuildError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Parse(e) => write!(f, "{e}"),
            CompileError::Sema(e) => write!(f, "{e}"),
            CompileError::Build(e) => write!(f, "{e}"),
        }
    }
}

impl std::fmt::Debug for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<front::parse::ParseError> for CompileError {
    fn from(e: front::parse::ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<front::sema::SemaError> for CompileError {
    fn from(e: front::sema::SemaError) -> Self {
        CompileError::Sema(e)
    }
}

impl From<middle::BuildError> for CompileError {
    fn from(e: middle::BuildError) -> Self {
        CompileError::Build(e)
    }
}

fn parse_and_check(input: &str) -> Result<ast::Program, CompileError> {
    let prog = front::parse(input)?;
    front::check(&prog)?;
    Ok(prog)
}

fn run(args: &Args, input: &str) -> Result<String, CompileError> {
    match args.emit {
        Emit::Ast => {
            let prog = parse_and_check(input)?;
            Ok(format!("{prog:#?}"))
        }
        Emit::Tir => {
            let prog = parse_and_check(input)?;
            let mut module = middle::build(&prog)?;
            if !args.no_optimize {
                for func in module.funcs.values_mut() {
                    middle::mem2reg::run(func);
                }
            }
            Ok(format!("{module:#?}"))
        }
        Emit::Asm => {
            let prog = parse_and_check(input)?;
            let asm = codegen::compile_source(&prog, !args.no_optimize)?;
            Ok(asm.asm_code())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("error: source input was not valid UTF-8");
        return ExitCode::FAILURE;
    }

    match run(&args, &input) {
        Ok(text) => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
