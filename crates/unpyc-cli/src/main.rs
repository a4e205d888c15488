//! `unpyc` — inspecteur de fichiers `.pyc`
//!
//! Argument parsing and process setup (tracing, color) only; the work is done
//! by `unpyc_cli` (lib).

#![forbid(unsafe_code)]

use std::{
    io::{self, IsTerminal, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use unpyc_cli as cli;
use unpyc_core::ParseOptions;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "unpyc", version, about = "unpyc — chunk trees and disassembly of Python .pyc files", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux (erreurs seulement)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    /// Couleur des sorties
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto, global = true)]
    color: ColorChoice,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

/// Parse knobs shared by `inspect` and `disasm`.
#[derive(Debug, Args)]
struct ParseArgs {
    /// Offset of the pyc inside the input
    #[arg(long, default_value_t = 0, value_parser = parse_offset)]
    offset: u64,
    /// Marshal nesting limit (default 64)
    #[arg(long = "max-depth")]
    max_depth: Option<usize>,
    /// Characters kept in string previews
    #[arg(long = "label-limit")]
    label_limit: Option<usize>,
}

impl ParseArgs {
    fn options(&self, disassemble: bool) -> ParseOptions {
        let defaults = ParseOptions::default();
        ParseOptions {
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            label_limit: self.label_limit.unwrap_or(defaults.label_limit),
            disassemble,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the chunk tree of a pyc file
    Inspect {
        /// Input file (or - for stdin)
        input: Option<PathBuf>,
        #[command(flatten)]
        parse: ParseArgs,
        /// JSON instead of the indented tree
        #[arg(long)]
        json: bool,
        /// Only the chunks covering this offset (decimal or 0x-prefixed)
        #[arg(long, value_parser = parse_offset)]
        at: Option<u64>,
        /// Skip disassembly (no instruction chunks)
        #[arg(long = "no-disasm")]
        no_disasm: bool,
    },

    /// Disassemble every code object
    Disasm {
        /// Input file (or - for stdin)
        input: Option<PathBuf>,
        #[command(flatten)]
        parse: ParseArgs,
    },

    /// List known magics, or identify the revision of a file
    Magic {
        /// Input file (or - for stdin); omit to list the registry
        input: Option<PathBuf>,
    },
}

fn parse_offset(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset `{s}`: {e}"))
}

// ──────────────────────────── Entrée ────────────────────────────

fn input_from_opt(p: Option<PathBuf>) -> cli::Input {
    match p {
        Some(path) if path.as_os_str() == "-" => cli::Input::Stdin,
        Some(path) => cli::Input::Path(path),
        None => cli::Input::Stdin,
    }
}

// ──────────────────────────── Couleur ────────────────────────────

fn init_color(choice: ColorChoice) -> bool {
    let ansi = match choice {
        ColorChoice::Auto => io::stderr().is_terminal(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };
    #[cfg(feature = "color")]
    {
        match choice {
            ColorChoice::Auto => owo_colors::unset_override(),
            ColorChoice::Always | ColorChoice::Never => owo_colors::set_override(ansi),
        }
    }
    ansi
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();

    let ansi = init_color(opt.color);
    cli::init_tracing(opt.verbose, opt.quiet, ansi);

    let command = match opt.cmd {
        Command::Inspect { input, parse, json, at, no_disasm } => cli::Command::Inspect(cli::InspectTask {
            input: input_from_opt(input),
            offset: parse.offset,
            format: if json { cli::Format::Json } else { cli::Format::Tree },
            at,
            options: parse.options(!no_disasm),
        }),
        Command::Disasm { input, parse } => cli::Command::Disasm(cli::DisasmTask {
            input: input_from_opt(input),
            offset: parse.offset,
            options: parse.options(true),
        }),
        Command::Magic { input } => cli::Command::Magic(cli::MagicTask { input: input.map(|p| input_from_opt(Some(p))) }),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let code = cli::execute(command, &mut out)?;
    out.flush()?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() { Opt::command().debug_assert(); }

    #[test]
    fn offsets_accept_hex() {
        assert_eq!(parse_offset("0x1c"), Ok(28));
        assert_eq!(parse_offset("28"), Ok(28));
        assert!(parse_offset("zz").is_err());
    }

    #[test]
    fn inspect_flags_map_to_options() {
        let opt = Opt::parse_from(["unpyc", "inspect", "f.pyc", "--no-disasm", "--max-depth", "10", "--at", "0x10"]);
        match opt.cmd {
            Command::Inspect { parse, at, no_disasm, .. } => {
                assert_eq!(at, Some(16));
                let options = parse.options(!no_disasm);
                assert_eq!((options.max_depth, options.disassemble, options.label_limit), (10, false, 64));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
